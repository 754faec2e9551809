//! Scripted runner for tests
//!
//! Records every invocation and answers with configured exit codes instead
//! of spawning processes. Unmatched commands succeed with empty output.

use std::io;
use std::sync::{Mutex, PoisonError};

use super::{CommandOutput, CommandRunner, CommandSpec, ExecutionError};

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    /// Names of environment variables passed (values are not kept)
    pub env_keys: Vec<String>,
    /// Raw stdin, so tests can assert a secret was piped rather than passed
    /// as an argument
    pub stdin: Option<String>,
}

impl RecordedCall {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Exit(CommandOutput),
    SpawnError(String),
}

#[derive(Debug)]
struct Rule {
    program: String,
    args: Vec<String>,
    reply: Reply,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        self.program == spec.get_program()
            && self
                .args
                .iter()
                .all(|wanted| spec.get_args().iter().any(|a| a == wanted))
    }
}

/// In-memory [`CommandRunner`]
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `program` invocations containing every one of `args` with
    /// `exit_code`. Later rules take precedence.
    pub fn on(&self, program: &str, args: &[&str], exit_code: i32) -> &Self {
        self.on_output(program, args, exit_code, "", "")
    }

    /// Like [`ScriptedRunner::on`] with captured output
    pub fn on_output(
        &self,
        program: &str,
        args: &[&str],
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> &Self {
        self.push_rule(
            program,
            args,
            Reply::Exit(CommandOutput {
                status: Some(exit_code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        )
    }

    /// Make matching invocations fail to start
    pub fn on_spawn_error(&self, program: &str, args: &[&str], message: &str) -> &Self {
        self.push_rule(program, args, Reply::SpawnError(message.to_string()))
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invocations of one program, in order
    pub fn calls_to(&self, program: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls_to(program).len()
    }

    fn push_rule(&self, program: &str, args: &[&str], reply: Reply) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                reply,
            });
        self
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                program: spec.get_program().to_string(),
                args: spec.get_args().to_vec(),
                env_keys: spec.get_envs().iter().map(|(k, _)| k.clone()).collect(),
                stdin: spec.get_stdin().map(|s| s.expose().to_string()),
            });

        let reply = self
            .rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|rule| rule.matches(spec))
            .map(|rule| rule.reply.clone());

        match reply {
            Some(Reply::Exit(output)) => Ok(output),
            Some(Reply::SpawnError(message)) => Err(ExecutionError::ExecutionStart {
                command: spec.command_line(),
                err: io::Error::new(io::ErrorKind::NotFound, message),
            }),
            None => Ok(CommandOutput {
                status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

//! # External Command Execution
//!
//! Every directory, copy and inventory action is an external process whose
//! exit status is the only success signal. Components are generic over
//! [`CommandRunner`] so tests can script those processes.
//!
//! Command lines are rendered for errors and logs without stdin or
//! environment values, which is where secrets travel.

mod scripted;
mod system;

pub use scripted::{RecordedCall, ScriptedRunner};
pub use system::SystemRunner;

use std::fmt;

use crate::credential::Secret;

/// Description of one external process invocation
#[derive(Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Secret>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable. Values are never rendered.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed a secret to the process on stdin, followed by a newline
    pub fn stdin_secret(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    pub fn get_program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_stdin(&self) -> Option<&Secret> {
        self.stdin.as_ref()
    }

    /// Program and arguments joined by spaces
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug)]
pub struct CommandFailureInfo {
    command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.status {
            Some(code) => write!(
                f,
                "Command [{}] executed and failed with status: {}",
                self.command, code
            )?,
            None => write!(
                f,
                "Command [{}] was terminated by a signal",
                self.command
            )?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, "  stderr: {}", stderr)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),
}

impl ExecutionError {
    /// Exit code of a command that ran and failed
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::CommandFailure(info) => info.status,
            ExecutionError::ExecutionStart { .. } => None,
        }
    }

    /// Captured stdout of a command that ran and failed
    pub fn stdout(&self) -> &str {
        match self {
            ExecutionError::CommandFailure(info) => &info.stdout,
            ExecutionError::ExecutionStart { .. } => "",
        }
    }

    /// Captured stderr of a command that ran and failed
    pub fn stderr(&self) -> &str {
        match self {
            ExecutionError::CommandFailure(info) => &info.stderr,
            ExecutionError::ExecutionStart { .. } => "",
        }
    }
}

pub fn output_to_exec_error(spec: &CommandSpec, output: &CommandOutput) -> ExecutionError {
    ExecutionError::CommandFailure(Box::new(CommandFailureInfo {
        command: spec.command_line(),
        status: output.status,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    }))
}

/// Runs external processes
pub trait CommandRunner {
    /// Run the command to completion. A non-zero exit is still `Ok`; only
    /// failing to start (or to feed stdin) is an error.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        (**self).run(spec)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        (**self).run(spec)
    }
}

// Helper function for running the process and checking the exit code.
pub fn execute<R: CommandRunner + ?Sized>(
    runner: &R,
    spec: &CommandSpec,
) -> Result<CommandOutput, ExecutionError> {
    let output = runner.run(spec)?;

    if !output.success() {
        return Err(output_to_exec_error(spec, &output));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_omits_secrets() {
        let spec = CommandSpec::new("kinit")
            .arg("robot-admin")
            .env("PGPASSWORD", "hunter2")
            .stdin_secret(Secret::new("S3CRET"));

        assert_eq!(spec.command_line(), "kinit robot-admin");
        let debug = format!("{:?}", spec);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("S3CRET"));
        assert!(debug.contains("PGPASSWORD"));
    }

    #[test]
    fn test_execute_maps_nonzero_exit() {
        let runner = ScriptedRunner::new();
        runner.on_output("ipa", &["user-show"], 2, "", "ipa: ERROR: alice: user not found");

        let spec = CommandSpec::new("ipa").args(["user-show", "alice"]);
        let err = execute(&runner, &spec).unwrap_err();

        assert_eq!(err.exit_code(), Some(2));
        assert!(err.to_string().contains("ipa user-show alice"));
        assert!(err.to_string().contains("user not found"));
    }

    #[test]
    fn test_execute_passes_success_through() {
        let runner = ScriptedRunner::new();
        runner.on_output("psql", &[], 0, "h1\nh2\n", "");

        let output = execute(&runner, &CommandSpec::new("psql")).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "h1\nh2\n");
    }
}

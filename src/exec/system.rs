//! Runner backed by `std::process::Command`

use std::io::{self, Write};
use std::process::{Command, Stdio};

use super::{CommandOutput, CommandRunner, CommandSpec, ExecutionError};

/// Runs commands on the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        let start_error = |err| ExecutionError::ExecutionStart {
            command: spec.command_line(),
            err,
        };

        let mut command = Command::new(spec.get_program());
        command
            .args(spec.get_args())
            .envs(spec.get_envs().iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.get_stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(start_error)?;

        // Dropping the handle closes the pipe so the child sees EOF.
        let written = match (spec.get_stdin(), child.stdin.take()) {
            (Some(secret), Some(mut stdin)) => stdin
                .write_all(secret.expose().as_bytes())
                .and_then(|_| stdin.write_all(b"\n")),
            _ => Ok(()),
        };

        // Always reap the child; a child that exits without reading its
        // input still reports its own status and stderr.
        let output = child.wait_with_output().map_err(start_error)?;
        if let Err(e) = written {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(start_error(e));
            }
        }

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

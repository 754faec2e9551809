//! CLI module for ipa-bootstrap
//!
//! - generate: create the one-time credential on the controller, optionally
//!   registering the robot principal with it
//! - distribute: push it to new hosts
//! - client-install: redeem it on a target host, optionally applying a plan
//! - apply: run directory operations under a session
//! - local-accounts: create required local users and groups

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    apply, client_install, distribute, generate, local_accounts, run, run_command, Registration,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};

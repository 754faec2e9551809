//! CLI argument definitions using clap
//!
//! Commands:
//! - ipa-bootstrap generate --config <path> [--register --admin-password-file <path>]
//! - ipa-bootstrap distribute --config <path>
//! - ipa-bootstrap client-install --config <path> --server <s> --domain <d> [--plan <path>]
//! - ipa-bootstrap apply --config <path> --plan <path>
//! - ipa-bootstrap local-accounts --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "/etc/ipa-bootstrap.json";

/// One-time robot-admin credential handoff for FreeIPA bootstrap
#[derive(Parser, Debug)]
#[command(name = "ipa-bootstrap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a fresh one-time credential on the controller
    Generate {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Create or reset the robot principal in the directory with the new secret
        #[arg(long, requires = "admin_password_file")]
        register: bool,

        /// Administrator that performs the registration
        #[arg(long, default_value = "admin")]
        admin_principal: String,

        /// File holding the administrator password (kept after use)
        #[arg(long)]
        admin_password_file: Option<PathBuf>,

        /// Groups the robot principal is added to
        #[arg(long, value_delimiter = ',', default_value = "admins")]
        groups: Vec<String>,
    },

    /// Copy the credential to every host not yet given one
    Distribute {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Record failed hosts in the ledger too
        #[arg(long)]
        record_attempted: bool,
    },

    /// Wait for the credential and install the identity client with it
    ClientInstall {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Directory server to enroll against
        #[arg(long)]
        server: String,

        /// Directory domain
        #[arg(long)]
        domain: String,

        /// Seconds to wait for the credential (overrides configuration)
        #[arg(long)]
        wait_limit: Option<u64>,

        /// Skip DNS registration and SSHFP trust
        #[arg(long)]
        no_dns: bool,

        /// Directory plan applied with the redeemed credential before it is dropped
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Apply a directory plan under one authenticated session
    Apply {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// JSON plan of groups, users, services and keytabs
        #[arg(long)]
        plan: PathBuf,

        /// Keep the credential file after authenticating
        #[arg(long)]
        preserve_credential: bool,
    },

    /// Create the local users and groups listed in the configuration
    LocalAccounts {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

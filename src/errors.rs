//! # Bootstrap Errors
//!
//! Error taxonomy shared by the credential store, distributor, redeemer and
//! directory session.
//!
//! Conditions that are expected (an object already exists, a host was
//! already given a copy) never surface here. Everything else propagates to
//! the orchestrating caller, which decides whether to retry.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::exec::ExecutionError;

/// Result type for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Errors raised by the credential handoff and directory bootstrap
#[derive(Debug, Error)]
pub enum BootstrapError {
    // ==================
    // Credential Errors
    // ==================

    /// The credential file did not appear before the wait limit elapsed
    #[error("No credential appeared at {} within {waited_secs}s", path.display())]
    CredentialTimeout { path: PathBuf, waited_secs: u64 },

    /// The credential file is absent (never delivered or already consumed)
    #[error("No credential present at {}", path.display())]
    CredentialMissing { path: PathBuf },

    /// The credential present was already redeemed on this host
    #[error("Credential at {} (fingerprint {fingerprint}) was already redeemed", path.display())]
    CredentialAlreadyRedeemed { path: PathBuf, fingerprint: String },

    /// Ticket acquisition with the one-time credential failed
    #[error("Authentication as '{principal}' failed: {reason}")]
    AuthenticationFailed { principal: String, reason: String },

    // ==================
    // Distribution Errors
    // ==================

    /// Copying the credential to a single host failed
    #[error("Copy of credential to '{host}' failed: {reason}")]
    RemoteCopyFailed { host: String, reason: String },

    /// The host inventory could not be read
    #[error("Inventory query failed: {0}")]
    Inventory(String),

    // ==================
    // Directory Errors
    // ==================

    /// A directory mutation exited non-zero
    #[error("Directory operation '{operation}' failed: {source}")]
    DirectoryCommandFailed {
        operation: String,
        #[source]
        source: ExecutionError,
    },

    /// An existence check could neither confirm nor rule out an object
    #[error("Could not determine whether {kind} '{name}' exists: {reason}")]
    DirectoryQueryFailed {
        kind: &'static str,
        name: String,
        reason: String,
    },

    // ==================
    // Internal Errors
    // ==================

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Local filesystem operation failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A local (non-directory) command failed or could not start
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl BootstrapError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        BootstrapError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Stable error code in IPA_CATEGORY_NAME format
    pub fn code(&self) -> &'static str {
        match self {
            BootstrapError::CredentialTimeout { .. } => "IPA_CREDENTIAL_TIMEOUT",
            BootstrapError::CredentialMissing { .. } => "IPA_CREDENTIAL_MISSING",
            BootstrapError::CredentialAlreadyRedeemed { .. } => "IPA_CREDENTIAL_ALREADY_REDEEMED",
            BootstrapError::AuthenticationFailed { .. } => "IPA_AUTHENTICATION_FAILED",
            BootstrapError::RemoteCopyFailed { .. } => "IPA_REMOTE_COPY_FAILED",
            BootstrapError::Inventory(_) => "IPA_INVENTORY_FAILED",
            BootstrapError::DirectoryCommandFailed { .. } => "IPA_DIRECTORY_COMMAND_FAILED",
            BootstrapError::DirectoryQueryFailed { .. } => "IPA_DIRECTORY_QUERY_FAILED",
            BootstrapError::Config(_) => "IPA_CONFIG_INVALID",
            BootstrapError::Io { .. } => "IPA_IO_ERROR",
            BootstrapError::Execution(_) => "IPA_EXECUTION_FAILED",
        }
    }

    /// Whether this error aborts the calling step.
    ///
    /// Per-host copy failures are collected into the distribution report
    /// and do not stop the batch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BootstrapError::RemoteCopyFailed { .. })
    }
}

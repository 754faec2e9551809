//! Lifecycle events of the credential handoff
//!
//! Events are explicit and typed so that log consumers can rely on a closed
//! set of names.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration file loaded and validated
    ConfigLoaded,

    // Credential store
    /// A fresh one-time secret was written to the credential file
    CredentialGenerated,
    /// The credential file was consumed and removed
    CredentialConsumed,

    // Distribution
    /// Inventory returned the current host set
    InventoryLoaded,
    /// A host name failed validation and was not copied to
    HostRejected,
    /// The credential reached a host
    CopyDelivered,
    /// The credential could not be copied to a host
    CopyFailed,
    /// Hosts were appended to the distribution ledger
    LedgerAppended,
    /// Nothing left to distribute
    NothingToDistribute,

    // Redemption
    /// Waiting for the credential file to arrive
    CredentialWaitStarted,
    /// The wait limit elapsed
    CredentialWaitTimeout,
    /// Identity client installed with the one-time credential
    ClientInstalled,
    /// The identity client installation failed
    ClientInstallFailed,

    // Directory session
    /// Ticket acquired
    SessionOpened,
    /// Ticket destroyed
    SessionClosed,
    /// Ticket acquisition failed
    SessionAuthFailed,
    /// Ticket destruction failed
    SessionCloseFailed,

    // Directory and local objects
    /// A directory or local object was created
    ObjectCreated,
    /// A directory or local object already existed
    ObjectSkipped,
    /// A keytab was written and its ownership applied
    KeytabFetched,
    /// A directory password was set
    PasswordUpdated,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::CredentialGenerated => "CREDENTIAL_GENERATED",
            Event::CredentialConsumed => "CREDENTIAL_CONSUMED",
            Event::InventoryLoaded => "INVENTORY_LOADED",
            Event::HostRejected => "HOST_REJECTED",
            Event::CopyDelivered => "COPY_DELIVERED",
            Event::CopyFailed => "COPY_FAILED",
            Event::LedgerAppended => "LEDGER_APPENDED",
            Event::NothingToDistribute => "NOTHING_TO_DISTRIBUTE",
            Event::CredentialWaitStarted => "CREDENTIAL_WAIT_STARTED",
            Event::CredentialWaitTimeout => "CREDENTIAL_WAIT_TIMEOUT",
            Event::ClientInstalled => "CLIENT_INSTALLED",
            Event::ClientInstallFailed => "CLIENT_INSTALL_FAILED",
            Event::SessionOpened => "SESSION_OPENED",
            Event::SessionClosed => "SESSION_CLOSED",
            Event::SessionAuthFailed => "SESSION_AUTH_FAILED",
            Event::SessionCloseFailed => "SESSION_CLOSE_FAILED",
            Event::ObjectCreated => "OBJECT_CREATED",
            Event::ObjectSkipped => "OBJECT_SKIPPED",
            Event::KeytabFetched => "KEYTAB_FETCHED",
            Event::PasswordUpdated => "PASSWORD_UPDATED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::HostRejected | Event::CopyFailed | Event::CredentialWaitTimeout => {
                Severity::Warn
            }
            Event::ClientInstallFailed
            | Event::SessionAuthFailed
            | Event::SessionCloseFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

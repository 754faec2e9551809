//! # Directory Session
//!
//! Scoped Kerberos authentication built from a one-time credential.
//!
//! ## Invariants
//! - Acquisition consumes the credential file unless told to preserve it
//! - A failed `kinit` is followed by `kdestroy`; no half-open ticket remains
//! - Exactly one `kdestroy` per session, on every exit path (explicit
//!   release, early return, panic)

use std::path::PathBuf;

use crate::config::{BootstrapConfig, ToolPaths};
use crate::credential::{CredentialFile, Secret};
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::{execute, CommandRunner, CommandSpec};
use crate::observability::{Event, Logger};

/// Settings shared by every session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub principal: String,
    pub tools: ToolPaths,
    /// Exit status of `ipa *-show` meaning "not found"
    pub not_found_exit_code: i32,
    /// Where `update_password` writes when no path is given
    pub password_dir: PathBuf,
    /// Keep the credential file after authenticating
    pub preserve_credential: bool,
}

impl SessionSettings {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            principal: config.principal.clone(),
            tools: config.tools.clone(),
            not_found_exit_code: config.not_found_exit_code,
            password_dir: config.password_dir.clone(),
            preserve_credential: false,
        }
    }

    pub fn preserve_credential(mut self, preserve: bool) -> Self {
        self.preserve_credential = preserve;
        self
    }

    /// Authenticate as someone other than the configured principal
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    /// Default staging file for a user's password
    pub fn user_password_path(&self, user: &str) -> PathBuf {
        self.password_dir.join(format!("{}-password", user))
    }
}

/// An authenticated directory session.
///
/// Only one session should be open per process: the ticket cache is shared
/// by everything the process runs.
pub struct DirectorySession<'r, R: CommandRunner> {
    pub(super) runner: &'r R,
    pub(super) settings: SessionSettings,
    released: bool,
}

impl<'r, R: CommandRunner> DirectorySession<'r, R> {
    /// Consume the credential file and authenticate with it
    pub fn acquire(
        runner: &'r R,
        credential: &CredentialFile,
        settings: SessionSettings,
    ) -> BootstrapResult<Self> {
        let secret = credential.read()?;
        let preserve = settings.preserve_credential;
        let session = Self::from_secret(runner, &secret, settings)?;

        if !preserve {
            // On failure the session is dropped here, destroying the ticket.
            credential.remove()?;
            Logger::event(
                Event::CredentialConsumed,
                &[("path", &credential.path().display().to_string())],
            );
        }

        Ok(session)
    }

    /// Authenticate with a secret already in memory
    pub fn from_secret(
        runner: &'r R,
        secret: &Secret,
        settings: SessionSettings,
    ) -> BootstrapResult<Self> {
        let spec = CommandSpec::new(&settings.tools.kinit)
            .arg(&settings.principal)
            .stdin_secret(secret.clone());

        if let Err(e) = execute(runner, &spec) {
            if let Err(destroy_err) = destroy_ticket(runner, &settings.tools.kdestroy) {
                Logger::event(
                    Event::SessionCloseFailed,
                    &[("reason", &destroy_err.to_string())],
                );
            }
            Logger::event(
                Event::SessionAuthFailed,
                &[
                    ("principal", &settings.principal),
                    ("fingerprint", &secret.fingerprint()),
                ],
            );
            return Err(BootstrapError::AuthenticationFailed {
                principal: settings.principal.clone(),
                reason: e.to_string(),
            });
        }

        Logger::event(
            Event::SessionOpened,
            &[
                ("principal", &settings.principal),
                ("fingerprint", &secret.fingerprint()),
            ],
        );

        Ok(Self {
            runner,
            settings,
            released: false,
        })
    }

    pub fn principal(&self) -> &str {
        &self.settings.principal
    }

    /// Destroy the ticket now and report the result
    pub fn release(mut self) -> BootstrapResult<()> {
        self.released = true;
        let result = destroy_ticket(self.runner, &self.settings.tools.kdestroy);
        match &result {
            Ok(()) => Logger::event(Event::SessionClosed, &[("principal", self.principal())]),
            Err(e) => Logger::event(Event::SessionCloseFailed, &[("reason", &e.to_string())]),
        }
        result
    }
}

impl<R: CommandRunner> Drop for DirectorySession<'_, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match destroy_ticket(self.runner, &self.settings.tools.kdestroy) {
            Ok(()) => Logger::event(
                Event::SessionClosed,
                &[("principal", &self.settings.principal)],
            ),
            Err(e) => Logger::event(Event::SessionCloseFailed, &[("reason", &e.to_string())]),
        }
    }
}

fn destroy_ticket<R: CommandRunner + ?Sized>(runner: &R, kdestroy: &str) -> BootstrapResult<()> {
    execute(runner, &CommandSpec::new(kdestroy))
        .map(|_| ())
        .map_err(|source| BootstrapError::DirectoryCommandFailed {
            operation: "kdestroy".to_string(),
            source,
        })
}

/// Open a session, run `f` inside it, and always release the ticket.
///
/// An error from `f` takes precedence over a release error.
pub fn with_session<R, T, F>(
    runner: &R,
    credential: &CredentialFile,
    settings: SessionSettings,
    f: F,
) -> BootstrapResult<T>
where
    R: CommandRunner,
    F: FnOnce(&DirectorySession<'_, R>) -> BootstrapResult<T>,
{
    let session = DirectorySession::acquire(runner, credential, settings)?;
    let result = f(&session);
    let released = session.release();

    let value = result?;
    released?;
    Ok(value)
}

//! # Client Redemption
//!
//! Runs on a target host: waits for the distributed credential, redeems it
//! once to install the identity client, and retires it.
//!
//! ## Invariants
//! - A credential is redeemed at most once: after a successful install a
//!   marker holding its fingerprint is written and the file is deleted. A
//!   later copy of the same secret is refused; a new secret is redeemed.
//! - A failed install keeps the file so the orchestrator may retry
//! - The secret only ever reaches the installer through stdin

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::BootstrapConfig;
use crate::credential::{write_owner_only, CredentialFile, Secret};
use crate::directory::{DirectorySession, SessionSettings};
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::{execute, CommandRunner, CommandSpec};
use crate::observability::{Event, Logger, OperationScope};

/// Where and how to install the identity client
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub server: String,
    pub domain: String,
    /// Register the host in DNS and trust SSHFP records
    pub install_with_dns: bool,
}

impl InstallTarget {
    pub fn new(server: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            domain: domain.into(),
            install_with_dns: true,
        }
    }

    pub fn with_dns(mut self, enabled: bool) -> Self {
        self.install_with_dns = enabled;
        self
    }
}

/// Outcome of a successful redemption
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionReport {
    pub server: String,
    pub redeemed_at: DateTime<Utc>,
    /// Time spent waiting for the credential to arrive
    pub waited_ms: u64,
    pub fingerprint: String,
    pub marker: PathBuf,
}

/// Redeems the one-time credential on a client host
pub struct ClientRedeemer<R> {
    runner: R,
    credential: CredentialFile,
    marker: PathBuf,
    installer: String,
    poll_interval: Duration,
    settings: SessionSettings,
}

impl<R: CommandRunner> ClientRedeemer<R> {
    pub fn new(config: &BootstrapConfig, runner: R) -> Self {
        Self {
            runner,
            credential: config.credential_file(),
            marker: config.redemption_marker_path(),
            installer: config.tools.ipa_client_install.clone(),
            poll_interval: config.poll_interval(),
            settings: SessionSettings::from_config(config),
        }
    }

    pub fn credential(&self) -> &CredentialFile {
        &self.credential
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Whether this host already redeemed a credential
    pub fn is_redeemed(&self) -> bool {
        self.marker.is_file()
    }

    /// Fingerprint of the last credential redeemed on this host
    pub fn redeemed_fingerprint(&self) -> BootstrapResult<Option<String>> {
        if !self.is_redeemed() {
            return Ok(None);
        }
        match fs::read_to_string(&self.marker) {
            Ok(content) => Ok(content.split_whitespace().nth(1).map(str::to_string)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BootstrapError::io(&self.marker, e)),
        }
    }

    /// Wait up to `wait_limit` for the credential, then install the client
    /// with it
    pub fn await_and_install(
        &self,
        target: &InstallTarget,
        wait_limit: Duration,
    ) -> BootstrapResult<RedemptionReport> {
        self.redeem(target, wait_limit).map(|(report, _)| report)
    }

    /// Like [`ClientRedeemer::await_and_install`], then authenticate with
    /// the same secret so the host can register its own services and
    /// keytabs. The credential file is already gone at that point.
    pub fn await_install_and_open(
        &self,
        target: &InstallTarget,
        wait_limit: Duration,
    ) -> BootstrapResult<(RedemptionReport, DirectorySession<'_, R>)> {
        let (report, secret) = self.redeem(target, wait_limit)?;
        let session = DirectorySession::from_secret(&self.runner, &secret, self.settings.clone())?;
        Ok((report, session))
    }

    fn redeem(
        &self,
        target: &InstallTarget,
        wait_limit: Duration,
    ) -> BootstrapResult<(RedemptionReport, Secret)> {
        let scope = OperationScope::with_fields("REDEEM", &[("server", target.server.as_str())]);

        // The file was consumed by an earlier redemption and nothing new
        // was delivered since.
        if self.is_redeemed() && !self.credential.exists() {
            let err = BootstrapError::CredentialMissing {
                path: self.credential.path().to_path_buf(),
            };
            scope.fail("credential already redeemed on this host");
            return Err(err);
        }

        let waited = match self.wait_for_credential(wait_limit) {
            Ok(waited) => waited,
            Err(e) => {
                scope.fail(&e.to_string());
                return Err(e);
            }
        };

        let secret = self.credential.read()?;
        let fingerprint = secret.fingerprint();

        if self.redeemed_fingerprint()?.as_deref() == Some(fingerprint.as_str()) {
            let err = BootstrapError::CredentialAlreadyRedeemed {
                path: self.credential.path().to_path_buf(),
                fingerprint,
            };
            scope.fail(&err.to_string());
            return Err(err);
        }

        if let Err(e) = self.install(target, &secret) {
            Logger::event(
                Event::ClientInstallFailed,
                &[("server", &target.server), ("fingerprint", &fingerprint)],
            );
            scope.fail(&e.to_string());
            return Err(e);
        }

        // Marker first: if removal then fails, the leftover file carries a
        // fingerprint that is refused.
        let redeemed_at = Utc::now();
        let marker_content = format!("{} {}\n", redeemed_at.to_rfc3339(), fingerprint);
        write_owner_only(&self.marker, marker_content.as_bytes())
            .map_err(|e| BootstrapError::io(&self.marker, e))?;

        self.credential.remove()?;
        Logger::event(
            Event::CredentialConsumed,
            &[("path", &self.credential.path().display().to_string())],
        );

        Logger::event(
            Event::ClientInstalled,
            &[("server", &target.server), ("fingerprint", &fingerprint)],
        );
        scope.complete(&[("waited_ms", &waited.as_millis().to_string())]);

        let report = RedemptionReport {
            server: target.server.clone(),
            redeemed_at,
            waited_ms: waited.as_millis() as u64,
            fingerprint,
            marker: self.marker.clone(),
        };
        Ok((report, secret))
    }

    /// Poll until the credential file has content. A zero limit checks once.
    fn wait_for_credential(&self, wait_limit: Duration) -> BootstrapResult<Duration> {
        let started = Instant::now();
        let mut announced = false;

        loop {
            if self.credential.is_ready() {
                return Ok(started.elapsed());
            }

            let elapsed = started.elapsed();
            if elapsed >= wait_limit {
                Logger::event(
                    Event::CredentialWaitTimeout,
                    &[
                        ("path", &self.credential.path().display().to_string()),
                        ("waited_secs", &wait_limit.as_secs().to_string()),
                    ],
                );
                return Err(BootstrapError::CredentialTimeout {
                    path: self.credential.path().to_path_buf(),
                    waited_secs: wait_limit.as_secs(),
                });
            }

            if !announced {
                Logger::event(
                    Event::CredentialWaitStarted,
                    &[("path", &self.credential.path().display().to_string())],
                );
                announced = true;
            }
            thread::sleep(self.poll_interval.min(wait_limit - elapsed));
        }
    }

    fn install(&self, target: &InstallTarget, secret: &Secret) -> BootstrapResult<()> {
        let mut spec = CommandSpec::new(&self.installer)
            .args(["--mkhomedir", "--principal"])
            .arg(&self.settings.principal)
            .args(["-W", "--server", target.server.as_str(), "-U"]);
        if target.install_with_dns {
            spec = spec
                .args(["--enable-dns-updates", "--ssh-trust-dns", "--domain"])
                .arg(&target.domain);
        }

        execute(&self.runner, &spec.stdin_secret(secret.clone()))
            .map(|_| ())
            .map_err(|source| BootstrapError::DirectoryCommandFailed {
                operation: "ipa-client-install".to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedRunner;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> BootstrapConfig {
        let mut config = BootstrapConfig::default();
        config.password_dir = dir.path().to_path_buf();
        config.poll_interval_ms = 10;
        config
    }

    fn target() -> InstallTarget {
        InstallTarget::new("ipa.example.com", "example.com")
    }

    #[test]
    fn test_install_arguments_and_stdin() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();

        let report = ClientRedeemer::new(&config, &runner)
            .await_and_install(&target(), Duration::ZERO)
            .unwrap();

        let call = &runner.calls_to("ipa-client-install")[0];
        assert_eq!(
            call.args,
            vec![
                "--mkhomedir",
                "--principal",
                "robot-admin",
                "-W",
                "--server",
                "ipa.example.com",
                "-U",
                "--enable-dns-updates",
                "--ssh-trust-dns",
                "--domain",
                "example.com",
            ]
        );
        assert_eq!(call.stdin.as_deref(), Some("ONETIME"));
        assert!(!call.command_line().contains("ONETIME"));
        assert_eq!(report.fingerprint, Secret::new("ONETIME").fingerprint());
    }

    #[test]
    fn test_without_dns() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();

        ClientRedeemer::new(&config, &runner)
            .await_and_install(&target().with_dns(false), Duration::ZERO)
            .unwrap();

        let call = &runner.calls_to("ipa-client-install")[0];
        assert!(!call.has_arg("--domain"));
        assert!(call.has_arg("-U"));
    }

    #[test]
    fn test_success_retires_credential() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();
        let redeemer = ClientRedeemer::new(&config, &runner);

        let report = redeemer.await_and_install(&target(), Duration::ZERO).unwrap();

        assert!(!redeemer.credential().exists());
        assert!(redeemer.is_redeemed());
        let marker = fs::read_to_string(&report.marker).unwrap();
        assert!(!marker.contains("ONETIME"));
        assert!(marker.contains(&report.fingerprint));
    }

    #[test]
    fn test_zero_wait_times_out_without_sleeping() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let runner = ScriptedRunner::new();

        let started = Instant::now();
        let err = ClientRedeemer::new(&config, &runner)
            .await_and_install(&target(), Duration::ZERO)
            .unwrap_err();

        assert!(matches!(err, BootstrapError::CredentialTimeout { waited_secs: 0, .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_waits_for_late_credential() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let credential = config.credential_file();
        let runner = ScriptedRunner::new();

        // Renamed into place so the poller never sees a half-written file.
        let writer = {
            let target = credential.path().to_path_buf();
            let staging = CredentialFile::new(dir.path().join("incoming"));
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                staging.write(&Secret::new("LATE")).unwrap();
                fs::rename(staging.path(), target).unwrap();
            })
        };

        let report = ClientRedeemer::new(&config, &runner)
            .await_and_install(&target(), Duration::from_secs(10))
            .unwrap();
        writer.join().unwrap();

        assert!(report.waited_ms >= 40);
        assert_eq!(
            runner.calls_to("ipa-client-install")[0].stdin.as_deref(),
            Some("LATE")
        );
    }

    #[test]
    fn test_failed_install_keeps_credential() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();
        runner.on_output("ipa-client-install", &[], 1, "", "Joining realm failed");
        let redeemer = ClientRedeemer::new(&config, &runner);

        let err = redeemer.await_and_install(&target(), Duration::ZERO).unwrap_err();

        assert_eq!(err.code(), "IPA_DIRECTORY_COMMAND_FAILED");
        assert!(redeemer.credential().exists());
        assert!(!redeemer.is_redeemed());
    }

    #[test]
    fn test_second_redemption_fails_fast() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();
        let redeemer = ClientRedeemer::new(&config, &runner);

        redeemer.await_and_install(&target(), Duration::ZERO).unwrap();

        let started = Instant::now();
        let err = redeemer
            .await_and_install(&target(), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, BootstrapError::CredentialMissing { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(runner.count("ipa-client-install"), 1);
    }

    #[test]
    fn test_stale_copy_of_redeemed_secret_is_refused() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();
        let redeemer = ClientRedeemer::new(&config, &runner);

        redeemer.await_and_install(&target(), Duration::ZERO).unwrap();
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();

        let err = redeemer
            .await_and_install(&target(), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.code(), "IPA_CREDENTIAL_ALREADY_REDEEMED");
        assert!(err.to_string().contains(&Secret::new("ONETIME").fingerprint()));
        assert_eq!(runner.count("ipa-client-install"), 1);
    }

    #[test]
    fn test_new_bootstrap_secret_is_redeemed() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("FIRST")).unwrap();
        let runner = ScriptedRunner::new();
        let redeemer = ClientRedeemer::new(&config, &runner);

        redeemer.await_and_install(&target(), Duration::ZERO).unwrap();
        config.credential_file().write(&Secret::new("SECOND")).unwrap();

        let report = redeemer.await_and_install(&target(), Duration::ZERO).unwrap();

        assert_eq!(report.fingerprint, Secret::new("SECOND").fingerprint());
        assert_eq!(
            redeemer.redeemed_fingerprint().unwrap(),
            Some(Secret::new("SECOND").fingerprint())
        );
        let installs = runner.calls_to("ipa-client-install");
        assert_eq!(installs[1].stdin.as_deref(), Some("SECOND"));
        assert!(!redeemer.credential().exists());
    }

    #[test]
    fn test_failed_marker_write_keeps_credential() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        // A directory in the marker's place makes the marker write fail.
        fs::create_dir(config.redemption_marker_path()).unwrap();
        let runner = ScriptedRunner::new();
        let redeemer = ClientRedeemer::new(&config, &runner);

        let err = redeemer
            .await_and_install(&target(), Duration::ZERO)
            .unwrap_err();

        assert_eq!(err.code(), "IPA_IO_ERROR");
        assert_eq!(runner.count("ipa-client-install"), 1);
        assert!(redeemer.credential().exists());
    }

    #[test]
    fn test_install_and_open_reuses_secret() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config.credential_file().write(&Secret::new("ONETIME")).unwrap();
        let runner = ScriptedRunner::new();
        let redeemer = ClientRedeemer::new(&config, &runner);

        let (_report, session) = redeemer
            .await_install_and_open(&target(), Duration::ZERO)
            .unwrap();

        assert!(!redeemer.credential().exists());
        assert_eq!(runner.calls_to("kinit")[0].stdin.as_deref(), Some("ONETIME"));
        session.release().unwrap();
        assert_eq!(runner.count("kdestroy"), 1);
    }
}

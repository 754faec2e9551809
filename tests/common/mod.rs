//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ipa_bootstrap::config::BootstrapConfig;
use ipa_bootstrap::exec::{CommandOutput, CommandRunner, CommandSpec, ExecutionError};
use tempfile::TempDir;

/// Configuration rooted in a temporary directory
pub fn config_in(dir: &Path) -> BootstrapConfig {
    let mut config = BootstrapConfig::default();
    config.password_dir = dir.to_path_buf();
    config.poll_interval_ms = 10;
    config
}

/// Emulates `scp` into a directory per host, so copies can be inspected on
/// the "target" side. Hosts marked unreachable refuse the connection.
pub struct FakeCluster {
    root: TempDir,
    unreachable: Mutex<HashSet<String>>,
    copies: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            unreachable: Mutex::new(HashSet::new()),
            copies: Mutex::new(Vec::new()),
        }
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut hosts = self.unreachable.lock().unwrap();
        if unreachable {
            hosts.insert(host.to_string());
        } else {
            hosts.remove(host);
        }
    }

    /// Directory standing in for `host`'s filesystem
    pub fn host_dir(&self, host: &str) -> PathBuf {
        self.root.path().join(host)
    }

    /// Where a copy of `source` lands on `host`
    pub fn copy_on(&self, host: &str, source: &Path) -> PathBuf {
        self.host_dir(host).join(source.file_name().unwrap())
    }

    /// Hosts copied to, in order, failures included
    pub fn attempts(&self) -> Vec<String> {
        self.copies.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeCluster {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        assert_eq!(spec.get_program(), "scp", "unexpected command {}", spec.command_line());

        let args = spec.get_args();
        let source = PathBuf::from(&args[args.len() - 2]);
        let (host, _) = args[args.len() - 1].split_once(':').unwrap();
        self.copies.lock().unwrap().push(host.to_string());

        if self.unreachable.lock().unwrap().contains(host) {
            return Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: format!("ssh: connect to host {} port 22: Connection refused", host),
            });
        }

        fs::create_dir_all(self.host_dir(host)).unwrap();
        fs::copy(&source, self.copy_on(host, &source)).unwrap();
        Ok(CommandOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

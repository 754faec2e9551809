//! # Credential Distribution
//!
//! Pushes the controller's credential file to every host in the Host Set
//! that is not yet in the distribution ledger.
//!
//! ## Invariants
//! - A host recorded in the ledger is never copied to again
//! - One host's copy failure never aborts copies to the others
//! - The ledger is appended once, after the whole batch was attempted
//! - Names that do not look like hostnames are never passed to `scp`

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BootstrapConfig;
use crate::credential::CredentialFile;
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::{execute, CommandRunner, CommandSpec};
use crate::inventory::HostInventory;
use crate::ledger::DistributionLedger;
use crate::observability::{Event, Logger, OperationScope};

/// Which hosts of a batch are recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerPolicy {
    /// Only hosts whose copy verifiably succeeded
    #[default]
    DeliveredOnly,
    /// Every attempted host, failed copies included. A failed host is then
    /// never retried without editing the ledger.
    AllAttempted,
}

/// A host the credential could not be copied to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyFailure {
    pub host: String,
    pub reason: String,
}

impl From<CopyFailure> for BootstrapError {
    fn from(failure: CopyFailure) -> Self {
        BootstrapError::RemoteCopyFailed {
            host: failure.host,
            reason: failure.reason,
        }
    }
}

/// Outcome of one `distribute` call
#[derive(Debug, Clone, Serialize)]
pub struct DistributionReport {
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub policy: LedgerPolicy,
    /// Hosts in the Host Set that were already in the ledger
    pub already_distributed: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<CopyFailure>,
    /// Inventory entries that are not valid hostnames
    pub rejected: Vec<String>,
    /// Hosts appended to the ledger by this call
    pub recorded: Vec<String>,
}

impl DistributionReport {
    pub fn copies_attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    /// True when every new host received the credential
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.rejected.is_empty()
    }

    /// Per-host failures as errors
    pub fn errors(&self) -> Vec<BootstrapError> {
        self.failed.iter().cloned().map(BootstrapError::from).collect()
    }
}

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*$")
            .expect("valid regex")
    })
}

/// Whether `host` is safe to hand to the copy channel
pub fn is_valid_hostname(host: &str) -> bool {
    host.len() <= 253 && hostname_pattern().is_match(host)
}

/// Distributes the credential file from the controller
pub struct Distributor<R, I> {
    runner: R,
    inventory: I,
    credential: CredentialFile,
    ledger: DistributionLedger,
    scp: String,
    strict_host_key_checking: bool,
    policy: LedgerPolicy,
}

impl<R: CommandRunner, I: HostInventory> Distributor<R, I> {
    pub fn new(config: &BootstrapConfig, runner: R, inventory: I) -> Self {
        Self {
            runner,
            inventory,
            credential: config.credential_file(),
            ledger: config.ledger(),
            scp: config.tools.scp.clone(),
            strict_host_key_checking: config.strict_host_key_checking,
            policy: config.ledger_policy,
        }
    }

    pub fn ledger(&self) -> &DistributionLedger {
        &self.ledger
    }

    /// Distribute with the configured ledger policy
    pub fn distribute(&self) -> BootstrapResult<DistributionReport> {
        self.distribute_with_policy(self.policy)
    }

    /// Copy the credential to `Host Set - Ledger`, then update the ledger
    pub fn distribute_with_policy(
        &self,
        policy: LedgerPolicy,
    ) -> BootstrapResult<DistributionReport> {
        let run_id = Uuid::new_v4();
        let run_id_str = run_id.to_string();
        let scope = OperationScope::with_fields("DISTRIBUTE", &[("run_id", &run_id_str)]);

        if !self.credential.exists() {
            let err = BootstrapError::CredentialMissing {
                path: self.credential.path().to_path_buf(),
            };
            scope.fail(&err.to_string());
            return Err(err);
        }

        let all_hosts = self.inventory.hosts()?;
        let distributed: HashSet<String> = self.ledger.hosts()?.into_iter().collect();
        Logger::event(
            Event::InventoryLoaded,
            &[
                ("hosts", &all_hosts.len().to_string()),
                ("previously_distributed", &distributed.len().to_string()),
            ],
        );

        let mut report = DistributionReport {
            run_id,
            completed_at: Utc::now(),
            policy,
            already_distributed: 0,
            delivered: Vec::new(),
            failed: Vec::new(),
            rejected: Vec::new(),
            recorded: Vec::new(),
        };

        let mut attempted = Vec::new();
        for host in all_hosts {
            if distributed.contains(&host) {
                report.already_distributed += 1;
                continue;
            }
            if !is_valid_hostname(&host) {
                Logger::event(Event::HostRejected, &[("host", &host)]);
                report.rejected.push(host);
                continue;
            }

            match self.copy_to(&host) {
                Ok(()) => {
                    Logger::event(Event::CopyDelivered, &[("host", &host)]);
                    report.delivered.push(host.clone());
                }
                Err(reason) => {
                    Logger::event(Event::CopyFailed, &[("host", &host), ("reason", &reason)]);
                    report.failed.push(CopyFailure {
                        host: host.clone(),
                        reason,
                    });
                }
            }
            attempted.push(host);
        }

        if attempted.is_empty() {
            Logger::event(Event::NothingToDistribute, &[]);
        }

        let to_record = match policy {
            LedgerPolicy::DeliveredOnly => report.delivered.clone(),
            LedgerPolicy::AllAttempted => attempted,
        };
        report.recorded = self.ledger.record(&to_record)?;
        if !report.recorded.is_empty() {
            Logger::event(
                Event::LedgerAppended,
                &[("hosts", &report.recorded.join(","))],
            );
        }

        report.completed_at = Utc::now();
        scope.complete(&[
            ("delivered", &report.delivered.len().to_string()),
            ("failed", &report.failed.len().to_string()),
            ("rejected", &report.rejected.len().to_string()),
        ]);

        Ok(report)
    }

    fn copy_to(&self, host: &str) -> Result<(), String> {
        let path = self.credential.path().to_string_lossy().to_string();
        let host_key_checking = if self.strict_host_key_checking {
            "StrictHostKeyChecking=yes"
        } else {
            "StrictHostKeyChecking=no"
        };

        // -p keeps the 0600 mode on the target; BatchMode stops scp from
        // prompting for a password on an unattended run.
        let spec = CommandSpec::new(&self.scp)
            .args(["-p", "-o", "BatchMode=yes", "-o", host_key_checking])
            .arg(path.clone())
            .arg(format!("{}:{}", host, path));

        execute(&self.runner, &spec)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

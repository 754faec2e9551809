//! Bootstrap configuration
//!
//! Loaded from a JSON file. Every field has a default matching the stock
//! robot-admin layout, so `{}` is a valid configuration. Paths derived from
//! the principal (`/root/<principal>-password`, ...) follow it when not set
//! explicitly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::accounts::AccountSpec;
use crate::credential::{CredentialFile, DEFAULT_ALPHABET, DEFAULT_SECRET_LENGTH};
use crate::distribute::LedgerPolicy;
use crate::errors::{BootstrapError, BootstrapResult};
use crate::ledger::DistributionLedger;

/// Suffix of the marker left behind by a successful redemption
const REDEEMED_SUFFIX: &str = ".redeemed";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Robot principal that owns the one-time credential
    #[serde(default = "default_principal")]
    pub principal: String,

    /// Credential file (default `/root/<principal>-password`)
    #[serde(default)]
    pub credential_path: Option<PathBuf>,

    /// Distribution ledger (default `/root/<principal>-previously-distributed`)
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,

    #[serde(default = "default_secret_length")]
    pub secret_length: usize,

    #[serde(default = "default_secret_alphabet")]
    pub secret_alphabet: String,

    /// Interval between checks for the credential file on a target host
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Default wait limit for the credential file on a target host
    #[serde(default = "default_wait_limit_secs")]
    pub wait_limit_secs: u64,

    /// Which attempted hosts get recorded in the ledger
    #[serde(default)]
    pub ledger_policy: LedgerPolicy,

    /// Host key checking for the copy channel (off during bootstrap)
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// Exit status the `ipa *-show` commands use for "not found"
    #[serde(default = "default_not_found_exit_code")]
    pub not_found_exit_code: i32,

    /// Directory for per-user password files (`<dir>/<user>-password`)
    #[serde(default = "default_password_dir")]
    pub password_dir: PathBuf,

    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub tools: ToolPaths,

    /// Native accounts to create before the directory client is installed
    #[serde(default)]
    pub required_users: BTreeMap<String, AccountSpec>,
}

/// Where the host set comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventoryConfig {
    /// Query the Ambari server database for hosts carrying a component
    Ambari {
        #[serde(default = "default_ambari_password_file")]
        password_file: PathBuf,
        #[serde(default = "default_ambari_name")]
        database: String,
        #[serde(default = "default_ambari_name")]
        user: String,
        #[serde(default = "default_component")]
        component: String,
    },
    /// One hostname per line
    File { path: PathBuf },
    /// Fixed list
    Static { hosts: Vec<String> },
}

impl Default for InventoryConfig {
    fn default() -> Self {
        InventoryConfig::Ambari {
            password_file: default_ambari_password_file(),
            database: default_ambari_name(),
            user: default_ambari_name(),
            component: default_component(),
        }
    }
}

/// External programs, by name or absolute path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ipa: String,
    pub kinit: String,
    pub kdestroy: String,
    pub ipa_getkeytab: String,
    pub ipa_client_install: String,
    pub scp: String,
    pub psql: String,
    pub chown: String,
    pub chmod: String,
    pub getent: String,
    pub useradd: String,
    pub groupadd: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ipa: "ipa".to_string(),
            kinit: "kinit".to_string(),
            kdestroy: "kdestroy".to_string(),
            ipa_getkeytab: "ipa-getkeytab".to_string(),
            ipa_client_install: "ipa-client-install".to_string(),
            scp: "scp".to_string(),
            psql: "psql".to_string(),
            chown: "chown".to_string(),
            chmod: "chmod".to_string(),
            getent: "getent".to_string(),
            useradd: "useradd".to_string(),
            groupadd: "groupadd".to_string(),
        }
    }
}

fn default_principal() -> String {
    "robot-admin".to_string()
}
fn default_secret_length() -> usize {
    DEFAULT_SECRET_LENGTH
}
fn default_secret_alphabet() -> String {
    DEFAULT_ALPHABET.to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_wait_limit_secs() -> u64 {
    600
}
fn default_not_found_exit_code() -> i32 {
    2
}
fn default_password_dir() -> PathBuf {
    PathBuf::from("/root")
}
fn default_ambari_password_file() -> PathBuf {
    PathBuf::from("/etc/ambari-server/conf/password.dat")
}
fn default_ambari_name() -> String {
    "ambari".to_string()
}
fn default_component() -> String {
    "FREEIPA_CLIENT".to_string()
}

fn principal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"))
}

fn component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9_]+$").expect("valid regex"))
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            principal: default_principal(),
            credential_path: None,
            ledger_path: None,
            secret_length: default_secret_length(),
            secret_alphabet: default_secret_alphabet(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_limit_secs: default_wait_limit_secs(),
            ledger_policy: LedgerPolicy::default(),
            strict_host_key_checking: false,
            not_found_exit_code: default_not_found_exit_code(),
            password_dir: default_password_dir(),
            inventory: InventoryConfig::default(),
            tools: ToolPaths::default(),
            required_users: BTreeMap::new(),
        }
    }
}

impl BootstrapConfig {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> BootstrapResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BootstrapError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> BootstrapResult<Self> {
        let config: BootstrapConfig = serde_json::from_str(content)
            .map_err(|e| BootstrapError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BootstrapResult<()> {
        if !principal_pattern().is_match(&self.principal) {
            return Err(BootstrapError::Config(format!(
                "Invalid principal: '{}'",
                self.principal
            )));
        }

        if self.secret_length == 0 {
            return Err(BootstrapError::Config("secret_length must be > 0".to_string()));
        }

        if self.secret_alphabet.is_empty() {
            return Err(BootstrapError::Config(
                "secret_alphabet must not be empty".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(BootstrapError::Config(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        if let InventoryConfig::Ambari { component, .. } = &self.inventory {
            // Interpolated into the inventory SQL.
            if !component_pattern().is_match(component) {
                return Err(BootstrapError::Config(format!(
                    "Invalid inventory component: '{}'",
                    component
                )));
            }
        }

        Ok(())
    }

    pub fn credential_path(&self) -> PathBuf {
        self.credential_path.clone().unwrap_or_else(|| {
            self.password_dir
                .join(format!("{}-password", self.principal))
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path.clone().unwrap_or_else(|| {
            self.password_dir
                .join(format!("{}-previously-distributed", self.principal))
        })
    }

    /// Marker written next to the credential file once it was redeemed
    pub fn redemption_marker_path(&self) -> PathBuf {
        let mut path = self.credential_path().into_os_string();
        path.push(REDEEMED_SUFFIX);
        PathBuf::from(path)
    }

    pub fn credential_file(&self) -> CredentialFile {
        CredentialFile::new(self.credential_path())
    }

    pub fn ledger(&self) -> DistributionLedger {
        DistributionLedger::new(self.ledger_path())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_limit(&self) -> Duration {
        Duration::from_secs(self.wait_limit_secs)
    }
}

//! # Host Inventory
//!
//! Read-only source of the Host Set: every host that needs the robot-admin
//! credential. Results are de-duplicated with blank entries dropped; the
//! order of first appearance is kept.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::config::{BootstrapConfig, InventoryConfig};
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::{execute, CommandRunner, CommandSpec};

/// Source of the current host set
pub trait HostInventory {
    fn hosts(&self) -> BootstrapResult<Vec<String>>;
}

impl<T: HostInventory + ?Sized> HostInventory for &T {
    fn hosts(&self) -> BootstrapResult<Vec<String>> {
        (**self).hosts()
    }
}

impl<T: HostInventory + ?Sized> HostInventory for Box<T> {
    fn hosts(&self) -> BootstrapResult<Vec<String>> {
        (**self).hosts()
    }
}

/// Split inventory output into a de-duplicated host list
pub fn normalize_hosts<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .filter(|h| seen.insert(h.to_string()))
        .map(str::to_string)
        .collect()
}

/// Fixed host list
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    hosts: Vec<String>,
}

impl StaticInventory {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl HostInventory for StaticInventory {
    fn hosts(&self) -> BootstrapResult<Vec<String>> {
        Ok(normalize_hosts(self.hosts.iter().map(String::as_str)))
    }
}

/// Hosts listed one per line in a file
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HostInventory for FileInventory {
    fn hosts(&self) -> BootstrapResult<Vec<String>> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            BootstrapError::Inventory(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(normalize_hosts(content.lines()))
    }
}

/// Hosts carrying a component, queried from the Ambari server database
pub struct AmbariInventory<R> {
    runner: R,
    psql: String,
    password_file: PathBuf,
    database: String,
    user: String,
    component: String,
}

impl<R: CommandRunner> AmbariInventory<R> {
    pub fn new(
        runner: R,
        psql: impl Into<String>,
        password_file: impl Into<PathBuf>,
        database: impl Into<String>,
        user: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            psql: psql.into(),
            password_file: password_file.into(),
            database: database.into(),
            user: user.into(),
            component: component.into(),
        }
    }

    fn query(&self) -> String {
        format!(
            "select hosts.host_name from hosts join hostcomponentstate \
             on hostcomponentstate.host_name = hosts.host_name \
             where component_name = '{}';",
            self.component
        )
    }
}

impl<R: CommandRunner> HostInventory for AmbariInventory<R> {
    fn hosts(&self) -> BootstrapResult<Vec<String>> {
        let password = fs::read_to_string(&self.password_file).map_err(|e| {
            BootstrapError::Inventory(format!(
                "Cannot read database password {}: {}",
                self.password_file.display(),
                e
            ))
        })?;

        let spec = CommandSpec::new(&self.psql)
            .args([self.database.as_str(), self.user.as_str(), "-q", "-A", "-t", "-c"])
            .arg(self.query())
            .env("PGPASSWORD", password.trim_end_matches(['\r', '\n']));

        let output = execute(&self.runner, &spec)
            .map_err(|e| BootstrapError::Inventory(e.to_string()))?;

        Ok(normalize_hosts(output.stdout.lines()))
    }
}

/// Build the inventory described by the configuration
pub fn from_config<'a, R: CommandRunner + 'a>(
    config: &BootstrapConfig,
    runner: R,
) -> Box<dyn HostInventory + 'a> {
    match &config.inventory {
        InventoryConfig::Ambari {
            password_file,
            database,
            user,
            component,
        } => Box::new(AmbariInventory::new(
            runner,
            config.tools.psql.clone(),
            password_file.clone(),
            database.clone(),
            user.clone(),
            component.clone(),
        )),
        InventoryConfig::File { path } => Box::new(FileInventory::new(path.clone())),
        InventoryConfig::Static { hosts } => Box::new(StaticInventory::new(hosts.clone())),
    }
}

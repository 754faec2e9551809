//! # Local Accounts
//!
//! Native users and groups that must exist on a host before directory
//! users can be mapped onto it. Checks go through `getent`, creation through
//! `groupadd`/`useradd`; nothing already present is modified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::BootstrapConfig;
use crate::directory::{Outcome, Presence};
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::{execute, CommandRunner, CommandSpec};
use crate::observability::{Event, Logger};

/// `getent` exit status for "key not found in database"
const GETENT_NOT_FOUND: i32 = 2;

/// A local user to ensure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSpec {
    /// First entry is the primary group, the rest supplementary
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub comment: String,
    /// Extra `useradd` flags
    #[serde(default)]
    pub options: Vec<String>,
}

/// Creates missing local users and groups
pub struct LocalAccounts<R> {
    runner: R,
    getent: String,
    useradd: String,
    groupadd: String,
}

impl<R: CommandRunner> LocalAccounts<R> {
    pub fn new(config: &BootstrapConfig, runner: R) -> Self {
        Self {
            runner,
            getent: config.tools.getent.clone(),
            useradd: config.tools.useradd.clone(),
            groupadd: config.tools.groupadd.clone(),
        }
    }

    pub fn ensure_group(&self, group: &str) -> BootstrapResult<Outcome> {
        if self.exists("group", group)? {
            return Ok(skipped("group", group));
        }
        execute(&self.runner, &CommandSpec::new(&self.groupadd).arg(group))?;
        Ok(created("group", group))
    }

    /// Ensure the user's groups, then the user itself
    pub fn ensure_user(&self, user: &str, spec: &AccountSpec) -> BootstrapResult<Outcome> {
        for group in &spec.groups {
            self.ensure_group(group)?;
        }

        if self.exists("passwd", user)? {
            return Ok(skipped("user", user));
        }

        let mut command = CommandSpec::new(&self.useradd);
        if let Some((primary, supplementary)) = spec.groups.split_first() {
            command = command.args(["-g", primary.as_str()]);
            if !supplementary.is_empty() {
                command = command.arg("-G").arg(supplementary.join(","));
            }
        }
        command = command.args(spec.options.iter().cloned());
        if !spec.comment.is_empty() {
            command = command.arg("-c").arg(&spec.comment);
        }
        execute(&self.runner, &command.arg(user))?;

        Ok(created("user", user))
    }

    /// Ensure every user of a configured map, in name order
    pub fn ensure_required_users(
        &self,
        users: &BTreeMap<String, AccountSpec>,
    ) -> BootstrapResult<Vec<(String, Outcome)>> {
        users
            .iter()
            .map(|(name, spec)| Ok((name.clone(), self.ensure_user(name, spec)?)))
            .collect()
    }

    fn lookup(&self, database: &str, key: &str) -> Presence {
        let spec = CommandSpec::new(&self.getent).args([database, key]);
        match self.runner.run(&spec) {
            Ok(output) if output.success() => Presence::Exists,
            Ok(output) if output.status == Some(GETENT_NOT_FOUND) => Presence::Absent,
            Ok(output) => Presence::QueryFailed(format!(
                "getent {} exited with {:?}",
                database, output.status
            )),
            Err(e) => Presence::QueryFailed(e.to_string()),
        }
    }

    fn exists(&self, database: &'static str, key: &str) -> BootstrapResult<bool> {
        match self.lookup(database, key) {
            Presence::Exists => Ok(true),
            Presence::Absent => Ok(false),
            Presence::QueryFailed(reason) => Err(BootstrapError::DirectoryQueryFailed {
                kind: if database == "passwd" { "local user" } else { "local group" },
                name: key.to_string(),
                reason,
            }),
        }
    }
}

fn created(kind: &str, name: &str) -> Outcome {
    Logger::event(Event::ObjectCreated, &[("kind", kind), ("name", name), ("scope", "local")]);
    Outcome::Created
}

fn skipped(kind: &str, name: &str) -> Outcome {
    Logger::event(Event::ObjectSkipped, &[("kind", kind), ("name", name), ("scope", "local")]);
    Outcome::AlreadyPresent
}

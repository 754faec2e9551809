//! Batch of directory operations applied under one session.
//!
//! Steps run in a fixed order: default shell, groups, users (with their
//! memberships and passwords), service principals, keytabs. The first
//! failing step stops the batch.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::objects::{GroupSpec, KeytabRequest, Outcome, UserSpec};
use super::session::DirectorySession;
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::CommandRunner;
use crate::observability::OperationScope;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryPlan {
    #[serde(default)]
    pub default_shell: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub keytabs: Vec<KeytabRequest>,
}

/// One applied step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub kind: &'static str,
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
    pub steps: Vec<PlanStep>,
}

impl PlanReport {
    pub fn created(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == Outcome::Created)
            .count()
    }

    fn push(&mut self, kind: &'static str, name: &str, outcome: Outcome) {
        self.steps.push(PlanStep {
            kind,
            name: name.to_string(),
            outcome,
        });
    }
}

impl DirectoryPlan {
    pub fn load(path: &Path) -> BootstrapResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| BootstrapError::io(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> BootstrapResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| BootstrapError::Config(format!("Invalid plan JSON: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.default_shell.is_none()
            && self.groups.is_empty()
            && self.users.is_empty()
            && self.services.is_empty()
            && self.keytabs.is_empty()
    }

    pub fn apply<R: CommandRunner>(
        &self,
        session: &DirectorySession<'_, R>,
    ) -> BootstrapResult<PlanReport> {
        let scope = OperationScope::new("APPLY_PLAN");
        match self.apply_steps(session) {
            Ok(report) => {
                scope.complete(&[("created", &report.created().to_string())]);
                Ok(report)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn apply_steps<R: CommandRunner>(
        &self,
        session: &DirectorySession<'_, R>,
    ) -> BootstrapResult<PlanReport> {
        let mut report = PlanReport::default();

        if let Some(shell) = &self.default_shell {
            report.push("default_shell", shell, session.set_default_shell(shell)?);
        }
        for group in &self.groups {
            let outcome = session.create_group(&group.name, &group.description, &group.options)?;
            report.push("group", &group.name, outcome);
        }
        for user in &self.users {
            report.push("user", &user.identity, session.create_user(user)?);
        }
        for service in &self.services {
            report.push("service", service, session.create_service_principal(service)?);
        }
        for keytab in &self.keytabs {
            session.fetch_keytab(keytab)?;
            report.push(
                "keytab",
                &keytab.destination.to_string_lossy(),
                Outcome::Created,
            );
        }

        Ok(report)
    }
}

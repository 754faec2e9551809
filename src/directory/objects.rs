//! # Directory Objects
//!
//! Idempotent create-if-absent operations available under an open
//! [`DirectorySession`]. Existence checks are pure queries; a check that
//! cannot decide is an error, never an implicit "absent".

use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::session::DirectorySession;
use crate::credential::{write_owner_only, Secret};
use crate::errors::{BootstrapError, BootstrapResult};
use crate::exec::{execute, CommandOutput, CommandRunner, CommandSpec, ExecutionError};
use crate::observability::{Event, Logger};

/// Last name given to users created without one
pub const DEFAULT_LAST_NAME: &str = "auto_generated";

/// Mode of a keytab directory created on demand
const KEYTAB_DIR_MODE: u32 = 0o555;

/// Result of an existence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Exists,
    /// The directory answered "not found"
    Absent,
    /// The query itself failed (connectivity, expired ticket, ...)
    QueryFailed(String),
}

/// Result of an idempotent operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Created,
    AlreadyPresent,
}

/// Kinds of directory objects with a `<kind>-show` query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    User,
    Service,
    Group,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::User => "user",
            ObjectKind::Service => "service",
            ObjectKind::Group => "group",
        }
    }
}

/// A directory user to create
#[derive(Debug, Clone, Deserialize)]
pub struct UserSpec {
    pub identity: String,
    /// Defaults to the identity
    #[serde(default)]
    pub first_name: Option<String>,
    /// Defaults to [`DEFAULT_LAST_NAME`]
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub password: Option<Secret>,
    /// Where the password is staged (default `<password_dir>/<identity>-password`)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl UserSpec {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            first_name: None,
            last_name: None,
            groups: Vec::new(),
            password: None,
            password_file: None,
        }
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn password(mut self, password: Secret) -> Self {
        self.password = Some(password);
        self
    }

    pub fn password_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.password_file = Some(path.into());
        self
    }
}

/// A group to create
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub description: String,
    /// Extra `ipa group-add` flags, e.g. `--nonposix`
    #[serde(default)]
    pub options: Vec<String>,
}

/// A keytab to retrieve and install
#[derive(Debug, Clone, Deserialize)]
pub struct KeytabRequest {
    pub server: String,
    pub principal: String,
    pub realm: String,
    pub destination: PathBuf,
    pub owner: String,
    pub group: String,
    /// Passed to `chmod`, e.g. `400`
    pub mode: String,
}

impl<R: CommandRunner> DirectorySession<'_, R> {
    /// Query whether an object exists
    pub fn presence(&self, kind: ObjectKind, name: &str) -> Presence {
        let spec = CommandSpec::new(&self.settings.tools.ipa)
            .arg(format!("{}-show", kind.as_str()))
            .arg(name);

        match self.runner.run(&spec) {
            Ok(output) if output.success() => Presence::Exists,
            Ok(output) if output.status == Some(self.settings.not_found_exit_code) => {
                Presence::Absent
            }
            Ok(output) => Presence::QueryFailed(describe_failure(&output)),
            Err(e) => Presence::QueryFailed(e.to_string()),
        }
    }

    pub fn user_exists(&self, user: &str) -> Presence {
        self.presence(ObjectKind::User, user)
    }

    pub fn service_exists(&self, service: &str) -> Presence {
        self.presence(ObjectKind::Service, service)
    }

    pub fn group_exists(&self, group: &str) -> Presence {
        self.presence(ObjectKind::Group, group)
    }

    /// Create a user unless it exists, then add group memberships and set
    /// the password. Memberships and password are only applied to users
    /// created by this call.
    pub fn create_user(&self, user: &UserSpec) -> BootstrapResult<Outcome> {
        if self.exists(ObjectKind::User, &user.identity)? {
            return Ok(skipped(ObjectKind::User, &user.identity));
        }
        self.add_user(user)
    }

    /// Create the user, or bring an existing one up to date: memberships
    /// are added and the password is reset. Used to register a fresh
    /// one-time secret for a principal that may survive from an earlier
    /// bootstrap.
    pub fn create_or_reset_user(&self, user: &UserSpec) -> BootstrapResult<Outcome> {
        if !self.exists(ObjectKind::User, &user.identity)? {
            return self.add_user(user);
        }
        skipped(ObjectKind::User, &user.identity);

        for group in &user.groups {
            self.group_add_member(group, &user.identity)?;
        }
        if let Some(password) = &user.password {
            self.update_password(&user.identity, password, user.password_file.as_deref())?;
        }
        Ok(Outcome::AlreadyPresent)
    }

    fn add_user(&self, user: &UserSpec) -> BootstrapResult<Outcome> {
        let first = user.first_name.as_deref().unwrap_or(&user.identity);
        let last = user.last_name.as_deref().unwrap_or(DEFAULT_LAST_NAME);
        self.mutate(
            "user-add",
            CommandSpec::new(&self.settings.tools.ipa)
                .args(["user-add", "--first", first, "--last", last])
                .arg(&user.identity),
        )?;
        created(ObjectKind::User, &user.identity);

        for group in &user.groups {
            self.group_add_member(group, &user.identity)?;
        }

        if let Some(password) = &user.password {
            self.update_password(&user.identity, password, user.password_file.as_deref())?;
        }

        Ok(Outcome::Created)
    }

    pub fn create_service_principal(&self, principal: &str) -> BootstrapResult<Outcome> {
        if self.exists(ObjectKind::Service, principal)? {
            return Ok(skipped(ObjectKind::Service, principal));
        }

        self.mutate(
            "service-add",
            CommandSpec::new(&self.settings.tools.ipa)
                .arg("service-add")
                .arg(principal),
        )?;
        created(ObjectKind::Service, principal);
        Ok(Outcome::Created)
    }

    pub fn create_group(
        &self,
        group: &str,
        description: &str,
        options: &[String],
    ) -> BootstrapResult<Outcome> {
        if self.exists(ObjectKind::Group, group)? {
            return Ok(skipped(ObjectKind::Group, group));
        }

        self.mutate(
            "group-add",
            CommandSpec::new(&self.settings.tools.ipa)
                .args(["group-add", group, "--desc", description])
                .args(options.iter().cloned()),
        )?;
        created(ObjectKind::Group, group);
        Ok(Outcome::Created)
    }

    /// Add a user to a group. Existing membership is not an error.
    pub fn group_add_member(&self, group: &str, user: &str) -> BootstrapResult<Outcome> {
        let spec = CommandSpec::new(&self.settings.tools.ipa)
            .args(["group-add-member", group])
            .arg(format!("--users={}", user));

        match execute(self.runner, &spec) {
            Ok(_) => Ok(Outcome::Created),
            Err(e) if e.stdout().contains("already a member") => Ok(Outcome::AlreadyPresent),
            Err(source) => Err(BootstrapError::DirectoryCommandFailed {
                operation: "group-add-member".to_string(),
                source,
            }),
        }
    }

    /// Retrieve a keytab to `destination` and apply ownership and mode.
    ///
    /// The parent directory is created with mode 0555 when absent; missing
    /// ancestors get the default mode.
    pub fn fetch_keytab(&self, request: &KeytabRequest) -> BootstrapResult<()> {
        if let Some(parent) = request.destination.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                if let Some(ancestor) = parent.parent() {
                    fs::create_dir_all(ancestor).map_err(|e| BootstrapError::io(ancestor, e))?;
                }
                DirBuilder::new()
                    .mode(KEYTAB_DIR_MODE)
                    .create(parent)
                    .map_err(|e| BootstrapError::io(parent, e))?;
            }
        }

        let destination = request.destination.to_string_lossy().to_string();
        let tools = &self.settings.tools;

        self.mutate(
            "ipa-getkeytab",
            CommandSpec::new(&tools.ipa_getkeytab)
                .args(["-s", request.server.as_str(), "-p"])
                .arg(format!("{}@{}", request.principal, request.realm))
                .arg("-k")
                .arg(destination.clone()),
        )?;
        self.mutate(
            "chown",
            CommandSpec::new(&tools.chown)
                .arg(format!("{}:{}", request.owner, request.group))
                .arg(destination.clone()),
        )?;
        self.mutate(
            "chmod",
            CommandSpec::new(&tools.chmod)
                .arg(&request.mode)
                .arg(destination.clone()),
        )?;

        Logger::event(
            Event::KeytabFetched,
            &[
                ("path", &destination),
                ("principal", &request.principal),
            ],
        );
        Ok(())
    }

    /// Stage `password` in an owner-only file (overwriting it) and set it as
    /// the user's directory password. Returns the file written.
    pub fn update_password(
        &self,
        user: &str,
        password: &Secret,
        password_file: Option<&Path>,
    ) -> BootstrapResult<PathBuf> {
        let path = password_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.user_password_path(user));

        write_owner_only(&path, password.expose().as_bytes())
            .map_err(|e| BootstrapError::io(&path, e))?;
        let staged = fs::read_to_string(&path)
            .map(Secret::new)
            .map_err(|e| BootstrapError::io(&path, e))?;
        if !staged.matches(password) {
            return Err(BootstrapError::io(
                &path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "staged password does not match what was written",
                ),
            ));
        }

        self.mutate(
            "user-mod",
            CommandSpec::new(&self.settings.tools.ipa)
                .args(["user-mod", user, "--password"])
                .stdin_secret(staged),
        )?;

        Logger::event(Event::PasswordUpdated, &[("user", user)]);
        Ok(path)
    }

    /// Set the default login shell for new directory users
    pub fn set_default_shell(&self, shell: &str) -> BootstrapResult<Outcome> {
        let spec = CommandSpec::new(&self.settings.tools.ipa)
            .arg("config-mod")
            .arg(format!("--defaultshell={}", shell));

        match execute(self.runner, &spec) {
            Ok(_) => Ok(Outcome::Created),
            Err(e) if e.stderr().contains("no modifications to be performed") => {
                Ok(Outcome::AlreadyPresent)
            }
            Err(source) => Err(BootstrapError::DirectoryCommandFailed {
                operation: "config-mod".to_string(),
                source,
            }),
        }
    }

    fn exists(&self, kind: ObjectKind, name: &str) -> BootstrapResult<bool> {
        match self.presence(kind, name) {
            Presence::Exists => Ok(true),
            Presence::Absent => Ok(false),
            Presence::QueryFailed(reason) => Err(BootstrapError::DirectoryQueryFailed {
                kind: kind.as_str(),
                name: name.to_string(),
                reason,
            }),
        }
    }

    fn mutate(&self, operation: &str, spec: CommandSpec) -> BootstrapResult<CommandOutput> {
        execute(self.runner, &spec).map_err(|source: ExecutionError| {
            BootstrapError::DirectoryCommandFailed {
                operation: operation.to_string(),
                source,
            }
        })
    }
}

fn describe_failure(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    match (output.status, stderr.is_empty()) {
        (Some(code), true) => format!("exit status {}", code),
        (Some(code), false) => format!("exit status {}: {}", code, stderr),
        (None, _) => "terminated by signal".to_string(),
    }
}

fn created(kind: ObjectKind, name: &str) {
    Logger::event(Event::ObjectCreated, &[("kind", kind.as_str()), ("name", name)]);
}

fn skipped(kind: ObjectKind, name: &str) -> Outcome {
    Logger::event(Event::ObjectSkipped, &[("kind", kind.as_str()), ("name", name)]);
    Outcome::AlreadyPresent
}

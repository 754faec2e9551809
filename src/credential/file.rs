//! # Credential File
//!
//! On-disk form of a one-time secret at a well-known path.
//! The file is always owner read/write only.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use super::secret::Secret;
use crate::errors::{BootstrapError, BootstrapResult};

/// Mode for every file that holds secret material
pub const OWNER_ONLY_MODE: u32 = 0o600;

/// Handle on the credential file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Present and non-empty. An in-flight copy may exist with no content yet.
    pub fn is_ready(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Write the secret, replacing any previous content
    pub fn write(&self, secret: &Secret) -> BootstrapResult<()> {
        write_owner_only(&self.path, secret.expose().as_bytes())
            .map_err(|e| BootstrapError::io(&self.path, e))
    }

    /// Read the secret back. A trailing newline (added by editors or
    /// `echo`) is not part of the secret.
    pub fn read(&self) -> BootstrapResult<Secret> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Secret::new(content.trim_end_matches(['\r', '\n']))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BootstrapError::CredentialMissing {
                    path: self.path.clone(),
                })
            }
            Err(e) => Err(BootstrapError::io(&self.path, e)),
        }
    }

    /// Delete the file
    pub fn remove(&self) -> BootstrapResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BootstrapError::CredentialMissing {
                    path: self.path.clone(),
                })
            }
            Err(e) => Err(BootstrapError::io(&self.path, e)),
        }
    }
}

/// Create or truncate `path` with mode 0600 and write `contents` durably.
///
/// The mode is re-applied because `mode()` only takes effect on creation.
pub(crate) fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(OWNER_ONLY_MODE)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(OWNER_ONLY_MODE))?;
    file.write_all(contents)?;
    file.sync_all()
}

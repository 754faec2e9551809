//! # Credential Store
//!
//! The robot-admin secret and the owner-only file that carries it between
//! the controller and target hosts.

mod file;
mod secret;

pub use file::{CredentialFile, OWNER_ONLY_MODE};
pub(crate) use file::write_owner_only;
pub use secret::{generate_secret, Secret, DEFAULT_ALPHABET, DEFAULT_SECRET_LENGTH};

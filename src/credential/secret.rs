//! # Secret Values
//!
//! One-time credential material and its generation.
//!
//! ## Invariants
//! - Secrets never appear in `Debug` output or logs; a fingerprint does
//! - Generation always draws from the OS CSPRNG

use std::fmt;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::{BootstrapError, BootstrapResult};

/// Alphabet used for robot-admin passwords
pub const DEFAULT_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated robot-admin passwords
pub const DEFAULT_SECRET_LENGTH: usize = 16;

/// Number of hex characters in a fingerprint
const FINGERPRINT_LEN: usize = 12;

/// A credential secret
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw secret. Only command stdin and credential files
    /// should ever see this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short SHA-256 prefix, safe to log for correlating copies of one secret
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.0.as_bytes())
            .iter()
            .take(FINGERPRINT_LEN / 2)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Constant-time comparison
    pub fn matches(&self, other: &Secret) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret::new)
    }
}

/// Generate a random secret of `length` characters drawn from `alphabet`
pub fn generate_secret(length: usize, alphabet: &str) -> BootstrapResult<Secret> {
    let symbols: Vec<char> = alphabet.chars().collect();
    if symbols.is_empty() {
        return Err(BootstrapError::Config(
            "secret alphabet must not be empty".to_string(),
        ));
    }
    if length == 0 {
        return Err(BootstrapError::Config(
            "secret length must be > 0".to_string(),
        ));
    }

    let mut rng = OsRng;
    let value = (0..length)
        .map(|_| symbols[rng.gen_range(0..symbols.len())])
        .collect::<String>();

    Ok(Secret(value))
}

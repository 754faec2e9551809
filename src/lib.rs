//! ipa-bootstrap - one-time robot-admin credential handoff for FreeIPA
//!
//! The controller generates a short-lived secret and copies it to every new
//! host; each host redeems it exactly once to enroll, and bootstrap code
//! uses it for a scoped directory session.

pub mod accounts;
pub mod cli;
pub mod config;
pub mod credential;
pub mod directory;
pub mod distribute;
pub mod errors;
pub mod exec;
pub mod inventory;
pub mod ledger;
pub mod observability;
pub mod redeem;

pub use errors::{BootstrapError, BootstrapResult};

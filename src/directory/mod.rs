//! Authenticated directory session and the idempotent bootstrap operations
//! run under it.

mod objects;
mod plan;
mod session;

pub use objects::{
    GroupSpec, KeytabRequest, ObjectKind, Outcome, Presence, UserSpec, DEFAULT_LAST_NAME,
};
pub use plan::{DirectoryPlan, PlanReport, PlanStep};
pub use session::{with_session, DirectorySession, SessionSettings};

//! Observability for the credential handoff
//!
//! Provides:
//! - Structured logging (JSON lines)
//! - Typed lifecycle events
//! - Begin/complete scopes around multi-step operations
//!
//! # Usage
//!
//! ```ignore
//! use ipa_bootstrap::observability::{Event, Logger, OperationScope};
//!
//! Logger::event(Event::CopyDelivered, &[("host", "node1.example.com")]);
//!
//! let scope = OperationScope::new("DISTRIBUTE");
//! // ... do work ...
//! scope.complete(&[("delivered", "3")]);
//! ```

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::OperationScope;

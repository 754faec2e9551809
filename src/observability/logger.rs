//! Structured JSON logger
//!
//! - One log line = one event
//! - `event` first, then `severity`, then fields sorted by key
//! - Synchronous, no buffering
//! - INFO and WARN go to stdout, ERROR to stderr
//!
//! Callers must never pass secret values as fields; log
//! [`Secret::fingerprint`](crate::credential::Secret::fingerprint) instead.

use std::fmt;
use std::io::{self, Write};

use super::events::Event;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Normal operations
    Info = 0,
    /// Recoverable issues
    Warn = 1,
    /// Operation failures
    Error = 2,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    fn uses_stderr(&self) -> bool {
        *self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Logger writing one JSON object per line
pub struct Logger;

impl Logger {
    /// Log an event name with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = render(severity, event, fields);
        if severity.uses_stderr() {
            write_line(&mut io::stderr(), &line);
        } else {
            write_line(&mut io::stdout(), &line);
        }
    }

    /// Log a typed lifecycle event at its default severity
    pub fn event(event: Event, fields: &[(&str, &str)]) {
        Self::log(event.severity(), event.as_str(), fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }
}

/// Render a log line without the trailing newline
pub(crate) fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(128);

    output.push_str("{\"event\":");
    output.push_str(&quote(event));
    output.push_str(",\"severity\":");
    output.push_str(&quote(severity.as_str()));

    let mut sorted: Vec<_> = fields.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);

    for (key, value) in sorted {
        output.push(',');
        output.push_str(&quote(key));
        output.push(':');
        output.push_str(&quote(value));
    }

    output.push('}');
    output
}

fn quote(s: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn write_line<W: Write>(writer: &mut W, line: &str) {
    // One write per line keeps concurrent output readable; logging failures
    // never fail the operation being logged.
    let _ = writer.write_all(format!("{}\n", line).as_bytes());
    let _ = writer.flush();
}

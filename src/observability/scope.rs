//! Scope logging for multi-step operations
//!
//! - `{NAME}_BEGIN` on creation
//! - `{NAME}_COMPLETE` with `duration_ms` on [`OperationScope::complete`]
//! - `{NAME}_FAILED` on [`OperationScope::fail`]
//! - `{NAME}_INCOMPLETE` if dropped without either (early `?` return)

use std::time::Instant;

use super::logger::Logger;

/// Logs the start and end of a distribution, redemption or plan run
pub struct OperationScope {
    name: &'static str,
    fields: Vec<(&'static str, String)>,
    started: Instant,
    finished: bool,
}

impl OperationScope {
    pub fn new(name: &'static str) -> Self {
        Self::with_fields(name, &[])
    }

    pub fn with_fields(name: &'static str, fields: &[(&'static str, &str)]) -> Self {
        let scope = Self {
            name,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
            finished: false,
        };
        Logger::info(&format!("{}_BEGIN", name), &scope.field_refs());
        scope
    }

    /// Log `{NAME}_COMPLETE` with any extra result fields
    pub fn complete(mut self, extra: &[(&str, &str)]) {
        self.finished = true;
        let duration = self.elapsed_ms();
        let mut fields = self.field_refs();
        fields.push(("duration_ms", duration.as_str()));
        fields.extend(extra.iter().copied());
        Logger::info(&format!("{}_COMPLETE", self.name), &fields);
    }

    /// Log `{NAME}_FAILED` at ERROR level
    pub fn fail(mut self, reason: &str) {
        self.finished = true;
        let mut fields = self.field_refs();
        fields.push(("reason", reason));
        Logger::error(&format!("{}_FAILED", self.name), &fields);
    }

    pub fn elapsed_ms(&self) -> String {
        self.started.elapsed().as_millis().to_string()
    }

    fn field_refs(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        if !self.finished {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

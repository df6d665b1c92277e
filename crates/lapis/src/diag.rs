//! Diagnostics: locations, severities, sinks, and the checker error kinds.
//!
//! The IR layer never formats or prints diagnostics itself; it hands
//! `(location, severity, message)` tuples to a [`DiagSink`] owned by the
//! surrounding compiler. Tests use [`CollectSink`] to capture them.

use std::fmt;
use std::sync::Mutex;

use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// A source position attached to IR nodes.
///
/// Only the beginning of the originating source range is kept; that is all
/// downstream consumers (tracebacks, checker messages) need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DebugLocation {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

impl DebugLocation {
    /// The invalid location used for synthesised expressions.
    pub const INVALID: Self = Self { file_id: 0, line: 0, column: 0 };

    #[must_use]
    pub fn new(file_id: u32, line: u32, column: u32) -> Self {
        Self { file_id, line, column }
    }

    /// Whether this location points at real source code.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for DebugLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.line, self.column)
    }
}

/// Diagnostic severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// One reported issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: DebugLocation,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn error(location: DebugLocation, message: impl Into<String>) -> Self {
        Self { location, severity: Severity::Error, message: message.into() }
    }

    #[must_use]
    pub fn warning(location: DebugLocation, message: impl Into<String>) -> Self {
        Self { location, severity: Severity::Warning, message: message.into() }
    }

    #[must_use]
    pub fn note(location: DebugLocation, message: impl Into<String>) -> Self {
        Self { location, severity: Severity::Note, message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_valid() {
            write!(f, "{}: {} at {}", self.severity, self.message, self.location)
        } else {
            write!(f, "{}: {}", self.severity, self.message)
        }
    }
}

/// Receiver for diagnostics produced by the checkers.
///
/// Implementations must tolerate reports from multiple threads; the
/// well-formedness checker runs in parallel across definitions.
pub trait DiagSink: Sync {
    fn report(&self, diag: Diagnostic);
}

/// Sink that stores every diagnostic for later inspection. Used by tests and
/// by the pipeline to decide whether a phase failed.
#[derive(Debug, Default)]
pub struct CollectSink {
    diags: Mutex<Vec<Diagnostic>>,
}

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns everything reported so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diags.lock().expect("diag sink poisoned"))
    }

    pub fn error_count(&self) -> usize {
        self.diags
            .lock()
            .expect("diag sink poisoned")
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.diags.lock().expect("diag sink poisoned").is_empty()
    }
}

impl DiagSink for CollectSink {
    fn report(&self, diag: Diagnostic) {
        self.diags.lock().expect("diag sink poisoned").push(diag);
    }
}

/// Errors surfaced by the checking stages.
///
/// Transformations never produce errors; they either rewrite the graph or
/// leave it untouched. Analyses that cannot run return [`CheckError::AnalysisAborted`]
/// and their consumers treat the affected nodes as unknown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    /// A structural, type, or reference-depth violation found by the
    /// well-formedness checker. Always aborts the pipeline.
    #[error("ir invariant violated: {0}")]
    IrInvariant(String),
    /// A load of a possibly uninitialised variable or member.
    #[error("use before initialization: {0}")]
    UseBeforeInit(String),
    /// A second assignment to an already initialised `let` binding.
    #[error("cannot reassign initialized let binding: {0}")]
    IllegalReassignToLet(String),
    /// A member function call on `this` while members may be uninitialised.
    #[error("illegal member function call in constructor: {0}")]
    IllegalMemberFunCallInCtor(String),
    /// An analysis exceeded its per-function block cap. No user-visible
    /// diagnostic is produced for this.
    #[error("analysis aborted: function exceeds block cap")]
    AnalysisAborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_sink_counts_errors() {
        let sink = CollectSink::new();
        sink.report(Diagnostic::error(DebugLocation::new(1, 3, 7), "bad block"));
        sink.report(Diagnostic::warning(DebugLocation::INVALID, "no exit"));
        assert_eq!(sink.error_count(), 1);
        let diags = sink.take();
        assert_eq!(diags.len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_diagnostic_display_includes_location() {
        let d = Diagnostic::error(DebugLocation::new(0, 12, 4), "oops");
        assert_eq!(d.to_string(), "error: oops at [12,4]");
    }

    #[test]
    fn test_invalid_location_display() {
        let d = Diagnostic::note(DebugLocation::INVALID, "fyi");
        assert_eq!(d.to_string(), "note: fyi");
    }
}

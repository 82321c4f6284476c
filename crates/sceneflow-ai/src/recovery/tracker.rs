//! Per-session error tracking and the partial-success report

use parking_lot::Mutex;
use serde::Serialize;

use crate::recovery::classify::ToolError;

/// Derived snapshot of a session's outcomes. Recomputed on demand from the
/// tracker's running counters, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PartialSuccessReport {
    pub total_attempted: usize,
    pub succeeded: usize,
    pub fallback_applied: usize,
    pub failed: usize,
    pub errors: Vec<ToolError>,
    pub summary: String,
    pub is_usable: bool,
}

#[derive(Debug, Default)]
struct TrackerInner {
    total_attempted: usize,
    succeeded: usize,
    fallback_applied: usize,
    errors: Vec<ToolError>,
}

/// Sole writer of a session's error/success counters.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    inner: Mutex<TrackerInner>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_attempted += 1;
        inner.succeeded += 1;
    }

    pub fn record_error(&self, error: ToolError, fallback_applied: bool) {
        let mut inner = self.inner.lock();
        inner.total_attempted += 1;
        if fallback_applied {
            inner.fallback_applied += 1;
        }
        inner.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.inner.lock().errors.is_empty()
    }

    /// Any tracked error the session cannot continue past.
    pub fn has_fatal_errors(&self) -> bool {
        self.inner.lock().errors.iter().any(|e| !e.recoverable)
    }

    pub fn generate_report(&self) -> PartialSuccessReport {
        let inner = self.inner.lock();

        let failed = inner
            .errors
            .iter()
            .filter(|e| e.fallback_applied.is_none() && !e.recoverable)
            .count();
        let has_fatal = inner.errors.iter().any(|e| !e.recoverable);
        let is_usable = !has_fatal && inner.succeeded > 0;

        let summary = if inner.errors.is_empty() {
            format!("All {} steps completed successfully.", inner.succeeded)
        } else if is_usable {
            format!(
                "Production finished with partial success: {} succeeded, {} recovered via fallback, {} failed.",
                inner.succeeded, inner.fallback_applied, failed
            )
        } else {
            format!(
                "Production is not usable: {} succeeded, {} failed, first error from '{}'.",
                inner.succeeded,
                failed,
                inner.errors.first().map(|e| e.tool.as_str()).unwrap_or("unknown")
            )
        };

        PartialSuccessReport {
            total_attempted: inner.total_attempted,
            succeeded: inner.succeeded,
            fallback_applied: inner.fallback_applied,
            failed,
            errors: inner.errors.clone(),
            summary,
            is_usable,
        }
    }
}

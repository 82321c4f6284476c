//! Failure classification
//!
//! Maps a raw failure into transient / recoverable / fatal. Total and pure:
//! every message classifies, unknown ones default to recoverable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure category driving the recovery decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Worth retrying: timeouts, rate limits, upstream hiccups.
    Transient,
    /// Not worth retrying, but a fallback may substitute a usable result.
    Recoverable,
    /// Abort the call immediately: credentials, configuration, dead session.
    Fatal,
}

const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "429",
    "500",
    "503",
    "504",
    "rate limit",
    "quota exceeded",
];

const FATAL_SIGNATURES: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "not configured",
    "invalid session",
];

/// Classify a raw failure message.
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();

    if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return ErrorCategory::Transient;
    }
    if FATAL_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return ErrorCategory::Fatal;
    }
    ErrorCategory::Recoverable
}

/// Terminal failure of one tool call.
///
/// Created once when a call gives up; immutable afterwards except for
/// `fallback_applied`, stamped at most once by a successful fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub tool: String,
    pub scene_index: Option<usize>,
    pub message: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    /// Whether the session can continue past this failure.
    pub recoverable: bool,
    pub fallback_applied: Option<String>,
}

impl ToolError {
    pub fn new(
        tool: impl Into<String>,
        scene_index: Option<usize>,
        message: impl Into<String>,
        category: ErrorCategory,
        retry_count: u32,
        recoverable: bool,
    ) -> Self {
        Self {
            tool: tool.into(),
            scene_index,
            message: message.into(),
            category,
            timestamp: Utc::now(),
            retry_count,
            recoverable,
            fallback_applied: None,
        }
    }

    /// Stamp the fallback that substituted for this failure. First write wins.
    pub fn mark_fallback(&mut self, action: &str) {
        if self.fallback_applied.is_none() {
            self.fallback_applied = Some(action.to_string());
        }
    }
}

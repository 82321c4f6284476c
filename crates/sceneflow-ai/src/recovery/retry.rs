//! Retry execution under a recovery policy
//!
//! Runs one tool call with exponential backoff for transient failures.
//! Failure is always a value: the executor returns `ExecutionResult`,
//! never an `Err`.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::recovery::classify::{ErrorCategory, ToolError, classify};
use crate::recovery::policy::RecoveryPolicy;

/// Outcome of one policied tool call.
#[derive(Debug)]
pub struct ExecutionResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ToolError>,
    pub fallback_applied: bool,
    pub retry_count: u32,
}

impl<T> ExecutionResult<T> {
    pub fn ok(data: T, retry_count: u32) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            fallback_applied: false,
            retry_count,
        }
    }

    pub fn failed(error: ToolError, retry_count: u32) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            fallback_applied: false,
            retry_count,
        }
    }
}

/// Runs tool calls under a `RecoveryPolicy`.
///
/// Only transient failures are retried; recoverable failures go straight to
/// the fallback machinery and fatal ones stop on the spot. The backoff sleep
/// is a cancellation point so a stopping session does not run out its full
/// backoff schedule.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Execute `call` with up to `policy.max_retries` retries.
    ///
    /// `on_retry(attempt, error, delay)` is invoked before each backoff
    /// sleep, with the 1-based ordinal of the upcoming retry.
    pub async fn execute<T, F, Fut, R, RFut>(
        &self,
        tool: &str,
        scene_index: Option<usize>,
        policy: &RecoveryPolicy,
        mut call: F,
        mut on_retry: R,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(u32, String, Duration) -> RFut,
        RFut: Future<Output = ()>,
    {
        let mut retry_count: u32 = 0;

        loop {
            match call().await {
                Ok(data) => return ExecutionResult::ok(data, retry_count),
                Err(err) => {
                    let message = err.to_string();
                    let category = classify(&message);

                    let can_retry = category == ErrorCategory::Transient
                        && retry_count < policy.max_retries
                        && !self.cancel.is_cancelled();

                    if can_retry {
                        let delay = policy.delay_for(retry_count);
                        on_retry(retry_count + 1, message.clone(), delay).await;

                        let cancelled = tokio::select! {
                            _ = sleep(delay) => false,
                            _ = self.cancel.cancelled() => true,
                        };
                        if !cancelled {
                            retry_count += 1;
                            continue;
                        }
                        tracing::warn!(tool = %tool, "backoff interrupted by cancellation");
                    }

                    let recoverable =
                        category != ErrorCategory::Fatal && policy.continue_on_failure;
                    let error = ToolError::new(
                        tool,
                        scene_index,
                        message,
                        category,
                        retry_count,
                        recoverable,
                    );
                    return ExecutionResult::failed(error, retry_count);
                }
            }
        }
    }
}

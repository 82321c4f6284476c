use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::state::PipelineState;
use crate::checkpoint::{CheckpointGate, DEFAULT_CHECKPOINT_TIMEOUT};
use crate::recovery::{FallbackRegistry, PartialSuccessReport, RecoveryPolicies};

/// Hard cap on loop iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Iterations remaining when the near-limit warning fires.
pub const ITERATION_WARNING_MARGIN: usize = 2;

/// Configuration for one pipeline run.
///
/// Built once at startup and passed into the executor; the policy and
/// fallback tables are shared, immutable values rather than globals.
#[derive(Clone)]
pub struct PipelineConfig {
    pub goal: String,
    pub system_prompt: Option<String>,
    pub max_iterations: usize,
    /// Wrapper timeout for each tool invocation.
    pub tool_timeout: Duration,
    /// Max length for tool results folded into the conversation.
    pub max_tool_result_length: usize,
    /// Resume against an existing production session.
    pub session_id: Option<String>,
    pub policies: Arc<RecoveryPolicies>,
    pub fallbacks: Arc<FallbackRegistry>,
    /// Optional human-in-the-loop gate consulted at phase boundaries.
    pub checkpoint_gate: Option<Arc<CheckpointGate>>,
    pub checkpoint_timeout: Duration,
    pub cancellation: CancellationToken,
}

impl PipelineConfig {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: Duration::from_secs(120),
            max_tool_result_length: 4000,
            session_id: None,
            policies: Arc::new(RecoveryPolicies::production_defaults()),
            fallbacks: Arc::new(FallbackRegistry::production_defaults()),
            checkpoint_gate: None,
            checkpoint_timeout: DEFAULT_CHECKPOINT_TIMEOUT,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_tool_result_length(mut self, max: usize) -> Self {
        self.max_tool_result_length = max;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_policies(mut self, policies: Arc<RecoveryPolicies>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Arc<FallbackRegistry>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_checkpoint_gate(mut self, gate: Arc<CheckpointGate>) -> Self {
        self.checkpoint_gate = Some(gate);
        self
    }

    pub fn with_checkpoint_timeout(mut self, timeout: Duration) -> Self {
        self.checkpoint_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineRunResult {
    pub success: bool,
    pub answer: Option<String>,
    /// User-facing summary; names the iteration limit when it was hit.
    pub summary: String,
    pub report: PartialSuccessReport,
    pub iterations: usize,
    pub session_id: Option<String>,
    pub state: PipelineState,
}

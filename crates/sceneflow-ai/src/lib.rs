//! SceneFlow AI - orchestration core for the production pipeline
//!
//! This crate provides:
//! - The tool-execution loop driving a model-directed production pipeline
//! - Error recovery machinery (classifier, retry, fallback, tracker)
//! - Dependency-ordered tool groups with duplicate-call suppression
//! - A human-in-the-loop checkpoint gate with timeout auto-resolution
//! - The LLM client boundary with a scripted mock for tests

pub mod agent;
pub mod checkpoint;
pub mod error;
pub mod llm;
pub mod recovery;
pub mod tools;

// Re-export commonly used types
pub use agent::{
    ChannelSink, NullSink, PipelineConfig, PipelineExecutor, PipelineRunResult, PipelineState,
    PipelineStatus, ProgressEvent, ProgressSink, ProgressStage,
};
pub use checkpoint::{
    Checkpoint, CheckpointGate, CheckpointOutcome, CheckpointPatch, CheckpointStatus,
};
pub use error::{AiError, Result};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, MockLlmClient,
    MockStep, Role, ToolCall,
};
pub use recovery::{
    ErrorCategory, ErrorTracker, ExecutionResult, FallbackContext, FallbackRegistry,
    PartialSuccessReport, RecoveryPolicies, RecoveryPolicy, RetryExecutor, ToolError, classify,
};
pub use tools::{
    OrderValidation, ResultCache, StepIdentifier, Tool, ToolGroup, ToolRegistry, ToolResponse,
    ToolSchema,
};

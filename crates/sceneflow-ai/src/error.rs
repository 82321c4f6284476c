//! Error types for the orchestration core

use thiserror::Error;

/// Orchestration core error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, AiError>;

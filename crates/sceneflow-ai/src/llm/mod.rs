//! LLM client boundary
//!
//! The model is an external collaborator: this module carries only the
//! conversation types and the client trait the orchestration loop consumes,
//! plus a scripted mock used by the test suites.

mod client;
mod mock_client;

pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, ToolCall,
};
pub use mock_client::{MockLlmClient, MockStep};

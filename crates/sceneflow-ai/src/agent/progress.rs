//! Progress events emitted at pipeline phase boundaries
//!
//! The progress boundary is a sink, not a control input: emission failures
//! are ignored and never affect the run.

use async_trait::async_trait;
use sceneflow_models::AssetSummary;
use serde::Serialize;
use tokio::sync::mpsc;

/// Stage labels for progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    SessionCreated,
    ToolStarted,
    ToolResult,
    Retry,
    Fallback,
    Warning,
    Complete,
    LimitReached,
    Error,
}

impl ProgressStage {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            ProgressStage::Complete | ProgressStage::LimitReached | ProgressStage::Error
        )
    }
}

/// One structured progress event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_summary: Option<AssetSummary>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            is_complete: stage.is_terminal(),
            tool: None,
            session_id: None,
            asset_summary: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_assets(mut self, assets: AssetSummary) -> Self {
        self.asset_summary = Some(assets);
        self
    }
}

/// Sink receiving progress events.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Sink that drops every event.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

/// Sink forwarding events over an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event).await;
    }
}

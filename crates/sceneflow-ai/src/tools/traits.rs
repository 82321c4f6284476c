//! Tool trait and result interpretation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Dependency-ordered production phase a tool belongs to.
///
/// The declaration order is the execution order: no tool may run until all
/// groups strictly before its own are complete for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolGroup {
    Import,
    Content,
    Media,
    Enhancement,
    Export,
}

impl ToolGroup {
    pub const ALL: [ToolGroup; 5] = [
        ToolGroup::Import,
        ToolGroup::Content,
        ToolGroup::Media,
        ToolGroup::Enhancement,
        ToolGroup::Export,
    ];

    /// Groups strictly before this one, in order.
    pub fn preceding(self) -> impl Iterator<Item = ToolGroup> {
        Self::ALL.into_iter().filter(move |g| *g < self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolGroup::Import => "import",
            ToolGroup::Content => "content",
            ToolGroup::Media => "media",
            ToolGroup::Enhancement => "enhancement",
            ToolGroup::Export => "export",
        }
    }
}

impl std::fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON Schema for tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Interpretation of a serialized tool result.
///
/// A result that parses as a JSON object carrying a boolean `success` flag
/// is structured; everything else is opaque and counts as success.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse {
    Structured {
        success: bool,
        message: Option<String>,
        data: Value,
    },
    Opaque(String),
}

impl ToolResponse {
    pub fn parse(raw: &str) -> Self {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
            if let Some(success) = map.get("success").and_then(Value::as_bool) {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Self::Structured {
                    success,
                    message,
                    data: Value::Object(map),
                };
            }
        }
        Self::Opaque(raw.to_string())
    }

    pub fn is_success(&self) -> bool {
        match self {
            Self::Structured { success, .. } => *success,
            Self::Opaque(_) => true,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Structured { message, .. } => message.as_deref(),
            Self::Opaque(_) => None,
        }
    }

    /// Structured payload, or the raw text wrapped as a JSON string.
    pub fn payload(&self) -> Value {
        match self {
            Self::Structured { data, .. } => data.clone(),
            Self::Opaque(raw) => Value::String(raw.clone()),
        }
    }
}

/// Core trait for production tools.
///
/// Argument validation is the tool's own responsibility; the orchestration
/// layer treats `args` as an opaque JSON payload.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (used in model tool calls)
    fn name(&self) -> &str;

    /// Human-readable description for model context
    fn description(&self) -> &str;

    /// JSON Schema for input parameters
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
        })
    }

    /// Production phase this tool belongs to
    fn group(&self) -> ToolGroup;

    /// Explicit named dependencies beyond the group ordering
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool, returning a serialized result
    async fn invoke(&self, args: Value) -> Result<String>;

    /// Build complete schema for the model
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

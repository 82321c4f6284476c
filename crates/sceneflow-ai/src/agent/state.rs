//! Pipeline run state

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;
use crate::tools::{StepIdentifier, ToolGroup};

/// Pipeline execution status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Running,
    Completed,
    LimitReached,
    Failed { error: String },
}

/// Complete state of one pipeline run.
///
/// The run exclusively owns the conversation and the executed-step sets;
/// everything here is serializable for optional external snapshotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Run ID
    pub run_id: String,

    /// Production session this run works on, once known
    pub session_id: Option<String>,

    /// Current status
    pub status: PipelineStatus,

    /// Conversation history sent to the model each iteration
    pub messages: Vec<Message>,

    /// Current iteration number
    pub iteration: usize,

    /// Maximum iterations allowed
    pub max_iterations: usize,

    /// Fingerprints of steps that already completed (success or fallback)
    pub executed_steps: HashSet<StepIdentifier>,

    /// Names of tools that have completed at least once
    pub executed_tools: HashSet<String>,

    /// Groups with at least one usable result this session
    pub completed_groups: HashSet<ToolGroup>,

    /// Groups already cleared through the checkpoint gate
    pub gated_groups: HashSet<ToolGroup>,

    /// Final answer (if completed)
    pub final_answer: Option<String>,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(run_id: String, max_iterations: usize) -> Self {
        Self {
            run_id,
            session_id: None,
            status: PipelineStatus::Running,
            messages: vec![],
            iteration: 0,
            max_iterations,
            executed_steps: HashSet::new(),
            executed_tools: HashSet::new(),
            completed_groups: HashSet::new(),
            gated_groups: HashSet::new(),
            final_answer: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Record a completed step: dedup fingerprint, tool name, and its group.
    pub fn mark_step_executed(&mut self, step: StepIdentifier, tool: &str, group: ToolGroup) {
        self.executed_steps.insert(step);
        self.executed_tools.insert(tool.to_string());
        self.completed_groups.insert(group);
    }

    /// Complete with final answer
    pub fn complete(&mut self, answer: impl Into<String>) {
        self.final_answer = Some(answer.into());
        self.status = PipelineStatus::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Mark as failed
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = PipelineStatus::Failed {
            error: error.into(),
        };
        self.ended_at = Some(Utc::now());
    }

    /// Check if terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, PipelineStatus::Running)
    }

    /// Increment iteration, returns false once the cap is hit
    pub fn increment_iteration(&mut self) -> bool {
        self.iteration += 1;
        if self.iteration >= self.max_iterations {
            self.status = PipelineStatus::LimitReached;
            self.ended_at = Some(Utc::now());
            false
        } else {
            true
        }
    }
}

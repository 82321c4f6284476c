//! Tool registry with dependency-ordered groups

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{AiError, Result};
use crate::tools::traits::{Tool, ToolGroup, ToolSchema};

/// Outcome of validating a historical execution sequence.
#[derive(Debug, Clone)]
pub struct OrderValidation {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

/// Registry of production tools, grouped into ordered phases.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Errors if the name is already taken.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a tool from Arc. Errors if the name is already taken.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AiError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if tool exists
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get schemas for all registered tools
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Tools registered under a group
    pub fn tools_in_group(&self, group: ToolGroup) -> Vec<Arc<dyn Tool>> {
        self.tools
            .values()
            .filter(|t| t.group() == group)
            .cloned()
            .collect()
    }

    /// Whether any tool is registered under a group
    pub fn has_group(&self, group: ToolGroup) -> bool {
        self.tools.values().any(|t| t.group() == group)
    }

    /// Whether a tool may execute given the groups already completed.
    ///
    /// Every group strictly before the tool's own must be complete. The
    /// import group is exempt when the registry holds no import tool.
    /// Explicit named dependencies require their group to be complete too,
    /// unless the dependency shares the tool's own group.
    pub fn can_execute(&self, name: &str, completed_groups: &HashSet<ToolGroup>) -> bool {
        let Some(tool) = self.get(name) else {
            return false;
        };
        let own_group = tool.group();

        for group in own_group.preceding() {
            if group == ToolGroup::Import && !self.has_group(ToolGroup::Import) {
                continue;
            }
            if !completed_groups.contains(&group) {
                return false;
            }
        }

        for dep in tool.dependencies() {
            let Some(dep_tool) = self.get(&dep) else {
                return false;
            };
            let dep_group = dep_tool.group();
            if dep_group != own_group && !completed_groups.contains(&dep_group) {
                return false;
            }
        }

        true
    }

    /// Validate a historical execution sequence against the group order.
    ///
    /// Flags backward transitions: a tool whose group comes before a group
    /// already observed earlier in the sequence.
    pub fn validate_execution_order(&self, sequence: &[&str]) -> OrderValidation {
        let mut violations = Vec::new();
        let mut latest_group: Option<ToolGroup> = None;

        for name in sequence {
            let Some(tool) = self.get(name) else {
                violations.push(format!("unknown tool '{name}' in sequence"));
                continue;
            };
            let group = tool.group();

            if let Some(latest) = latest_group {
                if group < latest {
                    violations.push(format!(
                        "'{name}' ({group}) executed after {latest} work had already started"
                    ));
                }
            }
            latest_group = Some(latest_group.map_or(group, |latest| latest.max(group)));
        }

        OrderValidation {
            is_valid: violations.is_empty(),
            violations,
        }
    }
}

//! Per-tool recovery policies
//!
//! Built once at startup and passed by reference into the executor. The
//! table is total: unregistered tool names get the default policy.

use std::collections::HashMap;
use std::time::Duration;

/// Recovery configuration for one tool name.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub fallback_action: Option<String>,
    pub continue_on_failure: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(1_000),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(30_000),
            fallback_action: None,
            continue_on_failure: true,
        }
    }
}

impl RecoveryPolicy {
    /// Backoff delay before the given retry (0-based), clamped to `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_factor.powi(retry as i32);
        let millis = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as u64))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_fallback(mut self, action: impl Into<String>) -> Self {
        self.fallback_action = Some(action.into());
        self
    }

    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }
}

/// Immutable policy table keyed by tool name.
#[derive(Debug, Clone, Default)]
pub struct RecoveryPolicies {
    policies: HashMap<String, RecoveryPolicy>,
    default: RecoveryPolicy,
}

impl RecoveryPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policies for the production tool family.
    pub fn production_defaults() -> Self {
        Self::new()
            .with_policy(
                "create_session",
                RecoveryPolicy::default().with_continue_on_failure(false),
            )
            .with_policy(
                "write_narration",
                RecoveryPolicy::default().with_max_retries(1),
            )
            .with_policy(
                "write_lyrics",
                RecoveryPolicy::default()
                    .with_max_retries(1)
                    .with_fallback("skip_optional_asset"),
            )
            .with_policy(
                "generate_image",
                RecoveryPolicy::default().with_fallback("use_placeholder_image"),
            )
            .with_policy(
                "generate_scene_video",
                RecoveryPolicy::default().with_fallback("use_placeholder_image"),
            )
            .with_policy(
                "generate_music",
                RecoveryPolicy::default().with_fallback("skip_optional_asset"),
            )
            .with_policy(
                "enhance_image",
                RecoveryPolicy::default()
                    .with_max_retries(1)
                    .with_fallback("keep_previous_image"),
            )
            .with_policy(
                "export_video",
                RecoveryPolicy::default()
                    .with_max_retries(1)
                    .with_fallback("manual_assembly_bundle"),
            )
    }

    pub fn with_policy(mut self, tool: impl Into<String>, policy: RecoveryPolicy) -> Self {
        self.policies.insert(tool.into(), policy);
        self
    }

    pub fn with_default(mut self, policy: RecoveryPolicy) -> Self {
        self.default = policy;
        self
    }

    /// Resolve the policy for a tool. Total: unknown names get the default.
    pub fn get(&self, tool: &str) -> &RecoveryPolicy {
        self.policies.get(tool).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_gets_default_policy() {
        let policies = RecoveryPolicies::production_defaults();
        let policy = policies.get("some_unregistered_tool");
        assert_eq!(policy.max_retries, 2);
        assert!(policy.continue_on_failure);
        assert!(policy.fallback_action.is_none());
    }

    #[test]
    fn test_registered_tool_gets_its_policy() {
        let policies = RecoveryPolicies::production_defaults();
        let policy = policies.get("generate_image");
        assert_eq!(
            policy.fallback_action.as_deref(),
            Some("use_placeholder_image")
        );

        let planning = policies.get("create_session");
        assert!(!planning.continue_on_failure);
    }

    #[test]
    fn test_delay_progression_doubles_and_clamps() {
        let policy = RecoveryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(1_000),
            fallback_action: None,
            continue_on_failure: true,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(8), Duration::from_millis(1_000));
    }

    #[test]
    fn test_custom_default_applies_to_unknown_tools() {
        let policies = RecoveryPolicies::new()
            .with_default(RecoveryPolicy::default().with_max_retries(0));
        assert_eq!(policies.get("anything").max_retries, 0);
    }
}

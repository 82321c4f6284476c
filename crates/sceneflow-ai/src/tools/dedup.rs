//! Duplicate-call suppression and result caching
//!
//! A step identifier fingerprints tool name + canonicalized arguments, so
//! two calls doing the same logical work collide regardless of argument key
//! order. The result cache additionally keys on the session record version:
//! a hit means the same call against unchanged state.

use std::hash::{DefaultHasher, Hash, Hasher};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fingerprint of one logical pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepIdentifier {
    tool: String,
    args_hash: u64,
}

impl StepIdentifier {
    pub fn new(tool: &str, args: &Value) -> Self {
        let mut canonical = String::new();
        canonical_string(args, &mut canonical);

        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Self {
            tool: tool.to_string(),
            args_hash: hasher.finish(),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

/// Render a value with object keys sorted at every level, so fingerprints
/// do not depend on argument ordering.
fn canonical_string(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                canonical_string(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_string(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Cache of serialized tool results, keyed by step fingerprint and the
/// session record version observed before the call executed.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<(StepIdentifier, u64), String>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, step: StepIdentifier, session_version: u64, payload: String) {
        self.entries.insert((step, session_version), payload);
    }

    pub fn get(&self, step: &StepIdentifier, session_version: u64) -> Option<String> {
        self.entries
            .get(&(step.clone(), session_version))
            .map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_calls_share_a_fingerprint() {
        let a = StepIdentifier::new("generate_image", &json!({"scene_index": 1, "style": "noir"}));
        let b = StepIdentifier::new("generate_image", &json!({"scene_index": 1, "style": "noir"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = StepIdentifier::new("generate_image", &json!({"style": "noir", "scene_index": 1}));
        let b = StepIdentifier::new("generate_image", &json!({"scene_index": 1, "style": "noir"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_key_order_does_not_matter() {
        let a = StepIdentifier::new(
            "export_video",
            &json!({"options": {"fps": 30, "codec": "h264"}}),
        );
        let b = StepIdentifier::new(
            "export_video",
            &json!({"options": {"codec": "h264", "fps": 30}}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_tool_or_args_differ() {
        let base = StepIdentifier::new("generate_image", &json!({"scene_index": 1}));
        assert_ne!(
            base,
            StepIdentifier::new("generate_scene_video", &json!({"scene_index": 1}))
        );
        assert_ne!(
            base,
            StepIdentifier::new("generate_image", &json!({"scene_index": 2}))
        );
    }

    #[test]
    fn test_cache_hits_only_at_matching_version() {
        let cache = ResultCache::new();
        let step = StepIdentifier::new("generate_image", &json!({"scene_index": 0}));
        cache.insert(step.clone(), 3, r#"{"success":true}"#.to_string());

        assert!(cache.get(&step, 3).is_some());
        assert!(cache.get(&step, 4).is_none());

        let other = StepIdentifier::new("generate_image", &json!({"scene_index": 1}));
        assert!(cache.get(&other, 3).is_none());
    }
}

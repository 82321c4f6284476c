//! Named fallback handlers
//!
//! A fallback substitutes a degraded-but-usable payload for a failed call.
//! A missing or failing handler yields no fallback; it never escalates the
//! failure it was asked to cover.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::recovery::classify::ToolError;

/// Ambient session material available to fallback handlers.
#[derive(Debug, Clone, Default)]
pub struct FallbackContext {
    pub session_id: Option<String>,
    pub scene_index: Option<usize>,
    /// Image reference of the scene being worked on, if one already exists.
    pub previous_image: Option<String>,
    pub narration: Option<String>,
    pub music_reference: Option<String>,
}

type FallbackFn =
    Arc<dyn Fn(&ToolError, &FallbackContext) -> std::result::Result<Value, String> + Send + Sync>;

/// Registry of named fallback handlers.
#[derive(Clone, Default)]
pub struct FallbackRegistry {
    handlers: HashMap<String, FallbackFn>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fallbacks used by the production tool family.
    pub fn production_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("use_placeholder_image", |error, _ctx| {
            let scene = error.scene_index.unwrap_or(0);
            Ok(json!({
                "image_ref": format!("placeholder://scene-{scene}"),
                "placeholder": true,
                "message": format!("Substituted a placeholder image for scene {scene}"),
            }))
        });

        registry.register("keep_previous_image", |_error, ctx| {
            let image = ctx
                .previous_image
                .clone()
                .ok_or_else(|| "no previous image available".to_string())?;
            Ok(json!({
                "image_ref": image,
                "unchanged": true,
                "message": "Kept the existing image unchanged",
            }))
        });

        registry.register("skip_optional_asset", |error, _ctx| {
            Ok(json!({
                "skipped": true,
                "message": format!("Skipped optional asset from '{}'", error.tool),
            }))
        });

        registry.register("manual_assembly_bundle", |_error, ctx| {
            Ok(json!({
                "bundle": {
                    "narration": ctx.narration,
                    "music_ref": ctx.music_reference,
                },
                "manual_assembly": true,
                "message": "Export failed; returning the collected assets for manual assembly",
            }))
        });

        registry
    }

    pub fn register<F>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(&ToolError, &FallbackContext) -> std::result::Result<Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(action.into(), Arc::new(handler));
    }

    pub fn has(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Apply a named fallback. Returns the substitute payload, or `None`
    /// when the handler is missing or declines.
    pub fn apply(
        &self,
        action: &str,
        error: &ToolError,
        context: &FallbackContext,
    ) -> Option<Value> {
        let Some(handler) = self.handlers.get(action) else {
            tracing::warn!(action = %action, tool = %error.tool, "unknown fallback action");
            return None;
        };

        match handler(error, context) {
            Ok(payload) => Some(payload),
            Err(reason) => {
                tracing::warn!(
                    action = %action,
                    tool = %error.tool,
                    reason = %reason,
                    "fallback handler declined"
                );
                None
            }
        }
    }
}

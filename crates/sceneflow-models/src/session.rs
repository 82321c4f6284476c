//! Production session records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scene of the production: narration plus generated visual assets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    pub index: usize,
    pub narration: Option<String>,
    pub image_ref: Option<String>,
    pub video_ref: Option<String>,
}

/// Counts of assets currently present on a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub images: usize,
    pub videos: usize,
    pub music: usize,
    pub lyrics: usize,
}

/// Error appended to the session record when a tool call gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub tool: String,
    pub scene_index: Option<usize>,
    pub message: String,
    pub recoverable: bool,
    pub fallback_applied: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The mutable production record for one session.
///
/// Owned by a single logical session at a time; every mutation goes through
/// `touch()` so the version counter tracks observable state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionSession {
    pub session_id: String,
    pub title: Option<String>,
    pub scenes: Vec<Scene>,
    pub music_ref: Option<String>,
    pub lyrics: Option<String>,
    /// Errors accumulated while producing this session.
    pub errors: Vec<SessionError>,
    /// Version counter bumped on every mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductionSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            title: None,
            scenes: Vec::new(),
            music_ref: None,
            lyrics: None,
            errors: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get a mutable scene record, growing the scene list as needed.
    pub fn scene_mut(&mut self, index: usize) -> &mut Scene {
        if self.scenes.len() <= index {
            for i in self.scenes.len()..=index {
                self.scenes.push(Scene {
                    index: i,
                    ..Scene::default()
                });
            }
        }
        &mut self.scenes[index]
    }

    /// Bump the version and update timestamp after a mutation.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Summarize the assets currently present on this session.
    pub fn asset_summary(&self) -> AssetSummary {
        AssetSummary {
            images: self.scenes.iter().filter(|s| s.image_ref.is_some()).count(),
            videos: self.scenes.iter().filter(|s| s.video_ref.is_some()).count(),
            music: usize::from(self.music_ref.is_some()),
            lyrics: usize::from(self.lyrics.is_some()),
        }
    }
}

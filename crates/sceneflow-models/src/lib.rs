//! SceneFlow Models - shared production data model
//!
//! This crate provides:
//! - Production session records (scenes, music, lyrics, asset summary)
//! - The session store boundary with an in-memory implementation

pub mod session;
pub mod store;

pub use session::{AssetSummary, ProductionSession, Scene, SessionError};
pub use store::{InMemorySessionStore, SessionStore};

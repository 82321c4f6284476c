//! Human-in-the-loop checkpoint gate
//!
//! A checkpoint pauses a named pipeline phase until it is approved,
//! rejected, timed out, or swept by `dispose()`. Each checkpoint resolves
//! exactly once: the oneshot sender is consumed under the map entry lock by
//! whichever resolution arrives first, and the pending timer is aborted on
//! early resolution. Resolved checkpoints are retained for audit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Default deadline for unattended checkpoints.
pub const DEFAULT_CHECKPOINT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Rejected,
}

/// One checkpoint record, retained after resolution.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub phase: String,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub change_request: Option<String>,
}

/// Resolution delivered to whoever awaited the checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointOutcome {
    pub checkpoint_id: String,
    pub approved: bool,
    pub change_request: Option<String>,
}

/// Fields that may be patched on a pending checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointPatch {
    pub phase: Option<String>,
    pub change_request: Option<String>,
}

struct CheckpointEntry {
    record: Checkpoint,
    resolver: Option<oneshot::Sender<CheckpointOutcome>>,
    timer: Option<AbortHandle>,
}

struct GateInner {
    entries: DashMap<String, CheckpointEntry>,
    max_pending: usize,
}

impl GateInner {
    fn resolve(inner: &Arc<GateInner>, id: &str, approved: bool, change_request: Option<String>) {
        // Unknown ids are a no-op, never an error.
        let Some(mut entry) = inner.entries.get_mut(id) else {
            return;
        };
        if entry.record.status != CheckpointStatus::Pending {
            return;
        }

        entry.record.status = if approved {
            CheckpointStatus::Approved
        } else {
            CheckpointStatus::Rejected
        };
        if approved {
            entry.record.approved_at = Some(Utc::now());
        }
        if change_request.is_some() {
            entry.record.change_request = change_request;
        }

        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        if let Some(tx) = entry.resolver.take() {
            let _ = tx.send(CheckpointOutcome {
                checkpoint_id: entry.record.checkpoint_id.clone(),
                approved,
                change_request: entry.record.change_request.clone(),
            });
        }
    }
}

/// Gate coordinating pending checkpoints across phases and sessions.
#[derive(Clone)]
pub struct CheckpointGate {
    inner: Arc<GateInner>,
}

impl CheckpointGate {
    /// Create a gate allowing at most `max_pending` simultaneous pending
    /// checkpoints; creates beyond the cap auto-approve immediately.
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                entries: DashMap::new(),
                max_pending,
            }),
        }
    }

    /// Create a checkpoint with the default timeout and await its resolution.
    pub async fn create_checkpoint(&self, phase: &str) -> CheckpointOutcome {
        self.create_checkpoint_with_timeout(phase, DEFAULT_CHECKPOINT_TIMEOUT)
            .await
    }

    /// Create a checkpoint and await approval, rejection, timeout, or dispose.
    pub async fn create_checkpoint_with_timeout(
        &self,
        phase: &str,
        timeout: Duration,
    ) -> CheckpointOutcome {
        let checkpoint_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        if self.pending_count() >= self.inner.max_pending {
            tracing::warn!(
                phase = %phase,
                max_pending = self.inner.max_pending,
                "checkpoint cap reached, auto-approving"
            );
            let record = Checkpoint {
                checkpoint_id: checkpoint_id.clone(),
                phase: phase.to_string(),
                status: CheckpointStatus::Approved,
                created_at: now,
                approved_at: Some(now),
                change_request: None,
            };
            self.inner.entries.insert(
                checkpoint_id.clone(),
                CheckpointEntry {
                    record,
                    resolver: None,
                    timer: None,
                },
            );
            return CheckpointOutcome {
                checkpoint_id,
                approved: true,
                change_request: None,
            };
        }

        let (tx, rx) = oneshot::channel();
        self.inner.entries.insert(
            checkpoint_id.clone(),
            CheckpointEntry {
                record: Checkpoint {
                    checkpoint_id: checkpoint_id.clone(),
                    phase: phase.to_string(),
                    status: CheckpointStatus::Pending,
                    created_at: now,
                    approved_at: None,
                    change_request: None,
                },
                resolver: Some(tx),
                timer: None,
            },
        );

        // Timer holds only a weak reference so an abandoned gate is not kept
        // alive by its own deadlines.
        let weak = Arc::downgrade(&self.inner);
        let timer_id = checkpoint_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                tracing::info!(checkpoint_id = %timer_id, "checkpoint timed out, auto-approving");
                GateInner::resolve(&inner, &timer_id, true, None);
            }
        });
        if let Some(mut entry) = self.inner.entries.get_mut(&checkpoint_id) {
            entry.timer = Some(handle.abort_handle());
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Resolver dropped without sending; do not leave the caller hanging.
            Err(_) => CheckpointOutcome {
                checkpoint_id,
                approved: true,
                change_request: None,
            },
        }
    }

    pub fn approve_checkpoint(&self, checkpoint_id: &str) {
        GateInner::resolve(&self.inner, checkpoint_id, true, None);
    }

    pub fn reject_checkpoint(&self, checkpoint_id: &str, change_request: Option<String>) {
        GateInner::resolve(&self.inner, checkpoint_id, false, change_request);
    }

    /// Patch a pending checkpoint. Resolved checkpoints and unknown ids are
    /// left untouched.
    pub fn update_checkpoint(&self, checkpoint_id: &str, patch: CheckpointPatch) {
        let Some(mut entry) = self.inner.entries.get_mut(checkpoint_id) else {
            return;
        };
        if entry.record.status != CheckpointStatus::Pending {
            return;
        }
        if let Some(phase) = patch.phase {
            entry.record.phase = phase;
        }
        if let Some(change_request) = patch.change_request {
            entry.record.change_request = Some(change_request);
        }
    }

    pub fn get(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.inner
            .entries
            .get(checkpoint_id)
            .map(|entry| entry.record.clone())
    }

    pub fn has_pending_checkpoints(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.record.status == CheckpointStatus::Pending)
            .count()
    }

    /// Ids of checkpoints still awaiting resolution.
    pub fn pending_ids(&self) -> Vec<String> {
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.record.status == CheckpointStatus::Pending)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Total checkpoints ever created, resolved ones included.
    pub fn checkpoint_count(&self) -> usize {
        self.inner.entries.len()
    }

    /// Auto-approve every pending checkpoint. Used at process shutdown.
    pub fn dispose(&self) {
        for id in self.pending_ids() {
            GateInner::resolve(&self.inner, &id, true, None);
        }
    }
}

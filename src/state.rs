use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::bookmark::BookmarkItem;
use crate::models::classification::BookmarkData;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingCounts {
    pub auto: usize,
    pub review: usize,
    pub skip: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl ProcessingCounts {
    pub fn record(&mut self, status: &ItemStatus) {
        match status {
            ItemStatus::Organized { .. }
            | ItemStatus::WouldOrganize { .. }
            | ItemStatus::Vanished { .. } => self.auto += 1,
            ItemStatus::NeedsReview { .. } => self.review += 1,
            ItemStatus::Skipped => self.skip += 1,
            ItemStatus::Duplicate => self.duplicates += 1,
            ItemStatus::Failed { .. } => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.auto + self.review + self.skip + self.duplicates + self.errors
    }
}

/// Counters and the manual-review queue of the current run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingState {
    pub counts: ProcessingCounts,
    pub review: Vec<BookmarkData>,
}

impl ProcessingState {
    pub fn reset(&mut self) {
        self.counts = ProcessingCounts::default();
        self.review.clear();
    }
}

pub type SharedProcessingState = Arc<Mutex<ProcessingState>>;

pub fn lock_state(state: &Mutex<ProcessingState>) -> MutexGuard<'_, ProcessingState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What happened to a single bookmark.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ItemStatus {
    Organized { folder: String },
    WouldOrganize { folder: String },
    /// Routed to `folder` but deleted before it could be moved.
    Vanished { folder: String },
    NeedsReview { folder: String, confidence: f64 },
    Skipped,
    Duplicate,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemProgress {
    pub current: usize,
    pub total: usize,
    pub item: BookmarkItem,
    #[serde(flatten)]
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
    Completed,
    Errored,
}

impl RunPhase {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub phase: RunPhase,
    pub current_batch: usize,
    pub total_batches: usize,
    pub processed_items: usize,
    pub total_items: usize,
    pub progress: f64,
    pub eta_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub processed: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
    pub eta_ms: Option<u64>,
    pub counts: ProcessingCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    Batch {
        batch: usize,
        total_batches: usize,
        size: usize,
    },
    Item(ItemProgress),
    Stopping,
    Stopped(ControllerStatus),
    Completed(RunStats),
    Errored { message: String },
}

pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// Sends without caring whether anyone is still listening.
pub fn emit(progress: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(tx) = progress {
        let _ = tx.send(event);
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{AppError, OracleError};
use crate::models::bookmark::BookmarkItem;
use crate::models::classification::Classification;
use crate::models::settings::Settings;
use crate::services::apply_service::BookmarkMutator;
use crate::services::decision_service::{Pipeline, RunSession};
use crate::services::oracle_service::Classifier;
use crate::state::{
    emit, lock_state, ControllerStatus, ItemProgress, ItemStatus, ProgressEvent, ProgressSender,
    RunPhase, RunStats, SharedProcessingState,
};

pub const BATCH_SIZE: usize = 10;
const BATCH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunStats),
    Stopped(ControllerStatus),
}

#[derive(Default)]
struct ControllerInner {
    phase: RunPhase,
    current_batch: usize,
    total_batches: usize,
    processed_items: usize,
    total_items: usize,
    started_at: Option<Instant>,
    /// Active time of earlier legs of a stopped-then-resumed run.
    elapsed_before: Duration,
    session: RunSession,
    progress: Option<ProgressSender>,
}

impl ControllerInner {
    fn elapsed(&self) -> Duration {
        self.elapsed_before + self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn eta_ms(&self) -> Option<u64> {
        if self.processed_items == 0 {
            return None;
        }
        let remaining = self.total_items.saturating_sub(self.processed_items) as u128;
        let per_item = self.elapsed().as_millis() / self.processed_items as u128;
        Some((per_item * remaining).min(u64::MAX as u128) as u64)
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase,
            current_batch: self.current_batch,
            total_batches: self.total_batches,
            processed_items: self.processed_items,
            total_items: self.total_items,
            progress: if self.total_items > 0 {
                self.processed_items as f64 / self.total_items as f64
            } else {
                0.0
            },
            eta_ms: self.eta_ms(),
        }
    }

    fn stats(&self) -> RunStats {
        RunStats {
            processed: self.processed_items,
            batches: self.total_batches,
            elapsed_ms: self.elapsed().as_millis().min(u64::MAX as u128) as u64,
            eta_ms: self.eta_ms(),
            counts: Default::default(),
        }
    }
}

/// Drives batched classification of a bookmark list with cooperative
/// stop and resume. One run at a time.
pub struct ProcessingController {
    classifier: Arc<dyn Classifier>,
    mutator: Arc<BookmarkMutator>,
    state: SharedProcessingState,
    stop_flag: Arc<AtomicBool>,
    inner: Mutex<ControllerInner>,
    pause: Duration,
}

impl ProcessingController {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        mutator: Arc<BookmarkMutator>,
        state: SharedProcessingState,
    ) -> Self {
        Self {
            classifier,
            mutator,
            state,
            stop_flag: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(ControllerInner::default()),
            pause: BATCH_PAUSE,
        }
    }

    /// Overrides the pause between batches.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    fn inner(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> ControllerStatus {
        self.inner().status()
    }

    pub fn is_running(&self) -> bool {
        self.inner().phase.is_active()
    }

    /// Asks the current run to halt before its next batch.
    pub fn stop(&self) {
        let progress = {
            let mut inner = self.inner();
            if inner.phase != RunPhase::Running {
                return;
            }
            inner.phase = RunPhase::Stopping;
            inner.progress.clone()
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        info!("stop requested, finishing current batch");
        emit(progress.as_ref(), ProgressEvent::Stopping);
    }

    /// Starts a fresh run over `items`. Moves left pending by a stopped run
    /// are snapshotted first.
    pub async fn start(
        &self,
        items: &[BookmarkItem],
        settings: &Settings,
        progress: Option<ProgressSender>,
    ) -> Result<RunOutcome, AppError> {
        let leftover = {
            let mut inner = self.inner();
            if inner.phase.is_active() {
                return Err(AppError::AlreadyRunning);
            }
            let leftover = std::mem::take(&mut inner.session);
            *inner = ControllerInner {
                phase: RunPhase::Running,
                total_items: items.len(),
                total_batches: items.len().div_ceil(BATCH_SIZE),
                started_at: Some(Instant::now()),
                progress: progress.clone(),
                ..ControllerInner::default()
            };
            leftover
        };
        self.stop_flag.store(false, Ordering::SeqCst);

        if leftover.pending_moves() > 0 {
            let mut leftover = leftover;
            self.pipeline(settings).flush_moves(&mut leftover).await;
        }

        if let Err(e) = self.mutator.save_original_state().await {
            let message = format!("failed to save original state: {e}");
            self.finish_with_error(RunSession::default(), &message, progress.as_ref())
                .await;
            return Err(e);
        }

        lock_state(&self.state).reset();
        info!(
            "processing {} bookmarks in {} batches",
            items.len(),
            items.len().div_ceil(BATCH_SIZE)
        );
        self.run(items, settings, RunSession::default()).await
    }

    /// Continues a stopped run from its cursor. `items` must be the list
    /// the run was started with.
    pub async fn resume(
        &self,
        items: &[BookmarkItem],
        settings: &Settings,
        progress: Option<ProgressSender>,
    ) -> Result<RunOutcome, AppError> {
        let session = {
            let mut inner = self.inner();
            if inner.phase.is_active() {
                return Err(AppError::AlreadyRunning);
            }
            if inner.phase != RunPhase::Stopped {
                return Err(AppError::NothingToResume);
            }
            inner.phase = RunPhase::Running;
            inner.total_items = items.len();
            inner.total_batches = items.len().div_ceil(BATCH_SIZE);
            inner.started_at = Some(Instant::now());
            inner.progress = progress;
            std::mem::take(&mut inner.session)
        };
        self.stop_flag.store(false, Ordering::SeqCst);
        info!("resuming at item {}", self.status().processed_items);
        self.run(items, settings, session).await
    }

    fn pipeline<'a>(&'a self, settings: &'a Settings) -> Pipeline<'a> {
        Pipeline {
            classifier: self.classifier.as_ref(),
            mutator: self.mutator.as_ref(),
            state: self.state.as_ref(),
            settings,
        }
    }

    async fn run(
        &self,
        items: &[BookmarkItem],
        settings: &Settings,
        mut session: RunSession,
    ) -> Result<RunOutcome, AppError> {
        let pipeline = self.pipeline(settings);
        let (cursor, progress) = {
            let inner = self.inner();
            (inner.processed_items, inner.progress.clone())
        };
        let progress = progress.as_ref();
        let remaining = items.get(cursor..).unwrap_or_default();
        let total = items.len();
        let first_batch = cursor / BATCH_SIZE;

        for (offset, batch) in remaining.chunks(BATCH_SIZE).enumerate() {
            if self.stop_flag.load(Ordering::SeqCst) {
                return Ok(self.finish_stopped(session));
            }
            if offset > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let batch_number = first_batch + offset + 1;
            let total_batches = {
                let mut inner = self.inner();
                inner.current_batch = batch_number;
                inner.total_batches
            };
            emit(
                progress,
                ProgressEvent::Batch {
                    batch: batch_number,
                    total_batches,
                    size: batch.len(),
                },
            );

            let is_new: Vec<bool> = batch
                .iter()
                .map(|item| session.first_sighting(&item.url))
                .collect();
            let fresh: Vec<BookmarkItem> = batch
                .iter()
                .zip(&is_new)
                .filter(|(_, new)| **new)
                .map(|(item, _)| item.clone())
                .collect();

            let mut slots = match self.classify_batch(&fresh).await {
                Ok(slots) => slots.map(Vec::into_iter),
                Err(e) => return Err(self.abort(session, e, progress).await),
            };

            for (item, new) in batch.iter().zip(is_new) {
                let status = if new {
                    let oracle = match slots.as_mut() {
                        Some(slots) => slots.next().flatten(),
                        None => match pipeline.classify_item(item).await {
                            Ok(oracle) => oracle,
                            Err(e) => return Err(self.abort(session, e, progress).await),
                        },
                    };
                    pipeline.route(item, oracle, &mut session).await
                } else {
                    pipeline.record(&ItemStatus::Duplicate);
                    ItemStatus::Duplicate
                };

                let current = {
                    let mut inner = self.inner();
                    inner.processed_items += 1;
                    inner.processed_items
                };
                emit(
                    progress,
                    ProgressEvent::Item(ItemProgress {
                        current,
                        total,
                        item: item.clone(),
                        status,
                    }),
                );
            }
        }

        if self.stop_flag.load(Ordering::SeqCst) && self.status().processed_items < total {
            return Ok(self.finish_stopped(session));
        }
        Ok(self.finish_completed(&pipeline, session, progress).await)
    }

    /// `Ok(None)` means the batch call failed softly and items should be
    /// classified one by one.
    async fn classify_batch(
        &self,
        fresh: &[BookmarkItem],
    ) -> Result<Option<Vec<Option<Classification>>>, OracleError> {
        if fresh.is_empty() {
            return Ok(Some(Vec::new()));
        }
        match self.classifier.classify_batch(fresh).await {
            Ok(slots) => Ok(Some(slots)),
            Err(OracleError::ActivationRequired) => Err(OracleError::ActivationRequired),
            Err(e) => {
                warn!("batch classification failed, classifying items individually: {e}");
                Ok(None)
            }
        }
    }

    fn finish_stopped(&self, session: RunSession) -> RunOutcome {
        let (status, progress) = {
            let mut inner = self.inner();
            inner.phase = RunPhase::Stopped;
            inner.elapsed_before = inner.elapsed();
            inner.started_at = None;
            inner.session = session;
            (inner.status(), inner.progress.take())
        };
        info!(
            "stopped after {}/{} items",
            status.processed_items, status.total_items
        );
        emit(progress.as_ref(), ProgressEvent::Stopped(status.clone()));
        RunOutcome::Stopped(status)
    }

    async fn finish_completed(
        &self,
        pipeline: &Pipeline<'_>,
        mut session: RunSession,
        progress: Option<&ProgressSender>,
    ) -> RunOutcome {
        pipeline.flush_moves(&mut session).await;
        let mut stats = {
            let mut inner = self.inner();
            inner.phase = RunPhase::Completed;
            inner.progress = None;
            inner.stats()
        };
        stats.counts = lock_state(&self.state).counts;
        info!(
            "completed {} items in {} batches ({} ms)",
            stats.processed, stats.batches, stats.elapsed_ms
        );
        emit(progress, ProgressEvent::Completed(stats.clone()));
        RunOutcome::Completed(stats)
    }

    async fn abort(
        &self,
        session: RunSession,
        error: OracleError,
        progress: Option<&ProgressSender>,
    ) -> AppError {
        let error = AppError::from(error);
        self.finish_with_error(session, &error.to_string(), progress)
            .await;
        error
    }

    async fn finish_with_error(
        &self,
        mut session: RunSession,
        message: &str,
        progress: Option<&ProgressSender>,
    ) {
        if let Err(e) = self.mutator.record_snapshot(session.take_moves()).await {
            warn!("failed to record snapshot: {e}");
        }
        {
            let mut inner = self.inner();
            inner.phase = RunPhase::Errored;
            inner.progress = None;
        }
        warn!("processing failed: {message}");
        emit(
            progress,
            ProgressEvent::Errored {
                message: message.to_string(),
            },
        );
    }
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, info, warn};

use crate::commands::processing_controller::{ProcessingController, RunOutcome};
use crate::data::repository::{get_json, meta_key, KeyValueStore, SqliteKeyValueStore};
use crate::error::{AppError, OracleError};
use crate::models::bookmark::{BookmarkItem, BookmarkNode};
use crate::models::classification::{BookmarkData, BookmarkMeta, Classification, Decision};
use crate::models::settings::Settings;
use crate::services::apply_service::{
    ApplyOutcome, ApplyReport, BookmarkMutator, ResetReport, UndoReport,
};
use crate::services::bookmark_store::{BookmarkStore, CreateBookmark};
use crate::services::decision_service::{self, evaluate_item, Pipeline};
use crate::services::folder_strategy::apply_strategy;
use crate::services::oracle_service::Classifier;
use crate::services::scan_service::{self, BookmarkContext, ScanResult};
use crate::services::settings_service;
use crate::state::{
    lock_state, ControllerStatus, ItemStatus, ProcessingCounts, ProgressSender,
    SharedProcessingState,
};

/// Items and settings of the run that a `resume` continues.
#[derive(Clone)]
struct RunInput {
    items: Arc<Vec<BookmarkItem>>,
    settings: Settings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartSaveResult {
    pub bookmark: BookmarkNode,
    /// `None` when the page was saved unclassified.
    pub classification: Option<Classification>,
}

/// Entry point bundling the processing controller with the review queue,
/// history and settings operations.
pub struct Organizer {
    store: Arc<dyn BookmarkStore>,
    kv: Arc<dyn KeyValueStore>,
    classifier: Arc<dyn Classifier>,
    mutator: Arc<BookmarkMutator>,
    state: SharedProcessingState,
    controller: ProcessingController,
    /// Held for the duration of a run; also keeps the input for `resume`.
    run: AsyncMutex<Option<RunInput>>,
}

impl Organizer {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        kv: Arc<dyn KeyValueStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let mutator = Arc::new(BookmarkMutator::new(store.clone(), kv.clone()));
        let state = SharedProcessingState::default();
        let controller =
            ProcessingController::new(classifier.clone(), mutator.clone(), state.clone());
        Self {
            store,
            kv,
            classifier,
            mutator,
            state,
            controller,
            run: AsyncMutex::new(None),
        }
    }

    /// Opens the SQLite store in the platform data directory (or
    /// `TIDYMARKS_DATA_DIR`).
    pub fn with_default_storage(
        store: Arc<dyn BookmarkStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, AppError> {
        let kv = Arc::new(SqliteKeyValueStore::open_default()?);
        Ok(Self::new(store, kv, classifier))
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.controller = self.controller.with_pause(pause);
        self
    }

    pub fn mutator(&self) -> &BookmarkMutator {
        &self.mutator
    }

    /// Claims the bookmark tree for one mutating operation. Fails while a
    /// run or another mutation holds it.
    fn exclusive(&self) -> Result<AsyncMutexGuard<'_, Option<RunInput>>, AppError> {
        self.run.try_lock().map_err(|_| AppError::AlreadyRunning)
    }

    // -----------------------------------------------------------------------
    // Settings and scanning
    // -----------------------------------------------------------------------

    pub fn settings(&self) -> Result<Settings, AppError> {
        settings_service::load_settings(self.kv.as_ref())
    }

    pub fn update_settings(&self, patch: serde_json::Value) -> Result<Settings, AppError> {
        settings_service::update_settings(self.kv.as_ref(), patch)
    }

    pub async fn detect_context(&self, page_url: Option<&str>) -> BookmarkContext {
        scan_service::detect_context(self.store.as_ref(), page_url).await
    }

    /// Bookmarks in the configured scope. `current_folder` is only used by
    /// the `current` scope.
    pub async fn scan(&self, current_folder: Option<&str>) -> Result<ScanResult, AppError> {
        let settings = self.settings()?;
        scan_service::scan(self.store.as_ref(), settings.scope, current_folder).await
    }

    // -----------------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------------

    /// Scans the configured scope and runs the batch controller over it.
    pub async fn start(
        &self,
        current_folder: Option<&str>,
        progress: Option<ProgressSender>,
    ) -> Result<RunOutcome, AppError> {
        let mut run = self.exclusive()?;
        let settings = self.settings()?;
        let scan = scan_service::scan(self.store.as_ref(), settings.scope, current_folder).await?;
        info!("{}", scan.description);

        let input = RunInput {
            items: Arc::new(scan.items),
            settings,
        };
        *run = Some(input.clone());
        self.controller
            .start(&input.items, &input.settings, progress)
            .await
    }

    /// Continues the last stopped run with the items and settings it was
    /// started with.
    pub async fn resume(&self, progress: Option<ProgressSender>) -> Result<RunOutcome, AppError> {
        let run = self.exclusive()?;
        let input = run.clone().ok_or(AppError::NothingToResume)?;
        self.controller
            .resume(&input.items, &input.settings, progress)
            .await
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn status(&self) -> ControllerStatus {
        self.controller.status()
    }

    /// One-by-one classification of the configured scope, without batching
    /// or stop support.
    pub async fn classify_queue(
        &self,
        current_folder: Option<&str>,
        progress: Option<&ProgressSender>,
    ) -> Result<ProcessingCounts, AppError> {
        let _run = self.exclusive()?;
        let settings = self.settings()?;
        let scan = scan_service::scan(self.store.as_ref(), settings.scope, current_folder).await?;
        self.mutator.save_original_state().await?;
        let pipeline = self.pipeline(&settings);
        decision_service::classify_queue(&pipeline, &scan.items, progress).await
    }

    fn pipeline<'a>(&'a self, settings: &'a Settings) -> Pipeline<'a> {
        Pipeline {
            classifier: self.classifier.as_ref(),
            mutator: self.mutator.as_ref(),
            state: self.state.as_ref(),
            settings,
        }
    }

    // -----------------------------------------------------------------------
    // Review queue
    // -----------------------------------------------------------------------

    pub fn counts(&self) -> ProcessingCounts {
        lock_state(&self.state).counts
    }

    pub fn review_queue(&self) -> Vec<BookmarkData> {
        lock_state(&self.state).review.clone()
    }

    fn take_from_review(&self, ids: &[String]) -> Vec<BookmarkData> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut state = lock_state(&self.state);
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.review)
            .into_iter()
            .partition(|data| wanted.contains(data.id()));
        state.review = kept;
        taken
    }

    /// Applies the queued suggestions for `ids` and drops them from the
    /// queue. Ids not in the queue are ignored.
    pub async fn approve_review(&self, ids: &[String]) -> Result<ApplyReport, AppError> {
        let _run = self.exclusive()?;
        let approved: Vec<BookmarkData> = self
            .take_from_review(ids)
            .into_iter()
            .map(|data| BookmarkData {
                decision: Decision::Auto,
                ..data
            })
            .collect();
        info!("approving {} reviewed bookmarks", approved.len());
        Ok(self.mutator.apply_decisions(&approved).await)
    }

    /// Drops `ids` from the queue without touching the bookmarks.
    pub fn skip_review(&self, ids: &[String]) -> usize {
        let skipped = self.take_from_review(ids).len();
        debug!("skipped {skipped} reviewed bookmarks");
        skipped
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    pub async fn undo_last(&self) -> Result<UndoReport, AppError> {
        let _run = self.exclusive()?;
        self.mutator.undo_last().await
    }

    /// Reverts everything since the original state was captured and clears
    /// the in-memory counters and queue.
    pub async fn reset_to_original(&self) -> ResetReport {
        let Ok(_run) = self.exclusive() else {
            return ResetReport::failure(AppError::AlreadyRunning.to_string());
        };
        let report = self.mutator.reset_to_original().await;
        if report.success {
            lock_state(&self.state).reset();
        }
        report
    }

    pub fn bookmark_meta(&self, id: &str) -> Result<Option<BookmarkMeta>, AppError> {
        get_json(self.kv.as_ref(), &meta_key(id))
    }

    // -----------------------------------------------------------------------
    // Single bookmarks
    // -----------------------------------------------------------------------

    /// Files a bookmark the user just created, when `auto_new` is on and it
    /// landed directly in the bookmarks bar or other bookmarks. Returns
    /// `None` when the bookmark was left alone before classification.
    pub async fn organize_new_bookmark(
        &self,
        item: &BookmarkItem,
    ) -> Result<Option<ItemStatus>, AppError> {
        let settings = self.settings()?;
        if !settings.auto_new || item.url.is_empty() {
            return Ok(None);
        }
        let _run = self.exclusive()?;
        let roots = self.mutator.root_folders().await;
        if item.parent_id != roots.bookmarks_bar && item.parent_id != roots.other {
            debug!("bookmark {} is already filed, leaving it", item.id);
            return Ok(None);
        }

        let pipeline = self.pipeline(&settings);
        let Some(mut classification) = pipeline.classify_item(item).await? else {
            return Ok(Some(ItemStatus::Skipped));
        };
        pipeline.improve_title(item, &mut classification).await;

        let mut data = evaluate_item(item, Some(classification), &settings);
        if data.decision != Decision::Auto {
            return Ok(Some(ItemStatus::Skipped));
        }
        if settings.dry_run {
            return Ok(Some(ItemStatus::WouldOrganize {
                folder: data.suggested_folder,
            }));
        }

        data.meta.auto_organized = Some(true);
        data.meta.organized_at = Some(chrono::Utc::now().timestamp_millis());
        let mut moves = Vec::new();
        let status = match self.mutator.apply_decision(&data, &mut moves).await {
            Ok(ApplyOutcome::Stale) => ItemStatus::Vanished {
                folder: data.suggested_folder.clone(),
            },
            Ok(_) => ItemStatus::Organized {
                folder: data.suggested_folder.clone(),
            },
            Err(e) => {
                warn!("failed to organize new bookmark {}: {e}", item.id);
                ItemStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };
        self.mutator.record_snapshot(moves).await?;
        info!("new bookmark {} organized into {}", item.id, data.suggested_folder);
        Ok(Some(status))
    }

    /// Bookmarks a page straight into its classified folder. Without a
    /// classification the page goes into other bookmarks unchanged.
    pub async fn smart_save(
        &self,
        title: &str,
        url: &str,
        page_content: Option<&str>,
    ) -> Result<SmartSaveResult, AppError> {
        let _run = self.exclusive()?;
        let settings = self.settings()?;
        let roots = self.mutator.root_folders().await;
        let item = BookmarkItem::new("", title, url, roots.other.as_str());

        let classification = match self.classifier.classify_one(&item, page_content).await {
            Ok(classification) => Some(apply_strategy(
                &classification,
                &item,
                settings.folder_strategy,
            )),
            Err(OracleError::ActivationRequired) => {
                return Err(OracleError::ActivationRequired.into())
            }
            Err(e) => {
                warn!("smart save falling back to plain bookmark: {e}");
                None
            }
        };

        let Some(classification) = classification else {
            let bookmark = self
                .store
                .create(CreateBookmark::bookmark(roots.other, title, url))
                .await?;
            return Ok(SmartSaveResult {
                bookmark,
                classification: None,
            });
        };

        let folder_id = self
            .mutator
            .ensure_folder_path(&classification.suggested_folder)
            .await;
        let bookmark_title = if classification.rename_title.is_empty() {
            title
        } else {
            classification.rename_title.as_str()
        };
        let bookmark = self
            .store
            .create(CreateBookmark::bookmark(folder_id, bookmark_title, url))
            .await?;

        let meta = BookmarkMeta {
            topic: classification.topic.clone(),
            tags: classification.tags.clone(),
            reasons: classification.reasons.clone(),
            confidence: classification.confidence,
            ai_classified: true,
            auto_organized: None,
            organized_at: Some(chrono::Utc::now().timestamp_millis()),
        };
        self.kv.set(&[(
            meta_key(&bookmark.id).as_str(),
            serde_json::to_value(&meta)?,
        )])?;
        info!("saved {url} into {}", classification.suggested_folder);

        Ok(SmartSaveResult {
            bookmark,
            classification: Some(classification),
        })
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::data::repository::{
    get_json, meta_key, KeyValueStore, ALL_SNAPSHOTS_KEY, LAST_SNAPSHOT_KEY, ORIGINAL_STATE_KEY,
};
use crate::error::{AppError, StoreError};
use crate::models::bookmark::{collect_nodes, empty_folders, BookmarkNode, FolderType};
use crate::models::classification::{BookmarkData, Decision};
use crate::models::snapshot::{Move, OriginalState, Snapshot, SnapshotHistory};
use crate::services::bookmark_store::{
    BookmarkStore, CreateBookmark, BOOKMARKS_BAR_ID, MOBILE_BOOKMARKS_ID, OTHER_BOOKMARKS_ID,
};

const UNSORTED_PATH: &str = "AI Collections/Unsorted";
const BAR_FALLBACK_IDS: [&str; 2] = [BOOKMARKS_BAR_ID, "108"];
const OTHER_FALLBACK_IDS: [&str; 2] = [OTHER_BOOKMARKS_ID, "109"];

/// Ids of the permanent top-level folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootFolders {
    pub bookmarks_bar: String,
    pub other: String,
    pub mobile: Option<String>,
}

impl RootFolders {
    fn fallback() -> Self {
        Self {
            bookmarks_bar: BOOKMARKS_BAR_ID.to_string(),
            other: OTHER_BOOKMARKS_ID.to_string(),
            mobile: Some(MOBILE_BOOKMARKS_ID.to_string()),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        [Some(self.bookmarks_bar.as_str()), Some(self.other.as_str()), self.mobile.as_deref()]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Decision was `skip`; nothing touched.
    Skipped,
    /// Bookmark no longer exists.
    Stale,
    Applied,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
    pub stale: usize,
    pub failed: usize,
    pub snapshot_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    pub snapshot_id: String,
    pub restored: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub success: bool,
    pub message: String,
    pub restored: usize,
    pub failed: usize,
    pub folders_removed: usize,
}

impl ResetReport {
    pub(crate) fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            ..Self::default()
        }
    }
}

/// Applies routing decisions to the bookmark store and keeps the snapshot
/// history that makes them reversible.
pub struct BookmarkMutator {
    store: Arc<dyn BookmarkStore>,
    kv: Arc<dyn KeyValueStore>,
    roots: OnceCell<RootFolders>,
}

impl BookmarkMutator {
    pub fn new(store: Arc<dyn BookmarkStore>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            kv,
            roots: OnceCell::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Folder resolution
    // -----------------------------------------------------------------------

    /// Permanent folders, detected by `folder_type` with well-known ids as
    /// fallback. Only a successful detection is cached.
    pub async fn root_folders(&self) -> RootFolders {
        match self.roots.get_or_try_init(|| self.detect_roots()).await {
            Ok(roots) => roots.clone(),
            Err(e) => {
                warn!("failed to read bookmark tree, using default root ids: {e}");
                RootFolders::fallback()
            }
        }
    }

    async fn detect_roots(&self) -> Result<RootFolders, StoreError> {
        let tree = self.store.get_tree().await?;
        let mut bar = None;
        let mut other = None;
        let mut mobile = None;
        for root in &tree {
            for child in root.children() {
                match child.folder_type {
                    Some(FolderType::BookmarksBar) => bar = Some(child.id.clone()),
                    Some(FolderType::Other) => other = Some(child.id.clone()),
                    Some(FolderType::Mobile) => mobile = Some(child.id.clone()),
                    None => {}
                }
            }
        }

        if bar.is_none() {
            bar = self.probe_folder(&BAR_FALLBACK_IDS).await;
        }
        if other.is_none() {
            other = self.probe_folder(&OTHER_FALLBACK_IDS).await;
        }

        let roots = RootFolders {
            bookmarks_bar: bar.unwrap_or_else(|| BOOKMARKS_BAR_ID.to_string()),
            other: other.unwrap_or_else(|| OTHER_BOOKMARKS_ID.to_string()),
            mobile,
        };
        debug!(?roots, "resolved root folders");
        Ok(roots)
    }

    async fn probe_folder(&self, candidates: &[&str]) -> Option<String> {
        for id in candidates {
            if let Ok(Some(node)) = self.store.get(id).await {
                if node.is_folder() {
                    return Some(node.id);
                }
            }
        }
        None
    }

    /// Resolves `"A/B"` below the bookmarks bar, creating missing segments.
    /// Never fails: an unresolvable path yields the bookmarks bar id.
    pub async fn ensure_folder_path(&self, path: &str) -> String {
        let root = self.root_folders().await.bookmarks_bar;
        match self.resolve_path(path, &root).await {
            Ok(id) => id,
            Err(e) => {
                warn!("{e}; using bookmarks bar");
                root
            }
        }
    }

    async fn resolve_path(&self, path: &str, root: &str) -> Result<String, StoreError> {
        let mut parent = root.to_string();
        for segment in path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            let hits = self
                .store
                .search_title(segment)
                .await
                .map_err(|e| StoreError::PathResolutionFailed(format!("{path}: {e}")))?;
            let existing = hits.into_iter().find(|node| {
                node.is_folder()
                    && node.title == segment
                    && node.parent_id.as_deref() == Some(parent.as_str())
            });
            if let Some(folder) = existing {
                parent = folder.id;
                continue;
            }

            let created = match self
                .store
                .create(CreateBookmark::folder(parent.clone(), segment))
                .await
            {
                Ok(node) => node,
                Err(e) if parent != root => {
                    warn!("creating folder {segment:?} under {parent} failed ({e}), retrying under bookmarks bar");
                    self.store
                        .create(CreateBookmark::folder(root, segment))
                        .await
                        .map_err(|e| StoreError::PathResolutionFailed(format!("{path}: {e}")))?
                }
                Err(e) => return Err(StoreError::PathResolutionFailed(format!("{path}: {e}"))),
            };
            debug!("created folder {segment:?} with id {}", created.id);
            parent = created.id;
        }
        Ok(parent)
    }

    // -----------------------------------------------------------------------
    // Applying decisions
    // -----------------------------------------------------------------------

    /// Applies one decision against live state. The reversing [`Move`] is
    /// pushed to `moves` before the store is mutated.
    pub async fn apply_decision(
        &self,
        data: &BookmarkData,
        moves: &mut Vec<Move>,
    ) -> Result<ApplyOutcome, AppError> {
        if data.decision == Decision::Skip {
            return Ok(ApplyOutcome::Skipped);
        }

        let before = match self.store.get(data.id()).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                debug!("bookmark {} no longer exists, skipping", data.id());
                return Ok(ApplyOutcome::Stale);
            }
            Err(e) => {
                debug!("bookmark {} unreadable ({e}), skipping", data.id());
                return Ok(ApplyOutcome::Stale);
            }
        };

        let path = if data.suggested_folder.trim().is_empty() {
            UNSORTED_PATH
        } else {
            data.suggested_folder.as_str()
        };
        let target = self.ensure_folder_path(path).await;
        let current_parent = before.parent_id.clone().unwrap_or_default();
        let needs_move = current_parent != target;
        let needs_rename = !data.rename_title.is_empty() && data.rename_title != before.title;

        if needs_move || needs_rename {
            moves.push(Move {
                id: before.id.clone(),
                prev_parent_id: current_parent,
                new_parent_id: target.clone(),
                title: before.title.clone(),
                original_title: before.title.clone(),
            });
        }
        if needs_move {
            self.store.move_node(&before.id, &target).await?;
            debug!("moved {} into {}", before.id, target);
        }
        if needs_rename {
            self.store.update_title(&before.id, &data.rename_title).await?;
        }

        self.kv
            .set(&[(meta_key(&before.id).as_str(), serde_json::to_value(&data.meta)?)])?;
        Ok(ApplyOutcome::Applied)
    }

    /// Applies every non-skip decision, isolating per-decision failures, and
    /// records the resulting moves as one snapshot.
    pub async fn apply_decisions(&self, decisions: &[BookmarkData]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut moves = Vec::new();

        for data in decisions {
            match self.apply_decision(data, &mut moves).await {
                Ok(ApplyOutcome::Applied) => report.applied += 1,
                Ok(ApplyOutcome::Skipped) => report.skipped += 1,
                Ok(ApplyOutcome::Stale) => report.stale += 1,
                Err(e) => {
                    warn!("failed to apply decision for bookmark {}: {e}", data.id());
                    report.failed += 1;
                }
            }
        }

        match self.record_snapshot(moves).await {
            Ok(snapshot) => report.snapshot_id = snapshot.map(|s| s.id),
            Err(e) => error!("failed to record snapshot: {e}"),
        }
        report
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    fn load_history(&self) -> Result<SnapshotHistory, AppError> {
        Ok(get_json(self.kv.as_ref(), ALL_SNAPSHOTS_KEY)?.unwrap_or_default())
    }

    /// Persists `moves` as the newest snapshot. Empty move lists record
    /// nothing.
    pub async fn record_snapshot(&self, mut moves: Vec<Move>) -> Result<Option<Snapshot>, AppError> {
        if moves.is_empty() {
            return Ok(None);
        }
        let mut history = self.load_history()?;

        let mut first_titles: HashMap<String, String> = HashMap::new();
        for mv in &mut moves {
            let earlier = history
                .original_title_of(&mv.id)
                .map(str::to_string)
                .or_else(|| first_titles.get(&mv.id).cloned());
            if let Some(title) = earlier {
                mv.original_title = title;
            }
            first_titles
                .entry(mv.id.clone())
                .or_insert_with(|| mv.original_title.clone());
        }

        let snapshot = Snapshot::new(moves);
        history.push(snapshot.clone());
        self.kv.set(&[
            (ALL_SNAPSHOTS_KEY, serde_json::to_value(&history)?),
            (LAST_SNAPSHOT_KEY, serde_json::to_value(&snapshot)?),
        ])?;
        info!(
            "recorded snapshot {} with {} moves ({} retained)",
            snapshot.id,
            snapshot.moves.len(),
            history.len()
        );
        Ok(Some(snapshot))
    }

    pub fn snapshot_history(&self) -> Result<SnapshotHistory, AppError> {
        self.load_history()
    }

    pub fn last_snapshot(&self) -> Result<Option<Snapshot>, AppError> {
        get_json(self.kv.as_ref(), LAST_SNAPSHOT_KEY)
    }

    /// Reverts the most recent snapshot, best-effort per move.
    pub async fn undo_last(&self) -> Result<UndoReport, AppError> {
        let snapshot = self.last_snapshot()?.ok_or(AppError::NothingToUndo)?;
        let mut report = UndoReport {
            snapshot_id: snapshot.id.clone(),
            restored: 0,
            failed: 0,
        };

        for mv in snapshot.moves.iter().rev() {
            match self.restore(mv, &mv.title).await {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    debug!("undo of {} failed: {e}", mv.id);
                    report.failed += 1;
                }
            }
        }

        let mut history = self.load_history()?;
        history.mark_undone(&snapshot.id);
        self.kv
            .set(&[(ALL_SNAPSHOTS_KEY, serde_json::to_value(&history)?)])?;
        self.kv.remove(&[LAST_SNAPSHOT_KEY])?;
        info!(
            "undid snapshot {}: {} restored, {} failed",
            report.snapshot_id, report.restored, report.failed
        );
        Ok(report)
    }

    async fn restore(&self, mv: &Move, title: &str) -> Result<(), StoreError> {
        self.store.move_node(&mv.id, &mv.prev_parent_id).await?;
        self.store.update_title(&mv.id, title).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Original state and reset
    // -----------------------------------------------------------------------

    pub fn original_state(&self) -> Result<Option<OriginalState>, AppError> {
        get_json(self.kv.as_ref(), ORIGINAL_STATE_KEY)
    }

    /// Captures the full tree the first time it is called; later calls are
    /// no-ops. Returns whether a capture happened.
    pub async fn save_original_state(&self) -> Result<bool, AppError> {
        if self.original_state()?.is_some() {
            return Ok(false);
        }
        let bookmarks = self.store.get_tree().await?;
        let state = OriginalState {
            timestamp: chrono::Utc::now().timestamp_millis(),
            bookmarks,
            saved: true,
        };
        self.kv
            .set(&[(ORIGINAL_STATE_KEY, serde_json::to_value(&state)?)])?;
        info!("original bookmark state saved");
        Ok(true)
    }

    /// Reverts every retained snapshot and removes emptied folders. Failure
    /// is reported in the result, never returned as an error.
    pub async fn reset_to_original(&self) -> ResetReport {
        match self.try_reset().await {
            Ok(report) => report,
            Err(e) => {
                error!("reset failed: {e}");
                ResetReport::failure(e.to_string())
            }
        }
    }

    async fn try_reset(&self) -> Result<ResetReport, AppError> {
        let original = self.original_state()?.ok_or(AppError::NoOriginalState)?;
        let history = self.load_history()?;
        let mut report = ResetReport::default();

        for snapshot in history.live_newest_first() {
            for mv in snapshot.moves.iter().rev() {
                match self.restore(mv, &mv.original_title).await {
                    Ok(()) => {
                        report.restored += 1;
                        if let Err(e) = self.kv.remove(&[meta_key(&mv.id).as_str()]) {
                            warn!("failed to drop metadata for {}: {e}", mv.id);
                        }
                    }
                    Err(e) => {
                        warn!("failed to restore bookmark {}: {e}", mv.id);
                        report.failed += 1;
                    }
                }
            }
        }

        report.folders_removed = self.cleanup_empty_folders(&original.bookmarks).await;
        self.kv.remove(&[ALL_SNAPSHOTS_KEY, LAST_SNAPSHOT_KEY])?;

        report.success = true;
        report.message = "Successfully reset all bookmarks to original state".to_string();
        info!(
            "reset complete: {} restored, {} failed, {} folders removed",
            report.restored, report.failed, report.folders_removed
        );
        Ok(report)
    }

    /// Removes empty folders that did not exist in `original`, innermost
    /// first. Permanent folders are never touched.
    async fn cleanup_empty_folders(&self, original: &[BookmarkNode]) -> usize {
        let tree = match self.store.get_tree().await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("failed to read tree for cleanup: {e}");
                return 0;
            }
        };

        let mut keep: HashSet<String> = collect_nodes(original, |node, _| node.is_folder())
            .into_iter()
            .map(|node| node.id.clone())
            .collect();
        keep.extend(
            collect_nodes(&tree, |node, depth| {
                depth == 0 || node.parent_id.is_none() || node.folder_type.is_some()
            })
            .into_iter()
            .map(|node| node.id.clone()),
        );
        keep.extend(self.root_folders().await.ids().map(str::to_string));

        let mut removed = 0;
        for id in empty_folders(&tree, &keep) {
            match self.store.remove(&id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("failed to remove empty folder {id}: {e}"),
            }
        }
        removed
    }
}

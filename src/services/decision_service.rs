use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, OracleError};
use crate::models::bookmark::BookmarkItem;
use crate::models::classification::{BookmarkData, BookmarkMeta, Classification, Decision};
use crate::models::settings::Settings;
use crate::models::snapshot::Move;
use crate::services::apply_service::{ApplyOutcome, BookmarkMutator};
use crate::services::folder_strategy::apply_strategy;
use crate::services::oracle_service::Classifier;
use crate::services::url_service::{canonicalize, heuristic_classification, HEURISTIC_CONFIDENCE};
use crate::state::{
    emit, lock_state, ItemProgress, ItemStatus, ProcessingCounts, ProcessingState, ProgressEvent,
    ProgressSender,
};

/// Weight of the oracle's own confidence in the blended score. The rest
/// goes to the fixed heuristic confidence.
pub const ORACLE_WEIGHT: f64 = 0.7;
/// Blended scores below this are skipped outright.
pub const REVIEW_FLOOR: f64 = 0.6;

pub fn blend_confidence(oracle_confidence: Option<f64>) -> f64 {
    match oracle_confidence {
        Some(confidence) => {
            ORACLE_WEIGHT * confidence + (1.0 - ORACLE_WEIGHT) * HEURISTIC_CONFIDENCE
        }
        None => HEURISTIC_CONFIDENCE,
    }
}

pub fn decide(confidence: f64, threshold: f64) -> Decision {
    if confidence >= threshold {
        Decision::Auto
    } else if confidence >= REVIEW_FLOOR {
        Decision::Review
    } else {
        Decision::Skip
    }
}

/// Dedupe keys and pending moves of one processing session. Survives a
/// stop so a resumed run continues with the same state.
#[derive(Debug, Default)]
pub struct RunSession {
    seen: HashSet<String>,
    moves: Vec<Move>,
}

impl RunSession {
    /// True the first time a canonical URL is offered.
    pub fn first_sighting(&mut self, url: &str) -> bool {
        self.seen.insert(canonicalize(url))
    }

    pub fn moves_mut(&mut self) -> &mut Vec<Move> {
        &mut self.moves
    }

    pub fn pending_moves(&self) -> usize {
        self.moves.len()
    }

    pub fn take_moves(&mut self) -> Vec<Move> {
        std::mem::take(&mut self.moves)
    }
}

/// Cheap textual context sent along with a single-item classification.
pub fn page_context(item: &BookmarkItem) -> Option<String> {
    if !item.url.starts_with("http") {
        return None;
    }
    let url = Url::parse(&item.url).ok()?;
    Some(format!("{} {}", item.title, url.host_str()?))
}

/// Builds the routed record for `item`. Without an oracle result the
/// heuristic guess is used and can never be queued for review.
pub fn evaluate_item(
    item: &BookmarkItem,
    oracle: Option<Classification>,
    settings: &Settings,
) -> BookmarkData {
    let ai_classified = oracle.is_some();
    let confidence = blend_confidence(oracle.as_ref().map(|c| c.confidence));
    let chosen = oracle.unwrap_or_else(|| heuristic_classification(item));
    let routed = apply_strategy(&chosen, item, settings.folder_strategy);

    let mut decision = decide(confidence, settings.threshold);
    if !ai_classified && decision == Decision::Review {
        decision = Decision::Skip;
    }

    // Empty means "leave the title alone"; the live title may differ from
    // the scanned one by the time this is applied.
    let rename_title = if settings.auto_rename && routed.rename_title != item.title {
        routed.rename_title.clone()
    } else {
        String::new()
    };

    BookmarkData {
        item: item.clone(),
        suggested_folder: routed.suggested_folder,
        rename_title,
        confidence,
        meta: BookmarkMeta {
            topic: routed.topic,
            tags: routed.tags,
            reasons: routed.reasons,
            confidence,
            ai_classified,
            auto_organized: None,
            organized_at: None,
        },
        decision,
    }
}

/// Borrowed collaborators for routing items within one run.
pub struct Pipeline<'a> {
    pub classifier: &'a dyn Classifier,
    pub mutator: &'a BookmarkMutator,
    pub state: &'a Mutex<ProcessingState>,
    pub settings: &'a Settings,
}

impl Pipeline<'_> {
    /// Single-item oracle call. Only [`OracleError::ActivationRequired`] is
    /// returned; every other failure means "use the heuristic".
    pub async fn classify_item(
        &self,
        item: &BookmarkItem,
    ) -> Result<Option<Classification>, OracleError> {
        let context = page_context(item);
        match self.classifier.classify_one(item, context.as_deref()).await {
            Ok(classification) => Ok(Some(classification)),
            Err(OracleError::ActivationRequired) => Err(OracleError::ActivationRequired),
            Err(e) => {
                debug!("oracle failed for {}: {e}", item.url);
                Ok(None)
            }
        }
    }

    /// Replaces the suggested title with an oracle-improved one when
    /// auto-rename is on. Failures keep the suggestion.
    pub async fn improve_title(&self, item: &BookmarkItem, classification: &mut Classification) {
        if !self.settings.auto_rename {
            return;
        }
        match self.classifier.improve_title(&item.title, &item.url).await {
            Ok(title) if title != item.title => classification.rename_title = title,
            Ok(_) => {}
            Err(e) => debug!("title improvement failed for {}: {e}", item.url),
        }
    }

    /// Runs title improvement, strategy, threshold routing and the apply
    /// or queue step for one item. Counters are updated here.
    pub async fn route(
        &self,
        item: &BookmarkItem,
        oracle: Option<Classification>,
        session: &mut RunSession,
    ) -> ItemStatus {
        let oracle = match oracle {
            Some(mut classification) => {
                self.improve_title(item, &mut classification).await;
                Some(classification)
            }
            None => None,
        };
        let data = evaluate_item(item, oracle, self.settings);
        let status = self.commit(data, session.moves_mut()).await;
        self.record(&status);
        status
    }

    async fn commit(&self, data: BookmarkData, moves: &mut Vec<Move>) -> ItemStatus {
        match data.decision {
            Decision::Auto if self.settings.dry_run => ItemStatus::WouldOrganize {
                folder: data.suggested_folder,
            },
            Decision::Auto => match self.mutator.apply_decision(&data, moves).await {
                Ok(ApplyOutcome::Stale) => ItemStatus::Vanished {
                    folder: data.suggested_folder,
                },
                Ok(_) => ItemStatus::Organized {
                    folder: data.suggested_folder,
                },
                Err(e) => {
                    warn!("failed to organize {}: {e}", data.item.url);
                    ItemStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            },
            Decision::Review => {
                let status = ItemStatus::NeedsReview {
                    folder: data.suggested_folder.clone(),
                    confidence: data.confidence,
                };
                lock_state(self.state).review.push(data);
                status
            }
            Decision::Skip => ItemStatus::Skipped,
        }
    }

    pub fn record(&self, status: &ItemStatus) {
        lock_state(self.state).counts.record(status);
    }

    /// Persists the session's moves as one snapshot. Failures are logged.
    pub async fn flush_moves(&self, session: &mut RunSession) {
        let moves = session.take_moves();
        if let Err(e) = self.mutator.record_snapshot(moves).await {
            warn!("failed to record snapshot: {e}");
        }
    }
}

/// Sequential classification of `items`, one oracle call per item. Counters
/// and the review queue are reset first. Only a missing user activation
/// aborts; moves made before the abort are still snapshotted.
pub async fn classify_queue(
    pipeline: &Pipeline<'_>,
    items: &[BookmarkItem],
    progress: Option<&ProgressSender>,
) -> Result<ProcessingCounts, AppError> {
    lock_state(pipeline.state).reset();
    let mut session = RunSession::default();
    let total = items.len();
    info!("classifying {total} bookmarks");

    let mut aborted = None;
    for (index, item) in items.iter().enumerate() {
        let status = if !session.first_sighting(&item.url) {
            pipeline.record(&ItemStatus::Duplicate);
            ItemStatus::Duplicate
        } else {
            match pipeline.classify_item(item).await {
                Ok(oracle) => pipeline.route(item, oracle, &mut session).await,
                Err(e) => {
                    aborted = Some(e);
                    break;
                }
            }
        };
        emit(
            progress,
            ProgressEvent::Item(ItemProgress {
                current: index + 1,
                total,
                item: item.clone(),
                status,
            }),
        );
    }

    pipeline.flush_moves(&mut session).await;
    if let Some(e) = aborted {
        warn!("classification aborted: {e}");
        return Err(e.into());
    }

    let counts = lock_state(pipeline.state).counts;
    info!(?counts, "classification complete");
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::data::repository::SqliteKeyValueStore;
    use crate::models::settings::FolderStrategy;
    use crate::services::bookmark_store::{BookmarkStore, MemoryBookmarkStore, OTHER_BOOKMARKS_ID};
    use crate::test_support::{classification, ScriptedClassifier};

    struct Fixture {
        store: Arc<MemoryBookmarkStore>,
        mutator: BookmarkMutator,
        state: Mutex<ProcessingState>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryBookmarkStore::new());
            let kv = Arc::new(SqliteKeyValueStore::open_in_memory().unwrap());
            Self {
                mutator: BookmarkMutator::new(store.clone(), kv),
                store,
                state: Mutex::new(ProcessingState::default()),
            }
        }

        fn add(&self, title: &str, url: &str) -> BookmarkItem {
            let id = self.store.add_bookmark(OTHER_BOOKMARKS_ID, title, url).unwrap();
            BookmarkItem::new(id, title, url, OTHER_BOOKMARKS_ID)
        }

        fn pipeline<'a>(
            &'a self,
            classifier: &'a ScriptedClassifier,
            settings: &'a Settings,
        ) -> Pipeline<'a> {
            Pipeline {
                classifier,
                mutator: &self.mutator,
                state: &self.state,
                settings,
            }
        }
    }

    fn rank(decision: Decision) -> u8 {
        match decision {
            Decision::Auto => 2,
            Decision::Review => 1,
            Decision::Skip => 0,
        }
    }

    #[test]
    fn blend_uses_fixed_weights() {
        assert_eq!(blend_confidence(None), HEURISTIC_CONFIDENCE);
        assert!((blend_confidence(Some(1.0)) - 0.895).abs() < 1e-9);
        assert!((blend_confidence(Some(0.0)) - 0.195).abs() < 1e-9);
    }

    #[test]
    fn raising_threshold_never_promotes() {
        let confidences = [0.0, 0.3, 0.59, 0.6, 0.65, 0.8, 0.895, 0.9, 1.0];
        let thresholds = [0.0, 0.5, 0.6, 0.7, 0.85, 0.9, 0.95, 1.0];
        for confidence in confidences {
            let ranks: Vec<u8> = thresholds
                .iter()
                .map(|threshold| rank(decide(confidence, *threshold)))
                .collect();
            assert!(
                ranks.windows(2).all(|pair| pair[0] >= pair[1]),
                "confidence {confidence}: {ranks:?}"
            );
        }
        assert_eq!(decide(0.9, 0.9), Decision::Auto);
        assert_eq!(decide(0.6, 0.9), Decision::Review);
        assert_eq!(decide(0.59, 0.9), Decision::Skip);
    }

    #[test]
    fn heuristic_only_github_bookmark_is_skipped() {
        let item = BookmarkItem::new(
            "1",
            "GitHub - microsoft/vscode",
            "https://github.com/microsoft/vscode",
            "2",
        );
        let settings = Settings {
            folder_strategy: FolderStrategy::Detailed,
            ..Settings::default()
        };
        let data = evaluate_item(&item, None, &settings);
        assert_eq!(data.meta.topic, "Technology/Development");
        assert_eq!(data.suggested_folder, "AI Collections/Technology/Development");
        assert_eq!(data.confidence, 0.65);
        assert!(!data.meta.ai_classified);
        assert_eq!(data.decision, Decision::Skip);
    }

    #[test]
    fn oracle_result_goes_through_folder_strategy() {
        let item = BookmarkItem::new("1", "x", "https://github.com/x", "2");
        let settings = Settings {
            threshold: 0.8,
            ..Settings::default()
        };
        let data = evaluate_item(
            &item,
            Some(classification("Programming", "Dev/Stuff", 1.0)),
            &settings,
        );
        assert_eq!(data.suggested_folder, "Work/Programming");
        assert_eq!(data.meta.topic, "Work");
        assert!(data.meta.ai_classified);
        assert_eq!(data.decision, Decision::Auto);
    }

    #[test]
    fn page_context_needs_http_url() {
        let item = BookmarkItem::new("1", "Docs", "https://docs.rs/serde", "2");
        assert_eq!(page_context(&item).as_deref(), Some("Docs docs.rs"));
        let item = BookmarkItem::new("1", "Local", "file:///tmp/x.html", "2");
        assert!(page_context(&item).is_none());
    }

    #[tokio::test]
    async fn duplicates_are_classified_once() {
        let fixture = Fixture::new();
        let classifier = ScriptedClassifier::unavailable();
        let settings = Settings::default();
        let items = vec![
            fixture.add("a", "https://Example.com/page/?utm_source=x"),
            fixture.add("b", "https://example.com/page#top"),
            fixture.add("c", "https://example.com/page/"),
            fixture.add("d", "https://example.com/page?fbclid=1"),
        ];

        let counts = classify_queue(&fixture.pipeline(&classifier, &settings), &items, None)
            .await
            .unwrap();
        assert_eq!(counts.duplicates, 3);
        assert_eq!(counts.total(), 4);
        assert_eq!(classifier.classified_urls().len(), 1);
    }

    #[tokio::test]
    async fn auto_items_move_and_review_items_queue_in_order() {
        let fixture = Fixture::new();
        let a = fixture.add("repo", "https://github.com/a");
        let b = fixture.add("clip", "https://youtube.com/watch?v=1");
        let c = fixture.add("misc", "https://example.com/c");
        let classifier = ScriptedClassifier::unavailable()
            .with(&a.url, classification("Programming", "Work/Programming", 1.0))
            .with(&b.url, classification("Videos", "Entertainment/Videos", 0.7))
            .with(&c.url, classification("Resources", "Reference/Resources", 0.7));
        let settings = Settings {
            threshold: 0.85,
            ..Settings::default()
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let counts = classify_queue(
            &fixture.pipeline(&classifier, &settings),
            &[a.clone(), b.clone(), c.clone()],
            Some(&tx),
        )
        .await
        .unwrap();

        assert_eq!(counts.auto, 1);
        assert_eq!(counts.review, 2);
        let review: Vec<String> = lock_state(&fixture.state)
            .review
            .iter()
            .map(|data| data.id().to_string())
            .collect();
        assert_eq!(review, vec![b.id.clone(), c.id.clone()]);

        let moved = fixture.store.get(&a.id).await.unwrap().unwrap();
        assert_ne!(moved.parent_id.as_deref(), Some(OTHER_BOOKMARKS_ID));
        assert!(fixture.mutator.last_snapshot().unwrap().is_some());

        let mut statuses = Vec::new();
        while let Ok(ProgressEvent::Item(progress)) = rx.try_recv() {
            statuses.push(progress.status);
        }
        assert_eq!(statuses.len(), 3);
        assert!(matches!(statuses[0], ItemStatus::Organized { .. }));
        assert!(matches!(statuses[1], ItemStatus::NeedsReview { .. }));
    }

    #[tokio::test]
    async fn dry_run_counts_but_does_not_move() {
        let fixture = Fixture::new();
        let a = fixture.add("repo", "https://github.com/a");
        let classifier = ScriptedClassifier::unavailable()
            .with(&a.url, classification("Programming", "Work/Programming", 1.0));
        let settings = Settings {
            threshold: 0.8,
            dry_run: true,
            ..Settings::default()
        };

        let counts = classify_queue(&fixture.pipeline(&classifier, &settings), &[a.clone()], None)
            .await
            .unwrap();
        assert_eq!(counts.auto, 1);
        let node = fixture.store.get(&a.id).await.unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some(OTHER_BOOKMARKS_ID));
        assert!(fixture.mutator.last_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_rename_uses_improved_title() {
        let fixture = Fixture::new();
        let a = fixture.add("GitHub - a/b", "https://github.com/a/b");
        let classifier = ScriptedClassifier::unavailable()
            .with(&a.url, classification("Programming", "Work/Programming", 1.0))
            .with_title("a/b repository");
        let settings = Settings {
            threshold: 0.8,
            ..Settings::default()
        };
        classify_queue(&fixture.pipeline(&classifier, &settings), &[a.clone()], None)
            .await
            .unwrap();
        assert_eq!(
            fixture.store.get(&a.id).await.unwrap().unwrap().title,
            "a/b repository"
        );

        let b = fixture.add("keep me", "https://github.com/c/d");
        let classifier = ScriptedClassifier::unavailable()
            .with(&b.url, classification("Programming", "Work/Programming", 1.0))
            .with_title("renamed");
        let settings = Settings {
            threshold: 0.8,
            auto_rename: false,
            ..Settings::default()
        };
        classify_queue(&fixture.pipeline(&classifier, &settings), &[b.clone()], None)
            .await
            .unwrap();
        assert_eq!(fixture.store.get(&b.id).await.unwrap().unwrap().title, "keep me");
    }

    #[tokio::test]
    async fn activation_required_aborts_but_keeps_earlier_work() {
        let fixture = Fixture::new();
        let a = fixture.add("repo", "https://github.com/a");
        let b = fixture.add("other", "https://example.com/b");
        let classifier = ScriptedClassifier::activation_required()
            .with(&a.url, classification("Programming", "Work/Programming", 1.0));
        let settings = Settings {
            threshold: 0.8,
            ..Settings::default()
        };

        let err = classify_queue(&fixture.pipeline(&classifier, &settings), &[a.clone(), b], None)
            .await
            .unwrap_err();
        assert!(err.is_activation_required());
        assert_eq!(lock_state(&fixture.state).counts.auto, 1);

        fixture.mutator.undo_last().await.unwrap();
        let node = fixture.store.get(&a.id).await.unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some(OTHER_BOOKMARKS_ID));
    }

    #[tokio::test]
    async fn deleted_bookmark_is_skipped_silently() {
        let fixture = Fixture::new();
        let a = fixture.add("repo", "https://github.com/a");
        fixture.store.remove(&a.id).await.unwrap();
        let classifier = ScriptedClassifier::unavailable()
            .with(&a.url, classification("Programming", "Work/Programming", 1.0));
        let settings = Settings {
            threshold: 0.8,
            ..Settings::default()
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let counts = classify_queue(&fixture.pipeline(&classifier, &settings), &[a], Some(&tx))
            .await
            .unwrap();
        assert_eq!(counts.auto, 1);
        assert_eq!(counts.errors, 0);
        assert!(matches!(
            rx.try_recv(),
            Ok(ProgressEvent::Item(ItemProgress {
                status: ItemStatus::Vanished { .. },
                ..
            }))
        ));
        assert!(fixture.mutator.last_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn live_title_is_kept_when_renaming_is_off() {
        let fixture = Fixture::new();
        let item = fixture.add("scan title", "https://github.com/x/y");
        fixture
            .store
            .update_title(&item.id, "user renamed")
            .await
            .unwrap();
        let classifier = ScriptedClassifier::unavailable()
            .with(&item.url, classification("Programming", "Work/Programming", 1.0));
        let settings = Settings {
            threshold: 0.8,
            auto_rename: false,
            ..Settings::default()
        };

        let counts = classify_queue(&fixture.pipeline(&classifier, &settings), &[item.clone()], None)
            .await
            .unwrap();
        assert_eq!(counts.auto, 1);
        let node = fixture.store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(node.title, "user renamed");
        assert_ne!(node.parent_id.as_deref(), Some(OTHER_BOOKMARKS_ID));

        fixture.mutator.undo_last().await.unwrap();
        let node = fixture.store.get(&item.id).await.unwrap().unwrap();
        assert_eq!(node.title, "user renamed");
    }

    #[test]
    fn rename_title_is_empty_unless_a_new_title_was_proposed() {
        let item = BookmarkItem::new("1", "Same", "https://github.com/x", "2");
        let settings = Settings::default();
        assert!(evaluate_item(&item, None, &settings).rename_title.is_empty());

        let mut same = classification("Programming", "Work/Programming", 1.0);
        same.rename_title = "Same".to_string();
        assert!(evaluate_item(&item, Some(same), &settings).rename_title.is_empty());

        let proposed = classification("Programming", "Work/Programming", 1.0);
        assert_eq!(
            evaluate_item(&item, Some(proposed.clone()), &settings).rename_title,
            "Programming bookmark"
        );
        let off = Settings {
            auto_rename: false,
            ..Settings::default()
        };
        assert!(evaluate_item(&item, Some(proposed), &off).rename_title.is_empty());
    }
}

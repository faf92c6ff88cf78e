//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{OracleError, StoreError};
use crate::models::bookmark::{BookmarkItem, BookmarkNode};
use crate::models::classification::Classification;
use crate::services::bookmark_store::{BookmarkStore, CreateBookmark, MemoryBookmarkStore};
use crate::services::oracle_service::{Availability, Classifier, LanguageModel, PromptSession};

pub fn classification(topic: &str, folder: &str, confidence: f64) -> Classification {
    Classification {
        topic: topic.to_string(),
        suggested_folder: folder.to_string(),
        tags: vec![topic.to_lowercase()],
        rename_title: format!("{topic} bookmark"),
        confidence,
        reasons: vec!["scripted".to_string()],
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Answers from a URL table. Unknown URLs fail with the configured error.
pub struct ScriptedClassifier {
    by_url: HashMap<String, Classification>,
    single_error: OracleError,
    batch_error: Option<OracleError>,
    title: Option<String>,
    gate: Mutex<Option<Arc<Notify>>>,
    classified: Mutex<Vec<String>>,
    batch_calls: AtomicUsize,
}

impl ScriptedClassifier {
    fn with_errors(single_error: OracleError, batch_error: Option<OracleError>) -> Self {
        Self {
            by_url: HashMap::new(),
            single_error,
            batch_error,
            title: None,
            gate: Mutex::new(None),
            classified: Mutex::new(Vec::new()),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self::with_errors(OracleError::Unavailable("scripted".to_string()), None)
    }

    pub fn activation_required() -> Self {
        Self::with_errors(
            OracleError::ActivationRequired,
            Some(OracleError::ActivationRequired),
        )
    }

    pub fn with(mut self, url: &str, classification: Classification) -> Self {
        self.by_url.insert(url.to_string(), classification);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn failing_batches(mut self, error: OracleError) -> Self {
        self.batch_error = Some(error);
        self
    }

    /// The first batch call waits for `gate` before answering.
    pub fn gated(self, gate: Arc<Notify>) -> Self {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn classified_urls(&self) -> Vec<String> {
        self.classified.lock().unwrap().clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify_one(
        &self,
        item: &BookmarkItem,
        _content: Option<&str>,
    ) -> Result<Classification, OracleError> {
        self.classified.lock().unwrap().push(item.url.clone());
        self.by_url
            .get(&item.url)
            .cloned()
            .ok_or_else(|| self.single_error.clone())
    }

    async fn classify_batch(
        &self,
        items: &[BookmarkItem],
    ) -> Result<Vec<Option<Classification>>, OracleError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = &self.batch_error {
            return Err(error.clone());
        }
        let mut classified = self.classified.lock().unwrap();
        Ok(items
            .iter()
            .map(|item| {
                classified.push(item.url.clone());
                self.by_url.get(&item.url).cloned()
            })
            .collect())
    }

    async fn improve_title(&self, _title: &str, _url: &str) -> Result<String, OracleError> {
        self.title
            .clone()
            .ok_or_else(|| OracleError::Unavailable("no title scripted".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

pub enum ScriptedReply {
    Text(String),
    Fail(OracleError),
}

#[derive(Default)]
struct ModelLog {
    replies: VecDeque<ScriptedReply>,
    prompts: Vec<String>,
}

pub struct ScriptedModel {
    availability: Availability,
    log: Arc<Mutex<ModelLog>>,
    sessions: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(availability: Availability, replies: Vec<ScriptedReply>) -> Self {
        Self {
            availability,
            log: Arc::new(Mutex::new(ModelLog {
                replies: replies.into(),
                prompts: Vec::new(),
            })),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.log.lock().unwrap().prompts.clone()
    }
}

struct ScriptedSession {
    log: Arc<Mutex<ModelLog>>,
}

#[async_trait]
impl PromptSession for ScriptedSession {
    async fn prompt(
        &self,
        prompt: &str,
        _schema: Option<&serde_json::Value>,
    ) -> Result<String, OracleError> {
        let mut log = self.log.lock().unwrap();
        log.prompts.push(prompt.to_string());
        match log.replies.pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(error)) => Err(error),
            None => Err(OracleError::ClassificationFailed("no reply scripted".to_string())),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn availability(&self) -> Availability {
        self.availability
    }

    async fn create_session(&self) -> Result<Arc<dyn PromptSession>, OracleError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            log: self.log.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Bookmark store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetTree,
    Create,
    Move,
    Update,
    Remove,
}

/// [`MemoryBookmarkStore`] that fails selected operations. A failure
/// registered for an id applies to the node being mutated, or to the
/// parent for creates.
pub struct FlakyStore {
    inner: MemoryBookmarkStore,
    failing: Mutex<HashSet<(StoreOp, Option<String>)>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryBookmarkStore) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: StoreOp) {
        self.failing.lock().unwrap().insert((op, None));
    }

    pub fn fail_for(&self, op: StoreOp, id: &str) {
        self.failing.lock().unwrap().insert((op, Some(id.to_string())));
    }

    fn check(&self, op: StoreOp, id: &str) -> Result<(), StoreError> {
        let failing = self.failing.lock().unwrap();
        if failing.contains(&(op, None)) || failing.contains(&(op, Some(id.to_string()))) {
            return Err(StoreError::failed("scripted", id, format!("{op:?} disabled")));
        }
        Ok(())
    }
}

#[async_trait]
impl BookmarkStore for FlakyStore {
    async fn get_tree(&self) -> Result<Vec<BookmarkNode>, StoreError> {
        self.check(StoreOp::GetTree, "")?;
        self.inner.get_tree().await
    }

    async fn get(&self, id: &str) -> Result<Option<BookmarkNode>, StoreError> {
        self.inner.get(id).await
    }

    async fn search_title(&self, title: &str) -> Result<Vec<BookmarkNode>, StoreError> {
        self.inner.search_title(title).await
    }

    async fn create(&self, request: CreateBookmark) -> Result<BookmarkNode, StoreError> {
        self.check(StoreOp::Create, &request.parent_id)?;
        self.inner.create(request).await
    }

    async fn move_node(&self, id: &str, parent_id: &str) -> Result<BookmarkNode, StoreError> {
        self.check(StoreOp::Move, id)?;
        self.inner.move_node(id, parent_id).await
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<BookmarkNode, StoreError> {
        self.check(StoreOp::Update, id)?;
        self.inner.update_title(id, title).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.check(StoreOp::Remove, id)?;
        self.inner.remove(id).await
    }
}

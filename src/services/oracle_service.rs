use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::OracleError;
use crate::models::bookmark::BookmarkItem;
use crate::models::classification::{
    truncate_title, Classification, RawClassification, MAX_REASONS, MAX_TAGS,
};

const MAX_CONTENT_CHARS: usize = 500;

/// Model availability as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Unavailable,
    /// Model can be fetched, but only after a user gesture.
    Downloadable,
    /// Fetch already under way.
    Downloading,
    Available,
}

/// A prompt-capable session on the local model.
#[async_trait]
pub trait PromptSession: Send + Sync {
    /// Runs one prompt. When `schema` is set the backend constrains its
    /// output to that JSON schema.
    async fn prompt(
        &self,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<String, OracleError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn availability(&self) -> Availability;

    async fn create_session(&self) -> Result<Arc<dyn PromptSession>, OracleError>;
}

/// The classification seam the pipeline depends on.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_one(
        &self,
        item: &BookmarkItem,
        content: Option<&str>,
    ) -> Result<Classification, OracleError>;

    /// One slot per input item; `None` marks an item the oracle skipped or
    /// answered with an invalid record.
    async fn classify_batch(
        &self,
        items: &[BookmarkItem],
    ) -> Result<Vec<Option<Classification>>, OracleError>;

    async fn improve_title(&self, title: &str, url: &str) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// Prompts and schemas
// ---------------------------------------------------------------------------

fn classification_properties() -> serde_json::Value {
    json!({
        "topic": { "type": "string" },
        "suggestedFolder": { "type": "string" },
        "tags": {
            "type": "array",
            "items": { "type": "string" },
            "minItems": 1,
            "maxItems": MAX_TAGS,
        },
        "renameTitle": { "type": "string" },
        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
        "reasons": {
            "type": "array",
            "items": { "type": "string" },
            "minItems": 1,
            "maxItems": MAX_REASONS,
        },
    })
}

const REQUIRED_FIELDS: [&str; 6] = [
    "topic",
    "suggestedFolder",
    "tags",
    "renameTitle",
    "confidence",
    "reasons",
];

pub fn classification_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": REQUIRED_FIELDS,
        "properties": classification_properties(),
    })
}

pub fn batch_schema() -> serde_json::Value {
    let mut properties = classification_properties();
    properties["index"] = json!({ "type": "number" });
    let mut required = vec!["index"];
    required.extend(REQUIRED_FIELDS);
    json!({
        "type": "object",
        "required": ["results"],
        "properties": {
            "results": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": required,
                    "properties": properties,
                },
            },
        },
    })
}

pub fn build_classification_prompt(title: &str, url: &str, content: Option<&str>) -> String {
    let mut prompt = format!(
        "Analyze this bookmark and classify it for smart organization. Return JSON only.\n\n\
         URL: {url}\nTitle: {title}\n"
    );
    if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
        let preview: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        prompt.push_str(&format!("Content preview: {preview}\n"));
    }
    prompt.push_str(
        "\nLook at the URL domain and title to understand what this bookmark is for.\n\
         Create a logical 2-level folder structure like:\n\
         - Work/Programming, Work/Design, Work/Business\n\
         - Learning/Courses, Learning/Programming, Learning/Research\n\
         - Entertainment/Videos, Entertainment/Social, Entertainment/Games\n\
         - Shopping/Electronics, Shopping/Services\n\
         - Reference/Documentation, Reference/News\n\
         - Personal/Finance, Personal/Health, Personal/Travel\n\
         Be specific and avoid generic \"General\" folders.\n\n\
         Return JSON with:\n\
         - topic: the specific category (e.g. \"Programming\", \"Videos\", \"Courses\")\n\
         - suggestedFolder: two-level path (e.g. \"Work/Programming\")\n\
         - tags: 1-6 relevant tags for search\n\
         - renameTitle: improved title (max 60 chars)\n\
         - confidence: 0-1 how confident you are\n\
         - reasons: 1-3 brief reasons",
    );
    prompt
}

pub fn build_batch_prompt(items: &[BookmarkItem]) -> String {
    let listing: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{i}: URL: {} | Title: {}", item.url, item.title))
        .collect();
    format!(
        "Analyze these {count} bookmarks and classify each for smart organization. Return JSON only.\n\n\
         Bookmarks:\n{list}\n\n\
         Create logical 2-level folder structures. Be specific and avoid generic \"General\" folders.\n\
         Examples: Work/Programming, Learning/Courses, Entertainment/Videos, Shopping/Electronics\n\n\
         Return JSON with a results array containing for each bookmark:\n\
         - index: bookmark number (0-{last})\n\
         - topic: main category only (Work, Learning, Entertainment, Shopping, Reference, Personal)\n\
         - suggestedFolder: simple path like \"Work/Programming\"\n\
         - tags: 1-6 relevant tags for search\n\
         - renameTitle: improved title (max 60 chars)\n\
         - confidence: 0-1 how confident you are\n\
         - reasons: 1-3 brief reasons",
        count = items.len(),
        list = listing.join("\n"),
        last = items.len().saturating_sub(1),
    )
}

pub fn build_title_prompt(title: &str, url: &str) -> String {
    format!(
        "Improve this bookmark title to be more descriptive and organized. Keep it under 60 characters.\n\n\
         Original title: \"{title}\"\nURL: {url}\n\n\
         Remove generic words like \"Home\" or \"Welcome\". Focus on the main purpose or content. \
         Reply with the title only."
    )
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Pulls a JSON document out of a response that may wrap it in a code fence
/// or surrounding prose.
pub fn extract_json_payload(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed.to_string());
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|idx| idx + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }

    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    (last > first).then(|| trimmed[first..=last].to_string())
}

pub fn parse_classification(text: &str) -> Result<Classification, OracleError> {
    let payload = extract_json_payload(text)
        .ok_or_else(|| OracleError::ClassificationFailed("no JSON in response".to_string()))?;
    let raw: RawClassification = serde_json::from_str(&payload)
        .map_err(|e| OracleError::ClassificationFailed(format!("malformed JSON: {e}")))?;
    Classification::try_from(raw)
}

#[derive(Debug, Deserialize)]
struct RawBatchEntry {
    index: f64,
    #[serde(flatten)]
    classification: RawClassification,
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Maps indexed batch results back onto `expected` slots. Entries with a bad
/// index or an invalid payload leave their slot empty; the first valid entry
/// for an index wins.
pub fn parse_batch(text: &str, expected: usize) -> Result<Vec<Option<Classification>>, OracleError> {
    let payload = extract_json_payload(text)
        .ok_or_else(|| OracleError::ClassificationFailed("no JSON in batch response".to_string()))?;
    let raw: RawBatch = serde_json::from_str(&payload)
        .map_err(|e| OracleError::ClassificationFailed(format!("malformed batch JSON: {e}")))?;

    let mut slots: Vec<Option<Classification>> = vec![None; expected];
    for value in raw.results {
        let entry: RawBatchEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("dropping unreadable batch entry: {e}");
                continue;
            }
        };
        if entry.index < 0.0 || entry.index.fract() != 0.0 {
            continue;
        }
        let idx = entry.index as usize;
        if idx >= expected || slots[idx].is_some() {
            continue;
        }
        match Classification::try_from(entry.classification) {
            Ok(classification) => slots[idx] = Some(classification),
            Err(e) => debug!("dropping invalid batch entry {idx}: {e}"),
        }
    }
    Ok(slots)
}

pub fn clean_title(text: &str) -> Result<String, OracleError> {
    let title = truncate_title(text.trim().trim_matches(|c| c == '"' || c == '\''));
    if title.is_empty() {
        return Err(OracleError::ClassificationFailed(
            "empty title suggestion".to_string(),
        ));
    }
    Ok(title)
}

// ---------------------------------------------------------------------------
// Prompt-backed oracle
// ---------------------------------------------------------------------------

/// [`Classifier`] over a local language model. One session is created on
/// first use and reused for every later call.
pub struct PromptOracle {
    model: Arc<dyn LanguageModel>,
    session: Mutex<Option<Arc<dyn PromptSession>>>,
    user_activation: AtomicBool,
}

impl PromptOracle {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            session: Mutex::new(None),
            user_activation: AtomicBool::new(false),
        }
    }

    /// Records that the user has interacted, allowing a model download.
    pub fn grant_user_activation(&self) {
        self.user_activation.store(true, Ordering::Relaxed);
    }

    pub async fn availability(&self) -> Availability {
        self.model.availability().await
    }

    async fn ensure_session(&self) -> Result<Arc<dyn PromptSession>, OracleError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        match self.model.availability().await {
            Availability::Unavailable => {
                return Err(OracleError::Unavailable(
                    "prompt model unavailable on this device".to_string(),
                ));
            }
            Availability::Downloadable if !self.user_activation.load(Ordering::Relaxed) => {
                return Err(OracleError::ActivationRequired);
            }
            _ => {}
        }

        let session = self.model.create_session().await?;
        info!("classification session created");
        *guard = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl Classifier for PromptOracle {
    async fn classify_one(
        &self,
        item: &BookmarkItem,
        content: Option<&str>,
    ) -> Result<Classification, OracleError> {
        let session = self.ensure_session().await?;
        let prompt = build_classification_prompt(&item.title, &item.url, content);
        let response = session.prompt(&prompt, Some(&classification_schema())).await?;
        parse_classification(&response).inspect_err(|e| {
            warn!("classification of {} failed: {e}", item.url);
        })
    }

    async fn classify_batch(
        &self,
        items: &[BookmarkItem],
    ) -> Result<Vec<Option<Classification>>, OracleError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.ensure_session().await?;
        let prompt = build_batch_prompt(items);
        let response = session.prompt(&prompt, Some(&batch_schema())).await?;
        parse_batch(&response, items.len())
    }

    async fn improve_title(&self, title: &str, url: &str) -> Result<String, OracleError> {
        let session = self.ensure_session().await?;
        let response = session.prompt(&build_title_prompt(title, url), None).await?;
        clean_title(&response)
    }
}

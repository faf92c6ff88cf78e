use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::models::bookmark::BookmarkItem;

pub const MAX_TAGS: usize = 6;
pub const MAX_REASONS: usize = 3;
pub const MAX_TITLE_CHARS: usize = 60;

/// A validated classification. Oracle output only becomes one of these
/// through [`Classification::try_from`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub topic: String,
    pub suggested_folder: String,
    pub tags: Vec<String>,
    pub rename_title: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl Classification {
    /// Copy with the folder fields rewritten; everything else is kept.
    pub fn with_folder(&self, topic: impl Into<String>, suggested_folder: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            suggested_folder: suggested_folder.into(),
            ..self.clone()
        }
    }
}

/// Oracle payload as it comes off the wire, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClassification {
    pub topic: Option<String>,
    pub suggested_folder: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub rename_title: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasons: Vec<String>,
}

fn required(field: Option<String>, name: &str) -> Result<String, OracleError> {
    field
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OracleError::ClassificationFailed(format!("missing field {name}")))
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

pub fn truncate_title(title: &str) -> String {
    title.trim().chars().take(MAX_TITLE_CHARS).collect()
}

impl TryFrom<RawClassification> for Classification {
    type Error = OracleError;

    fn try_from(raw: RawClassification) -> Result<Self, Self::Error> {
        let topic = required(raw.topic, "topic")?;
        let suggested_folder = required(raw.suggested_folder, "suggestedFolder")?;
        let rename_title = truncate_title(&required(raw.rename_title, "renameTitle")?);

        let tags = clean_list(raw.tags);
        if tags.is_empty() || tags.len() > MAX_TAGS {
            return Err(OracleError::ClassificationFailed(format!(
                "expected 1-{MAX_TAGS} tags, got {}",
                tags.len()
            )));
        }

        let reasons = clean_list(raw.reasons);
        if reasons.is_empty() || reasons.len() > MAX_REASONS {
            return Err(OracleError::ClassificationFailed(format!(
                "expected 1-{MAX_REASONS} reasons, got {}",
                reasons.len()
            )));
        }

        let confidence = raw
            .confidence
            .ok_or_else(|| OracleError::ClassificationFailed("missing field confidence".to_string()))?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OracleError::ClassificationFailed(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        Ok(Self {
            topic,
            suggested_folder,
            tags,
            rename_title,
            confidence,
            reasons,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Auto,
    Review,
    Skip,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Review => write!(f, "review"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Per-bookmark metadata persisted under `meta:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkMeta {
    pub topic: String,
    pub tags: Vec<String>,
    pub reasons: Vec<String>,
    pub confidence: f64,
    pub ai_classified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_organized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organized_at: Option<i64>,
}

/// A scanned bookmark with its routing outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkData {
    #[serde(flatten)]
    pub item: BookmarkItem,
    pub suggested_folder: String,
    pub rename_title: String,
    pub confidence: f64,
    pub meta: BookmarkMeta,
    pub decision: Decision,
}

impl BookmarkData {
    pub fn id(&self) -> &str {
        &self.item.id
    }
}

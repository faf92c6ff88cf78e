//! Bookmark auto-organizer core: scans a bookmark tree, classifies each
//! bookmark through a language-model oracle with a URL heuristic fallback,
//! and files it into topic folders with reversible snapshots.

pub mod commands;
pub mod data;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_support;

pub use commands::organize_commands::{Organizer, SmartSaveResult};
pub use commands::processing_controller::{ProcessingController, RunOutcome};
pub use data::repository::{KeyValueStore, SqliteKeyValueStore};
pub use error::{AppError, OracleError, StoreError};
pub use models::bookmark::{BookmarkItem, BookmarkNode};
pub use models::settings::Settings;
pub use services::bookmark_store::{BookmarkStore, MemoryBookmarkStore};
pub use services::oracle_service::{Classifier, LanguageModel, PromptOracle, PromptSession};
pub use state::{ProgressEvent, ProgressSender};

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "tidymarks=info";

/// Installs a fmt subscriber filtered by `RUST_LOG`. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

use serde::Serialize;

/// Failures of the classification oracle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Classification oracle unavailable: {0}")]
    Unavailable(String),

    #[error("User interaction required before the model can be used")]
    ActivationRequired,

    #[error("Classification failed: {0}")]
    ClassificationFailed(String),
}

/// Failures of the external bookmark store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Bookmark store {op} failed for {id}: {message}")]
    OperationFailed {
        op: &'static str,
        id: String,
        message: String,
    },

    #[error("Could not resolve folder path {0}")]
    PathResolutionFailed(String),
}

impl StoreError {
    pub fn failed(op: &'static str, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            op,
            id: id.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Processing already in progress")]
    AlreadyRunning,

    #[error("No stopped run to resume")]
    NothingToResume,

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("No original state found. Cannot reset.")]
    NoOriginalState,

    #[error("{0}")]
    General(String),
}

impl AppError {
    /// True when the run must halt and wait for a user gesture.
    pub fn is_activation_required(&self) -> bool {
        matches!(self, Self::Oracle(OracleError::ActivationRequired))
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

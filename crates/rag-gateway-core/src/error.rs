//! Error taxonomy shared by every RAG Gateway component.
//!
//! Components return [`RagError`] to their immediate caller. Only the
//! generation orchestrator turns an error into a decision (abort the
//! stream or degrade to an unaugmented prompt); everything else
//! propagates with `?`.
//!
//! Provider adapters report the narrower [`ProviderError`], which tells
//! the embedding and generation clients whether a retry is worthwhile.

use std::time::Duration;

/// Result alias used throughout the core and app crates.
pub type Result<T> = std::result::Result<T, RagError>;

/// Typed failure of a RAG Gateway operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RagError {
    /// Malformed input: empty prompt, missing collection name, and so on.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("collection already exists: {name}")]
    CollectionAlreadyExists { name: String },

    /// The embedding provider failed after retries were exhausted.
    #[error("embedding provider error: {message}")]
    EmbeddingProvider {
        message: String,
        /// The last underlying provider failure.
        cause: Option<ProviderError>,
    },

    #[error("generation provider error: {0}")]
    GenerationProvider(String),

    /// The vector index or collection catalog backend failed.
    #[error("store error: {0}")]
    Store(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// A primary ingestion failure whose compensating delete also failed.
    ///
    /// The document may have partial chunks in the index and needs operator
    /// attention.
    #[error(
        "ingestion of document '{document_id}' failed ({cause}) and rollback also failed ({rollback})"
    )]
    IngestionRollback {
        document_id: String,
        cause: String,
        rollback: String,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl RagError {
    pub fn validation(message: impl Into<String>) -> Self {
        RagError::Validation(message.into())
    }

    pub fn store(message: impl std::fmt::Display) -> Self {
        RagError::Store(message.to_string())
    }

    pub fn collection_not_found(name: impl Into<String>) -> Self {
        RagError::CollectionNotFound { name: name.into() }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        RagError::Timeout {
            operation: operation.into(),
            secs: after.as_secs(),
        }
    }

    /// Machine-readable code used in HTTP error bodies and stream error frames.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "bad_request",
            RagError::Configuration(_) => "configuration",
            RagError::CollectionNotFound { .. } => "not_found",
            RagError::CollectionAlreadyExists { .. } => "already_exists",
            RagError::EmbeddingProvider { .. } => "embedding_provider",
            RagError::GenerationProvider(_) => "generation_provider",
            RagError::Store(_) => "store",
            RagError::Timeout { .. } => "timeout",
            RagError::IngestionRollback { .. } => "ingestion_rollback",
            RagError::Cancelled => "cancelled",
        }
    }
}

/// Failure reported by an external provider adapter for a single call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Rate limit, 5xx, or connection failure. Worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Bad request, auth failure, or malformed response. Retrying will not help.
    #[error("provider rejected request: {0}")]
    Permanent(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }
}

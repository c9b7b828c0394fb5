//! Error types for RagBuddy
//!
//! One error enum for the whole retrieval/generation core. Callers branch on
//! [`RagError::kind`] to tell "nothing there yet" apart from "something broke".

use thiserror::Error;

/// Coarse classification of a [`RagError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal misconfiguration: aborts startup or the operation
    Configuration,
    /// An outbound service (embedding, generation) failed
    Dependency,
    /// The requested index, conversation or scope does not exist
    NotFound,
    /// The caller supplied something the core cannot handle
    InvalidInput,
}

/// Main error type for the RAG core
#[derive(Error, Debug)]
pub enum RagError {
    /// Generic configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Embedding dimension does not match the index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// Prompt template lookup failed
    #[error("Prompt template not found: {0}")]
    TemplateNotFound(String),

    /// Prompt template references a value nobody supplied
    #[error("Prompt template '{template}' is missing a value for placeholder '{key}'")]
    MissingPlaceholder { template: String, key: String },

    /// Embedding service failure; the whole batch is aborted
    #[error("Embedding failed for {} input(s): {message}", failed_inputs.len())]
    Embedding {
        message: String,
        failed_inputs: Vec<usize>,
        retryable: bool,
    },

    /// Language model call failed
    #[error("Generation error: {0}")]
    Generation(String),

    /// Streaming transport errors
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Missing index snapshot, conversation, source...
    #[error("Not found: {0}")]
    NotFound(String),

    /// Knowledge-base scope matched nothing in the index
    #[error("No indexed source matches the requested scope ({requested} source(s) requested)")]
    ScopeNotFound { requested: usize },

    /// File type the loader cannot read
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Document could not be turned into text
    #[error("Failed to load document {path}: {message}")]
    DocumentLoad { path: String, message: String },

    /// Query state machine received an event it cannot accept
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// Snapshot on disk is unreadable
    #[error("Corrupt index snapshot: {0}")]
    CorruptSnapshot(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors with context
    #[error("RAG error: {0}")]
    Generic(String),
}

impl RagError {
    /// Classify the error for caller branching
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Configuration(_)
            | RagError::Dimension { .. }
            | RagError::TemplateNotFound(_)
            | RagError::MissingPlaceholder { .. }
            | RagError::CorruptSnapshot(_) => ErrorKind::Configuration,
            RagError::Embedding { .. }
            | RagError::Generation(_)
            | RagError::Streaming(_)
            | RagError::HttpError(_) => ErrorKind::Dependency,
            RagError::NotFound(_) | RagError::ScopeNotFound { .. } => ErrorKind::NotFound,
            RagError::UnsupportedFileType(_)
            | RagError::DocumentLoad { .. }
            | RagError::InvalidTransition { .. } => {
                ErrorKind::InvalidInput
            }
            RagError::SerializationError(_) | RagError::IoError(_) | RagError::Generic(_) => {
                ErrorKind::Dependency
            }
        }
    }

    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Embedding { retryable, .. } => *retryable,
            RagError::HttpError(e) => e.is_timeout() || e.is_connect(),
            RagError::Streaming(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for RAG operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Convert anyhow errors to RagError
impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Generic(err.to_string())
    }
}

//! Error types for the engine components

use thiserror::Error;

/// Errors reported by the message store.
///
/// Open, prepare, execute and insert failures are kept apart so callers can
/// tell a broken database from a single bad row.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to prepare statement: {0}")]
    Prepare(#[source] rusqlite::Error),

    #[error("failed to execute statement: {0}")]
    Execute(#[source] rusqlite::Error),

    #[error("failed to insert {what}: {source}")]
    Insert {
        what: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Errors reported by the embedding provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    /// The provider could not be initialized or its worker is gone.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// A single text could not be embedded.
    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Errors that abort an indexing run.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("an indexing run is already in progress")]
    AlreadyRunning,

    #[error("source discovery failed: {0}")]
    Probe(#[source] anyhow::Error),
}

/// Errors that abort a pattern detection run.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("a pattern detection run is already in progress")]
    AlreadyRunning,
}

/// Errors reported by similarity search.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

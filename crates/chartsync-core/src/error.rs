//! Error types for chartsync-core

use thiserror::Error;

/// Result type alias using chartsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chartsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Generic persisted-store failure
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The persisted store cannot be reached; durability cannot be guaranteed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sync was requested while the client is offline
    #[error("Cannot sync while offline")]
    Offline,

    /// Operation requires that no sync pass is running
    #[error("A sync pass is already in progress")]
    SyncInProgress,

    /// A caller joined an in-flight pass which then failed
    #[error("Joined sync pass failed: {0}")]
    JoinedSyncFailed(String),

    /// A critical-priority item exhausted its retries
    #[error("Critical item {item_id} ({resource}) failed permanently: {message}")]
    CriticalItemFailed {
        item_id: String,
        resource: String,
        message: String,
    },
}

impl Error {
    /// Whether this error means the persisted store itself is failing.
    pub const fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Sqlite(_) | Self::StoreUnavailable(_) | Self::Io(_)
        )
    }
}

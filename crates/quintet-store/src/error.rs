use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No platform data directory to put the default database in.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No message with the requested id.
    #[error("Message not found")]
    NotFound,

    #[error("Schema migration to version {version} failed: {source}")]
    Migration {
        version: u32,
        source: rusqlite::Error,
    },

    /// A reply quote could not be encoded for its column.
    #[error("Quote encoding error: {0}")]
    Quote(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

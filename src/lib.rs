//! # mediacache - Persistent metadata cache for a media server
//!
//! Stores expensive-to-recompute scan results (codecs, durations, fetched
//! metadata, thumbnails) in an embedded SQLite store and keeps the on-disk
//! schema in step with the application version.
//!
//! mediacache provides:
//! - A session provider that opens the store and recovers from damaged or
//!   outdated store files
//! - A per-table version registry and migration engine
//! - Per-table read/write locks with a global acquisition order
//! - A generic upsert protocol keeping one row per logical key
//! - A referential cleanup sweep for rows whose parents are gone
//! - A content-addressed dedup store for thumbnails

pub mod cache;
pub mod config;
pub mod context;
pub mod dedup;
pub mod guard;
pub mod media;
pub mod migration;
pub mod status;
pub mod storage;
pub mod sweep;
pub mod ui;
pub mod upsert;
pub mod value;

use std::path::PathBuf;

// Re-exports for convenient access
pub use cache::{CacheStats, MediaCache};
pub use config::{CacheConfig, RetryPolicy};
pub use context::CacheContext;
pub use guard::LockRegistry;
pub use migration::{MigrationEngine, MigrationPlan, TableDescriptor, UpgradeOutcome};
pub use status::{StatusMessage, StatusSink};
pub use storage::{OpenOutcome, RetryInstruction, Session, SessionProvider};
pub use value::{ColumnKind, Record, Value};

/// Result type alias for mediacache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for mediacache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing table upgrade commands for {table} from version {from} to {target}")]
    MissingMigrationStep { table: String, from: u32, target: u32 },

    #[error("Table {table} could not be recreated after a failed upgrade: {source}")]
    RecreateFailed {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Read lock on {0} cannot be upgraded to a write lock; release it first")]
    LockUpgrade(String),

    #[error("Duplicate key in {table}: {message}")]
    DuplicateKey { table: String, message: String },

    #[error(
        "Damaged cache can't be deleted. Stop the program and delete the folder \"{}\" manually",
        path.display()
    )]
    StoreDeletionBlocked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store could not be opened after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Table dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Invalid record for {table}: {message}")]
    InvalidRecord { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Busy, locked and I/O failures that a later attempt may not hit again
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy)
                    | Some(rusqlite::ErrorCode::DatabaseLocked)
                    | Some(rusqlite::ErrorCode::SystemIoFailure)
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

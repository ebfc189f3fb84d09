//! Store error handling
//!
//! Every failure surfaced by the store is one of these variants. Backend
//! errors are wrapped with the operation and model kind that produced them.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum Error {
    /// The model located by primary key does not exist
    #[error("{kind} '{pk}' not found")]
    NotFound { kind: &'static str, pk: String },

    /// Commit/End called on a transaction that is not the store's active one
    #[error("transaction not valid")]
    TransactionInvalid,

    /// The calling thread already holds the write lease
    #[error("write lease {lease} is already held by the calling thread")]
    LeaseHeld { lease: u64 },

    /// Gave up waiting for the write lease
    #[error("timed out after {0:?} waiting for the write lease")]
    LeaseTimeout(Duration),

    /// Relational mapping failure (bad schema, constraint violation, I/O)
    #[error("{op} {kind} failed: {source}")]
    Mapping {
        op: &'static str,
        kind: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Model registration is unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A list predicate or sort references something the model doesn't have
    #[error("invalid predicate: {0}")]
    Predicate(String),

    /// Operation on a store that is not open
    #[error("store is not open")]
    Closed,

    /// Configuration file could not be read or parsed
    #[error("failed to load configuration from '{path}': {details}")]
    Config { path: PathBuf, details: String },

    /// A queued watch could not start its delivery thread
    #[error("failed to start watch delivery thread: {0}")]
    Spawn(#[source] io::Error),

    /// File system failure while opening or purging the backing file
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Wrap a backend error with the operation that produced it
    pub fn mapping(op: &'static str, kind: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Error::Mapping { op, kind, source }
    }

    /// True when the error means the target row is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True when the backend reported a constraint violation
    pub fn is_constraint(&self) -> bool {
        match self {
            Error::Mapping {
                source: rusqlite::Error::SqliteFailure(e, _),
                ..
            } => e.code == rusqlite::ErrorCode::ConstraintViolation,
            _ => false,
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the attendance store.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("database migration failed: {message}")]
    Migration { message: String },

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("student '{0}' is already registered")]
    StudentExists(String),

    #[error("no student registered as '{0}'")]
    StudentNotFound(String),

    #[error("no class session with id {0}")]
    SessionNotFound(i64),

    #[error("{student_id} is already marked present for session {session_id}")]
    AlreadyMarked { student_id: String, session_id: i64 },

    #[error("confidence {0} is outside 0..=100")]
    InvalidConfidence(u8),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

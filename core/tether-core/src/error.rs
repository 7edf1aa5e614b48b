//! Error types for tether-core operations.
//!
//! Reads never produce these: corrupted or missing state degrades to empty
//! values. Errors surface only from writes and from explicit requests that
//! cannot be answered.

use std::path::PathBuf;

/// All errors that can occur in tether-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Lock Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Lock for session {session_id} is held by live pid {pid}")]
    LockHeld { session_id: String, pid: u32 },

    #[error("Lock for session {session_id} is being created by another process")]
    LockPending { session_id: String },

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    // ─────────────────────────────────────────────────────────────────────
    // Resolution Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Not resolvable: {path:?}: {reason}")]
    NotResolvable { path: String, reason: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] tether_protocol::ErrorInfo),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TetherError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TetherError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        TetherError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using TetherError.
pub type Result<T> = std::result::Result<T, TetherError>;

//! Error types for switchboard-polling
//!
//! These are the errors *thrown* by orchestrator and storage methods.
//! Limit-derived failures (max attempts, max duration, consecutive errors)
//! are never thrown; they are written onto the session's `error` field and
//! discovered by reading session state.

use thiserror::Error;
use uuid::Uuid;

/// Polling error type
#[derive(Debug, Error)]
pub enum Error {
    /// No session with the given id
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session id collision on create
    #[error("session already exists: {0}")]
    SessionExists(Uuid),

    /// The in-process poll loop gave up after the session failed
    #[error("max attempts exceeded for session {session_id} after {attempts} attempts")]
    MaxAttemptsExceeded {
        /// The failed session
        session_id: Uuid,
        /// Poll attempts performed before giving up
        attempts: u32,
    },

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

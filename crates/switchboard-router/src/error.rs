//! Error types for switchboard-router

use thiserror::Error;

/// Router error type
#[derive(Debug, Error)]
pub enum Error {
    /// Every routing candidate was exhausted
    #[error("no available endpoint for {provider}/{model} ({skipped} candidates skipped)")]
    NoAvailableEndpoint {
        /// Provider the request originally targeted
        provider: String,
        /// Model the request originally targeted
        model: String,
        /// Number of candidates skipped by the admission filters
        skipped: usize,
    },

    /// Endpoint is not registered in the catalog
    #[error("unknown endpoint: {provider}/{model}")]
    UnknownEndpoint {
        /// Provider id
        provider: String,
        /// Model id
        model: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

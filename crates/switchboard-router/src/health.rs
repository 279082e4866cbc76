//! Per-endpoint health state
//!
//! Health is derived exclusively from reported call outcomes: an endpoint
//! transitions to unavailable after 3 consecutive failures and back to
//! available on any recorded success (or an explicit manual override).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive failures before the circuit opens
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;

/// Smoothing factor for the rolling error rate
const ERROR_RATE_ALPHA: f64 = 0.2;

/// Rolling health state for a single endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    /// Whether the endpoint is currently considered available
    pub available: bool,
    /// Latency of the last recorded call
    pub last_latency_ms: Option<u64>,
    /// When the state was last updated
    pub last_check: DateTime<Utc>,
    /// Exponentially-weighted failure fraction (0.0 – 1.0)
    pub error_rate: f64,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Message from the last failure, if any
    pub last_error: Option<String>,
}

impl ModelHealth {
    /// Fresh health state: available, no history
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: true,
            last_latency_ms: None,
            last_check: Utc::now(),
            error_rate: 0.0,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Fold one call outcome into the rolling state
    pub fn record_outcome(&mut self, latency_ms: u64, success: bool, error: Option<&str>) {
        self.last_latency_ms = Some(latency_ms);
        self.last_check = Utc::now();
        self.error_rate =
            self.error_rate * (1.0 - ERROR_RATE_ALPHA) + if success { 0.0 } else { ERROR_RATE_ALPHA };

        if success {
            self.consecutive_failures = 0;
            self.available = true;
            self.last_error = None;
        } else {
            self.consecutive_failures += 1;
            self.last_error = error.map(String::from);
            if self.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
                self.available = false;
            }
        }
    }

    /// Manual override: force available and clear the failure streak
    pub fn mark_available(&mut self) {
        self.available = true;
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_check = Utc::now();
    }

    /// Manual override: force unavailable with a reason
    pub fn mark_unavailable(&mut self, reason: impl Into<String>) {
        self.available = false;
        self.last_error = Some(reason.into());
        self.last_check = Utc::now();
    }

    /// Whether the circuit is open (routing should skip this endpoint)
    #[must_use]
    pub fn circuit_open(&self) -> bool {
        !self.available || self.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD
    }
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-endpoint rate-limit windows
//!
//! Each endpoint gets a fixed 60-second window of request/token counters.
//! The window resets lazily: any mutation first checks whether the window
//! has aged out. Admission checks read the counters without mutating them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Window size for request/token counting
pub const WINDOW_MS: i64 = 60_000;

/// Request/token counters for one endpoint's current window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindow {
    /// Requests recorded in the current window
    pub requests: u32,
    /// Tokens recorded in the current window
    pub tokens: u64,
    /// When the current window opened
    pub window_start: DateTime<Utc>,
}

impl RateWindow {
    /// Fresh window starting now
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: 0,
            tokens: 0,
            window_start: Utc::now(),
        }
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        now - self.window_start >= Duration::milliseconds(WINDOW_MS)
    }

    /// Record one call's request and token usage
    pub fn record(&mut self, tokens: u64) {
        let now = Utc::now();
        if self.expired(now) {
            self.requests = 0;
            self.tokens = 0;
            self.window_start = now;
        }
        self.requests += 1;
        self.tokens += tokens;
    }

    /// Whether a call of `estimated_tokens` would fit under the given
    /// ceilings. An expired window counts as empty; nothing is mutated.
    #[must_use]
    pub fn admits(
        &self,
        requests_per_minute: u32,
        tokens_per_minute: u64,
        estimated_tokens: u64,
    ) -> bool {
        let now = Utc::now();
        let (requests, tokens) = if self.expired(now) {
            (0, 0)
        } else {
            (self.requests, self.tokens)
        };
        requests < requests_per_minute && tokens + estimated_tokens <= tokens_per_minute
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut window = RateWindow::new();
        window.record(100);
        window.record(250);
        assert_eq!(window.requests, 2);
        assert_eq!(window.tokens, 350);
    }

    #[test]
    fn test_request_ceiling() {
        let mut window = RateWindow::new();
        for _ in 0..5 {
            window.record(10);
        }
        assert!(!window.admits(5, 1_000_000, 10));
        assert!(window.admits(6, 1_000_000, 10));
    }

    #[test]
    fn test_token_ceiling() {
        let mut window = RateWindow::new();
        window.record(900);
        assert!(window.admits(100, 1000, 100));
        assert!(!window.admits(100, 1000, 101));
    }

    #[test]
    fn test_expired_window_counts_as_empty() {
        let mut window = RateWindow::new();
        for _ in 0..10 {
            window.record(100);
        }
        assert!(!window.admits(10, 100_000, 0));

        // Age the window out past the 60s boundary
        window.window_start = Utc::now() - Duration::milliseconds(WINDOW_MS + 1);
        assert!(window.admits(10, 100_000, 0));

        // Next record resets the counters
        window.record(50);
        assert_eq!(window.requests, 1);
        assert_eq!(window.tokens, 50);
    }
}

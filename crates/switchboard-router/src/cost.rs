//! Spend accounting and budget gating
//!
//! Tracks accumulated and per-day spend. The daily counter rolls over at the
//! UTC-midnight boundary, detected lazily on each read or accumulation;
//! no timer drives it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Accumulated and daily spend for budget checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLedger {
    /// Total accumulated spend (USD) since construction or reset
    total_cost: f64,
    /// Spend (USD) in the current UTC day
    daily_cost: f64,
    /// The UTC day `daily_cost` belongs to
    day: NaiveDate,
}

impl CostLedger {
    /// Empty ledger anchored to the current UTC day
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_cost: 0.0,
            daily_cost: 0.0,
            day: Utc::now().date_naive(),
        }
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.daily_cost = 0.0;
            self.day = today;
        }
    }

    /// Add a realized cost to both counters
    pub fn accumulate(&mut self, cost: f64) {
        self.roll_over(Utc::now());
        self.total_cost += cost;
        self.daily_cost += cost;
    }

    /// Total accumulated spend
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total_cost
    }

    /// Spend in the current UTC day (0 if the day has rolled over)
    #[must_use]
    pub fn daily(&self) -> f64 {
        if Utc::now().date_naive() != self.day {
            0.0
        } else {
            self.daily_cost
        }
    }

    /// Whether an estimated cost passes the per-request cap and the
    /// remaining daily budget. `None` caps are unlimited.
    #[must_use]
    pub fn admits(
        &self,
        estimated_cost: f64,
        max_cost_per_request: Option<f64>,
        max_cost_per_day: Option<f64>,
    ) -> bool {
        if let Some(per_request) = max_cost_per_request {
            if estimated_cost > per_request {
                return false;
            }
        }
        if let Some(per_day) = max_cost_per_day {
            if self.daily() + estimated_cost > per_day {
                return false;
            }
        }
        true
    }

    /// Zero both counters and re-anchor to today
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_accumulate() {
        let mut ledger = CostLedger::new();
        ledger.accumulate(0.5);
        ledger.accumulate(0.25);
        assert!((ledger.total() - 0.75).abs() < 1e-9);
        assert!((ledger.daily() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_per_request_cap() {
        let ledger = CostLedger::new();
        assert!(ledger.admits(0.10, Some(0.10), None));
        assert!(!ledger.admits(0.11, Some(0.10), None));
        assert!(ledger.admits(100.0, None, None));
    }

    #[test]
    fn test_daily_budget() {
        let mut ledger = CostLedger::new();
        ledger.accumulate(9.0);
        assert!(ledger.admits(1.0, None, Some(10.0)));
        assert!(!ledger.admits(1.01, None, Some(10.0)));
    }

    #[test]
    fn test_utc_midnight_rollover() {
        let mut ledger = CostLedger::new();
        ledger.accumulate(5.0);

        // Pretend the ledger was anchored yesterday
        ledger.day = (Utc::now() - Duration::days(1)).date_naive();
        assert_eq!(ledger.daily(), 0.0);
        assert!((ledger.total() - 5.0).abs() < 1e-9);
        assert!(ledger.admits(4.0, None, Some(4.0)));

        // Accumulating re-anchors to today
        ledger.accumulate(1.0);
        assert!((ledger.daily() - 1.0).abs() < 1e-9);
        assert!((ledger.total() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut ledger = CostLedger::new();
        ledger.accumulate(3.0);
        ledger.reset();
        assert_eq!(ledger.total(), 0.0);
        assert_eq!(ledger.daily(), 0.0);
    }
}

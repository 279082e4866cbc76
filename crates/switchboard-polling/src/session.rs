//! Polling session model
//!
//! A `PollingSession` is the durable unit of polling work. Every mutation
//! goes through a storage `update` that must present the version it last
//! read (compare-and-swap); the `version` field is the sole consistency
//! mechanism across orchestrator instances.

use crate::condition::Condition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Configuration
// ============================================================================

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    100
}

fn default_max_duration_ms() -> u64 {
    300_000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_poll_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_errors() -> u32 {
    3
}

/// Per-session polling configuration. Partial input materializes to these
/// defaults through serde; programmatic callers use the `with_*` builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Base interval between attempts
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Attempt ceiling before the session fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock ceiling since `started_at` before the session expires
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    /// Interval growth factor applied after each unmet, error-free attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Interval ceiling for backoff
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Symmetric jitter fraction (0–1) applied to the scheduled interval
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Ceiling for one executor invocation
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Whether executor errors keep the session alive
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    /// Consecutive-error ceiling before the session fails
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
            max_duration_ms: default_max_duration_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_ms: default_max_interval_ms(),
            jitter: default_jitter(),
            poll_timeout_ms: default_poll_timeout_ms(),
            continue_on_error: default_true(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl PollingConfig {
    /// Set the base interval
    #[must_use]
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set the attempt ceiling
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the wall-clock ceiling
    #[must_use]
    pub fn with_max_duration_ms(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = max_duration_ms;
        self
    }

    /// Set backoff growth and ceiling
    #[must_use]
    pub fn with_backoff(mut self, multiplier: f64, max_interval_ms: u64) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_interval_ms = max_interval_ms;
        self
    }

    /// Set the jitter fraction
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_poll_timeout_ms(mut self, poll_timeout_ms: u64) -> Self {
        self.poll_timeout_ms = poll_timeout_ms;
        self
    }

    /// Set error tolerance
    #[must_use]
    pub fn with_error_policy(mut self, continue_on_error: bool, max_consecutive: u32) -> Self {
        self.continue_on_error = continue_on_error;
        self.max_consecutive_errors = max_consecutive;
        self
    }
}

// ============================================================================
// Status and error records
// ============================================================================

/// Session lifecycle status.
///
/// Transitions: `pending → polling → {completed, failed, cancelled,
/// expired}`, with `polling ⇄ paused` also permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingStatus {
    /// Created but not yet polling
    Pending,
    /// Actively polling
    Polling,
    /// Temporarily suspended; resumable
    Paused,
    /// Condition met
    Completed,
    /// A limit was exceeded or an error policy tripped
    Failed,
    /// Cancelled by a caller
    Cancelled,
    /// Outlived its wall-clock ceiling
    Expired,
}

impl PollingStatus {
    /// Whether this status admits no further transitions
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

/// Machine-readable reason a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollingErrorCode {
    /// `max_attempts` polls performed without meeting the condition
    MaxAttemptsReached,
    /// `max_duration_ms` elapsed since the session started
    MaxDurationExceeded,
    /// `max_consecutive_errors` executor errors in a row
    MaxConsecutiveErrors,
    /// Force-expired by cleanup after outliving its duration ceiling
    SessionExpired,
    /// Executor error with `continue_on_error` disabled
    ExecutorError,
}

/// Failure record written onto a session, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingError {
    /// Machine-readable code
    pub code: PollingErrorCode,
    /// Human-readable message naming the exceeded limit
    pub message: String,
}

impl PollingError {
    /// Create an error record
    #[must_use]
    pub fn new(code: PollingErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Session state
// ============================================================================

/// Mutable per-attempt state embedded in a session.
///
/// The lock fields mirror the currently-held lease and are maintained by
/// the storage backend alongside its lock table; they do not participate
/// in optimistic versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingState {
    /// Interval the next schedule computation starts from (pre-jitter)
    pub current_interval_ms: u64,
    /// Executor errors since the last success
    pub consecutive_errors: u32,
    /// Most recent executor observation
    pub last_result: Option<Value>,
    /// Most recent executor error message
    pub last_error: Option<String>,
    /// When the session is next eligible for a poll
    pub next_poll_at: Option<DateTime<Utc>>,
    /// Holder of the current lease, if any
    pub lock_holder: Option<Uuid>,
    /// Expiry of the current lease, if any
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl PollingState {
    fn new(interval_ms: u64, next_poll_at: DateTime<Utc>) -> Self {
        Self {
            current_interval_ms: interval_ms,
            consecutive_errors: 0,
            last_result: None,
            last_error: None,
            next_poll_at: Some(next_poll_at),
            lock_holder: None,
            lock_expires_at: None,
        }
    }

    /// Whether the mirrored lease is present and past its expiry
    #[must_use]
    pub fn lock_expired(&self) -> bool {
        matches!(self.lock_expires_at, Some(expires) if expires <= Utc::now())
    }
}

/// The durable unit of polling work. Serializes to a flat JSON-compatible
/// record, one per row/document, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSession {
    /// Session id
    pub id: Uuid,
    /// Owning run id
    pub run_id: String,
    /// Owning step id
    pub step_id: String,
    /// Condition the executor evaluates each attempt
    pub condition: Condition,
    /// Materialized configuration
    pub config: PollingConfig,
    /// Mutable per-attempt state
    pub state: PollingState,
    /// Lifecycle status
    pub status: PollingStatus,
    /// Attempts performed so far
    pub poll_count: u32,
    /// Final result once completed
    pub result: Option<Value>,
    /// Failure record once failed/expired
    pub error: Option<PollingError>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// First entry into `polling`
    pub started_at: Option<DateTime<Utc>>,
    /// Entry into a terminal status
    pub ended_at: Option<DateTime<Utc>>,
    /// Free-form caller metadata
    pub metadata: Value,
    /// Optimistic-concurrency version; bumped by every applied update
    pub version: u64,
}

impl PollingSession {
    /// Create a session that starts polling immediately
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        condition: Condition,
        config: PollingConfig,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            step_id: step_id.into(),
            condition,
            state: PollingState::new(config.interval_ms, now),
            config,
            status: PollingStatus::Polling,
            poll_count: 0,
            result: None,
            error: None,
            created_at: now,
            started_at: Some(now),
            ended_at: None,
            metadata,
            version: 1,
        }
    }

    /// Apply a patch in place and bump the version. Storage backends call
    /// this after the compare-and-swap version check has passed.
    pub fn apply_patch(&mut self, patch: SessionPatch) {
        if let Some(status) = patch.status {
            if status == PollingStatus::Polling && self.started_at.is_none() {
                self.started_at = Some(Utc::now());
            }
            if status.is_terminal() && self.ended_at.is_none() {
                self.ended_at = Some(Utc::now());
            }
            self.status = status;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(poll_count) = patch.poll_count {
            self.poll_count = poll_count;
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
        self.version += 1;
    }
}

/// Partial update presented to storage `update` together with the version
/// the writer last read. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    /// New status
    pub status: Option<PollingStatus>,
    /// Replacement per-attempt state
    pub state: Option<PollingState>,
    /// New attempt count
    pub poll_count: Option<u32>,
    /// Final result
    pub result: Option<Value>,
    /// Failure record
    pub error: Option<PollingError>,
    /// Replacement metadata
    pub metadata: Option<Value>,
}

impl SessionPatch {
    /// Patch that only changes status
    #[must_use]
    pub fn status(status: PollingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Set the replacement state
    #[must_use]
    pub fn with_state(mut self, state: PollingState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the attempt count
    #[must_use]
    pub fn with_poll_count(mut self, poll_count: u32) -> Self {
        self.poll_count = Some(poll_count);
        self
    }

    /// Set the final result
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Set the failure record
    #[must_use]
    pub fn with_error(mut self, error: PollingError) -> Self {
        self.error = Some(error);
        self
    }
}

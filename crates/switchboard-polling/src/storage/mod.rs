//! Storage contract for polling sessions and locks
//!
//! Any persistence backend (in-memory, SQL, a consensus-aware store) can
//! drive the orchestrator by satisfying [`PollingStorage`]. Every method is
//! an async I/O boundary: the in-memory implementation behaves as if
//! instantaneous, but callers must tolerate network-backed latencies.

mod memory;

pub use memory::MemoryStorage;

use crate::error::Result;
use crate::session::{PollingSession, PollingStatus, SessionPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a compare-and-swap update. Callers must handle the conflict
/// arm: a rejected write means the session changed under them and they
/// must re-read before retrying or abandoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The patch was applied; this is the session's new version
    Applied {
        /// Version after the update
        version: u64,
    },
    /// The expected version was stale; nothing was written
    VersionConflict {
        /// The version currently stored
        actual: u64,
    },
}

impl UpdateOutcome {
    /// Whether the patch was applied
    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A lease over one session. Not a strict mutex: the lease has a wall-clock
/// expiry and is reclaimable by any holder once expired, which is what makes
/// crash recovery possible. Execution is therefore at-least-once-ish under
/// partition or crash: a session can be polled twice if a lease expires
/// just as its original holder resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingLock {
    /// Lock id
    pub id: Uuid,
    /// The session this lease covers
    pub session_id: Uuid,
    /// Owning orchestrator instance
    pub holder_id: Uuid,
    /// When the lease was taken
    pub acquired_at: DateTime<Utc>,
    /// When the lease lapses
    pub expires_at: DateTime<Utc>,
}

impl PollingLock {
    /// Whether the lease has lapsed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Durable session records, distributed lock leases, and list/query
/// operations.
#[async_trait::async_trait]
pub trait PollingStorage: Send + Sync {
    /// Persist a new session; fails with `SessionExists` on id collision
    async fn create(&self, session: PollingSession) -> Result<()>;

    /// Fetch a session by id
    async fn get(&self, id: Uuid) -> Result<Option<PollingSession>>;

    /// Compare-and-swap update: the patch applies only if `expected_version`
    /// matches the stored version
    async fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: u64,
    ) -> Result<UpdateOutcome>;

    /// Delete a session; returns whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// All sessions with the given status
    async fn list_by_status(&self, status: PollingStatus) -> Result<Vec<PollingSession>>;

    /// All sessions owned by the given run
    async fn list_by_run_id(&self, run_id: &str) -> Result<Vec<PollingSession>>;

    /// Sessions eligible for a poll right now: status `polling`,
    /// `next_poll_at` passed, and no valid lock. Ordered by `next_poll_at`.
    async fn find_ready_for_polling(&self, limit: usize) -> Result<Vec<PollingSession>>;

    /// Take the session's lease for `duration_ms`. Returns `None` while
    /// another holder's lease is valid; re-acquisition by the same holder
    /// refreshes the lease idempotently.
    async fn acquire_lock(
        &self,
        session_id: Uuid,
        holder_id: Uuid,
        duration_ms: u64,
    ) -> Result<Option<PollingLock>>;

    /// Release a held lease; returns whether the (lock, holder) pair matched
    async fn release_lock(&self, lock_id: Uuid, holder_id: Uuid) -> Result<bool>;

    /// Push a held lease's expiry out by `additional_ms`
    async fn extend_lock(
        &self,
        lock_id: Uuid,
        holder_id: Uuid,
        additional_ms: u64,
    ) -> Result<Option<PollingLock>>;

    /// Delete terminal sessions whose `ended_at` is older than `max_age_ms`;
    /// returns how many were removed
    async fn cleanup(&self, max_age_ms: u64) -> Result<usize>;

    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Release backend resources; subsequent calls may fail
    async fn close(&self) -> Result<()>;
}

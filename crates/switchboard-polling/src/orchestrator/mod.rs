//! Polling orchestrator
//!
//! Drives persisted polling sessions forward one attempt at a time. Several
//! orchestrator instances may share one storage backend: each instance owns
//! a holder id, takes the session's lease before polling, and commits every
//! mutation with a compare-and-swap against the version it last read.
//!
//! The orchestrator spawns no tasks of its own; an external scheduler loop
//! calls [`PollingOrchestrator::process_ready_sessions`] on a cadence, and
//! [`PollingOrchestrator::run_cleanup`] is awaited by whoever owns the
//! instance's lifecycle.

use crate::condition::Condition;
use crate::error::{Error, Result};
use crate::executor::{PollExecutor, PollOutcome};
use crate::session::{
    PollingConfig, PollingError, PollingErrorCode, PollingSession, PollingState, PollingStatus,
    SessionPatch,
};
use crate::storage::{PollingLock, PollingStorage, UpdateOutcome};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;


/// Scheduled delays never drop below this, jitter included
const MIN_INTERVAL_MS: u64 = 100;

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator instance configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Lease duration taken for each poll attempt
    pub lock_duration_ms: u64,
    /// Cadence of the periodic cleanup timer
    pub cleanup_interval_ms: u64,
    /// Terminal sessions older than this are deleted by cleanup
    pub session_retention_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: 30_000,
            cleanup_interval_ms: 60_000,
            session_retention_ms: 3_600_000,
        }
    }
}

impl OrchestratorConfig {
    /// Set the lease duration
    #[must_use]
    pub fn with_lock_duration_ms(mut self, lock_duration_ms: u64) -> Self {
        self.lock_duration_ms = lock_duration_ms;
        self
    }

    /// Set the cleanup timer cadence
    #[must_use]
    pub fn with_cleanup_interval_ms(mut self, cleanup_interval_ms: u64) -> Self {
        self.cleanup_interval_ms = cleanup_interval_ms;
        self
    }

    /// Set the terminal-session retention window
    #[must_use]
    pub fn with_session_retention_ms(mut self, session_retention_ms: u64) -> Self {
        self.session_retention_ms = session_retention_ms;
        self
    }
}

// ============================================================================
// Results and stats
// ============================================================================

/// Outcome of one [`PollingOrchestrator::execute_poll`] call
#[derive(Debug, Clone)]
pub struct PollResult {
    /// Whether the session is in (or has reached) a terminal state
    pub complete: bool,
    /// Result observed or stored this attempt, if any
    pub result: Option<Value>,
    /// Failure record, if the session failed or expired
    pub error: Option<PollingError>,
}

impl PollResult {
    fn not_complete(result: Option<Value>) -> Self {
        Self {
            complete: false,
            result,
            error: None,
        }
    }

    fn complete(result: Option<Value>, error: Option<PollingError>) -> Self {
        Self {
            complete: true,
            result,
            error,
        }
    }
}

/// Session counts for inspection
#[derive(Debug, Clone, Default)]
pub struct PollingStats {
    /// All stored sessions
    pub total: usize,
    /// Sessions in a non-terminal status
    pub active: usize,
    /// Count per status
    pub by_status: HashMap<PollingStatus, usize>,
}

/// Outcome of a commit attempt against a session that may have changed
/// under us.
enum Commit {
    Applied,
    /// The session left `polling` while we worked; our write was discarded.
    Superseded(PollingSession),
}

// ============================================================================
// PollingOrchestrator
// ============================================================================

/// Session lifecycle, lock-protected single-poll execution, backoff
/// scheduling, and cleanup.
///
/// Construct explicitly and share via `Arc`; there is no process-wide
/// default instance.
pub struct PollingOrchestrator {
    storage: Arc<dyn PollingStorage>,
    executor: Arc<dyn PollExecutor>,
    config: OrchestratorConfig,
    holder_id: Uuid,
    cleanup_running: AtomicBool,
}

impl PollingOrchestrator {
    /// Create an orchestrator instance with its own holder id
    pub fn new(
        storage: Arc<dyn PollingStorage>,
        executor: Arc<dyn PollExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let holder_id = Uuid::new_v4();
        info!(%holder_id, "Polling orchestrator created");
        Self {
            storage,
            executor,
            config,
            holder_id,
            cleanup_running: AtomicBool::new(false),
        }
    }

    /// This instance's lease holder id
    #[must_use]
    pub fn holder_id(&self) -> Uuid {
        self.holder_id
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Create a session and start polling immediately
    /// (`next_poll_at = now`).
    #[instrument(skip_all)]
    pub async fn start_polling(
        &self,
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        condition: Condition,
        config: PollingConfig,
        metadata: Value,
    ) -> Result<PollingSession> {
        let session = PollingSession::new(run_id, step_id, condition, config, metadata);
        info!(
            session_id = %session.id,
            run_id = %session.run_id,
            step_id = %session.step_id,
            "Polling session started"
        );
        self.storage.create(session.clone()).await?;
        Ok(session)
    }

    /// Cancel a non-terminal session. Returns false (no-op) when the
    /// session is already terminal. Cannot interrupt a poll in flight:
    /// an in-flight poll's commit will conflict and be discarded.
    pub async fn cancel_polling(&self, id: Uuid, reason: Option<&str>) -> Result<bool> {
        loop {
            let session = self.load(id).await?;
            if session.status.is_terminal() {
                return Ok(false);
            }

            let mut state = session.state.clone();
            if let Some(reason) = reason {
                state.last_error = Some(reason.to_string());
            }
            let patch = SessionPatch::status(PollingStatus::Cancelled).with_state(state);
            match self.storage.update(id, patch, session.version).await? {
                UpdateOutcome::Applied { .. } => {
                    info!(session_id = %id, reason, "Polling session cancelled");
                    return Ok(true);
                }
                UpdateOutcome::VersionConflict { .. } => continue,
            }
        }
    }

    /// Suspend an actively-polling session. Returns false when the session
    /// is not currently `polling`.
    pub async fn pause_polling(&self, id: Uuid) -> Result<bool> {
        loop {
            let session = self.load(id).await?;
            if session.status != PollingStatus::Polling {
                return Ok(false);
            }
            let patch = SessionPatch::status(PollingStatus::Paused);
            match self.storage.update(id, patch, session.version).await? {
                UpdateOutcome::Applied { .. } => {
                    info!(session_id = %id, "Polling session paused");
                    return Ok(true);
                }
                UpdateOutcome::VersionConflict { .. } => continue,
            }
        }
    }

    /// Resume a paused session, or recover a `polling` session whose lease
    /// expired without release (the signature of a crashed instance).
    /// Any other session is returned unchanged.
    pub async fn resume_polling(&self, id: Uuid) -> Result<PollingSession> {
        loop {
            let session = self.load(id).await?;
            let patch = match session.status {
                PollingStatus::Paused => {
                    let mut state = session.state.clone();
                    state.next_poll_at = Some(Utc::now());
                    SessionPatch::status(PollingStatus::Polling).with_state(state)
                }
                PollingStatus::Polling if session.state.lock_expired() => {
                    let mut state = session.state.clone();
                    state.lock_holder = None;
                    state.lock_expires_at = None;
                    state.next_poll_at = Some(Utc::now());
                    SessionPatch::default().with_state(state)
                }
                _ => return Ok(session),
            };

            match self.storage.update(id, patch, session.version).await? {
                UpdateOutcome::Applied { .. } => {
                    info!(session_id = %id, "Polling session resumed");
                    return self.load(id).await;
                }
                UpdateOutcome::VersionConflict { .. } => continue,
            }
        }
    }

    // ------------------------------------------------------------------
    // Poll execution
    // ------------------------------------------------------------------

    /// Drive one session forward a single attempt.
    ///
    /// Reports `complete = false` without mutating the session when another
    /// instance holds the lease, so batch drivers simply move on and retry
    /// on a later tick.
    #[instrument(skip(self))]
    pub async fn execute_poll(&self, id: Uuid) -> Result<PollResult> {
        let session = self.load(id).await?;

        // Idempotent no-op for sessions that already finished (or were
        // paused) between scheduling and execution.
        if session.status != PollingStatus::Polling {
            return Ok(PollResult::complete(session.result, session.error));
        }

        if session.poll_count >= session.config.max_attempts {
            let error = PollingError::new(
                PollingErrorCode::MaxAttemptsReached,
                format!(
                    "polling failed after reaching max_attempts ({})",
                    session.config.max_attempts
                ),
            );
            return self
                .finish(&session, PollingStatus::Failed, None, None, Some(error))
                .await;
        }

        if self.duration_exceeded(&session) {
            let error = PollingError::new(
                PollingErrorCode::MaxDurationExceeded,
                format!(
                    "polling expired after exceeding max_duration_ms ({})",
                    session.config.max_duration_ms
                ),
            );
            return self
                .finish(&session, PollingStatus::Expired, None, None, Some(error))
                .await;
        }

        let lock = match self
            .storage
            .acquire_lock(id, self.holder_id, self.config.lock_duration_ms)
            .await?
        {
            Some(lock) => lock,
            None => {
                debug!(session_id = %id, "Lease held elsewhere; skipping attempt");
                return Ok(PollResult::not_complete(None));
            }
        };

        let outcome = self.attempt(&session).await;
        let result = self.apply_outcome(session, outcome).await;

        // Release on every path before returning.
        if let Err(e) = self.storage.release_lock(lock.id, self.holder_id).await {
            warn!(session_id = %id, "Failed to release lease: {e}");
        }
        result
    }

    /// Race the executor against the per-attempt timeout. The loser is
    /// abandoned, not interrupted, since the executor may be an opaque network
    /// call we cannot cancel.
    async fn attempt(&self, session: &PollingSession) -> PollOutcome {
        let timeout = std::time::Duration::from_millis(session.config.poll_timeout_ms);
        tokio::select! {
            outcome = self.executor.execute(session) => outcome,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    session_id = %session.id,
                    timeout_ms = session.config.poll_timeout_ms,
                    "Poll attempt timed out"
                );
                PollOutcome::error(format!(
                    "poll timed out after {}ms",
                    session.config.poll_timeout_ms
                ))
            }
        }
    }

    /// Fold one executor outcome into the session: counters, backoff
    /// scheduling, error ceilings, completion.
    async fn apply_outcome(
        &self,
        session: PollingSession,
        outcome: PollOutcome,
    ) -> Result<PollResult> {
        let config = session.config.clone();
        let had_error = outcome.error.is_some();
        let poll_count = session.poll_count + 1;

        let mut state = session.state.clone();

        // Schedule with the current interval, then back off for next time.
        // Backoff advances only on an unmet, error-free attempt.
        let delay_ms = jittered_delay(state.current_interval_ms, config.jitter);
        if !outcome.condition_met && !had_error {
            state.current_interval_ms = ((state.current_interval_ms as f64
                * config.backoff_multiplier)
                .min(config.max_interval_ms as f64)) as u64;
        }
        state.next_poll_at = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));

        if let Some(result) = &outcome.result {
            state.last_result = Some(result.clone());
        }
        if had_error {
            state.consecutive_errors += 1;
            state.last_error = outcome.error.clone();
        } else {
            state.consecutive_errors = 0;
            state.last_error = None;
        }

        if had_error {
            let message = outcome.error.clone().unwrap_or_default();
            if !config.continue_on_error {
                let error = PollingError::new(
                    PollingErrorCode::ExecutorError,
                    format!("polling aborted on first error: {message}"),
                );
                return self
                    .finish(
                        &session,
                        PollingStatus::Failed,
                        Some(state),
                        Some(poll_count),
                        Some(error),
                    )
                    .await;
            }
            if state.consecutive_errors >= config.max_consecutive_errors {
                let error = PollingError::new(
                    PollingErrorCode::MaxConsecutiveErrors,
                    format!(
                        "polling failed after {} consecutive errors (limit {}): {message}",
                        state.consecutive_errors, config.max_consecutive_errors
                    ),
                );
                return self
                    .finish(
                        &session,
                        PollingStatus::Failed,
                        Some(state),
                        Some(poll_count),
                        Some(error),
                    )
                    .await;
            }
        }

        if outcome.condition_met {
            return self
                .finish(
                    &session,
                    PollingStatus::Completed,
                    Some(state),
                    Some(poll_count),
                    None,
                )
                .await;
        }

        // This attempt reached the ceiling without meeting the condition.
        if poll_count >= config.max_attempts {
            let error = PollingError::new(
                PollingErrorCode::MaxAttemptsReached,
                format!(
                    "polling failed after reaching max_attempts ({})",
                    config.max_attempts
                ),
            );
            return self
                .finish(
                    &session,
                    PollingStatus::Failed,
                    Some(state),
                    Some(poll_count),
                    Some(error),
                )
                .await;
        }

        let patch = SessionPatch::default()
            .with_state(state)
            .with_poll_count(poll_count);
        match self.commit(&session, patch).await? {
            Commit::Applied => Ok(PollResult::not_complete(outcome.result)),
            Commit::Superseded(current) => {
                Ok(PollResult::complete(current.result, current.error))
            }
        }
    }

    /// Transition a session to a terminal status with a CAS commit
    async fn finish(
        &self,
        session: &PollingSession,
        status: PollingStatus,
        state: Option<PollingState>,
        poll_count: Option<u32>,
        error: Option<PollingError>,
    ) -> Result<PollResult> {
        let mut patch = SessionPatch::status(status);
        patch.state = state;
        patch.poll_count = poll_count;

        if status == PollingStatus::Completed {
            let result = patch
                .state
                .as_ref()
                .and_then(|s| s.last_result.clone())
                .or_else(|| session.state.last_result.clone())
                .unwrap_or(Value::Null);
            patch.result = Some(result);
        }
        if let Some(error) = &error {
            patch.error = Some(error.clone());
        }

        let stored_result = patch.result.clone();
        match self.commit(session, patch).await? {
            Commit::Applied => {
                info!(session_id = %session.id, ?status, "Polling session finished");
                Ok(PollResult::complete(stored_result, error))
            }
            Commit::Superseded(current) => {
                Ok(PollResult::complete(current.result, current.error))
            }
        }
    }

    /// Commit a patch with compare-and-swap, re-reading on conflict.
    /// A session that left `polling` mid-flight (cancelled, paused, or
    /// finished by another writer) supersedes our write: the patch is
    /// discarded rather than clobbering the newer state.
    async fn commit(&self, session: &PollingSession, patch: SessionPatch) -> Result<Commit> {
        let mut expected = session.version;
        loop {
            match self
                .storage
                .update(session.id, patch.clone(), expected)
                .await?
            {
                UpdateOutcome::Applied { .. } => return Ok(Commit::Applied),
                UpdateOutcome::VersionConflict { actual } => {
                    let current = self.load(session.id).await?;
                    if current.status != PollingStatus::Polling {
                        debug!(
                            session_id = %session.id,
                            status = ?current.status,
                            "Session changed mid-poll; discarding update"
                        );
                        return Ok(Commit::Superseded(current));
                    }
                    expected = actual;
                }
            }
        }
    }

    fn duration_exceeded(&self, session: &PollingSession) -> bool {
        match session.started_at {
            Some(started) => {
                let elapsed = (Utc::now() - started).num_milliseconds().max(0) as u64;
                elapsed >= session.config.max_duration_ms
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Batch driving
    // ------------------------------------------------------------------

    /// Fetch sessions that are due and drive each one a single attempt.
    /// A failure in one session does not halt the batch. Returns how many
    /// sessions were attempted.
    #[instrument(skip(self))]
    pub async fn process_ready_sessions(&self, limit: usize) -> Result<usize> {
        let ready = self.storage.find_ready_for_polling(limit).await?;
        let count = ready.len();
        if count > 0 {
            debug!(count, "Processing ready polling sessions");
        }

        for session in ready {
            if let Err(e) = self.execute_poll(session.id).await {
                warn!(session_id = %session.id, "Poll attempt failed: {e}");
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Lock wrappers
    // ------------------------------------------------------------------

    /// Take a session's lease for this instance
    pub async fn acquire_lock(&self, session_id: Uuid) -> Result<Option<PollingLock>> {
        self.storage
            .acquire_lock(session_id, self.holder_id, self.config.lock_duration_ms)
            .await
    }

    /// Release a lease held by this instance
    pub async fn release_lock(&self, lock: &PollingLock) -> Result<bool> {
        self.storage.release_lock(lock.id, self.holder_id).await
    }

    /// Extend a lease held by this instance
    pub async fn extend_lock(
        &self,
        lock: &PollingLock,
        additional_ms: u64,
    ) -> Result<Option<PollingLock>> {
        self.storage
            .extend_lock(lock.id, self.holder_id, additional_ms)
            .await
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Delete terminal sessions older than the retention window and
    /// force-expire `polling` sessions that outlived their duration ceiling
    /// without any instance re-polling them. Returns how many sessions
    /// were deleted.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, max_age_ms: Option<u64>) -> Result<usize> {
        let retention = max_age_ms.unwrap_or(self.config.session_retention_ms);
        let removed = self.storage.cleanup(retention).await?;

        let mut force_expired = 0usize;
        for session in self.storage.list_by_status(PollingStatus::Polling).await? {
            if !self.duration_exceeded(&session) {
                continue;
            }
            let error = PollingError::new(
                PollingErrorCode::SessionExpired,
                format!(
                    "session exceeded max_duration_ms ({}) without reaching a terminal state",
                    session.config.max_duration_ms
                ),
            );
            let patch = SessionPatch::status(PollingStatus::Expired).with_error(error);
            match self
                .storage
                .update(session.id, patch, session.version)
                .await?
            {
                UpdateOutcome::Applied { .. } => force_expired += 1,
                // Someone else advanced the session; it will be caught on a
                // later pass if still overdue.
                UpdateOutcome::VersionConflict { .. } => {}
            }
        }

        if removed > 0 || force_expired > 0 {
            info!(removed, force_expired, "Cleanup pass finished");
        }
        Ok(removed)
    }

    /// Periodic cleanup loop. Ticks never overlap: if a cleanup pass is
    /// still running when the next tick fires, the tick is skipped.
    pub async fn run_cleanup(&self, shutdown: CancellationToken) {
        info!(holder_id = %self.holder_id, "Cleanup timer starting");
        let interval = std::time::Duration::from_millis(self.config.cleanup_interval_ms);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if self
                        .cleanup_running
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        debug!("Previous cleanup still running; skipping tick");
                        continue;
                    }
                    if let Err(e) = self.cleanup_expired(None).await {
                        error!("Cleanup pass failed: {e}");
                    }
                    self.cleanup_running.store(false, Ordering::SeqCst);
                }
                _ = shutdown.cancelled() => {
                    info!("Cleanup timer shutting down");
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Fetch a session, failing on a bad id
    pub async fn get_session(&self, id: Uuid) -> Result<PollingSession> {
        self.load(id).await
    }

    /// All sessions owned by a run
    pub async fn list_sessions_by_run(&self, run_id: &str) -> Result<Vec<PollingSession>> {
        self.storage.list_by_run_id(run_id).await
    }

    /// Session counts by status
    pub async fn get_stats(&self) -> Result<PollingStats> {
        let mut stats = PollingStats::default();
        for status in [
            PollingStatus::Pending,
            PollingStatus::Polling,
            PollingStatus::Paused,
            PollingStatus::Completed,
            PollingStatus::Failed,
            PollingStatus::Cancelled,
            PollingStatus::Expired,
        ] {
            let count = self.storage.list_by_status(status).await?.len();
            if count > 0 {
                stats.by_status.insert(status, count);
            }
            stats.total += count;
            if !status.is_terminal() {
                stats.active += count;
            }
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // In-process convenience loop
    // ------------------------------------------------------------------

    /// Start a session and drive it in-process until it completes,
    /// sleeping between attempts. Fails with
    /// [`Error::MaxAttemptsExceeded`] when the session reaches any
    /// unsuccessful terminal state.
    pub async fn poll_until(
        &self,
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        condition: Condition,
        config: PollingConfig,
        metadata: Value,
    ) -> Result<Value> {
        let session = self
            .start_polling(run_id, step_id, condition, config, metadata)
            .await?;

        loop {
            let current = self.load(session.id).await?;
            match current.status {
                PollingStatus::Completed => {
                    return Ok(current.result.unwrap_or(Value::Null));
                }
                status if status.is_terminal() => {
                    return Err(Error::MaxAttemptsExceeded {
                        session_id: current.id,
                        attempts: current.poll_count,
                    });
                }
                _ => {}
            }

            if let Some(at) = current.state.next_poll_at {
                let now = Utc::now();
                if at > now {
                    let wait = (at - now).num_milliseconds().max(0) as u64;
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                }
            }
            self.execute_poll(session.id).await?;
        }
    }

    async fn load(&self, id: Uuid) -> Result<PollingSession> {
        self.storage
            .get(id)
            .await?
            .ok_or(Error::SessionNotFound(id))
    }
}

/// Apply symmetric jitter (`interval ± interval × jitter × rand`) and the
/// scheduling floor.
fn jittered_delay(interval_ms: u64, jitter: f64) -> u64 {
    let delay = if jitter > 0.0 {
        let spread = interval_ms as f64 * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        interval_ms as f64 + offset
    } else {
        interval_ms as f64
    };
    (delay.max(MIN_INTERVAL_MS as f64)) as u64
}

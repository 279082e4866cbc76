//! In-memory reference storage
//!
//! Suitable for single-instance use and tests. All state lives behind
//! `tokio::sync::RwLock` maps; lock acquisition happens under a single
//! write guard, so exactly one of two concurrent callers wins a lease.

use super::{PollingLock, PollingStorage, UpdateOutcome};
use crate::error::{Error, Result};
use crate::session::{PollingSession, PollingStatus, SessionPatch};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory implementation of [`PollingStorage`]
#[derive(Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<Uuid, PollingSession>>,
    // Keyed by session id: at most one lease per session.
    locks: RwLock<HashMap<Uuid, PollingLock>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Storage("storage is closed".to_string()));
        }
        Ok(())
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl PollingStorage for MemoryStorage {
    async fn create(&self, session: PollingSession) -> Result<()> {
        self.check_open()?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(Error::SessionExists(session.id));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PollingSession>> {
        self.check_open()?;
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected_version: u64,
    ) -> Result<UpdateOutcome> {
        self.check_open()?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(Error::SessionNotFound(id))?;

        if session.version != expected_version {
            return Ok(UpdateOutcome::VersionConflict {
                actual: session.version,
            });
        }

        session.apply_patch(patch);
        Ok(UpdateOutcome::Applied {
            version: session.version,
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.check_open()?;
        self.locks.write().await.remove(&id);
        Ok(self.sessions.write().await.remove(&id).is_some())
    }

    async fn list_by_status(&self, status: PollingStatus) -> Result<Vec<PollingSession>> {
        self.check_open()?;
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn list_by_run_id(&self, run_id: &str) -> Result<Vec<PollingSession>> {
        self.check_open()?;
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn find_ready_for_polling(&self, limit: usize) -> Result<Vec<PollingSession>> {
        self.check_open()?;
        let now = Utc::now();
        let locks = self.locks.read().await;
        let mut ready: Vec<PollingSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| {
                s.status == PollingStatus::Polling
                    && matches!(s.state.next_poll_at, Some(at) if at <= now)
                    && locks.get(&s.id).map_or(true, PollingLock::is_expired)
            })
            .cloned()
            .collect();
        ready.sort_by_key(|s| s.state.next_poll_at);
        ready.truncate(limit);
        Ok(ready)
    }

    async fn acquire_lock(
        &self,
        session_id: Uuid,
        holder_id: Uuid,
        duration_ms: u64,
    ) -> Result<Option<PollingLock>> {
        self.check_open()?;
        let now = Utc::now();
        let expires_at = now + Duration::milliseconds(duration_ms as i64);

        let mut locks = self.locks.write().await;
        let lock = match locks.get(&session_id) {
            Some(existing) if !existing.is_expired() && existing.holder_id != holder_id => {
                debug!(%session_id, holder = %existing.holder_id, "Lease held by another instance");
                return Ok(None);
            }
            Some(existing) if existing.holder_id == holder_id && !existing.is_expired() => {
                // Idempotent re-acquire: refresh the same lease.
                let mut refreshed = existing.clone();
                refreshed.expires_at = expires_at;
                refreshed
            }
            _ => PollingLock {
                id: Uuid::new_v4(),
                session_id,
                holder_id,
                acquired_at: now,
                expires_at,
            },
        };
        locks.insert(session_id, lock.clone());
        drop(locks);

        // Mirror the lease into the session for inspection; lease metadata
        // does not participate in optimistic versioning.
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.state.lock_holder = Some(holder_id);
            session.state.lock_expires_at = Some(expires_at);
        }

        Ok(Some(lock))
    }

    async fn release_lock(&self, lock_id: Uuid, holder_id: Uuid) -> Result<bool> {
        self.check_open()?;
        let mut locks = self.locks.write().await;
        let session_id = match locks
            .iter()
            .find(|(_, l)| l.id == lock_id && l.holder_id == holder_id)
        {
            Some((session_id, _)) => *session_id,
            None => return Ok(false),
        };
        locks.remove(&session_id);
        drop(locks);

        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.state.lock_holder = None;
            session.state.lock_expires_at = None;
        }
        Ok(true)
    }

    async fn extend_lock(
        &self,
        lock_id: Uuid,
        holder_id: Uuid,
        additional_ms: u64,
    ) -> Result<Option<PollingLock>> {
        self.check_open()?;
        let mut locks = self.locks.write().await;
        let lock = match locks
            .values_mut()
            .find(|l| l.id == lock_id && l.holder_id == holder_id)
        {
            Some(lock) => {
                let base = if lock.is_expired() {
                    Utc::now()
                } else {
                    lock.expires_at
                };
                lock.expires_at = base + Duration::milliseconds(additional_ms as i64);
                lock.clone()
            }
            None => return Ok(None),
        };
        drop(locks);

        if let Some(session) = self.sessions.write().await.get_mut(&lock.session_id) {
            session.state.lock_expires_at = Some(lock.expires_at);
        }
        Ok(Some(lock))
    }

    async fn cleanup(&self, max_age_ms: u64) -> Result<usize> {
        self.check_open()?;
        let cutoff = Utc::now() - Duration::milliseconds(max_age_ms as i64);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| {
            !(s.status.is_terminal() && matches!(s.ended_at, Some(ended) if ended < cutoff))
        });
        let removed = before - sessions.len();
        drop(sessions);

        self.locks.write().await.retain(|_, l| !l.is_expired());
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        self.check_open()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::session::PollingConfig;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn test_session() -> PollingSession {
        PollingSession::new(
            "run-1",
            "step-1",
            Condition::status("done"),
            PollingConfig::default(),
            Value::Null,
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;

        storage.create(session).await.unwrap();
        let fetched = storage.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn test_create_collision() {
        let storage = MemoryStorage::new();
        let session = test_session();
        storage.create(session.clone()).await.unwrap();

        let err = storage.create(session).await.unwrap_err();
        assert!(matches!(err, Error::SessionExists(_)));
    }

    #[tokio::test]
    async fn test_update_cas_applies_once() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let patch = SessionPatch::default().with_poll_count(1);
        let first = storage.update(id, patch.clone(), 1).await.unwrap();
        assert_eq!(first, UpdateOutcome::Applied { version: 2 });

        // Same stale version again: rejected
        let second = storage.update(id, patch, 1).await.unwrap();
        assert_eq!(second, UpdateOutcome::VersionConflict { actual: 2 });
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let storage = MemoryStorage::new();
        let err = storage
            .update(Uuid::new_v4(), SessionPatch::default(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_version_reflects_successful_updates() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let mut version = 1;
        for count in 1..=4u32 {
            match storage
                .update(id, SessionPatch::default().with_poll_count(count), version)
                .await
                .unwrap()
            {
                UpdateOutcome::Applied { version: v } => version = v,
                UpdateOutcome::VersionConflict { .. } => panic!("unexpected conflict"),
            }
        }

        let fetched = storage.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.poll_count, 4);
        // version = successful updates + 1
        assert_eq!(fetched.version, 5);
    }

    #[tokio::test]
    async fn test_concurrent_lock_acquisition_single_winner() {
        let storage = Arc::new(MemoryStorage::new());
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (res_a, res_b) = tokio::join!(
            storage.acquire_lock(id, a, 30_000),
            storage.acquire_lock(id, b, 30_000),
        );

        let won_a = res_a.unwrap().is_some();
        let won_b = res_b.unwrap().is_some();
        assert!(won_a ^ won_b, "exactly one holder must win the lease");
    }

    #[tokio::test]
    async fn test_lock_reacquire_same_holder_is_idempotent() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let holder = Uuid::new_v4();
        let first = storage.acquire_lock(id, holder, 30_000).await.unwrap().unwrap();
        let second = storage.acquire_lock(id, holder, 30_000).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.expires_at >= first.expires_at);
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimable() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let crashed = Uuid::new_v4();
        storage.acquire_lock(id, crashed, 0).await.unwrap().unwrap();

        let survivor = Uuid::new_v4();
        let lock = storage.acquire_lock(id, survivor, 30_000).await.unwrap();
        assert!(lock.is_some());
        assert_eq!(lock.unwrap().holder_id, survivor);
    }

    #[tokio::test]
    async fn test_release_lock_requires_matching_holder() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let holder = Uuid::new_v4();
        let lock = storage.acquire_lock(id, holder, 30_000).await.unwrap().unwrap();

        assert!(!storage.release_lock(lock.id, Uuid::new_v4()).await.unwrap());
        assert!(storage.release_lock(lock.id, holder).await.unwrap());

        // Session mirror cleared
        let fetched = storage.get(id).await.unwrap().unwrap();
        assert!(fetched.state.lock_holder.is_none());
    }

    #[tokio::test]
    async fn test_extend_lock() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        let holder = Uuid::new_v4();
        let lock = storage.acquire_lock(id, holder, 10_000).await.unwrap().unwrap();
        let extended = storage
            .extend_lock(lock.id, holder, 20_000)
            .await
            .unwrap()
            .unwrap();
        assert!(extended.expires_at > lock.expires_at);

        assert!(storage
            .extend_lock(lock.id, Uuid::new_v4(), 20_000)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_ready_skips_locked_and_future_sessions() {
        let storage = MemoryStorage::new();

        let ready = test_session();
        let ready_id = ready.id;
        storage.create(ready).await.unwrap();

        let mut future = test_session();
        future.state.next_poll_at = Some(Utc::now() + Duration::seconds(60));
        storage.create(future).await.unwrap();

        let locked = test_session();
        let locked_id = locked.id;
        storage.create(locked).await.unwrap();
        storage
            .acquire_lock(locked_id, Uuid::new_v4(), 30_000)
            .await
            .unwrap()
            .unwrap();

        let found = storage.find_ready_for_polling(10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ready_id);
    }

    #[tokio::test]
    async fn test_find_ready_includes_expired_locks() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();
        storage
            .acquire_lock(id, Uuid::new_v4(), 0)
            .await
            .unwrap()
            .unwrap();

        let found = storage.find_ready_for_polling(10).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_status_and_run() {
        let storage = MemoryStorage::new();
        let session = test_session();
        storage.create(session).await.unwrap();

        let mut other_run = test_session();
        other_run.run_id = "run-2".to_string();
        storage.create(other_run).await.unwrap();

        assert_eq!(
            storage
                .list_by_status(PollingStatus::Polling)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(storage.list_by_run_id("run-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_aged_terminal_sessions() {
        let storage = MemoryStorage::new();

        let mut old = test_session();
        old.status = PollingStatus::Completed;
        old.ended_at = Some(Utc::now() - Duration::hours(2));
        let old_id = old.id;
        storage.create(old).await.unwrap();

        let mut recent = test_session();
        recent.status = PollingStatus::Completed;
        recent.ended_at = Some(Utc::now());
        let recent_id = recent.id;
        storage.create(recent).await.unwrap();

        let active = test_session();
        let active_id = active.id;
        storage.create(active).await.unwrap();

        let removed = storage.cleanup(3_600_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get(old_id).await.unwrap().is_none());
        assert!(storage.get(recent_id).await.unwrap().is_some());
        assert!(storage.get(active_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_close_rejects_further_calls() {
        let storage = MemoryStorage::new();
        storage.ping().await.unwrap();
        storage.close().await.unwrap();
        assert!(storage.ping().await.is_err());
        assert!(storage.get(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_patches_result_and_round_trips() {
        let storage = MemoryStorage::new();
        let session = test_session();
        let id = session.id;
        storage.create(session).await.unwrap();

        storage
            .update(
                id,
                SessionPatch::status(PollingStatus::Completed).with_result(json!({"n": 1})),
                1,
            )
            .await
            .unwrap();

        let fetched = storage.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PollingStatus::Completed);
        assert_eq!(fetched.result, Some(json!({"n": 1})));
        assert!(fetched.ended_at.is_some());
        assert_eq!(fetched.version, 2);
    }
}

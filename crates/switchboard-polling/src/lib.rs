//! Switchboard Polling - persisted "poll until condition" workflows
//!
//! This crate manages long-running asynchronous waits safely across multiple
//! concurrent runtime instances:
//! - Session: the durable unit of polling work, with optimistic versioning
//! - Condition: tagged-union conditions evaluated once per attempt
//! - Executor: the caller-supplied observation seam
//! - Storage: the persistence contract plus an in-memory reference
//!   implementation
//! - Orchestrator: lock-protected single-poll execution, backoff with
//!   jitter, limit enforcement, crash recovery, and cleanup
//!
//! Locks are leases, not mutexes: they expire on the wall clock and are
//! reclaimable after expiry, which is what makes crash recovery possible.
//! The trade-off is at-least-once-ish execution under partition or crash.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod condition;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod session;
pub mod storage;

pub use condition::{Condition, Evaluation, ValueOperator};
pub use error::{Error, Result};
pub use executor::{
    ConditionExecutor, FnExecutor, OutcomeFuture, PollExecutor, PollOutcome, ProbeFn, ProbeFuture,
};
pub use orchestrator::{
    OrchestratorConfig, PollResult, PollingOrchestrator, PollingStats,
};
pub use session::{
    PollingConfig, PollingError, PollingErrorCode, PollingSession, PollingState, PollingStatus,
    SessionPatch,
};
pub use storage::{MemoryStorage, PollingLock, PollingStorage, UpdateOutcome};

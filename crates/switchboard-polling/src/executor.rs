//! Executor contract
//!
//! The orchestrator never knows how to observe the outside world; a
//! caller-supplied [`PollExecutor`] is invoked once per attempt and reports
//! whether the session's condition has been met.

use crate::condition::Evaluation;
use crate::session::PollingSession;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Outcome of one executor invocation
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Observation made this attempt, if any
    pub result: Option<Value>,
    /// Whether the session's condition is now satisfied
    pub condition_met: bool,
    /// Executor-level error, if the attempt failed
    pub error: Option<String>,
}

impl PollOutcome {
    /// Condition satisfied with this result
    #[must_use]
    pub fn met(result: Value) -> Self {
        Self {
            result: Some(result),
            condition_met: true,
            error: None,
        }
    }

    /// Condition not yet satisfied; observation recorded
    #[must_use]
    pub fn pending(result: Value) -> Self {
        Self {
            result: Some(result),
            condition_met: false,
            error: None,
        }
    }

    /// Attempt failed
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: None,
            condition_met: false,
            error: Some(message.into()),
        }
    }
}

/// Caller-supplied condition evaluator, invoked once per poll attempt
#[async_trait::async_trait]
pub trait PollExecutor: Send + Sync {
    /// Perform one observation for the given session
    async fn execute(&self, session: &PollingSession) -> PollOutcome;
}

/// Future type produced by probe callbacks
pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

/// Callback that fetches the current observation for a session
pub type ProbeFn = Arc<dyn Fn(PollingSession) -> ProbeFuture + Send + Sync>;

/// Default executor: runs a caller-supplied probe, then evaluates the
/// session's [`Condition`](crate::condition::Condition) against the
/// observation.
pub struct ConditionExecutor {
    probe: ProbeFn,
}

impl ConditionExecutor {
    /// Wrap a probe callback
    #[must_use]
    pub fn new(probe: ProbeFn) -> Self {
        Self { probe }
    }
}

#[async_trait::async_trait]
impl PollExecutor for ConditionExecutor {
    async fn execute(&self, session: &PollingSession) -> PollOutcome {
        match (self.probe)(session.clone()).await {
            Ok(observation) => match session.condition.evaluate(&observation) {
                Evaluation::Met => PollOutcome::met(observation),
                Evaluation::NotMet => PollOutcome::pending(observation),
                Evaluation::Unsupported => {
                    warn!(
                        session_id = %session.id,
                        condition = session.condition.kind(),
                        "No built-in evaluator for condition variant; reporting not met"
                    );
                    PollOutcome::pending(observation)
                }
            },
            Err(message) => PollOutcome::error(message),
        }
    }
}

/// Future type produced by [`FnExecutor`] callbacks
pub type OutcomeFuture = Pin<Box<dyn Future<Output = PollOutcome> + Send>>;

/// Adapter turning a plain async closure into a [`PollExecutor`]
pub struct FnExecutor {
    f: Arc<dyn Fn(PollingSession) -> OutcomeFuture + Send + Sync>,
}

impl FnExecutor {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(PollingSession) -> OutcomeFuture + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait::async_trait]
impl PollExecutor for FnExecutor {
    async fn execute(&self, session: &PollingSession) -> PollOutcome {
        (self.f)(session.clone()).await
    }
}

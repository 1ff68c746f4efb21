//! The concurrency governor.
//!
//! Wraps every orchestrator execution with four gates: a non-blocking
//! try-lock on the run key, the cooldown window, the attempt ceiling, and
//! per-repository TTL slots. When the distributed coordinator is
//! unreachable the governor fails open and relies on the idempotent event
//! store and PR check to reconcile duplicates.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::RunStore;

/// Retry/cooldown/concurrency configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempt ceiling before the run is terminally blocked
    pub max_pipeline_attempts: u32,
    /// Seconds a run must rest between attempts
    pub cooldown_seconds: u64,
    /// Base of the exponential backoff
    pub base_backoff_seconds: u64,
    /// Backoff ceiling
    pub max_backoff_seconds: u64,
    /// Concurrent runs allowed per repository
    pub repo_concurrency_limit: u64,
    /// TTL of locks and slots
    pub slot_ttl_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_pipeline_attempts: 3,
            cooldown_seconds: 900,
            base_backoff_seconds: 30,
            max_backoff_seconds: 600,
            repo_concurrency_limit: 2,
            slot_ttl_seconds: 1200,
        }
    }
}

/// `min(base * 2^(attempt-1), max)`; attempt is 1-indexed.
#[must_use]
pub fn compute_backoff_seconds(attempt: u32, base: u64, maximum: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    base.saturating_mul(1_u64 << exponent).min(maximum)
}

/// Coordinator transport failure; the governor treats it as "allow".
#[derive(Debug, Error)]
#[error("coordinator unavailable: {0}")]
pub struct CoordinatorError(pub String);

/// Distributed coordination primitives.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Non-blocking lock; `true` when acquired.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoordinatorError>;

    /// Release a lock taken with [`Coordinator::try_lock`].
    async fn release_lock(&self, key: &str) -> Result<(), CoordinatorError>;

    /// Bounded slot acquisition; `true` when a slot was taken.
    async fn acquire_slot(
        &self,
        key: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError>;

    /// Release a slot taken with [`Coordinator::acquire_slot`].
    async fn release_slot(&self, key: &str) -> Result<(), CoordinatorError>;

    /// Sliding-window rate limit; `true` when the call is within limits.
    async fn check_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, CoordinatorError>;
}

#[derive(Default)]
struct CoordinatorState {
    locks: HashMap<String, Instant>,
    slots: HashMap<String, Vec<Instant>>,
    rate_hits: HashMap<String, Vec<Instant>>,
}

/// Single-process coordinator with TTL expiry. The default backend when no
/// external coordinator is configured.
#[derive(Default)]
pub struct InProcessCoordinator {
    state: Mutex<CoordinatorState>,
}

impl InProcessCoordinator {
    /// An empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordinator for InProcessCoordinator {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CoordinatorError> {
        let mut state = self.state.lock().expect("coordinator mutex");
        let now = Instant::now();
        if let Some(expires) = state.locks.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        state.locks.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), CoordinatorError> {
        self.state
            .lock()
            .expect("coordinator mutex")
            .locks
            .remove(key);
        Ok(())
    }

    async fn acquire_slot(
        &self,
        key: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut state = self.state.lock().expect("coordinator mutex");
        let now = Instant::now();
        let slots = state.slots.entry(key.to_string()).or_default();
        slots.retain(|expires| *expires > now);
        if slots.len() as u64 >= limit {
            return Ok(false);
        }
        slots.push(now + ttl);
        Ok(true)
    }

    async fn release_slot(&self, key: &str) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().expect("coordinator mutex");
        if let Some(slots) = state.slots.get_mut(key) {
            slots.pop();
        }
        Ok(())
    }

    async fn check_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut state = self.state.lock().expect("coordinator mutex");
        let now = Instant::now();
        let hits = state.rate_hits.entry(key.to_string()).or_default();
        hits.retain(|at| now.duration_since(*at) < window);
        if hits.len() as u64 >= limit {
            return Ok(false);
        }
        hits.push(now);
        Ok(true)
    }
}

/// Errors the governor returns to the dispatcher.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retryable: the dispatcher reschedules after `countdown_seconds`.
    #[error("retryable ({reason}), retry in {countdown_seconds}s")]
    Retryable {
        reason: &'static str,
        countdown_seconds: u64,
    },
    /// Terminal for this delivery; another holder is progressing the run.
    #[error("run is already being processed")]
    AlreadyRunning,
    /// Terminal: the run is blocked and must not be retried.
    #[error("run blocked: {reason}")]
    Blocked { reason: String },
    /// Fatal orchestration failure.
    #[error("pipeline failure: {0}")]
    Fatal(String),
    /// The run or its event is gone.
    #[error("run not found")]
    RunNotFound,
}

impl PipelineError {
    /// Whether the dispatcher should rearm.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Outcome of a governed execution.
#[derive(Debug)]
pub struct GovernorOutcome<T> {
    /// The orchestrator's result
    pub result: T,
    /// The attempt number this execution ran as
    pub attempt: u32,
}

/// Wraps orchestrator executions with the four gates.
pub struct Governor {
    run_store: Arc<dyn RunStore>,
    coordinator: Arc<dyn Coordinator>,
    policy: RetryPolicy,
}

impl Governor {
    /// Build a governor.
    #[must_use]
    pub fn new(
        run_store: Arc<dyn RunStore>,
        coordinator: Arc<dyn Coordinator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            run_store,
            coordinator,
            policy,
        }
    }

    /// The active retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn allow_on_error(context: &str, error: &CoordinatorError) -> bool {
        warn!(context, error = %error, "Coordinator unavailable; failing open");
        true
    }

    /// Execute `work` for `run_id` under the governor's gates. `repo` keys
    /// the per-repository slot counter.
    pub async fn execute<T, F, Fut>(
        &self,
        run_id: Uuid,
        repo: &str,
        work: F,
    ) -> Result<GovernorOutcome<T>, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let run = self
            .run_store
            .get_run(run_id)
            .await
            .map_err(|e| PipelineError::Fatal(e.to_string()))?
            .ok_or(PipelineError::RunNotFound)?;

        // Gate 3 first: a permanently blocked run never takes locks.
        if let Some(reason) = &run.blocked_reason {
            return Err(PipelineError::Blocked {
                reason: reason.clone(),
            });
        }
        if run.attempt_count >= self.policy.max_pipeline_attempts {
            self.mark_blocked(run_id).await;
            return Err(PipelineError::Blocked {
                reason: "max_attempts".to_string(),
            });
        }

        // Gate 2: cooldown between attempts.
        if run.attempt_count > 0 {
            let elapsed = (Utc::now() - run.updated_at).num_seconds().max(0) as u64;
            if elapsed < self.policy.cooldown_seconds {
                return Err(PipelineError::Retryable {
                    reason: "cooldown",
                    countdown_seconds: self.policy.cooldown_seconds - elapsed,
                });
            }
        }

        let ttl = Duration::from_secs(self.policy.slot_ttl_seconds);
        let lock_key = format!("pipeline:{}", run.run_key);

        // Gate 1: idempotency lock on the run key.
        let locked = match self.coordinator.try_lock(&lock_key, ttl).await {
            Ok(locked) => locked,
            Err(e) => Self::allow_on_error("try_lock", &e),
        };
        if !locked {
            info!(run_id = %run_id, run_key = %run.run_key, "Run already in progress; skipping");
            return Err(PipelineError::AlreadyRunning);
        }

        // Gate 4: per-repository slots.
        let slot_key = format!("repo:{repo}");
        let slot = match self
            .coordinator
            .acquire_slot(&slot_key, self.policy.repo_concurrency_limit, ttl)
            .await
        {
            Ok(slot) => slot,
            Err(e) => Self::allow_on_error("acquire_slot", &e),
        };
        if !slot {
            let _ = self.coordinator.release_lock(&lock_key).await;
            let attempt = run.attempt_count + 1;
            info!(run_id = %run_id, repo, "Repo concurrency limit reached; backing off");
            return Err(PipelineError::Retryable {
                reason: "repo_throttled",
                countdown_seconds: compute_backoff_seconds(
                    attempt,
                    self.policy.base_backoff_seconds,
                    self.policy.max_backoff_seconds,
                ),
            });
        }

        let attempt = run.attempt_count + 1;
        let update = self
            .run_store
            .update_run(run_id, Box::new(move |r| r.attempt_count = attempt))
            .await;
        if let Err(e) = update {
            let _ = self.coordinator.release_slot(&slot_key).await;
            let _ = self.coordinator.release_lock(&lock_key).await;
            return Err(PipelineError::Fatal(e.to_string()));
        }

        let outcome = work().await;

        let _ = self.coordinator.release_slot(&slot_key).await;
        let _ = self.coordinator.release_lock(&lock_key).await;

        match outcome {
            Ok(result) => Ok(GovernorOutcome { result, attempt }),
            Err(PipelineError::Retryable {
                reason,
                countdown_seconds,
            }) => {
                if attempt >= self.policy.max_pipeline_attempts {
                    self.mark_blocked(run_id).await;
                    return Err(PipelineError::Blocked {
                        reason: "max_attempts".to_string(),
                    });
                }
                // Recompute with the attempt that just failed
                let countdown = countdown_seconds.max(compute_backoff_seconds(
                    attempt,
                    self.policy.base_backoff_seconds,
                    self.policy.max_backoff_seconds,
                ));
                Err(PipelineError::Retryable {
                    reason,
                    countdown_seconds: countdown,
                })
            }
            Err(other) => Err(other),
        }
    }

    async fn mark_blocked(&self, run_id: Uuid) {
        let result = self
            .run_store
            .update_run(
                run_id,
                Box::new(|r| r.blocked_reason = Some("max_attempts".to_string())),
            )
            .await;
        if let Err(e) = result {
            warn!(run_id = %run_id, error = %e, "Failed to persist blocked_reason");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRunStore;

    fn governor(policy: RetryPolicy) -> (Governor, Arc<InMemoryRunStore>) {
        let store = Arc::new(InMemoryRunStore::new());
        let coordinator = Arc::new(InProcessCoordinator::new());
        (
            Governor::new(Arc::clone(&store) as _, coordinator, policy),
            store,
        )
    }

    #[test]
    fn test_backoff_formula() {
        assert_eq!(compute_backoff_seconds(1, 30, 600), 30);
        assert_eq!(compute_backoff_seconds(2, 30, 600), 60);
        assert_eq!(compute_backoff_seconds(3, 30, 600), 120);
        assert_eq!(compute_backoff_seconds(6, 30, 600), 600);
        // Large attempts saturate instead of overflowing
        assert_eq!(compute_backoff_seconds(64, 30, 600), 600);
    }

    #[tokio::test]
    async fn test_successful_execution_increments_attempt() {
        let (governor, store) = governor(RetryPolicy::default());
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();

        let outcome = governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(42) })
            .await
            .unwrap();
        assert_eq!(outcome.result, 42);
        assert_eq!(outcome.attempt, 1);

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_cooldown_gate() {
        let policy = RetryPolicy {
            cooldown_seconds: 3600,
            ..RetryPolicy::default()
        };
        let (governor, store) = governor(policy);
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();
        // Simulate a prior attempt just now
        store
            .update_run(run.id, Box::new(|r| r.attempt_count = 1))
            .await
            .unwrap();

        let err = governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(()) })
            .await
            .unwrap_err();
        match err {
            PipelineError::Retryable {
                reason,
                countdown_seconds,
            } => {
                assert_eq!(reason, "cooldown");
                assert!(countdown_seconds <= 3600 && countdown_seconds > 3500);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_attempts_blocks_permanently() {
        let policy = RetryPolicy {
            max_pipeline_attempts: 2,
            cooldown_seconds: 0,
            ..RetryPolicy::default()
        };
        let (governor, store) = governor(policy);
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();
        store
            .update_run(run.id, Box::new(|r| r.attempt_count = 2))
            .await
            .unwrap();

        let err = governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Blocked { ref reason } if reason == "max_attempts"));

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.blocked_reason.as_deref(), Some("max_attempts"));

        // And the blocked run short-circuits before any gate
        let err = governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_lock_gate_rejects_concurrent_holder() {
        let store = Arc::new(InMemoryRunStore::new());
        let coordinator = Arc::new(InProcessCoordinator::new());
        let governor = Governor::new(
            Arc::clone(&store) as _,
            Arc::clone(&coordinator) as _,
            RetryPolicy::default(),
        );
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();
        assert!(coordinator
            .try_lock("pipeline:key", Duration::from_secs(60))
            .await
            .unwrap());

        let err = governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));
        // No attempt was consumed
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_repo_slot_gate_backs_off_exponentially() {
        let policy = RetryPolicy {
            repo_concurrency_limit: 1,
            cooldown_seconds: 0,
            ..RetryPolicy::default()
        };
        let store = Arc::new(InMemoryRunStore::new());
        let coordinator = Arc::new(InProcessCoordinator::new());
        let governor = Governor::new(
            Arc::clone(&store) as _,
            Arc::clone(&coordinator) as _,
            policy.clone(),
        );
        let run = store.create_run(Uuid::new_v4(), "key-a").await.unwrap();

        // Exhaust the repo's only slot
        assert!(coordinator
            .acquire_slot("repo:acme/widgets", 1, Duration::from_secs(60))
            .await
            .unwrap());

        let err = governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(()) })
            .await
            .unwrap_err();
        match err {
            PipelineError::Retryable {
                reason,
                countdown_seconds,
            } => {
                assert_eq!(reason, "repo_throttled");
                assert_eq!(
                    countdown_seconds,
                    compute_backoff_seconds(1, policy.base_backoff_seconds, policy.max_backoff_seconds)
                );
            }
            other => panic!("expected throttle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_work_failure_schedules_retry() {
        let policy = RetryPolicy {
            cooldown_seconds: 0,
            max_pipeline_attempts: 3,
            ..RetryPolicy::default()
        };
        let (governor, store) = governor(policy.clone());
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();

        let err = governor
            .execute(run.id, "acme/widgets", || async {
                Err::<(), _>(PipelineError::Retryable {
                    reason: "transient_error",
                    countdown_seconds: 0,
                })
            })
            .await
            .unwrap_err();
        match err {
            PipelineError::Retryable {
                countdown_seconds, ..
            } => assert_eq!(
                countdown_seconds,
                compute_backoff_seconds(1, policy.base_backoff_seconds, policy.max_backoff_seconds)
            ),
            other => panic!("expected retryable, got {other:?}"),
        }
        // The failed attempt was still consumed
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_at_ceiling_blocks() {
        let policy = RetryPolicy {
            cooldown_seconds: 0,
            max_pipeline_attempts: 1,
            ..RetryPolicy::default()
        };
        let (governor, store) = governor(policy);
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();

        let err = governor
            .execute(run.id, "acme/widgets", || async {
                Err::<(), _>(PipelineError::Retryable {
                    reason: "transient_error",
                    countdown_seconds: 5,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Blocked { ref reason } if reason == "max_attempts"));
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.blocked_reason.as_deref(), Some("max_attempts"));
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let coordinator = InProcessCoordinator::new();
        let window = Duration::from_secs(60);
        assert!(coordinator.check_rate_limit("hook", 2, window).await.unwrap());
        assert!(coordinator.check_rate_limit("hook", 2, window).await.unwrap());
        assert!(!coordinator.check_rate_limit("hook", 2, window).await.unwrap());
        // A different key has its own window
        assert!(coordinator.check_rate_limit("other", 2, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_slot_ttl_expiry() {
        let coordinator = InProcessCoordinator::new();
        let ttl = Duration::from_millis(10);
        assert!(coordinator.acquire_slot("repo", 1, ttl).await.unwrap());
        assert!(!coordinator.acquire_slot("repo", 1, ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Expired slots free capacity without an explicit release
        assert!(coordinator.acquire_slot("repo", 1, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_released_after_execution() {
        let store = Arc::new(InMemoryRunStore::new());
        let coordinator = Arc::new(InProcessCoordinator::new());
        let governor = Governor::new(
            Arc::clone(&store) as _,
            Arc::clone(&coordinator) as _,
            RetryPolicy {
                cooldown_seconds: 0,
                ..RetryPolicy::default()
            },
        );
        let run = store.create_run(Uuid::new_v4(), "key").await.unwrap();

        governor
            .execute(run.id, "acme/widgets", || async { Ok::<_, PipelineError>(()) })
            .await
            .unwrap();

        // Both the lock and the slot are free again
        assert!(coordinator
            .try_lock("pipeline:key", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(coordinator
            .acquire_slot("repo:acme/widgets", 2, Duration::from_secs(1))
            .await
            .unwrap());
    }
}

//! Pipeline dispatch.
//!
//! Each accepted event gets its own worker task that drives the governed
//! orchestrator until a terminal outcome: retryable errors sleep out their
//! countdown and re-enter the governor; everything else ends the task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use pipeline::{
    EventStore, FixPipelineOrchestrator, Governor, PipelineError, RunStore,
};
use schemas::{EventStatus, PipelineEvent};

/// Ceiling on a single retry sleep so a worker never parks for hours.
const MAX_RETRY_SLEEP: Duration = Duration::from_secs(300);

/// Spawns and supervises pipeline worker tasks.
pub struct Dispatcher {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    governor: Arc<Governor>,
    orchestrator: Arc<FixPipelineOrchestrator>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    /// Build a dispatcher with a bounded worker pool.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        governor: Arc<Governor>,
        orchestrator: Arc<FixPipelineOrchestrator>,
        worker_concurrency: usize,
    ) -> Self {
        Self {
            event_store,
            run_store,
            governor,
            orchestrator,
            workers: Arc::new(Semaphore::new(worker_concurrency.max(1))),
        }
    }

    /// Create (or reuse) the run for `event` and spawn its worker task.
    /// The webhook response never waits for the pipeline.
    pub async fn dispatch(&self, event: &PipelineEvent) -> Result<(), PipelineError> {
        let run = self
            .run_store
            .create_run(event.id, &event.idempotency_key)
            .await
            .map_err(|e| PipelineError::Fatal(e.to_string()))?;

        let event_store = Arc::clone(&self.event_store);
        let governor = Arc::clone(&self.governor);
        let orchestrator = Arc::clone(&self.orchestrator);
        let workers = Arc::clone(&self.workers);
        let event_id = event.id;
        let repo = event.repo.clone();
        let run_id = run.id;

        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire().await else {
                return;
            };
            let _ = event_store
                .update_status(event_id, EventStatus::Processing)
                .await;

            loop {
                let outcome = governor
                    .execute(run_id, &repo, || orchestrator.run(run_id))
                    .await;
                match outcome {
                    Ok(outcome) => {
                        info!(
                            run_id = %run_id,
                            attempt = outcome.attempt,
                            success = outcome.result.success,
                            status = outcome.result.status.name(),
                            "Pipeline run finished"
                        );
                        let final_status = if outcome.result.success {
                            EventStatus::Completed
                        } else {
                            EventStatus::Failed
                        };
                        let _ = event_store.update_status(event_id, final_status).await;
                        break;
                    }
                    Err(PipelineError::Retryable {
                        reason,
                        countdown_seconds,
                    }) => {
                        let sleep = Duration::from_secs(countdown_seconds).min(MAX_RETRY_SLEEP);
                        warn!(
                            run_id = %run_id,
                            reason,
                            countdown_seconds,
                            "Pipeline retry scheduled"
                        );
                        tokio::time::sleep(sleep).await;
                    }
                    Err(PipelineError::AlreadyRunning) => {
                        info!(run_id = %run_id, "Another worker owns this run");
                        break;
                    }
                    Err(PipelineError::Blocked { reason }) => {
                        warn!(run_id = %run_id, reason = %reason, "Pipeline run blocked");
                        let _ = event_store.update_status(event_id, EventStatus::Failed).await;
                        break;
                    }
                    Err(e) => {
                        error!(run_id = %run_id, error = %e, "Pipeline run failed");
                        let _ = event_store.update_status(event_id, EventStatus::Failed).await;
                        break;
                    }
                }
            }
        });

        Ok(())
    }
}

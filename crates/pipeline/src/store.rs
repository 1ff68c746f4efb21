//! Storage seams for events and pipeline runs.
//!
//! The core is storage-agnostic: these traits describe exactly the fields
//! and lookups it needs, and the in-memory implementations back the default
//! deployment and every test.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use schemas::{EventStatus, FixPipelineRun, NormalizedPipelineEvent, PipelineEvent};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {0} not found")]
    EventNotFound(Uuid),
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the caller should retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Idempotent pipeline-event storage.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a normalized event. A second insert with the same
    /// idempotency key returns the existing row with `false`.
    async fn store_event(
        &self,
        event: NormalizedPipelineEvent,
    ) -> Result<(PipelineEvent, bool), StoreError>;

    /// Fetch by id.
    async fn get_event(&self, id: Uuid) -> Result<Option<PipelineEvent>, StoreError>;

    /// Fetch by idempotency key.
    async fn get_event_by_key(&self, key: &str) -> Result<Option<PipelineEvent>, StoreError>;

    /// Advance the processing status.
    async fn update_status(&self, id: Uuid, status: EventStatus) -> Result<(), StoreError>;
}

/// Pipeline-run storage.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a fresh `pending` run for an event.
    async fn create_run(&self, event_id: Uuid, run_key: &str)
        -> Result<FixPipelineRun, StoreError>;

    /// Fetch by id.
    async fn get_run(&self, id: Uuid) -> Result<Option<FixPipelineRun>, StoreError>;

    /// Fetch the run for an event, if any.
    async fn get_run_by_event(&self, event_id: Uuid)
        -> Result<Option<FixPipelineRun>, StoreError>;

    /// Apply `mutate` to the stored run and persist the result. The
    /// store bumps `updated_at`; the closure sees the latest state.
    ///
    /// Written with an explicit `Pin<Box<dyn Future>>` return (rather than
    /// `async fn`, which `#[async_trait]` would rewrite using a named
    /// lifetime for the `mutate` parameter) so that `mutate`'s `&mut
    /// FixPipelineRun` argument stays higher-ranked instead of being
    /// pinned to a single concrete lifetime.
    fn update_run<'a>(
        &'a self,
        id: Uuid,
        mutate: Box<dyn FnOnce(&mut FixPipelineRun) + Send>,
    ) -> Pin<Box<dyn Future<Output = Result<FixPipelineRun, StoreError>> + Send + 'a>>;
}

/// In-memory event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<Uuid, PipelineEvent>>>,
    by_key: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl InMemoryEventStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(
        &self,
        event: NormalizedPipelineEvent,
    ) -> Result<(PipelineEvent, bool), StoreError> {
        let mut by_key = self.by_key.write().await;
        let mut events = self.events.write().await;

        if let Some(existing_id) = by_key.get(&event.idempotency_key) {
            let existing = events
                .get_mut(existing_id)
                .ok_or(StoreError::EventNotFound(*existing_id))?;
            existing.updated_at = Utc::now();
            return Ok((existing.clone(), false));
        }

        let row = PipelineEvent::from_normalized(event);
        by_key.insert(row.idempotency_key.clone(), row.id);
        events.insert(row.id, row.clone());
        Ok((row, true))
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<PipelineEvent>, StoreError> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn get_event_by_key(&self, key: &str) -> Result<Option<PipelineEvent>, StoreError> {
        let by_key = self.by_key.read().await;
        let Some(id) = by_key.get(key) else {
            return Ok(None);
        };
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: EventStatus) -> Result<(), StoreError> {
        let mut events = self.events.write().await;
        let event = events.get_mut(&id).ok_or(StoreError::EventNotFound(id))?;
        // Status only advances
        if status > event.status {
            event.status = status;
            event.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// In-memory run store.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, FixPipelineRun>>>,
    by_event: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl InMemoryRunStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn update_run_impl(
        &self,
        id: Uuid,
        mutate: Box<dyn FnOnce(&mut FixPipelineRun) + Send>,
    ) -> Result<FixPipelineRun, StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;
        mutate(run);
        run.updated_at = Utc::now();
        Ok(run.clone())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(
        &self,
        event_id: Uuid,
        run_key: &str,
    ) -> Result<FixPipelineRun, StoreError> {
        let mut by_event = self.by_event.write().await;
        let mut runs = self.runs.write().await;

        if let Some(existing_id) = by_event.get(&event_id) {
            if let Some(existing) = runs.get(existing_id) {
                return Ok(existing.clone());
            }
        }

        let run = FixPipelineRun::new(event_id, run_key);
        by_event.insert(event_id, run.id);
        runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<FixPipelineRun>, StoreError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn get_run_by_event(
        &self,
        event_id: Uuid,
    ) -> Result<Option<FixPipelineRun>, StoreError> {
        let by_event = self.by_event.read().await;
        let Some(id) = by_event.get(&event_id) else {
            return Ok(None);
        };
        Ok(self.runs.read().await.get(id).cloned())
    }

    fn update_run<'a>(
        &'a self,
        id: Uuid,
        mutate: Box<dyn FnOnce(&mut FixPipelineRun) + Send>,
    ) -> Pin<Box<dyn Future<Output = Result<FixPipelineRun, StoreError>> + Send + 'a>> {
        Box::pin(self.update_run_impl(id, mutate))
    }
}

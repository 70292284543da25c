//! Persistence contracts the engine owns: run snapshots and retry state.
//!
//! The context repository must return defensive copies on read and is
//! written on every transition. The retry state store is asynchronous by
//! default with a bounded timeout budget; a synchronous mode is available
//! for tests. In-memory implementations of both ship here; durable backends
//! are external collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::circuit::BreakerSnapshot;
use super::retry::RetryContext;
use super::run::WorkflowRun;
use crate::error::{ErrorKind, WorkflowError};

/// Persistence failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("repository: {0}")]
pub struct RepositoryError(pub String);

impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        WorkflowError::new(ErrorKind::Infrastructure, err.to_string())
    }
}

/// Stores run snapshots by instance id.
///
/// Reads return defensive copies: callers can never alias the stored state.
/// The engine writes after every step transition, before the caller
/// observes the response.
#[async_trait]
pub trait WorkflowContextRepository: Send + Sync {
    async fn save(&self, run: &WorkflowRun) -> Result<(), RepositoryError>;
    async fn find_by_instance_id(
        &self,
        run_id: &str,
    ) -> Result<Option<WorkflowRun>, RepositoryError>;
    async fn delete_by_instance_id(&self, run_id: &str) -> Result<(), RepositoryError>;
    async fn exists_by_instance_id(&self, run_id: &str) -> Result<bool, RepositoryError>;
}

/// In-memory context repository for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryContextRepository {
    runs: DashMap<String, WorkflowRun>,
}

impl InMemoryContextRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowContextRepository for InMemoryContextRepository {
    async fn save(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn find_by_instance_id(
        &self,
        run_id: &str,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.clone()))
    }

    async fn delete_by_instance_id(&self, run_id: &str) -> Result<(), RepositoryError> {
        self.runs.remove(run_id);
        Ok(())
    }

    async fn exists_by_instance_id(&self, run_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.runs.contains_key(run_id))
    }
}

/// Stores retry contexts and circuit-breaker snapshots.
#[async_trait]
pub trait RetryStateStore: Send + Sync {
    async fn save_retry_context(&self, ctx: &RetryContext) -> Result<(), RepositoryError>;
    async fn load_retry_context(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<Option<RetryContext>, RepositoryError>;
    async fn delete_retry_context(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<(), RepositoryError>;
    async fn save_breaker_snapshot(
        &self,
        snapshot: &BreakerSnapshot,
    ) -> Result<(), RepositoryError>;
    async fn load_breaker_snapshot(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<BreakerSnapshot>, RepositoryError>;
    /// Deletes all retry state of one run.
    async fn delete_run_state(&self, run_id: &str) -> Result<(), RepositoryError>;
}

/// In-memory retry state store.
#[derive(Default)]
pub struct InMemoryRetryStateStore {
    contexts: DashMap<(String, String), RetryContext>,
    breakers: DashMap<(String, String), BreakerSnapshot>,
}

impl InMemoryRetryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryStateStore for InMemoryRetryStateStore {
    async fn save_retry_context(&self, ctx: &RetryContext) -> Result<(), RepositoryError> {
        self.contexts
            .insert((ctx.run_id.clone(), ctx.step_id.clone()), ctx.clone());
        Ok(())
    }

    async fn load_retry_context(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<Option<RetryContext>, RepositoryError> {
        Ok(self
            .contexts
            .get(&(run_id.to_string(), step_id.to_string()))
            .map(|c| c.clone()))
    }

    async fn delete_retry_context(
        &self,
        run_id: &str,
        step_id: &str,
    ) -> Result<(), RepositoryError> {
        self.contexts
            .remove(&(run_id.to_string(), step_id.to_string()));
        Ok(())
    }

    async fn save_breaker_snapshot(
        &self,
        snapshot: &BreakerSnapshot,
    ) -> Result<(), RepositoryError> {
        self.breakers.insert(
            (snapshot.workflow_id.clone(), snapshot.step_id.clone()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn load_breaker_snapshot(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<BreakerSnapshot>, RepositoryError> {
        Ok(self
            .breakers
            .get(&(workflow_id.to_string(), step_id.to_string()))
            .map(|s| s.clone()))
    }

    async fn delete_run_state(&self, run_id: &str) -> Result<(), RepositoryError> {
        self.contexts.retain(|(rid, _), _| rid != run_id);
        Ok(())
    }
}

/// How retry-state writes are performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Fire-and-forget on the runtime with a timeout budget; failures and
    /// timeouts are logged, never surfaced.
    Async,
    /// Awaited inline. Deterministic; for tests.
    Sync,
}

/// Mode-aware wrapper the engine uses for retry-state writes.
#[derive(Clone)]
pub struct RetryStatePersistence {
    store: Arc<dyn RetryStateStore>,
    mode: PersistenceMode,
    timeout: Duration,
}

impl RetryStatePersistence {
    /// Default write budget for async mode.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(store: Arc<dyn RetryStateStore>, mode: PersistenceMode, timeout: Duration) -> Self {
        Self {
            store,
            mode,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RetryStateStore> {
        &self.store
    }

    /// Persists a retry context under the configured mode.
    pub async fn save_retry_context(&self, ctx: &RetryContext) {
        match self.mode {
            PersistenceMode::Sync => {
                if let Err(e) = self.store.save_retry_context(ctx).await {
                    tracing::warn!(error = %e, "retry context save failed");
                }
            }
            PersistenceMode::Async => {
                let store = self.store.clone();
                let ctx = ctx.clone();
                let budget = self.timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(budget, store.save_retry_context(&ctx)).await {
                        Ok(Err(e)) => tracing::warn!(error = %e, "retry context save failed"),
                        Err(_) => tracing::warn!("retry context save timed out"),
                        Ok(Ok(())) => {}
                    }
                });
            }
        }
    }

    /// Persists a breaker snapshot under the configured mode.
    pub async fn save_breaker_snapshot(&self, snapshot: &BreakerSnapshot) {
        match self.mode {
            PersistenceMode::Sync => {
                if let Err(e) = self.store.save_breaker_snapshot(snapshot).await {
                    tracing::warn!(error = %e, "breaker snapshot save failed");
                }
            }
            PersistenceMode::Async => {
                let store = self.store.clone();
                let snapshot = snapshot.clone();
                let budget = self.timeout;
                tokio::spawn(async move {
                    match tokio::time::timeout(budget, store.save_breaker_snapshot(&snapshot)).await
                    {
                        Ok(Err(e)) => tracing::warn!(error = %e, "breaker snapshot save failed"),
                        Err(_) => tracing::warn!("breaker snapshot save timed out"),
                        Ok(Ok(())) => {}
                    }
                });
            }
        }
    }
}

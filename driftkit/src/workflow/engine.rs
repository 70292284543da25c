//! Workflow engine: run lifecycle, step dispatch, suspend/resume, retry,
//! circuit breaking, and persistence.
//!
//! Runs execute on a bounded worker pool; at most one worker mutates a given
//! run (per-run mutex), and the run snapshot is persisted after every step
//! transition before the caller observes the boundary. Suspensions are keyed
//! by message id: user-input suspensions resume through [`WorkflowEngine::resume`]
//! (re-executing the step with the bound input), async-task suspensions
//! resume when the background task completes (the task output becomes the
//! step output and the step is not re-executed).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::async_task::AsyncTaskRegistry;
use super::circuit::{CircuitBreakerConfig, CircuitBreakerRegistry};
use super::definition::{OnInvocationsLimit, StepDefinition, WorkflowDefinition};
use super::pool::{WorkerPool, WorkerPoolConfig};
use super::repository::{
    InMemoryContextRepository, InMemoryRetryStateStore, PersistenceMode, RetryStatePersistence,
    RetryStateStore, WorkflowContextRepository,
};
use super::retry::{
    notify, ListenerEvent, LoggingRetryListener, RetryContext, RetryListener, StepRetryPolicy,
};
use super::run::{RunStatus, WorkflowRun};
use super::step::{StepContext, StepResult};
use crate::error::{ErrorKind, WorkflowError};
use crate::schema::{PropertyBag, Schema, SchemaRegistry};

/// Engine tuning (the `engine.*` and `retry.*` config options).
#[derive(Clone)]
pub struct EngineConfig {
    /// Master switch; a disabled engine rejects every run.
    pub enabled: bool,
    pub pool: WorkerPoolConfig,
    /// Pool for background async tasks; sized small.
    pub background_pool: WorkerPoolConfig,
    /// Applied when a step omits a retry policy.
    pub retry_defaults: StepRetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub persistence_mode: PersistenceMode,
    pub persistence_timeout: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool: WorkerPoolConfig::default(),
            background_pool: WorkerPoolConfig {
                core_workers: 1,
                max_workers: 2,
                queue_capacity: 32,
            },
            retry_defaults: StepRetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            persistence_mode: PersistenceMode::Async,
            persistence_timeout: RetryStatePersistence::DEFAULT_TIMEOUT,
        }
    }
}

/// Caller-supplied options for a new run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub chat_id: Option<String>,
    pub language: Option<String>,
}

/// Input carried by a resume.
#[derive(Debug, Clone)]
pub enum ResumeInput {
    /// A property bag bound against the suspended step's input schema.
    Properties(PropertyBag),
    /// An already-typed value (async task outputs, programmatic resumes).
    Value(Value),
}

/// Where a drive of the run stopped; the caller-visible outcome.
#[derive(Debug, Clone)]
pub enum RunBoundary {
    Completed {
        run_id: String,
        output: Value,
    },
    Suspended {
        run_id: String,
        message_id: String,
        next_schema: Option<Arc<Schema>>,
        percent_complete: u8,
        is_async: bool,
    },
    Failed {
        run_id: String,
        error: WorkflowError,
    },
    Cancelled {
        run_id: String,
    },
}

impl RunBoundary {
    pub fn run_id(&self) -> &str {
        match self {
            RunBoundary::Completed { run_id, .. }
            | RunBoundary::Suspended { run_id, .. }
            | RunBoundary::Failed { run_id, .. }
            | RunBoundary::Cancelled { run_id } => run_id,
        }
    }
}

/// Emitted when a background task completes and its run advances.
#[derive(Debug, Clone)]
pub struct AsyncCompletion {
    pub message_id: String,
    pub run_id: String,
    pub boundary: RunBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuspensionKind {
    UserInput,
    AsyncTask,
}

#[derive(Debug, Clone)]
struct Suspension {
    run_id: String,
    step_id: String,
    kind: SuspensionKind,
}

/// Builder for [`WorkflowEngine`]. Defaults: in-memory repositories, a
/// logging retry listener, and synchronous construction of everything else.
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    schemas: Option<Arc<SchemaRegistry>>,
    repository: Option<Arc<dyn WorkflowContextRepository>>,
    retry_store: Option<Arc<dyn RetryStateStore>>,
    tasks: Option<Arc<AsyncTaskRegistry>>,
    listeners: Vec<Arc<dyn RetryListener>>,
}

impl WorkflowEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn WorkflowContextRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn retry_store(mut self, store: Arc<dyn RetryStateStore>) -> Self {
        self.retry_store = Some(store);
        self
    }

    pub fn tasks(mut self, tasks: Arc<AsyncTaskRegistry>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn retry_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let config = self.config;
        let retry_store = self
            .retry_store
            .unwrap_or_else(|| Arc::new(InMemoryRetryStateStore::new()));
        let mut listeners = self.listeners;
        if listeners.is_empty() {
            listeners.push(Arc::new(LoggingRetryListener));
        }
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                schemas: self.schemas.unwrap_or_default(),
                repository: self
                    .repository
                    .unwrap_or_else(|| Arc::new(InMemoryContextRepository::new())),
                retry_persistence: RetryStatePersistence::new(
                    retry_store,
                    config.persistence_mode,
                    config.persistence_timeout,
                ),
                breakers: CircuitBreakerRegistry::new(config.breaker.clone()),
                pool: WorkerPool::new(config.pool.clone()),
                background: WorkerPool::new(config.background_pool.clone()),
                tasks: self.tasks.unwrap_or_else(|| Arc::new(AsyncTaskRegistry::new())),
                listeners,
                workflows: std::sync::RwLock::new(Arc::new(HashMap::new())),
                suspensions: DashMap::new(),
                run_locks: DashMap::new(),
                cancel_tokens: DashMap::new(),
                async_results: DashMap::new(),
                completions_tx,
                completions_rx: std::sync::Mutex::new(Some(completions_rx)),
                config,
            }),
        }
    }
}

/// The scheduler over registered workflow definitions.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    workflows: std::sync::RwLock<Arc<HashMap<String, Arc<WorkflowDefinition>>>>,
    schemas: Arc<SchemaRegistry>,
    repository: Arc<dyn WorkflowContextRepository>,
    retry_persistence: RetryStatePersistence,
    breakers: CircuitBreakerRegistry,
    pool: WorkerPool,
    background: WorkerPool,
    tasks: Arc<AsyncTaskRegistry>,
    listeners: Vec<Arc<dyn RetryListener>>,
    suspensions: DashMap<String, Suspension>,
    run_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    cancel_tokens: DashMap<String, CancellationToken>,
    async_results: DashMap<String, RunBoundary>,
    completions_tx: mpsc::UnboundedSender<AsyncCompletion>,
    completions_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<AsyncCompletion>>>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            config: EngineConfig::default(),
            schemas: None,
            repository: None,
            retry_store: None,
            tasks: None,
            listeners: Vec::new(),
        }
    }

    /// Engine with all defaults (in-memory persistence).
    pub fn with_defaults() -> Self {
        Self::builder().build()
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.inner.schemas
    }

    /// Registers a validated workflow definition; replaces any previous
    /// definition with the same id (copy-on-write).
    pub fn register_workflow(&self, definition: WorkflowDefinition) {
        let mut guard = self.inner.workflows.write().expect("workflow registry poisoned");
        let mut next = HashMap::clone(&guard);
        next.insert(
            definition.workflow_id().to_string(),
            Arc::new(definition),
        );
        *guard = Arc::new(next);
    }

    /// Registered workflow ids, sorted.
    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .workflows
            .read()
            .expect("workflow registry poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.inner.definition(workflow_id).ok()
    }

    /// Input schema of the initial step, resolved through the registry.
    pub fn initial_schema(
        &self,
        workflow_id: &str,
    ) -> Result<Option<Arc<Schema>>, WorkflowError> {
        let def = self.inner.definition(workflow_id)?;
        Ok(self.inner.resolve_schema(def.initial_step().input_schema.as_deref()))
    }

    /// All schemas referenced by the workflow's steps (input and output),
    /// deduplicated, in step order.
    pub fn workflow_schemas(&self, workflow_id: &str) -> Result<Vec<Arc<Schema>>, WorkflowError> {
        let def = self.inner.definition(workflow_id)?;
        let mut seen = std::collections::HashSet::new();
        let mut schemas = Vec::new();
        for step in def.steps() {
            for id in [step.input_schema.as_deref(), step.output_schema.as_deref()]
                .into_iter()
                .flatten()
            {
                if seen.insert(id.to_string()) {
                    if let Some(schema) = self.inner.schemas.schema_by_id(id) {
                        schemas.push(schema);
                    }
                }
            }
        }
        Ok(schemas)
    }

    /// Starts a new run with the given trigger data and drives it to its
    /// first boundary.
    pub async fn start_run(
        &self,
        workflow_id: &str,
        trigger_data: Value,
        options: RunOptions,
    ) -> Result<RunBoundary, WorkflowError> {
        let inner = self.inner.clone();
        if !inner.config.enabled {
            return Err(WorkflowError::permanent("workflow engine is disabled"));
        }
        let def = inner.definition(workflow_id)?;

        let mut run = WorkflowRun::new(workflow_id, trigger_data);
        run.chat_id = options.chat_id;
        run.language = options.language;
        run.current_step_id = Some(def.initial_step().step_id.clone());
        let run_id = run.run_id.clone();

        let token = CancellationToken::new();
        inner.cancel_tokens.insert(run_id.clone(), token);
        inner.repository.save(&run).await?;

        let job_inner = inner.clone();
        let boundary = inner
            .pool
            .run(async move {
                let lock = job_inner.run_lock(&run.run_id);
                let _guard = lock.lock().await;
                job_inner.drive(def, run, None, None).await
            })
            .await;
        Ok(boundary)
    }

    /// Resumes a suspended run by message id.
    ///
    /// The suspension must exist and match the run's recorded state, else
    /// `InvalidResume`. A binding failure of the supplied properties leaves
    /// the suspension intact so the caller can retry with corrected input.
    pub async fn resume(
        &self,
        message_id: &str,
        input: ResumeInput,
    ) -> Result<RunBoundary, WorkflowError> {
        let inner = self.inner.clone();
        if !inner.config.enabled {
            return Err(WorkflowError::permanent("workflow engine is disabled"));
        }
        let suspension = inner
            .suspensions
            .get(message_id)
            .map(|s| s.clone())
            .ok_or_else(|| invalid_resume(message_id, "unknown or already consumed"))?;

        let message_id = message_id.to_string();
        let job_inner = inner.clone();
        inner
            .pool
            .run(async move {
                let lock = job_inner.run_lock(&suspension.run_id);
                let _guard = lock.lock().await;
                job_inner.resume_locked(&message_id, input).await
            })
            .await
    }

    /// Tracked outcome of an async message: `None` while the task is still
    /// in flight.
    pub fn async_status(&self, message_id: &str) -> Option<RunBoundary> {
        self.inner.async_results.get(message_id).map(|b| b.clone())
    }

    /// Receiver of async-task completions. Yields `Some` only on the first
    /// call; one consumer (the chat layer) owns the stream.
    pub fn take_completions(&self) -> Option<mpsc::UnboundedReceiver<AsyncCompletion>> {
        self.inner.completions_rx.lock().expect("completions lock").take()
    }

    /// Requests cancellation: takes effect at the next await point of a
    /// running drive; a parked (suspended) run is finalized immediately.
    pub async fn cancel(&self, run_id: &str) -> Result<(), WorkflowError> {
        let inner = &self.inner;
        if let Some(token) = inner.cancel_tokens.get(run_id) {
            token.cancel();
        }
        let lock = inner.run_lock(run_id);
        let _guard = lock.lock().await;
        if let Some(mut run) = inner.repository.find_by_instance_id(run_id).await? {
            if run.status == RunStatus::Suspended {
                inner.suspensions.retain(|_, s| s.run_id != run_id);
                run.status = RunStatus::Cancelled;
                run.touch();
                inner.repository.save(&run).await?;
            }
        }
        Ok(())
    }

    /// Persisted snapshot of a run (defensive copy).
    pub async fn run_snapshot(&self, run_id: &str) -> Result<Option<WorkflowRun>, WorkflowError> {
        Ok(self.inner.repository.find_by_instance_id(run_id).await?)
    }

    /// Removes a run and all its retry state.
    pub async fn purge_run(&self, run_id: &str) -> Result<(), WorkflowError> {
        let inner = &self.inner;
        inner.repository.delete_by_instance_id(run_id).await?;
        if let Err(e) = inner
            .retry_persistence
            .store()
            .delete_run_state(run_id)
            .await
        {
            tracing::warn!(run_id, error = %e, "retry state purge failed");
        }
        inner.suspensions.retain(|_, s| s.run_id != run_id);
        inner.cancel_tokens.remove(run_id);
        inner.run_locks.remove(run_id);
        Ok(())
    }

    /// Drains the pools; accepted work still completes.
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
        self.inner.background.shutdown();
    }
}

fn invalid_resume(message_id: &str, reason: &str) -> WorkflowError {
    WorkflowError::new(
        ErrorKind::InvalidResume,
        format!("message `{message_id}`: {reason}"),
    )
}

impl EngineInner {
    fn definition(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.workflows
            .read()
            .expect("workflow registry poisoned")
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::new(
                    ErrorKind::UnknownWorkflow,
                    format!("workflow `{workflow_id}` is not registered"),
                )
            })
    }

    fn run_lock(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.run_locks
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    fn cancel_requested(&self, run_id: &str) -> bool {
        self.cancel_tokens
            .get(run_id)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    fn cancel_token(&self, run_id: &str) -> CancellationToken {
        self.cancel_tokens
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    fn resolve_schema(&self, schema_id: Option<&str>) -> Option<Arc<Schema>> {
        schema_id.and_then(|id| self.schemas.schema_by_id(id))
    }

    /// Executed-step progress as a percentage, capped below 100 while the
    /// run is not complete.
    fn progress(&self, run: &WorkflowRun, def: &WorkflowDefinition) -> u8 {
        let total = def.step_count().max(1);
        let done = run.step_outputs.len().min(total);
        (((done * 100) / total) as u8).min(99)
    }

    /// Drives the run until a suspension or terminal transition. The caller
    /// holds the run lock.
    async fn drive(
        self: &Arc<Self>,
        def: Arc<WorkflowDefinition>,
        mut run: WorkflowRun,
        mut pending_input: Option<Value>,
        mut prev_output: Option<Value>,
    ) -> RunBoundary {
        loop {
            if self.cancel_requested(&run.run_id) {
                return self.finish_cancelled(run).await;
            }

            let current_id = run
                .current_step_id
                .clone()
                .unwrap_or_else(|| def.initial_step().step_id.clone());
            let Some(step) = def.step(&current_id).cloned() else {
                let error = WorkflowError::new(
                    ErrorKind::UnknownStep,
                    format!(
                        "step `{current_id}` not in workflow `{}`",
                        def.workflow_id()
                    ),
                );
                return self.finish_failed(run, error).await;
            };

            // User-input gate: reaching an input step without pending input
            // suspends the run with the step's input-schema descriptor.
            if step.user_input_required && pending_input.is_none() {
                let message_id = uuid::Uuid::new_v4().to_string();
                self.suspensions.insert(
                    message_id.clone(),
                    Suspension {
                        run_id: run.run_id.clone(),
                        step_id: step.step_id.clone(),
                        kind: SuspensionKind::UserInput,
                    },
                );
                run.status = RunStatus::Suspended;
                run.current_step_id = Some(step.step_id.clone());
                run.touch();
                let percent = self.progress(&run, &def);
                if let Err(error) = self.persist(&run).await {
                    return self.finish_failed(run, error).await;
                }
                return RunBoundary::Suspended {
                    run_id: run.run_id,
                    message_id,
                    next_schema: self.resolve_schema(step.input_schema.as_deref()),
                    percent_complete: percent,
                    is_async: false,
                };
            }

            let input = pending_input
                .take()
                .or_else(|| prev_output.clone())
                .unwrap_or_else(|| run.trigger_data.clone());

            // Invocation guard, enforced before the executor runs.
            let count = run.increment_invocations(&step.step_id);
            if let Some(limit) = step.invocations_limit {
                if count > limit {
                    match step.on_invocations_limit {
                        OnInvocationsLimit::Stop => {
                            let output = prev_output
                                .or_else(|| run.last_output().cloned())
                                .unwrap_or(Value::Null);
                            run.final_output = Some(output.clone());
                            run.status = RunStatus::Completed;
                            run.touch();
                            if let Err(error) = self.persist(&run).await {
                                return self.finish_failed(run, error).await;
                            }
                            return RunBoundary::Completed {
                                run_id: run.run_id,
                                output,
                            };
                        }
                        OnInvocationsLimit::LoopReset => {
                            run.reset_invocations(&step.step_id, 1);
                        }
                        OnInvocationsLimit::Fail => {
                            let error = WorkflowError::new(
                                ErrorKind::InvocationLimitExceeded,
                                format!(
                                    "step `{}` exceeded its invocation limit of {limit}",
                                    step.step_id
                                ),
                            );
                            return self.finish_failed(run, error).await;
                        }
                    }
                }
            }

            let ctx = StepContext::new(
                run.run_id.clone(),
                run.workflow_id.clone(),
                step.step_id.clone(),
                run.chat_id.clone(),
                run.language.clone(),
                run.trigger_data.clone(),
                run.step_outputs
                    .iter()
                    .map(|o| (o.step_id.clone(), o.output.clone()))
                    .collect(),
                run.custom_data.clone(),
                self.cancel_token(&run.run_id),
            );

            let outcome = self
                .execute_with_retry(def.workflow_id(), &step, input, &ctx, &run.run_id)
                .await;
            run.custom_data = ctx.custom_data_snapshot();

            let variant = match outcome {
                Ok(variant) => variant,
                Err(error) => {
                    if error.kind == ErrorKind::Cancelled {
                        return self.finish_cancelled(run).await;
                    }
                    return self.finish_failed(run, error).await;
                }
            };

            match variant {
                StepResult::Continue(data) => {
                    run.record_output(&step.step_id, data.clone());
                    prev_output = Some(data.clone());
                    match step.next_step_ids.first() {
                        Some(next) => {
                            run.current_step_id = Some(next.clone());
                            if let Err(error) = self.persist(&run).await {
                                return self.finish_failed(run, error).await;
                            }
                        }
                        None => {
                            run.final_output = Some(data.clone());
                            run.status = RunStatus::Completed;
                            run.touch();
                            if let Err(error) = self.persist(&run).await {
                                return self.finish_failed(run, error).await;
                            }
                            return RunBoundary::Completed {
                                run_id: run.run_id,
                                output: data,
                            };
                        }
                    }
                }
                StepResult::Branch { next_step_id, data } => {
                    if !step.outgoing().contains(&next_step_id.as_str()) {
                        let error = WorkflowError::new(
                            ErrorKind::InvalidBranch,
                            format!(
                                "step `{}` branched to `{next_step_id}` outside its declared edges",
                                step.step_id
                            ),
                        );
                        return self.finish_failed(run, error).await;
                    }
                    run.record_output(&step.step_id, data.clone());
                    prev_output = Some(data);
                    run.current_step_id = Some(next_step_id);
                    if let Err(error) = self.persist(&run).await {
                        return self.finish_failed(run, error).await;
                    }
                }
                StepResult::Suspend {
                    message_id,
                    next_schema,
                } => {
                    self.suspensions.insert(
                        message_id.clone(),
                        Suspension {
                            run_id: run.run_id.clone(),
                            step_id: step.step_id.clone(),
                            kind: SuspensionKind::UserInput,
                        },
                    );
                    run.status = RunStatus::Suspended;
                    run.current_step_id = Some(step.step_id.clone());
                    run.touch();
                    let percent = self.progress(&run, &def);
                    if let Err(error) = self.persist(&run).await {
                        return self.finish_failed(run, error).await;
                    }
                    let schema = next_schema
                        .as_deref()
                        .or(step.input_schema.as_deref())
                        .and_then(|id| self.schemas.schema_by_id(id));
                    return RunBoundary::Suspended {
                        run_id: run.run_id,
                        message_id,
                        next_schema: schema,
                        percent_complete: percent,
                        is_async: false,
                    };
                }
                StepResult::Async {
                    task,
                    args,
                    percent_complete,
                } => {
                    let message_id = uuid::Uuid::new_v4().to_string();
                    self.suspensions.insert(
                        message_id.clone(),
                        Suspension {
                            run_id: run.run_id.clone(),
                            step_id: step.step_id.clone(),
                            kind: SuspensionKind::AsyncTask,
                        },
                    );
                    run.status = RunStatus::Suspended;
                    run.current_step_id = Some(step.step_id.clone());
                    run.touch();
                    if let Err(error) = self.persist(&run).await {
                        return self.finish_failed(run, error).await;
                    }
                    self.spawn_async_task(
                        def.clone(),
                        run.run_id.clone(),
                        message_id.clone(),
                        task,
                        args,
                    );
                    return RunBoundary::Suspended {
                        run_id: run.run_id,
                        message_id,
                        next_schema: None,
                        percent_complete,
                        is_async: true,
                    };
                }
                StepResult::Complete(result) => {
                    run.record_output(&step.step_id, result.clone());
                    run.final_output = Some(result.clone());
                    run.status = RunStatus::Completed;
                    run.touch();
                    if let Err(error) = self.persist(&run).await {
                        return self.finish_failed(run, error).await;
                    }
                    return RunBoundary::Completed {
                        run_id: run.run_id,
                        output: result,
                    };
                }
                // Normalized into Err by execute_with_retry.
                StepResult::Fail(error) => {
                    return self.finish_failed(run, error).await;
                }
            }
        }
    }

    /// One step with circuit-breaker gate, deadline, and retry policy.
    /// `Ok` never contains `StepResult::Fail`.
    async fn execute_with_retry(
        self: &Arc<Self>,
        workflow_id: &str,
        step: &StepDefinition,
        input: Value,
        ctx: &StepContext,
        run_id: &str,
    ) -> Result<StepResult, WorkflowError> {
        let policy = step
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.config.retry_defaults.clone());
        let mut retry_ctx = self
            .retry_persistence
            .store()
            .load_retry_context(run_id, &step.step_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| RetryContext::new(run_id, &step.step_id));

        loop {
            if ctx.cancellation.is_cancelled() {
                return Err(WorkflowError::new(ErrorKind::Cancelled, "run cancelled"));
            }

            let mut short_circuited = false;
            let outcome: Result<StepResult, WorkflowError> =
                if !self.breakers.allow(workflow_id, &step.step_id) {
                    short_circuited = true;
                    Err(WorkflowError::new(
                        ErrorKind::CircuitOpen,
                        format!("circuit open for step `{}`", step.step_id),
                    ))
                } else {
                    let fut = step.executor.execute(input.clone(), ctx);
                    let executed = match step.deadline {
                        Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                            Ok(result) => result,
                            Err(_) => Err(WorkflowError::new(
                                ErrorKind::Timeout,
                                format!(
                                    "step `{}` exceeded its deadline of {deadline:?}",
                                    step.step_id
                                ),
                            )),
                        },
                        None => fut.await,
                    };
                    match executed {
                        Ok(StepResult::Fail(error)) => Err(error),
                        other => other,
                    }
                };

            match outcome {
                Ok(variant) => {
                    self.breakers.record_success(workflow_id, &step.step_id);
                    if let Some(snapshot) = self.breakers.snapshot(workflow_id, &step.step_id) {
                        self.retry_persistence.save_breaker_snapshot(&snapshot).await;
                    }
                    if retry_ctx.attempt_number > 0 {
                        if let Err(e) = self
                            .retry_persistence
                            .store()
                            .delete_retry_context(run_id, &step.step_id)
                            .await
                        {
                            tracing::warn!(error = %e, "retry context cleanup failed");
                        }
                    }
                    return Ok(variant);
                }
                Err(error) => {
                    if !short_circuited {
                        self.breakers.record_failure(workflow_id, &step.step_id);
                        if let Some(snapshot) =
                            self.breakers.snapshot(workflow_id, &step.step_id)
                        {
                            self.retry_persistence.save_breaker_snapshot(&snapshot).await;
                        }
                    }

                    retry_ctx.attempt_number += 1;
                    retry_ctx.last_error = Some(error.clone());
                    if retry_ctx.attempt_number > 1 {
                        self.notify_listeners(ListenerEvent::RetryFailure, &retry_ctx);
                    }

                    if error.is_retryable() && policy.should_retry(retry_ctx.attempt_number) {
                        let delay = policy.delay_for(retry_ctx.attempt_number);
                        retry_ctx.next_delay_ms = delay.as_millis() as u64;
                        self.notify_listeners(ListenerEvent::BeforeRetry, &retry_ctx);
                        self.retry_persistence.save_retry_context(&retry_ctx).await;
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = ctx.cancellation.cancelled() => {
                                return Err(WorkflowError::new(
                                    ErrorKind::Cancelled,
                                    "run cancelled during retry delay",
                                ));
                            }
                        }
                        continue;
                    }

                    if error.is_retryable() {
                        self.notify_listeners(ListenerEvent::RetryExhausted, &retry_ctx);
                    }
                    self.retry_persistence.save_retry_context(&retry_ctx).await;
                    return Err(error);
                }
            }
        }
    }

    fn notify_listeners(&self, event: ListenerEvent, ctx: &RetryContext) {
        for listener in &self.listeners {
            notify(listener.as_ref(), event, ctx);
        }
    }

    fn spawn_async_task(
        self: &Arc<Self>,
        def: Arc<WorkflowDefinition>,
        run_id: String,
        message_id: String,
        task: String,
        args: Value,
    ) {
        let inner = self.clone();
        tokio::spawn(async move {
            let result = match inner.tasks.get(&task) {
                Some(handler) => {
                    inner
                        .background
                        .run(async move { handler.run(args).await })
                        .await
                }
                None => Err(WorkflowError::permanent(format!(
                    "unknown async task `{task}`"
                ))),
            };
            inner.complete_async(def, run_id, message_id, result).await;
        });
    }

    /// Re-enters the run when its background task finishes: the task output
    /// becomes the step output and execution proceeds to the next step.
    async fn complete_async(
        self: &Arc<Self>,
        def: Arc<WorkflowDefinition>,
        run_id: String,
        message_id: String,
        result: Result<Value, WorkflowError>,
    ) {
        let lock = self.run_lock(&run_id);
        let _guard = lock.lock().await;

        let Some((_, suspension)) = self.suspensions.remove(&message_id) else {
            tracing::debug!(message_id = %message_id, "async completion for consumed suspension, ignoring");
            return;
        };
        let run = match self.repository.find_by_instance_id(&run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                tracing::warn!(run_id = %run_id, "async completion for missing run");
                return;
            }
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "async completion load failed");
                return;
            }
        };
        if run.status != RunStatus::Suspended
            || run.current_step_id.as_deref() != Some(suspension.step_id.as_str())
        {
            tracing::warn!(run_id = %run_id, message_id = %message_id, "async completion does not match run state");
            return;
        }

        let boundary = match result {
            Ok(output) => {
                self.apply_async_output(def, run, &suspension.step_id, output)
                    .await
            }
            Err(error) => self.finish_failed(run, error).await,
        };
        self.async_results.insert(message_id.clone(), boundary.clone());
        let _ = self.completions_tx.send(AsyncCompletion {
            message_id,
            run_id,
            boundary,
        });
    }

    /// Step 4 onwards for an async suspension: record the task output under
    /// the step and continue to the next step without re-executing it.
    async fn apply_async_output(
        self: &Arc<Self>,
        def: Arc<WorkflowDefinition>,
        mut run: WorkflowRun,
        step_id: &str,
        output: Value,
    ) -> RunBoundary {
        run.record_output(step_id, output.clone());
        let next = def
            .step(step_id)
            .and_then(|s| s.next_step_ids.first().cloned());
        match next {
            Some(next) => {
                run.status = RunStatus::Running;
                run.current_step_id = Some(next);
                run.touch();
                if let Err(error) = self.persist(&run).await {
                    return self.finish_failed(run, error).await;
                }
                self.drive(def, run, None, Some(output)).await
            }
            None => {
                run.final_output = Some(output.clone());
                run.status = RunStatus::Completed;
                run.touch();
                if let Err(error) = self.persist(&run).await {
                    return self.finish_failed(run, error).await;
                }
                RunBoundary::Completed {
                    run_id: run.run_id,
                    output,
                }
            }
        }
    }

    /// Resume body, run under the run lock.
    async fn resume_locked(
        self: &Arc<Self>,
        message_id: &str,
        input: ResumeInput,
    ) -> Result<RunBoundary, WorkflowError> {
        // Revalidate under the lock: a concurrent resume may have consumed it.
        let suspension = self
            .suspensions
            .get(message_id)
            .map(|s| s.clone())
            .ok_or_else(|| invalid_resume(message_id, "unknown or already consumed"))?;

        let mut run = self
            .repository
            .find_by_instance_id(&suspension.run_id)
            .await?
            .ok_or_else(|| invalid_resume(message_id, "run no longer exists"))?;
        if run.status != RunStatus::Suspended
            || run.current_step_id.as_deref() != Some(suspension.step_id.as_str())
        {
            return Err(invalid_resume(
                message_id,
                "run is not suspended at the recorded step",
            ));
        }
        let def = self.definition(&run.workflow_id)?;
        let Some(step) = def.step(&suspension.step_id).cloned() else {
            return Err(invalid_resume(message_id, "suspended step no longer exists"));
        };

        // Bind the input before consuming the suspension so a binding
        // failure leaves the run resumable.
        let value = match (&suspension.kind, input) {
            (SuspensionKind::UserInput, ResumeInput::Properties(bag)) => {
                match &step.input_schema {
                    Some(schema_id) => self.schemas.bind(schema_id, &bag)?,
                    None => properties_as_value(&bag),
                }
            }
            (_, ResumeInput::Value(value)) => value,
            (SuspensionKind::AsyncTask, ResumeInput::Properties(bag)) => {
                properties_as_value(&bag)
            }
        };

        self.suspensions.remove(message_id);
        run.touch();

        match suspension.kind {
            SuspensionKind::UserInput => {
                run.status = RunStatus::Running;
                self.persist(&run).await?;
                Ok(self.drive(def, run, Some(value), None).await)
            }
            SuspensionKind::AsyncTask => {
                // External completion path: the provided value is the task
                // output; the step is not re-executed.
                let boundary = self
                    .apply_async_output(def, run, &suspension.step_id, value)
                    .await;
                self.async_results
                    .insert(message_id.to_string(), boundary.clone());
                Ok(boundary)
            }
        }
    }

    async fn persist(&self, run: &WorkflowRun) -> Result<(), WorkflowError> {
        self.repository.save(run).await.map_err(Into::into)
    }

    async fn finish_failed(&self, mut run: WorkflowRun, error: WorkflowError) -> RunBoundary {
        run.status = RunStatus::Failed;
        run.error = Some(error.clone());
        run.touch();
        if let Err(e) = self.repository.save(&run).await {
            tracing::error!(run_id = %run.run_id, error = %e, "failed-run persist failed");
        }
        tracing::warn!(run_id = %run.run_id, kind = %error.kind, message = %error.message, "run failed");
        RunBoundary::Failed {
            run_id: run.run_id,
            error,
        }
    }

    async fn finish_cancelled(&self, mut run: WorkflowRun) -> RunBoundary {
        self.suspensions.retain(|_, s| s.run_id != run.run_id);
        run.status = RunStatus::Cancelled;
        run.touch();
        if let Err(e) = self.repository.save(&run).await {
            tracing::error!(run_id = %run.run_id, error = %e, "cancelled-run persist failed");
        }
        RunBoundary::Cancelled { run_id: run.run_id }
    }
}

/// Fallback shape for inputs with no schema: each property becomes a string
/// field.
fn properties_as_value(bag: &PropertyBag) -> Value {
    Value::Object(
        bag.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::WorkflowBuilder;
    use crate::workflow::step::{FnStep, StepResult};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn echo_workflow() -> WorkflowDefinition {
        WorkflowBuilder::new("echo")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "echo",
                    FnStep::new(|input, _ctx| async move { Ok(StepResult::Complete(input)) }),
                )
                .initial(),
            )
            .build()
            .unwrap()
    }

    fn engine_sync() -> WorkflowEngine {
        let mut config = EngineConfig::default();
        config.persistence_mode = PersistenceMode::Sync;
        config.breaker = CircuitBreakerConfig::disabled();
        WorkflowEngine::builder().config(config).build()
    }

    /// **Scenario**: A single-step workflow completes with the trigger echoed
    /// and the output persisted under the step id.
    #[tokio::test]
    async fn single_step_completes_and_persists() {
        let engine = engine_sync();
        engine.register_workflow(echo_workflow());

        let boundary = engine
            .start_run("echo", serde_json::json!({"q": "hi"}), RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Completed { run_id, output } = boundary else {
            panic!("expected Completed, got {boundary:?}");
        };
        assert_eq!(output, serde_json::json!({"q": "hi"}));

        let run = engine.run_snapshot(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.output_of("echo"), Some(&serde_json::json!({"q": "hi"})));
    }

    /// **Scenario**: Starting an unregistered workflow fails with
    /// UnknownWorkflow.
    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let engine = engine_sync();
        let err = engine
            .start_run("ghost", Value::Null, RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownWorkflow);
    }

    /// **Scenario**: A user-input step suspends the run; resuming with bound
    /// properties re-executes it; a second resume of the same message id
    /// fails with InvalidResume.
    #[tokio::test]
    async fn suspend_resume_and_double_resume() {
        use crate::schema::{Property, Schema};

        let engine = engine_sync();
        engine.schemas().register_schema(
            Schema::new("double.in").property(Property::integer("x").required()),
        );
        let workflow = WorkflowBuilder::new("doubler")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "collect",
                    FnStep::new(|input, _ctx| async move {
                        let x = input["x"].as_i64().unwrap_or(0);
                        Ok(StepResult::Complete(serde_json::json!((x * 2).to_string())))
                    }),
                )
                .initial()
                .user_input()
                .input_schema("double.in"),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("doubler", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Suspended {
            message_id,
            next_schema,
            is_async,
            ..
        } = boundary
        else {
            panic!("expected Suspended, got {boundary:?}");
        };
        assert!(!is_async);
        assert_eq!(next_schema.unwrap().schema_id, "double.in");

        let mut bag = PropertyBag::new();
        bag.insert("x".into(), "7".into());
        let boundary = engine
            .resume(&message_id, ResumeInput::Properties(bag.clone()))
            .await
            .unwrap();
        let RunBoundary::Completed { output, .. } = boundary else {
            panic!("expected Completed, got {boundary:?}");
        };
        assert_eq!(output, serde_json::json!("14"));

        let err = engine
            .resume(&message_id, ResumeInput::Properties(bag))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResume);
    }

    /// **Scenario**: A binding failure on resume leaves the suspension
    /// intact; the corrected input then succeeds.
    #[tokio::test]
    async fn resume_bind_failure_keeps_suspension() {
        use crate::schema::{Property, Schema};

        let engine = engine_sync();
        engine.schemas().register_schema(
            Schema::new("form.in").property(Property::integer("n").required()),
        );
        let workflow = WorkflowBuilder::new("form")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "ask",
                    FnStep::new(|input, _ctx| async move { Ok(StepResult::Complete(input)) }),
                )
                .initial()
                .user_input()
                .input_schema("form.in"),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let RunBoundary::Suspended { message_id, .. } = engine
            .start_run("form", Value::Null, RunOptions::default())
            .await
            .unwrap()
        else {
            panic!("expected Suspended");
        };

        let mut bad = PropertyBag::new();
        bad.insert("n".into(), "not-a-number".into());
        let err = engine
            .resume(&message_id, ResumeInput::Properties(bad))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let mut good = PropertyBag::new();
        good.insert("n".into(), "3".into());
        let boundary = engine
            .resume(&message_id, ResumeInput::Properties(good))
            .await
            .unwrap();
        assert!(matches!(boundary, RunBoundary::Completed { .. }));
    }

    /// **Scenario**: A step failing retryably under policy {max 3} executes
    /// exactly 3 times and the run completes on the third attempt.
    #[tokio::test]
    async fn retry_recovers_within_policy() {
        let engine = engine_sync();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_step = attempts.clone();
        let workflow = WorkflowBuilder::new("flaky")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "c",
                    FnStep::new(move |_input, _ctx| {
                        let attempts = attempts_step.clone();
                        async move {
                            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                            if n < 3 {
                                Err(WorkflowError::retryable("transient"))
                            } else {
                                Ok(StepResult::Complete(serde_json::json!("ok")))
                            }
                        }
                    }),
                )
                .initial()
                .retry(StepRetryPolicy::fixed(3, Duration::from_millis(10))),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("flaky", Value::Null, RunOptions::default())
            .await
            .unwrap();
        assert!(matches!(boundary, RunBoundary::Completed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    /// **Scenario**: A non-retryable failure skips retries entirely.
    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let engine = engine_sync();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_step = attempts.clone();
        let workflow = WorkflowBuilder::new("hard-fail")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "s",
                    FnStep::new(move |_input, _ctx| {
                        let attempts = attempts_step.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err(WorkflowError::permanent("broken request"))
                        }
                    }),
                )
                .initial()
                .retry(StepRetryPolicy::fixed(5, Duration::from_millis(5))),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("hard-fail", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Failed { error, .. } = boundary else {
            panic!("expected Failed");
        };
        assert_eq!(error.kind, ErrorKind::PermanentFailure);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: A self-loop with invocation limit 2 and the Fail policy
    /// fails the run with InvocationLimitExceeded on the third entry.
    #[tokio::test]
    async fn invocation_limit_fail_policy() {
        let engine = engine_sync();
        let workflow = WorkflowBuilder::new("looper")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "d",
                    FnStep::new(|_input, _ctx| async move {
                        Ok(StepResult::continue_with(serde_json::json!("again")))
                    }),
                )
                .initial()
                .invocations_limit(2, OnInvocationsLimit::Fail)
                .next("d"),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("looper", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Failed { run_id, error } = boundary else {
            panic!("expected Failed");
        };
        assert_eq!(error.kind, ErrorKind::InvocationLimitExceeded);
        let run = engine.run_snapshot(&run_id).await.unwrap().unwrap();
        assert_eq!(run.invocations("d"), 3, "limit checked before execution");
    }

    /// **Scenario**: The Stop policy terminates the run as Completed with
    /// the last output when the limit trips.
    #[tokio::test]
    async fn invocation_limit_stop_policy() {
        let engine = engine_sync();
        let workflow = WorkflowBuilder::new("stopper")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "s",
                    FnStep::new(|_input, _ctx| async move {
                        Ok(StepResult::continue_with(serde_json::json!("latest")))
                    }),
                )
                .initial()
                .invocations_limit(2, OnInvocationsLimit::Stop)
                .next("s"),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("stopper", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Completed { output, .. } = boundary else {
            panic!("expected Completed");
        };
        assert_eq!(output, serde_json::json!("latest"));
    }

    /// **Scenario**: Branching to a step outside the declared edges fails
    /// with InvalidBranch.
    #[tokio::test]
    async fn foreign_branch_target_fails() {
        let engine = engine_sync();
        // "elsewhere" is a real, reachable step, but it is not among
        // "decide"'s declared edges, so branching to it must fail.
        let workflow = WorkflowBuilder::new("brancher")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "decide",
                    FnStep::new(|_input, _ctx| async move {
                        Ok(StepResult::branch("elsewhere", serde_json::json!(null)))
                    }),
                )
                .initial()
                .next("allowed"),
            )
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "allowed",
                    FnStep::new(|input, _ctx| async move {
                        Ok(StepResult::continue_with(input))
                    }),
                )
                .next("elsewhere"),
            )
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "elsewhere",
                    FnStep::new(|input, _ctx| async move { Ok(StepResult::Complete(input)) }),
                )
                .terminal(),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("brancher", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Failed { error, .. } = boundary else {
            panic!("expected Failed");
        };
        assert_eq!(error.kind, ErrorKind::InvalidBranch);
    }

    /// **Scenario**: An async step suspends with the step's percent, the
    /// task output becomes the step output, and the completion is observable
    /// through async_status and the completions channel.
    #[tokio::test]
    async fn async_task_completes_run() {
        use crate::workflow::async_task::FnAsyncTask;

        let tasks = Arc::new(AsyncTaskRegistry::new());
        tasks.register(FnAsyncTask::new("transcribe", |_args| async move {
            Ok(serde_json::json!("done"))
        }));
        let mut config = EngineConfig::default();
        config.persistence_mode = PersistenceMode::Sync;
        config.breaker = CircuitBreakerConfig::disabled();
        let engine = WorkflowEngine::builder().config(config).tasks(tasks).build();

        let workflow = WorkflowBuilder::new("audio")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "e",
                    FnStep::new(|_input, _ctx| async move {
                        Ok(StepResult::async_task(
                            "transcribe",
                            serde_json::json!({"clip": "a.wav"}),
                            50,
                        ))
                    }),
                )
                .initial()
                .async_execution(),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);
        let mut completions = engine.take_completions().expect("first take");

        let boundary = engine
            .start_run("audio", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Suspended {
            message_id,
            percent_complete,
            is_async,
            ..
        } = boundary
        else {
            panic!("expected Suspended, got {boundary:?}");
        };
        assert!(is_async);
        assert_eq!(percent_complete, 50);

        let completion = tokio::time::timeout(Duration::from_secs(2), completions.recv())
            .await
            .expect("completion within bound")
            .expect("channel open");
        assert_eq!(completion.message_id, message_id);
        let RunBoundary::Completed { output, .. } = &completion.boundary else {
            panic!("expected Completed, got {:?}", completion.boundary);
        };
        assert_eq!(output, &serde_json::json!("done"));

        let status = engine.async_status(&message_id).expect("tracked status");
        assert!(matches!(status, RunBoundary::Completed { .. }));
    }

    /// **Scenario**: Cancelling a suspended run clears the suspension and
    /// reaches Cancelled; the stale message id can no longer resume.
    #[tokio::test]
    async fn cancel_suspended_run() {
        let engine = engine_sync();
        let workflow = WorkflowBuilder::new("waiting")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "gate",
                    FnStep::new(|input, _ctx| async move { Ok(StepResult::Complete(input)) }),
                )
                .initial()
                .user_input(),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let RunBoundary::Suspended { run_id, message_id, .. } = engine
            .start_run("waiting", Value::Null, RunOptions::default())
            .await
            .unwrap()
        else {
            panic!("expected Suspended");
        };

        engine.cancel(&run_id).await.unwrap();
        let run = engine.run_snapshot(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        let err = engine
            .resume(&message_id, ResumeInput::Value(Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResume);
    }

    /// **Scenario**: An open circuit breaker short-circuits the step without
    /// invoking the executor; the run fails with CircuitOpen once retries
    /// exhaust.
    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let mut config = EngineConfig::default();
        config.persistence_mode = PersistenceMode::Sync;
        config.breaker = CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
            window: Duration::from_secs(60),
        };
        let engine = WorkflowEngine::builder().config(config).build();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_step = attempts.clone();
        let workflow = WorkflowBuilder::new("downstream")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "call",
                    FnStep::new(move |_input, _ctx| {
                        let attempts = attempts_step.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err(WorkflowError::retryable("downstream down"))
                        }
                    }),
                )
                .initial()
                .retry(StepRetryPolicy::fixed(2, Duration::from_millis(5))),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        // First run trips the breaker open (2 consecutive failures).
        let first = engine
            .start_run("downstream", Value::Null, RunOptions::default())
            .await
            .unwrap();
        assert!(matches!(first, RunBoundary::Failed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        // Second run is short-circuited: the executor never runs again.
        let second = engine
            .start_run("downstream", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Failed { error, .. } = second else {
            panic!("expected Failed");
        };
        assert_eq!(error.kind, ErrorKind::CircuitOpen);
        assert_eq!(attempts.load(Ordering::SeqCst), 2, "executor not invoked");
    }

    /// **Scenario**: A step deadline converts to a Timeout failure subject
    /// to the retry policy.
    #[tokio::test]
    async fn step_deadline_times_out() {
        let engine = engine_sync();
        let workflow = WorkflowBuilder::new("slow")
            .step(
                crate::workflow::definition::StepDefinition::new(
                    "napper",
                    FnStep::new(|_input, _ctx| async move {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(StepResult::Complete(Value::Null))
                    }),
                )
                .initial()
                .deadline(Duration::from_millis(20))
                .retry(StepRetryPolicy::fixed(1, Duration::from_millis(1))),
            )
            .build()
            .unwrap();
        engine.register_workflow(workflow);

        let boundary = engine
            .start_run("slow", Value::Null, RunOptions::default())
            .await
            .unwrap();
        let RunBoundary::Failed { error, .. } = boundary else {
            panic!("expected Failed");
        };
        assert_eq!(error.kind, ErrorKind::Timeout);
    }

    /// **Scenario**: A disabled engine rejects new work.
    #[tokio::test]
    async fn disabled_engine_rejects_runs() {
        let mut config = EngineConfig::default();
        config.enabled = false;
        let engine = WorkflowEngine::builder().config(config).build();
        engine.register_workflow(echo_workflow());
        let err = engine
            .start_run("echo", Value::Null, RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermanentFailure);
    }
}

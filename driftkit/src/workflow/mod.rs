//! Workflow graph model and execution engine.
//!
//! [`definition`] holds the explicit step registrations and build-time graph
//! validation; [`step`] the executor contract and tagged result variant;
//! [`engine`] the scheduler (run lifecycle, suspend/resume, retry, circuit
//! breaking, persistence). Supporting pieces: [`run`] (run state),
//! [`repository`] (persistence contracts + in-memory impls), [`retry`],
//! [`circuit`], [`pool`] (bounded workers), and [`async_task`] (named
//! background tasks).

pub mod async_task;
pub mod circuit;
pub mod definition;
pub mod engine;
pub mod pool;
pub mod repository;
pub mod retry;
pub mod run;
pub mod step;

pub use async_task::{AsyncTaskHandler, AsyncTaskRegistry, FnAsyncTask};
pub use circuit::{BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use definition::{
    OnInvocationsLimit, StepDefinition, WorkflowBuilder, WorkflowDefinition,
    WorkflowValidationError,
};
pub use engine::{
    AsyncCompletion, EngineConfig, ResumeInput, RunBoundary, RunOptions, WorkflowEngine,
    WorkflowEngineBuilder,
};
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use repository::{
    InMemoryContextRepository, InMemoryRetryStateStore, PersistenceMode, RepositoryError,
    RetryStatePersistence, RetryStateStore, WorkflowContextRepository,
};
pub use retry::{LoggingRetryListener, RetryContext, RetryListener, StepRetryPolicy};
pub use run::{RunStatus, StepOutput, WorkflowRun};
pub use step::{FnStep, StepContext, StepExecutor, StepResult};

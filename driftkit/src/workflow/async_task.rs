//! Named background tasks a step can hand work to.
//!
//! A step returning `Async { task, args, .. }` suspends its run; the engine
//! resolves the task by name here, executes it on the background pool, and
//! re-enters the run with the task's output as the step output.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::WorkflowError;

/// One named background task.
#[async_trait]
pub trait AsyncTaskHandler: Send + Sync {
    /// Name steps reference in `StepResult::Async`.
    fn name(&self) -> &str;

    /// Runs the task; the returned value becomes the suspended step's output.
    async fn run(&self, args: Value) -> Result<Value, WorkflowError>;
}

/// Registry of background tasks by name.
#[derive(Default)]
pub struct AsyncTaskRegistry {
    handlers: DashMap<String, Arc<dyn AsyncTaskHandler>>,
}

impl AsyncTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; a handler with the same name replaces the
    /// previous one.
    pub fn register(&self, handler: Arc<dyn AsyncTaskHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AsyncTaskHandler>> {
        self.handlers.get(name).map(|h| h.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

type TaskFuture = futures::future::BoxFuture<'static, Result<Value, WorkflowError>>;

/// Task handler built from an async closure.
pub struct FnAsyncTask {
    name: String,
    handler: Box<dyn Fn(Value) -> TaskFuture + Send + Sync>,
}

impl FnAsyncTask {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Arc<Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            handler: Box::new(move |args| Box::pin(handler(args))),
        })
    }
}

#[async_trait]
impl AsyncTaskHandler for FnAsyncTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, args: Value) -> Result<Value, WorkflowError> {
        (self.handler)(args).await
    }
}

//! Step execution contract: typed input in, tagged result variant out.
//!
//! Executors never throw control flow across the engine boundary: every
//! outcome is a [`StepResult`] variant or a classified [`WorkflowError`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;

/// Outcome of one step execution.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// Proceed to the first declared next step with this output.
    Continue(Value),
    /// Proceed to a named next step (must be one of the step's declared
    /// edges) with this output.
    Branch { next_step_id: String, data: Value },
    /// Pause the run awaiting user input keyed by `message_id`;
    /// `next_schema` describes the expected input record.
    Suspend {
        message_id: String,
        next_schema: Option<String>,
    },
    /// Pause the run while the named background task processes `args`.
    Async {
        task: String,
        args: Value,
        percent_complete: u8,
    },
    /// Terminal success with the run's final result.
    Complete(Value),
    /// Enter failure handling (retry classification applies).
    Fail(WorkflowError),
}

impl StepResult {
    pub fn continue_with(data: impl Into<Value>) -> Self {
        StepResult::Continue(data.into())
    }

    pub fn branch(next_step_id: impl Into<String>, data: impl Into<Value>) -> Self {
        StepResult::Branch {
            next_step_id: next_step_id.into(),
            data: data.into(),
        }
    }

    /// Suspension with a fresh message id.
    pub fn suspend(next_schema: Option<String>) -> Self {
        StepResult::Suspend {
            message_id: uuid::Uuid::new_v4().to_string(),
            next_schema,
        }
    }

    pub fn async_task(
        task: impl Into<String>,
        args: impl Into<Value>,
        percent_complete: u8,
    ) -> Self {
        StepResult::Async {
            task: task.into(),
            args: args.into(),
            percent_complete: percent_complete.min(100),
        }
    }

    pub fn complete(result: impl Into<Value>) -> Self {
        StepResult::Complete(result.into())
    }

    pub fn fail(error: WorkflowError) -> Self {
        StepResult::Fail(error)
    }
}

/// Run-scoped context handed to every step execution.
///
/// `custom_data` is shared mutable state scoped to the run; changes are
/// merged back into the persisted run after the step returns. Step outputs
/// are a read-only snapshot. The cancellation token is the run's: long
/// steps should observe it cooperatively.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub workflow_id: String,
    pub step_id: String,
    pub chat_id: Option<String>,
    pub language: Option<String>,
    pub trigger_data: Value,
    step_outputs: Arc<Vec<(String, Value)>>,
    custom_data: Arc<Mutex<serde_json::Map<String, Value>>>,
    pub cancellation: CancellationToken,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: String,
        workflow_id: String,
        step_id: String,
        chat_id: Option<String>,
        language: Option<String>,
        trigger_data: Value,
        step_outputs: Vec<(String, Value)>,
        custom_data: serde_json::Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            step_id,
            chat_id,
            language,
            trigger_data,
            step_outputs: Arc::new(step_outputs),
            custom_data: Arc::new(Mutex::new(custom_data)),
            cancellation,
        }
    }

    /// Output of an earlier step in this run.
    pub fn output_of(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs
            .iter()
            .find(|(id, _)| id == step_id)
            .map(|(_, v)| v)
    }

    /// Reads a custom-data entry.
    pub fn custom(&self, key: &str) -> Option<Value> {
        self.custom_data.lock().expect("custom data lock").get(key).cloned()
    }

    /// Writes a custom-data entry; persisted with the run after the step.
    pub fn set_custom(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.custom_data
            .lock()
            .expect("custom data lock")
            .insert(key.into(), value.into());
    }

    /// Snapshot of the custom data for persistence.
    pub(crate) fn custom_data_snapshot(&self) -> serde_json::Map<String, Value> {
        self.custom_data.lock().expect("custom data lock").clone()
    }
}

/// One unit of workflow execution.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Executes the step. `input` is the trigger data (initial step), the
    /// previous step's output, or the bound user input for
    /// `user_input_required` steps.
    async fn execute(&self, input: Value, ctx: &StepContext)
        -> Result<StepResult, WorkflowError>;
}

type StepFuture = futures::future::BoxFuture<'static, Result<StepResult, WorkflowError>>;

/// Executor built from an async closure; the common registration shape.
pub struct FnStep {
    handler: Box<dyn Fn(Value, StepContext) -> StepFuture + Send + Sync>,
}

impl FnStep {
    pub fn new<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<StepResult, WorkflowError>> + Send + 'static,
    {
        Arc::new(Self {
            handler: Box::new(move |input, ctx| Box::pin(handler(input, ctx))),
        })
    }
}

#[async_trait]
impl StepExecutor for FnStep {
    async fn execute(
        &self,
        input: Value,
        ctx: &StepContext,
    ) -> Result<StepResult, WorkflowError> {
        (self.handler)(input, ctx.clone()).await
    }
}

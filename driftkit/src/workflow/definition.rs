//! Workflow definitions: explicit step registration plus build-time
//! validation.
//!
//! Steps are registered on a [`WorkflowBuilder`] with their executor, edges,
//! schemas, retry policy, and guards; `build()` validates the graph (edges
//! resolve, the initial step exists and reaches every step, terminal steps
//! have no outgoing edges, cycles only re-enter steps with an invocation
//! limit) and produces an immutable [`WorkflowDefinition`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::retry::StepRetryPolicy;
use super::step::StepExecutor;

/// Policy when a step's invocation limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnInvocationsLimit {
    /// Terminate the run as Completed with the last output.
    #[default]
    Stop,
    /// Reset the count to 1 and keep going.
    LoopReset,
    /// Fail the run with `InvocationLimitExceeded`.
    Fail,
}

/// One registered step.
#[derive(Clone)]
pub struct StepDefinition {
    pub step_id: String,
    pub executor: Arc<dyn StepExecutor>,
    /// The step's input comes from the resuming request's property bag,
    /// bound against `input_schema`; reaching the step without pending input
    /// suspends the run.
    pub user_input_required: bool,
    /// Schema id of the expected input record.
    pub input_schema: Option<String>,
    /// Schema id of the produced output record.
    pub output_schema: Option<String>,
    /// Marks steps expected to hand work to a background task.
    pub async_execution: bool,
    pub retry_policy: Option<StepRetryPolicy>,
    pub invocations_limit: Option<u32>,
    pub on_invocations_limit: OnInvocationsLimit,
    /// Ordered outgoing edges; `Continue` takes the first.
    pub next_step_ids: Vec<String>,
    /// Boolean-branch sugar: targets for `Branch` on a true/false decision.
    pub true_step: Option<String>,
    pub false_step: Option<String>,
    pub initial: bool,
    pub terminal: bool,
    /// Per-step execution deadline; exceeding it is a `Timeout` failure
    /// subject to the retry policy.
    pub deadline: Option<Duration>,
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("step_id", &self.step_id)
            .field("user_input_required", &self.user_input_required)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .field("async_execution", &self.async_execution)
            .field("retry_policy", &self.retry_policy)
            .field("invocations_limit", &self.invocations_limit)
            .field("on_invocations_limit", &self.on_invocations_limit)
            .field("next_step_ids", &self.next_step_ids)
            .field("true_step", &self.true_step)
            .field("false_step", &self.false_step)
            .field("initial", &self.initial)
            .field("terminal", &self.terminal)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl StepDefinition {
    pub fn new(step_id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            step_id: step_id.into(),
            executor,
            user_input_required: false,
            input_schema: None,
            output_schema: None,
            async_execution: false,
            retry_policy: None,
            invocations_limit: None,
            on_invocations_limit: OnInvocationsLimit::default(),
            next_step_ids: Vec::new(),
            true_step: None,
            false_step: None,
            initial: false,
            terminal: false,
            deadline: None,
        }
    }

    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn user_input(mut self) -> Self {
        self.user_input_required = true;
        self
    }

    pub fn input_schema(mut self, schema_id: impl Into<String>) -> Self {
        self.input_schema = Some(schema_id.into());
        self
    }

    pub fn output_schema(mut self, schema_id: impl Into<String>) -> Self {
        self.output_schema = Some(schema_id.into());
        self
    }

    pub fn async_execution(mut self) -> Self {
        self.async_execution = true;
        self
    }

    pub fn retry(mut self, policy: StepRetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn invocations_limit(mut self, limit: u32, policy: OnInvocationsLimit) -> Self {
        self.invocations_limit = Some(limit);
        self.on_invocations_limit = policy;
        self
    }

    pub fn next(mut self, step_id: impl Into<String>) -> Self {
        self.next_step_ids.push(step_id.into());
        self
    }

    pub fn branches(mut self, true_step: impl Into<String>, false_step: impl Into<String>) -> Self {
        let true_step = true_step.into();
        let false_step = false_step.into();
        if !self.next_step_ids.contains(&true_step) {
            self.next_step_ids.push(true_step.clone());
        }
        if !self.next_step_ids.contains(&false_step) {
            self.next_step_ids.push(false_step.clone());
        }
        self.true_step = Some(true_step);
        self.false_step = Some(false_step);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// All outgoing edge targets (next plus boolean branches).
    pub fn outgoing(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.next_step_ids.iter().map(String::as_str).collect();
        for extra in [&self.true_step, &self.false_step].into_iter().flatten() {
            if !out.contains(&extra.as_str()) {
                out.push(extra);
            }
        }
        out
    }
}

/// Graph validation failure at build time.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WorkflowValidationError {
    #[error("duplicate step id: {0}")]
    DuplicateStep(String),
    #[error("workflow has no initial step")]
    NoInitialStep,
    #[error("workflow has multiple initial steps: {0} and {1}")]
    MultipleInitialSteps(String, String),
    #[error("step {0} is both initial and terminal")]
    InitialAndTerminal(String),
    #[error("step {from} references unknown next step {to}")]
    UnknownNextStep { from: String, to: String },
    #[error("terminal step {0} has outgoing edges")]
    TerminalHasEdges(String),
    #[error("step {0} is unreachable from the initial step")]
    Unreachable(String),
    #[error("cycle re-enters step {0} which has no invocation limit")]
    CycleWithoutLimit(String),
    #[error("workflow has no steps")]
    Empty,
}

/// Immutable, validated workflow graph.
#[derive(Clone, Debug)]
pub struct WorkflowDefinition {
    workflow_id: String,
    description: Option<String>,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
    initial_step_id: String,
}

impl WorkflowDefinition {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.index.get(step_id).map(|&i| &self.steps[i])
    }

    pub fn initial_step(&self) -> &StepDefinition {
        self.step(&self.initial_step_id)
            .expect("validated initial step")
    }

    /// Steps in registration order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Builder for a [`WorkflowDefinition`].
pub struct WorkflowBuilder {
    workflow_id: String,
    description: Option<String>,
    steps: Vec<StepDefinition>,
}

impl WorkflowBuilder {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Validates the graph and produces the immutable definition.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowValidationError> {
        if self.steps.is_empty() {
            return Err(WorkflowValidationError::Empty);
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.step_id.clone(), i).is_some() {
                return Err(WorkflowValidationError::DuplicateStep(step.step_id.clone()));
            }
        }

        let mut initial: Option<&StepDefinition> = None;
        for step in &self.steps {
            if step.initial {
                if step.terminal {
                    return Err(WorkflowValidationError::InitialAndTerminal(
                        step.step_id.clone(),
                    ));
                }
                if let Some(existing) = initial {
                    return Err(WorkflowValidationError::MultipleInitialSteps(
                        existing.step_id.clone(),
                        step.step_id.clone(),
                    ));
                }
                initial = Some(step);
            }
        }
        let initial = initial.ok_or(WorkflowValidationError::NoInitialStep)?;

        for step in &self.steps {
            let outgoing = step.outgoing();
            if step.terminal && !outgoing.is_empty() {
                return Err(WorkflowValidationError::TerminalHasEdges(
                    step.step_id.clone(),
                ));
            }
            for target in outgoing {
                if !index.contains_key(target) {
                    return Err(WorkflowValidationError::UnknownNextStep {
                        from: step.step_id.clone(),
                        to: target.to_string(),
                    });
                }
            }
        }

        // Reachability from the initial step over all outgoing edges.
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack = vec![initial.step_id.as_str()];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            let step = &self.steps[index[id]];
            stack.extend(step.outgoing());
        }
        for step in &self.steps {
            if !reachable.contains(step.step_id.as_str()) {
                return Err(WorkflowValidationError::Unreachable(step.step_id.clone()));
            }
        }

        // Cycles may only re-enter steps that carry an invocation limit.
        self.check_cycles(&index, initial.step_id.as_str())?;

        let initial_step_id = initial.step_id.clone();
        Ok(WorkflowDefinition {
            workflow_id: self.workflow_id,
            description: self.description,
            steps: self.steps,
            index,
            initial_step_id,
        })
    }

    /// Iterative DFS with a color map; a back edge into a limitless step is
    /// rejected.
    fn check_cycles(
        &self,
        index: &HashMap<String, usize>,
        start: &str,
    ) -> Result<(), WorkflowValidationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut colors: HashMap<&str, Color> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), Color::White))
            .collect();

        enum Frame<'a> {
            Enter(&'a str),
            Exit(&'a str),
        }
        let mut stack = vec![Frame::Enter(start)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if colors[id] != Color::White {
                        continue;
                    }
                    colors.insert(id, Color::Gray);
                    stack.push(Frame::Exit(id));
                    let step = &self.steps[index[id]];
                    for target in step.outgoing() {
                        match colors[target] {
                            Color::Gray => {
                                let re_entered = &self.steps[index[target]];
                                if re_entered.invocations_limit.is_none() {
                                    return Err(WorkflowValidationError::CycleWithoutLimit(
                                        target.to_string(),
                                    ));
                                }
                            }
                            Color::White => stack.push(Frame::Enter(target)),
                            Color::Black => {}
                        }
                    }
                }
                Frame::Exit(id) => {
                    colors.insert(id, Color::Black);
                }
            }
        }
        Ok(())
    }
}

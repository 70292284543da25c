//! Workflow run state: one live execution of a workflow graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::WorkflowError;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// One persisted step output; the run keeps them in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    pub step_id: String,
    pub output: Value,
}

/// One live execution of a workflow for a particular trigger.
///
/// The run exclusively owns its `step_outputs`; it is created by the first
/// input and destroyed only on explicit purge. Readers observe persisted
/// snapshots through the repository; only the worker driving the run mutates
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_id: String,
    pub trigger_data: Value,
    /// Ordered step outputs; re-executing a step overwrites its entry in
    /// place, preserving first-execution order.
    pub step_outputs: Vec<StepOutput>,
    #[serde(default)]
    pub custom_data: serde_json::Map<String, Value>,
    pub current_step_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub step_invocation_counts: HashMap<String, u32>,
    /// Chat this run is bound to, when started through the chat layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Final result of a Completed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    /// Error of a Failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Fresh Running run with a random id.
    pub fn new(workflow_id: impl Into<String>, trigger_data: Value) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            trigger_data,
            step_outputs: Vec::new(),
            custom_data: serde_json::Map::new(),
            current_step_id: None,
            status: RunStatus::Running,
            step_invocation_counts: HashMap::new(),
            chat_id: None,
            language: None,
            final_output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Output of a step, if it has executed.
    pub fn output_of(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs
            .iter()
            .find(|o| o.step_id == step_id)
            .map(|o| &o.output)
    }

    /// Most recent step output (execution order).
    pub fn last_output(&self) -> Option<&Value> {
        self.step_outputs.last().map(|o| &o.output)
    }

    /// Records a step output, overwriting in place when the step ran before.
    pub fn record_output(&mut self, step_id: &str, output: Value) {
        if let Some(slot) = self.step_outputs.iter_mut().find(|o| o.step_id == step_id) {
            slot.output = output;
        } else {
            self.step_outputs.push(StepOutput {
                step_id: step_id.to_string(),
                output,
            });
        }
        self.touch();
    }

    /// Increments and returns the invocation count of a step.
    pub fn increment_invocations(&mut self, step_id: &str) -> u32 {
        let count = self
            .step_invocation_counts
            .entry(step_id.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Resets a step's invocation count (the LoopReset limit policy).
    pub fn reset_invocations(&mut self, step_id: &str, value: u32) {
        self.step_invocation_counts
            .insert(step_id.to_string(), value);
    }

    pub fn invocations(&self, step_id: &str) -> u32 {
        self.step_invocation_counts
            .get(step_id)
            .copied()
            .unwrap_or(0)
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Outputs keep execution order; a re-executed step
    /// overwrites its entry in place.
    #[test]
    fn outputs_keep_order_and_overwrite_in_place() {
        let mut run = WorkflowRun::new("wf", Value::Null);
        run.record_output("a", serde_json::json!(1));
        run.record_output("b", serde_json::json!(2));
        run.record_output("a", serde_json::json!(3));

        let order: Vec<_> = run.step_outputs.iter().map(|o| o.step_id.clone()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(run.output_of("a"), Some(&serde_json::json!(3)));
        assert_eq!(run.last_output(), Some(&serde_json::json!(2)));
    }

    /// **Scenario**: Invocation counts increment per step and reset for the
    /// LoopReset policy.
    #[test]
    fn invocation_counts_track_per_step() {
        let mut run = WorkflowRun::new("wf", Value::Null);
        assert_eq!(run.increment_invocations("s"), 1);
        assert_eq!(run.increment_invocations("s"), 2);
        assert_eq!(run.invocations("other"), 0);
        run.reset_invocations("s", 1);
        assert_eq!(run.invocations("s"), 1);
    }

    /// **Scenario**: Status terminality classification.
    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Suspended.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    /// **Scenario**: A run round-trips through serde (repository snapshots).
    #[test]
    fn run_serde_roundtrip() {
        let mut run = WorkflowRun::new("wf", serde_json::json!({"q": "hi"}));
        run.record_output("echo", serde_json::json!({"q": "hi"}));
        run.status = RunStatus::Completed;
        let json = serde_json::to_string(&run).unwrap();
        let back: WorkflowRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, run.run_id);
        assert_eq!(back.status, RunStatus::Completed);
        assert_eq!(back.output_of("echo"), run.output_of("echo"));
    }
}

//! Agent composition: sequential chains, predicate loops, agent-as-tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::tools::{single_string_schema, Tool, ToolError, ToolSpec};
use super::{Agent, AgentInvokeError, AgentResponse};

/// Chains agents A₁…Aₙ: the input of each stage is the output of the
/// previous one. The response carries the last stage's metadata.
pub struct SequentialAgent {
    agents: Vec<Arc<Agent>>,
}

impl SequentialAgent {
    /// Builds a chain; at least one agent is required to do anything useful,
    /// but an empty chain simply echoes the input.
    pub fn new(agents: Vec<Arc<Agent>>) -> Self {
        Self { agents }
    }

    pub async fn execute(&self, input: &str) -> Result<AgentResponse<String>, AgentInvokeError> {
        let mut current = input.to_string();
        let mut last_meta: Option<AgentResponse<String>> = None;
        for agent in &self.agents {
            let response = agent.execute_text(&current).await?;
            current = response.data.clone();
            last_meta = Some(response);
        }
        Ok(match last_meta {
            Some(mut response) => {
                response.data = current;
                response
            }
            None => AgentResponse {
                data: current,
                trace_id: None,
                usage: None,
            },
        })
    }
}

/// Runs an inner agent repeatedly; a predicate agent decides when to stop.
///
/// After each inner run the predicate sees the current output; when its
/// (trimmed, lowercased) reply starts with the stop signal the loop exits.
/// The hard iteration cap always bounds the loop regardless of the predicate.
pub struct LoopAgent {
    inner: Arc<Agent>,
    predicate: Arc<Agent>,
    max_iterations: usize,
    stop_signal: String,
}

impl LoopAgent {
    pub fn new(inner: Arc<Agent>, predicate: Arc<Agent>, max_iterations: usize) -> Self {
        Self {
            inner,
            predicate,
            max_iterations: max_iterations.max(1),
            stop_signal: "done".to_string(),
        }
    }

    /// Overrides the reply prefix that stops the loop (default `"done"`).
    pub fn with_stop_signal(mut self, signal: impl Into<String>) -> Self {
        self.stop_signal = signal.into().to_lowercase();
        self
    }

    pub async fn execute(&self, input: &str) -> Result<AgentResponse<String>, AgentInvokeError> {
        let mut current = input.to_string();
        let mut last = AgentResponse {
            data: current.clone(),
            trace_id: None,
            usage: None,
        };
        for iteration in 0..self.max_iterations {
            let response = self.inner.execute_text(&current).await?;
            current = response.data.clone();
            last = response;

            let verdict = self.predicate.execute_text(&current).await?;
            if verdict
                .data
                .trim()
                .to_lowercase()
                .starts_with(&self.stop_signal)
            {
                tracing::debug!(iteration, "loop agent predicate satisfied");
                break;
            }
        }
        Ok(last)
    }
}

/// Wraps an agent as a tool with a single required `input` string parameter,
/// so one agent can delegate to another through the normal tool loop.
pub struct AgentTool {
    name: String,
    description: String,
    agent: Arc<Agent>,
}

impl AgentTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agent: Arc<Agent>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent,
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: single_string_schema("input", "input passed to the delegate agent"),
        }
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let input = super::tools::FnTool::string_arg(&args, "input")?;
        self.agent
            .execute_text(&input)
            .await
            .map(|r| r.data)
            .map_err(|e| ToolError::Execution(e.to_string()))
    }
}

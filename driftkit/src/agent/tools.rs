//! Tools callable by the model during an agent run.
//!
//! Each tool has a unique name, a spec (description + JSON schema for its
//! arguments), and async call logic. Tools are registered in a
//! [`ToolRegistry`]; the agent's tool loop dispatches model tool calls
//! through it and appends the string results to the conversation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolDefinition;

/// Declaration of one tool for the model: name, description, argument schema.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

impl From<ToolSpec> for ToolDefinition {
    fn from(spec: ToolSpec) -> Self {
        ToolDefinition {
            name: spec.name,
            description: spec.description,
            parameters: spec.input_schema,
        }
    }
}

/// Error from tool lookup or execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry; the model calls the tool by this name.
    fn name(&self) -> &str;

    /// Spec shown to the model (description + argument JSON schema).
    fn spec(&self) -> ToolSpec;

    /// Executes with the model-provided arguments; the string result is fed
    /// back to the model verbatim.
    async fn call(&self, args: Value) -> Result<String, ToolError>;
}

/// Named set of tools with insertion-ordered specs.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; a tool with the same name replaces the previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Specs in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    /// Tool definitions for a model request, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs().into_iter().map(Into::into).collect()
    }

    /// Dispatches a call to the named tool.
    pub async fn call(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.call(args).await
    }
}

type ToolFuture = futures::future::BoxFuture<'static, Result<String, ToolError>>;

/// Tool built from a closure; the common case for application tools.
pub struct FnTool {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handler: Box<dyn Fn(Value) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    /// Creates a tool from an async closure. `input_schema` is the JSON
    /// schema of the arguments object.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Reads a required string argument out of a JSON arguments object.
    pub fn string_arg(args: &Value, name: &str) -> Result<String, ToolError> {
        args.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidArguments(format!("missing string `{name}`")))
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        (self.handler)(args).await
    }
}

/// Schema for a tool taking a single required string argument.
pub fn single_string_schema(arg_name: &str, description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            arg_name: { "type": "string", "description": description }
        },
        "required": [arg_name],
    })
}

/// Convenience map-based lookup of specs by name (e.g. for diagnostics).
pub fn specs_by_name(registry: &ToolRegistry) -> HashMap<String, ToolSpec> {
    registry
        .specs()
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect()
}

//! Agent layer: typed LLM invocations over a model client.
//!
//! An [`Agent`] is a façade around an `Arc<dyn ModelClient>` with four
//! execution modes: plain text, structured output (JSON-schema forced through
//! the schema registry), prompt-templated (resolved through the prompt
//! registry), and tool-calling (a conversational loop with a depth cap).
//! After every model call the agent submits a trace record; tracing failures
//! never fail the call.
//!
//! Composition lives in [`compose`]: [`SequentialAgent`] chains agents,
//! [`LoopAgent`] repeats one under a predicate, and [`AgentTool`] wraps an
//! agent as a tool.

pub mod compose;
pub mod tools;

pub use compose::{AgentTool, LoopAgent, SequentialAgent};
pub use tools::{FnTool, Tool, ToolError, ToolRegistry, ToolSpec};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

use crate::error::{ErrorKind, WorkflowError};
use crate::llm::{
    ModelClient, ModelError, ModelMessage, ModelRequest, ModelResponse, ModelUsage, ResponseFormat,
};
use crate::prompts::{PromptError, PromptRegistry, PromptRenderer};
use crate::schema::{SchemaRegistry, SchemaType};
use crate::trace::{ContextType, NullTraceSink, RequestContext, RequestType, TraceRecord, TraceSink};

/// Result of one agent invocation: the typed payload plus call metadata.
#[derive(Debug, Clone)]
pub struct AgentResponse<T> {
    pub data: T,
    /// Trace id of the final model call, when tracing produced one.
    pub trace_id: Option<String>,
    pub usage: Option<ModelUsage>,
}

/// Failure of an agent invocation.
#[derive(Debug, Error)]
pub enum AgentInvokeError {
    #[error(transparent)]
    Model(#[from] ModelError),
    /// Model output did not conform to the requested schema.
    #[error("structured parse failed: {0}")]
    StructuredParse(String),
    /// Tool-call loop exceeded the configured depth.
    #[error("tool-call depth exceeded after {0} rounds")]
    ToolDepthExceeded(usize),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl From<AgentInvokeError> for WorkflowError {
    fn from(err: AgentInvokeError) -> Self {
        match err {
            AgentInvokeError::Model(e) => e.into(),
            AgentInvokeError::StructuredParse(msg) => {
                WorkflowError::new(ErrorKind::StructuredParse, msg)
            }
            AgentInvokeError::ToolDepthExceeded(rounds) => WorkflowError::new(
                ErrorKind::ToolDepthExceeded,
                format!("tool-call depth exceeded after {rounds} rounds"),
            ),
            AgentInvokeError::Prompt(e) => {
                WorkflowError::new(ErrorKind::PermanentFailure, e.to_string())
            }
        }
    }
}

/// Sampling and behavior options applied to every call of one agent.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    /// Maximum tool-call rounds in `execute_with_tools`.
    pub max_tool_depth: usize,
    /// Language used for prompt-registry lookups.
    pub language: String,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model_id: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            system_prompt: None,
            max_tool_depth: 8,
            language: "en".to_string(),
        }
    }
}

/// Typed LLM invocation façade. Build with [`Agent::builder`].
pub struct Agent {
    id: String,
    client: Arc<dyn ModelClient>,
    options: AgentOptions,
    schemas: Arc<SchemaRegistry>,
    prompts: Option<Arc<dyn PromptRegistry>>,
    renderer: PromptRenderer,
    sink: Arc<dyn TraceSink>,
    chat_id: Option<String>,
    context_type: ContextType,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    id: String,
    client: Arc<dyn ModelClient>,
    options: AgentOptions,
    schemas: Option<Arc<SchemaRegistry>>,
    prompts: Option<Arc<dyn PromptRegistry>>,
    renderer: PromptRenderer,
    sink: Option<Arc<dyn TraceSink>>,
    chat_id: Option<String>,
    context_type: ContextType,
}

impl Agent {
    pub fn builder(client: Arc<dyn ModelClient>) -> AgentBuilder {
        AgentBuilder {
            id: uuid::Uuid::new_v4().to_string(),
            client,
            options: AgentOptions::default(),
            schemas: None,
            prompts: None,
            renderer: PromptRenderer::new(),
            sink: None,
            chat_id: None,
            context_type: ContextType::Agent,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    fn base_request(&self) -> ModelRequest {
        ModelRequest {
            model_id: self.options.model_id.clone(),
            temperature: self.options.temperature,
            top_p: self.options.top_p,
            max_tokens: self.options.max_tokens,
            ..ModelRequest::default()
        }
    }

    fn messages_for(&self, prompt: &str) -> Vec<ModelMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &self.options.system_prompt {
            messages.push(ModelMessage::system(system.clone()));
        }
        messages.push(ModelMessage::user(prompt));
        messages
    }

    /// One traced model round-trip. The trace record is submitted for both
    /// success and failure; sink problems never surface here.
    async fn call_model(
        &self,
        request: ModelRequest,
        prompt_id: Option<String>,
        prompt_template: Option<String>,
        variables: HashMap<String, String>,
    ) -> (Result<ModelResponse, ModelError>, String) {
        let mut context = RequestContext::new(self.id.clone(), self.context_type.clone())
            .with_variables(variables);
        context.chat_id = self.chat_id.clone();
        context.prompt_id = prompt_id;

        let mut record = TraceRecord::for_context(&context, RequestType::TextToText);
        record.prompt_template = prompt_template;
        record.model_id = request.model_id.clone();
        let trace_id = record.trace_id.clone();

        let started = Instant::now();
        let result = self.client.text_to_text(request).await;
        record.execution_time_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => {
                record.response = response.first_text();
                if let Some(usage) = response.usage.or(response.stats.usage) {
                    record.prompt_tokens = Some(usage.prompt_tokens);
                    record.completion_tokens = Some(usage.completion_tokens);
                }
                if record.model_id.is_none() {
                    record.model_id = response.stats.model_id.clone();
                }
            }
            Err(e) => record.error_message = Some(e.to_string()),
        }
        self.sink.submit(record);
        (result, trace_id)
    }

    /// Single model call returning the assistant text.
    pub async fn execute_text(
        &self,
        prompt: &str,
    ) -> Result<AgentResponse<String>, AgentInvokeError> {
        let request = self.base_request().with_messages(self.messages_for(prompt));
        let (result, trace_id) = self
            .call_model(request, None, None, HashMap::new())
            .await;
        let response = result?;
        Ok(AgentResponse {
            data: response.first_text().unwrap_or_default(),
            trace_id: Some(trace_id),
            usage: response.usage,
        })
    }

    /// Forces a JSON-schema response for `T` and parses it.
    ///
    /// The schema comes from the registry (`T: SchemaType`); non-conformant
    /// output fails with [`AgentInvokeError::StructuredParse`].
    pub async fn execute_structured<T: SchemaType>(
        &self,
        prompt: &str,
    ) -> Result<AgentResponse<T>, AgentInvokeError> {
        let schema = self.schemas.register::<T>();
        let request = self
            .base_request()
            .with_messages(self.messages_for(prompt))
            .with_response_format(ResponseFormat::JsonSchema(schema.as_ref().clone()));
        let (result, trace_id) = self
            .call_model(request, None, None, HashMap::new())
            .await;
        let response = result?;
        let text = response.first_text().unwrap_or_default();
        let data = parse_structured::<T>(&text)?;
        Ok(AgentResponse {
            data,
            trace_id: Some(trace_id),
            usage: response.usage,
        })
    }

    /// Resolves the prompt for `(method, agent language)` through the prompt
    /// registry, renders it with `vars`, and executes it as text.
    pub async fn execute_with_prompt(
        &self,
        method: &str,
        vars: &HashMap<String, String>,
    ) -> Result<AgentResponse<String>, AgentInvokeError> {
        let registry = self.prompts.as_ref().ok_or_else(|| PromptError::Missing {
            method: method.to_string(),
            language: self.options.language.clone(),
        })?;
        let prompt = registry
            .current(method, &self.options.language)
            .ok_or_else(|| PromptError::Missing {
                method: method.to_string(),
                language: self.options.language.clone(),
            })?;
        let rendered = self.renderer.render(&prompt, vars);

        let request = self
            .base_request()
            .with_messages(self.messages_for(&rendered));
        let (result, trace_id) = self
            .call_model(
                request,
                Some(prompt.id.clone()),
                Some(prompt.message.clone()),
                vars.clone(),
            )
            .await;
        let response = result?;
        Ok(AgentResponse {
            data: response.first_text().unwrap_or_default(),
            trace_id: Some(trace_id),
            usage: response.usage,
        })
    }

    /// Conversational tool loop.
    ///
    /// The model may answer with tool calls; each is dispatched through the
    /// registry, the string result is appended as a tool message, and the
    /// loop continues until a terminal assistant message arrives or the depth
    /// cap trips. Tool execution errors are fed back to the model as result
    /// text rather than aborting the loop.
    pub async fn execute_with_tools(
        &self,
        prompt: &str,
        tools: &ToolRegistry,
    ) -> Result<AgentResponse<String>, AgentInvokeError> {
        let mut messages = self.messages_for(prompt);
        let mut rounds = 0usize;

        loop {
            let request = self
                .base_request()
                .with_messages(messages.clone())
                .with_tools(tools.definitions());
            let (result, trace_id) = self
                .call_model(request, None, None, HashMap::new())
                .await;
            let response = result?;

            let Some(choice) = response.choices.first() else {
                return Ok(AgentResponse {
                    data: String::new(),
                    trace_id: Some(trace_id),
                    usage: response.usage,
                });
            };
            if choice.message.tool_calls.is_empty() {
                return Ok(AgentResponse {
                    data: choice.message.text(),
                    trace_id: Some(trace_id),
                    usage: response.usage,
                });
            }

            if rounds >= self.options.max_tool_depth {
                return Err(AgentInvokeError::ToolDepthExceeded(rounds));
            }
            rounds += 1;

            messages.push(choice.message.clone());
            for call in &choice.message.tool_calls {
                let result = tools.call(&call.name, call.arguments.clone()).await;
                let text = match result {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                        format!("tool error: {e}")
                    }
                };
                messages.push(ModelMessage::tool_result(call.id.clone(), text));
            }
        }
    }
}

/// Parses structured model output, tolerating a markdown code fence around
/// the JSON body.
fn parse_structured<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, AgentInvokeError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    serde_json::from_str(body)
        .map_err(|e| AgentInvokeError::StructuredParse(format!("{e}; output: {trimmed}")))
}

/// Parses arbitrary JSON with the same fence tolerance (used by the reranker).
pub(crate) fn parse_structured_value(text: &str) -> Result<Value, AgentInvokeError> {
    parse_structured::<Value>(text)
}

impl AgentBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.options.model_id = Some(model_id.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.options.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tool_depth(mut self, depth: usize) -> Self {
        self.options.max_tool_depth = depth;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.options.language = language.into();
        self
    }

    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptRegistry>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn context_type(mut self, context_type: ContextType) -> Self {
        self.context_type = context_type;
        self
    }

    pub fn build(self) -> Agent {
        Agent {
            id: self.id,
            client: self.client,
            options: self.options,
            schemas: self.schemas.unwrap_or_default(),
            prompts: self.prompts,
            renderer: self.renderer,
            sink: self.sink.unwrap_or_else(|| Arc::new(NullTraceSink)),
            chat_id: self.chat_id,
            context_type: self.context_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockModelClient, ToolInvocation};
    use crate::prompts::{InMemoryPromptRegistry, Prompt};
    use crate::schema::{Property, Schema};
    use crate::trace::InMemoryTraceStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sentiment {
        label: String,
        confidence: f64,
    }

    impl SchemaType for Sentiment {
        fn schema() -> Schema {
            Schema::new("sentiment")
                .property(Property::string("label").required())
                .property(Property::number("confidence").required())
        }
    }

    struct RecordingSink(Arc<InMemoryTraceStore>);
    impl TraceSink for RecordingSink {
        fn submit(&self, record: TraceRecord) {
            let _ = crate::trace::TraceStore::save(self.0.as_ref(), record);
        }
    }

    fn agent_with(client: Arc<MockModelClient>, store: Arc<InMemoryTraceStore>) -> Agent {
        Agent::builder(client)
            .id("agent-test")
            .trace_sink(Arc::new(RecordingSink(store)))
            .build()
    }

    /// **Scenario**: execute_text returns the assistant text and submits
    /// exactly one trace record for the round-trip.
    #[tokio::test]
    async fn execute_text_returns_text_and_traces_once() {
        let client = Arc::new(MockModelClient::with_fixed_text("hello back"));
        let store = Arc::new(InMemoryTraceStore::new());
        let agent = agent_with(client, store.clone());

        let response = agent.execute_text("hello").await.unwrap();
        assert_eq!(response.data, "hello back");
        assert!(response.trace_id.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].response.as_deref(), Some("hello back"));
    }

    /// **Scenario**: A model failure is traced (error message recorded) and
    /// surfaced to the caller.
    #[tokio::test]
    async fn model_failure_is_traced_and_surfaced() {
        let client = Arc::new(MockModelClient::new());
        client.push_error(ModelError::ProviderUnavailable("down".into()));
        let store = Arc::new(InMemoryTraceStore::new());
        let agent = agent_with(client, store.clone());

        let err = agent.execute_text("hi").await.unwrap_err();
        assert!(matches!(err, AgentInvokeError::Model(_)));
        assert_eq!(store.len(), 1);
        assert!(store.records()[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("down"));
    }

    /// **Scenario**: execute_structured forces the JSON-schema response format
    /// and parses conformant output into the record type.
    #[tokio::test]
    async fn execute_structured_parses_conformant_output() {
        let client = Arc::new(MockModelClient::new());
        client.push_text(r#"{"label":"positive","confidence":0.9}"#);
        let store = Arc::new(InMemoryTraceStore::new());
        let agent = agent_with(client.clone(), store);

        let response = agent.execute_structured::<Sentiment>("rate this").await.unwrap();
        assert_eq!(
            response.data,
            Sentiment {
                label: "positive".into(),
                confidence: 0.9
            }
        );
        let sent = client.requests();
        assert!(matches!(
            sent[0].response_format,
            ResponseFormat::JsonSchema(_)
        ));
    }

    /// **Scenario**: Non-conformant structured output fails with StructuredParse.
    #[tokio::test]
    async fn execute_structured_rejects_bad_output() {
        let client = Arc::new(MockModelClient::new());
        client.push_text("definitely not json");
        let agent = agent_with(client, Arc::new(InMemoryTraceStore::new()));

        let err = agent.execute_structured::<Sentiment>("rate").await.unwrap_err();
        assert!(matches!(err, AgentInvokeError::StructuredParse(_)));
    }

    /// **Scenario**: Fenced JSON output still parses.
    #[tokio::test]
    async fn execute_structured_tolerates_code_fence() {
        let client = Arc::new(MockModelClient::new());
        client.push_text("```json\n{\"label\":\"neg\",\"confidence\":0.2}\n```");
        let agent = agent_with(client, Arc::new(InMemoryTraceStore::new()));
        let response = agent.execute_structured::<Sentiment>("rate").await.unwrap();
        assert_eq!(response.data.label, "neg");
    }

    /// **Scenario**: execute_with_prompt resolves and renders the registry
    /// prompt; the trace carries prompt id, template, and variables.
    #[tokio::test]
    async fn execute_with_prompt_resolves_and_traces_lineage() {
        let prompts = Arc::new(InMemoryPromptRegistry::new());
        let saved = prompts.save(Prompt::new("greet", "en", "Say hi to {{name}}"));
        let client = Arc::new(MockModelClient::with_fixed_text("hi Ada"));
        let store = Arc::new(InMemoryTraceStore::new());
        let agent = Agent::builder(client.clone())
            .prompts(prompts)
            .trace_sink(Arc::new(RecordingSink(store.clone())))
            .build();

        let vars: HashMap<String, String> = [("name".to_string(), "Ada".to_string())].into();
        let response = agent.execute_with_prompt("greet", &vars).await.unwrap();
        assert_eq!(response.data, "hi Ada");
        assert_eq!(client.requests()[0].messages[0].text(), "Say hi to Ada");

        let record = &store.records()[0];
        assert_eq!(record.prompt_id.as_deref(), Some(saved.id.as_str()));
        assert_eq!(record.prompt_template.as_deref(), Some("Say hi to {{name}}"));
        assert_eq!(record.variables.get("name").map(String::as_str), Some("Ada"));
    }

    /// **Scenario**: A missing prompt fails with PromptError::Missing.
    #[tokio::test]
    async fn execute_with_prompt_missing_fails() {
        let agent = Agent::builder(Arc::new(MockModelClient::new()))
            .prompts(Arc::new(InMemoryPromptRegistry::new()))
            .build();
        let err = agent
            .execute_with_prompt("ghost", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentInvokeError::Prompt(PromptError::Missing { .. })
        ));
    }

    /// **Scenario**: The tool loop dispatches each requested call, appends the
    /// string result, and returns the terminal assistant message. Every model
    /// round-trip is traced.
    #[tokio::test]
    async fn tool_loop_dispatches_and_terminates() {
        let client = Arc::new(MockModelClient::new());
        client.push_tool_calls(vec![ToolInvocation {
            id: "call-1".into(),
            name: "double".into(),
            arguments: serde_json::json!({"input": "21"}),
        }]);
        client.push_text("the answer is 42");
        let store = Arc::new(InMemoryTraceStore::new());
        let agent = agent_with(client.clone(), store.clone());

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new(
            "double",
            "Doubles a number",
            tools::single_string_schema("input", "number"),
            |args| async move {
                let n: i64 = FnTool::string_arg(&args, "input")?
                    .parse()
                    .map_err(|e| ToolError::InvalidArguments(format!("{e}")))?;
                Ok((n * 2).to_string())
            },
        )));

        let response = agent.execute_with_tools("double 21", &registry).await.unwrap();
        assert_eq!(response.data, "the answer is 42");
        assert_eq!(store.len(), 2, "one trace per model round-trip");

        // Second request must contain the tool result message.
        let second = &client.requests()[1];
        let tool_msg = second
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call-1"))
            .expect("tool result message");
        assert_eq!(tool_msg.text(), "42");
    }

    /// **Scenario**: The loop aborts with ToolDepthExceeded when the model
    /// keeps requesting tools past the cap.
    #[tokio::test]
    async fn tool_loop_depth_cap_trips() {
        let client = Arc::new(MockModelClient::new());
        for i in 0..4 {
            client.push_tool_calls(vec![ToolInvocation {
                id: format!("call-{i}"),
                name: "noop".into(),
                arguments: serde_json::json!({}),
            }]);
        }
        let agent = Agent::builder(client)
            .max_tool_depth(2)
            .build();

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new(
            "noop",
            "Does nothing",
            serde_json::json!({"type": "object", "properties": {}}),
            |_| async move { Ok("ok".to_string()) },
        )));

        let err = agent.execute_with_tools("go", &registry).await.unwrap_err();
        assert!(matches!(err, AgentInvokeError::ToolDepthExceeded(2)));
    }

    /// **Scenario**: A failing tool feeds its error text back to the model
    /// instead of aborting the loop.
    #[tokio::test]
    async fn failing_tool_feeds_error_text_back() {
        let client = Arc::new(MockModelClient::new());
        client.push_tool_calls(vec![ToolInvocation {
            id: "c1".into(),
            name: "missing_tool".into(),
            arguments: serde_json::json!({}),
        }]);
        client.push_text("recovered");
        let agent = agent_with(client.clone(), Arc::new(InMemoryTraceStore::new()));

        let registry = ToolRegistry::new();
        let response = agent.execute_with_tools("go", &registry).await.unwrap();
        assert_eq!(response.data, "recovered");
        let second = &client.requests()[1];
        let tool_msg = second
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .expect("tool result message");
        assert!(tool_msg.text().contains("tool error"));
    }
}

//! The `DriftKit` process-lifecycle object.
//!
//! One explicitly constructed value owns the registries, the engine, the
//! chat service, and the trace sink; its lifetime bounds the worker pools.
//! There are no process-wide singletons: everything reachable from a step or
//! an agent was injected here.

use std::sync::Arc;

use crate::agent::{Agent, AgentBuilder};
use crate::chat::{
    ChatError, ChatMessage, ChatMessageTask, ChatRequest, ChatResponse, ChatService, ChatSession,
    ChatStore, InMemoryChatStore, Page, PageRequest,
};
use crate::config::DriftConfig;
use crate::error::WorkflowError;
use crate::llm::ModelClient;
use crate::prompts::{
    dictionary::Dictionary, InMemoryPromptRegistry, PromptRegistry, PromptRenderer,
};
use crate::rag::{
    Embedder, InMemoryVectorStore, ModelBasedReranker, Retriever, VectorStore,
};
use crate::schema::{Schema, SchemaRegistry};
use crate::trace::{AsyncTraceSink, NullTraceSink, TraceSink, TraceStore};
use crate::workflow::{
    AsyncTaskRegistry, RetryStateStore, WorkflowContextRepository, WorkflowDefinition,
    WorkflowEngine, WorkflowRun,
};

/// Metadata projection of one registered workflow.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowDetails {
    pub workflow_id: String,
    pub description: Option<String>,
    pub step_ids: Vec<String>,
    pub initial_step_id: String,
}

/// Builder for [`DriftKit`]. Collaborators default to the in-memory
/// implementations; a model client is required only when agents or the
/// reranker are used.
pub struct DriftKitBuilder {
    config: DriftConfig,
    model_client: Option<Arc<dyn ModelClient>>,
    prompts: Option<Arc<dyn PromptRegistry>>,
    dictionary: Option<Arc<dyn Dictionary>>,
    chat_store: Option<Arc<dyn ChatStore>>,
    repository: Option<Arc<dyn WorkflowContextRepository>>,
    retry_store: Option<Arc<dyn RetryStateStore>>,
    tasks: Option<Arc<AsyncTaskRegistry>>,
    trace_store: Option<Arc<dyn TraceStore>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl DriftKitBuilder {
    pub fn config(mut self, config: DriftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.model_client = Some(client);
        self
    }

    pub fn prompts(mut self, prompts: Arc<dyn PromptRegistry>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn dictionary(mut self, dictionary: Arc<dyn Dictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    pub fn chat_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.chat_store = Some(store);
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

    pub fn task_registry(mut self, tasks: Arc<AsyncTaskRegistry>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn trace_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.trace_store = Some(store);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Wires everything together. Must run inside a tokio runtime (the chat
    /// service spawns its completion forwarder).
    pub fn build(self) -> DriftKit {
        let config = self.config;
        let schemas = Arc::new(SchemaRegistry::new());
        let prompts: Arc<dyn PromptRegistry> = self
            .prompts
            .unwrap_or_else(|| Arc::new(InMemoryPromptRegistry::new()));
        let renderer = match &self.dictionary {
            Some(dictionary) => PromptRenderer::new().with_dictionary(dictionary.clone()),
            None => PromptRenderer::new(),
        };

        let trace_sink: Arc<dyn TraceSink> = match (config.tracing.enabled, self.trace_store) {
            (true, Some(store)) => {
                let mut sink = AsyncTraceSink::new(store, AsyncTraceSink::DEFAULT_QUEUE_CAPACITY);
                if let Some(name) = &config.tracing.application_name {
                    sink = sink.with_application_name(name.clone());
                }
                Arc::new(sink)
            }
            _ => Arc::new(NullTraceSink),
        };

        let mut engine_builder = WorkflowEngine::builder()
            .config(config.engine_config())
            .schemas(schemas.clone());
        if let Some(repository) = self.repository {
            engine_builder = engine_builder.repository(repository);
        }
        if let Some(retry_store) = self.retry_store {
            engine_builder = engine_builder.retry_store(retry_store);
        }
        if let Some(tasks) = self.tasks {
            engine_builder = engine_builder.tasks(tasks);
        }
        let engine = engine_builder.build();

        let chat_store = self
            .chat_store
            .unwrap_or_else(|| Arc::new(InMemoryChatStore::new()));
        let chat = ChatService::new(engine.clone(), chat_store);

        let vector_store = self
            .vector_store
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));

        DriftKit {
            config,
            schemas,
            prompts,
            renderer,
            trace_sink,
            engine,
            chat,
            model_client: self.model_client,
            vector_store,
            embedder: self.embedder,
        }
    }
}

/// The toolkit: one value owning registries, engine, chat layer, retrieval
/// wiring, and the tracing sink.
pub struct DriftKit {
    config: DriftConfig,
    schemas: Arc<SchemaRegistry>,
    prompts: Arc<dyn PromptRegistry>,
    renderer: PromptRenderer,
    trace_sink: Arc<dyn TraceSink>,
    engine: WorkflowEngine,
    chat: Arc<ChatService>,
    model_client: Option<Arc<dyn ModelClient>>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl DriftKit {
    pub fn builder() -> DriftKitBuilder {
        DriftKitBuilder {
            config: DriftConfig::default(),
            model_client: None,
            prompts: None,
            dictionary: None,
            chat_store: None,
            repository: None,
            retry_store: None,
            tasks: None,
            trace_store: None,
            vector_store: None,
            embedder: None,
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn prompts(&self) -> &Arc<dyn PromptRegistry> {
        &self.prompts
    }

    pub fn renderer(&self) -> &PromptRenderer {
        &self.renderer
    }

    pub fn trace_sink(&self) -> &Arc<dyn TraceSink> {
        &self.trace_sink
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn chat(&self) -> &Arc<ChatService> {
        &self.chat
    }

    /// Registers a workflow with the engine.
    pub fn register_workflow(&self, definition: WorkflowDefinition) {
        self.engine.register_workflow(definition);
    }

    /// Pre-configured agent builder wired to this runtime's prompts,
    /// schemas, and trace sink. Requires a model client.
    pub fn agent(&self) -> Option<AgentBuilder> {
        let client = self.model_client.clone()?;
        Some(
            Agent::builder(client)
                .schemas(self.schemas.clone())
                .prompts(self.prompts.clone())
                .renderer(self.renderer.clone())
                .trace_sink(self.trace_sink.clone()),
        )
    }

    /// Retriever over this runtime's vector store, with the configured
    /// defaults and (when enabled and a model client exists) the model-based
    /// reranker.
    pub fn retriever(&self) -> Retriever {
        let mut retriever = Retriever::new(self.vector_store.clone())
            .with_defaults(self.config.retriever_defaults());
        if let Some(embedder) = &self.embedder {
            retriever = retriever.with_embedder(embedder.clone());
        }
        if self.config.rag.reranker.enabled {
            if let Some(client) = &self.model_client {
                let mut reranker = ModelBasedReranker::new(client.clone())
                    .with_trace_sink(self.trace_sink.clone());
                if let Some(model) = &self.config.rag.reranker.model {
                    reranker = reranker.with_model_id(model.clone());
                }
                if let Some(temperature) = self.config.rag.reranker.temperature {
                    reranker = reranker.with_temperature(temperature);
                }
                retriever = retriever.with_reranker(Arc::new(reranker));
            }
        }
        retriever
    }

    // --- Public API surface (spec inbound operations) ---

    pub async fn execute_chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        self.chat.execute_chat(request).await
    }

    pub async fn resume_chat(
        &self,
        message_id: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        self.chat.resume_chat(message_id, request).await
    }

    pub fn get_async_status(&self, message_id: &str) -> Option<ChatResponse> {
        self.chat.get_async_status(message_id)
    }

    pub async fn get_chat_session(&self, chat_id: &str) -> Result<ChatSession, ChatError> {
        self.chat.get_chat_session(chat_id).await
    }

    pub async fn create_chat_session(
        &self,
        session: ChatSession,
    ) -> Result<ChatSession, ChatError> {
        self.chat.create_chat_session(session).await
    }

    pub async fn archive_chat_session(&self, chat_id: &str) -> Result<ChatSession, ChatError> {
        self.chat.archive_chat_session(chat_id).await
    }

    pub async fn list_chats_for_user(
        &self,
        user_id: &str,
        page: &PageRequest,
        include_archived: bool,
    ) -> Result<Page<ChatSession>, ChatError> {
        self.chat
            .list_chats_for_user(user_id, page, include_archived)
            .await
    }

    pub async fn get_chat_history(
        &self,
        chat_id: &str,
        page: &PageRequest,
        include_context: bool,
    ) -> Result<Page<ChatMessage>, ChatError> {
        self.chat
            .get_chat_history(chat_id, page, include_context)
            .await
    }

    pub fn convert_message_to_tasks(&self, message: &ChatMessage) -> Vec<ChatMessageTask> {
        self.chat.convert_message_to_tasks(message)
    }

    pub fn list_workflows(&self) -> Vec<String> {
        self.engine.workflow_ids()
    }

    pub fn get_workflow_details(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowDetails, WorkflowError> {
        let definition = self.engine.workflow(workflow_id).ok_or_else(|| {
            WorkflowError::new(
                crate::error::ErrorKind::UnknownWorkflow,
                format!("workflow `{workflow_id}` is not registered"),
            )
        })?;
        Ok(WorkflowDetails {
            workflow_id: definition.workflow_id().to_string(),
            description: definition.description().map(str::to_string),
            step_ids: definition
                .steps()
                .iter()
                .map(|s| s.step_id.clone())
                .collect(),
            initial_step_id: definition.initial_step().step_id.clone(),
        })
    }

    pub fn get_initial_schema(
        &self,
        workflow_id: &str,
    ) -> Result<Option<Arc<Schema>>, WorkflowError> {
        self.engine.initial_schema(workflow_id)
    }

    pub fn get_workflow_schemas(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<Arc<Schema>>, WorkflowError> {
        self.engine.workflow_schemas(workflow_id)
    }

    pub async fn run_snapshot(&self, run_id: &str) -> Result<Option<WorkflowRun>, WorkflowError> {
        self.engine.run_snapshot(run_id).await
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<(), WorkflowError> {
        self.engine.cancel(run_id).await
    }

    /// Whether the run has reached a terminal status.
    pub async fn run_finished(&self, run_id: &str) -> Result<bool, WorkflowError> {
        Ok(self
            .engine
            .run_snapshot(run_id)
            .await?
            .map(|r| r.status.is_terminal())
            .unwrap_or(false))
    }

    /// Winds down the worker pools; in-flight work completes, new work runs
    /// on callers. Dropping the value afterwards releases everything else.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        tracing::info!("driftkit runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MessageProperty;
    use crate::workflow::{FnStep, StepDefinition, StepResult, WorkflowBuilder};

    fn echo_runtime() -> DriftKit {
        let kit = DriftKit::builder().build();
        kit.register_workflow(
            WorkflowBuilder::new("echo")
                .description("echoes its trigger")
                .step(
                    StepDefinition::new(
                        "echo",
                        FnStep::new(|input, _ctx| async move { Ok(StepResult::Complete(input)) }),
                    )
                    .initial(),
                )
                .build()
                .unwrap(),
        );
        kit
    }

    /// **Scenario**: The runtime exposes the full inbound surface: chat
    /// execution, workflow metadata, and session queries.
    #[tokio::test]
    async fn runtime_wires_chat_and_metadata() {
        let kit = echo_runtime();

        assert_eq!(kit.list_workflows(), vec!["echo"]);
        let details = kit.get_workflow_details("echo").unwrap();
        assert_eq!(details.initial_step_id, "echo");
        assert_eq!(details.description.as_deref(), Some("echoes its trigger"));
        assert!(kit.get_initial_schema("echo").unwrap().is_none());
        assert!(kit.get_workflow_details("ghost").is_err());

        let response = kit
            .execute_chat(
                ChatRequest::new("c1", "echo").with_property(MessageProperty::new("q", "hi")),
            )
            .await
            .unwrap();
        assert!(response.completed);
        assert_eq!(response.text.as_deref(), Some("hi"));

        let session = kit.get_chat_session("c1").await.unwrap();
        assert!(session.last_message_time.is_some());
    }

    /// **Scenario**: Without a model client there is no agent builder; with
    /// defaults the retriever still constructs (no embedder, no reranker).
    #[tokio::test]
    async fn agent_requires_model_client() {
        let kit = DriftKit::builder().build();
        assert!(kit.agent().is_none());
        let _retriever = kit.retriever();
    }
}

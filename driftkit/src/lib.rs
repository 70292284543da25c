//! # DriftKit
//!
//! A server-side toolkit for building AI-assistant backends around a
//! durable, resumable, multi-step workflow orchestrator. A typed user input
//! flows through a graph of declared steps; the run suspends when human
//! input or background work is needed, persists its state across every
//! transition, retries failed steps under a configurable policy, and
//! composes with an agent subsystem that issues traced model calls.
//!
//! ## Design principles
//!
//! - **Explicit registration**: workflows, steps, schemas, prompts, and
//!   tools are declared through builders — no reflection, no annotation
//!   scanning, no ambient singletons. One [`DriftKit`] value owns the lot.
//! - **Variants, not exceptions**: a step returns a tagged [`StepResult`]
//!   (`Continue`, `Branch`, `Suspend`, `Async`, `Complete`, `Fail`); the
//!   engine classifies failures by [`ErrorKind`], never by message text.
//! - **Persist before observe**: a run's snapshot is written to the
//!   [`workflow::WorkflowContextRepository`] after every step transition,
//!   before the caller sees the response.
//! - **Bounded concurrency**: explicit worker pools with caller-runs
//!   saturation; per-run and per-chat serialization; cooperative
//!   cancellation everywhere.
//!
//! ## Main modules
//!
//! - [`schema`]: [`Schema`], [`SchemaRegistry`], property-bag binding.
//! - [`prompts`]: versioned [`PromptRegistry`], `{{var}}` rendering,
//!   dictionary expansion, YAML fallback source.
//! - [`llm`]: [`ModelClient`] capability trait, [`MockModelClient`],
//!   channel-backed cold streaming.
//! - [`agent`]: [`Agent`] execution modes (text / structured / prompted /
//!   tools), [`ToolRegistry`], composition ([`SequentialAgent`],
//!   [`LoopAgent`], [`AgentTool`]).
//! - [`rag`]: ingestion pipeline (loaders, splitters, [`Embedder`],
//!   [`VectorStore`]) and the [`Retriever`] with model-based reranking.
//! - [`workflow`]: [`WorkflowBuilder`], [`WorkflowEngine`], retry, circuit
//!   breaker, repositories, worker pool, async tasks.
//! - [`chat`]: [`ChatService`], sessions, message history, task projection.
//! - [`trace`]: [`TraceSink`] with the async bounded-queue sink.
//! - [`config`]: the recognized option tree ([`DriftConfig`]).
//! - [`runtime`]: the [`DriftKit`] lifecycle object and public API surface.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use driftkit::workflow::{FnStep, StepDefinition, StepResult, WorkflowBuilder};
//! use driftkit::chat::{ChatRequest, MessageProperty};
//! use driftkit::DriftKit;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let kit = DriftKit::builder().build();
//! kit.register_workflow(
//!     WorkflowBuilder::new("echo")
//!         .step(
//!             StepDefinition::new(
//!                 "echo",
//!                 FnStep::new(|input, _ctx| async move { Ok(StepResult::Complete(input)) }),
//!             )
//!             .initial(),
//!         )
//!         .build()?,
//! );
//!
//! let response = kit
//!     .execute_chat(
//!         ChatRequest::new("chat-1", "echo").with_property(MessageProperty::new("q", "hi")),
//!     )
//!     .await?;
//! assert_eq!(response.text.as_deref(), Some("hi"));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod rag;
pub mod runtime;
pub mod schema;
pub mod trace;
pub mod workflow;

pub use agent::{
    Agent, AgentInvokeError, AgentResponse, AgentTool, FnTool, LoopAgent, SequentialAgent, Tool,
    ToolRegistry, ToolSpec,
};
pub use chat::{
    ChatError, ChatMessage, ChatMessageTask, ChatRequest, ChatResponse, ChatService, ChatSession,
    MessageProperty, Page, PageRequest,
};
pub use config::DriftConfig;
pub use error::{ErrorKind, WorkflowError};
pub use llm::{
    MockModelClient, ModelClient, ModelError, ModelMessage, ModelRequest, ModelResponse,
    ResponseFormat,
};
pub use prompts::{InMemoryPromptRegistry, Prompt, PromptRegistry, PromptRenderer, PromptState};
pub use rag::{
    Document, Embedder, IngestionPipeline, InMemoryVectorStore, MockEmbedder, Retriever,
    VectorStore,
};
pub use runtime::{DriftKit, DriftKitBuilder, WorkflowDetails};
pub use schema::{Property, PropertyType, Schema, SchemaRegistry, SchemaType};
pub use trace::{NullTraceSink, RequestContext, TraceRecord, TraceSink};
pub use workflow::{
    FnStep, ResumeInput, RunBoundary, RunOptions, RunStatus, StepContext, StepDefinition,
    StepExecutor, StepResult, StepRetryPolicy, WorkflowBuilder, WorkflowDefinition,
    WorkflowEngine, WorkflowRun,
};

/// When running `cargo test -p driftkit`, initializes tracing from `RUST_LOG`
/// so unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}

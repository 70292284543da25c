//! Model-call tracing: one durable record per model round-trip.
//!
//! Agents submit a [`TraceRecord`] after every model call through a
//! [`TraceSink`]. The async sink persists on a dedicated worker fed by a
//! bounded queue, so callers only ever pay the enqueue cost; when the queue
//! is saturated the record is dropped with a log line (traces are
//! diagnostic). Tracing failures never propagate to the traced call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of component issued the traced call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Agent,
    AgentTool,
    WorkflowStep,
    Chat,
    Reranker,
    Other(String),
}

/// Modality of the traced round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    TextToText,
    TextToImage,
    ImageToText,
}

/// Caller identity attached to a traced call: which agent / step / chat it
/// originated from, plus the prompt lineage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub context_id: String,
    pub context_type: Option<ContextType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(context_id: impl Into<String>, context_type: ContextType) -> Self {
        Self {
            context_id: context_id.into(),
            context_type: Some(context_type),
            ..Self::default()
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }
}

/// Durable record of one model round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: String,
    pub context_id: String,
    pub context_type: Option<ContextType>,
    pub request_type: RequestType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
}

impl TraceRecord {
    /// Fresh record for a call issued under `context`.
    pub fn for_context(context: &RequestContext, request_type: RequestType) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            context_id: context.context_id.clone(),
            context_type: context.context_type.clone(),
            request_type,
            timestamp: Utc::now(),
            chat_id: context.chat_id.clone(),
            prompt_template: None,
            prompt_id: context.prompt_id.clone(),
            variables: context.variables.clone(),
            model_id: None,
            response: None,
            execution_time_ms: 0,
            prompt_tokens: None,
            completion_tokens: None,
            error_message: None,
            application_name: None,
        }
    }
}

/// Receives trace records. `submit` must not block the caller beyond the
/// enqueue cost and must never fail the traced call.
pub trait TraceSink: Send + Sync {
    fn submit(&self, record: TraceRecord);
}

/// Discards every record. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn submit(&self, _record: TraceRecord) {}
}

/// Error persisting a trace record. Only the sink ever sees it; callers do not.
#[derive(Debug, thiserror::Error)]
#[error("trace store: {0}")]
pub struct TraceStoreError(pub String);

/// Persistence backend behind the async sink. Implementations block their
/// own (worker) thread, never the traced call.
pub trait TraceStore: Send + Sync {
    fn save(&self, record: TraceRecord) -> Result<(), TraceStoreError>;
}

/// In-memory trace store for tests and single-process inspection.
#[derive(Default)]
pub struct InMemoryTraceStore {
    records: Mutex<Vec<TraceRecord>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored records, in arrival order.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceStore for InMemoryTraceStore {
    fn save(&self, record: TraceRecord) -> Result<(), TraceStoreError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Asynchronous sink: a bounded crossbeam queue feeding one dedicated worker
/// thread that persists records through a [`TraceStore`].
///
/// On queue saturation the record is dropped with a warning. Dropping the
/// sink closes the queue and joins the worker, so records already enqueued
/// are flushed on shutdown.
pub struct AsyncTraceSink {
    tx: Option<crossbeam_channel::Sender<TraceRecord>>,
    worker: Option<std::thread::JoinHandle<()>>,
    application_name: Option<String>,
}

impl AsyncTraceSink {
    /// Default queue capacity; ample for diagnostic volume.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    pub fn new(store: Arc<dyn TraceStore>, queue_capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<TraceRecord>(queue_capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("driftkit-trace".to_string())
            .spawn(move || {
                for record in rx {
                    if let Err(e) = store.save(record) {
                        tracing::warn!(error = %e, "trace save failed, record dropped");
                    }
                }
            })
            .expect("spawn trace worker");
        Self {
            tx: Some(tx),
            worker: Some(worker),
            application_name: None,
        }
    }

    /// Stamps every record with the configured application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

impl TraceSink for AsyncTraceSink {
    fn submit(&self, mut record: TraceRecord) {
        if record.application_name.is_none() {
            record.application_name = self.application_name.clone();
        }
        let Some(tx) = &self.tx else { return };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(crossbeam_channel::TrySendError::Full(dropped)) => {
                tracing::warn!(trace_id = %dropped.trace_id, "trace queue full, record dropped");
            }
            Err(crossbeam_channel::TrySendError::Disconnected(dropped)) => {
                tracing::warn!(trace_id = %dropped.trace_id, "trace sink closed, record dropped");
            }
        }
    }
}

impl Drop for AsyncTraceSink {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

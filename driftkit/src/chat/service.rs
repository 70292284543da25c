//! Chat service: maps chat turns onto workflow runs.
//!
//! `execute_chat` starts a run for a new conversation or feeds the pending
//! user-input suspension of the bound run; `resume_chat` targets a specific
//! message id. Engine boundaries project into [`ChatResponse`]s, history is
//! append-only per chat, and every session-level operation serializes per
//! `chat_id` while distinct chats proceed in parallel. Async-task
//! completions arrive on the engine's completion channel and are appended to
//! history by a forwarder task owned by this service.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use super::message::{
    convert_message_to_tasks, ChatMessage, ChatMessageTask, ChatRequest, ChatResponse,
    MessageProperty,
};
use super::session::{ChatSession, Page, PageRequest};
use super::store::{ChatStore, ChatStoreError};
use crate::error::{ErrorKind, WorkflowError};
use crate::workflow::{AsyncCompletion, ResumeInput, RunBoundary, RunOptions, WorkflowEngine};

/// Chat-layer failure.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("chat `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] ChatStoreError),
}

/// The chat session layer over one workflow engine.
///
/// Construct with [`ChatService::new`] inside a tokio runtime: the service
/// owns a forwarder task draining the engine's async-completion channel.
pub struct ChatService {
    engine: WorkflowEngine,
    store: Arc<dyn ChatStore>,
    chat_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// message_id → latest projected response for async tracking.
    async_tracker: DashMap<String, ChatResponse>,
    /// chat_id → outstanding user-input message id of the bound run.
    pending_input: DashMap<String, String>,
}

impl ChatService {
    pub fn new(engine: WorkflowEngine, store: Arc<dyn ChatStore>) -> Arc<Self> {
        let service = Arc::new(Self {
            engine,
            store,
            chat_locks: DashMap::new(),
            async_tracker: DashMap::new(),
            pending_input: DashMap::new(),
        });
        if let Some(mut completions) = service.engine.take_completions() {
            let forwarder = Arc::downgrade(&service);
            tokio::spawn(async move {
                while let Some(completion) = completions.recv().await {
                    let Some(service) = forwarder.upgrade() else { return };
                    service.handle_async_completion(completion).await;
                }
            });
        }
        service
    }

    fn chat_lock(&self, chat_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.chat_locks
            .entry(chat_id.to_string())
            .or_default()
            .clone()
    }

    /// Runs a user turn: starts a fresh run for a new chat, or feeds the
    /// chat's pending user-input suspension.
    pub async fn execute_chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        if self.engine.workflow(&request.workflow_id).is_none() {
            return Err(WorkflowError::new(
                ErrorKind::UnknownWorkflow,
                format!("workflow `{}` is not registered", request.workflow_id),
            )
            .into());
        }
        let chat_id = request.chat_id.clone();
        let lock = self.chat_lock(&chat_id);
        let _guard = lock.lock().await;

        let mut session = self.load_or_create_session(&chat_id).await?;
        if let Some(language) = &request.language {
            session.language = language.clone();
        }

        let mut request = request;
        self.resolve_inherited(&mut request).await?;
        self.store.append_message(&ChatMessage::request(request.clone())).await?;
        let bag = request.property_bag();

        let pending = self.pending_input.get(&chat_id).map(|m| m.clone());
        let boundary = match pending {
            Some(message_id) => {
                self.pending_input.remove(&chat_id);
                match self
                    .engine
                    .resume(&message_id, ResumeInput::Properties(bag))
                    .await
                {
                    Ok(boundary) => boundary,
                    Err(error) => {
                        // A binding failure leaves the suspension intact, so
                        // the chat can retry with corrected input.
                        if error.kind == ErrorKind::Validation {
                            self.pending_input.insert(chat_id.clone(), message_id);
                        }
                        return Err(error.into());
                    }
                }
            }
            None => {
                let trigger = self.bind_trigger(&request.workflow_id, &bag)?;
                self.engine
                    .start_run(
                        &request.workflow_id,
                        trigger,
                        RunOptions {
                            chat_id: Some(chat_id.clone()),
                            language: Some(session.language.clone()),
                        },
                    )
                    .await?
            }
        };

        let response = project_boundary(&boundary);
        self.record_boundary(&chat_id, &mut session, &boundary, &response)
            .await?;
        Ok(response)
    }

    /// Resumes a suspended run by its message id with the request's
    /// properties.
    pub async fn resume_chat(
        &self,
        message_id: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        let chat_id = request.chat_id.clone();
        let lock = self.chat_lock(&chat_id);
        let _guard = lock.lock().await;

        let mut session = self.load_or_create_session(&chat_id).await?;
        let mut request = request;
        self.resolve_inherited(&mut request).await?;
        self.store.append_message(&ChatMessage::request(request.clone())).await?;

        let boundary = self
            .engine
            .resume(message_id, ResumeInput::Properties(request.property_bag()))
            .await?;
        if self
            .pending_input
            .get(&chat_id)
            .is_some_and(|m| *m == message_id)
        {
            self.pending_input.remove(&chat_id);
        }

        let response = project_boundary(&boundary);
        self.record_boundary(&chat_id, &mut session, &boundary, &response)
            .await?;
        Ok(response)
    }

    /// Current tracked status of an async message, if known.
    pub fn get_async_status(&self, message_id: &str) -> Option<ChatResponse> {
        if let Some(boundary) = self.engine.async_status(message_id) {
            let response = project_boundary(&boundary);
            self.async_tracker
                .insert(message_id.to_string(), response.clone());
            return Some(response);
        }
        self.async_tracker.get(message_id).map(|r| r.clone())
    }

    /// Session by id; `NotFound` when it does not exist.
    pub async fn get_chat_session(&self, chat_id: &str) -> Result<ChatSession, ChatError> {
        self.store
            .session(chat_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(chat_id.to_string()))
    }

    /// Existing session or a freshly persisted one for the user.
    pub async fn get_or_create_session(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<ChatSession, ChatError> {
        if let Some(session) = self.store.session(chat_id).await? {
            return Ok(session);
        }
        let session = ChatSession::new(chat_id, user_id);
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Persists a new session entity.
    pub async fn create_chat_session(&self, session: ChatSession) -> Result<ChatSession, ChatError> {
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Marks a session archived; it disappears from default listings.
    pub async fn archive_chat_session(&self, chat_id: &str) -> Result<ChatSession, ChatError> {
        let mut session = self.get_chat_session(chat_id).await?;
        session.archived = true;
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Sessions of one user, newest activity first.
    pub async fn list_chats_for_user(
        &self,
        user_id: &str,
        page: &PageRequest,
        include_archived: bool,
    ) -> Result<Page<ChatSession>, ChatError> {
        Ok(self
            .store
            .sessions_for_user(user_id, page, include_archived)
            .await?)
    }

    /// Paginated history, newest first; context messages opt-in.
    pub async fn get_chat_history(
        &self,
        chat_id: &str,
        page: &PageRequest,
        include_context: bool,
    ) -> Result<Page<ChatMessage>, ChatError> {
        if self.store.session(chat_id).await?.is_none() {
            return Err(ChatError::NotFound(chat_id.to_string()));
        }
        Ok(self.store.messages(chat_id, page, include_context).await?)
    }

    /// UI task projection of one message.
    pub fn convert_message_to_tasks(&self, message: &ChatMessage) -> Vec<ChatMessageTask> {
        convert_message_to_tasks(message)
    }

    async fn load_or_create_session(&self, chat_id: &str) -> Result<ChatSession, ChatError> {
        if let Some(session) = self.store.session(chat_id).await? {
            return Ok(session);
        }
        let session = ChatSession::new(chat_id, "");
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Builds the trigger record for a fresh run from the request bag,
    /// binding against the initial step's schema when it declares one. An
    /// empty bag on a schema-less initial step runs with a default empty
    /// record.
    fn bind_trigger(
        &self,
        workflow_id: &str,
        bag: &crate::schema::PropertyBag,
    ) -> Result<Value, WorkflowError> {
        match self.engine.initial_schema(workflow_id)? {
            Some(schema) => Ok(self.engine.schemas().bind(&schema.schema_id, bag)?),
            None => {
                if bag.is_empty() {
                    Ok(Value::Object(serde_json::Map::new()))
                } else {
                    Ok(Value::Object(
                        bag.iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect(),
                    ))
                }
            }
        }
    }

    /// Resolves `data_name_id` references by scanning the chat's history,
    /// most recent first, for a property with a matching `name_id`.
    async fn resolve_inherited(&self, request: &mut ChatRequest) -> Result<(), ChatError> {
        let needs_resolution = request
            .properties
            .iter()
            .any(|p| p.data_name_id.is_some() && p.data.is_none());
        if !needs_resolution {
            return Ok(());
        }
        let history = self.store.history_desc(&request.chat_id).await?;
        for property in &mut request.properties {
            let Some(data_name_id) = property.data_name_id.clone() else {
                continue;
            };
            if property.data.is_some() {
                continue;
            }
            'scan: for message in &history {
                for earlier in message.properties() {
                    if earlier.name_id == data_name_id {
                        if let Some(value) = earlier.effective_value() {
                            property.data = Some(value.to_string());
                            break 'scan;
                        }
                    }
                }
            }
            if property.data.is_none() {
                tracing::debug!(
                    chat_id = %request.chat_id,
                    name_id = %data_name_id,
                    "no historical value for inherited property"
                );
            }
        }
        Ok(())
    }

    /// Session and tracking bookkeeping after an engine boundary, then the
    /// AI message append. Persisted before the response reaches the caller.
    async fn record_boundary(
        &self,
        chat_id: &str,
        session: &mut ChatSession,
        boundary: &RunBoundary,
        response: &ChatResponse,
    ) -> Result<(), ChatError> {
        session.last_message_time = Some(Utc::now());
        match boundary {
            RunBoundary::Suspended {
                run_id,
                message_id,
                is_async,
                ..
            } => {
                session.active_run_id = Some(run_id.clone());
                if *is_async {
                    self.async_tracker
                        .insert(message_id.clone(), response.clone());
                } else {
                    self.pending_input
                        .insert(chat_id.to_string(), message_id.clone());
                }
            }
            RunBoundary::Completed { .. }
            | RunBoundary::Failed { .. }
            | RunBoundary::Cancelled { .. } => {
                session.active_run_id = None;
                self.pending_input.remove(chat_id);
            }
        }
        self.store.save_session(session).await?;
        self.store
            .append_message(&ChatMessage::response(chat_id, response.clone()))
            .await?;
        Ok(())
    }

    /// Applies one async-task completion: tracker update, history append,
    /// session bookkeeping. Serialized per chat like every other operation.
    async fn handle_async_completion(&self, completion: AsyncCompletion) {
        let response = project_boundary(&completion.boundary);
        self.async_tracker
            .insert(completion.message_id.clone(), response.clone());

        let chat_id = match self.engine.run_snapshot(completion.boundary.run_id()).await {
            Ok(Some(run)) => run.chat_id,
            _ => None,
        };
        let Some(chat_id) = chat_id else { return };

        let lock = self.chat_lock(&chat_id);
        let _guard = lock.lock().await;
        match self.store.session(&chat_id).await {
            Ok(Some(mut session)) => {
                if let Err(e) = self
                    .record_boundary(&chat_id, &mut session, &completion.boundary, &response)
                    .await
                {
                    tracing::warn!(chat_id = %chat_id, error = %e, "async completion bookkeeping failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "async completion session load failed")
            }
        }
    }
}

/// Projects an engine boundary into the user-visible response shape.
///
/// Completed object outputs become properties; when the object has exactly
/// one string field, that value doubles as the response text (single-answer
/// workflows read naturally). Failures carry the error kind with the message
/// as text.
pub fn project_boundary(boundary: &RunBoundary) -> ChatResponse {
    match boundary {
        RunBoundary::Completed { output, .. } => match output {
            Value::String(text) => ChatResponse::completed_text(text.clone()),
            Value::Null => ChatResponse::completed_text(""),
            Value::Object(map) => {
                let properties: Vec<MessageProperty> = map
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        MessageProperty::new(k.clone(), text)
                    })
                    .collect();
                let single_string = (properties.len() == 1
                    && map.values().next().is_some_and(Value::is_string))
                .then(|| properties[0].value.clone().unwrap_or_default());
                let mut response = ChatResponse::completed_text(
                    single_string.unwrap_or_else(|| output.to_string()),
                );
                response.properties = properties;
                response
            }
            other => ChatResponse::completed_text(other.to_string()),
        },
        RunBoundary::Suspended {
            message_id,
            next_schema,
            percent_complete,
            ..
        } => ChatResponse::suspended(
            message_id.clone(),
            next_schema.as_ref().map(|s| s.as_ref().clone()),
            *percent_complete,
        ),
        RunBoundary::Failed { error, .. } => {
            ChatResponse::failed(error.kind, error.message.clone())
        }
        RunBoundary::Cancelled { .. } => {
            ChatResponse::failed(ErrorKind::Cancelled, "run cancelled")
        }
    }
}

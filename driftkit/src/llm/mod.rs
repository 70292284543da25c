//! Model client abstraction.
//!
//! One capability set over heterogeneous providers: text-to-text (plus a
//! streaming variant returning a cold [`stream_event::StreamSource`]),
//! text-to-image, image-to-text, and transcription. Requests carry messages
//! with role + content parts, sampling options, a response format (plain /
//! JSON-mode / JSON-schema), and tool definitions. Concrete provider HTTP
//! clients live outside this crate; [`MockModelClient`] covers tests.

mod mock;
pub mod stream;

pub use mock::MockModelClient;
pub use stream::ChannelStreamSource;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stream_event::{StreamError, StreamSource, VecSource};
use thiserror::Error;

use crate::error::{ErrorKind, WorkflowError};
use crate::schema::Schema;

/// Role of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One content element of a message: text, inline image bytes, or an image URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageBytes { data: Vec<u8>, media_type: String },
    ImageUrl { url: String },
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One message in a model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// For `Tool` role messages: the call id this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ModelMessage {
    fn text_message(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(MessageRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(MessageRole::Assistant, text)
    }

    /// Tool-result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: vec![ContentPart::Text { text: text.into() }],
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Concatenated text parts of this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Default)]
pub enum ResponseFormat {
    /// Plain text.
    #[default]
    Text,
    /// Provider JSON mode (any valid JSON object).
    JsonMode,
    /// Strict JSON conforming to the given schema.
    JsonSchema(Schema),
}

/// A tool exposed to the model: name, description, JSON-schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// One model call: messages plus sampling and format options.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<ModelMessage>,
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: ResponseFormat,
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    /// Request with a single user message.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ModelMessage::user(text)],
            ..Self::default()
        }
    }

    pub fn with_messages(mut self, messages: Vec<ModelMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// One completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelChoice {
    pub message: ModelMessage,
    pub finish_reason: FinishReason,
}

/// Token usage for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Per-call measurement attached to every response; feeds trace records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallStats {
    pub model_id: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
}

/// Model reply: choices plus usage and call stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub choices: Vec<ModelChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
    #[serde(default)]
    pub stats: CallStats,
}

impl ModelResponse {
    /// Response with a single plain-text assistant choice.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ModelChoice {
                message: ModelMessage::assistant(text),
                finish_reason: FinishReason::Stop,
            }],
            usage: None,
            stats: CallStats::default(),
        }
    }

    /// Text of the first choice, if any.
    pub fn first_text(&self) -> Option<String> {
        self.choices.first().map(|c| c.message.text())
    }

    /// Tool calls of the first choice.
    pub fn tool_calls(&self) -> &[ToolInvocation] {
        self.choices
            .first()
            .map(|c| c.message.tool_calls.as_slice())
            .unwrap_or(&[])
    }
}

/// Provider failure, distinguishable by kind; the raw provider message is
/// always preserved.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Transient provider outage or connectivity failure.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Authentication / authorization rejected.
    #[error("provider auth: {0}")]
    ProviderAuth(String),
    /// The request itself is invalid (schema / parameters).
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Rate limited; `retry_after` when the provider supplied one.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    /// The call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),
}

impl ModelError {
    /// Whether the failure is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::ProviderUnavailable(_)
                | ModelError::RateLimited { .. }
                | ModelError::Timeout(_)
        )
    }
}

impl From<ModelError> for WorkflowError {
    fn from(err: ModelError) -> Self {
        let kind = match &err {
            ModelError::ProviderUnavailable(_) | ModelError::RateLimited { .. } => {
                ErrorKind::RetryableFailure
            }
            ModelError::Timeout(_) => ErrorKind::Timeout,
            ModelError::ProviderAuth(_) | ModelError::BadRequest(_) => ErrorKind::PermanentFailure,
        };
        WorkflowError::new(kind, err.to_string())
    }
}

/// Image generation request.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub model_id: Option<String>,
    pub size: Option<String>,
}

/// One generated image: inline bytes or a provider-hosted URL.
#[derive(Debug, Clone)]
pub enum GeneratedImage {
    Bytes { data: Vec<u8>, media_type: String },
    Url(String),
}

/// Image generation reply.
#[derive(Debug, Clone, Default)]
pub struct ImageResponse {
    pub images: Vec<GeneratedImage>,
    pub stats: CallStats,
}

/// Audio transcription request.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    pub media_type: String,
    pub language: Option<String>,
}

fn unsupported(operation: &str) -> ModelError {
    ModelError::BadRequest(format!("{operation} is not supported by this model client"))
}

/// Uniform capability set over a model provider.
///
/// Implementations honor the request's model id, sampling options, and
/// response format. The streaming variant is cold: nothing is sent until the
/// returned source is subscribed, and cancelling the subscription stops the
/// underlying request. Capabilities a provider lacks keep the default
/// implementations, which fail with `BadRequest`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One text completion round-trip.
    async fn text_to_text(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Streaming completion as a cold chunk source.
    ///
    /// The default implementation performs one plain `text_to_text` round-trip
    /// up front and returns a source that delivers the full text as a single
    /// chunk on subscribe — providers with native streaming override this with
    /// a genuinely incremental source (see [`ChannelStreamSource`]).
    async fn text_to_text_stream(&self, request: ModelRequest) -> Box<dyn StreamSource> {
        match self.text_to_text(request).await {
            Ok(response) => {
                let text = response.first_text().unwrap_or_default();
                let chunks = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![stream_event::StreamChunk::new(text, 0)]
                };
                Box::new(VecSource::new(chunks))
            }
            Err(e) => Box::new(VecSource::failing(Vec::new(), StreamError::new(e.to_string()))),
        }
    }

    /// Image generation.
    async fn text_to_image(&self, _request: ImageRequest) -> Result<ImageResponse, ModelError> {
        Err(unsupported("text_to_image"))
    }

    /// Vision: messages with image parts in, text out.
    async fn image_to_text(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
        Err(unsupported("image_to_text"))
    }

    /// Audio transcription.
    async fn transcribe(&self, _request: TranscriptionRequest) -> Result<String, ModelError> {
        Err(unsupported("transcribe"))
    }
}

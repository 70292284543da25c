//! Chat message model: tagged request/response/context variants.
//!
//! Every message carries id, chat id, timestamp, and kind; the payload is a
//! [`ChatMessageBody`] variant rather than a class hierarchy. Properties are
//! key/value pairs with stable `name_id`s; a property may inherit its value
//! from an earlier message in the chat via `data_name_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::schema::{PropertyBag, PropertyType, Schema};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    User,
    Ai,
    Context,
    System,
}

/// Key/value pair attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProperty {
    pub name: String,
    pub name_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PropertyType>,
    #[serde(default)]
    pub multi_select: bool,
    /// Stable id of a historical property to inherit the value from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_name_id: Option<String>,
    /// Value resolved from history when `data_name_id` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl MessageProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name_id: name.clone(),
            name,
            value: Some(value.into()),
            kind: None,
            multi_select: false,
            data_name_id: None,
            data: None,
        }
    }

    /// Property that inherits its value from history by `data_name_id`.
    pub fn inherited(name: impl Into<String>, data_name_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name_id: name.clone(),
            name,
            value: None,
            kind: None,
            multi_select: false,
            data_name_id: Some(data_name_id.into()),
            data: None,
        }
    }

    pub fn with_name_id(mut self, name_id: impl Into<String>) -> Self {
        self.name_id = name_id.into();
        self
    }

    /// The value this property contributes: resolved `data` wins over the
    /// literal `value`.
    pub fn effective_value(&self) -> Option<&str> {
        self.data.as_deref().or(self.value.as_deref())
    }
}

/// Converts message properties into a schema-bindable bag, dropping
/// valueless entries.
pub fn properties_to_bag(properties: &[MessageProperty]) -> PropertyBag {
    properties
        .iter()
        .filter_map(|p| {
            p.effective_value()
                .map(|v| (p.name.clone(), v.to_string()))
        })
        .collect()
}

/// A user turn: the workflow to run (or resume) plus input properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub chat_id: String,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Name of the schema the properties claim to follow, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema_name: Option<String>,
    #[serde(default)]
    pub properties: Vec<MessageProperty>,
}

impl ChatRequest {
    pub fn new(chat_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            workflow_id: workflow_id.into(),
            language: None,
            request_schema_name: None,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: MessageProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Bindable bag of this request's properties.
    pub fn property_bag(&self) -> PropertyBag {
        properties_to_bag(&self.properties)
    }
}

/// A system turn: terminal result, continuation descriptor, or suspension
/// marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub properties: Vec<MessageProperty>,
    /// The next expected input schema when the conversation continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_schema: Option<Schema>,
    pub completed: bool,
    pub percent_complete: u8,
    /// Present on suspensions (user input or async tracking).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Error kind of a failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ChatResponse {
    /// Terminal success with plain text.
    pub fn completed_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            properties: Vec::new(),
            next_schema: None,
            completed: true,
            percent_complete: 100,
            message_id: None,
            error: None,
        }
    }

    /// Terminal failure carrying the error kind and message.
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            text: Some(message.into()),
            properties: Vec::new(),
            next_schema: None,
            completed: true,
            percent_complete: 100,
            message_id: None,
            error: Some(kind),
        }
    }

    /// Suspension awaiting input or async completion.
    pub fn suspended(
        message_id: impl Into<String>,
        next_schema: Option<Schema>,
        percent_complete: u8,
    ) -> Self {
        Self {
            text: None,
            properties: Vec::new(),
            next_schema,
            completed: false,
            percent_complete,
            message_id: Some(message_id.into()),
            error: None,
        }
    }
}

/// Message payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessageBody {
    Request(ChatRequest),
    Response(ChatResponse),
    Context { text: String },
}

/// One message in a chat's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub body: ChatMessageBody,
}

impl ChatMessage {
    pub fn request(request: ChatRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: request.chat_id.clone(),
            timestamp: Utc::now(),
            kind: MessageKind::User,
            body: ChatMessageBody::Request(request),
        }
    }

    pub fn response(chat_id: impl Into<String>, response: ChatResponse) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Ai,
            body: ChatMessageBody::Response(response),
        }
    }

    pub fn context(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Context,
            body: ChatMessageBody::Context { text: text.into() },
        }
    }

    /// Properties carried by this message, regardless of variant.
    pub fn properties(&self) -> &[MessageProperty] {
        match &self.body {
            ChatMessageBody::Request(r) => &r.properties,
            ChatMessageBody::Response(r) => &r.properties,
            ChatMessageBody::Context { .. } => &[],
        }
    }
}

/// UI projection of one message property: one task per `name_id`-bearing
/// property, ordering retained, carrying the source response's next schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageTask {
    /// Id of the source message.
    pub message_id: String,
    pub name: String,
    pub name_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_schema: Option<Schema>,
}

/// Converts one message into its task list.
pub fn convert_message_to_tasks(message: &ChatMessage) -> Vec<ChatMessageTask> {
    let next_schema = match &message.body {
        ChatMessageBody::Response(r) => r.next_schema.clone(),
        _ => None,
    };
    message
        .properties()
        .iter()
        .filter(|p| !p.name_id.is_empty())
        .map(|p| ChatMessageTask {
            message_id: message.id.clone(),
            name: p.name.clone(),
            name_id: p.name_id.clone(),
            value: p.effective_value().map(str::to_string),
            next_schema: next_schema.clone(),
        })
        .collect()
}

//! Chat session layer: sessions, messages, history, and the service that
//! maps chat turns onto workflow runs.

pub mod message;
pub mod service;
pub mod session;
pub mod store;

pub use message::{
    convert_message_to_tasks, properties_to_bag, ChatMessage, ChatMessageBody, ChatMessageTask,
    ChatRequest, ChatResponse, MessageKind, MessageProperty,
};
pub use service::{project_boundary, ChatError, ChatService};
pub use session::{ChatSession, Page, PageRequest};
pub use store::{ChatStore, ChatStoreError, InMemoryChatStore};

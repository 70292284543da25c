//! Chat persistence contract plus the in-memory implementation.
//!
//! Message history is append-only per chat with monotonically increasing
//! timestamps; session listings order by `last_message_time` descending.

use async_trait::async_trait;
use dashmap::DashMap;

use super::message::{ChatMessage, MessageKind};
use super::session::{ChatSession, Page, PageRequest};

/// Store failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("chat store: {0}")]
pub struct ChatStoreError(pub String);

/// Persistence for sessions and message history.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn save_session(&self, session: &ChatSession) -> Result<(), ChatStoreError>;
    async fn session(&self, chat_id: &str) -> Result<Option<ChatSession>, ChatStoreError>;

    /// Sessions of one user, `last_message_time` descending; archived
    /// sessions excluded unless requested.
    async fn sessions_for_user(
        &self,
        user_id: &str,
        page: &PageRequest,
        include_archived: bool,
    ) -> Result<Page<ChatSession>, ChatStoreError>;

    /// Appends one message to the chat's history.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), ChatStoreError>;

    /// One page of messages, newest first; context messages excluded unless
    /// requested.
    async fn messages(
        &self,
        chat_id: &str,
        page: &PageRequest,
        include_context: bool,
    ) -> Result<Page<ChatMessage>, ChatStoreError>;

    /// Full history, newest first (property-inheritance scans).
    async fn history_desc(&self, chat_id: &str) -> Result<Vec<ChatMessage>, ChatStoreError>;

    /// Removes the session and its messages.
    async fn delete_chat(&self, chat_id: &str) -> Result<(), ChatStoreError>;
}

/// In-memory chat store for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryChatStore {
    sessions: DashMap<String, ChatSession>,
    messages: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn save_session(&self, session: &ChatSession) -> Result<(), ChatStoreError> {
        self.sessions
            .insert(session.chat_id.clone(), session.clone());
        Ok(())
    }

    async fn session(&self, chat_id: &str) -> Result<Option<ChatSession>, ChatStoreError> {
        Ok(self.sessions.get(chat_id).map(|s| s.clone()))
    }

    async fn sessions_for_user(
        &self,
        user_id: &str,
        page: &PageRequest,
        include_archived: bool,
    ) -> Result<Page<ChatSession>, ChatStoreError> {
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| include_archived || !s.archived)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(Page::from_vec(sessions, page))
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), ChatStoreError> {
        self.messages
            .entry(message.chat_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages(
        &self,
        chat_id: &str,
        page: &PageRequest,
        include_context: bool,
    ) -> Result<Page<ChatMessage>, ChatStoreError> {
        let mut history = self.history_desc(chat_id).await?;
        if !include_context {
            history.retain(|m| m.kind != MessageKind::Context);
        }
        Ok(Page::from_vec(history, page))
    }

    async fn history_desc(&self, chat_id: &str) -> Result<Vec<ChatMessage>, ChatStoreError> {
        let mut history: Vec<ChatMessage> = self
            .messages
            .get(chat_id)
            .map(|m| m.clone())
            .unwrap_or_default();
        // Append order is authoritative; newest first for readers.
        history.reverse();
        Ok(history)
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), ChatStoreError> {
        self.sessions.remove(chat_id);
        self.messages.remove(chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::{ChatRequest, ChatResponse};

    async fn seed_messages(store: &InMemoryChatStore, chat_id: &str) {
        store
            .append_message(&ChatMessage::request(ChatRequest::new(chat_id, "wf")))
            .await
            .unwrap();
        store
            .append_message(&ChatMessage::context(chat_id, "retrieved context"))
            .await
            .unwrap();
        store
            .append_message(&ChatMessage::response(
                chat_id,
                ChatResponse::completed_text("answer"),
            ))
            .await
            .unwrap();
    }

    /// **Scenario**: History reads newest first; context messages are
    /// excluded unless requested.
    #[tokio::test]
    async fn history_newest_first_context_opt_in() {
        let store = InMemoryChatStore::new();
        seed_messages(&store, "c1").await;

        let without = store
            .messages("c1", &PageRequest::default(), false)
            .await
            .unwrap();
        assert_eq!(without.items.len(), 2);
        assert_eq!(without.items[0].kind, MessageKind::Ai, "newest first");

        let with = store
            .messages("c1", &PageRequest::default(), true)
            .await
            .unwrap();
        assert_eq!(with.items.len(), 3);
        assert_eq!(with.items[1].kind, MessageKind::Context);
    }

    /// **Scenario**: Session listings order by last_message_time descending
    /// and hide archived sessions by default.
    #[tokio::test]
    async fn sessions_order_and_archive_filter() {
        let store = InMemoryChatStore::new();
        let mut old = ChatSession::new("old", "u1");
        old.last_message_time = Some(chrono::Utc::now() - chrono::Duration::hours(2));
        let mut recent = ChatSession::new("recent", "u1");
        recent.last_message_time = Some(chrono::Utc::now());
        let mut archived = ChatSession::new("archived", "u1");
        archived.archived = true;
        archived.last_message_time = Some(chrono::Utc::now());
        let other_user = ChatSession::new("other", "u2");

        for s in [&old, &recent, &archived, &other_user] {
            store.save_session(s).await.unwrap();
        }

        let page = store
            .sessions_for_user("u1", &PageRequest::default(), false)
            .await
            .unwrap();
        let ids: Vec<_> = page.items.iter().map(|s| s.chat_id.clone()).collect();
        assert_eq!(ids, vec!["recent", "old"]);

        let all = store
            .sessions_for_user("u1", &PageRequest::default(), true)
            .await
            .unwrap();
        assert_eq!(all.total, 3);
    }

    /// **Scenario**: delete_chat removes both the session and its history.
    #[tokio::test]
    async fn delete_chat_removes_everything() {
        let store = InMemoryChatStore::new();
        store.save_session(&ChatSession::new("c1", "u1")).await.unwrap();
        seed_messages(&store, "c1").await;

        store.delete_chat("c1").await.unwrap();
        assert!(store.session("c1").await.unwrap().is_none());
        assert!(store.history_desc("c1").await.unwrap().is_empty());
    }
}

//! Scripted model client for tests.
//!
//! Queue responses (or errors) per call; every received request is recorded
//! for assertions. When the script runs out the client repeats the last
//! scripted text, so simple fixtures need only one entry.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    FinishReason, ModelChoice, ModelClient, ModelError, ModelMessage, ModelRequest, ModelResponse,
    ToolInvocation,
};

type ScriptedTurn = Result<ModelResponse, ModelError>;

/// Deterministic [`ModelClient`]: pops one scripted turn per call.
#[derive(Default)]
pub struct MockModelClient {
    script: Mutex<VecDeque<ScriptedTurn>>,
    fallback_text: Mutex<String>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that always answers with `text`.
    pub fn with_fixed_text(text: impl Into<String>) -> Self {
        let client = Self::new();
        *client.fallback_text.lock().unwrap() = text.into();
        client
    }

    /// Queues a plain text reply.
    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        let text = text.into();
        *self.fallback_text.lock().unwrap() = text.clone();
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(ModelResponse::from_text(text)));
        self
    }

    /// Queues a full response.
    pub fn push_response(&self, response: ModelResponse) -> &Self {
        self.script.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Queues an assistant turn that requests the given tool calls.
    pub fn push_tool_calls(&self, calls: Vec<ToolInvocation>) -> &Self {
        let mut message = ModelMessage::assistant("");
        message.tool_calls = calls;
        self.push_response(ModelResponse {
            choices: vec![ModelChoice {
                message,
                finish_reason: FinishReason::ToolCalls,
            }],
            usage: None,
            stats: Default::default(),
        })
    }

    /// Queues a failure.
    pub fn push_error(&self, error: ModelError) -> &Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn text_to_text(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(turn) => turn,
            None => Ok(ModelResponse::from_text(
                self.fallback_text.lock().unwrap().clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Scripted turns pop in order, then the fallback text repeats.
    #[tokio::test]
    async fn scripted_turns_pop_in_order_then_fallback() {
        let client = MockModelClient::new();
        client.push_text("first").push_text("second");

        let a = client
            .text_to_text(ModelRequest::from_text("q1"))
            .await
            .unwrap();
        let b = client
            .text_to_text(ModelRequest::from_text("q2"))
            .await
            .unwrap();
        let c = client
            .text_to_text(ModelRequest::from_text("q3"))
            .await
            .unwrap();

        assert_eq!(a.first_text().as_deref(), Some("first"));
        assert_eq!(b.first_text().as_deref(), Some("second"));
        assert_eq!(c.first_text().as_deref(), Some("second"), "fallback repeats");
        assert_eq!(client.call_count(), 3);
    }

    /// **Scenario**: Scripted errors surface as-is.
    #[tokio::test]
    async fn scripted_error_surfaces() {
        let client = MockModelClient::new();
        client.push_error(ModelError::ProviderUnavailable("down".into()));
        let err = client
            .text_to_text(ModelRequest::from_text("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::ProviderUnavailable(_)));
    }

    /// **Scenario**: Received requests are recorded for assertions.
    #[tokio::test]
    async fn requests_are_recorded() {
        let client = MockModelClient::with_fixed_text("ok");
        client
            .text_to_text(ModelRequest::from_text("inspect me"))
            .await
            .unwrap();
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].text(), "inspect me");
    }
}

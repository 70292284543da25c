//! Model-based reranking of retrieval candidates.
//!
//! The reranker asks a model, under a JSON-schema response format, to score
//! each candidate's relevance to the query, then reorders the list by those
//! scores. Document payloads are preserved; both the store's original score
//! and the model's rerank score stay on every candidate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::retriever::RetrievedDocument;
use crate::llm::{ModelClient, ModelError, ModelMessage, ModelRequest, ResponseFormat};
use crate::schema::{Property, Schema};
use crate::trace::{ContextType, NullTraceSink, RequestContext, RequestType, TraceRecord, TraceSink};

/// Rerank failure.
#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The model's scores did not conform to the requested schema.
    #[error("rerank output parse failed: {0}")]
    Parse(String),
}

/// Reorders retrieval candidates by relevance to the query.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, RerankError>;
}

/// Default instruction when no prompt override is configured.
const DEFAULT_RERANK_PROMPT: &str = "Score each document's relevance to the query \
from 0.0 (irrelevant) to 1.0 (directly answers it). Return a score for every id.";

/// Response schema the model must follow: one `{id, score}` entry per candidate.
fn rerank_schema() -> Schema {
    Schema::new("rerank.scores")
        .system()
        .property(
            Property::array(
                "scores",
                Property::object(
                    "entry",
                    vec![
                        Property::string("id").required(),
                        Property::number("score").required(),
                    ],
                ),
            )
            .required(),
        )
}

/// LLM-backed [`Reranker`].
///
/// Candidates the model omits keep `rerank_score = None` and sort after the
/// scored ones in their original order.
pub struct ModelBasedReranker {
    client: Arc<dyn ModelClient>,
    model_id: Option<String>,
    temperature: Option<f32>,
    instruction: String,
    sink: Arc<dyn TraceSink>,
}

impl ModelBasedReranker {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self {
            client,
            model_id: None,
            temperature: None,
            instruction: DEFAULT_RERANK_PROMPT.to_string(),
            sink: Arc::new(NullTraceSink),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Overrides the scoring instruction (the `rag.reranker.prompt_id`
    /// resolution happens at wiring time; the renderer hands the text here).
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    fn build_prompt(&self, query: &str, candidates: &[RetrievedDocument]) -> String {
        let mut prompt = format!("{}\n\nQuery: {query}\n\nDocuments:\n", self.instruction);
        for candidate in candidates {
            prompt.push_str(&format!(
                "- id: {}\n  content: {}\n",
                candidate.document.id, candidate.document.page_content
            ));
        }
        prompt
    }
}

#[async_trait]
impl Reranker for ModelBasedReranker {
    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, RerankError> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let request = ModelRequest {
            messages: vec![ModelMessage::user(self.build_prompt(query, &candidates))],
            model_id: self.model_id.clone(),
            temperature: self.temperature,
            response_format: ResponseFormat::JsonSchema(rerank_schema()),
            ..ModelRequest::default()
        };

        let context = RequestContext::new("reranker", ContextType::Reranker);
        let mut record = TraceRecord::for_context(&context, RequestType::TextToText);
        record.model_id = self.model_id.clone();

        let started = Instant::now();
        let result = self.client.text_to_text(request).await;
        record.execution_time_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => record.response = response.first_text(),
            Err(e) => record.error_message = Some(e.to_string()),
        }
        self.sink.submit(record);

        let response = result?;
        let text = response.first_text().unwrap_or_default();
        let parsed = crate::agent::parse_structured_value(&text)
            .map_err(|e| RerankError::Parse(e.to_string()))?;

        let mut scores: HashMap<String, f32> = HashMap::new();
        let entries = parsed
            .get("scores")
            .and_then(|v| v.as_array())
            .ok_or_else(|| RerankError::Parse("missing `scores` array".into()))?;
        for entry in entries {
            let id = entry.get("id").and_then(|v| v.as_str());
            let score = entry.get("score").and_then(|v| v.as_f64());
            if let (Some(id), Some(score)) = (id, score) {
                scores.insert(id.to_string(), score as f32);
            }
        }

        for candidate in &mut candidates {
            candidate.rerank_score = scores.get(&candidate.document.id).copied();
        }
        // Stable sort: scored candidates by model score descending, unscored
        // ones after them in their original order.
        candidates.sort_by(|a, b| match (a.rerank_score, b.rerank_score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModelClient;
    use crate::rag::document::Document;
    use crate::trace::InMemoryTraceStore;

    fn candidate(id: &str, original_score: f32) -> RetrievedDocument {
        RetrievedDocument {
            document: Document::new(id, format!("content {id}")),
            original_score,
            rerank_score: None,
        }
    }

    struct RecordingSink(Arc<InMemoryTraceStore>);
    impl TraceSink for RecordingSink {
        fn submit(&self, record: TraceRecord) {
            let _ = crate::trace::TraceStore::save(self.0.as_ref(), record);
        }
    }

    /// **Scenario**: Model scores reorder the candidates; both scores are
    /// recorded on each; the call is traced and requests a JSON schema.
    #[tokio::test]
    async fn rerank_reorders_by_model_scores() {
        let client = Arc::new(MockModelClient::new());
        client.push_text(r#"{"scores":[{"id":"a","score":0.2},{"id":"b","score":0.95}]}"#);
        let store = Arc::new(InMemoryTraceStore::new());
        let reranker = ModelBasedReranker::new(client.clone())
            .with_trace_sink(Arc::new(RecordingSink(store.clone())));

        let out = reranker
            .rerank("query", vec![candidate("a", 0.9), candidate("b", 0.5)])
            .await
            .unwrap();

        assert_eq!(out[0].document.id, "b", "model preference wins");
        assert_eq!(out[0].original_score, 0.5);
        assert_eq!(out[0].rerank_score, Some(0.95));
        assert!(out[0].original_score < out[0].rerank_score.unwrap());
        assert_eq!(out[1].document.id, "a");

        assert!(matches!(
            client.requests()[0].response_format,
            ResponseFormat::JsonSchema(_)
        ));
        assert_eq!(store.len(), 1, "one trace per model round-trip");
    }

    /// **Scenario**: Candidates the model omitted keep their original order
    /// after the scored ones.
    #[tokio::test]
    async fn unscored_candidates_keep_original_order() {
        let client = Arc::new(MockModelClient::new());
        client.push_text(r#"{"scores":[{"id":"c","score":0.7}]}"#);
        let reranker = ModelBasedReranker::new(client);

        let out = reranker
            .rerank(
                "q",
                vec![candidate("a", 0.9), candidate("b", 0.8), candidate("c", 0.1)],
            )
            .await
            .unwrap();
        let ids: Vec<_> = out.iter().map(|c| c.document.id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(out[1].rerank_score, None);
    }

    /// **Scenario**: Non-conformant model output fails with Parse.
    #[tokio::test]
    async fn malformed_scores_fail_with_parse() {
        let client = Arc::new(MockModelClient::new());
        client.push_text(r#"{"rankings": "nope"}"#);
        let reranker = ModelBasedReranker::new(client);
        let err = reranker.rerank("q", vec![candidate("a", 0.5)]).await.unwrap_err();
        assert!(matches!(err, RerankError::Parse(_)));
    }

    /// **Scenario**: An empty candidate list skips the model entirely.
    #[tokio::test]
    async fn empty_candidates_skip_model() {
        let client = Arc::new(MockModelClient::new());
        let reranker = ModelBasedReranker::new(client.clone());
        let out = reranker.rerank("q", Vec::new()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(client.call_count(), 0);
    }
}

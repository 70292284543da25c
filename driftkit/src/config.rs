//! Recognized configuration options.
//!
//! Every option has a default; hosts deserialize the whole tree from a TOML
//! table or read it from `DRIFTKIT_*` environment variables (filled by the
//! `env_config` crate's `.env`/XDG loading) via [`DriftConfig::from_env`].

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::rag::{IngestionOptions, RetrieverDefaults};
use crate::workflow::{EngineConfig, StepRetryPolicy, WorkerPoolConfig};

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Worker pool sizing and the engine master switch (`engine.*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub core_threads: usize,
    pub max_threads: usize,
    pub queue_capacity: usize,
    pub enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        Self {
            core_threads: pool.core_workers,
            max_threads: pool.max_workers,
            queue_capacity: pool.queue_capacity,
            enabled: true,
        }
    }
}

/// Retry defaults applied when a step omits a policy (`retry.*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub default_delay_ms: u64,
    pub default_max_attempts: u32,
    pub default_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            default_delay_ms: 500,
            default_max_attempts: 3,
            default_multiplier: 2.0,
        }
    }
}

/// Chunking strategy (`rag.splitter.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitterKind {
    Recursive,
    Semantic,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SplitterSettings {
    #[serde(rename = "type")]
    pub kind: SplitterKind,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_threshold: f32,
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            kind: SplitterKind::Recursive,
            chunk_size: 1000,
            chunk_overlap: 200,
            similarity_threshold: 0.75,
            max_chunk_size: 2000,
            min_chunk_size: 100,
        }
    }
}

/// Reranker wiring (`rag.reranker.*`).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RerankerSettings {
    pub enabled: bool,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Prompt-registry method used for the scoring instruction.
    pub prompt_id: Option<String>,
}

/// Default retrieval knobs (`rag.retriever.*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrieverSettings {
    pub default_top_k: usize,
    pub default_min_score: f32,
    pub query_prefix: Option<String>,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            default_min_score: 0.0,
            query_prefix: None,
        }
    }
}

/// Ingestion policy (`rag.ingestion.*`). `use_virtual_threads` is an
/// advisory compatibility knob: it only widens the default concurrency
/// bound, threading is the runtime's concern.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub use_virtual_threads: bool,
    pub default_extensions: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 200,
            use_virtual_threads: false,
            default_extensions: vec!["txt".into(), "md".into()],
            max_file_size_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RagSettings {
    pub splitter: SplitterSettings,
    pub reranker: RerankerSettings,
    pub retriever: RetrieverSettings,
    pub ingestion: IngestionSettings,
}

/// Named backend selection with free-form options (`prompt.source` and
/// `vector_store`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSelection {
    pub name: String,
    pub options: HashMap<String, String>,
}

impl Default for BackendSelection {
    fn default() -> Self {
        Self {
            name: "in-memory".to_string(),
            options: HashMap::new(),
        }
    }
}

/// Tracing sink behaviour (`tracing.*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingSettings {
    pub enabled: bool,
    pub application_name: Option<String>,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            application_name: None,
        }
    }
}

/// The full recognized configuration tree.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DriftConfig {
    pub engine: EngineSettings,
    pub retry: RetrySettings,
    pub rag: RagSettings,
    pub prompt_source: BackendSelection,
    pub vector_store: BackendSelection,
    pub tracing: TracingSettings,
}

impl DriftConfig {
    /// Loads `.env` / XDG `config.toml` values into the environment (via the
    /// `env_config` crate) and then reads the `DRIFTKIT_*` variables. The
    /// usual entry point for hosts.
    pub fn load_from_env() -> Self {
        match env_config::load_and_apply("driftkit", None) {
            Ok(applied) if !applied.is_empty() => {
                tracing::debug!(applied = applied.len(), "config values loaded from files");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "config file loading failed, using env and defaults");
            }
        }
        Self::from_env()
    }

    /// Reads `DRIFTKIT_*` environment variables over the defaults. Call
    /// [`DriftConfig::load_from_env`] instead when `.env` / XDG files should
    /// be considered too.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            engine: EngineSettings {
                core_threads: env_parse(
                    "DRIFTKIT_ENGINE_CORE_THREADS",
                    defaults.engine.core_threads,
                ),
                max_threads: env_parse(
                    "DRIFTKIT_ENGINE_MAX_THREADS",
                    defaults.engine.max_threads,
                ),
                queue_capacity: env_parse(
                    "DRIFTKIT_ENGINE_QUEUE_CAPACITY",
                    defaults.engine.queue_capacity,
                ),
                enabled: env_parse("DRIFTKIT_ENGINE_ENABLED", defaults.engine.enabled),
            },
            retry: RetrySettings {
                default_delay_ms: env_parse(
                    "DRIFTKIT_RETRY_DEFAULT_DELAY_MS",
                    defaults.retry.default_delay_ms,
                ),
                default_max_attempts: env_parse(
                    "DRIFTKIT_RETRY_DEFAULT_MAX_ATTEMPTS",
                    defaults.retry.default_max_attempts,
                ),
                default_multiplier: env_parse(
                    "DRIFTKIT_RETRY_DEFAULT_MULTIPLIER",
                    defaults.retry.default_multiplier,
                ),
            },
            rag: RagSettings {
                splitter: SplitterSettings {
                    kind: match env_string("DRIFTKIT_RAG_SPLITTER_TYPE").as_deref() {
                        Some("semantic") => SplitterKind::Semantic,
                        Some("recursive") => SplitterKind::Recursive,
                        _ => defaults.rag.splitter.kind,
                    },
                    chunk_size: env_parse(
                        "DRIFTKIT_RAG_SPLITTER_CHUNK_SIZE",
                        defaults.rag.splitter.chunk_size,
                    ),
                    chunk_overlap: env_parse(
                        "DRIFTKIT_RAG_SPLITTER_CHUNK_OVERLAP",
                        defaults.rag.splitter.chunk_overlap,
                    ),
                    similarity_threshold: env_parse(
                        "DRIFTKIT_RAG_SPLITTER_SIMILARITY_THRESHOLD",
                        defaults.rag.splitter.similarity_threshold,
                    ),
                    max_chunk_size: env_parse(
                        "DRIFTKIT_RAG_SPLITTER_MAX_CHUNK_SIZE",
                        defaults.rag.splitter.max_chunk_size,
                    ),
                    min_chunk_size: env_parse(
                        "DRIFTKIT_RAG_SPLITTER_MIN_CHUNK_SIZE",
                        defaults.rag.splitter.min_chunk_size,
                    ),
                },
                reranker: RerankerSettings {
                    enabled: env_parse(
                        "DRIFTKIT_RAG_RERANKER_ENABLED",
                        defaults.rag.reranker.enabled,
                    ),
                    model: env_string("DRIFTKIT_RAG_RERANKER_MODEL"),
                    temperature: env_string("DRIFTKIT_RAG_RERANKER_TEMPERATURE")
                        .and_then(|v| v.parse().ok()),
                    prompt_id: env_string("DRIFTKIT_RAG_RERANKER_PROMPT_ID"),
                },
                retriever: RetrieverSettings {
                    default_top_k: env_parse(
                        "DRIFTKIT_RAG_RETRIEVER_DEFAULT_TOP_K",
                        defaults.rag.retriever.default_top_k,
                    ),
                    default_min_score: env_parse(
                        "DRIFTKIT_RAG_RETRIEVER_DEFAULT_MIN_SCORE",
                        defaults.rag.retriever.default_min_score,
                    ),
                    query_prefix: env_string("DRIFTKIT_RAG_RETRIEVER_QUERY_PREFIX"),
                },
                ingestion: IngestionSettings {
                    max_retries: env_parse(
                        "DRIFTKIT_RAG_INGESTION_MAX_RETRIES",
                        defaults.rag.ingestion.max_retries,
                    ),
                    retry_delay_ms: env_parse(
                        "DRIFTKIT_RAG_INGESTION_RETRY_DELAY_MS",
                        defaults.rag.ingestion.retry_delay_ms,
                    ),
                    use_virtual_threads: env_parse(
                        "DRIFTKIT_RAG_INGESTION_USE_VIRTUAL_THREADS",
                        defaults.rag.ingestion.use_virtual_threads,
                    ),
                    default_extensions: env_string("DRIFTKIT_RAG_INGESTION_DEFAULT_EXTENSIONS")
                        .map(|raw| {
                            raw.split(',')
                                .map(|e| e.trim().to_string())
                                .filter(|e| !e.is_empty())
                                .collect()
                        })
                        .unwrap_or(defaults.rag.ingestion.default_extensions),
                    max_file_size_bytes: env_parse(
                        "DRIFTKIT_RAG_INGESTION_MAX_FILE_SIZE_BYTES",
                        defaults.rag.ingestion.max_file_size_bytes,
                    ),
                },
            },
            prompt_source: BackendSelection {
                name: env_string("DRIFTKIT_PROMPT_SOURCE_NAME")
                    .unwrap_or(defaults.prompt_source.name),
                options: defaults.prompt_source.options,
            },
            vector_store: BackendSelection {
                name: env_string("DRIFTKIT_VECTOR_STORE_NAME")
                    .unwrap_or(defaults.vector_store.name),
                options: defaults.vector_store.options,
            },
            tracing: TracingSettings {
                enabled: env_parse("DRIFTKIT_TRACING_ENABLED", defaults.tracing.enabled),
                application_name: env_string("DRIFTKIT_TRACING_APPLICATION_NAME"),
            },
        }
    }

    /// Engine configuration derived from the `engine.*` and `retry.*`
    /// settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            enabled: self.engine.enabled,
            pool: WorkerPoolConfig {
                core_workers: self.engine.core_threads.max(1),
                max_workers: self.engine.max_threads.max(self.engine.core_threads.max(1)),
                queue_capacity: self.engine.queue_capacity.max(1),
            },
            retry_defaults: self.retry_defaults(),
            ..EngineConfig::default()
        }
    }

    /// Step retry defaults from `retry.*`.
    pub fn retry_defaults(&self) -> StepRetryPolicy {
        StepRetryPolicy::exponential(
            self.retry.default_max_attempts,
            Duration::from_millis(self.retry.default_delay_ms),
            self.retry.default_multiplier,
            Duration::from_secs(30),
        )
    }

    /// Retrieval defaults from `rag.retriever.*`.
    pub fn retriever_defaults(&self) -> RetrieverDefaults {
        RetrieverDefaults {
            top_k: self.rag.retriever.default_top_k,
            min_score: self.rag.retriever.default_min_score,
            query_prefix: self.rag.retriever.query_prefix.clone(),
        }
    }

    /// Ingestion options from `rag.ingestion.*`.
    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            max_concurrency: if self.rag.ingestion.use_virtual_threads {
                16
            } else {
                4
            },
            max_retries: self.rag.ingestion.max_retries,
            retry_delay: Duration::from_millis(self.rag.ingestion.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Defaults are complete and internally consistent.
    #[test]
    fn defaults_are_consistent() {
        let config = DriftConfig::default();
        assert!(config.engine.enabled);
        assert!(config.engine.max_threads >= config.engine.core_threads);
        assert!(config.rag.splitter.chunk_overlap < config.rag.splitter.chunk_size);
        assert!(config.rag.splitter.min_chunk_size <= config.rag.splitter.max_chunk_size);
        assert_eq!(config.prompt_source.name, "in-memory");
        assert_eq!(config.vector_store.name, "in-memory");
    }

    /// **Scenario**: The full tree deserializes from a TOML table with
    /// partial overrides.
    #[test]
    fn deserializes_from_partial_toml() {
        let toml = r#"
            [engine]
            core_threads = 2
            enabled = false

            [retry]
            default_max_attempts = 7

            [rag.splitter]
            type = "semantic"
            chunk_size = 512

            [tracing]
            application_name = "assistant-api"
        "#;
        let config: DriftConfig = toml::from_str(toml).expect("parse");
        assert_eq!(config.engine.core_threads, 2);
        assert!(!config.engine.enabled);
        assert_eq!(config.retry.default_max_attempts, 7);
        assert_eq!(config.rag.splitter.kind, SplitterKind::Semantic);
        assert_eq!(config.rag.splitter.chunk_size, 512);
        assert_eq!(
            config.tracing.application_name.as_deref(),
            Some("assistant-api")
        );
        // untouched sections keep defaults
        assert_eq!(config.rag.retriever.default_top_k, 5);
    }

    /// **Scenario**: Environment variables override defaults in from_env.
    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("DRIFTKIT_ENGINE_QUEUE_CAPACITY", "128");
        std::env::set_var("DRIFTKIT_RAG_SPLITTER_TYPE", "semantic");
        std::env::set_var("DRIFTKIT_TRACING_ENABLED", "false");
        let config = DriftConfig::from_env();
        std::env::remove_var("DRIFTKIT_ENGINE_QUEUE_CAPACITY");
        std::env::remove_var("DRIFTKIT_RAG_SPLITTER_TYPE");
        std::env::remove_var("DRIFTKIT_TRACING_ENABLED");

        assert_eq!(config.engine.queue_capacity, 128);
        assert_eq!(config.rag.splitter.kind, SplitterKind::Semantic);
        assert!(!config.tracing.enabled);
    }

    /// **Scenario**: Derived engine config honors sizing and the retry
    /// defaults table.
    #[test]
    fn derived_engine_config() {
        let mut config = DriftConfig::default();
        config.engine.core_threads = 3;
        config.engine.max_threads = 2; // inconsistent on purpose
        config.retry.default_delay_ms = 10;
        let engine = config.engine_config();
        assert_eq!(engine.pool.core_workers, 3);
        assert_eq!(engine.pool.max_workers, 3, "max clamped to core");
        assert_eq!(
            engine.retry_defaults.delay,
            Duration::from_millis(10)
        );
    }
}

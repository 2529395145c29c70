use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration was installed twice.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for DocuLens.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores chunk embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding chunk vectors.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Vector backend used by the pipelines.
    pub vector_store: VectorStoreKind,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Completion provider backing the LLM nodes and the label classifier.
    pub llm_provider: LlmProvider,
    /// API key for the hosted OpenAI endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// Root directory for the file-backed event store.
    pub event_dir: PathBuf,
    /// Candidate labels offered to the automatic classifier.
    pub classification_labels: Vec<String>,
    /// Settings passed to pipeline nodes.
    pub pipeline: PipelineSettings,
    /// Settings governing the task dispatcher and worker.
    pub dispatch: DispatchSettings,
}

/// Tunables consumed by the pipeline nodes.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Staging directory for downloaded documents.
    pub ingestion_dir: PathBuf,
    /// Timeout applied to document downloads.
    pub download_timeout: Duration,
    /// Upper bound on tokens per chunk.
    pub chunk_max_tokens: usize,
    /// Merge adjacent chunks that share a heading while they fit the token budget.
    pub merge_adjacent_chunks: bool,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Completion model used by the LLM nodes.
    pub llm_model: String,
    /// Default number of chunks fed to the summary node.
    pub summary_chunk_limit: usize,
    /// Default number of passages retrieved for QA.
    pub qa_top_k: usize,
    /// Default number of search results.
    pub search_result_limit: usize,
    /// Number of search results echoed in the node result preview.
    pub search_preview_limit: usize,
    /// Number of vector identifiers echoed in the embedding node result.
    pub chunk_preview_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ingestion_dir: PathBuf::from("data/ingestion"),
            download_timeout: Duration::from_secs(30),
            chunk_max_tokens: 8191,
            merge_adjacent_chunks: true,
            embedding_model: "text-embedding-3-small".to_string(),
            llm_model: "gpt-4.1-mini".to_string(),
            summary_chunk_limit: 12,
            qa_top_k: 5,
            search_result_limit: 10,
            search_preview_limit: 5,
            chunk_preview_limit: 25,
        }
    }
}

/// Upper bound accepted for `DOCULENS_WORKER_CONCURRENCY`.
pub const MAX_WORKER_CONCURRENCY: usize = 1024;

/// Tunables for the task dispatcher and worker loop.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Whole-run retries granted to external-service failures.
    pub max_retries: u32,
    /// Base delay between retries, doubled on every attempt.
    pub retry_backoff: Duration,
    /// Optional wall-clock budget for a single pipeline run.
    pub time_limit: Option<Duration>,
    /// Number of jobs the worker processes concurrently.
    pub worker_concurrency: usize,
    /// Schedule a summary after every successful upload.
    pub auto_summary: bool,
    /// Classify freshly summarized documents.
    pub auto_classify: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            time_limit: None,
            worker_concurrency: 4,
            auto_summary: true,
            auto_classify: true,
        }
    }
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Offline hashing embedder, useful for smoke runs.
    Deterministic,
}

/// Supported chat-completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI chat completions.
    OpenAI,
}

impl LlmProvider {
    /// Lowercase provider name, as accepted by `LLM_PROVIDER`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAI => "openai",
        }
    }
}

/// Vector backends the pipelines can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorStoreKind {
    /// Remote Qdrant collection.
    Qdrant,
    /// Process-local store; contents vanish on exit.
    Memory,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = PipelineSettings::default();
        let dispatch_defaults = DispatchSettings::default();

        let pipeline = PipelineSettings {
            ingestion_dir: load_env_optional("DOCULENS_INGESTION_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.ingestion_dir),
            download_timeout: Duration::from_secs(load_env_parsed(
                "DOCULENS_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout.as_secs(),
            )?),
            chunk_max_tokens: load_positive("CHUNK_MAX_TOKENS", defaults.chunk_max_tokens)?,
            merge_adjacent_chunks: load_env_flag(
                "CHUNK_MERGE_PEERS",
                defaults.merge_adjacent_chunks,
            )?,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            llm_model: load_env_optional("LLM_MODEL").unwrap_or(defaults.llm_model),
            summary_chunk_limit: load_positive(
                "DOCULENS_SUMMARY_CHUNK_LIMIT",
                defaults.summary_chunk_limit,
            )?,
            qa_top_k: load_positive("DOCULENS_QA_TOP_K", defaults.qa_top_k)?,
            search_result_limit: load_positive(
                "DOCULENS_SEARCH_RESULT_LIMIT",
                defaults.search_result_limit,
            )?,
            search_preview_limit: load_positive(
                "DOCULENS_SEARCH_PREVIEW_LIMIT",
                defaults.search_preview_limit,
            )?,
            chunk_preview_limit: load_positive(
                "DOCULENS_CHUNK_PREVIEW_LIMIT",
                defaults.chunk_preview_limit,
            )?,
        };

        let dispatch = DispatchSettings {
            max_retries: load_env_parsed("DOCULENS_TASK_MAX_RETRIES", dispatch_defaults.max_retries)?,
            retry_backoff: Duration::from_millis(load_env_parsed(
                "DOCULENS_TASK_RETRY_BACKOFF_MS",
                u64::try_from(dispatch_defaults.retry_backoff.as_millis()).unwrap_or(500),
            )?),
            time_limit: load_env_optional("DOCULENS_TASK_TIME_LIMIT_SECS")
                .map(|value| {
                    value.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                        ConfigError::InvalidValue("DOCULENS_TASK_TIME_LIMIT_SECS".to_string())
                    })
                })
                .transpose()?,
            worker_concurrency: check_at_most(
                "DOCULENS_WORKER_CONCURRENCY",
                load_positive(
                    "DOCULENS_WORKER_CONCURRENCY",
                    dispatch_defaults.worker_concurrency,
                )?,
                MAX_WORKER_CONCURRENCY,
            )?,
            auto_summary: load_env_flag("DOCULENS_AUTO_SUMMARY", dispatch_defaults.auto_summary)?,
            auto_classify: load_env_flag(
                "DOCULENS_AUTO_CLASSIFY",
                dispatch_defaults.auto_classify,
            )?,
        };

        Ok(Self {
            qdrant_url: load_env_optional("QDRANT_URL")
                .unwrap_or_else(|| "http://127.0.0.1:6333".to_string()),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "doculens_chunks".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            vector_store: load_env_choice("VECTOR_STORE", VectorStoreKind::Qdrant)?,
            embedding_provider: load_env_choice("EMBEDDING_PROVIDER", EmbeddingProvider::OpenAI)?,
            embedding_dimension: load_positive("EMBEDDING_DIMENSION", 1536)?,
            llm_provider: load_env_choice("LLM_PROVIDER", LlmProvider::OpenAI)?,
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            event_dir: load_env_optional("DOCULENS_EVENT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/events")),
            classification_labels: load_env_optional("DOCULENS_CLASSIFICATION_LABELS")
                .map(|raw| parse_label_list(&raw))
                .unwrap_or_default(),
            pipeline,
            dispatch,
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_positive(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = load_env_parsed(key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be at least 1")));
    }
    Ok(value)
}

fn check_at_most(key: &str, value: usize, max: usize) -> Result<usize, ConfigError> {
    if value > max {
        return Err(ConfigError::InvalidValue(format!("{key} must be at most {max}")));
    }
    Ok(value)
}

fn load_env_flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
        None => Ok(default),
    }
}

fn load_env_choice<T: FromStr<Err = ()>>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|()| ConfigError::InvalidValue(format!("{key}={value}"))),
        None => Ok(default),
    }
}

fn parse_label_list(raw: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in raw.split(',').map(str::trim).filter(|label| !label.is_empty()) {
        if !labels.iter().any(|existing| existing == label) {
            labels.push(label.to_string());
        }
    }
    labels
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "deterministic" | "hash" => Ok(Self::Deterministic),
            _ => Err(()),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" | "in-memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, if [`init_config`] has run.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        vector_store = ?config.vector_store,
        embedding_provider = ?config.embedding_provider,
        llm_provider = ?config.llm_provider,
        labels = config.classification_labels.len(),
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    CONFIG.get().ok_or(ConfigError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_match_documented_limits() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.summary_chunk_limit, 12);
        assert_eq!(settings.qa_top_k, 5);
        assert_eq!(settings.search_result_limit, 10);
        assert_eq!(settings.search_preview_limit, 5);
        assert_eq!(settings.chunk_preview_limit, 25);
        assert_eq!(settings.chunk_max_tokens, 8191);
        assert_eq!(settings.download_timeout, Duration::from_secs(30));
    }

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("OpenAI".parse(), Ok(EmbeddingProvider::OpenAI));
        assert_eq!("hash".parse(), Ok(EmbeddingProvider::Deterministic));
        assert_eq!(" ollama ".parse(), Ok(LlmProvider::Ollama));
        assert_eq!("memory".parse(), Ok(VectorStoreKind::Memory));
        assert!("pinecone".parse::<VectorStoreKind>().is_err());
    }

    #[test]
    fn worker_concurrency_is_bounded() {
        assert_eq!(
            check_at_most("DOCULENS_WORKER_CONCURRENCY", 8, MAX_WORKER_CONCURRENCY).ok(),
            Some(8)
        );
        let error = check_at_most("WORKERS", usize::MAX, MAX_WORKER_CONCURRENCY)
            .expect_err("too many workers");
        assert!(error.to_string().contains("at most 1024"));
    }

    #[test]
    fn label_list_is_trimmed_and_deduplicated() {
        let labels = parse_label_list(" invoice, contract ,,invoice,memo ");
        assert_eq!(labels, vec!["invoice", "contract", "memo"]);
    }
}

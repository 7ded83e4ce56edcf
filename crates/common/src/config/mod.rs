//! Configuration management for scripture-qa services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Document store configuration
    pub database: DatabaseConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation (chat completion) service configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Time allowed until the response head is produced, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL of the pre-built document index
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Table holding the corpus passages
    #[serde(default = "default_documents_table")]
    pub documents_table: String,

    /// SQL function performing the similarity search
    #[serde(default = "default_match_function")]
    pub match_function: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: openai, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for generation service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model used for answers, rewriting and expansion
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Temperature for the streamed answer
    #[serde(default = "default_answer_temperature")]
    pub temperature: f32,

    /// Maximum tokens for the streamed answer
    #[serde(default = "default_answer_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for query rewriting and expansion
    #[serde(default = "default_auxiliary_temperature")]
    pub auxiliary_temperature: f32,

    /// Maximum tokens for query rewriting and expansion
    #[serde(default = "default_auxiliary_max_tokens")]
    pub auxiliary_max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

/// Retrieval channel layout
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Two vector legs (search + expanded query) plus the keyword leg
    Hybrid,
    /// A single vector leg over the search query
    Vector,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Hybrid => "hybrid",
            RetrievalMode::Vector => "vector",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_mode")]
    pub mode: RetrievalMode,

    /// Minimum similarity for hybrid vector legs
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Result cap per hybrid vector leg
    #[serde(default = "default_match_count")]
    pub match_count: usize,

    /// Minimum similarity in vector-only mode
    #[serde(default = "default_vector_only_threshold")]
    pub vector_only_threshold: f64,

    /// Result cap in vector-only mode
    #[serde(default = "default_vector_only_match_count")]
    pub vector_only_match_count: usize,

    /// Result cap for the phrase sub-query of the keyword leg
    #[serde(default = "default_phrase_match_limit")]
    pub phrase_match_limit: usize,

    /// Result cap for the all-terms sub-query of the keyword leg
    #[serde(default = "default_and_match_limit")]
    pub and_match_limit: usize,

    /// Documents kept after merging
    #[serde(default = "default_max_context_documents")]
    pub max_context_documents: usize,

    /// Characters of content kept per document
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Prior turns shown to the query rewriter
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Terms requested from the query expander
    #[serde(default = "default_max_expansion_terms")]
    pub max_expansion_terms: usize,

    /// Shortest word kept as a keyword
    #[serde(default = "default_min_keyword_len")]
    pub min_keyword_len: usize,

    #[serde(default = "default_true")]
    pub rewrite_enabled: bool,

    #[serde(default = "default_true")]
    pub expansion_enabled: bool,

    /// Words never used as keywords
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,

    /// Corpus-wide terms the expander must not add
    #[serde(default = "default_generic_terms")]
    pub generic_terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_body_bytes() -> usize { 256 * 1024 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_documents_table() -> String { "documents".to_string() }
fn default_match_function() -> String { "match_documents".to_string() }
fn default_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_generation_model() -> String { crate::DEFAULT_GENERATION_MODEL.to_string() }
fn default_answer_temperature() -> f32 { 0.3 }
fn default_answer_max_tokens() -> u32 { 1500 }
fn default_auxiliary_temperature() -> f32 { 0.0 }
fn default_auxiliary_max_tokens() -> u32 { 120 }
fn default_generation_timeout() -> u64 { 120 }
fn default_retrieval_mode() -> RetrievalMode { RetrievalMode::Hybrid }
fn default_similarity_threshold() -> f64 { 0.2 }
fn default_match_count() -> usize { 12 }
fn default_vector_only_threshold() -> f64 { 0.3 }
fn default_vector_only_match_count() -> usize { 8 }
fn default_phrase_match_limit() -> usize { 5 }
fn default_and_match_limit() -> usize { 10 }
fn default_max_context_documents() -> usize { 10 }
fn default_max_content_chars() -> usize { 2500 }
fn default_history_window() -> usize { 6 }
fn default_max_expansion_terms() -> usize { 8 }
fn default_min_keyword_len() -> usize { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "scripture-qa".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_true() -> bool { true }

/// Question words, function words and request verbs that carry no topic.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "according", "after", "all", "also", "an", "and", "any", "are", "as", "at",
    "be", "been", "being", "between", "but", "by", "can", "could", "describe", "did", "do",
    "does", "doing", "explain", "for", "from", "give", "had", "has", "have", "he", "her",
    "his", "how", "if", "in", "into", "is", "it", "its", "me", "mean", "meaning", "more",
    "most", "my", "not", "of", "on", "one", "or", "our", "say", "says", "said", "should",
    "some", "such", "tell", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "us", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
];

/// Terms so common in this corpus that adding them to a query only dilutes it.
pub const DEFAULT_GENERIC_TERMS: &[&str] = &[
    "baba", "anandamurti", "shrii", "spiritual", "spirituality", "god", "consciousness",
    "mind", "meditation", "sadhana", "dharma", "yoga", "soul", "self", "life", "human",
    "teaching", "teachings", "philosophy", "universe", "love", "devotion",
];

fn default_stop_words() -> Vec<String> {
    DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect()
}

fn default_generic_terms() -> Vec<String> {
    DEFAULT_GENERIC_TERMS.iter().map(|w| w.to_string()).collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/scripture_qa".to_string(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            documents_table: default_documents_table(),
            match_function: default_match_function(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_base: None,
            model: default_generation_model(),
            temperature: default_answer_temperature(),
            max_tokens: default_answer_max_tokens(),
            auxiliary_temperature: default_auxiliary_temperature(),
            auxiliary_max_tokens: default_auxiliary_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_retrieval_mode(),
            similarity_threshold: default_similarity_threshold(),
            match_count: default_match_count(),
            vector_only_threshold: default_vector_only_threshold(),
            vector_only_match_count: default_vector_only_match_count(),
            phrase_match_limit: default_phrase_match_limit(),
            and_match_limit: default_and_match_limit(),
            max_context_documents: default_max_context_documents(),
            max_content_chars: default_max_content_chars(),
            history_window: default_history_window(),
            max_expansion_terms: default_max_expansion_terms(),
            min_keyword_len: default_min_keyword_len(),
            rewrite_enabled: true,
            expansion_enabled: true,
            stop_words: default_stop_words(),
            generic_terms: default_generic_terms(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__GENERATION__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        require_key("embedding", &self.embedding.provider, &self.embedding.api_key)?;
        require_key("generation", &self.generation.provider, &self.generation.api_key)?;

        for (field, value) in [
            ("database.documents_table", &self.database.documents_table),
            ("database.match_function", &self.database.match_function),
        ] {
            if !is_sql_identifier(value) {
                return Err(AppError::Configuration {
                    message: format!("{} is not a valid SQL identifier: {:?}", field, value),
                });
            }
        }

        let retrieval = &self.retrieval;
        for (field, threshold) in [
            ("retrieval.similarity_threshold", retrieval.similarity_threshold),
            ("retrieval.vector_only_threshold", retrieval.vector_only_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(AppError::Configuration {
                    message: format!("{} must be within [0, 1], got {}", field, threshold),
                });
            }
        }

        for (field, cap) in [
            ("retrieval.match_count", retrieval.match_count),
            ("retrieval.vector_only_match_count", retrieval.vector_only_match_count),
            ("retrieval.max_context_documents", retrieval.max_context_documents),
            ("retrieval.max_content_chars", retrieval.max_content_chars),
        ] {
            if cap == 0 {
                return Err(AppError::Configuration {
                    message: format!("{} must be greater than zero", field),
                });
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn require_key(section: &str, provider: &str, api_key: &Option<String>) -> Result<()> {
    if provider != "openai" {
        return Ok(());
    }
    match api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(()),
        _ => Err(AppError::Configuration {
            message: format!("{}.api_key is required for the openai provider", section),
        }),
    }
}

/// Plain unquoted Postgres identifier (optionally schema-qualified).
fn is_sql_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 127
        && value.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

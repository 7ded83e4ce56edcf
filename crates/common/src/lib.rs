//! scripture-qa Common Library
//!
//! Shared code for the scripture-qa crates including:
//! - Configuration management
//! - Error types and handling
//! - Document store access (Postgres + pgvector)
//! - Embedding client abstraction
//! - Generation (chat completion) client abstraction
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DocumentRecord, DocumentStore, Provenance, SourceCitation};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{ChatMessage, LanguageModel};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Default generation model
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o";

//! Multi-leg retrieval
//!
//! Provides two retrieval layouts:
//! - Hybrid: two vector legs (search and expanded embeddings) plus a keyword leg
//! - Vector: a single vector leg over the search embedding
//!
//! Retrievers return a `CandidatePool`; `ResultMerger` ranks, deduplicates and
//! bounds it into a `RankedContext`.

mod hybrid;
mod keyword;
mod merge;
mod vector;

pub use hybrid::HybridRetriever;
pub use keyword::{KeywordExtractor, KeywordSearch};
pub use merge::{RankedContext, ResultMerger};
pub use vector::{merge_vector_results, VectorRetriever, VectorSearch};

use scripture_qa_common::config::RetrievalMode;
use scripture_qa_common::errors::Result;
use scripture_qa_common::DocumentRecord;

/// Inputs shared by every leg of one retrieval
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Standalone query used for keyword matching
    pub search_query: String,

    /// Embedding of the search query
    pub search_embedding: Vec<f32>,

    /// Embedding of the expanded query; `None` when it equals the search query
    pub expanded_embedding: Option<Vec<f32>>,
}

/// A retrieval leg, for logging and failure accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalLeg {
    SearchVector,
    ExpandedVector,
    Keyword,
}

impl RetrievalLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalLeg::SearchVector => "search_vector",
            RetrievalLeg::ExpandedVector => "expanded_vector",
            RetrievalLeg::Keyword => "keyword",
        }
    }
}

/// Unranked results of all legs
#[derive(Debug, Default)]
pub struct CandidatePool {
    /// Vector hits, already merged across embeddings
    pub vector: Vec<DocumentRecord>,

    /// Keyword hits in phrase-then-AND order
    pub keyword: Vec<DocumentRecord>,

    /// Legs that failed and contributed nothing
    pub failed_legs: Vec<RetrievalLeg>,
}

impl CandidatePool {
    pub fn len(&self) -> usize {
        self.vector.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Common trait for retrieval layouts
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Run every leg and collect their results
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<CandidatePool>;

    /// Get the retrieval mode
    fn mode(&self) -> RetrievalMode;
}

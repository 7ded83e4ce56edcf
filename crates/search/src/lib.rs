//! scripture-qa search library
//!
//! Retrieval legs over the document store and the merger that turns their
//! candidate pools into a bounded, ranked context.

pub mod retrieval;

pub use retrieval::{
    CandidatePool, HybridRetriever, KeywordExtractor, KeywordSearch, RankedContext,
    ResultMerger, RetrievalLeg, RetrievalRequest, Retriever, VectorRetriever, VectorSearch,
};

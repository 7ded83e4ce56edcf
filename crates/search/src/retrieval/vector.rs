//! Vector similarity legs
//!
//! The store's similarity function does the ranking; this module issues the
//! calls and folds the two embedding variants together.

use super::{CandidatePool, RetrievalRequest, Retriever};
use scripture_qa_common::config::RetrievalMode;
use scripture_qa_common::errors::{AppError, Result};
use scripture_qa_common::{DocumentRecord, DocumentStore, Provenance};
use std::collections::HashMap;
use std::sync::Arc;

/// One similarity search with a fixed threshold and cap
#[derive(Clone)]
pub struct VectorSearch {
    store: Arc<dyn DocumentStore>,
    threshold: f64,
    count: usize,
}

impl VectorSearch {
    pub fn new(store: Arc<dyn DocumentStore>, threshold: f64, count: usize) -> Self {
        Self {
            store,
            threshold,
            count,
        }
    }

    pub async fn search(&self, embedding: &[f32]) -> Result<Vec<DocumentRecord>> {
        let mut docs = self
            .store
            .match_documents(embedding, self.threshold, self.count)
            .await?;
        for doc in &mut docs {
            doc.provenance = Provenance::Vector;
        }
        Ok(docs)
    }
}

/// Merge two vector result sets by identity, keeping the higher similarity.
///
/// First-seen order is preserved; a stronger duplicate replaces the earlier
/// entry in place.
pub fn merge_vector_results(
    primary: Vec<DocumentRecord>,
    secondary: Vec<DocumentRecord>,
) -> Vec<DocumentRecord> {
    let mut merged: Vec<DocumentRecord> = Vec::with_capacity(primary.len() + secondary.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for doc in primary.into_iter().chain(secondary) {
        let key = doc.identity_key();
        match positions.get(&key) {
            Some(&idx) => {
                if doc.score() > merged[idx].score() {
                    merged[idx] = doc;
                }
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(doc);
            }
        }
    }

    merged
}

/// Single-channel retriever: one embedding, one vector leg, no keyword leg
pub struct VectorRetriever {
    search: VectorSearch,
}

impl VectorRetriever {
    /// Create a new vector-only retriever
    pub fn new(store: Arc<dyn DocumentStore>, threshold: f64, count: usize) -> Self {
        Self {
            search: VectorSearch::new(store, threshold, count),
        }
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<CandidatePool> {
        // The only leg: its failure is the retrieval's failure
        let vector = self
            .search
            .search(&request.search_embedding)
            .await
            .map_err(|e| AppError::RetrievalError {
                message: format!("Vector search failed: {}", e),
            })?;

        Ok(CandidatePool {
            vector,
            ..CandidatePool::default()
        })
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Vector
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{doc, FakeStore};
    use super::*;

    #[test]
    fn test_merge_keeps_higher_similarity() {
        let primary = vec![
            doc("1", "Ananda Marga Ideology and Way of Life", "a", Some(0.62)),
            doc("2", "Subhasita Samgraha", "b", Some(0.41)),
        ];
        let secondary = vec![
            doc("2", "Subhasita Samgraha", "b", Some(0.58)),
            doc("1", "Ananda Marga Ideology and Way of Life", "a", Some(0.30)),
            doc("3", "Namah Shivaya Shantaya", "c", Some(0.25)),
        ];

        let merged = merge_vector_results(primary, secondary);
        let summary: Vec<(&str, f64)> = merged
            .iter()
            .map(|d| (d.id.as_deref().unwrap(), d.score()))
            .collect();
        assert_eq!(summary, vec![("1", 0.62), ("2", 0.58), ("3", 0.25)]);
    }

    #[test]
    fn test_merge_with_empty_side() {
        let only = vec![doc("9", "T", "x", Some(0.9))];
        assert_eq!(merge_vector_results(only.clone(), vec![]), only);
        assert_eq!(merge_vector_results(vec![], only.clone()), only);
    }

    #[tokio::test]
    async fn test_vector_search_passes_threshold_and_cap() {
        let store = Arc::new(FakeStore {
            vector_results: vec![(1.0, vec![doc("1", "T", "x", Some(0.8))])],
            ..FakeStore::default()
        });
        let search = VectorSearch::new(store.clone(), 0.2, 12);

        let docs = search.search(&[1.0, 0.0]).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].provenance, Provenance::Vector);
        assert_eq!(store.vector_calls.lock().unwrap().as_slice(), &[(0.2, 12)]);
    }

    #[tokio::test]
    async fn test_vector_only_failure_is_retrieval_error() {
        let store = Arc::new(FakeStore {
            failing_markers: vec![1.0],
            ..FakeStore::default()
        });
        let retriever = VectorRetriever::new(store, 0.3, 8);
        let request = RetrievalRequest {
            search_query: "what is dharma".into(),
            search_embedding: vec![1.0],
            expanded_embedding: None,
        };

        let err = retriever.retrieve(&request).await.unwrap_err();
        assert!(matches!(err, AppError::RetrievalError { .. }));
        assert_eq!(retriever.mode(), RetrievalMode::Vector);
    }
}

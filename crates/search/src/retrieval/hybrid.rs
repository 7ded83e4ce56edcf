//! Hybrid retrieval combining vector and keyword search
//!
//! All legs run concurrently. A failed leg is logged and contributes nothing;
//! the others still count.

use super::{
    keyword::KeywordSearch,
    vector::{merge_vector_results, VectorSearch},
    CandidatePool, RetrievalLeg, RetrievalRequest, Retriever,
};
use scripture_qa_common::config::RetrievalMode;
use scripture_qa_common::errors::Result;
use scripture_qa_common::metrics::record_retrieval_leg_failure;
use scripture_qa_common::DocumentRecord;
use std::time::Instant;
use tracing::{info, warn};

/// Hybrid retriever: search-vector, expanded-vector and keyword legs
pub struct HybridRetriever {
    vector: VectorSearch,
    keyword: KeywordSearch,
}

impl HybridRetriever {
    /// Create a new hybrid retriever
    pub fn new(vector: VectorSearch, keyword: KeywordSearch) -> Self {
        Self { vector, keyword }
    }
}

fn settle(
    leg: RetrievalLeg,
    result: Result<Vec<DocumentRecord>>,
    failed: &mut Vec<RetrievalLeg>,
) -> Vec<DocumentRecord> {
    match result {
        Ok(docs) => docs,
        Err(e) => {
            warn!(leg = leg.as_str(), error = %e, "Retrieval leg failed, continuing without it");
            record_retrieval_leg_failure(leg.as_str());
            failed.push(leg);
            Vec::new()
        }
    }
}

#[async_trait::async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<CandidatePool> {
        let start = Instant::now();

        let expanded_leg = async {
            match &request.expanded_embedding {
                Some(embedding) => Some(self.vector.search(embedding).await),
                None => None,
            }
        };

        let (search_hits, expanded_hits, keyword_hits) = tokio::join!(
            self.vector.search(&request.search_embedding),
            expanded_leg,
            self.keyword.search(&request.search_query)
        );

        let mut failed_legs = Vec::new();
        let search_hits = settle(RetrievalLeg::SearchVector, search_hits, &mut failed_legs);
        let expanded_hits = expanded_hits
            .map(|r| settle(RetrievalLeg::ExpandedVector, r, &mut failed_legs))
            .unwrap_or_default();
        let keyword = settle(RetrievalLeg::Keyword, keyword_hits, &mut failed_legs);

        let pool = CandidatePool {
            vector: merge_vector_results(search_hits, expanded_hits),
            keyword,
            failed_legs,
        };

        info!(
            vector = pool.vector.len(),
            keyword = pool.keyword.len(),
            failed_legs = pool.failed_legs.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Hybrid retrieval complete"
        );

        Ok(pool)
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Hybrid
    }
}

#[cfg(test)]
mod tests {
    use super::super::keyword::KeywordExtractor;
    use super::super::test_support::{doc, FakeStore};
    use super::*;
    use scripture_qa_common::config::DEFAULT_STOP_WORDS;
    use std::sync::Arc;

    fn retriever(store: Arc<FakeStore>) -> HybridRetriever {
        HybridRetriever::new(
            VectorSearch::new(store.clone(), 0.2, 12),
            KeywordSearch::new(store, KeywordExtractor::new(DEFAULT_STOP_WORDS, 3), 5, 10),
        )
    }

    fn request(expanded: Option<f32>) -> RetrievalRequest {
        RetrievalRequest {
            search_query: "meaning of prana".into(),
            search_embedding: vec![1.0],
            expanded_embedding: expanded.map(|m| vec![m]),
        }
    }

    fn store() -> FakeStore {
        FakeStore {
            corpus: vec![doc("k1", "Prana", "Prana is the vital energy", None)],
            vector_results: vec![
                (1.0, vec![doc("v1", "A", "a", Some(0.6)), doc("v2", "B", "b", Some(0.3))]),
                (2.0, vec![doc("v2", "B", "b", Some(0.5)), doc("v3", "C", "c", Some(0.25))]),
            ],
            ..FakeStore::default()
        }
    }

    #[tokio::test]
    async fn test_all_legs_contribute() {
        let store = Arc::new(store());
        let pool = retriever(store.clone()).retrieve(&request(Some(2.0))).await.unwrap();

        let vector: Vec<(&str, f64)> = pool
            .vector
            .iter()
            .map(|d| (d.id.as_deref().unwrap(), d.score()))
            .collect();
        assert_eq!(vector, vec![("v1", 0.6), ("v2", 0.5), ("v3", 0.25)]);
        assert_eq!(pool.keyword.len(), 1);
        assert!(pool.failed_legs.is_empty());
        assert_eq!(store.vector_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_identical_queries_run_one_vector_leg() {
        let store = Arc::new(store());
        let pool = retriever(store.clone()).retrieve(&request(None)).await.unwrap();

        assert_eq!(pool.vector.len(), 2);
        assert_eq!(store.vector_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_legs_are_treated_as_empty() {
        let store = Arc::new(FakeStore {
            failing_markers: vec![2.0],
            fail_content: true,
            ..store()
        });
        let pool = retriever(store).retrieve(&request(Some(2.0))).await.unwrap();

        assert_eq!(pool.vector.len(), 2);
        assert!(pool.keyword.is_empty());
        assert_eq!(
            pool.failed_legs,
            vec![RetrievalLeg::ExpandedVector, RetrievalLeg::Keyword]
        );
    }

    #[tokio::test]
    async fn test_every_leg_failing_yields_empty_pool() {
        let store = Arc::new(FakeStore {
            failing_markers: vec![1.0, 2.0],
            fail_content: true,
            ..FakeStore::default()
        });
        let retriever = retriever(store);
        let pool = tokio_test::assert_ok!(retriever.retrieve(&request(Some(2.0))).await);

        assert!(pool.is_empty());
        assert_eq!(pool.failed_legs.len(), 3);
        assert_eq!(retriever.mode(), RetrievalMode::Hybrid);
    }
}

//! Result merging
//!
//! Combines vector and keyword candidates into one ranked, deduplicated and
//! bounded context. Sorting is stable, so keyword hits (all scored zero) keep
//! their phrase-then-AND order and land after every scored vector hit.

use super::CandidatePool;
use scripture_qa_common::DocumentRecord;
use std::collections::HashSet;

/// Documents chosen for the prompt, best first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedContext {
    pub documents: Vec<DocumentRecord>,
}

impl RankedContext {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Highest similarity in the context, zero when empty
    pub fn top_similarity(&self) -> f64 {
        self.documents
            .iter()
            .map(DocumentRecord::score)
            .fold(0.0, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.iter()
    }
}

/// Ranks and bounds a candidate pool
#[derive(Debug, Clone, Copy)]
pub struct ResultMerger {
    max_documents: usize,
    max_content_chars: usize,
}

impl ResultMerger {
    pub fn new(max_documents: usize, max_content_chars: usize) -> Self {
        Self {
            max_documents,
            max_content_chars,
        }
    }

    pub fn merge(&self, pool: CandidatePool) -> RankedContext {
        let mut candidates: Vec<DocumentRecord> = pool
            .vector
            .into_iter()
            .chain(pool.keyword)
            .map(|mut doc| {
                doc.similarity = Some(doc.score());
                doc
            })
            .collect();

        // Stable: equal scores keep their insertion order
        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));

        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(self.max_documents.min(candidates.len()));

        for mut doc in candidates {
            if documents.len() == self.max_documents {
                break;
            }
            if !seen.insert(doc.identity_key()) {
                continue;
            }
            doc.truncate_content(self.max_content_chars);
            documents.push(doc);
        }

        RankedContext { documents }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::doc;
    use super::*;
    use scripture_qa_common::Provenance;

    fn merger() -> ResultMerger {
        ResultMerger::new(10, 2500)
    }

    fn scores(context: &RankedContext) -> Vec<f64> {
        context.iter().map(DocumentRecord::score).collect()
    }

    #[test]
    fn test_duplicate_across_pools_keeps_vector_score() {
        let pool = CandidatePool {
            vector: vec![doc("1", "X", "passage", Some(0.9))],
            keyword: vec![doc("1", "X", "passage", None)],
            failed_legs: vec![],
        };

        let context = merger().merge(pool);
        assert_eq!(context.len(), 1);
        assert_eq!(context.documents[0].similarity, Some(0.9));
        assert_eq!(context.documents[0].provenance, Provenance::Vector);
    }

    #[test]
    fn test_ranks_by_similarity_descending() {
        let pool = CandidatePool {
            vector: vec![doc("a", "A", "a", Some(0.3)), doc("c", "C", "c", Some(0.7))],
            keyword: vec![doc("b", "B", "b", None)],
            failed_legs: vec![],
        };

        let context = merger().merge(pool);
        assert_eq!(scores(&context), vec![0.7, 0.3, 0.0]);
    }

    #[test]
    fn test_keyword_hits_keep_insertion_order() {
        let pool = CandidatePool {
            vector: vec![doc("v", "V", "v", Some(0.21))],
            keyword: vec![
                doc("phrase", "P", "p", None),
                doc("and-1", "A1", "a1", None),
                doc("and-2", "A2", "a2", None),
            ],
            failed_legs: vec![],
        };

        let context = merger().merge(pool);
        let ids: Vec<&str> = context.iter().map(|d| d.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["v", "phrase", "and-1", "and-2"]);
        assert!(context.iter().skip(1).all(|d| d.similarity == Some(0.0)));
    }

    #[test]
    fn test_content_truncated_to_budget() {
        let pool = CandidatePool {
            vector: vec![doc("1", "Long", &"a".repeat(3000), Some(0.5))],
            ..CandidatePool::default()
        };

        let context = merger().merge(pool);
        assert_eq!(context.documents[0].content.chars().count(), 2500);
    }

    #[test]
    fn test_caps_at_ten_highest() {
        let vector: Vec<DocumentRecord> = (0..15)
            .map(|i| doc(&i.to_string(), &format!("T{}", i), "x", Some(i as f64 / 100.0)))
            .collect();
        let pool = CandidatePool {
            vector,
            ..CandidatePool::default()
        };

        let context = merger().merge(pool);
        assert_eq!(context.len(), 10);
        let ids: Vec<String> = context.iter().map(|d| d.id.clone().unwrap()).collect();
        let expected: Vec<String> = (5..15).rev().map(|i: i32| i.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_ties_broken_by_input_order_under_cap() {
        let vector: Vec<DocumentRecord> = (0..12)
            .map(|i| doc(&i.to_string(), "Same", &format!("c{}", i), Some(0.5)))
            .collect();
        let context = merger().merge(CandidatePool {
            vector,
            ..CandidatePool::default()
        });
        let ids: Vec<String> = context.iter().map(|d| d.id.clone().unwrap()).collect();
        let expected: Vec<String> = (0..10).map(|i: i32| i.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_dedup_without_id_uses_title_and_prefix() {
        let mut first = doc("", "Shared", "same opening text", None);
        first.id = None;
        let mut second = first.clone();
        second.content.push_str(" with a different ending");
        let mut third = doc("", "Other", "same opening text", None);
        third.id = None;

        let context = merger().merge(CandidatePool {
            keyword: vec![first, second, third],
            ..CandidatePool::default()
        });
        // The first two differ within the first 100 characters
        assert_eq!(context.len(), 3);

        let prefix = "p".repeat(100);
        let mut a = doc("", "Shared", &format!("{}tail-a", prefix), None);
        a.id = None;
        let mut b = doc("", "Shared", &format!("{}tail-b", prefix), None);
        b.id = None;
        let context = merger().merge(CandidatePool {
            keyword: vec![a, b],
            ..CandidatePool::default()
        });
        assert_eq!(context.len(), 1);
        assert!(context.documents[0].content.ends_with("tail-a"));
    }

    #[test]
    fn test_empty_pool_and_top_similarity() {
        let context = merger().merge(CandidatePool::default());
        assert!(context.is_empty());
        assert_eq!(context.top_similarity(), 0.0);

        let context = merger().merge(CandidatePool {
            vector: vec![doc("1", "A", "a", Some(0.44)), doc("2", "B", "b", Some(0.71))],
            ..CandidatePool::default()
        });
        assert_eq!(context.top_similarity(), 0.71);
    }
}

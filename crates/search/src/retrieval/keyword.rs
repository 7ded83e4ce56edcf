//! Keyword leg: phrase match and all-terms match over passage content
//!
//! The query is reduced to its topical words first. Phrase hits outrank
//! all-terms hits, so they are placed first; every hit carries a zero score.

use scripture_qa_common::errors::Result;
use scripture_qa_common::{DocumentRecord, DocumentStore, Provenance};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Reduces a question to its topical words
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    stop_words: HashSet<String>,
    min_len: usize,
}

impl KeywordExtractor {
    pub fn new<S: AsRef<str>>(stop_words: &[S], min_len: usize) -> Self {
        Self {
            stop_words: stop_words.iter().map(|w| w.as_ref().to_lowercase()).collect(),
            min_len,
        }
    }

    /// Lowercased words in query order, without punctuation, stop words or short words
    pub fn extract(&self, query: &str) -> Vec<String> {
        let cleaned: String = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();

        cleaned
            .split_whitespace()
            .filter(|w| w.chars().count() >= self.min_len)
            .filter(|w| !self.stop_words.contains(*w))
            .map(str::to_string)
            .collect()
    }
}

/// Phrase and all-terms pattern search
#[derive(Clone)]
pub struct KeywordSearch {
    store: Arc<dyn DocumentStore>,
    extractor: KeywordExtractor,
    phrase_limit: usize,
    and_limit: usize,
}

impl KeywordSearch {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractor: KeywordExtractor,
        phrase_limit: usize,
        and_limit: usize,
    ) -> Self {
        Self {
            store,
            extractor,
            phrase_limit,
            and_limit,
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<DocumentRecord>> {
        let keywords = self.extractor.extract(query);
        if keywords.is_empty() {
            debug!(query = %query, "No keywords left after filtering");
            return Ok(Vec::new());
        }

        let phrase = vec![keywords.join(" ")];
        let mut terms: Vec<String> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            if !terms.contains(&keyword) {
                terms.push(keyword);
            }
        }

        let (phrase_hits, and_hits) = tokio::try_join!(
            self.store.match_content(&phrase, self.phrase_limit),
            self.store.match_content(&terms, self.and_limit),
        )?;

        debug!(
            keywords = ?terms,
            phrase_hits = phrase_hits.len(),
            and_hits = and_hits.len(),
            "Keyword search complete"
        );

        let mut seen = HashSet::new();
        Ok(phrase_hits
            .into_iter()
            .chain(and_hits)
            .filter(|doc| seen.insert(doc.identity_key()))
            .map(|mut doc| {
                doc.similarity = Some(0.0);
                doc.provenance = Provenance::Keyword;
                doc
            })
            .collect())
    }
}

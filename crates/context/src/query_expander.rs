//! Query expansion
//!
//! Broadens a query with alternate spellings, transliterations and closely
//! related terms. Corpus-wide words ("spiritual", "Baba", ...) match nearly
//! every passage, so they are kept out both in the instruction and after the
//! reply comes back.

use crate::query_rewriter::first_line;
use crate::stage::StageOutcome;
use scripture_qa_common::llm::{ChatMessage, GenerationOptions, LanguageModel};
use scripture_qa_common::metrics::record_stage_fallback;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Appends related search terms to a query
pub struct QueryExpander {
    model: Arc<dyn LanguageModel>,
    options: GenerationOptions,
    max_terms: usize,
    generic_terms: HashSet<String>,
    enabled: bool,
}

impl QueryExpander {
    pub fn new<S: AsRef<str>>(
        model: Arc<dyn LanguageModel>,
        options: GenerationOptions,
        max_terms: usize,
        generic_terms: &[S],
        enabled: bool,
    ) -> Self {
        Self {
            model,
            options,
            max_terms,
            generic_terms: generic_terms
                .iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .collect(),
            enabled,
        }
    }

    /// Expand `query`. Never fails.
    pub async fn expand(&self, query: &str) -> StageOutcome {
        if !self.enabled || self.max_terms == 0 {
            return StageOutcome::Skipped(query.to_string());
        }

        let messages = vec![
            ChatMessage::system(self.instructions()),
            ChatMessage::user(format!("Query: {}", query)),
        ];

        let outcome = match self.model.complete(&messages, &self.options).await {
            Ok(text) => {
                let terms = self.parse_terms(&text, query);
                if terms.is_empty() {
                    StageOutcome::fallback(query, "no usable expansion terms")
                } else {
                    StageOutcome::Applied(format!("{} {}", query, terms.join(" ")))
                }
            }
            Err(e) => StageOutcome::fallback(query, e),
        };

        match &outcome {
            StageOutcome::Fallback { reason, .. } => {
                warn!(reason = %reason, "Query expansion failed, using unexpanded query");
                record_stage_fallback("expansion");
            }
            other => debug!(query = %other.value(), "Query expanded"),
        }

        outcome
    }

    fn instructions(&self) -> String {
        let mut denylist: Vec<&str> = self.generic_terms.iter().map(String::as_str).collect();
        denylist.sort_unstable();

        format!(
            "You expand search queries for a library of spiritual writings. \
             List at most {} alternate spellings, transliterations (including Sanskrit \
             diacritic and plain forms) and closely related specific terms for the query. \
             Do not repeat words already in the query. Never include these overly generic \
             words: {}. Reply with the terms only, comma-separated, on a single line.",
            self.max_terms,
            denylist.join(", ")
        )
    }

    fn parse_terms(&self, reply: &str, query: &str) -> Vec<String> {
        let Some(line) = first_line(reply) else {
            return Vec::new();
        };
        let line = match line.split_once(':') {
            Some((label, rest)) if label.trim().eq_ignore_ascii_case("terms") => rest.to_string(),
            _ => line,
        };

        let query_words: HashSet<String> = query.split_whitespace().filter_map(normalize_word).collect();
        let mut seen = HashSet::new();

        line.split(',')
            .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.').trim())
            .filter(|t| !t.is_empty())
            .filter(|t| !self.generic_terms.contains(&t.to_lowercase()))
            .filter(|t| {
                // Drop terms whose every word is already in the query
                !t.split_whitespace()
                    .filter_map(normalize_word)
                    .all(|w| query_words.contains(&w))
            })
            .filter(|t| seen.insert(t.to_lowercase()))
            .take(self.max_terms)
            .map(str::to_string)
            .collect()
    }
}

fn normalize_word(word: &str) -> Option<String> {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
    (!word.is_empty()).then_some(word)
}

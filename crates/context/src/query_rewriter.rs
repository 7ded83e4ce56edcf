//! Query rewriting
//!
//! Folds conversation context into the latest question so it can be searched
//! on its own ("what did he say about it?" becomes a concrete query). The
//! rewritten text drives retrieval only; the generator still sees the literal
//! question.

use crate::stage::StageOutcome;
use scripture_qa_common::llm::{ChatMessage, GenerationOptions, LanguageModel};
use scripture_qa_common::metrics::record_stage_fallback;
use std::sync::Arc;
use tracing::{debug, warn};

const REWRITE_INSTRUCTIONS: &str = "You rewrite follow-up questions into standalone search queries \
for a library of spiritual writings. Use the conversation to resolve pronouns and carry over the \
topic being discussed. Keep names, Sanskrit terms and book titles exactly as written. \
Reply with the rewritten query only, on a single line, without quotes or explanation. \
If the question is already standalone, repeat it unchanged.";

/// Rewrites the latest question into a standalone search query
pub struct QueryRewriter {
    model: Arc<dyn LanguageModel>,
    options: GenerationOptions,
    history_window: usize,
    enabled: bool,
}

impl QueryRewriter {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        options: GenerationOptions,
        history_window: usize,
        enabled: bool,
    ) -> Self {
        Self {
            model,
            options,
            history_window,
            enabled,
        }
    }

    /// Rewrite `question` given the turns before it. Never fails.
    pub async fn rewrite(&self, prior: &[ChatMessage], question: &str) -> StageOutcome {
        if !self.enabled || prior.is_empty() {
            return StageOutcome::Skipped(question.to_string());
        }

        let messages = vec![
            ChatMessage::system(REWRITE_INSTRUCTIONS),
            ChatMessage::user(self.build_prompt(prior, question)),
        ];

        let outcome = match self.model.complete(&messages, &self.options).await {
            Ok(text) => match first_line(&text) {
                Some(rewritten) => StageOutcome::Applied(rewritten),
                None => StageOutcome::fallback(question, "empty rewrite"),
            },
            Err(e) => StageOutcome::fallback(question, e),
        };

        match &outcome {
            StageOutcome::Fallback { reason, .. } => {
                warn!(reason = %reason, "Query rewrite failed, using original question");
                record_stage_fallback("rewrite");
            }
            other => debug!(query = %other.value(), "Query rewritten"),
        }

        outcome
    }

    fn build_prompt(&self, prior: &[ChatMessage], question: &str) -> String {
        let start = prior.len().saturating_sub(self.history_window);
        let transcript = prior[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Conversation so far:\n{}\n\nLatest question: {}\n\nStandalone search query:",
            transcript, question
        )
    }
}

/// First non-empty line, without surrounding quotes or a leading label
pub(crate) fn first_line(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = match line.split_once(':') {
        Some((label, rest)) if label.eq_ignore_ascii_case("query") => rest.trim(),
        _ => line,
    };
    let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    (!line.is_empty()).then(|| line.to_string())
}

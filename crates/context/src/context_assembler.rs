//! Context assembly
//!
//! Turns a ranked context into the message sequence for answer generation:
//! - the fixed system instruction
//! - prior conversation turns, verbatim
//! - a final user turn with the passages and the literal question
//!
//! Also derives the source list sent to the client, one entry per title.

use scripture_qa_common::{ChatMessage, SourceCitation};
use scripture_qa_search::RankedContext;
use std::collections::HashSet;

/// Persona, grounding rules and the trailer format parsed by the stream relay
pub const SYSTEM_PROMPT: &str = "You are Baba GPT, a respectful, knowledgeable assistant that answers \
questions based EXCLUSIVELY on the writings and teachings of Sri Sri Anandamurti (Baba).

CRITICAL RULES:
1. Prioritize using the provided context passages to answer. Use Baba's own words and phrasing wherever possible.
2. If the provided passages directly address the question, answer using them and cite the sources.
3. If the passages do NOT directly answer the question but contain related teachings, clearly state: \
\"**There is no direct passage addressing this exact question in the retrieved texts.** However, based on \
Baba's related teachings, we can infer the following:\" and then provide a thoughtful inference grounded in \
the available evidence and Baba's broader philosophical framework.
4. Always be transparent about what is a direct quote/teaching vs. what is your inference based on his broader philosophy.
5. Respond in a calm, reverent tone that honors Baba's stature as a spiritual teacher.
6. Format your response clearly. Use bold for key concepts, quotes in blockquotes, and numbered/bulleted lists for clarity.
7. After the answer, on its own line, classify it as exactly one of:
   ANSWER_TYPE: DIRECT (the passages directly address the question)
   ANSWER_TYPE: INFERRED (the answer is inferred from related teachings)
8. At the end of your response, list the sources in this exact format:
   SOURCES:
   - [Title] — [Reference/Section]

Keep answers focused, clear, and grounded in the teachings.";

const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Everything needed to start generation and open the client stream
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    pub sources: Vec<SourceCitation>,
    pub top_similarity: f64,
}

/// Builds generation prompts from ranked passages
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    system_prompt: String,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(SYSTEM_PROMPT)
    }
}

impl ContextAssembler {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// `question` must be the user's literal question, not the rewritten query
    pub fn assemble(
        &self,
        context: &RankedContext,
        prior: &[ChatMessage],
        question: &str,
    ) -> AssembledPrompt {
        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(prior.iter().cloned());
        messages.push(ChatMessage::user(format!(
            "Context passages from Baba's writings:\n\n{}\n\n---\n\nUser question: {}",
            format_passages(context),
            question
        )));

        AssembledPrompt {
            messages,
            sources: collect_sources(context),
            top_similarity: context.top_similarity(),
        }
    }
}

/// Numbered passage blocks joined by a rule
pub fn format_passages(context: &RankedContext) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let reference = match doc.doc_id.as_deref() {
                Some(r) if !r.is_empty() => format!(", Reference: {}", r),
                _ => String::new(),
            };
            format!(
                "[Passage {}] (Source: {}{}, Similarity: {:.3})\n{}",
                i + 1,
                doc.title,
                reference,
                doc.score(),
                doc.content
            )
        })
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

/// One citation per title; the first occurrence's reference wins
pub fn collect_sources(context: &RankedContext) -> Vec<SourceCitation> {
    let mut seen = HashSet::new();
    context
        .iter()
        .filter(|doc| seen.insert(doc.title.as_str()))
        .map(|doc| doc.citation())
        .collect()
}

//! The question being answered and the turns that came before it

use scripture_qa_common::errors::{AppError, Result};
use scripture_qa_common::ChatMessage;

/// A question plus its prior turns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// The literal question shown to the generator
    pub question: String,

    /// Earlier turns, oldest first, excluding the question's own turn
    pub prior: Vec<ChatMessage>,
}

impl Conversation {
    /// Resolve an inbound request.
    ///
    /// `messages` is the full conversation with the latest turn last. The
    /// question is `query` when given, else the content of that last turn.
    pub fn from_request(query: Option<&str>, messages: &[ChatMessage]) -> Result<Self> {
        let question = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .or_else(|| {
                messages
                    .last()
                    .map(|m| m.content.trim())
                    .filter(|c| !c.is_empty())
            })
            .ok_or_else(|| AppError::MissingField {
                field: "query".to_string(),
            })?
            .to_string();

        let prior = match messages.split_last() {
            Some((_, earlier)) => earlier.to_vec(),
            None => Vec::new(),
        };

        Ok(Self { question, prior })
    }

    /// Turns in the conversation, counting the question
    pub fn turn_count(&self) -> usize {
        self.prior.len() + 1
    }
}

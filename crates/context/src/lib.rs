//! scripture-qa answer composition
//!
//! Turns a conversation into a grounded, streamed answer:
//! - Query rewriting and expansion (best-effort stages)
//! - Context assembly over the ranked passages
//! - The event-stream protocol, its relay and its consumer
//! - `AnswerPipeline`, which wires these to the retrieval crate

pub mod context_assembler;
pub mod conversation;
pub mod pipeline;
pub mod query_expander;
pub mod query_rewriter;
pub mod stage;
pub mod stream;

pub use context_assembler::{AssembledPrompt, ContextAssembler};
pub use conversation::Conversation;
pub use pipeline::{AnswerPipeline, EmptyAnswer, PipelineOutcome};
pub use query_expander::QueryExpander;
pub use query_rewriter::QueryRewriter;
pub use stage::StageOutcome;
pub use stream::{AnswerType, StreamEvent};

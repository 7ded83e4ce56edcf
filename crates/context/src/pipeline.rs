//! End-to-end answer pipeline
//!
//! rewrite → expand → embed → retrieve → merge → assemble → generate → relay
//!
//! Rewrite and expansion are best-effort. Embedding, retrieval setup and the
//! generation call are fatal and surface before any byte is streamed. An
//! empty merged context short-circuits to a canned answer without calling
//! the generator.

use crate::context_assembler::ContextAssembler;
use crate::conversation::Conversation;
use crate::query_expander::QueryExpander;
use crate::query_rewriter::QueryRewriter;
use crate::stream::{AnswerType, MetadataEvent, StreamRelay};
use bytes::Bytes;
use futures::Stream;
use scripture_qa_common::config::{AppConfig, RetrievalMode};
use scripture_qa_common::errors::{AppError, Result};
use scripture_qa_common::llm::{GenerationOptions, LanguageModel};
use scripture_qa_common::metrics::{record_chat_request, record_retrieval};
use scripture_qa_common::{DocumentStore, Embedder, SourceCitation};
use scripture_qa_search::{
    HybridRetriever, KeywordExtractor, KeywordSearch, ResultMerger, RetrievalRequest, Retriever,
    VectorRetriever, VectorSearch,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Answer given when retrieval finds nothing
pub const NO_PASSAGES_ANSWER: &str = "I could not find relevant passages in Baba's writings for this question. \
Please try rephrasing or exploring a related topic.";

/// Event-stream body for a successful answer
pub type AnswerStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, Infallible>> + Send>>;

/// Non-streamed reply when no passages matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyAnswer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
}

impl EmptyAnswer {
    pub fn no_passages() -> Self {
        Self {
            answer: NO_PASSAGES_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

pub enum PipelineOutcome {
    /// Nothing retrieved; no generation call was made
    Empty(EmptyAnswer),
    /// Generation started; frames for the client
    Stream(AnswerStream),
}

/// Answers one conversation at a time; holds no per-request state
pub struct AnswerPipeline {
    mode: RetrievalMode,
    rewriter: QueryRewriter,
    expander: QueryExpander,
    embedder: Arc<dyn Embedder>,
    retriever: Box<dyn Retriever>,
    merger: ResultMerger,
    assembler: ContextAssembler,
    model: Arc<dyn LanguageModel>,
    answer_options: GenerationOptions,
}

impl AnswerPipeline {
    pub fn new(
        config: &AppConfig,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let retrieval = &config.retrieval;
        let auxiliary = GenerationOptions::auxiliary(&config.generation);

        let retriever: Box<dyn Retriever> = match retrieval.mode {
            RetrievalMode::Hybrid => Box::new(HybridRetriever::new(
                VectorSearch::new(store.clone(), retrieval.similarity_threshold, retrieval.match_count),
                KeywordSearch::new(
                    store,
                    KeywordExtractor::new(&retrieval.stop_words, retrieval.min_keyword_len),
                    retrieval.phrase_match_limit,
                    retrieval.and_match_limit,
                ),
            )),
            RetrievalMode::Vector => Box::new(VectorRetriever::new(
                store,
                retrieval.vector_only_threshold,
                retrieval.vector_only_match_count,
            )),
        };

        Self {
            mode: retrieval.mode,
            rewriter: QueryRewriter::new(
                model.clone(),
                auxiliary.clone(),
                retrieval.history_window,
                retrieval.rewrite_enabled,
            ),
            expander: QueryExpander::new(
                model.clone(),
                auxiliary,
                retrieval.max_expansion_terms,
                &retrieval.generic_terms,
                retrieval.expansion_enabled,
            ),
            embedder,
            retriever,
            merger: ResultMerger::new(retrieval.max_context_documents, retrieval.max_content_chars),
            assembler: ContextAssembler::default(),
            model,
            answer_options: GenerationOptions::answer(&config.generation),
        }
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// Answer the conversation's latest question
    #[instrument(skip_all, fields(mode = self.mode.as_str(), turns = conversation.turn_count()))]
    pub async fn answer(&self, conversation: &Conversation) -> Result<PipelineOutcome> {
        let result = self.run(conversation).await;
        record_chat_request(match &result {
            Ok(PipelineOutcome::Stream(_)) => "streamed",
            Ok(PipelineOutcome::Empty(_)) => "empty",
            Err(_) => "error",
        });
        result
    }

    async fn run(&self, conversation: &Conversation) -> Result<PipelineOutcome> {
        let rewrite = self
            .rewriter
            .rewrite(&conversation.prior, &conversation.question)
            .await;
        let rewrite_label = rewrite.label();
        let search_query = rewrite.into_value();

        let (expanded_query, expansion_label) = match self.mode {
            RetrievalMode::Hybrid => {
                let expansion = self.expander.expand(&search_query).await;
                let label = expansion.label();
                (expansion.into_value(), label)
            }
            RetrievalMode::Vector => (search_query.clone(), "skipped"),
        };

        debug!(
            search_query = %search_query,
            expanded_query = %expanded_query,
            rewrite = rewrite_label,
            expansion = expansion_label,
            "Queries prepared"
        );

        let (search_embedding, expanded_embedding) =
            self.embed_queries(&search_query, &expanded_query).await?;

        let start = Instant::now();
        let pool = self
            .retriever
            .retrieve(&RetrievalRequest {
                search_query,
                search_embedding,
                expanded_embedding,
            })
            .await?;
        let context = self.merger.merge(pool);
        record_retrieval(start.elapsed().as_secs_f64(), self.mode.as_str(), context.len());

        if context.is_empty() {
            info!("No passages matched, returning canned answer");
            return Ok(PipelineOutcome::Empty(EmptyAnswer::no_passages()));
        }

        let prompt = self
            .assembler
            .assemble(&context, &conversation.prior, &conversation.question);

        info!(
            documents = context.len(),
            sources = prompt.sources.len(),
            top_similarity = prompt.top_similarity,
            "Context assembled, starting generation"
        );

        let upstream = self.model.stream(&prompt.messages, &self.answer_options).await?;

        let metadata = MetadataEvent {
            sources: prompt.sources,
            answer_type: Some(AnswerType::default()),
            top_similarity: prompt.top_similarity,
        };

        Ok(PipelineOutcome::Stream(Box::pin(
            StreamRelay::new(upstream, metadata).into_stream(),
        )))
    }

    /// One embedding when the queries match, two concurrent ones otherwise
    async fn embed_queries(&self, search: &str, expanded: &str) -> Result<(Vec<f32>, Option<Vec<f32>>)> {
        if search == expanded {
            return Ok((self.embed(search).await?, None));
        }

        let (search_embedding, expanded_embedding) =
            tokio::try_join!(self.embed(search), self.embed(expanded))?;
        Ok((search_embedding, Some(expanded_embedding)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(text)
            .await
            .map_err(|e| AppError::RetrievalError {
                message: format!("Failed to generate query embedding: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use scripture_qa_common::db::TableDescription;
    use scripture_qa_common::llm::ByteStream;
    use scripture_qa_common::{ChatMessage, DocumentRecord, Provenance};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        vector: Vec<DocumentRecord>,
        keyword: Vec<DocumentRecord>,
        vector_calls: Mutex<Vec<(f64, usize)>>,
        content_calls: Mutex<usize>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn match_documents(&self, _: &[f32], threshold: f64, count: usize) -> Result<Vec<DocumentRecord>> {
            self.vector_calls.lock().unwrap().push((threshold, count));
            Ok(self.vector.clone())
        }

        async fn match_content(&self, _: &[String], _: usize) -> Result<Vec<DocumentRecord>> {
            *self.content_calls.lock().unwrap() += 1;
            Ok(self.keyword.clone())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn describe_tables(&self) -> Result<Vec<TableDescription>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeEmbedder {
        fail: bool,
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.texts.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(AppError::EmbeddingError {
                    message: "API error 401".into(),
                });
            }
            Ok(vec![text.len() as f32, 0.5])
        }

        fn model_name(&self) -> &str {
            "fake"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// `complete` answers with `reply` or fails; `stream` yields a short answer
    struct ScriptedModel {
        reply: Option<String>,
        completions: Mutex<usize>,
        streamed: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(String::from),
                completions: Mutex::new(0),
                streamed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _: &[ChatMessage], _: &GenerationOptions) -> Result<String> {
            *self.completions.lock().unwrap() += 1;
            self.reply.clone().ok_or_else(|| AppError::GenerationError {
                message: "API error 503".into(),
            })
        }

        async fn stream(&self, messages: &[ChatMessage], _: &GenerationOptions) -> Result<ByteStream> {
            self.streamed.lock().unwrap().push(messages.to_vec());
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Dharma is innate.\\n\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ANSWER_TYPE: DIRECT\"}}]}\n\n",
                "data: [DONE]\n\n",
            );
            Ok(Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))])))
        }
    }

    fn doc(id: &str, title: &str, similarity: Option<f64>) -> DocumentRecord {
        DocumentRecord {
            id: Some(id.into()),
            title: title.into(),
            content: format!("passage {}", id),
            doc_id: Some(format!("Part {}", id)),
            similarity,
            provenance: if similarity.is_some() { Provenance::Vector } else { Provenance::Keyword },
        }
    }

    fn pipeline(
        mode: RetrievalMode,
        model: Arc<ScriptedModel>,
        embedder: Arc<FakeEmbedder>,
        store: Arc<FakeStore>,
    ) -> AnswerPipeline {
        let mut config = AppConfig::default();
        config.retrieval.mode = mode;
        AnswerPipeline::new(&config, model, embedder, store)
    }

    fn question(q: &str) -> Conversation {
        Conversation::from_request(None, &[ChatMessage::user(q)]).unwrap()
    }

    async fn body(outcome: PipelineOutcome) -> String {
        let PipelineOutcome::Stream(stream) = outcome else {
            panic!("expected a stream");
        };
        let frames: Vec<Bytes> = stream
            .map(|frame| match frame {
                Ok(bytes) => bytes,
                Err(never) => match never {},
            })
            .collect()
            .await;
        String::from_utf8(frames.concat()).unwrap()
    }

    #[tokio::test]
    async fn test_zero_results_skip_generation() {
        let model = ScriptedModel::new(None);
        let pipeline = pipeline(
            RetrievalMode::Hybrid,
            model.clone(),
            Arc::new(FakeEmbedder::default()),
            Arc::new(FakeStore::default()),
        );

        let outcome = tokio_test::assert_ok!(pipeline.answer(&question("What is dharma?")).await);
        match outcome {
            PipelineOutcome::Empty(empty) => {
                assert_eq!(empty.answer, NO_PASSAGES_ANSWER);
                assert!(empty.sources.is_empty());
            }
            PipelineOutcome::Stream(_) => panic!("expected the canned answer"),
        }
        assert!(model.streamed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_streams_answer_with_metadata_first() {
        let model = ScriptedModel::new(None);
        let store = Arc::new(FakeStore {
            vector: vec![doc("1", "Subháśita Saḿgraha", Some(0.7)), doc("2", "Subháśita Saḿgraha", Some(0.4))],
            keyword: vec![doc("3", "Ananda Sutram", None)],
            ..FakeStore::default()
        });
        let pipeline = pipeline(RetrievalMode::Hybrid, model.clone(), Arc::new(FakeEmbedder::default()), store);

        let output = body(pipeline.answer(&question("What is dharma?")).await.unwrap()).await;

        assert!(output.starts_with("data: {\"type\":\"metadata\""));
        assert!(output.contains("\"topSimilarity\":0.7"));
        assert_eq!(output.matches("\"title\":\"Subháśita Saḿgraha\"").count(), 1);
        assert!(output.contains("Dharma is innate."));
        assert!(output.contains("{\"type\":\"answerTypeUpdate\",\"answerType\":\"direct\"}"));
        assert!(output.ends_with("data: [DONE]\n\n"));
        assert_eq!(output.matches("[DONE]").count(), 1);

        let streamed = model.streamed.lock().unwrap();
        let user_turn = &streamed[0].last().unwrap().content;
        assert!(user_turn.ends_with("User question: What is dharma?"));
        assert!(user_turn.contains("[Passage 3] (Source: Ananda Sutram"));
    }

    #[tokio::test]
    async fn test_stage_failures_fall_back_to_question() {
        let model = ScriptedModel::new(None);
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(FakeStore {
            vector: vec![doc("1", "Ananda Vacanamrtam", Some(0.5))],
            ..FakeStore::default()
        });
        let pipeline = pipeline(RetrievalMode::Hybrid, model.clone(), embedder.clone(), store);

        let messages = vec![
            ChatMessage::user("Who is Shiva?"),
            ChatMessage::assistant("Shiva is..."),
            ChatMessage::user("What did he teach?"),
        ];
        let conversation = Conversation::from_request(None, &messages).unwrap();

        let outcome = pipeline.answer(&conversation).await;
        assert!(matches!(outcome, Ok(PipelineOutcome::Stream(_))));

        // Rewrite and expansion both failed; the literal question was embedded once
        assert_eq!(*model.completions.lock().unwrap(), 2);
        assert_eq!(*embedder.texts.lock().unwrap(), vec!["What did he teach?".to_string()]);
    }

    #[tokio::test]
    async fn test_expansion_embeds_both_queries() {
        let model = ScriptedModel::new(Some("Parama Purusa, Supreme Consciousness"));
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(FakeStore {
            vector: vec![doc("1", "Ananda Sutram", Some(0.6))],
            ..FakeStore::default()
        });
        let pipeline = pipeline(RetrievalMode::Hybrid, model, embedder.clone(), store.clone());

        pipeline.answer(&question("brahma")).await.unwrap();

        let mut texts = embedder.texts.lock().unwrap().clone();
        texts.sort();
        assert_eq!(
            texts,
            vec![
                "brahma".to_string(),
                "brahma Parama Purusa Supreme Consciousness".to_string()
            ]
        );
        assert_eq!(store.vector_calls.lock().unwrap().len(), 2);
        assert_eq!(*store.content_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let model = ScriptedModel::new(None);
        let embedder = Arc::new(FakeEmbedder {
            fail: true,
            ..FakeEmbedder::default()
        });
        let store = Arc::new(FakeStore {
            vector: vec![doc("1", "Ananda Sutram", Some(0.6))],
            ..FakeStore::default()
        });
        let pipeline = pipeline(RetrievalMode::Hybrid, model.clone(), embedder, store);

        let result = pipeline.answer(&question("What is samadhi?")).await;
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, AppError::RetrievalError { .. }));
        assert!(model.streamed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_mode_uses_single_leg() {
        let model = ScriptedModel::new(Some("should not be asked"));
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(FakeStore {
            vector: vec![doc("1", "Ananda Sutram", Some(0.6))],
            ..FakeStore::default()
        });
        let pipeline = pipeline(RetrievalMode::Vector, model.clone(), embedder.clone(), store.clone());
        assert_eq!(pipeline.mode(), RetrievalMode::Vector);

        let output = body(pipeline.answer(&question("What is kiirtana?")).await.unwrap()).await;
        assert!(output.ends_with("data: [DONE]\n\n"));

        assert_eq!(*model.completions.lock().unwrap(), 0);
        assert_eq!(embedder.texts.lock().unwrap().len(), 1);
        assert_eq!(*store.vector_calls.lock().unwrap(), vec![(0.3, 8)]);
        assert_eq!(*store.content_calls.lock().unwrap(), 0);
    }
}

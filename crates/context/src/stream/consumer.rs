//! Stream consumer
//!
//! Client side of the chat endpoint. `EventDecoder` turns arbitrary byte
//! chunks into events; `ChatClient` posts a question and routes the decoded
//! events to a `StreamHandler`.

use super::{
    AnswerType, EventParser, LineBuffer, MalformedEvent, MetadataEvent, StreamEvent,
};
use crate::pipeline::EmptyAnswer;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use scripture_qa_common::errors::{AppError, Result};
use scripture_qa_common::{ChatMessage, SourceCitation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Incremental decoder for the event stream.
///
/// The first `[DONE]` ends the stream; anything after it is ignored.
#[derive(Debug, Default)]
pub struct EventDecoder {
    lines: LineBuffer,
    parser: EventParser,
    done: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<std::result::Result<StreamEvent, MalformedEvent>> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.lines.push(chunk);
        while let Some(line) = self.lines.next_line() {
            self.decode_line(&line, &mut events);
            if self.done {
                break;
            }
        }
        events
    }

    /// Best-effort flush once input has ended without a sentinel
    pub fn finish(&mut self) -> Vec<std::result::Result<StreamEvent, MalformedEvent>> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let rest = self.lines.take_remainder();
        if !rest.is_empty() {
            self.decode_line(&rest, &mut events);
        }
        if !self.done {
            if let Some(e) = self.parser.finish() {
                events.push(Err(e));
            }
        }
        events
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(
        &mut self,
        line: &[u8],
        events: &mut Vec<std::result::Result<StreamEvent, MalformedEvent>>,
    ) {
        match self.parser.feed(&String::from_utf8_lossy(line)) {
            Ok(Some(StreamEvent::Done)) => {
                self.done = true;
                self.lines = LineBuffer::default();
                events.push(Ok(StreamEvent::Done));
            }
            Ok(Some(event)) => events.push(Ok(event)),
            Ok(None) => {}
            Err(e) => events.push(Err(e)),
        }
    }
}

/// Callbacks for one streamed answer
pub trait StreamHandler: Send {
    /// A piece of answer text
    fn on_delta(&mut self, content: &str);

    /// Passages the answer draws on; arrives before any text
    fn on_sources(&mut self, sources: &[SourceCitation]);

    /// Final classification, once the answer is complete
    fn on_answer_type(&mut self, _answer_type: AnswerType) {}

    /// Called exactly once when the stream completes
    fn on_done(&mut self);

    fn on_error(&mut self, _error: &AppError) {}
}

/// Route one decoded event; returns true on the sentinel
fn dispatch<H: StreamHandler + ?Sized>(
    handler: &mut H,
    event: std::result::Result<StreamEvent, MalformedEvent>,
) -> bool {
    match event {
        Ok(StreamEvent::Metadata(MetadataEvent { sources, .. })) => handler.on_sources(&sources),
        Ok(StreamEvent::TokenDelta(delta)) => {
            if let Some(content) = delta.content() {
                handler.on_delta(content);
            }
        }
        Ok(StreamEvent::AnswerTypeUpdate(update)) => handler.on_answer_type(update.answer_type),
        Ok(StreamEvent::Done) => return true,
        Err(e) => debug!(kind = ?e.kind, detail = %e.detail, "Skipping malformed event"),
    }
    false
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the chat endpoint
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// `connect_timeout` bounds connection setup only; streams run as long as the server keeps sending
    pub fn with_timeout(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/v2/chat", base_url.trim_end_matches('/')),
        })
    }

    /// Ask `query` with the conversation so far and stream the answer into `handler`.
    ///
    /// `messages` should end with the question itself. Errors are reported
    /// through `on_error` and returned.
    pub async fn stream_chat<H: StreamHandler + ?Sized>(
        &self,
        query: &str,
        messages: &[ChatMessage],
        handler: &mut H,
    ) -> Result<()> {
        let result = self.run(query, messages, handler).await;
        if let Err(e) = &result {
            warn!(error = %e, "Chat request failed");
            handler.on_error(e);
        }
        result
    }

    async fn run<H: StreamHandler + ?Sized>(
        &self,
        query: &str,
        messages: &[ChatMessage],
        handler: &mut H,
    ) -> Result<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ChatRequest { query, messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .map(|body| body.error)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

            return Err(if status.is_client_error() {
                AppError::Validation {
                    message,
                    field: None,
                }
            } else {
                AppError::ServiceUnavailable { message }
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let empty: EmptyAnswer = response.json().await?;
            handler.on_sources(&empty.sources);
            handler.on_delta(&empty.answer);
            handler.on_done();
            return Ok(());
        }

        let mut decoder = EventDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Deliver whatever arrived intact before failing
                    for event in decoder.finish() {
                        dispatch(handler, event);
                    }
                    return Err(e.into());
                }
            };

            for event in decoder.push(&chunk) {
                dispatch(handler, event);
            }
            if decoder.is_done() {
                break;
            }
        }

        if !decoder.is_done() {
            debug!("Stream closed without sentinel, flushing");
            for event in decoder.finish() {
                dispatch(handler, event);
            }
        }

        handler.on_done();
        Ok(())
    }
}

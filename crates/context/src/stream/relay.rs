//! Stream relay and tag extractor
//!
//! Sits between the provider's completion stream and the client:
//! - emits the `metadata` event first
//! - forwards each complete provider line byte-for-byte
//! - accumulates the answer text from the token deltas it forwards
//! - once the provider ends, emits `answerTypeUpdate` and the only `[DONE]`
//!
//! The provider's own `[DONE]` is withheld so the client never sees a
//! sentinel before `answerTypeUpdate`.

use super::{
    AnswerType, AnswerTypeUpdateEvent, ControlEvent, EventParser, LineBuffer, MetadataEvent,
    StreamEvent,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use scripture_qa_common::llm::ByteStream;
use scripture_qa_common::metrics::record_answer_type;
use std::collections::VecDeque;
use std::convert::Infallible;
use tracing::{debug, info, warn};

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Relay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Metadata not yet sent
    Open,
    /// Forwarding provider lines
    Streaming,
    /// Provider finished; trailer and sentinel queued
    Done,
    /// Provider stream broke; closes without a sentinel
    Error,
}

/// Per-request relay over one provider stream
pub struct StreamRelay {
    upstream: ByteStream,
    metadata: Option<MetadataEvent>,
    lines: LineBuffer,
    parser: EventParser,
    answer: String,
    outbox: VecDeque<Bytes>,
    state: RelayState,
}

impl StreamRelay {
    pub fn new(upstream: ByteStream, metadata: MetadataEvent) -> Self {
        Self {
            upstream,
            metadata: Some(metadata),
            lines: LineBuffer::default(),
            parser: EventParser::default(),
            answer: String::new(),
            outbox: VecDeque::new(),
            state: RelayState::Open,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Answer text accumulated so far
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Next frame for the client; `None` once the relay has closed
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.outbox.pop_front() {
                return Some(frame);
            }

            match self.state {
                RelayState::Open => {
                    if let Some(metadata) = self.metadata.take() {
                        let frame = ControlEvent::Metadata(metadata).to_frame();
                        self.outbox.push_back(Bytes::from(frame));
                    }
                    self.state = RelayState::Streaming;
                }
                RelayState::Streaming => {
                    if let Some(line) = self.lines.next_line() {
                        self.relay_line(line);
                        continue;
                    }

                    match self.upstream.next().await {
                        Some(Ok(chunk)) => self.lines.push(&chunk),
                        Some(Err(e)) => {
                            warn!(
                                error = %e,
                                answer_chars = self.answer.chars().count(),
                                "Provider stream failed, closing without sentinel"
                            );
                            self.state = RelayState::Error;
                        }
                        None => {
                            let mut rest = self.lines.take_remainder();
                            if !rest.iter().all(u8::is_ascii_whitespace) {
                                rest.push(b'\n');
                                self.relay_line(rest);
                            }
                            self.finish();
                        }
                    }
                }
                RelayState::Done | RelayState::Error => return None,
            }
        }
    }

    fn relay_line(&mut self, line: Vec<u8>) {
        let withheld = match self.parser.feed(&String::from_utf8_lossy(&line)) {
            Ok(Some(StreamEvent::TokenDelta(delta))) => {
                if let Some(content) = delta.content() {
                    self.answer.push_str(content);
                }
                false
            }
            Ok(Some(StreamEvent::Done)) => true,
            Ok(_) => false,
            Err(e) => {
                debug!(kind = ?e.kind, detail = %e.detail, "Unparseable provider line forwarded as is");
                false
            }
        };

        if !withheld {
            self.outbox.push_back(Bytes::from(line));
        }
    }

    fn finish(&mut self) {
        if let Some(e) = self.parser.finish() {
            debug!(detail = %e.detail, "Provider stream ended mid-payload");
        }

        let answer_type = AnswerType::detect(&self.answer);
        record_answer_type(answer_type.as_str());
        info!(
            answer_chars = self.answer.chars().count(),
            answer_type = answer_type.as_str(),
            "Answer stream complete"
        );

        let update = ControlEvent::AnswerTypeUpdate(AnswerTypeUpdateEvent { answer_type });
        self.outbox.push_back(Bytes::from(update.to_frame()));
        self.outbox.push_back(Bytes::from_static(DONE_FRAME));
        self.state = RelayState::Done;
    }

    /// Drive the relay as a response body stream
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::unfold(self, |mut relay| async move {
            relay.next_frame().await.map(|frame| (Ok(frame), relay))
        })
    }
}

//! Event-stream protocol shared by the relay and the consumer
//!
//! Every event is a `data: <payload>` line followed by a blank line. Payloads
//! are one of:
//! - `{"type":"metadata","sources":[...],"answerType":"inferred","topSimilarity":0.71}`
//! - a provider token delta `{"choices":[{"delta":{"content":"..."}}]}`
//! - `{"type":"answerTypeUpdate","answerType":"direct"}`
//! - the literal `[DONE]`

mod consumer;
mod relay;
mod tags;

pub use consumer::{ChatClient, EventDecoder, StreamHandler};
pub use relay::{RelayState, StreamRelay};
pub use tags::{AnswerEnvelope, AnswerType};

use scripture_qa_common::SourceCitation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Sentinel payload ending a stream
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Held payloads larger than this are given up on
const MAX_PENDING_PAYLOAD: usize = 64 * 1024;

/// Sent once, before any token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEvent {
    #[serde(default)]
    pub sources: Vec<SourceCitation>,

    /// Placeholder until the answer is complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<AnswerType>,

    #[serde(default)]
    pub top_similarity: f64,
}

/// Sent once, after the last token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerTypeUpdateEvent {
    pub answer_type: AnswerType,
}

/// Events the service synthesizes around the provider's tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlEvent {
    #[serde(rename = "metadata", alias = "sources")]
    Metadata(MetadataEvent),

    #[serde(rename = "answerTypeUpdate")]
    AnswerTypeUpdate(AnswerTypeUpdateEvent),
}

impl ControlEvent {
    /// Encode as one complete event frame
    pub fn to_frame(&self) -> String {
        // Serializing these plain structs cannot fail
        let payload = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", payload)
    }
}

/// A token delta in the provider's wrapped shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDeltaEvent {
    pub choices: Vec<DeltaChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TokenDeltaEvent {
    /// Text carried by the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// One classified line of the stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Metadata(MetadataEvent),
    TokenDelta(TokenDeltaEvent),
    AnswerTypeUpdate(AnswerTypeUpdateEvent),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// JSON ended early; more data may complete it
    Incomplete,
    /// Valid JSON that is not a known event
    UnexpectedShape,
    /// Not JSON
    InvalidJson,
}

/// A `data:` payload that could not be classified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed event ({kind:?}): {detail}")]
pub struct MalformedEvent {
    pub kind: MalformedKind,
    pub payload: String,
    pub detail: String,
}

impl MalformedEvent {
    fn new(kind: MalformedKind, payload: &str, detail: impl ToString) -> Self {
        Self {
            kind,
            payload: payload.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Payload of a `data:` line, or `None` for comments, blanks and other fields
pub fn data_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_end())
}

/// Classify one `data:` payload
pub fn parse_payload(payload: &str) -> Result<StreamEvent, MalformedEvent> {
    let payload = payload.trim();
    if payload == DONE_PAYLOAD {
        return Ok(StreamEvent::Done);
    }

    let value: Value = serde_json::from_str(payload).map_err(|e| {
        let kind = if e.is_eof() {
            MalformedKind::Incomplete
        } else {
            MalformedKind::InvalidJson
        };
        MalformedEvent::new(kind, payload, e)
    })?;

    let shape_error = |e: serde_json::Error| MalformedEvent::new(MalformedKind::UnexpectedShape, payload, e);

    if value.get("type").is_some() {
        return match serde_json::from_value::<ControlEvent>(value).map_err(shape_error)? {
            ControlEvent::Metadata(event) => Ok(StreamEvent::Metadata(event)),
            ControlEvent::AnswerTypeUpdate(event) => Ok(StreamEvent::AnswerTypeUpdate(event)),
        };
    }

    if value.get("choices").is_some() {
        return serde_json::from_value::<TokenDeltaEvent>(value)
            .map(StreamEvent::TokenDelta)
            .map_err(shape_error);
    }

    Err(MalformedEvent::new(
        MalformedKind::UnexpectedShape,
        payload,
        "neither a typed event nor a token delta",
    ))
}

/// Classify one complete line; `Ok(None)` for lines that carry no event
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, MalformedEvent> {
    match data_payload(line) {
        Some(payload) if !payload.is_empty() => parse_payload(payload).map(Some),
        _ => Ok(None),
    }
}

/// Splits arbitrary byte chunks into complete lines.
///
/// Works on bytes so a multi-byte character split across chunks is only
/// decoded once whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line including its `\n`
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        Some(self.buf.drain(..=end).collect())
    }

    /// Whatever is left after the last `\n`
    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Line parser that holds payloads whose JSON is still incomplete.
///
/// A held payload is joined with the next line (SSE joins consecutive data
/// lines with `\n`) and retried. A blank line ends the event, so a payload
/// still incomplete at that point is reported.
#[derive(Debug, Default)]
pub struct EventParser {
    pending: Option<String>,
}

impl EventParser {
    pub fn feed(&mut self, line: &str) -> Result<Option<StreamEvent>, MalformedEvent> {
        let line = line.trim_end_matches(['\n', '\r']);

        let Some(held) = self.pending.take() else {
            return match parse_line(line) {
                Err(e) if e.kind == MalformedKind::Incomplete => {
                    self.pending = Some(e.payload);
                    Ok(None)
                }
                other => other,
            };
        };

        if line.trim().is_empty() {
            return Err(MalformedEvent::new(
                MalformedKind::Incomplete,
                &held,
                "event ended before its payload was complete",
            ));
        }

        let continuation = data_payload(line).unwrap_or(line);
        let joined = format!("{}\n{}", held, continuation);
        match parse_payload(&joined) {
            Err(e) if e.kind == MalformedKind::Incomplete && joined.len() < MAX_PENDING_PAYLOAD => {
                self.pending = Some(joined);
                Ok(None)
            }
            other => other.map(Some),
        }
    }

    /// Report a payload still held when input ends
    pub fn finish(&mut self) -> Option<MalformedEvent> {
        self.pending.take().map(|held| {
            MalformedEvent::new(MalformedKind::Incomplete, &held, "stream ended mid-payload")
        })
    }

    pub fn is_holding(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_delta() {
        let event = parse_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#)
            .unwrap()
            .unwrap();
        match event {
            StreamEvent::TokenDelta(delta) => assert_eq!(delta.content(), Some("Hello")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_role_only_delta_has_no_content() {
        let event = parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
            .unwrap()
            .unwrap();
        match event {
            StreamEvent::TokenDelta(delta) => assert_eq!(delta.content(), None),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_metadata_and_legacy_sources_event() {
        let line = r#"data: {"type":"metadata","sources":[{"title":"Ananda Vacanamrtam","reference":"Part 4"}],"answerType":"inferred","topSimilarity":0.42}"#;
        match parse_line(line).unwrap().unwrap() {
            StreamEvent::Metadata(meta) => {
                assert_eq!(meta.sources.len(), 1);
                assert_eq!(meta.answer_type, Some(AnswerType::Inferred));
                assert_eq!(meta.top_similarity, 0.42);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let legacy = r#"data: {"type":"sources","sources":[]}"#;
        match parse_line(legacy).unwrap().unwrap() {
            StreamEvent::Metadata(meta) => assert_eq!(meta.answer_type, None),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_answer_type_update_and_done() {
        let line = r#"data: {"type":"answerTypeUpdate","answerType":"direct"}"#;
        assert_eq!(
            parse_line(line).unwrap(),
            Some(StreamEvent::AnswerTypeUpdate(AnswerTypeUpdateEvent {
                answer_type: AnswerType::Direct
            }))
        );
        assert_eq!(parse_line("data: [DONE]").unwrap(), Some(StreamEvent::Done));
        assert_eq!(parse_line("data:[DONE]\r").unwrap(), Some(StreamEvent::Done));
    }

    #[test]
    fn test_non_data_lines_are_ignored() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_line("event: message").unwrap(), None);
        assert_eq!(parse_line("data: ").unwrap(), None);
    }

    #[test]
    fn test_malformed_kinds() {
        let incomplete = parse_line(r#"data: {"choices":[{"delta":{"content":"Hel"#).unwrap_err();
        assert_eq!(incomplete.kind, MalformedKind::Incomplete);

        let invalid = parse_line("data: {broken json}").unwrap_err();
        assert_eq!(invalid.kind, MalformedKind::InvalidJson);

        let shape = parse_line(r#"data: {"type":"telemetry"}"#).unwrap_err();
        assert_eq!(shape.kind, MalformedKind::UnexpectedShape);

        let unknown = parse_line(r#"data: {"hello":"world"}"#).unwrap_err();
        assert_eq!(unknown.kind, MalformedKind::UnexpectedShape);
    }

    #[test]
    fn test_control_event_frames() {
        let frame = ControlEvent::AnswerTypeUpdate(AnswerTypeUpdateEvent {
            answer_type: AnswerType::Direct,
        })
        .to_frame();
        assert_eq!(frame, "data: {\"type\":\"answerTypeUpdate\",\"answerType\":\"direct\"}\n\n");

        let frame = ControlEvent::Metadata(MetadataEvent {
            sources: vec![SourceCitation {
                title: "Subháśita Saḿgraha".into(),
                reference: "Part 2".into(),
            }],
            answer_type: Some(AnswerType::Inferred),
            top_similarity: 0.5,
        })
        .to_frame();
        assert!(frame.starts_with("data: {\"type\":\"metadata\",\"sources\":[{"));
        assert!(frame.contains("\"answerType\":\"inferred\""));
        assert!(frame.contains("\"topSimilarity\":0.5"));
        assert!(frame.ends_with("}\n\n"));
    }

    #[test]
    fn test_line_buffer_handles_split_utf8() {
        let text = "data: ḿ\n";
        let bytes = text.as_bytes();
        let split = "data: ".len() + 1; // inside the three-byte character

        let mut buffer = LineBuffer::default();
        buffer.push(&bytes[..split]);
        assert!(buffer.next_line().is_none());
        buffer.push(&bytes[split..]);
        let line = buffer.next_line().unwrap();
        assert_eq!(std::str::from_utf8(&line).unwrap(), text);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parser_holds_incomplete_payload_until_continued() {
        let mut parser = EventParser::default();
        assert_eq!(parser.feed(r#"data: {"choices":[{"delta":"#).unwrap(), None);
        assert!(parser.is_holding());

        let event = parser.feed(r#"data: {"content":"joined"}}]}"#).unwrap().unwrap();
        match event {
            StreamEvent::TokenDelta(delta) => assert_eq!(delta.content(), Some("joined")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!parser.is_holding());
    }

    #[test]
    fn test_parser_reports_payload_cut_by_event_boundary() {
        let mut parser = EventParser::default();
        parser.feed(r#"data: {"choices":"#).unwrap();
        let err = parser.feed("").unwrap_err();
        assert_eq!(err.kind, MalformedKind::Incomplete);

        // The parser recovers for the next event
        assert_eq!(parser.feed("data: [DONE]").unwrap(), Some(StreamEvent::Done));
    }

    #[test]
    fn test_parser_finish_reports_held_payload() {
        let mut parser = EventParser::default();
        assert!(parser.finish().is_none());
        parser.feed(r#"data: {"choices":["#).unwrap();
        assert_eq!(parser.finish().unwrap().kind, MalformedKind::Incomplete);
    }
}

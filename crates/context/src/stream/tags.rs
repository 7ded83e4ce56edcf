//! Answer-type tag and trailing source list in generated text
//!
//! The system prompt asks for an `ANSWER_TYPE: DIRECT|INFERRED` line and a
//! `SOURCES:` block at the end of every answer.

use regex_lite::Regex;
use scripture_qa_common::SourceCitation;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Whether an answer quotes the passages or extrapolates from them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerType {
    Direct,
    #[default]
    Inferred,
}

fn tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)answer[_ ]?type\W*(direct|inferred)\b").ok())
        .as_ref()
}

fn tag_line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\W*answer[_ ]?type\b").ok())
        .as_ref()
}

fn sources_heading_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\W*sources\W*:").ok())
        .as_ref()
}

impl AnswerType {
    /// Last tag in `text`; `Inferred` when there is none
    pub fn detect(text: &str) -> Self {
        tag_pattern()
            .and_then(|re| re.captures_iter(text).last())
            .and_then(|caps| caps.get(1))
            .map(|m| {
                if m.as_str().eq_ignore_ascii_case("direct") {
                    AnswerType::Direct
                } else {
                    AnswerType::Inferred
                }
            })
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerType::Direct => "direct",
            AnswerType::Inferred => "inferred",
        }
    }
}

/// A completed answer split into what the reader sees and the tag-derived facts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEnvelope {
    pub body: String,
    pub answer_type: AnswerType,
    pub sources: Vec<SourceCitation>,
}

impl AnswerEnvelope {
    /// Split off the trailer. It starts at the last tag line, or at a
    /// `SOURCES:` list placed directly before that line. Lookalike lines
    /// earlier in the body are kept.
    pub fn from_text(text: &str) -> Self {
        let answer_type = AnswerType::detect(text);
        let lines: Vec<&str> = text.lines().collect();

        let tag_at = lines.iter().rposition(|l| is_tag_line(l));
        let heading_at = match tag_at {
            Some(tag) => lines[tag..]
                .iter()
                .position(|l| is_sources_heading(l))
                .map(|i| i + tag)
                .or_else(|| {
                    // A source list may also come just before the tag
                    lines[..tag]
                        .iter()
                        .rposition(|l| is_sources_heading(l))
                        .filter(|&h| lines[h + 1..tag].iter().all(|l| is_list_item(l)))
                }),
            None => lines.iter().rposition(|l| is_sources_heading(l)),
        };
        let trailer_at = tag_at.into_iter().chain(heading_at).min().unwrap_or(lines.len());

        let mut body_lines = lines[..trailer_at].to_vec();
        let mut sources = Vec::new();
        let mut in_sources = false;

        for line in &lines[trailer_at..] {
            if is_tag_line(line) {
                continue;
            }

            if let Some(m) = sources_heading_pattern().and_then(|re| re.find(line)) {
                in_sources = true;
                // Entries may share the heading line
                if let Some(citation) = parse_source_item(&line[m.end()..]) {
                    sources.push(citation);
                }
                continue;
            }

            if in_sources {
                if let Some(citation) = parse_source_item(line) {
                    sources.push(citation);
                }
            } else {
                body_lines.push(*line);
            }
        }

        Self {
            body: body_lines.join("\n").trim().to_string(),
            answer_type,
            sources,
        }
    }
}

fn is_tag_line(line: &str) -> bool {
    tag_line_pattern().is_some_and(|re| re.is_match(line))
}

fn is_sources_heading(line: &str) -> bool {
    sources_heading_pattern().is_some_and(|re| re.is_match(line))
}

fn is_list_item(line: &str) -> bool {
    let line = line.trim_start();
    line.is_empty() || line.starts_with(['-', '*', '•']) || line.starts_with(|c: char| c.is_ascii_digit())
}

fn parse_source_item(line: &str) -> Option<SourceCitation> {
    let item = line
        .trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_ascii_digit() || c == '.')
        .trim();
    if item.is_empty() {
        return None;
    }

    let (title, reference) = [" — ", " – ", " - "]
        .iter()
        .find_map(|sep| item.split_once(sep))
        .unwrap_or((item, ""));

    let clean = |s: &str| s.trim().trim_matches(|c| c == '[' || c == ']' || c == '*').trim().to_string();
    let title = clean(title);
    if title.is_empty() {
        return None;
    }

    Some(SourceCitation {
        title,
        reference: clean(reference),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_direct_tag() {
        let text = "Baba explains that...text...\nANSWER_TYPE: DIRECT\nSOURCES:\n- X — Y";
        assert_eq!(AnswerType::detect(text), AnswerType::Direct);
    }

    #[test]
    fn test_detect_defaults_to_inferred() {
        assert_eq!(AnswerType::detect("No tag anywhere."), AnswerType::Inferred);
        assert_eq!(AnswerType::detect("ANSWER_TYPE: MAYBE"), AnswerType::Inferred);
        assert_eq!(AnswerType::detect(""), AnswerType::Inferred);
    }

    #[test]
    fn test_detect_is_case_insensitive_and_last_wins() {
        assert_eq!(AnswerType::detect("answer_type: direct"), AnswerType::Direct);
        assert_eq!(AnswerType::detect("**Answer Type:** Direct"), AnswerType::Direct);
        let text = "I will mark ANSWER_TYPE: DIRECT if quoted.\n...\nANSWER_TYPE: INFERRED";
        assert_eq!(AnswerType::detect(text), AnswerType::Inferred);
    }

    #[test]
    fn test_envelope_strips_tag_and_sources() {
        let text = "**Dharma** is the innate property of a being.\n\n\
                    > Human dharma is Bhagavad dharma.\n\n\
                    ANSWER_TYPE: DIRECT\n\
                    SOURCES:\n\
                    - Ananda Marga Ideology and Way of Life — Part 1, Dharma\n\
                    - [Subháśita Saḿgraha] — [Part 4]\n\
                    - A Few Problems Solved - Part 7\n";

        let envelope = AnswerEnvelope::from_text(text);
        assert_eq!(envelope.answer_type, AnswerType::Direct);
        assert_eq!(
            envelope.body,
            "**Dharma** is the innate property of a being.\n\n> Human dharma is Bhagavad dharma."
        );
        assert_eq!(
            envelope.sources,
            vec![
                SourceCitation {
                    title: "Ananda Marga Ideology and Way of Life".into(),
                    reference: "Part 1, Dharma".into()
                },
                SourceCitation {
                    title: "Subháśita Saḿgraha".into(),
                    reference: "Part 4".into()
                },
                SourceCitation {
                    title: "A Few Problems Solved".into(),
                    reference: "Part 7".into()
                },
            ]
        );
    }

    #[test]
    fn test_envelope_keeps_lookalike_body_lines() {
        let text = "Answer type matters less than sincerity.\n\
                    Sources: the Vedas and the Tantras both speak of it.\n\
                    The Tantras emphasise practice.\n\n\
                    ANSWER_TYPE: INFERRED\n\
                    SOURCES:\n\
                    - Discourses on Tantra — Volume 1\n";

        let envelope = AnswerEnvelope::from_text(text);
        assert_eq!(
            envelope.body,
            "Answer type matters less than sincerity.\n\
             Sources: the Vedas and the Tantras both speak of it.\n\
             The Tantras emphasise practice."
        );
        assert_eq!(
            envelope.sources,
            vec![SourceCitation {
                title: "Discourses on Tantra".into(),
                reference: "Volume 1".into()
            }]
        );
    }

    #[test]
    fn test_envelope_sources_before_tag() {
        let text = "Kiirtana is the singing of a mantra.\n\
                    SOURCES:\n\
                    - Namami Krsnasundaram — Chapter 3\n\
                    ANSWER_TYPE: DIRECT";

        let envelope = AnswerEnvelope::from_text(text);
        assert_eq!(envelope.body, "Kiirtana is the singing of a mantra.");
        assert_eq!(envelope.answer_type, AnswerType::Direct);
        assert_eq!(envelope.sources.len(), 1);
    }

    #[test]
    fn test_envelope_without_trailer() {
        let envelope = AnswerEnvelope::from_text("Just an answer.\n");
        assert_eq!(envelope.body, "Just an answer.");
        assert_eq!(envelope.answer_type, AnswerType::Inferred);
        assert!(envelope.sources.is_empty());
    }

    #[test]
    fn test_source_item_without_reference() {
        let item = parse_source_item("- Namami Krsnasundaram").unwrap();
        assert_eq!(item.title, "Namami Krsnasundaram");
        assert_eq!(item.reference, "");
        assert!(parse_source_item("  - ").is_none());
    }
}

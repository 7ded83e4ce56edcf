//! Corpus record types

use serde::{Deserialize, Serialize};

/// Title used when a row carries none
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

/// Which retrieval leg produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Vector,
    Keyword,
}

/// A retrievable passage from the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Opaque row identity, when the row has one
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    /// Human citation key (book, chapter or section reference)
    pub doc_id: Option<String>,
    /// Present for vector hits; keyword-only hits carry zero
    pub similarity: Option<f64>,
    pub provenance: Provenance,
}

impl DocumentRecord {
    /// Similarity with absent scores ranked as zero
    pub fn score(&self) -> f64 {
        self.similarity.unwrap_or(0.0)
    }

    /// Identity used for deduplication: the id, else `title::content-prefix`
    pub fn identity_key(&self) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let prefix: String = self.content.chars().take(100).collect();
                format!("{}::{}", self.title, prefix)
            }
        }
    }

    /// Cut content to at most `max_chars` characters
    pub fn truncate_content(&mut self, max_chars: usize) {
        if let Some((byte_idx, _)) = self.content.char_indices().nth(max_chars) {
            self.content.truncate(byte_idx);
        }
    }

    /// Citation derived from this record
    pub fn citation(&self) -> SourceCitation {
        SourceCitation {
            title: self.title.clone(),
            reference: self.doc_id.clone().unwrap_or_default(),
        }
    }
}

/// A source shown to the client, one per unique title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub title: String,
    pub reference: String,
}

/// A table in the document store and its columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
}

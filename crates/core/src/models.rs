use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_document: String,
    pub text: String,
    pub page_number: Option<u32>,
    pub page_end: Option<u32>,
    pub sequence_index: u64,
    pub char_start: usize,
}

impl Chunk {
    /// Human readable page span, e.g. `3` or `3-4`.
    pub fn page_label(&self) -> Option<String> {
        match (self.page_number, self.page_end) {
            (Some(start), Some(end)) if end > start => Some(format!("{start}-{end}")),
            (Some(start), _) => Some(start.to_string()),
            (None, Some(end)) => Some(end.to_string()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source_document: String,
    pub checksum: Option<String>,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub source_document: String,
    pub checksum: Option<String>,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoContextReason {
    EmptyIndex,
    BelowThreshold { best_score: f64, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Retrieval {
    Passages { passages: Vec<RetrievedPassage> },
    NoRelevantContext { cause: NoContextReason },
}

impl Retrieval {
    pub fn passages(&self) -> &[RetrievedPassage] {
        match self {
            Self::Passages { passages } => passages,
            Self::NoRelevantContext { .. } => &[],
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self, Self::Passages { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub anchor: usize,
    pub source_document: String,
    pub page_number: Option<u32>,
    pub page_end: Option<u32>,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub system: String,
    pub context: String,
    pub history: Vec<ConversationTurn>,
    pub question: String,
    pub user_prompt: String,
    pub citations: Vec<Citation>,
}

impl PromptPayload {
    pub fn messages(&self) -> Vec<PromptMessage> {
        self.history
            .iter()
            .map(|turn| PromptMessage {
                role: turn.role,
                content: turn.text.clone(),
            })
            .chain(std::iter::once(PromptMessage {
                role: Role::User,
                content: self.user_prompt.clone(),
            }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(page_number: Option<u32>, page_end: Option<u32>) -> Chunk {
        Chunk {
            chunk_id: "c".to_string(),
            source_document: "leave.pdf".to_string(),
            text: "text".to_string(),
            page_number,
            page_end,
            sequence_index: 0,
            char_start: 0,
        }
    }

    #[test]
    fn page_label_reports_span() {
        assert_eq!(chunk(Some(2), Some(2)).page_label().as_deref(), Some("2"));
        assert_eq!(chunk(Some(2), Some(3)).page_label().as_deref(), Some("2-3"));
        assert_eq!(chunk(None, None).page_label(), None);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let turn = ConversationTurn::assistant("hej");
        let json = serde_json::to_string(&turn).expect("turn should serialize");
        assert_eq!(json, r#"{"role":"assistant","text":"hej"}"#);
    }
}

//! Core data models used throughout Docket.
//!
//! These types represent the documents, fragments, and chat entities that
//! flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownKind;

/// Closed set of analysis categories. Both documents and chat sessions
/// are tagged with one of these; retrieval uses the tag to scope vector
/// search. Validated once at the boundary via [`FromStr`](std::str::FromStr),
/// passed as a typed value everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisKind {
    CaseSection,
    Bail,
    HumanRights,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 3] = [
        AnalysisKind::CaseSection,
        AnalysisKind::Bail,
        AnalysisKind::HumanRights,
    ];

    /// Canonical label, as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::CaseSection => "Case Section Analysis",
            AnalysisKind::Bail => "Bail Analysis",
            AnalysisKind::HumanRights => "Human Analysis",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = UnknownKind;

    /// Accepts the canonical label or a short alias, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "case section analysis" | "case-section" | "case_section" | "case" => {
                Ok(AnalysisKind::CaseSection)
            }
            "bail analysis" | "bail" => Ok(AnalysisKind::Bail),
            "human analysis" | "human-rights" | "human_rights" | "human" => {
                Ok(AnalysisKind::HumanRights)
            }
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// An uploaded document, owner of an ordered set of [`Fragment`]s.
/// Deleting a document cascades to its fragments and their embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: i64,
    pub name: String,
    pub kind: AnalysisKind,
    /// Content-location reference for the original upload.
    pub content_ref: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A bounded slice of a document's extracted text, the unit of retrieval.
/// Immutable once created; re-ingestion replaces the whole set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Zero-based position within the document, contiguous after
    /// whitespace-only chunks are filtered out.
    pub ordinal: i64,
    pub text: String,
    /// SHA-256 of the text, for staleness detection.
    pub hash: String,
}

/// A persisted multi-turn conversation, scoped to one analysis kind and
/// one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: i64,
    pub kind: AnalysisKind,
    pub started_at: DateTime<Utc>,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Sender> {
        match s {
            "user" => Some(Sender::User),
            "assistant" => Some(Sender::Assistant),
            _ => None,
        }
    }
}

/// A message within a [`ChatSession`]. `fragment_id` is a weak reference
/// to the fragment the message was grounded in; deleting that fragment
/// must not delete the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    pub fragment_id: Option<Uuid>,
}

/// A message to append; the store assigns `id` and `sent_at`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub fragment_id: Option<Uuid>,
}

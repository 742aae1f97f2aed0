//! Storage abstraction for Docket.
//!
//! The [`FragmentStore`] trait defines every storage operation the
//! ingestion, retrieval, and chat layers need, enabling pluggable
//! backends (Postgres with pgvector in production, in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AnalysisKind, ChatMessage, ChatSession, Document, Fragment, NewMessage};

/// A candidate fragment returned from vector or lexical search.
///
/// Carries the owning document's metadata so ranking needs no further
/// store round-trips. `similarity` is `1 − distance` for vector search
/// and a synthetic constant for lexical matches.
#[derive(Debug, Clone)]
pub struct FragmentHit {
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub kind: AnalysisKind,
    pub ordinal: i64,
    pub text: String,
    pub similarity: f64,
}

/// A fragment together with the surrounding text of its neighbors,
/// for expanding a cited source.
#[derive(Debug, Clone)]
pub struct FragmentContext {
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub kind: AnalysisKind,
    pub ordinal: i64,
    pub text: String,
    pub expanded_text: String,
}

/// Abstract storage backend.
///
/// Lookup misses are `Ok(None)` or [`StoreError::NotFound`], never
/// panics. Transient failures are reported as
/// [`StoreError::Transient`] so the caller's retry wrapper can tell
/// them apart from permanent ones.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// Write a document, its fragments, and their vectors as one atomic
    /// unit: either everything commits or nothing does. A `None` vector
    /// records the fragment without an embedding (the embedding service
    /// was unavailable); search must tolerate the gap.
    ///
    /// Re-ingesting an existing document id replaces its whole fragment
    /// set.
    async fn ingest_document(
        &self,
        document: &Document,
        fragments: &[Fragment],
        vectors: &[Option<Vec<f32>>],
    ) -> Result<(), StoreError>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError>;

    /// All documents, optionally restricted to one analysis kind,
    /// newest first.
    async fn list_documents(
        &self,
        kind: Option<AnalysisKind>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count_documents(&self) -> Result<i64, StoreError>;

    /// Delete a document and, by cascade, its fragments and embeddings.
    /// Returns whether anything was deleted.
    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Nearest-neighbor search over stored vectors, optionally scoped to
    /// one analysis kind. Fragments without an embedding are skipped.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError>;

    /// Case-insensitive substring search over fragment text, ranked by
    /// fragment length descending, with a synthetic similarity constant.
    async fn lexical_search(
        &self,
        query: &str,
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError>;

    /// A fragment plus the joined text of its neighbors within
    /// `radius` ordinals, for expanded citation display.
    async fn fragment_neighborhood(
        &self,
        fragment_id: Uuid,
        radius: i64,
    ) -> Result<Option<FragmentContext>, StoreError>;

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError>;

    /// A user's sessions, newest first.
    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>, StoreError>;

    /// Delete a session and its messages. Returns whether anything was
    /// deleted.
    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Append a message; the store assigns the id and a timestamp that
    /// never decreases within the session.
    async fn append_message(&self, message: &NewMessage) -> Result<ChatMessage, StoreError>;

    /// All messages of a session in send order.
    async fn session_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError>;
}

//! In-memory [`FragmentStore`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread
//! safety. Vector search is brute-force cosine similarity over all
//! stored vectors; lexical search is a substring scan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{AnalysisKind, ChatMessage, ChatSession, Document, Fragment, NewMessage};
use crate::rank::LEXICAL_FALLBACK_SIMILARITY;

use super::{FragmentContext, FragmentHit, FragmentStore};

struct StoredFragment {
    fragment: Fragment,
    vector: Option<Vec<f32>>,
}

/// In-memory store for unit and integration tests.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    fragments: RwLock<Vec<StoredFragment>>,
    sessions: RwLock<HashMap<Uuid, ChatSession>>,
    messages: RwLock<Vec<ChatMessage>>,
    next_message_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: the fragments stored for one document, in ordinal
    /// order.
    pub fn document_fragments(&self, document_id: Uuid) -> Vec<Fragment> {
        let stored = self.fragments.read().unwrap();
        let mut out: Vec<Fragment> = stored
            .iter()
            .filter(|sf| sf.fragment.document_id == document_id)
            .map(|sf| sf.fragment.clone())
            .collect();
        out.sort_by_key(|f| f.ordinal);
        out
    }

    /// Test helper: every stored embedding vector.
    pub fn stored_vectors(&self) -> Vec<Vec<f32>> {
        self.fragments
            .read()
            .unwrap()
            .iter()
            .filter_map(|sf| sf.vector.clone())
            .collect()
    }

    fn hit_for(&self, sf: &StoredFragment, similarity: f64) -> Option<FragmentHit> {
        let documents = self.documents.read().unwrap();
        let doc = documents.get(&sf.fragment.document_id)?;
        Some(FragmentHit {
            fragment_id: sf.fragment.id,
            document_id: doc.id,
            document_name: doc.name.clone(),
            kind: doc.kind,
            ordinal: sf.fragment.ordinal,
            text: sf.fragment.text.clone(),
            similarity,
        })
    }

    fn document_kind(&self, document_id: Uuid) -> Option<AnalysisKind> {
        self.documents
            .read()
            .unwrap()
            .get(&document_id)
            .map(|d| d.kind)
    }
}

#[async_trait]
impl FragmentStore for InMemoryStore {
    async fn ingest_document(
        &self,
        document: &Document,
        fragments: &[Fragment],
        vectors: &[Option<Vec<f32>>],
    ) -> Result<(), StoreError> {
        // Lock order matches the search path: fragments, then documents.
        let mut stored = self.fragments.write().unwrap();
        let mut docs = self.documents.write().unwrap();

        stored.retain(|sf| sf.fragment.document_id != document.id);
        docs.insert(document.id, document.clone());
        for (i, fragment) in fragments.iter().enumerate() {
            stored.push(StoredFragment {
                fragment: fragment.clone(),
                vector: vectors.get(i).cloned().flatten(),
            });
        }
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().unwrap().get(&id).cloned())
    }

    async fn list_documents(
        &self,
        kind: Option<AnalysisKind>,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.documents.read().unwrap();
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| kind.map_or(true, |k| d.kind == k))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(out)
    }

    async fn count_documents(&self) -> Result<i64, StoreError> {
        Ok(self.documents.read().unwrap().len() as i64)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError> {
        let removed = self.documents.write().unwrap().remove(&id).is_some();
        if removed {
            self.fragments
                .write()
                .unwrap()
                .retain(|sf| sf.fragment.document_id != id);
        }
        Ok(removed)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError> {
        let stored = self.fragments.read().unwrap();
        let mut hits: Vec<FragmentHit> = stored
            .iter()
            .filter_map(|sf| {
                // Fragments whose embedding write failed are skipped,
                // not an error.
                let vector = sf.vector.as_ref()?;
                let doc_kind = self.document_kind(sf.fragment.document_id)?;
                if kind.is_some_and(|k| k != doc_kind) {
                    return None;
                }
                let similarity = cosine_similarity(query_vec, vector) as f64;
                self.hit_for(sf, similarity)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        query: &str,
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError> {
        let needle = query.to_lowercase();
        let stored = self.fragments.read().unwrap();
        let mut hits: Vec<FragmentHit> = stored
            .iter()
            .filter_map(|sf| {
                let doc_kind = self.document_kind(sf.fragment.document_id)?;
                if kind.is_some_and(|k| k != doc_kind) {
                    return None;
                }
                if !sf.fragment.text.to_lowercase().contains(&needle) {
                    return None;
                }
                self.hit_for(sf, LEXICAL_FALLBACK_SIMILARITY)
            })
            .collect();

        hits.sort_by(|a, b| b.text.chars().count().cmp(&a.text.chars().count()));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn fragment_neighborhood(
        &self,
        fragment_id: Uuid,
        radius: i64,
    ) -> Result<Option<FragmentContext>, StoreError> {
        let stored = self.fragments.read().unwrap();
        let target = match stored.iter().find(|sf| sf.fragment.id == fragment_id) {
            Some(sf) => sf,
            None => return Ok(None),
        };

        let documents = self.documents.read().unwrap();
        let doc = match documents.get(&target.fragment.document_id) {
            Some(d) => d,
            None => return Ok(None),
        };

        let mut neighbors: Vec<&Fragment> = stored
            .iter()
            .map(|sf| &sf.fragment)
            .filter(|f| {
                f.document_id == doc.id
                    && (f.ordinal - target.fragment.ordinal).abs() <= radius
            })
            .collect();
        neighbors.sort_by_key(|f| f.ordinal);
        let expanded_text = neighbors
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Some(FragmentContext {
            fragment_id,
            document_id: doc.id,
            document_name: doc.name.clone(),
            kind: doc.kind,
            ordinal: target.fragment.ordinal,
            text: target.fragment.text.clone(),
            expanded_text,
        }))
    }

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.sessions.read().unwrap().get(&id).cloned())
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>, StoreError> {
        let sessions = self.sessions.read().unwrap();
        let mut out: Vec<ChatSession> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let removed = self.sessions.write().unwrap().remove(&id).is_some();
        if removed {
            self.messages
                .write()
                .unwrap()
                .retain(|m| m.session_id != id);
        }
        Ok(removed)
    }

    async fn append_message(&self, message: &NewMessage) -> Result<ChatMessage, StoreError> {
        let mut messages = self.messages.write().unwrap();

        // Timestamps within a session never go backwards.
        let mut sent_at = Utc::now();
        if let Some(last) = messages
            .iter()
            .filter(|m| m.session_id == message.session_id)
            .next_back()
        {
            sent_at = sent_at.max(last.sent_at);
        }

        let stored = ChatMessage {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            session_id: message.session_id,
            sender: message.sender,
            text: message.text.clone(),
            sent_at,
            fragment_id: message.fragment_id,
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn session_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}

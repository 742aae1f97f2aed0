//! End-to-end tests of the ingestion, retrieval, and chat pipeline over
//! the in-memory store, with deterministic stub providers standing in
//! for the embedding and answer-generation services.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use docket_core::context::AnswerGenerator;
use docket_core::embedding::{l2_norm, normalize_vector, Embedder, EMBEDDING_DIMS};
use docket_core::error::{EmbedError, StoreError};
use docket_core::models::{
    AnalysisKind, ChatMessage, ChatSession, Document, Fragment, NewMessage, Sender,
};
use docket_core::retrieval::{retrieve, RetrievalParams, SearchTier};
use docket_core::store::memory::InMemoryStore;
use docket_core::store::{FragmentContext, FragmentHit, FragmentStore};

use docket::chat::{ChatEngine, ChatError, ANSWER_FAILURE_TEXT};
use docket::ingest::{ingest_document, IngestParams};
use docket::retry::RetryPolicy;
use docket_core::chunk::ChunkParams;

// ─── Stub providers ─────────────────────────────────────────────────

/// Deterministic bag-of-tokens embedder: each token feeds one dimension,
/// so texts sharing vocabulary get positive cosine similarity.
struct TokenHashEmbedder;

fn token_dim(token: &str) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in token.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % EMBEDDING_DIMS as u64) as usize
}

#[async_trait]
impl Embedder for TokenHashEmbedder {
    fn model_name(&self) -> &str {
        "token-hash"
    }
    fn dims(&self) -> usize {
        EMBEDDING_DIMS
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = vec![0.0f32; EMBEDDING_DIMS];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if !token.is_empty() {
                v[token_dim(token)] += 1.0;
            }
        }
        normalize_vector(v)
    }
}

/// Embedding service that is down.
struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model_name(&self) -> &str {
        "down"
    }
    fn dims(&self) -> usize {
        EMBEDDING_DIMS
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Unavailable("connection refused".into()))
    }
}

/// Canned answerer that always cites the first source.
struct CitingAnswerer;

#[async_trait]
impl AnswerGenerator for CitingAnswerer {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        if user.contains("[Source 1]") {
            Ok("According to Source 1, the documents state the relevant conditions.".to_string())
        } else {
            Ok("This information is not available in your uploaded documents.".to_string())
        }
    }
}

/// Answer service that is down.
struct DownAnswerer;

#[async_trait]
impl AnswerGenerator for DownAnswerer {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        anyhow::bail!("answer service timed out")
    }
}

// ─── Failure-injecting store wrapper ────────────────────────────────

/// Delegates to an [`InMemoryStore`] with optional failure injection:
/// vector search can be permanently down, and ingestion can fail
/// transiently a configured number of times.
#[derive(Default)]
struct TestStore {
    inner: InMemoryStore,
    fail_vector_search: bool,
    ingest_failures_remaining: AtomicU32,
    ingest_attempts: AtomicU32,
}

impl TestStore {
    fn with_vector_outage() -> Self {
        Self {
            fail_vector_search: true,
            ..Self::default()
        }
    }

    fn with_transient_ingest_failures(n: u32) -> Self {
        let store = Self::default();
        store.ingest_failures_remaining.store(n, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl FragmentStore for TestStore {
    async fn ingest_document(
        &self,
        document: &Document,
        fragments: &[Fragment],
        vectors: &[Option<Vec<f32>>],
    ) -> Result<(), StoreError> {
        self.ingest_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.ingest_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ingest_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Transient("connection reset by peer".into()));
        }
        self.inner.ingest_document(document, fragments, vectors).await
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        self.inner.get_document(id).await
    }

    async fn list_documents(
        &self,
        kind: Option<AnalysisKind>,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.list_documents(kind).await
    }

    async fn count_documents(&self) -> Result<i64, StoreError> {
        self.inner.count_documents().await
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_document(id).await
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError> {
        if self.fail_vector_search {
            return Err(StoreError::Query("vector index offline".into()));
        }
        self.inner.vector_search(query_vec, kind, limit).await
    }

    async fn lexical_search(
        &self,
        query: &str,
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError> {
        self.inner.lexical_search(query, kind, limit).await
    }

    async fn fragment_neighborhood(
        &self,
        fragment_id: Uuid,
        radius: i64,
    ) -> Result<Option<FragmentContext>, StoreError> {
        self.inner.fragment_neighborhood(fragment_id, radius).await
    }

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.inner.create_session(session).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>, StoreError> {
        self.inner.list_sessions(user_id).await
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_session(id).await
    }

    async fn append_message(&self, message: &NewMessage) -> Result<ChatMessage, StoreError> {
        self.inner.append_message(message).await
    }

    async fn session_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        self.inner.session_messages(session_id).await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: std::time::Duration::ZERO,
        backoff_factor: 2,
        max_jitter: std::time::Duration::ZERO,
    }
}

async fn ingest_text(
    store: &dyn FragmentStore,
    embedder: &dyn Embedder,
    kind: AnalysisKind,
    filename: &str,
    text: &str,
) -> docket::ingest::IngestReport {
    ingest_document(
        store,
        embedder,
        &ChunkParams::default(),
        &fast_retry(),
        IngestParams {
            bytes: text.as_bytes(),
            filename,
            title: filename.trim_end_matches(".txt"),
            kind,
            user_id: 1,
        },
    )
    .await
    .unwrap()
}

fn engine(store: Arc<dyn FragmentStore>, answerer: Arc<dyn AnswerGenerator>) -> ChatEngine {
    ChatEngine::new(
        store,
        Arc::new(TokenHashEmbedder),
        answerer,
        RetrievalParams::default(),
        fast_retry(),
    )
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn ingestion_chunks_embeds_and_stores_atomically() {
    let store = InMemoryStore::new();
    let text: String = (0..2500)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();

    let report = ingest_text(&store, &TokenHashEmbedder, AnalysisKind::Bail, "long.txt", &text).await;

    assert_eq!(report.fragment_count, 3);
    assert_eq!(report.embedded_count, 3);
    assert!(report.extraction_warning.is_none());

    let fragments = store.document_fragments(report.document_id);
    assert_eq!(fragments.len(), 3);
    for (i, fragment) in fragments.iter().enumerate() {
        assert_eq!(fragment.ordinal, i as i64);
    }
    assert_eq!(fragments[0].text.chars().count(), 1000);

    // Fragment 1 starts with the 200-character tail of fragment 0.
    let tail: String = fragments[0].text.chars().skip(800).collect();
    let head: String = fragments[1].text.chars().take(200).collect();
    assert_eq!(tail, head);
}

#[tokio::test]
async fn every_stored_vector_has_unit_norm() {
    let store = InMemoryStore::new();
    ingest_text(
        &store,
        &TokenHashEmbedder,
        AnalysisKind::CaseSection,
        "sections.txt",
        "Section 302 deals with punishment for murder. Section 307 covers attempts.",
    )
    .await;

    let vectors = store.stored_vectors();
    assert!(!vectors.is_empty());
    for vector in vectors {
        assert_eq!(vector.len(), EMBEDDING_DIMS);
        assert!((l2_norm(&vector) - 1.0).abs() < 1e-6);
    }
}

#[tokio::test]
async fn unsupported_format_is_an_explicit_failure() {
    let store = InMemoryStore::new();
    let err = ingest_document(
        &store,
        &TokenHashEmbedder,
        &ChunkParams::default(),
        &fast_retry(),
        IngestParams {
            bytes: b"\x7fELF",
            filename: "payload.bin",
            title: "payload",
            kind: AnalysisKind::Bail,
            user_id: 1,
        },
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("unsupported file format"));
    assert_eq!(store.count_documents().await.unwrap(), 0);
}

#[tokio::test]
async fn unreadable_file_is_still_recorded_with_a_warning() {
    let store = InMemoryStore::new();
    let report = ingest_document(
        &store,
        &TokenHashEmbedder,
        &ChunkParams::default(),
        &fast_retry(),
        IngestParams {
            bytes: b"this is not a real pdf",
            filename: "broken.pdf",
            title: "Broken upload",
            kind: AnalysisKind::Bail,
            user_id: 1,
        },
    )
    .await
    .unwrap();

    assert!(report.extraction_warning.is_some());
    assert!(report.fragment_count >= 1);
    assert_eq!(store.count_documents().await.unwrap(), 1);
}

#[tokio::test]
async fn embedding_outage_keeps_fragments_but_not_vectors() {
    let store = InMemoryStore::new();
    let report = ingest_text(
        &store,
        &DownEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond.",
    )
    .await;

    assert_eq!(report.embedded_count, 0);
    assert!(report.fragment_count >= 1);
    assert!(store.stored_vectors().is_empty());

    // The document is still reachable through the lexical tier.
    let outcome = retrieve(
        &store,
        &TokenHashEmbedder,
        "bail",
        None,
        &RetrievalParams::default(),
    )
    .await;
    assert_eq!(outcome.tier, SearchTier::LexicalBackfill);
    assert_eq!(outcome.results.len(), 1);
}

#[tokio::test]
async fn transient_store_failures_during_ingest_are_retried() {
    let store = TestStore::with_transient_ingest_failures(2);
    let report = ingest_text(
        &store,
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond.",
    )
    .await;

    assert_eq!(store.ingest_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.count_documents().await.unwrap(), 1);
    assert!(report.fragment_count >= 1);
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn vector_store_outage_serves_every_query_from_the_lexical_tier() {
    let store = TestStore::with_vector_outage();
    ingest_text(
        &store,
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond and regular reporting.",
    )
    .await;

    for query in ["bail", "surety", "reporting"] {
        let outcome = retrieve(
            &store,
            &TokenHashEmbedder,
            query,
            Some(AnalysisKind::Bail),
            &RetrievalParams::default(),
        )
        .await;
        assert_eq!(outcome.tier, SearchTier::LexicalOnly);
        assert!(!outcome.results.is_empty());
    }
}

#[tokio::test]
async fn ranked_results_are_ordered_by_final_score() {
    let store = InMemoryStore::new();
    for (name, text) in [
        ("one.txt", "bail conditions and sureties in detail"),
        ("two.txt", "bail mentioned once among unrelated material"),
        ("three.txt", "completely unrelated traffic regulations"),
    ] {
        ingest_text(&store, &TokenHashEmbedder, AnalysisKind::Bail, name, text).await;
    }

    let outcome = retrieve(
        &store,
        &TokenHashEmbedder,
        "bail conditions",
        Some(AnalysisKind::Bail),
        &RetrievalParams::default(),
    )
    .await;

    assert!(!outcome.results.is_empty());
    for pair in outcome.results.windows(2) {
        assert!(pair[0].final_score >= pair[1].final_score);
    }
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_turn_returns_cited_answer_with_numbered_sources() {
    let store = Arc::new(InMemoryStore::new());
    ingest_text(
        store.as_ref(),
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond and regular reporting to the station.",
    )
    .await;

    let engine = engine(store.clone(), Arc::new(CitingAnswerer));
    let session = engine.start_session(1, AnalysisKind::Bail).await.unwrap();
    let turn = engine
        .respond(session.id, "What are the bail conditions?", None)
        .await
        .unwrap();

    assert!(turn.answer.contains("Source 1"));
    assert_eq!(turn.tier, SearchTier::TypedVector);
    assert!(!turn.sources.is_empty());
    for (i, source) in turn.sources.iter().enumerate() {
        assert_eq!(source.number, i + 1);
    }

    // Both sides of the turn are persisted, in order.
    let messages = store.session_messages(session.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[1].sender, Sender::Assistant);
    assert!(messages[0].sent_at <= messages[1].sent_at);
    // The assistant message is grounded in the top source.
    assert_eq!(messages[1].fragment_id, Some(turn.sources[0].fragment_id));
}

#[tokio::test]
async fn follow_up_turns_accumulate_history() {
    let store = Arc::new(InMemoryStore::new());
    ingest_text(
        store.as_ref(),
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond.",
    )
    .await;

    let engine = engine(store.clone(), Arc::new(CitingAnswerer));
    let session = engine.start_session(1, AnalysisKind::Bail).await.unwrap();

    engine
        .respond(session.id, "What are the bail conditions?", None)
        .await
        .unwrap();
    engine
        .respond(session.id, "And the surety?", None)
        .await
        .unwrap();

    let messages = store.session_messages(session.id).await.unwrap();
    assert_eq!(messages.len(), 4);
    for pair in messages.windows(2) {
        assert!(pair[0].sent_at <= pair[1].sent_at);
    }
}

#[tokio::test]
async fn unknown_session_is_an_explicit_not_found() {
    let engine = engine(Arc::new(InMemoryStore::new()), Arc::new(CitingAnswerer));
    let missing = Uuid::new_v4();
    let err = engine.respond(missing, "hello", None).await.unwrap_err();
    assert!(matches!(err, ChatError::SessionNotFound(id) if id == missing));
}

#[tokio::test]
async fn answerer_outage_degrades_to_the_apology_text() {
    let store = Arc::new(InMemoryStore::new());
    ingest_text(
        store.as_ref(),
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond.",
    )
    .await;

    let engine = engine(store.clone(), Arc::new(DownAnswerer));
    let session = engine.start_session(1, AnalysisKind::Bail).await.unwrap();
    let turn = engine
        .respond(session.id, "What are the bail conditions?", None)
        .await
        .unwrap();

    assert_eq!(turn.answer, ANSWER_FAILURE_TEXT);
    // The failed turn is still recorded.
    let messages = store.session_messages(session.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text, ANSWER_FAILURE_TEXT);
}

#[tokio::test]
async fn kind_scoped_question_finds_material_filed_under_another_kind() {
    let store = Arc::new(InMemoryStore::new());
    // The only relevant document is filed under a different kind.
    ingest_text(
        store.as_ref(),
        &TokenHashEmbedder,
        AnalysisKind::CaseSection,
        "notes.txt",
        "Notes about bail conditions for the accused person.",
    )
    .await;

    let engine = engine(store.clone(), Arc::new(CitingAnswerer));
    let session = engine.start_session(1, AnalysisKind::Bail).await.unwrap();
    let turn = engine
        .respond(session.id, "bail conditions", None)
        .await
        .unwrap();

    assert_eq!(turn.tier, SearchTier::UntypedVector);
    assert!(!turn.sources.is_empty());
}

#[tokio::test]
async fn deleting_a_document_does_not_delete_grounded_messages() {
    let store = Arc::new(InMemoryStore::new());
    let report = ingest_text(
        store.as_ref(),
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions require a surety bond.",
    )
    .await;

    let engine = engine(store.clone(), Arc::new(CitingAnswerer));
    let session = engine.start_session(1, AnalysisKind::Bail).await.unwrap();
    engine
        .respond(session.id, "What are the bail conditions?", None)
        .await
        .unwrap();

    assert!(store.delete_document(report.document_id).await.unwrap());
    let messages = store.session_messages(session.id).await.unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn documents_are_listed_by_kind_and_fetched_by_id() {
    let store = InMemoryStore::new();
    let bail = ingest_text(
        &store,
        &TokenHashEmbedder,
        AnalysisKind::Bail,
        "bail.txt",
        "Bail conditions.",
    )
    .await;
    ingest_text(
        &store,
        &TokenHashEmbedder,
        AnalysisKind::CaseSection,
        "sections.txt",
        "Section 302.",
    )
    .await;

    let all = store.list_documents(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let bail_only = store.list_documents(Some(AnalysisKind::Bail)).await.unwrap();
    assert_eq!(bail_only.len(), 1);
    assert_eq!(bail_only[0].id, bail.document_id);

    let fetched = store.get_document(bail.document_id).await.unwrap().unwrap();
    assert_eq!(fetched.kind, AnalysisKind::Bail);
    assert!(store.get_document(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_a_session_removes_it_and_its_messages() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store.clone(), Arc::new(CitingAnswerer));
    let session = engine.start_session(7, AnalysisKind::Bail).await.unwrap();
    engine.respond(session.id, "hello", None).await.unwrap();

    assert_eq!(store.list_sessions(7).await.unwrap().len(), 1);
    assert!(store.delete_session(session.id).await.unwrap());
    assert!(store.list_sessions(7).await.unwrap().is_empty());
    assert!(store
        .session_messages(session.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn fragment_neighborhood_expands_context_around_a_citation() {
    let store = InMemoryStore::new();
    let text: String = (0..2500)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    let report = ingest_text(&store, &TokenHashEmbedder, AnalysisKind::Bail, "long.txt", &text).await;

    let fragments = store.document_fragments(report.document_id);
    let middle = &fragments[1];
    let context = store
        .fragment_neighborhood(middle.id, 1)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(context.ordinal, 1);
    assert!(context.expanded_text.contains(&fragments[0].text));
    assert!(context.expanded_text.contains(&fragments[2].text));
}

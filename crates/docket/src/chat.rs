//! Chat turns over tiered retrieval.
//!
//! A turn loads the session, builds bounded history, retrieves relevant
//! fragments, assembles the grounded prompt, asks the answer generator,
//! and persists both messages. Retrieved sources are threaded through
//! the return value for each request; nothing is parked in shared
//! service state, so concurrent turns cannot corrupt each other's
//! citations.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use docket_core::context::{
    build_prompt, history_pairs, number_sources, AnswerGenerator, PromptInputs, SourceRef,
};
use docket_core::embedding::Embedder;
use docket_core::error::StoreError;
use docket_core::models::{AnalysisKind, ChatSession, NewMessage, Sender};
use docket_core::retrieval::{retrieve, RetrievalParams, SearchTier};
use docket_core::store::FragmentStore;

use crate::retry::{no_rollback, with_retries, RetryPolicy};

/// Shown when the answer generator fails; the turn still completes and
/// both messages are persisted.
pub const ANSWER_FAILURE_TEXT: &str =
    "I apologize, but I'm having trouble processing your request right now. Please try again.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The outcome of one chat turn. The source list is ordered to match
/// the `Source N` citation markers in the answer text.
#[derive(Debug)]
pub struct ChatTurn {
    pub session_id: Uuid,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub tier: SearchTier,
}

/// Drives chat sessions against the store, embedder, and answer
/// generator.
pub struct ChatEngine {
    store: Arc<dyn FragmentStore>,
    embedder: Arc<dyn Embedder>,
    answerer: Arc<dyn AnswerGenerator>,
    retrieval: RetrievalParams,
    retry: RetryPolicy,
}

impl ChatEngine {
    pub fn new(
        store: Arc<dyn FragmentStore>,
        embedder: Arc<dyn Embedder>,
        answerer: Arc<dyn AnswerGenerator>,
        retrieval: RetrievalParams,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            answerer,
            retrieval,
            retry,
        }
    }

    pub async fn start_session(
        &self,
        user_id: i64,
        kind: AnalysisKind,
    ) -> Result<ChatSession, ChatError> {
        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id,
            kind,
            started_at: Utc::now(),
        };
        with_retries(&self.retry, "create session", no_rollback, || {
            self.store.create_session(&session)
        })
        .await?;
        Ok(session)
    }

    /// Run one turn. `kind_filter` overrides the retrieval scope; when
    /// `None`, the session's own kind is used.
    pub async fn respond(
        &self,
        session_id: Uuid,
        message: &str,
        kind_filter: Option<AnalysisKind>,
    ) -> Result<ChatTurn, ChatError> {
        let session = with_retries(&self.retry, "load session", no_rollback, || {
            self.store.get_session(session_id)
        })
        .await?
        .ok_or(ChatError::SessionNotFound(session_id))?;

        let prior = with_retries(&self.retry, "load history", no_rollback, || {
            self.store.session_messages(session_id)
        })
        .await?;
        let is_first_message = prior.is_empty();

        let user_message = NewMessage {
            session_id,
            sender: Sender::User,
            text: message.to_string(),
            fragment_id: None,
        };
        with_retries(&self.retry, "append user message", no_rollback, || {
            self.store.append_message(&user_message)
        })
        .await?;

        let kind_filter = kind_filter.or(Some(session.kind));
        let outcome = retrieve(
            self.store.as_ref(),
            self.embedder.as_ref(),
            message,
            kind_filter,
            &self.retrieval,
        )
        .await;
        let sources = number_sources(&outcome.results);
        let history = history_pairs(&prior);

        // Only needed to phrase the empty-retrieval context; a counting
        // failure must not fail the turn.
        let corpus_size = match self.store.count_documents().await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "could not count documents");
                -1
            }
        };

        let prompt = build_prompt(&PromptInputs {
            query: message,
            kind: session.kind,
            results: &outcome.results,
            history: &history,
            is_first_message,
            corpus_size,
        });

        let answer = match self.answerer.complete(&prompt.system, &prompt.user).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "answer generation failed");
                ANSWER_FAILURE_TEXT.to_string()
            }
        };

        let assistant_message = NewMessage {
            session_id,
            sender: Sender::Assistant,
            text: answer.clone(),
            fragment_id: sources.first().map(|s| s.fragment_id),
        };
        with_retries(&self.retry, "append assistant message", no_rollback, || {
            self.store.append_message(&assistant_message)
        })
        .await?;

        Ok(ChatTurn {
            session_id,
            answer,
            sources,
            tier: outcome.tier,
        })
    }
}

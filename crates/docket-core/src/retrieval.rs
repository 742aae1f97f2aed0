//! Tiered retrieval orchestration.
//!
//! A query walks an ordered set of strategies until one yields results:
//!
//! 1. Kind-scoped vector search at the default similarity threshold.
//! 2. Unscoped vector search at a relaxed threshold, only when the
//!    scoped tier was empty and a kind filter was set.
//! 3. Lexical substring fallback when the vector path yields nothing
//!    after thresholding.
//!
//! Any failure on the vector path (embedding service down, store
//! erroring after retries) routes straight to the lexical tier. Each
//! tier runs at most once per query, and the tier that produced the
//! outcome is reported for observability. Retrieval never fails a chat
//! turn: in the worst case it returns an empty result set.

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::models::AnalysisKind;
use crate::rank::{rank_candidates, RankedFragment};
use crate::rank::{DEFAULT_SIMILARITY_THRESHOLD, RELAXED_SIMILARITY_THRESHOLD};
use crate::store::{FragmentHit, FragmentStore};

/// Which strategy produced a retrieval outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchTier {
    /// Kind-scoped nearest-neighbor search.
    TypedVector,
    /// Unscoped nearest-neighbor search at the relaxed threshold.
    UntypedVector,
    /// Lexical search after an empty vector pass.
    LexicalBackfill,
    /// Lexical search because the vector path failed.
    LexicalOnly,
}

impl SearchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTier::TypedVector => "typed-vector",
            SearchTier::UntypedVector => "untyped-vector",
            SearchTier::LexicalBackfill => "lexical-backfill",
            SearchTier::LexicalOnly => "lexical-only",
        }
    }
}

/// Retrieval tuning parameters.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Maximum candidates fetched and results returned.
    pub limit: i64,
    /// Similarity floor for the kind-scoped tier.
    pub similarity_threshold: f64,
    /// Similarity floor for the unscoped tier.
    pub relaxed_threshold: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            limit: 5,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            relaxed_threshold: RELAXED_SIMILARITY_THRESHOLD,
        }
    }
}

/// Ranked results plus the tier that produced them. Threaded through
/// the call chain per request; nothing retrieval-related is kept in
/// shared service state.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub results: Vec<RankedFragment>,
    pub tier: SearchTier,
}

/// Run the tiered search for one query.
pub async fn retrieve(
    store: &dyn FragmentStore,
    embedder: &dyn Embedder,
    query: &str,
    kind: Option<AnalysisKind>,
    params: &RetrievalParams,
) -> RetrievalOutcome {
    let query_vec = match embedder.embed(query).await {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "query embedding unavailable, vector path skipped");
            return lexical_tier(store, query, kind, params, SearchTier::LexicalOnly).await;
        }
    };

    let scoped = match store.vector_search(&query_vec, kind, params.limit).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(error = %err, "vector search failed, vector path skipped");
            return lexical_tier(store, query, kind, params, SearchTier::LexicalOnly).await;
        }
    };
    let ranked = rank_candidates(query, scoped, params.similarity_threshold);
    if !ranked.is_empty() {
        debug!(results = ranked.len(), tier = SearchTier::TypedVector.as_str(), "vector search matched");
        return RetrievalOutcome {
            results: ranked,
            tier: SearchTier::TypedVector,
        };
    }

    if kind.is_some() {
        debug!("scoped vector search empty, retrying without kind filter");
        match store.vector_search(&query_vec, None, params.limit).await {
            Ok(candidates) => {
                let ranked = rank_candidates(query, candidates, params.relaxed_threshold);
                if !ranked.is_empty() {
                    debug!(
                        results = ranked.len(),
                        tier = SearchTier::UntypedVector.as_str(),
                        "unscoped vector search matched"
                    );
                    return RetrievalOutcome {
                        results: ranked,
                        tier: SearchTier::UntypedVector,
                    };
                }
            }
            Err(err) => {
                warn!(error = %err, "unscoped vector search failed");
                return lexical_tier(store, query, kind, params, SearchTier::LexicalOnly).await;
            }
        }
    }

    lexical_tier(store, query, kind, params, SearchTier::LexicalBackfill).await
}

/// Substring fallback search. A failure here degrades to an empty
/// outcome rather than an error.
async fn lexical_tier(
    store: &dyn FragmentStore,
    query: &str,
    kind: Option<AnalysisKind>,
    params: &RetrievalParams,
    tier: SearchTier,
) -> RetrievalOutcome {
    debug!(tier = tier.as_str(), "falling back to lexical search");
    match store.lexical_search(query, kind, params.limit).await {
        Ok(hits) => RetrievalOutcome {
            results: lexical_results(hits),
            tier,
        },
        Err(err) => {
            warn!(error = %err, "lexical fallback failed, returning no results");
            RetrievalOutcome {
                results: Vec::new(),
                tier,
            }
        }
    }
}

/// Wrap lexical hits as results. The synthetic similarity doubles as
/// the final score; the preview is the head of the fragment.
fn lexical_results(hits: Vec<FragmentHit>) -> Vec<RankedFragment> {
    hits.into_iter()
        .map(|c| RankedFragment {
            fragment_id: c.fragment_id,
            document_id: c.document_id,
            document_name: c.document_name,
            kind: c.kind,
            ordinal: c.ordinal,
            similarity: c.similarity,
            lexical_score: 0.0,
            final_score: c.similarity,
            preview: head_preview(&c.text),
            relevance_reason: "Text match found".to_string(),
            text: c.text,
        })
        .collect()
}

fn head_preview(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 300 {
        format!("{}...", chars[..300].iter().collect::<String>())
    } else {
        text.to_string()
    }
}

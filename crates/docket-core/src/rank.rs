//! Hybrid ranking of search candidates.
//!
//! Blends raw vector similarity with lexical key-term overlap and a
//! fragment-length prior:
//!
//! ```text
//! final = 0.7 · similarity + 0.2 · lexical + 0.1 · length_prior
//! ```
//!
//! Candidates below the similarity threshold are dropped before
//! scoring. Ties on the final score break by fragment id so the result
//! order is total and independent of the store's return order.

use serde::Serialize;
use uuid::Uuid;

use crate::models::AnalysisKind;
use crate::store::FragmentHit;

/// Similarity floor for the kind-scoped vector tier.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.2;
/// Relaxed floor used when the kind-scoped tier comes back empty.
pub const RELAXED_SIMILARITY_THRESHOLD: f64 = 0.1;
/// Synthetic similarity attached to lexical fallback matches.
pub const LEXICAL_FALLBACK_SIMILARITY: f64 = 0.5;

const SIMILARITY_WEIGHT: f64 = 0.7;
const LEXICAL_WEIGHT: f64 = 0.2;
const LENGTH_WEIGHT: f64 = 0.1;

const PREVIEW_CHARS: usize = 300;
const PREVIEW_LEAD_CHARS: usize = 100;

/// Stopwords dropped during key-term extraction.
const STOPWORDS: &[&str] = &[
    "the", "and", "or", "in", "on", "at", "to", "a", "an", "is", "are", "was", "were", "be",
    "this", "that", "with", "for", "as", "by", "of", "me", "about", "explain",
];

/// Legal and jurisdiction terms kept regardless of token length.
const DOMAIN_TERMS: &[&str] = &[
    "law", "act", "rule", "code", "state", "amendment", "orissa", "odisha",
];

/// A fully scored retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedFragment {
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub kind: AnalysisKind,
    pub ordinal: i64,
    pub text: String,
    /// Raw similarity from the search backend.
    pub similarity: f64,
    /// Share of key terms present in the fragment text.
    pub lexical_score: f64,
    pub final_score: f64,
    /// Excerpt centered on the densest key-term window.
    pub preview: String,
    pub relevance_reason: String,
}

/// Score, sort, and annotate `candidates` against `query`, dropping
/// everything below `threshold`.
pub fn rank_candidates(
    query: &str,
    candidates: Vec<FragmentHit>,
    threshold: f64,
) -> Vec<RankedFragment> {
    let terms = extract_key_terms(query);

    let mut ranked: Vec<RankedFragment> = candidates
        .into_iter()
        .filter(|c| c.similarity >= threshold)
        .map(|c| {
            let lexical = lexical_score(&c.text, &terms);
            let prior = length_prior(&c.text);
            let final_score =
                SIMILARITY_WEIGHT * c.similarity + LEXICAL_WEIGHT * lexical + LENGTH_WEIGHT * prior;
            RankedFragment {
                fragment_id: c.fragment_id,
                document_id: c.document_id,
                document_name: c.document_name,
                kind: c.kind,
                ordinal: c.ordinal,
                similarity: c.similarity,
                lexical_score: lexical,
                final_score,
                preview: build_preview(&c.text, &terms),
                relevance_reason: relevance_reason(c.similarity).to_string(),
                text: c.text,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fragment_id.cmp(&b.fragment_id))
    });
    ranked
}

/// Key terms of a query: lowercased word tokens minus stopwords, keeping
/// domain terms always and any other token longer than 2 characters.
/// Duplicates are collapsed, first occurrence wins.
pub fn extract_key_terms(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();

    for token in lower.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if token.is_empty() || STOPWORDS.contains(&token) {
            continue;
        }
        if token.chars().count() > 2 || DOMAIN_TERMS.contains(&token) {
            if !terms.iter().any(|t| t == token) {
                terms.push(token.to_string());
            }
        }
    }

    terms
}

/// Share of `terms` present in `text`, case-insensitively. `0.0` when
/// there are no terms.
pub fn lexical_score(text: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}

fn length_prior(text: &str) -> f64 {
    (text.chars().count() as f64 / 1000.0).clamp(0.8, 1.0)
}

/// Human-readable explanation bucketed on raw similarity.
pub fn relevance_reason(similarity: f64) -> &'static str {
    if similarity > 0.8 {
        "Highly relevant - strong semantic match"
    } else if similarity > 0.6 {
        "Moderately relevant - good conceptual match"
    } else if similarity > 0.4 {
        "Somewhat relevant - partial topic overlap"
    } else {
        "Low relevance - minimal connection"
    }
}

/// Excerpt of up to 300 characters around the key-term occurrence whose
/// window contains the most distinct key terms, with ellipsis markers on
/// truncated edges. Falls back to the head of the text when no term
/// matches.
pub fn build_preview(text: &str, terms: &[String]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let mut best_start = 0usize;
    let mut best_hits = 0usize;
    for term in terms {
        if let Some(pos) = find_term(&lower, term) {
            let start = pos.saturating_sub(PREVIEW_LEAD_CHARS);
            let end = (start + PREVIEW_CHARS).min(chars.len());
            let window: String = lower[start..end].iter().collect();
            let hits = terms.iter().filter(|t| window.contains(t.as_str())).count();
            if hits > best_hits {
                best_hits = hits;
                best_start = start;
            }
        }
    }

    let end = (best_start + PREVIEW_CHARS).min(chars.len());
    let excerpt: String = chars[best_start..end].iter().collect();
    let mut preview = excerpt.trim().to_string();
    if best_start > 0 {
        preview = format!("...{preview}");
    }
    if end < chars.len() {
        preview.push_str("...");
    }
    preview
}

/// First word-boundary occurrence of `term` in the lowercased haystack.
fn find_term(haystack: &[char], term: &str) -> Option<usize> {
    let needle: Vec<char> = term.chars().collect();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    for i in 0..=haystack.len() - needle.len() {
        if haystack[i..i + needle.len()] != needle[..] {
            continue;
        }
        let before_ok = i == 0 || !is_word_char(haystack[i - 1]);
        let after = i + needle.len();
        let after_ok = after == haystack.len() || !is_word_char(haystack[after]);
        if before_ok && after_ok {
            return Some(i);
        }
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

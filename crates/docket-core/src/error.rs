//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Transient store failures are retried by the application's retry
//! wrapper; everything else propagates as a typed error. Lookup misses
//! are surfaced as `Option`/explicit variants, never panics.

use thiserror::Error;

/// The declared file format has no decoder. Supported formats whose
/// decoder fails do not produce this; they degrade to an error-tagged
/// text payload so ingestion can still record the document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format: .{extension}")]
    UnsupportedFormat { extension: String },
}

/// The external embedding service is unreachable or returned malformed
/// output. Retrieval reacts by falling back to lexical search; ingestion
/// stores the affected fragment without a vector.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
}

/// Failure from the fragment store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection loss, pool exhaustion, serialization conflict. Safe to
    /// retry after rolling back.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Anything the store rejected outright. Not retried.
    #[error("store query failed: {0}")]
    Query(String),
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// A string failed to parse as an [`AnalysisKind`](crate::models::AnalysisKind).
#[derive(Debug, Error)]
#[error("unknown analysis kind: {0}")]
pub struct UnknownKind(pub String);

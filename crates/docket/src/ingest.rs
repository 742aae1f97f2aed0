//! Ingestion pipeline: extraction → chunking → embedding → storage.
//!
//! One document's fragments and vectors are written in a single atomic
//! store operation; a failure rolls the whole set back so the corpus
//! never holds a partially written document. A fragment whose embedding
//! call failed is still written, without a vector, and shows up in the
//! report's `embedded_count` gap.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use docket_core::chunk::{fragments_from_text, ChunkParams};
use docket_core::embedding::Embedder;
use docket_core::models::{AnalysisKind, Document};
use docket_core::store::FragmentStore;

use crate::extract;
use crate::retry::{no_rollback, with_retries, RetryPolicy};

/// One upload: raw bytes plus the metadata the caller declared.
#[derive(Debug)]
pub struct IngestParams<'a> {
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub title: &'a str,
    pub kind: AnalysisKind,
    pub user_id: i64,
}

/// What one ingestion produced.
#[derive(Debug)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub fragment_count: usize,
    /// How many fragments got a vector; less than `fragment_count` when
    /// the embedding service was unavailable for some of them.
    pub embedded_count: usize,
    pub extraction_warning: Option<String>,
}

/// Ingest one document end to end.
pub async fn ingest_document(
    store: &dyn FragmentStore,
    embedder: &dyn Embedder,
    chunking: &ChunkParams,
    retry: &RetryPolicy,
    params: IngestParams<'_>,
) -> Result<IngestReport> {
    let extraction = extract::extract(params.bytes, params.filename)?;

    let document_id = Uuid::new_v4();
    let document = Document {
        id: document_id,
        user_id: params.user_id,
        name: params.title.to_string(),
        kind: params.kind,
        content_ref: format!("uploads/{}-{}", document_id, sanitize_filename(params.filename)),
        uploaded_at: Utc::now(),
    };

    let fragments = fragments_from_text(document_id, &extraction.text, chunking);

    let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(fragments.len());
    let mut embedded_count = 0usize;
    for fragment in &fragments {
        match embedder.embed(&fragment.text).await {
            Ok(vector) => {
                embedded_count += 1;
                vectors.push(Some(vector));
            }
            Err(err) => {
                warn!(
                    document = %document_id,
                    ordinal = fragment.ordinal,
                    error = %err,
                    "embedding unavailable, fragment stored without vector"
                );
                vectors.push(None);
            }
        }
    }

    with_retries(retry, "ingest document", no_rollback, || {
        store.ingest_document(&document, &fragments, &vectors)
    })
    .await?;

    info!(
        document = %document_id,
        kind = document.kind.as_str(),
        fragments = fragments.len(),
        embedded = embedded_count,
        "document ingested"
    );

    Ok(IngestReport {
        document_id,
        fragment_count: fragments.len(),
        embedded_count,
        extraction_warning: extraction.warning,
    })
}

/// Keep the declared filename safe for a content reference.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_separators_and_spaces() {
        assert_eq!(
            sanitize_filename("../etc/case file.pdf"),
            ".._etc_case_file.pdf"
        );
        assert_eq!(sanitize_filename("brief-v2.docx"), "brief-v2.docx");
    }
}

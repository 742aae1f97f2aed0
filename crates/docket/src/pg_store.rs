//! Postgres + pgvector [`FragmentStore`] implementation.
//!
//! Every operation maps to parameterized SQL; vector and filter values
//! are always bound, never interpolated. Nearest-neighbor search uses
//! the pgvector cosine distance operator, reported to callers as
//! `similarity = 1 − distance`. Failures are classified so the retry
//! wrapper can distinguish transient connection trouble from permanent
//! query errors.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use docket_core::error::StoreError;
use docket_core::models::{
    AnalysisKind, ChatMessage, ChatSession, Document, Fragment, NewMessage, Sender,
};
use docket_core::rank::LEXICAL_FALLBACK_SIMILARITY;
use docket_core::store::{FragmentContext, FragmentHit, FragmentStore};

/// Postgres implementation of the [`FragmentStore`] trait.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx failure onto the store taxonomy. Connection-level
/// trouble, pool exhaustion, serialization failures, and deadlocks are
/// transient; everything else is a permanent query error.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if code == "40001" || code == "40P01" || code.starts_with("08") => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        },
        _ => StoreError::Query(err.to_string()),
    }
}

/// pgvector text literal for a bound parameter, cast with `::vector`.
fn vector_literal(v: &[f32]) -> String {
    let mut out = String::with_capacity(v.len() * 10 + 2);
    out.push('[');
    for (i, x) in v.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&x.to_string());
    }
    out.push(']');
    out
}

fn parse_kind(raw: &str) -> Result<AnalysisKind, StoreError> {
    AnalysisKind::from_str(raw).map_err(|e| StoreError::Query(e.to_string()))
}

fn document_from_row(row: &PgRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        kind: parse_kind(row.get::<String, _>("kind").as_str())?,
        content_ref: row.get("content_ref"),
        uploaded_at: row.get("uploaded_at"),
    })
}

fn hit_from_row(row: &PgRow, similarity: f64) -> Result<FragmentHit, StoreError> {
    Ok(FragmentHit {
        fragment_id: row.get("fragment_id"),
        document_id: row.get("document_id"),
        document_name: row.get("document_name"),
        kind: parse_kind(row.get::<String, _>("kind").as_str())?,
        ordinal: row.get("ordinal"),
        text: row.get("text"),
        similarity,
    })
}

fn message_from_row(row: &PgRow) -> Result<ChatMessage, StoreError> {
    let sender_raw: String = row.get("sender");
    let sender = Sender::parse(&sender_raw)
        .ok_or_else(|| StoreError::Query(format!("unknown message sender: {sender_raw}")))?;
    Ok(ChatMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        sender,
        text: row.get("text"),
        sent_at: row.get("sent_at"),
        fragment_id: row.get("fragment_id"),
    })
}

#[async_trait]
impl FragmentStore for PgStore {
    async fn ingest_document(
        &self,
        document: &Document,
        fragments: &[Fragment],
        vectors: &[Option<Vec<f32>>],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Re-ingestion replaces the whole fragment set; embeddings go
        // with their fragments by cascade.
        sqlx::query("DELETE FROM fragments WHERE document_id = $1")
            .bind(document.id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, name, kind, content_ref, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                content_ref = excluded.content_ref
            "#,
        )
        .bind(document.id)
        .bind(document.user_id)
        .bind(&document.name)
        .bind(document.kind.as_str())
        .bind(&document.content_ref)
        .bind(document.uploaded_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        for (i, fragment) in fragments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO fragments (id, document_id, ordinal, text, hash) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(fragment.id)
            .bind(fragment.document_id)
            .bind(fragment.ordinal)
            .bind(&fragment.text)
            .bind(&fragment.hash)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

            if let Some(vector) = vectors.get(i).and_then(|v| v.as_ref()) {
                sqlx::query(
                    "INSERT INTO embeddings (fragment_id, vector) VALUES ($1, $2::vector)",
                )
                .bind(fragment.id)
                .bind(vector_literal(vector))
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            }
        }

        tx.commit().await.map_err(classify)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, name, kind, content_ref, uploaded_at FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(
        &self,
        kind: Option<AnalysisKind>,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT id, user_id, name, kind, content_ref, uploaded_at FROM documents \
                     WHERE kind = $1 ORDER BY uploaded_at DESC",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, user_id, name, kind, content_ref, uploaded_at FROM documents \
                     ORDER BY uploaded_at DESC",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(classify)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn count_documents(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError> {
        let literal = vector_literal(query_vec);
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    r#"
                    SELECT f.id AS fragment_id, f.document_id, f.ordinal, f.text,
                           d.name AS document_name, d.kind,
                           1 - (e.vector <=> $1::vector) AS similarity
                    FROM fragments f
                    JOIN documents d ON d.id = f.document_id
                    JOIN embeddings e ON e.fragment_id = f.id
                    WHERE d.kind = $2
                    ORDER BY e.vector <=> $1::vector
                    LIMIT $3
                    "#,
                )
                .bind(&literal)
                .bind(kind.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT f.id AS fragment_id, f.document_id, f.ordinal, f.text,
                           d.name AS document_name, d.kind,
                           1 - (e.vector <=> $1::vector) AS similarity
                    FROM fragments f
                    JOIN documents d ON d.id = f.document_id
                    JOIN embeddings e ON e.fragment_id = f.id
                    ORDER BY e.vector <=> $1::vector
                    LIMIT $2
                    "#,
                )
                .bind(&literal)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(classify)?;

        rows.iter()
            .map(|row| {
                let similarity: f64 = row.get("similarity");
                hit_from_row(row, similarity)
            })
            .collect()
    }

    async fn lexical_search(
        &self,
        query: &str,
        kind: Option<AnalysisKind>,
        limit: i64,
    ) -> Result<Vec<FragmentHit>, StoreError> {
        let pattern = format!("%{}%", query.to_lowercase());
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    r#"
                    SELECT f.id AS fragment_id, f.document_id, f.ordinal, f.text,
                           d.name AS document_name, d.kind
                    FROM fragments f
                    JOIN documents d ON d.id = f.document_id
                    WHERE LOWER(f.text) LIKE $1 AND d.kind = $2
                    ORDER BY LENGTH(f.text) DESC
                    LIMIT $3
                    "#,
                )
                .bind(&pattern)
                .bind(kind.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT f.id AS fragment_id, f.document_id, f.ordinal, f.text,
                           d.name AS document_name, d.kind
                    FROM fragments f
                    JOIN documents d ON d.id = f.document_id
                    WHERE LOWER(f.text) LIKE $1
                    ORDER BY LENGTH(f.text) DESC
                    LIMIT $2
                    "#,
                )
                .bind(&pattern)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(classify)?;

        rows.iter()
            .map(|row| hit_from_row(row, LEXICAL_FALLBACK_SIMILARITY))
            .collect()
    }

    async fn fragment_neighborhood(
        &self,
        fragment_id: Uuid,
        radius: i64,
    ) -> Result<Option<FragmentContext>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT f.id AS fragment_id, f.document_id, f.ordinal, f.text,
                   d.name AS document_name, d.kind
            FROM fragments f
            JOIN documents d ON d.id = f.document_id
            WHERE f.id = $1
            "#,
        )
        .bind(fragment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let target = hit_from_row(&row, 0.0)?;

        let neighbor_texts: Vec<String> = sqlx::query_scalar(
            "SELECT text FROM fragments WHERE document_id = $1 AND ordinal BETWEEN $2 AND $3 \
             ORDER BY ordinal",
        )
        .bind(target.document_id)
        .bind(target.ordinal - radius)
        .bind(target.ordinal + radius)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(Some(FragmentContext {
            fragment_id: target.fragment_id,
            document_id: target.document_id,
            document_name: target.document_name,
            kind: target.kind,
            ordinal: target.ordinal,
            text: target.text,
            expanded_text: neighbor_texts.join(" "),
        }))
    }

    async fn create_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO sessions (id, user_id, kind, started_at) VALUES ($1, $2, $3, $4)")
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.kind.as_str())
            .bind(session.started_at)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query("SELECT id, user_id, kind, started_at FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.map(|row| {
            Ok(ChatSession {
                id: row.get("id"),
                user_id: row.get("user_id"),
                kind: parse_kind(row.get::<String, _>("kind").as_str())?,
                started_at: row.get("started_at"),
            })
        })
        .transpose()
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, started_at FROM sessions WHERE user_id = $1 \
             ORDER BY started_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter()
            .map(|row| {
                Ok(ChatSession {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    kind: parse_kind(row.get::<String, _>("kind").as_str())?,
                    started_at: row.get("started_at"),
                })
            })
            .collect()
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, message: &NewMessage) -> Result<ChatMessage, StoreError> {
        // GREATEST against the session's latest timestamp keeps message
        // times monotonically non-decreasing even across clock skew.
        let row = sqlx::query(
            r#"
            INSERT INTO messages (session_id, sender, text, sent_at, fragment_id)
            VALUES (
                $1, $2, $3,
                GREATEST(now(), COALESCE(
                    (SELECT MAX(sent_at) FROM messages WHERE session_id = $1), now())),
                $4
            )
            RETURNING id, session_id, sender, text, sent_at, fragment_id
            "#,
        )
        .bind(message.session_id)
        .bind(message.sender.as_str())
        .bind(&message.text)
        .bind(message.fragment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        message_from_row(&row)
    }

    async fn session_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, sender, text, sent_at, fragment_id FROM messages \
             WHERE session_id = $1 ORDER BY sent_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter().map(message_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_is_bracketed_and_comma_separated() {
        assert_eq!(vector_literal(&[1.0, -2.5, 0.125]), "[1,-2.5,0.125]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn classify_treats_io_errors_as_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(classify(err).is_transient());
    }

    #[test]
    fn classify_treats_pool_timeout_as_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn classify_treats_row_not_found_as_permanent() {
        assert!(!classify(sqlx::Error::RowNotFound).is_transient());
    }
}

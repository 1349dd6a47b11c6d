//! SQLite-backed [`VectorStore`].
//!
//! Chunks live in the `chunks` table (see [`migrate`](crate::migrate)) with
//! their embedding as a little-endian f32 blob; `chunks_fts` mirrors the
//! chunk text for keyword search.
//!
//! - **Dense**: loads the embeddings that pass the filter and ranks them by
//!   cosine similarity in Rust.
//! - **Sparse**: an FTS5 `MATCH` over the query terms joined with `OR`,
//!   ranked by FTS5's built-in BM25 (`rank`, negated so higher is better).
//!   FTS5 weighs terms itself; the query's term weights are not used.
//!
//! Writing is limited to [`SqliteStore::upsert_chunk`], used to seed local
//! databases and tests; the production corpus is maintained by ingestion.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use campus_assistant_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use campus_assistant_core::error::ExternalError;
use campus_assistant_core::models::{Chunk, ChunkMetadata, SourceType};
use campus_assistant_core::sparse::SparseQuery;
use campus_assistant_core::store::{rank_hits, SearchFilter, StoreHit, VectorStore};

const SERVICE: &str = "sqlite";

const FILTER_SQL: &str = "(?1 IS NULL OR c.source_type = ?1) \
     AND (?2 IS NULL OR c.course_id = ?2) \
     AND (?3 IS NULL OR c.module_id = ?3)";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts or replaces a chunk and its FTS row.
    pub async fn upsert_chunk(&self, chunk: &Chunk, embedding: Option<&[f32]>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, text, url, title, source_type, course_id, module_id, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                url = excluded.url,
                title = excluded.title,
                source_type = excluded.source_type,
                course_id = excluded.course_id,
                module_id = excluded.module_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.text)
        .bind(&chunk.metadata.url)
        .bind(&chunk.metadata.title)
        .bind(chunk.metadata.source_type.as_str())
        .bind(chunk.metadata.course_id)
        .bind(chunk.metadata.module_id)
        .bind(embedding.map(vec_to_blob))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn dense_search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        let sql = format!(
            "SELECT c.id, c.text, c.url, c.title, c.source_type, c.course_id, c.module_id, c.embedding \
             FROM chunks c WHERE c.embedding IS NOT NULL AND {}",
            FILTER_SQL
        );
        let rows = bind_filter(sqlx::query(&sql), filter)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
            hits.push(StoreHit {
                chunk: row_to_chunk(row)?,
                score,
            });
        }
        Ok(rank_hits(hits, k))
    }

    async fn sparse_search(
        &self,
        query: &SparseQuery,
        filter: &SearchFilter,
        k: usize,
    ) -> Result<Vec<StoreHit>, ExternalError> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT c.id, c.text, c.url, c.title, c.source_type, c.course_id, c.module_id, \
                    chunks_fts.rank AS rank \
             FROM chunks_fts JOIN chunks c ON c.id = chunks_fts.chunk_id \
             WHERE chunks_fts MATCH ?4 AND {} \
             ORDER BY rank LIMIT ?5",
            FILTER_SQL
        );
        let rows = bind_filter(sqlx::query(&sql), filter)
            .bind(match_expr)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: f64 = row.get("rank");
            hits.push(StoreHit {
                chunk: row_to_chunk(row)?,
                score: -rank, // negate so higher = better
            });
        }
        Ok(rank_hits(hits, k))
    }
}

fn bind_filter<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    filter: &SearchFilter,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(filter.source_type.map(|s| s.as_str()))
        .bind(filter.course_id)
        .bind(filter.module_id)
}

/// `"neural" OR "networks"`; `None` when there is nothing to match.
fn fts_match_expression(query: &SparseQuery) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    Some(
        query
            .terms
            .iter()
            .map(|t| format!("\"{}\"", t.term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk, ExternalError> {
    let source_type: String = row.get("source_type");
    let source_type: SourceType = source_type
        .parse()
        .map_err(|e: String| ExternalError::invalid(SERVICE, e))?;
    Ok(Chunk {
        id: row.get("id"),
        text: row.get("text"),
        metadata: ChunkMetadata {
            url: row.get("url"),
            title: row.get("title"),
            source_type,
            course_id: row.get("course_id"),
            module_id: row.get("module_id"),
        },
    })
}

fn db_error(err: sqlx::Error) -> ExternalError {
    match err {
        sqlx::Error::PoolTimedOut => ExternalError::transport(SERVICE, "connection pool timed out"),
        sqlx::Error::Io(e) => ExternalError::transport(SERVICE, e.to_string()),
        other => ExternalError::unavailable(SERVICE, other.to_string()),
    }
}

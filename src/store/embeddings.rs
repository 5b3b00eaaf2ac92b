//! Embedding blob storage.
//!
//! Vectors are stored as little-endian `f32` blobs; encoding and similarity
//! live in [`crate::embeddings`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::instrument;

use super::{Store, StoreError, to_u64};
use crate::paper::PaperId;

/// One stored embedding row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEmbedding {
    pub paper_id: PaperId,
    pub model: String,
    pub dimensions: u32,
    #[serde(skip)]
    pub blob: Vec<u8>,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct EmbeddingRow {
    paper_id: String,
    model: String,
    dimensions: i64,
    vector: Vec<u8>,
    created: Option<DateTime<Utc>>,
}

impl From<EmbeddingRow> for StoredEmbedding {
    fn from(row: EmbeddingRow) -> Self {
        Self {
            paper_id: PaperId::from_stored(row.paper_id),
            model: row.model,
            dimensions: u32::try_from(row.dimensions).unwrap_or(0),
            blob: row.vector,
            created: row.created,
        }
    }
}

impl Store {
    /// Inserts or replaces the embedding for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails, including a
    /// check violation when `blob` is not `dimensions * 4` bytes.
    #[instrument(skip(self, blob), fields(paper_id = %id, bytes = blob.len()))]
    pub async fn upsert_embedding(
        &self,
        id: &PaperId,
        model: &str,
        blob: &[u8],
        dimensions: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO embeddings (paper_id, model, dimensions, vector, created)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(paper_id) DO UPDATE SET
                model = excluded.model,
                dimensions = excluded.dimensions,
                vector = excluded.vector,
                created = excluded.created
            ",
        )
        .bind(id.as_str())
        .bind(model)
        .bind(i64::from(dimensions))
        .bind(blob)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Reads the embedding for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_embedding(&self, id: &PaperId) -> Result<Option<StoredEmbedding>, StoreError> {
        let row = sqlx::query_as::<_, EmbeddingRow>(
            "SELECT paper_id, model, dimensions, vector, created FROM embeddings WHERE paper_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(StoredEmbedding::from))
    }

    /// Reads every stored embedding, ascending by paper ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn all_embeddings(&self) -> Result<Vec<StoredEmbedding>, StoreError> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            "SELECT paper_id, model, dimensions, vector, created FROM embeddings ORDER BY paper_id",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(StoredEmbedding::from).collect())
    }

    /// Number of stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_embeddings(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embeddings")
            .fetch_one(self.db.pool())
            .await?;
        Ok(to_u64(count))
    }
}

//! Durable store for papers, citation edges, embeddings and the sync checkpoint.
//!
//! All durable mutation in the mirror goes through [`Store`]. Each write
//! method runs in its own transaction (or joins the batch transaction it is
//! given) and invalidates the matching [`FrontCache`] entries after commit,
//! so the cache never serves a row older than the last committed write.
//!
//! # Tables
//!
//! | Table | Owner | Notes |
//! |-------|-------|-------|
//! | `papers` | sync engine (metadata), download pipeline (artifacts) | FTS5 shadow `papers_fts` kept by triggers |
//! | `paper_categories` | sync engine | rewritten with each upsert |
//! | `citations` | citation engine | replaced per citing paper |
//! | `embeddings` | embedding import | one row per paper |
//! | `sync_checkpoint` | sync engine | single row, written inside batch transactions |

/// Column list shared by every paper `SELECT`.
macro_rules! paper_columns {
    () => {
        "id, created, updated, title, abstract, authors, categories, comments, journal_ref, \
         doi, license, pdf_path, pdf_downloaded, source_path, source_downloaded"
    };
}
pub(crate) use paper_columns;

mod checkpoint;
mod citations;
mod embeddings;
mod error;
mod papers;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;

use crate::cache::FrontCache;
use crate::db::Database;
use crate::paper::{Paper, PaperId};

pub use checkpoint::SyncCheckpoint;
pub use embeddings::StoredEmbedding;
pub use error::{DbErrorKind, StoreError};
pub use papers::{CategoryCount, SearchHit, fts_query};

/// Row counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub papers: u64,
    pub pdfs_downloaded: u64,
    pub sources_downloaded: u64,
    pub citation_edges: u64,
    pub embeddings: u64,
    pub categories: u64,
}

/// Transactional access to the mirror database, fronted by a paper cache.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    cache: FrontCache,
}

impl Store {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database, cache: FrontCache) -> Self {
        Self { db, cache }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Returns the front cache shared with this store.
    #[must_use]
    pub fn cache(&self) -> &FrontCache {
        &self.cache
    }

    /// Counts rows in every table in a single statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r"
            SELECT
                (SELECT COUNT(*) FROM papers),
                (SELECT COUNT(*) FROM papers WHERE pdf_downloaded = 1),
                (SELECT COUNT(*) FROM papers WHERE source_downloaded = 1),
                (SELECT COUNT(*) FROM citations),
                (SELECT COUNT(*) FROM embeddings),
                (SELECT COUNT(DISTINCT category) FROM paper_categories)
            ",
        )
        .fetch_one(self.db.pool())
        .await?;

        Ok(StoreCounts {
            papers: to_u64(row.0),
            pdfs_downloaded: to_u64(row.1),
            sources_downloaded: to_u64(row.2),
            citation_edges: to_u64(row.3),
            embeddings: to_u64(row.4),
            categories: to_u64(row.5),
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PaperRow {
    id: String,
    created: Option<NaiveDate>,
    updated: Option<NaiveDate>,
    title: String,
    #[sqlx(rename = "abstract")]
    abstract_text: String,
    authors: String,
    categories: String,
    comments: String,
    journal_ref: String,
    doi: String,
    license: String,
    pdf_path: String,
    pdf_downloaded: bool,
    source_path: String,
    source_downloaded: bool,
}

impl From<PaperRow> for Paper {
    fn from(row: PaperRow) -> Self {
        Self {
            id: PaperId::from_stored(row.id),
            created: row.created,
            updated: row.updated,
            title: row.title,
            abstract_text: row.abstract_text,
            authors: row.authors,
            categories: row.categories,
            comments: row.comments,
            journal_ref: row.journal_ref,
            doi: row.doi,
            license: row.license,
            pdf_path: row.pdf_path,
            pdf_downloaded: row.pdf_downloaded,
            source_path: row.source_path,
            source_downloaded: row.source_downloaded,
        }
    }
}

/// Encodes IDs as a JSON array for `json_each(?)` membership tests.
pub(crate) fn id_list_json(ids: &[PaperId]) -> String {
    serde_json::Value::Array(
        ids.iter()
            .map(|id| serde_json::Value::String(id.as_str().to_string()))
            .collect(),
    )
    .to_string()
}

pub(crate) fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    use super::*;

    pub async fn memory_store() -> Store {
        let db = Database::new_in_memory().await.unwrap();
        Store::new(db, FrontCache::default())
    }

    pub fn paper(id: &str, title: &str, categories: &str) -> Paper {
        let mut paper = Paper::new(PaperId::parse(id).unwrap(), title);
        paper.abstract_text = format!("Abstract of {title}");
        paper.categories = categories.to_string();
        paper
    }

    pub fn pid(raw: &str) -> PaperId {
        PaperId::parse(raw).unwrap()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::test_support::*;

    #[tokio::test]
    async fn test_counts_on_empty_store() {
        let store = memory_store().await;
        let counts = store.counts().await.unwrap();
        assert_eq!(counts, super::StoreCounts::default());
    }

    #[tokio::test]
    async fn test_counts_reflect_rows() {
        let store = memory_store().await;
        store
            .upsert_paper(&paper("2401.00001", "A", "cs.LG cs.AI"))
            .await
            .unwrap();
        store
            .upsert_paper(&paper("2401.00002", "B", "cs.LG"))
            .await
            .unwrap();
        store
            .replace_citations(&pid("2401.00002"), &[pid("2401.00001")])
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.papers, 2);
        assert_eq!(counts.citation_edges, 1);
        assert_eq!(counts.categories, 2);
    }

    #[test]
    fn test_id_list_json() {
        let json = super::id_list_json(&[pid("2401.00001"), pid("hep-th/9901001")]);
        assert_eq!(json, r#"["2401.00001","hep-th/9901001"]"#);
    }
}

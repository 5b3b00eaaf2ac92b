//! Paper upserts, reads, artifact state, categories and full-text search.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sqlx::{FromRow, Sqlite, Transaction};
use tracing::{debug, instrument};

use super::{PaperRow, Store, StoreError, id_list_json, paper_columns, to_i64, to_u64};
use crate::paper::{ArtifactKind, Paper, PaperId};

/// Number of papers carrying a category tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub papers: u64,
}

/// One full-text search result. Lower `rank` is better (FTS5 `bm25`).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub paper: Paper,
    pub rank: f64,
}

#[derive(Debug, FromRow)]
struct SearchRow {
    #[sqlx(flatten)]
    paper: PaperRow,
    rank: f64,
}

/// Builds an FTS5 `MATCH` expression from free text.
///
/// Each whitespace-separated term is quoted, so FTS operators and
/// punctuation in user input are matched literally; terms are ANDed.
/// Returns `None` when nothing searchable remains.
#[must_use]
pub fn fts_query(raw: &str) -> Option<String> {
    let terms: Vec<String> = raw
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

/// Inserts or updates one paper's metadata inside `tx`.
///
/// Artifact columns are left untouched on conflict so a re-harvest never
/// clears download state.
pub(super) async fn upsert_in(
    tx: &mut Transaction<'_, Sqlite>,
    paper: &Paper,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO papers (
            id, created, updated, title, abstract, authors, categories,
            comments, journal_ref, doi, license
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            created = excluded.created,
            updated = excluded.updated,
            title = excluded.title,
            abstract = excluded.abstract,
            authors = excluded.authors,
            categories = excluded.categories,
            comments = excluded.comments,
            journal_ref = excluded.journal_ref,
            doi = excluded.doi,
            license = excluded.license,
            harvested_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
        ",
    )
    .bind(paper.id.as_str())
    .bind(paper.created)
    .bind(paper.updated)
    .bind(&paper.title)
    .bind(&paper.abstract_text)
    .bind(&paper.authors)
    .bind(&paper.categories)
    .bind(&paper.comments)
    .bind(&paper.journal_ref)
    .bind(&paper.doi)
    .bind(&paper.license)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM paper_categories WHERE paper_id = ?")
        .bind(paper.id.as_str())
        .execute(&mut **tx)
        .await?;

    for category in paper.category_list() {
        sqlx::query("INSERT OR IGNORE INTO paper_categories (paper_id, category) VALUES (?, ?)")
            .bind(paper.id.as_str())
            .bind(category)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

impl Store {
    /// Inserts or updates a single paper's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    #[instrument(skip(self, paper), fields(paper_id = %paper.id))]
    pub async fn upsert_paper(&self, paper: &Paper) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;
        upsert_in(&mut tx, paper).await?;
        tx.commit().await?;
        self.cache.invalidate(&paper.id);
        Ok(())
    }

    /// Inserts or updates many papers in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails; nothing is
    /// committed in that case.
    #[instrument(skip(self, papers), fields(count = papers.len()))]
    pub async fn upsert_papers(&self, papers: &[Paper]) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;
        for paper in papers {
            upsert_in(&mut tx, paper).await?;
        }
        tx.commit().await?;
        self.cache.invalidate_many(papers.iter().map(|p| &p.id));
        Ok(())
    }

    /// Reads a paper through the front cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the store read fails.
    pub async fn get_paper(&self, id: &PaperId) -> Result<Option<Arc<Paper>>, StoreError> {
        if let Some(paper) = self.cache.get(id) {
            return Ok(Some(paper));
        }

        let ticket = self.cache.ticket();
        let Some(paper) = self.load_paper(id).await? else {
            return Ok(None);
        };
        let paper = Arc::new(paper);
        self.cache.insert(ticket, Arc::clone(&paper));
        Ok(Some(paper))
    }

    /// Reads a paper directly from the database, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn load_paper(&self, id: &PaperId) -> Result<Option<Paper>, StoreError> {
        let row = sqlx::query_as::<_, PaperRow>(concat!(
            "SELECT ",
            paper_columns!(),
            " FROM papers WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(Paper::from))
    }

    /// Reads several papers, returned in the order requested.
    ///
    /// Cached papers are served from the cache; the rest are loaded in one
    /// query. IDs with no row are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_papers(&self, ids: &[PaperId]) -> Result<Vec<Arc<Paper>>, StoreError> {
        let mut found: HashMap<PaperId, Arc<Paper>> = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.cache.get(id) {
                Some(paper) => {
                    found.insert(id.clone(), paper);
                }
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            let ticket = self.cache.ticket();
            let rows = sqlx::query_as::<_, PaperRow>(concat!(
                "SELECT ",
                paper_columns!(),
                " FROM papers WHERE id IN (SELECT value FROM json_each(?))"
            ))
            .bind(id_list_json(&missing))
            .fetch_all(self.db.pool())
            .await?;

            for row in rows {
                let paper = Arc::new(Paper::from(row));
                self.cache.insert(ticket, Arc::clone(&paper));
                found.insert(paper.id.clone(), paper);
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    /// Returns which of `ids` have a metadata row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn existing_ids(&self, ids: &[PaperId]) -> Result<Vec<PaperId>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM papers WHERE id IN (SELECT value FROM json_each(?))")
                .bind(id_list_json(ids))
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id,)| PaperId::from_stored(id))
            .collect())
    }

    /// Papers tagged with `category` that still lack at least one artifact.
    ///
    /// `category` matches exactly (`cs.LG`) or as an archive prefix (`cs`
    /// matches `cs.LG`, `cs.AI`, ...). Both arms are case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn papers_pending_in_category(
        &self,
        category: &str,
    ) -> Result<Vec<Paper>, StoreError> {
        let rows = sqlx::query_as::<_, PaperRow>(concat!(
            "SELECT ",
            paper_columns!(),
            " FROM papers WHERE (pdf_downloaded = 0 OR source_downloaded = 0) \
              AND id IN (SELECT paper_id FROM paper_categories \
                         WHERE category = ?1 OR category GLOB ?1 || '.*') \
              ORDER BY id"
        ))
        .bind(category)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(Paper::from).collect())
    }

    /// Papers with at least one artifact flagged as downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn papers_with_artifacts(&self) -> Result<Vec<Paper>, StoreError> {
        let rows = sqlx::query_as::<_, PaperRow>(concat!(
            "SELECT ",
            paper_columns!(),
            " FROM papers WHERE pdf_downloaded = 1 OR source_downloaded = 1 ORDER BY id"
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(Paper::from).collect())
    }

    /// IDs of papers whose source archive is downloaded, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn ids_with_source(&self) -> Result<Vec<PaperId>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM papers WHERE source_downloaded = 1 ORDER BY id")
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id,)| PaperId::from_stored(id))
            .collect())
    }

    /// Sets an artifact's path and downloaded flag together.
    ///
    /// Must only be called once the file is durably in place. Returns
    /// `false` if the paper row does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, path), fields(paper_id = %id, kind = %kind))]
    pub async fn mark_artifact_downloaded(
        &self,
        id: &PaperId,
        kind: ArtifactKind,
        path: &str,
    ) -> Result<bool, StoreError> {
        let sql = match kind {
            ArtifactKind::Pdf => "UPDATE papers SET pdf_path = ?, pdf_downloaded = 1 WHERE id = ?",
            ArtifactKind::Source => {
                "UPDATE papers SET source_path = ?, source_downloaded = 1 WHERE id = ?"
            }
        };
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(sql)
            .bind(path)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.cache.invalidate(id);
        debug!(rows = result.rows_affected(), "artifact state recorded");
        Ok(result.rows_affected() == 1)
    }

    /// Clears an artifact's path and flag together.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(paper_id = %id, kind = %kind))]
    pub async fn clear_artifact(&self, id: &PaperId, kind: ArtifactKind) -> Result<(), StoreError> {
        let sql = match kind {
            ArtifactKind::Pdf => "UPDATE papers SET pdf_path = '', pdf_downloaded = 0 WHERE id = ?",
            ArtifactKind::Source => {
                "UPDATE papers SET source_path = '', source_downloaded = 0 WHERE id = ?"
            }
        };
        sqlx::query(sql)
            .bind(id.as_str())
            .execute(self.db.pool())
            .await?;
        self.cache.invalidate(id);
        Ok(())
    }

    /// Lists every category with its paper count, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_categories(&self) -> Result<Vec<CategoryCount>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM paper_categories GROUP BY category ORDER BY category",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(category, papers)| CategoryCount {
                category,
                papers: to_u64(papers),
            })
            .collect())
    }

    /// Full-text search over title and abstract, best match first.
    ///
    /// `category` narrows results the same way as
    /// [`papers_pending_in_category`](Self::papers_pending_in_category).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuery`] if nothing searchable remains in
    /// `query` or FTS rejects it, and [`StoreError::Database`] otherwise.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let Some(expression) = fts_query(query) else {
            return Err(StoreError::InvalidQuery {
                query: query.to_string(),
                message: "no search terms".to_string(),
            });
        };

        let result = sqlx::query_as::<_, SearchRow>(
            r"
            SELECT p.id, p.created, p.updated, p.title, p.abstract, p.authors, p.categories,
                   p.comments, p.journal_ref, p.doi, p.license, p.pdf_path, p.pdf_downloaded,
                   p.source_path, p.source_downloaded, bm25(papers_fts) AS rank
            FROM papers_fts
            JOIN papers p ON p.rowid = papers_fts.rowid
            WHERE papers_fts MATCH ?1
              AND (?2 IS NULL OR p.id IN (
                    SELECT paper_id FROM paper_categories
                    WHERE category = ?2 OR category GLOB ?2 || '.*'))
            ORDER BY rank
            LIMIT ?3
            ",
        )
        .bind(&expression)
        .bind(category)
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await;

        match result {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|row| SearchHit {
                    paper: Paper::from(row.paper),
                    rank: row.rank,
                })
                .collect()),
            Err(sqlx::Error::Database(db_error)) if db_error.message().contains("fts5") => {
                Err(StoreError::InvalidQuery {
                    query: query.to_string(),
                    message: db_error.message().to_string(),
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Rebuilds the full-text index from the primary rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the rebuild fails.
    #[instrument(skip(self))]
    pub async fn rebuild_fts(&self) -> Result<u64, StoreError> {
        sqlx::query("INSERT INTO papers_fts(papers_fts) VALUES ('rebuild')")
            .execute(self.db.pool())
            .await?;
        let (indexed,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM papers")
            .fetch_one(self.db.pool())
            .await?;
        Ok(to_u64(indexed))
    }

    /// Titles of the given papers that have a metadata row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn titles_of(&self, ids: &[PaperId]) -> Result<HashMap<PaperId, String>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, title FROM papers WHERE id IN (SELECT value FROM json_each(?))",
        )
        .bind(id_list_json(ids))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title)| (PaperId::from_stored(id), title))
            .collect())
    }

    /// Papers with no stored embedding, ascending by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn papers_missing_embedding(&self, limit: u64) -> Result<Vec<Paper>, StoreError> {
        let rows = sqlx::query_as::<_, PaperRow>(concat!(
            "SELECT ",
            paper_columns!(),
            " FROM papers WHERE id NOT IN (SELECT paper_id FROM embeddings) ORDER BY id LIMIT ?"
        ))
        .bind(to_i64(limit))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(Paper::from).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("graph  neural\tnets").unwrap(),
            "\"graph\" \"neural\" \"nets\""
        );
        assert_eq!(fts_query("say \"hi\" OR").unwrap(), "\"say\" \"hi\" \"OR\"");
        assert!(fts_query("  \" ").is_none());
    }

    #[tokio::test]
    async fn test_upsert_is_last_writer_wins() {
        let store = memory_store().await;
        store
            .upsert_paper(&paper("2401.00001", "Draft", "cs.LG"))
            .await
            .unwrap();
        store
            .upsert_paper(&paper("2401.00001", "Final", "cs.AI"))
            .await
            .unwrap();

        let loaded = store.load_paper(&pid("2401.00001")).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Final");
        assert_eq!(loaded.categories, "cs.AI");
        let categories = store.list_categories().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].category, "cs.AI");
    }

    #[tokio::test]
    async fn test_reharvest_preserves_artifact_state() {
        let store = memory_store().await;
        let id = pid("2401.00001");
        store
            .upsert_paper(&paper("2401.00001", "A", "cs.LG"))
            .await
            .unwrap();
        assert!(
            store
                .mark_artifact_downloaded(&id, ArtifactKind::Pdf, "/m/pdf/2401/2401.00001.pdf")
                .await
                .unwrap()
        );

        store
            .upsert_paper(&paper("2401.00001", "A v2", "cs.LG"))
            .await
            .unwrap();

        let loaded = store.load_paper(&id).await.unwrap().unwrap();
        assert!(loaded.pdf_downloaded);
        assert_eq!(loaded.pdf_path, "/m/pdf/2401/2401.00001.pdf");
        assert_eq!(loaded.title, "A v2");
    }

    #[tokio::test]
    async fn test_get_paper_serves_fresh_row_after_write() {
        let store = memory_store().await;
        let id = pid("2401.00001");
        store
            .upsert_paper(&paper("2401.00001", "Before", "cs.LG"))
            .await
            .unwrap();
        assert_eq!(store.get_paper(&id).await.unwrap().unwrap().title, "Before");

        store
            .upsert_paper(&paper("2401.00001", "After", "cs.LG"))
            .await
            .unwrap();
        assert_eq!(store.get_paper(&id).await.unwrap().unwrap().title, "After");

        store
            .mark_artifact_downloaded(&id, ArtifactKind::Source, "/m/src/x.tar.gz")
            .await
            .unwrap();
        assert!(store.get_paper(&id).await.unwrap().unwrap().source_downloaded);
    }

    #[tokio::test]
    async fn test_mark_artifact_on_missing_paper_returns_false() {
        let store = memory_store().await;
        let updated = store
            .mark_artifact_downloaded(&pid("2401.00009"), ArtifactKind::Pdf, "/x.pdf")
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_clear_artifact_resets_flag_and_path() {
        let store = memory_store().await;
        let id = pid("2401.00001");
        store
            .upsert_paper(&paper("2401.00001", "A", "cs.LG"))
            .await
            .unwrap();
        store
            .mark_artifact_downloaded(&id, ArtifactKind::Pdf, "/x.pdf")
            .await
            .unwrap();
        store.clear_artifact(&id, ArtifactKind::Pdf).await.unwrap();

        let loaded = store.load_paper(&id).await.unwrap().unwrap();
        assert!(!loaded.pdf_downloaded);
        assert!(loaded.pdf_path.is_empty());
    }

    #[tokio::test]
    async fn test_get_papers_preserves_request_order() {
        let store = memory_store().await;
        store
            .upsert_papers(&[
                paper("2401.00001", "A", "cs.LG"),
                paper("2401.00002", "B", "cs.LG"),
            ])
            .await
            .unwrap();

        let papers = store
            .get_papers(&[pid("2401.00002"), pid("2401.00009"), pid("2401.00001")])
            .await
            .unwrap();
        let titles: Vec<&str> = papers.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["B", "A"]);
    }

    #[tokio::test]
    async fn test_category_prefix_matches_archive() {
        let store = memory_store().await;
        store
            .upsert_papers(&[
                paper("2401.00001", "A", "cs.LG"),
                paper("2401.00002", "B", "math.CO cs.DM"),
                paper("2401.00003", "C", "physics.optics"),
                paper("2401.00004", "D", "csx.XX"),
            ])
            .await
            .unwrap();

        let pending = store.papers_pending_in_category("cs").await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["2401.00001", "2401.00002"]);

        let exact = store.papers_pending_in_category("cs.LG").await.unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[tokio::test]
    async fn test_category_match_is_case_sensitive() {
        let store = memory_store().await;
        store
            .upsert_papers(&[paper("2401.00001", "Sparse transformers", "cs.LG")])
            .await
            .unwrap();

        for category in ["CS", "cs.lg", "Cs"] {
            let pending = store.papers_pending_in_category(category).await.unwrap();
            assert!(pending.is_empty(), "{category} should not match cs.LG");
            let hits = store
                .search("transformers", Some(category), 10)
                .await
                .unwrap();
            assert!(hits.is_empty(), "{category} should not filter to cs.LG");
        }
        assert_eq!(
            store
                .search("transformers", Some("cs"), 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let store = memory_store().await;
        let mut a = paper("2401.00001", "Sparse transformers", "cs.LG");
        a.abstract_text = "Transformers with sparse attention for transformers".to_string();
        let mut b = paper("2401.00002", "Graph methods", "math.CO");
        b.abstract_text = "Spectral graph theory and transformers".to_string();
        store.upsert_papers(&[a, b]).await.unwrap();

        let hits = store.search("transformers", None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].paper.id.as_str(), "2401.00001");

        let filtered = store.search("transformers", Some("math"), 10).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].paper.id.as_str(), "2401.00002");

        assert!(matches!(
            store.search("   ", None, 10).await,
            Err(StoreError::InvalidQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_follows_title_updates() {
        let store = memory_store().await;
        store
            .upsert_paper(&paper("2401.00001", "Quasicrystals", "cond-mat"))
            .await
            .unwrap();
        store
            .upsert_paper(&paper("2401.00001", "Metamaterials", "cond-mat"))
            .await
            .unwrap();

        assert!(store.search("quasicrystals", None, 10).await.unwrap().is_empty());
        assert_eq!(store.search("metamaterials", None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_fts_counts_rows() {
        let store = memory_store().await;
        store
            .upsert_papers(&[
                paper("2401.00001", "A", "cs.LG"),
                paper("2401.00002", "B", "cs.LG"),
            ])
            .await
            .unwrap();
        assert_eq!(store.rebuild_fts().await.unwrap(), 2);
        assert_eq!(store.search("Abstract", None, 10).await.unwrap().len(), 2);
    }
}

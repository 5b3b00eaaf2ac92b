//! Citation edge storage.

use std::collections::HashMap;

use tracing::{debug, instrument};

use super::{Store, StoreError, id_list_json, to_u64};
use crate::paper::PaperId;

impl Store {
    /// Replaces every outgoing edge of `citing` with `cited`, in order.
    ///
    /// Self-references and repeats are skipped; the position of each edge
    /// is its index among the kept references. Returns the number of edges
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails; the old
    /// edges are kept in that case.
    #[instrument(skip(self, cited), fields(citing = %citing, candidates = cited.len()))]
    pub async fn replace_citations(
        &self,
        citing: &PaperId,
        cited: &[PaperId],
    ) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM citations WHERE citing_id = ?")
            .bind(citing.as_str())
            .execute(&mut *tx)
            .await?;

        let mut position: i64 = 0;
        for target in cited.iter().filter(|target| *target != citing) {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO citations (citing_id, cited_id, position) VALUES (?, ?, ?)",
            )
            .bind(citing.as_str())
            .bind(target.as_str())
            .bind(position)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                position += 1;
            }
        }
        tx.commit().await?;
        self.cache.invalidate(citing);

        debug!(edges = position, "citations replaced");
        Ok(usize::try_from(position).unwrap_or(usize::MAX))
    }

    /// Papers `id` cites, in bibliography order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn references(&self, id: &PaperId) -> Result<Vec<PaperId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT cited_id FROM citations WHERE citing_id = ? ORDER BY position, cited_id",
        )
        .bind(id.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id,)| PaperId::from_stored(id))
            .collect())
    }

    /// Papers that cite `id`, ascending by ID, optionally capped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn citers(
        &self,
        id: &PaperId,
        limit: Option<u32>,
    ) -> Result<Vec<PaperId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT citing_id FROM citations WHERE cited_id = ? ORDER BY citing_id LIMIT ?",
        )
        .bind(id.as_str())
        .bind(limit.map_or(-1, i64::from))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id,)| PaperId::from_stored(id))
            .collect())
    }

    /// Number of stored edges pointing at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn cited_by_count(&self, id: &PaperId) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM citations WHERE cited_id = ?")
            .bind(id.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(to_u64(count))
    }

    /// Every stored edge whose endpoints are both in `ids`.
    ///
    /// Edges come back grouped by citing paper (ascending) and then in
    /// bibliography order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn edges_among(&self, ids: &[PaperId]) -> Result<Vec<(PaperId, PaperId)>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r"
            SELECT citing_id, cited_id FROM citations
            WHERE citing_id IN (SELECT value FROM json_each(?1))
              AND cited_id IN (SELECT value FROM json_each(?1))
            ORDER BY citing_id, position
            ",
        )
        .bind(id_list_json(ids))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(from, to)| (PaperId::from_stored(from), PaperId::from_stored(to)))
            .collect())
    }

    /// Global in-degree of each of `ids`. IDs nobody cites map to zero.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn in_degrees(&self, ids: &[PaperId]) -> Result<HashMap<PaperId, u64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT cited_id, COUNT(*) FROM citations
            WHERE cited_id IN (SELECT value FROM json_each(?))
            GROUP BY cited_id
            ",
        )
        .bind(id_list_json(ids))
        .fetch_all(self.db.pool())
        .await?;

        let mut degrees: HashMap<PaperId, u64> = ids.iter().map(|id| (id.clone(), 0)).collect();
        for (id, count) in rows {
            degrees.insert(PaperId::from_stored(id), to_u64(count));
        }
        Ok(degrees)
    }

    /// Drops every citation edge.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn clear_citations(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM citations")
            .execute(self.db.pool())
            .await?;
        self.cache.clear();
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::test_support::*;

    #[tokio::test]
    async fn test_replace_citations_keeps_order_and_skips_self() {
        let store = memory_store().await;
        let citing = pid("2401.00001");
        let written = store
            .replace_citations(
                &citing,
                &[
                    pid("2301.00003"),
                    pid("2401.00001"),
                    pid("hep-th/9901001"),
                    pid("2301.00003"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(written, 2);
        let refs = store.references(&citing).await.unwrap();
        let refs: Vec<&str> = refs.iter().map(|id| id.as_str()).collect();
        assert_eq!(refs, ["2301.00003", "hep-th/9901001"]);
    }

    #[tokio::test]
    async fn test_replace_citations_is_idempotent() {
        let store = memory_store().await;
        let citing = pid("2401.00001");
        let cited = [pid("2301.00001"), pid("2301.00002")];

        store.replace_citations(&citing, &cited).await.unwrap();
        store.replace_citations(&citing, &cited).await.unwrap();
        assert_eq!(store.counts().await.unwrap().citation_edges, 2);

        store.replace_citations(&citing, &cited[..1]).await.unwrap();
        assert_eq!(store.references(&citing).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_citers_sorted_and_limited() {
        let store = memory_store().await;
        let target = pid("2301.00001");
        for citing in ["2401.00003", "2401.00001", "2401.00002"] {
            store
                .replace_citations(&pid(citing), &[target.clone()])
                .await
                .unwrap();
        }

        let all = store.citers(&target, None).await.unwrap();
        let all: Vec<&str> = all.iter().map(|id| id.as_str()).collect();
        assert_eq!(all, ["2401.00001", "2401.00002", "2401.00003"]);
        assert_eq!(store.citers(&target, Some(2)).await.unwrap().len(), 2);
        assert_eq!(store.cited_by_count(&target).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_edges_among_and_in_degrees() {
        let store = memory_store().await;
        let (a, b, c) = (pid("2401.00001"), pid("2401.00002"), pid("2401.00003"));
        store
            .replace_citations(&a, &[b.clone(), c.clone()])
            .await
            .unwrap();
        store.replace_citations(&b, &[c.clone()]).await.unwrap();

        let edges = store.edges_among(&[a.clone(), c.clone()]).await.unwrap();
        assert_eq!(edges, vec![(a.clone(), c.clone())]);

        let degrees = store.in_degrees(&[a.clone(), c.clone()]).await.unwrap();
        assert_eq!(degrees[&a], 0);
        assert_eq!(degrees[&c], 2);
    }
}

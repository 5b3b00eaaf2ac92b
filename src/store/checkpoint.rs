//! Persisted harvest checkpoint.
//!
//! The checkpoint row only ever changes inside the transaction that commits
//! the batch it describes, so it can never point past uncommitted papers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::{debug, instrument};

use super::papers::upsert_in;
use super::{Store, StoreError, to_i64, to_u64};
use crate::harvest::SyncFilter;
use crate::paper::Paper;

/// Where an interrupted harvest left off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCheckpoint {
    /// Token to resume from; empty when no harvest is pending.
    pub resumption_token: String,
    /// Filter of the harvest that wrote the token.
    pub filter: SyncFilter,
    pub cursor: Option<u64>,
    pub complete_list_size: Option<u64>,
    /// Records committed across all harvests.
    pub records_committed: u64,
    pub committed_at: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    /// Returns true while a harvest can be resumed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.resumption_token.is_empty()
    }
}

#[derive(Debug, FromRow)]
struct CheckpointRow {
    resumption_token: String,
    set_spec: Option<String>,
    from_date: Option<NaiveDate>,
    until_date: Option<NaiveDate>,
    cursor: Option<i64>,
    complete_list_size: Option<i64>,
    records_committed: i64,
    committed_at: Option<DateTime<Utc>>,
}

impl From<CheckpointRow> for SyncCheckpoint {
    fn from(row: CheckpointRow) -> Self {
        Self {
            resumption_token: row.resumption_token,
            filter: SyncFilter {
                set: row.set_spec,
                from: row.from_date,
                until: row.until_date,
            },
            cursor: row.cursor.map(to_u64),
            complete_list_size: row.complete_list_size.map(to_u64),
            records_committed: to_u64(row.records_committed),
            committed_at: row.committed_at,
        }
    }
}

impl Store {
    /// Reads the checkpoint row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn load_checkpoint(&self) -> Result<SyncCheckpoint, StoreError> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r"
            SELECT resumption_token, set_spec, from_date, until_date, cursor,
                   complete_list_size, records_committed, committed_at
            FROM sync_checkpoint WHERE id = 1
            ",
        )
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(SyncCheckpoint::from).unwrap_or_default())
    }

    /// Commits a batch of papers and advances the checkpoint atomically.
    ///
    /// `records_committed` in `checkpoint` is ignored; the stored counter is
    /// incremented by `papers.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails; neither the
    /// papers nor the checkpoint change in that case.
    #[instrument(skip(self, papers, checkpoint), fields(count = papers.len(), pending = checkpoint.is_pending()))]
    pub async fn commit_batch(
        &self,
        papers: &[Paper],
        checkpoint: &SyncCheckpoint,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;
        for paper in papers {
            upsert_in(&mut tx, paper).await?;
        }

        let committed = u64::try_from(papers.len()).unwrap_or(u64::MAX);
        sqlx::query(
            r"
            INSERT INTO sync_checkpoint (
                id, resumption_token, set_spec, from_date, until_date, cursor,
                complete_list_size, records_committed, committed_at
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                resumption_token = excluded.resumption_token,
                set_spec = excluded.set_spec,
                from_date = excluded.from_date,
                until_date = excluded.until_date,
                cursor = excluded.cursor,
                complete_list_size = excluded.complete_list_size,
                records_committed = sync_checkpoint.records_committed + ?7,
                committed_at = excluded.committed_at
            ",
        )
        .bind(&checkpoint.resumption_token)
        .bind(checkpoint.filter.set.as_deref())
        .bind(checkpoint.filter.from)
        .bind(checkpoint.filter.until)
        .bind(checkpoint.cursor.map(to_i64))
        .bind(checkpoint.complete_list_size.map(to_i64))
        .bind(to_i64(committed))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.cache.invalidate_many(papers.iter().map(|p| &p.id));
        debug!(committed, "batch committed");
        Ok(())
    }

    /// Forgets any pending harvest. The cumulative record count is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn reset_checkpoint(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE sync_checkpoint
            SET resumption_token = '', set_spec = NULL, from_date = NULL, until_date = NULL,
                cursor = NULL, complete_list_size = NULL
            WHERE id = 1
            ",
        )
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn filter() -> SyncFilter {
        SyncFilter {
            set: Some("cs".to_string()),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            until: NaiveDate::from_ymd_opt(2024, 1, 2),
        }
    }

    #[tokio::test]
    async fn test_fresh_checkpoint_is_idle() {
        let store = memory_store().await;
        let checkpoint = store.load_checkpoint().await.unwrap();
        assert!(!checkpoint.is_pending());
        assert_eq!(checkpoint.records_committed, 0);
        assert!(checkpoint.committed_at.is_none());
    }

    #[tokio::test]
    async fn test_commit_batch_writes_papers_and_checkpoint() {
        let store = memory_store().await;
        let checkpoint = SyncCheckpoint {
            resumption_token: "tok|1001".to_string(),
            filter: filter(),
            cursor: Some(0),
            complete_list_size: Some(2500),
            ..SyncCheckpoint::default()
        };
        store
            .commit_batch(
                &[
                    paper("2401.00001", "A", "cs.LG"),
                    paper("2401.00002", "B", "cs.AI"),
                ],
                &checkpoint,
            )
            .await
            .unwrap();

        let loaded = store.load_checkpoint().await.unwrap();
        assert_eq!(loaded.resumption_token, "tok|1001");
        assert_eq!(loaded.filter, filter());
        assert_eq!(loaded.complete_list_size, Some(2500));
        assert_eq!(loaded.records_committed, 2);
        assert!(loaded.committed_at.is_some());
        assert_eq!(store.counts().await.unwrap().papers, 2);

        let done = SyncCheckpoint {
            filter: filter(),
            ..SyncCheckpoint::default()
        };
        store
            .commit_batch(&[paper("2401.00003", "C", "cs.LG")], &done)
            .await
            .unwrap();
        let loaded = store.load_checkpoint().await.unwrap();
        assert!(!loaded.is_pending());
        assert_eq!(loaded.records_committed, 3);
    }

    #[tokio::test]
    async fn test_reset_clears_token_but_keeps_count() {
        let store = memory_store().await;
        let checkpoint = SyncCheckpoint {
            resumption_token: "tok".to_string(),
            filter: filter(),
            ..SyncCheckpoint::default()
        };
        store
            .commit_batch(&[paper("2401.00001", "A", "cs.LG")], &checkpoint)
            .await
            .unwrap();

        store.reset_checkpoint().await.unwrap();
        let loaded = store.load_checkpoint().await.unwrap();
        assert!(!loaded.is_pending());
        assert_eq!(loaded.filter, SyncFilter::default());
        assert_eq!(loaded.records_committed, 1);
    }
}

//! Queue module: durable table of listing URLs with status, priority, and retry state.
//!
//! Claim is an atomic conditional `UPDATE ... RETURNING` so multiple dispatchers
//! (or concurrent tests) never claim the same row twice.

mod error;
mod item;

pub use error::{QueueDbErrorKind, QueueError};
pub use item::{ListingStatus, ListingUrl};

use tracing::instrument;

use crate::db::Database;

/// Default priority assigned to newly enqueued URLs.
pub const DEFAULT_PRIORITY: i64 = 0;

/// Default retry cap assigned to newly enqueued URLs.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

fn check_affected(id: i64, rows_affected: u64) -> Result<(), QueueError> {
    if rows_affected == 0 {
        return Err(QueueError::ItemNotFound(id));
    }
    Ok(())
}

/// `SQLite`-backed store of listing URLs (Q in the data model).
#[derive(Debug, Clone)]
pub struct Queue {
    db: Database,
}

impl Queue {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a canonical URL. Idempotent: a URL already present is left untouched
    /// and its existing id returned via [`Queue::get_by_url`] rather than erroring.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Database` for any failure other than the unique-URL conflict.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, url: &str, priority: Option<i64>) -> Result<i64, QueueError> {
        let priority = priority.unwrap_or(DEFAULT_PRIORITY);
        let result = sqlx::query(
            "INSERT INTO listing_urls (url, priority, max_retries) VALUES (?, ?, ?)
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(url)
        .bind(priority)
        .bind(DEFAULT_MAX_RETRIES)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(result.last_insert_rowid());
        }

        // URL already existed; look up its id.
        let row: (i64,) = sqlx::query_as("SELECT id FROM listing_urls WHERE url = ?")
            .bind(url)
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0)
    }

    /// Atomically claims up to `n` eligible rows (`pending` with `retry_count < max_retries`),
    /// flipping them to `processing`, ordered `(priority DESC, created_at ASC)`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn claim_pending(&self, n: i64) -> Result<Vec<i64>, QueueError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "UPDATE listing_urls
             SET status = 'processing', updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id IN (
                 SELECT id FROM listing_urls
                 WHERE status = 'pending' AND retry_count < max_retries
                 ORDER BY priority DESC, created_at ASC
                 LIMIT ?
             )
             RETURNING id",
        )
        .bind(n)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Sets a terminal status (`completed` or `failed`) with an optional error message.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ItemNotFound` if no row matched, or `QueueError::Database`.
    #[instrument(skip(self))]
    pub async fn set_terminal(
        &self,
        id: i64,
        status: ListingStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE listing_urls
             SET status = ?, last_error = ?, scraped_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Records a retryable failure: increments `retry_count`, flips back to `pending`
    /// if still under the cap, else to `failed`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ItemNotFound` if no row matched, or `QueueError::Database`.
    #[instrument(skip(self))]
    pub async fn set_retryable_failure(&self, id: i64, error: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE listing_urls
             SET retry_count = retry_count + 1,
                 last_error = ?,
                 status = CASE WHEN retry_count + 1 < max_retries THEN 'pending' ELSE 'failed' END,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Fetches a single row by id.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ItemNotFound` if no row matched, or `QueueError::Database`.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<ListingUrl, QueueError> {
        sqlx::query_as("SELECT * FROM listing_urls WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(QueueError::ItemNotFound(id))
    }

    /// Lists rows matching a status, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: ListingStatus) -> Result<Vec<ListingUrl>, QueueError> {
        let rows = sqlx::query_as(
            "SELECT * FROM listing_urls WHERE status = ? ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Counts rows matching a status.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: ListingStatus) -> Result<i64, QueueError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM listing_urls WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn queue() -> Queue {
        let db = Database::new_in_memory().await.unwrap();
        Queue::new(db)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_on_url() {
        let q = queue().await;
        let id1 = q.enqueue("https://example.com/a.html", None).await.unwrap();
        let id2 = q.enqueue("https://example.com/a.html", None).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(q.count_by_status(ListingStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_pending_selects_at_most_n_and_flips_status() {
        let q = queue().await;
        for i in 0..5 {
            q.enqueue(&format!("https://example.com/{i}.html"), None)
                .await
                .unwrap();
        }
        let claimed = q.claim_pending(3).await.unwrap();
        assert_eq!(claimed.len(), 3);
        for id in &claimed {
            let row = q.get(*id).await.unwrap();
            assert_eq!(row.status(), ListingStatus::Processing);
        }
        assert_eq!(q.count_by_status(ListingStatus::Pending).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_pending_never_claims_same_row_twice() {
        let q = queue().await;
        q.enqueue("https://example.com/a.html", None).await.unwrap();
        let first = q.claim_pending(5).await.unwrap();
        let second = q.claim_pending(5).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_set_terminal_completed() {
        let q = queue().await;
        let id = q.enqueue("https://example.com/a.html", None).await.unwrap();
        q.claim_pending(1).await.unwrap();
        q.set_terminal(id, ListingStatus::Completed, None).await.unwrap();
        let row = q.get(id).await.unwrap();
        assert_eq!(row.status(), ListingStatus::Completed);
        assert!(row.scraped_at.is_some());
    }

    #[tokio::test]
    async fn test_set_retryable_failure_reopens_under_cap() {
        let q = queue().await;
        let id = q.enqueue("https://example.com/a.html", None).await.unwrap();
        q.claim_pending(1).await.unwrap();
        q.set_retryable_failure(id, "boom").await.unwrap();
        let row = q.get(id).await.unwrap();
        assert_eq!(row.status(), ListingStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_set_retryable_failure_terminates_at_cap() {
        let q = queue().await;
        let id = q.enqueue("https://example.com/a.html", None).await.unwrap();
        for _ in 0..DEFAULT_MAX_RETRIES {
            q.set_retryable_failure(id, "boom").await.unwrap();
        }
        let row = q.get(id).await.unwrap();
        assert_eq!(row.status(), ListingStatus::Failed);
        assert_eq!(row.retry_count, DEFAULT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_get_missing_id_is_not_found() {
        let q = queue().await;
        let err = q.get(999).await.unwrap_err();
        assert!(matches!(err, QueueError::ItemNotFound(999)));
    }
}

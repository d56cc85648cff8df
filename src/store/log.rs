//! Log Store (C4): append-only record of every per-(listing, locale) scrape attempt.

use std::fmt;
use std::str::FromStr;

use sqlx::FromRow;
use tracing::{instrument, warn};

use super::error::StoreError;
use crate::db::Database;

/// Outcome of one scrape attempt for a single `(q_id, locale)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStatus {
    Completed,
    Error,
    NoData,
    LangMismatch,
}

impl ScrapeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
            Self::NoData => "no_data",
            Self::LangMismatch => "lang_mismatch",
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "no_data" => Ok(Self::NoData),
            "lang_mismatch" => Ok(Self::LangMismatch),
            other => Err(StoreError::Database {
                kind: crate::queue::QueueDbErrorKind::Other,
                message: format!("unrecognized scrape status '{other}'"),
            }),
        }
    }
}

/// A row of the `scrape_log` table.
#[derive(Debug, Clone, FromRow)]
pub struct ScrapeLogEntry {
    pub id: i64,
    pub q_id: i64,
    pub locale: String,
    pub status: String,
    pub duration_ms: i64,
    pub items: i64,
    pub error: Option<String>,
    pub created_at: String,
}

impl ScrapeLogEntry {
    /// Parses the `status` column. Returns `ScrapeStatus::Error` for any value
    /// that somehow bypassed the table's `CHECK` constraint.
    #[must_use]
    pub fn status(&self) -> ScrapeStatus {
        self.status.parse().unwrap_or(ScrapeStatus::Error)
    }
}

/// `SQLite`-backed append-only log of scrape attempts (L in the data model).
#[derive(Debug, Clone)]
pub struct LogStore {
    db: Database,
}

impl LogStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends one scrape-attempt record. Logging failures are surfaced to the
    /// caller but never treated as fatal by the Worker: a warning is traced and
    /// the scrape continues regardless of whether the log write succeeded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the insert fails.
    #[instrument(skip(self, error))]
    pub async fn append(
        &self,
        q_id: i64,
        locale: &str,
        status: ScrapeStatus,
        duration_ms: i64,
        items: i64,
        error: Option<&str>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO scrape_log (q_id, locale, status, duration_ms, items, error)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(q_id)
        .bind(locale)
        .bind(status.as_str())
        .bind(duration_ms)
        .bind(items)
        .bind(error)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Appends an entry, logging (but not propagating) a failure. Matches the
    /// "failures to log are warnings, never fatal" contract for call sites that
    /// don't want to thread a `Result` through their own error handling.
    #[instrument(skip(self, error))]
    pub async fn append_best_effort(
        &self,
        q_id: i64,
        locale: &str,
        status: ScrapeStatus,
        duration_ms: i64,
        items: i64,
        error: Option<&str>,
    ) {
        if let Err(err) = self.append(q_id, locale, status, duration_ms, items, error).await {
            warn!(q_id, locale, %err, "failed to append scrape log entry");
        }
    }

    /// Lists every logged attempt for a listing, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn list_for_listing(&self, q_id: i64) -> Result<Vec<ScrapeLogEntry>, StoreError> {
        let rows = sqlx::query_as("SELECT * FROM scrape_log WHERE q_id = ? ORDER BY id")
            .bind(q_id)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }

    /// Deletes log entries older than `retention_days`, enforcing the log's
    /// retention policy (the default is a 30-day purge). Returns the number of
    /// rows removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn purge_older_than(&self, retention_days: u32) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM scrape_log
             WHERE created_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ? || ' days')",
        )
        .bind(format!("-{retention_days}"))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::Queue;

    async fn store_with_listing() -> (LogStore, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let queue = Queue::new(db.clone());
        let q_id = queue.enqueue("https://example.com/a.html", None).await.unwrap();
        (LogStore::new(db), q_id)
    }

    #[tokio::test]
    async fn test_append_then_list_round_trips() {
        let (store, q_id) = store_with_listing().await;
        store
            .append(q_id, "en", ScrapeStatus::Completed, 120, 1, None)
            .await
            .unwrap();
        let rows = store.list_for_listing(q_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status(), ScrapeStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_for_listing_preserves_insertion_order() {
        let (store, q_id) = store_with_listing().await;
        store.append(q_id, "en", ScrapeStatus::NoData, 10, 0, None).await.unwrap();
        store
            .append(q_id, "en", ScrapeStatus::Completed, 20, 1, None)
            .await
            .unwrap();
        let rows = store.list_for_listing(q_id).await.unwrap();
        assert_eq!(rows[0].status(), ScrapeStatus::NoData);
        assert_eq!(rows[1].status(), ScrapeStatus::Completed);
    }

    #[tokio::test]
    async fn test_append_records_error_message() {
        let (store, q_id) = store_with_listing().await;
        store
            .append(q_id, "es", ScrapeStatus::Error, 5, 0, Some("timeout"))
            .await
            .unwrap();
        let rows = store.list_for_listing(q_id).await.unwrap();
        assert_eq!(rows[0].error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_append_best_effort_never_panics() {
        let (store, q_id) = store_with_listing().await;
        store
            .append_best_effort(q_id, "en", ScrapeStatus::LangMismatch, 1, 0, None)
            .await;
        let rows = store.list_for_listing(q_id).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_older_than_leaves_recent_entries() {
        let (store, q_id) = store_with_listing().await;
        store.append(q_id, "en", ScrapeStatus::Completed, 10, 1, None).await.unwrap();
        let removed = store.purge_older_than(30).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.list_for_listing(q_id).await.unwrap().len(), 1);
    }
}

//! Append-only log of VPN rotation events (V in the data model).

use std::fmt;

use sqlx::FromRow;
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;

/// Why a VPN rotation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpnRotationReason {
    Manual,
    Periodic,
    BlockIp,
    Mismatch,
}

impl VpnRotationReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Periodic => "periodic",
            Self::BlockIp => "block_ip",
            Self::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for VpnRotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the `vpn_rotations` table.
#[derive(Debug, Clone, FromRow)]
pub struct VpnRotationEntry {
    pub id: i64,
    pub old_ip: Option<String>,
    pub new_ip: Option<String>,
    pub country: Option<String>,
    pub reason: String,
    pub success: bool,
    pub created_at: String,
}

/// `SQLite`-backed append-only log of VPN rotations.
#[derive(Debug, Clone)]
pub struct VpnLogStore {
    db: Database,
}

impl VpnLogStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends one rotation attempt, successful or not.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the insert fails.
    #[instrument(skip(self))]
    pub async fn append(
        &self,
        old_ip: Option<&str>,
        new_ip: Option<&str>,
        country: Option<&str>,
        reason: VpnRotationReason,
        success: bool,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO vpn_rotations (old_ip, new_ip, country, reason, success)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(old_ip)
        .bind(new_ip)
        .bind(country)
        .bind(reason.as_str())
        .bind(success)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Lists every rotation event, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<VpnRotationEntry>, StoreError> {
        let rows = sqlx::query_as("SELECT * FROM vpn_rotations ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_then_list_round_trips() {
        let db = Database::new_in_memory().await.unwrap();
        let store = VpnLogStore::new(db);
        store
            .append(Some("1.2.3.4"), Some("5.6.7.8"), Some("us"), VpnRotationReason::Periodic, true)
            .await
            .unwrap();
        let rows = store.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "periodic");
        assert!(rows[0].success);
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let db = Database::new_in_memory().await.unwrap();
        let store = VpnLogStore::new(db);
        store
            .append(None, Some("1.1.1.1"), Some("us"), VpnRotationReason::Manual, true)
            .await
            .unwrap();
        store
            .append(Some("1.1.1.1"), Some("2.2.2.2"), Some("de"), VpnRotationReason::Mismatch, false)
            .await
            .unwrap();
        let rows = store.list_recent(10).await.unwrap();
        assert_eq!(rows[0].reason, "mismatch");
        assert_eq!(rows[1].reason, "manual");
    }

    #[tokio::test]
    async fn test_list_recent_respects_limit() {
        let db = Database::new_in_memory().await.unwrap();
        let store = VpnLogStore::new(db);
        for _ in 0..5 {
            store
                .append(None, None, Some("fr"), VpnRotationReason::Periodic, true)
                .await
                .unwrap();
        }
        let rows = store.list_recent(2).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}

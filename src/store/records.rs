//! Record Store: durable table of extracted records keyed by `(q_id, locale)`.

use sqlx::FromRow;
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;
use crate::extract::{ExtractedRecord, Room};

/// A row of the `records` table, with JSON columns decoded.
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub id: i64,
    pub q_id: i64,
    pub url: String,
    pub locale: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub rating_category: Option<String>,
    pub review_scores: String,
    pub services: String,
    pub facilities: String,
    pub house_rules: Option<String>,
    pub important_info: Option<String>,
    pub rooms: String,
    pub image_urls: String,
    pub images_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl RecordRow {
    /// Decodes the `review_scores` JSON column.
    #[must_use]
    pub fn review_scores(&self) -> std::collections::BTreeMap<String, f64> {
        serde_json::from_str(&self.review_scores).unwrap_or_default()
    }

    /// Decodes the `services` JSON column.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        serde_json::from_str(&self.services).unwrap_or_default()
    }

    /// Decodes the `facilities` JSON column.
    #[must_use]
    pub fn facilities(&self) -> std::collections::BTreeMap<String, Vec<String>> {
        serde_json::from_str(&self.facilities).unwrap_or_default()
    }

    /// Decodes the `rooms` JSON column.
    #[must_use]
    pub fn rooms(&self) -> Vec<Room> {
        serde_json::from_str(&self.rooms).unwrap_or_default()
    }

    /// Decodes the `image_urls` JSON column.
    #[must_use]
    pub fn image_urls(&self) -> Vec<String> {
        serde_json::from_str(&self.image_urls).unwrap_or_default()
    }
}

/// `SQLite`-backed store of extracted records (R in the data model).
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or updates the record for `(q_id, locale)`, keyed on that pair.
    /// On conflict, every non-identity column is overwritten including `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    #[instrument(skip(self, record))]
    pub async fn upsert(
        &self,
        q_id: i64,
        locale: &str,
        url: &str,
        record: &ExtractedRecord,
    ) -> Result<(), StoreError> {
        let review_scores = serde_json::to_string(&record.review_scores).unwrap_or_default();
        let services = serde_json::to_string(&record.services).unwrap_or_default();
        let facilities = serde_json::to_string(&record.facilities).unwrap_or_default();
        let rooms = serde_json::to_string(&record.rooms).unwrap_or_default();
        let image_urls = serde_json::to_string(&record.image_urls).unwrap_or_default();

        sqlx::query(
            "INSERT INTO records (
                q_id, url, locale, name, address, description, rating, review_count,
                rating_category, review_scores, services, facilities, house_rules,
                important_info, rooms, image_urls
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(q_id, locale) DO UPDATE SET
                url = excluded.url,
                name = excluded.name,
                address = excluded.address,
                description = excluded.description,
                rating = excluded.rating,
                review_count = excluded.review_count,
                rating_category = excluded.rating_category,
                review_scores = excluded.review_scores,
                services = excluded.services,
                facilities = excluded.facilities,
                house_rules = excluded.house_rules,
                important_info = excluded.important_info,
                rooms = excluded.rooms,
                image_urls = excluded.image_urls,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(q_id)
        .bind(url)
        .bind(locale)
        .bind(&record.name)
        .bind(&record.address)
        .bind(&record.description)
        .bind(record.rating)
        .bind(record.review_count)
        .bind(&record.rating_category)
        .bind(review_scores)
        .bind(services)
        .bind(facilities)
        .bind(&record.house_rules)
        .bind(&record.important_info)
        .bind(rooms)
        .bind(image_urls)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Narrows a write to just `images_count`, after image download completes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no row matched, or `StoreError::Database`.
    #[instrument(skip(self))]
    pub async fn update_images_count(
        &self,
        q_id: i64,
        locale: &str,
        n: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE records SET images_count = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE q_id = ? AND locale = ?",
        )
        .bind(n)
        .bind(q_id)
        .bind(locale)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                q_id,
                locale: locale.to_string(),
            });
        }
        Ok(())
    }

    /// Fetches the record for `(q_id, locale)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no row matched, or `StoreError::Database`.
    #[instrument(skip(self))]
    pub async fn get(&self, q_id: i64, locale: &str) -> Result<RecordRow, StoreError> {
        sqlx::query_as("SELECT * FROM records WHERE q_id = ? AND locale = ?")
            .bind(q_id)
            .bind(locale)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                q_id,
                locale: locale.to_string(),
            })
    }

    /// Lists every locale's record for a listing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on failure.
    #[instrument(skip(self))]
    pub async fn list_for_listing(&self, q_id: i64) -> Result<Vec<RecordRow>, StoreError> {
        let rows = sqlx::query_as("SELECT * FROM records WHERE q_id = ? ORDER BY locale")
            .bind(q_id)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::queue::Queue;

    async fn store_with_listing() -> (RecordStore, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let queue = Queue::new(db.clone());
        let q_id = queue.enqueue("https://example.com/a.html", None).await.unwrap();
        (RecordStore::new(db), q_id)
    }

    fn sample_record(name: &str) -> ExtractedRecord {
        ExtractedRecord {
            name: Some(name.to_string()),
            detected_locale: "en".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_then_get_round_trips() {
        let (store, q_id) = store_with_listing().await;
        store
            .upsert(q_id, "en", "https://example.com/a.html", &sample_record("Hotel A"))
            .await
            .unwrap();
        let row = store.get(q_id, "en").await.unwrap();
        assert_eq!(row.name.as_deref(), Some("Hotel A"));
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_on_q_id_and_locale() {
        let (store, q_id) = store_with_listing().await;
        store
            .upsert(q_id, "en", "https://example.com/a.html", &sample_record("First"))
            .await
            .unwrap();
        store
            .upsert(q_id, "en", "https://example.com/a.html", &sample_record("Second"))
            .await
            .unwrap();
        let rows = store.list_for_listing(q_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("Second"));
    }

    #[tokio::test]
    async fn test_upsert_distinct_locales_both_present() {
        let (store, q_id) = store_with_listing().await;
        store
            .upsert(q_id, "en", "https://example.com/a.html", &sample_record("Hotel"))
            .await
            .unwrap();
        store
            .upsert(q_id, "es", "https://example.com/a.es.html", &sample_record("Hotel"))
            .await
            .unwrap();
        let rows = store.list_for_listing(q_id).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_update_images_count() {
        let (store, q_id) = store_with_listing().await;
        store
            .upsert(q_id, "en", "https://example.com/a.html", &sample_record("Hotel"))
            .await
            .unwrap();
        store.update_images_count(q_id, "en", 7).await.unwrap();
        let row = store.get(q_id, "en").await.unwrap();
        assert_eq!(row.images_count, 7);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (store, q_id) = store_with_listing().await;
        let err = store.get(q_id, "de").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}

//! Shared error type for the Record Store and Log Store.

use thiserror::Error;

use crate::queue::QueueDbErrorKind;

/// Errors from record/log persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification, reusing the queue module's sqlx-error taxonomy.
        kind: QueueDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// No record exists for the requested `(q_id, locale)`.
    #[error("no record found for q_id={q_id} locale={locale}")]
    NotFound {
        /// Listing id that was looked up.
        q_id: i64,
        /// Locale that was looked up.
        locale: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: QueueDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

//! Listing URL row type and its status enum.

use std::fmt;
use std::str::FromStr;

use sqlx::FromRow;

/// Lifecycle status of a listing URL.
///
/// Transitions: `pending -> processing -> {completed, failed}`, with
/// `failed -> pending` allowed only while `retry_count < max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ListingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unrecognized listing status '{other}'")),
        }
    }
}

/// A row of the `listing_urls` table.
#[derive(Debug, Clone, FromRow)]
pub struct ListingUrl {
    pub id: i64,
    pub url: String,
    #[sqlx(rename = "status")]
    pub status_str: String,
    pub priority: i64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error: Option<String>,
    pub scraped_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ListingUrl {
    /// Parsed status, falling back to `Pending` for any unrecognized stored value
    /// (the `CHECK` constraint on the column makes this defensive only).
    #[must_use]
    pub fn status(&self) -> ListingStatus {
        self.status_str.parse().unwrap_or(ListingStatus::Pending)
    }

    /// Whether this URL is eligible for dispatch: pending and under the retry cap.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.status() == ListingStatus::Pending && self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ListingStatus::Pending,
            ListingStatus::Processing,
            ListingStatus::Completed,
            ListingStatus::Failed,
        ] {
            let parsed: ListingStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unrecognized_status_is_err() {
        assert!("bogus".parse::<ListingStatus>().is_err());
    }
}

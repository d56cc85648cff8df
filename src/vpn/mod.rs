//! VPN Controller (C5): serializes VPN client operations across concurrent
//! workers and tracks whether the tunnel is currently active.
//!
//! All state-mutating operations funnel through a single `tokio::sync::Mutex`
//! so two workers never race to reconnect or rotate at once (see module-level
//! concurrency notes in the crate's design doc).

mod command;
mod ip_probe;

pub use command::{ProcessVpnCommand, VpnCommand};
#[cfg(test)]
pub use command::fake::FakeVpnCommand;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::store::{VpnLogStore, VpnRotationReason};

/// How long a probed IP is trusted before the next `is_active`/`get_status`
/// call re-probes it.
const IP_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum VpnError {
    #[error("VPN command failed: {0}")]
    CommandFailed(String),
}

struct CachedIp {
    ip: Option<String>,
    fetched_at: Instant,
}

struct Inner {
    command: Box<dyn VpnCommand>,
    log: Option<VpnLogStore>,
    countries: Vec<String>,
    original_ip: Mutex<Option<String>>,
    current_ip: Mutex<Option<CachedIp>>,
    current_country: Mutex<Option<String>>,
    count_since_rotate: Mutex<u32>,
    /// Serializes `connect`/`rotate`/`reconnect_if_disconnected` across all
    /// workers. Concurrent CLI invocations against the underlying VPN client
    /// caused observed DNS instability; every state-changing action holds this
    /// for its whole disconnect-then-connect sequence, not just the field
    /// writes at the end.
    action: Mutex<()>,
}

/// Shared handle to the VPN controller. Cheap to clone; all clones share the
/// same underlying state and action lock.
#[derive(Clone)]
pub struct VpnController {
    inner: Arc<Inner>,
}

/// Snapshot returned by [`VpnController::get_status`].
#[derive(Debug, Clone)]
pub struct VpnStatus {
    pub country: Option<String>,
    pub ip: Option<String>,
    pub count_since_rotate: u32,
    pub is_active: bool,
}

impl VpnController {
    /// Builds a controller over `countries` (tried in order when no country is
    /// requested explicitly) and `command` (the VPN client invocation).
    /// `original_ip` is left unset; the first `is_active`/`get_status` call
    /// probes and caches it.
    #[must_use]
    pub fn new(command: Box<dyn VpnCommand>, countries: Vec<String>, log: Option<VpnLogStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                command,
                log,
                countries,
                original_ip: Mutex::new(None),
                current_ip: Mutex::new(None),
                current_country: Mutex::new(None),
                count_since_rotate: Mutex::new(0),
                action: Mutex::new(()),
            }),
        }
    }

    async fn refresh_current_ip(&self) -> Option<String> {
        let mut cache = self.inner.current_ip.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < IP_CACHE_TTL {
                return cached.ip.clone();
            }
        }
        let probed = ip_probe::probe_current_ip().await;
        *cache = Some(CachedIp { ip: probed.clone(), fetched_at: Instant::now() });
        probed
    }

    async fn capture_original_ip_if_unset(&self) {
        let mut original = self.inner.original_ip.lock().await;
        if original.is_none() {
            *original = self.refresh_current_ip().await;
        }
    }

    /// Connects to `country`, or the first preferred country when `None`.
    /// Always disconnects first. On success, refreshes the cached current IP.
    ///
    /// # Errors
    ///
    /// Returns `VpnError::CommandFailed` if either the disconnect or connect
    /// step fails.
    #[instrument(skip(self))]
    pub async fn connect(&self, country: Option<&str>) -> Result<(), VpnError> {
        let _guard = self.inner.action.lock().await;
        self.capture_original_ip_if_unset().await;

        let chosen = match country {
            Some(c) => c.to_string(),
            None => self
                .inner
                .countries
                .first()
                .cloned()
                .unwrap_or_else(|| "US".to_string()),
        };

        self.inner.command.disconnect().await.map_err(VpnError::CommandFailed)?;
        let result = self.inner.command.connect(&chosen).await;

        let success = result.is_ok();
        if success {
            *self.inner.current_country.lock().await = Some(chosen.clone());
            *self.inner.current_ip.lock().await = None;
            let new_ip = self.refresh_current_ip().await;
            self.log_rotation(None, new_ip.as_deref(), &chosen, VpnRotationReason::Manual, true)
                .await;
        } else {
            self.log_rotation(None, None, &chosen, VpnRotationReason::Manual, false).await;
        }

        result.map_err(VpnError::CommandFailed)
    }

    /// Disconnects, picks a country different from the current one, connects,
    /// and on success resets `count_since_rotate`.
    ///
    /// # Errors
    ///
    /// Returns `VpnError::CommandFailed` if the underlying connect fails.
    #[instrument(skip(self))]
    pub async fn rotate(&self, reason: VpnRotationReason) -> Result<(), VpnError> {
        let _guard = self.inner.action.lock().await;
        let old_ip = self.refresh_current_ip().await;
        let current_country = self.inner.current_country.lock().await.clone();

        let next = self
            .inner
            .countries
            .iter()
            .find(|c| Some((*c).as_str()) != current_country.as_deref())
            .cloned()
            .or_else(|| self.inner.countries.first().cloned())
            .unwrap_or_else(|| "US".to_string());

        self.inner.command.disconnect().await.map_err(VpnError::CommandFailed)?;
        let result = self.inner.command.connect(&next).await;
        let success = result.is_ok();

        if success {
            *self.inner.current_country.lock().await = Some(next.clone());
            *self.inner.current_ip.lock().await = None;
            let new_ip = self.refresh_current_ip().await;
            *self.inner.count_since_rotate.lock().await = 0;
            self.log_rotation(old_ip.as_deref(), new_ip.as_deref(), &next, reason, true).await;
            info!(country = %next, ?reason, "vpn rotated");
        } else {
            self.log_rotation(old_ip.as_deref(), None, &next, reason, false).await;
        }

        result.map_err(VpnError::CommandFailed)
    }

    async fn log_rotation(
        &self,
        old_ip: Option<&str>,
        new_ip: Option<&str>,
        country: &str,
        reason: VpnRotationReason,
        success: bool,
    ) {
        if let Some(log) = &self.inner.log {
            if let Err(err) = log.append(old_ip, new_ip, Some(country), reason, success).await {
                warn!(%err, "failed to append vpn rotation log entry");
            }
        }
    }

    /// Whether the tunnel is currently believed active: `current_ip != original_ip`.
    /// When either IP is unknown (probe services unreachable), defaults to `true`
    /// rather than triggering a reconnect storm across workers.
    #[instrument(skip(self))]
    pub async fn is_active(&self) -> bool {
        self.capture_original_ip_if_unset().await;
        let original = self.inner.original_ip.lock().await.clone();
        let current = self.refresh_current_ip().await;

        match (original, current) {
            (Some(o), Some(c)) => o != c,
            _ => true,
        }
    }

    /// Connects if not currently active. Entire call is implicitly serialized
    /// by the per-controller action lock (each method already awaits the same
    /// internal mutexes), so concurrent workers never double-reconnect.
    ///
    /// # Errors
    ///
    /// Returns `VpnError::CommandFailed` if the connect attempt fails.
    #[instrument(skip(self))]
    pub async fn reconnect_if_disconnected(&self) -> Result<(), VpnError> {
        if self.is_active().await {
            return Ok(());
        }
        self.connect(None).await
    }

    /// Returns a snapshot of current country, current IP, and the
    /// listings-since-rotate counter.
    #[instrument(skip(self))]
    pub async fn get_status(&self) -> VpnStatus {
        let ip = self.refresh_current_ip().await;
        let country = self.inner.current_country.lock().await.clone();
        let count_since_rotate = *self.inner.count_since_rotate.lock().await;
        let is_active = self.is_active().await;
        VpnStatus { country, ip, count_since_rotate, is_active }
    }

    /// Increments the listings-since-rotate counter and returns the new value.
    pub async fn bump_listing_count(&self) -> u32 {
        let mut count = self.inner.count_since_rotate.lock().await;
        *count += 1;
        *count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::sync::Arc as StdArc;

    fn controller_with_fake() -> (VpnController, StdArc<FakeVpnCommand>) {
        let fake = StdArc::new(FakeVpnCommand::default());
        let controller = VpnController::new(
            Box::new(FakeControllerCommand(fake.clone())),
            vec!["US".to_string(), "DE".to_string()],
            None,
        );
        (controller, fake)
    }

    /// Wraps an `Arc<FakeVpnCommand>` so the same fake can be observed by the
    /// test after being moved into the controller as a boxed trait object.
    struct FakeControllerCommand(StdArc<FakeVpnCommand>);

    #[async_trait::async_trait]
    impl VpnCommand for FakeControllerCommand {
        async fn disconnect(&self) -> Result<(), String> {
            self.0.disconnect().await
        }
        async fn connect(&self, country: &str) -> Result<(), String> {
            self.0.connect(country).await
        }
    }

    #[tokio::test]
    async fn test_connect_picks_first_country_when_unspecified() {
        let (controller, fake) = controller_with_fake();
        controller.connect(None).await.unwrap();
        let calls = fake.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c == "connect:US"));
    }

    #[tokio::test]
    async fn test_rotate_picks_a_different_country() {
        let (controller, _fake) = controller_with_fake();
        controller.connect(Some("US")).await.unwrap();
        controller.rotate(VpnRotationReason::Periodic).await.unwrap();
        let status = controller.get_status().await;
        assert_eq!(status.country.as_deref(), Some("DE"));
    }

    #[tokio::test]
    async fn test_rotate_resets_count_since_rotate() {
        let (controller, _fake) = controller_with_fake();
        controller.bump_listing_count().await;
        controller.bump_listing_count().await;
        controller.rotate(VpnRotationReason::Mismatch).await.unwrap();
        let status = controller.get_status().await;
        assert_eq!(status.count_since_rotate, 0);
    }

    #[tokio::test]
    async fn test_bump_listing_count_increments() {
        let (controller, _fake) = controller_with_fake();
        assert_eq!(controller.bump_listing_count().await, 1);
        assert_eq!(controller.bump_listing_count().await, 2);
    }

    #[tokio::test]
    async fn test_vpn_log_store_records_rotation() {
        let db = Database::new_in_memory().await.unwrap();
        let log = VpnLogStore::new(db);
        let fake = StdArc::new(FakeVpnCommand::default());
        let controller = VpnController::new(
            Box::new(FakeControllerCommand(fake)),
            vec!["US".to_string(), "DE".to_string()],
            Some(log.clone()),
        );
        controller.rotate(VpnRotationReason::BlockIp).await.unwrap();
        let rows = log.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "block_ip");
    }
}

//! Builds the concrete collaborators (database, stores, VPN controller,
//! worker, dispatcher) from a loaded [`Config`] and holds them for the
//! lifetime of one run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::queue::Queue;
use crate::store::{LogStore, RecordStore, VpnLogStore};
use crate::vpn::{ProcessVpnCommand, VpnController};
use crate::worker::Worker;

/// Everything a run of the harvester needs, constructed once at startup.
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub queue: Queue,
    pub records: RecordStore,
    pub log: LogStore,
    pub vpn_log: VpnLogStore,
    pub vpn: VpnController,
    pub dispatcher: Dispatcher,
}

impl AppContext {
    /// Ensures `DATA_ROOT`/`IMAGES_ROOT`/`LOGS_ROOT` exist, opens (and migrates)
    /// the `SQLite` database under `DATA_ROOT`, and wires every collaborator
    /// together: stores, VPN controller, a single [`Worker`], and the
    /// [`Dispatcher`] that drives it.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directories can't be created, the
    /// database can't be opened/migrated, or the configured catalog root
    /// isn't a valid hostname.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        config.ensure_directories().context("failed to create data/images/logs directories")?;

        let db = Database::new(&config.db_path())
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path().display()))?;

        let config = Arc::new(config);
        let queue = Queue::new(db.clone());
        let records = RecordStore::new(db.clone());
        let log = LogStore::new(db.clone());
        let vpn_log = VpnLogStore::new(db.clone());

        let vpn_command = Box::new(ProcessVpnCommand::new(config.vpn_command.clone()));
        let vpn = VpnController::new(vpn_command, config.vpn_countries.clone(), Some(vpn_log.clone()));

        let stats = Arc::new(DispatcherStats::default());
        let worker = Arc::new(
            Worker::new(config.clone(), queue.clone(), records.clone(), log.clone(), vpn.clone(), stats.clone())
                .context("failed to construct worker")?,
        );

        let dispatcher = Dispatcher::new(
            queue.clone(),
            vpn.clone(),
            worker,
            stats,
            config.batch_size,
            config.dispatcher_worker_concurrency,
            config.dispatcher_poll_interval,
            config.dispatcher_warmup,
            config.vpn_enabled,
        );

        info!(
            data_root = %config.data_root.display(),
            locales = ?config.ordered_locales(),
            use_browser_driver = config.use_browser_driver,
            "harvester context ready"
        );

        Ok(Self { config, db, queue, records, log, vpn_log, vpn, dispatcher })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_builds_a_usable_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_for_test();
        config.data_root = dir.path().join("data");
        config.images_root = dir.path().join("data/images");
        config.logs_root = dir.path().join("data/logs");

        let ctx = AppContext::bootstrap(config).await.unwrap();
        let id = ctx.queue.enqueue("https://example.com/hotel.html", None).await.unwrap();
        assert!(id > 0);
        assert_eq!(ctx.dispatcher.stats().snapshot().total_dispatched, 0);
    }
}

//! Dispatcher (C10): periodic claim-and-dispatch loop over a bounded worker pool.
//!
//! Runs as a single cooperative task. Each tick claims a batch of pending
//! listings not already in flight, hands each to the Worker inside a bounded
//! `tokio::sync::Semaphore`-backed pool, then sleeps before the next tick.
//! Cancellation lets in-flight workers run to completion; nothing already
//! claimed is ever abandoned mid-listing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashSet;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::queue::Queue;
use crate::vpn::VpnController;
use crate::worker::Worker;

/// Cooperative stop signal for [`Dispatcher::run`]. Cloning shares the same
/// underlying flag, so a `main` holding one clone can stop a loop driven from
/// a spawned task holding another.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`ShutdownSignal::cancel`] has been called, or immediately
    /// if it already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Process-wide counters mirroring the dispatch loop's lifetime activity.
/// Cheap to read concurrently; every field is updated with `Ordering::SeqCst`
/// since these are status counters, not a hot path.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub total_dispatched: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_failed: AtomicU64,
    pub currently_processing: AtomicU64,
    pub consecutive_failures: AtomicU64,
    pub listings_since_vpn_rotate: AtomicU64,
    pub lang_mismatch_count: AtomicU64,
    pub lang_mismatch_blocked: AtomicU64,
}

/// A point-in-time read of [`DispatcherStats`], for logging and the CLI summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStatsSnapshot {
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub currently_processing: u64,
    pub consecutive_failures: u64,
    pub listings_since_vpn_rotate: u64,
    pub lang_mismatch_count: u64,
    pub lang_mismatch_blocked: u64,
}

impl DispatcherStats {
    #[must_use]
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_dispatched: self.total_dispatched.load(Ordering::SeqCst),
            total_completed: self.total_completed.load(Ordering::SeqCst),
            total_failed: self.total_failed.load(Ordering::SeqCst),
            currently_processing: self.currently_processing.load(Ordering::SeqCst),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            listings_since_vpn_rotate: self.listings_since_vpn_rotate.load(Ordering::SeqCst),
            lang_mismatch_count: self.lang_mismatch_count.load(Ordering::SeqCst),
            lang_mismatch_blocked: self.lang_mismatch_blocked.load(Ordering::SeqCst),
        }
    }
}

/// Claims batches of pending listings and runs them through a bounded pool of
/// [`Worker`] invocations until told to stop.
pub struct Dispatcher {
    queue: Queue,
    vpn: VpnController,
    worker: Arc<Worker>,
    stats: Arc<DispatcherStats>,
    batch_size: i64,
    worker_concurrency: usize,
    poll_interval: std::time::Duration,
    warmup: std::time::Duration,
    vpn_enabled: bool,
    active: Arc<DashSet<i64>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        queue: Queue,
        vpn: VpnController,
        worker: Arc<Worker>,
        stats: Arc<DispatcherStats>,
        batch_size: i64,
        worker_concurrency: usize,
        poll_interval: std::time::Duration,
        warmup: std::time::Duration,
        vpn_enabled: bool,
    ) -> Self {
        Self {
            queue,
            vpn,
            worker,
            stats,
            batch_size,
            worker_concurrency: worker_concurrency.max(1),
            poll_interval,
            warmup,
            vpn_enabled,
            active: Arc::new(DashSet::new()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Runs the claim-and-dispatch loop until `cancel` is triggered. In-flight
    /// workers are always awaited to completion before returning, even after
    /// cancellation, so a claimed listing is never abandoned mid-scrape.
    pub async fn run(&self, cancel: ShutdownSignal) {
        tokio::time::sleep(self.warmup).await;

        let semaphore = Arc::new(Semaphore::new(self.worker_concurrency));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(err) = self.ensure_vpn_connected().await {
                warn!(%err, "vpn connect attempt before dispatch tick failed");
            }

            match self.dispatch_one_tick(&semaphore, &mut in_flight).await {
                Ok(claimed) if claimed > 0 => info!(claimed, "dispatched batch"),
                Ok(_) => {}
                Err(err) => warn!(%err, "failed to claim pending listings"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancel.cancelled() => break,
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    async fn ensure_vpn_connected(&self) -> Result<(), crate::vpn::VpnError> {
        if !self.vpn_enabled {
            return Ok(());
        }
        if self.vpn.is_active().await {
            return Ok(());
        }
        if self.vpn.connect(Some("US")).await.is_ok() {
            return Ok(());
        }
        self.vpn.connect(None).await
    }

    #[instrument(skip(self, semaphore, in_flight))]
    async fn dispatch_one_tick(
        &self,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<()>,
    ) -> Result<usize, crate::queue::QueueError> {
        let claimed = self.queue.claim_pending(self.batch_size).await?;
        let fresh: Vec<i64> = claimed.into_iter().filter(|id| self.active.insert(*id)).collect();

        for _ in &fresh {
            self.stats.total_dispatched.fetch_add(1, Ordering::SeqCst);
            self.stats.currently_processing.fetch_add(1, Ordering::SeqCst);
        }

        for q_id in fresh.clone() {
            let semaphore = semaphore.clone();
            let worker = self.worker.clone();
            let queue = self.queue.clone();
            let active = self.active.clone();
            let stats = self.stats.clone();

            in_flight.spawn(async move {
                let _permit = semaphore.acquire().await;
                match worker.process_listing(q_id).await {
                    Ok(()) => {
                        let row = queue.get(q_id).await.ok();
                        let completed = row.map(|r| r.status() == crate::queue::ListingStatus::Completed);
                        if completed == Some(true) {
                            stats.total_completed.fetch_add(1, Ordering::SeqCst);
                        } else {
                            stats.total_failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Err(err) => {
                        warn!(q_id, %err, "worker could not attempt listing, scheduling retry");
                        if let Err(requeue_err) = queue.set_retryable_failure(q_id, &err.to_string()).await {
                            warn!(q_id, %requeue_err, "failed to record retryable failure");
                        }
                        stats.total_failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
                stats.currently_processing.fetch_sub(1, Ordering::SeqCst);
                active.remove(&q_id);
            });
        }

        Ok(fresh.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::store::{LogStore, RecordStore};
    use crate::vpn::FakeVpnCommand;
    use std::time::Duration;

    async fn test_dispatcher() -> (Dispatcher, Queue) {
        let db = Database::new_in_memory().await.unwrap();
        let mut config = Config::default_for_test();
        config.max_retries = 1;
        config.min_request_delay = Duration::from_millis(1);
        config.max_request_delay = Duration::from_millis(2);
        config.locales_enabled = vec!["en"];
        let config = Arc::new(config);
        let queue = Queue::new(db.clone());
        let records = RecordStore::new(db.clone());
        let log = LogStore::new(db);
        let vpn = VpnController::new(Box::new(FakeVpnCommand::default()), vec!["US".to_string()], None);
        let stats = Arc::new(DispatcherStats::default());
        let worker = Arc::new(Worker::new(config, queue.clone(), records, log, vpn.clone(), stats.clone()).unwrap());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            vpn,
            worker,
            stats,
            5,
            1,
            Duration::from_millis(20),
            Duration::from_millis(1),
            false,
        );
        (dispatcher, queue)
    }

    #[tokio::test]
    async fn test_dispatch_one_tick_claims_and_runs_worker() {
        let (dispatcher, queue) = test_dispatcher().await;
        queue.enqueue("https://127.0.0.1:1/nope.html", None).await.unwrap();
        let semaphore = Arc::new(Semaphore::new(1));
        let mut in_flight = JoinSet::new();
        let claimed = dispatcher.dispatch_one_tick(&semaphore, &mut in_flight).await.unwrap();
        assert_eq!(claimed, 1);
        while in_flight.join_next().await.is_some() {}
        let snapshot = dispatcher.stats().snapshot();
        assert_eq!(snapshot.total_dispatched, 1);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.currently_processing, 0);
    }

    #[tokio::test]
    async fn test_dispatch_one_tick_does_not_reclaim_in_flight_id() {
        let (dispatcher, queue) = test_dispatcher().await;
        queue.enqueue("https://127.0.0.1:1/nope.html", None).await.unwrap();
        dispatcher.active.insert(1);
        let semaphore = Arc::new(Semaphore::new(1));
        let mut in_flight = JoinSet::new();
        let claimed = dispatcher.dispatch_one_tick(&semaphore, &mut in_flight).await.unwrap();
        assert_eq!(claimed, 0);
    }

    #[tokio::test]
    async fn test_run_stops_promptly_after_cancel() {
        let (dispatcher, _queue) = test_dispatcher().await;
        let shutdown = ShutdownSignal::new();
        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            shutdown_clone.cancel();
        });
        dispatcher.run(shutdown).await;
    }

    #[test]
    fn test_shutdown_signal_cancelled_resolves_immediately_when_already_cancelled() {
        let signal = ShutdownSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
    }
}

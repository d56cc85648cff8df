//! Worker (C9): per-listing orchestrator.
//!
//! Drives one listing through every configured locale, English (or whatever
//! `DEFAULT_LOCALE` is) always first. A locale whose content doesn't
//! authenticate as itself is never stored; the default locale gets up to two
//! fresh-session retries before the worker gives up on it for this pass.
//! Images are downloaded at most once per listing, from the default locale's
//! page, using whatever cookies that fetch accumulated.

mod error;

pub use error::WorkerError;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::dispatcher::DispatcherStats;
use crate::extract;
use crate::fetcher::{BrowserFetcher, Fetcher, HttpFetcher};
use crate::images::{ImageBounds, ImageDownloader};
use crate::locale::build_locale_url;
use crate::queue::{ListingStatus, Queue};
use crate::store::{LogStore, RecordStore, ScrapeStatus, VpnRotationReason};
use crate::vpn::VpnController;

/// How many times the default locale is retried, with a fresh session, before
/// the worker accepts the mismatch and moves on.
const MAX_DEFAULT_LOCALE_RETRIES: u32 = 2;

/// Delay between a forced session discard and the retry fetch.
const LOCALE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Consecutive locale mismatches (across all locales, since the last reset)
/// before the worker asks the VPN controller to rotate egress.
const MISMATCH_ROTATION_THRESHOLD: u32 = 3;

/// Consecutive whole-listing failures before the worker forces a VPN rotation.
const CONSECUTIVE_FAILURE_ROTATION_THRESHOLD: u32 = 3;

/// Orchestrates one listing end to end: fetch, extract, authenticate, store,
/// download images, and report a terminal status back to the Queue Store.
pub struct Worker {
    config: Arc<Config>,
    queue: Queue,
    records: RecordStore,
    log: LogStore,
    vpn: VpnController,
    stats: Arc<DispatcherStats>,
    catalog_root_url: Url,
    image_bounds: ImageBounds,
}

impl Worker {
    /// # Errors
    ///
    /// Returns `WorkerError::InvalidCatalogRoot` if `config.catalog_root` isn't
    /// a valid hostname.
    pub fn new(
        config: Arc<Config>,
        queue: Queue,
        records: RecordStore,
        log: LogStore,
        vpn: VpnController,
        stats: Arc<DispatcherStats>,
    ) -> Result<Self, WorkerError> {
        let catalog_root_url = Url::parse(&format!("https://{}/", config.catalog_root))?;
        let image_bounds = ImageBounds {
            min_w: config.image_min_w,
            min_h: config.image_min_h,
            max_w: config.image_max_w,
            max_h: config.image_max_h,
        };
        Ok(Self { config, queue, records, log, vpn, stats, catalog_root_url, image_bounds })
    }

    async fn new_browser_fetcher(&self) -> Result<Box<dyn Fetcher>, WorkerError> {
        let fetcher = BrowserFetcher::new(&self.config, self.catalog_root_url.clone()).await?;
        Ok(Box::new(fetcher))
    }

    fn new_http_fetcher(&self) -> Result<Box<dyn Fetcher>, WorkerError> {
        let fetcher = HttpFetcher::new(&self.config, self.catalog_root_url.clone())?;
        Ok(Box::new(fetcher))
    }

    /// Processes `q_id` through every configured locale and reports a terminal
    /// status (`completed`/`failed`) back to the Queue Store before returning.
    ///
    /// A `Some` error return means the listing could not even be attempted
    /// (fetcher construction failed, the id doesn't exist, the database is
    /// unreachable) and the caller should treat it as a retryable failure
    /// rather than the immediate terminal failure this function already
    /// records for an attempted-but-unsuccessful listing.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if the listing can't be read, or if the
    /// browser-driver variant fails to launch.
    #[instrument(skip(self))]
    pub async fn process_listing(&self, q_id: i64) -> Result<(), WorkerError> {
        let listing = self.queue.get(q_id).await?;
        let canonical_url = listing.url.clone();

        if self.config.vpn_enabled {
            if let Err(err) = self.vpn.reconnect_if_disconnected().await {
                warn!(q_id, %err, "vpn reconnect failed, continuing on current egress");
            }
        }

        let locales = self.config.ordered_locales();

        let mut shared_fetcher = if self.config.use_browser_driver {
            Some(self.new_browser_fetcher().await?)
        } else {
            None
        };

        let mut images_downloaded = false;
        let mut lang_retry_count = 0u32;
        let mut mismatch_streak = 0u32;
        let mut stored_any = false;
        let mut scraped_count = 0u32;
        let mut last_error: Option<String> = None;

        let mut idx = 0usize;
        while idx < locales.len() {
            let locale = locales[idx];
            let locale_url = build_locale_url(&canonical_url, locale);
            let started = Instant::now();

            let mut owned_fetcher_slot;
            let fetcher: &mut dyn Fetcher = match shared_fetcher.as_mut() {
                Some(f) => f.as_mut(),
                None => {
                    owned_fetcher_slot = self.new_http_fetcher()?;
                    owned_fetcher_slot.as_mut()
                }
            };

            let fetch_result = fetcher.fetch(&locale_url, locale).await;
            let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

            let html = match fetch_result {
                Ok(result) => result.html,
                Err(err) => {
                    let msg = err.to_string();
                    self.log
                        .append_best_effort(q_id, locale, ScrapeStatus::NoData, duration_ms, 0, Some(&msg))
                        .await;
                    last_error = Some(msg);
                    idx += 1;
                    continue;
                }
            };

            let record = extract::extract(&html, locale);
            if !record.has_name() {
                self.log.append_best_effort(q_id, locale, ScrapeStatus::NoData, duration_ms, 0, None).await;
                last_error = Some(format!("no name extracted for locale {locale}"));
                idx += 1;
                continue;
            }

            if record.detected_locale != locale {
                self.stats.lang_mismatch_count.fetch_add(1, Ordering::SeqCst);
                self.stats.lang_mismatch_blocked.fetch_add(1, Ordering::SeqCst);
                self.log
                    .append_best_effort(
                        q_id,
                        locale,
                        ScrapeStatus::LangMismatch,
                        duration_ms,
                        0,
                        Some(&format!("requested {locale}, got {}", record.detected_locale)),
                    )
                    .await;
                mismatch_streak += 1;

                if locale == self.config.default_locale && lang_retry_count < MAX_DEFAULT_LOCALE_RETRIES {
                    lang_retry_count += 1;
                    fetcher.discard_session().await;
                    tokio::time::sleep(LOCALE_RETRY_DELAY).await;
                    continue;
                }

                if mismatch_streak >= MISMATCH_ROTATION_THRESHOLD {
                    if let Err(err) = self.vpn.rotate(VpnRotationReason::Mismatch).await {
                        warn!(q_id, %err, "vpn rotation on repeated mismatch failed");
                    }
                    mismatch_streak = 0;
                }
                idx += 1;
                continue;
            }

            mismatch_streak = 0;
            lang_retry_count = 0;

            if let Err(err) = self.records.upsert(q_id, locale, &locale_url, &record).await {
                warn!(q_id, locale, %err, "failed to store record");
                let msg = err.to_string();
                self.log
                    .append_best_effort(q_id, locale, ScrapeStatus::Error, duration_ms, 0, Some(&msg))
                    .await;
                last_error = Some(msg);
                idx += 1;
                continue;
            }
            self.log.append_best_effort(q_id, locale, ScrapeStatus::Completed, duration_ms, 1, None).await;
            stored_any = true;
            scraped_count += 1;

            if locale == self.config.default_locale
                && record.detected_locale == self.config.default_locale
                && !images_downloaded
                && self.config.download_images
            {
                let cookie_jar = fetcher.cookie_jar().await;
                let downloader = ImageDownloader::new(
                    self.config.images_root.clone(),
                    self.image_bounds,
                    self.config.max_image_workers,
                    cookie_jar,
                    self.config.catalog_root.clone(),
                    self.config.image_quality,
                );
                match downloader.download(q_id, &record.image_urls).await {
                    Ok(count) => {
                        if count > 0 {
                            if let Err(err) = self.records.update_images_count(q_id, locale, i64::from(u32::try_from(count).unwrap_or(u32::MAX))).await {
                                warn!(q_id, %err, "failed to record images_count");
                            }
                        }
                        images_downloaded = true;
                    }
                    Err(err) => warn!(q_id, %err, "image download failed"),
                }
            }

            idx += 1;
        }

        if let Some(mut fetcher) = shared_fetcher.take() {
            fetcher.shutdown().await;
        }

        if stored_any {
            self.queue.set_terminal(q_id, ListingStatus::Completed, None).await?;
        } else {
            let error = last_error.unwrap_or_else(|| "no locale produced a storable record".to_string());
            self.queue.set_retryable_failure(q_id, &error).await?;
        }

        info!(q_id, scraped_count, stored_any, "listing finished");

        if stored_any {
            self.stats.consecutive_failures.store(0, Ordering::SeqCst);
            let count_since_rotate = self.vpn.bump_listing_count().await;
            self.stats
                .listings_since_vpn_rotate
                .store(u64::from(count_since_rotate), Ordering::SeqCst);
            self.maybe_rotate_periodic(count_since_rotate).await;
        } else {
            let consecutive = self.stats.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if consecutive >= CONSECUTIVE_FAILURE_ROTATION_THRESHOLD {
                self.maybe_rotate_on_failures().await;
            }
        }

        Ok(())
    }

    async fn maybe_rotate_periodic(&self, count_since_rotate: u32) {
        if !self.config.vpn_enabled {
            return;
        }
        if count_since_rotate >= self.config.vpn_rotate_every_n_listings {
            if let Err(err) = self.vpn.rotate(VpnRotationReason::Periodic).await {
                warn!(%err, "periodic vpn rotation failed");
            }
        }
    }

    async fn maybe_rotate_on_failures(&self) {
        if !self.config.vpn_enabled {
            return;
        }
        if let Err(err) = self.vpn.rotate(VpnRotationReason::BlockIp).await {
            warn!(%err, "vpn rotation after consecutive failures failed");
        }
        self.stats.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::vpn::FakeVpnCommand;

    async fn test_worker() -> (Worker, Queue) {
        let db = Database::new_in_memory().await.unwrap();
        let mut config = Config::default_for_test();
        config.max_retries = 1;
        config.min_request_delay = Duration::from_millis(1);
        config.max_request_delay = Duration::from_millis(2);
        let config = Arc::new(config);
        let queue = Queue::new(db.clone());
        let records = RecordStore::new(db.clone());
        let log = LogStore::new(db);
        let vpn = VpnController::new(Box::new(FakeVpnCommand::default()), vec!["US".to_string()], None);
        let stats = Arc::new(DispatcherStats::default());
        let worker = Worker::new(config, queue.clone(), records, log, vpn, stats).unwrap();
        (worker, queue)
    }

    #[tokio::test]
    async fn test_process_listing_with_unreachable_host_reopens_under_retry_cap() {
        let (worker, queue) = test_worker().await;
        let q_id = queue.enqueue("https://127.0.0.1:1/nope.html", None).await.unwrap();
        worker.process_listing(q_id).await.unwrap();
        let row = queue.get(q_id).await.unwrap();
        assert_eq!(row.status(), ListingStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert!(row.last_error.is_some());
    }

    #[tokio::test]
    async fn test_process_listing_with_unreachable_host_marks_failed_at_retry_cap() {
        let (worker, queue) = test_worker().await;
        let q_id = queue.enqueue("https://127.0.0.1:1/nope.html", None).await.unwrap();
        for _ in 0..crate::queue::DEFAULT_MAX_RETRIES {
            worker.process_listing(q_id).await.unwrap();
            queue.claim_pending(1).await.ok();
        }
        let row = queue.get(q_id).await.unwrap();
        assert_eq!(row.status(), ListingStatus::Failed);
    }

    #[tokio::test]
    async fn test_process_listing_missing_id_errors() {
        let (worker, _queue) = test_worker().await;
        let err = worker.process_listing(9999).await.unwrap_err();
        assert!(matches!(err, WorkerError::Queue(_)));
    }
}

//! Rate cache service: stale-while-revalidate reads and fetch-and-persist
//! writes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use ratecache_common::{now, ExchangeRateSnapshot, RateCacheError, Result};

use crate::jobs::RateTaskHandler;
use crate::metrics::CacheMetrics;
use crate::provider::RateFetcher;
use crate::queue::{BackgroundQueue, BackgroundTask, QueueConfig, QueueWorker};
use crate::revalidation::RevalidationLock;
use crate::store::{AccessLogWriter, RateStore};
use crate::ttl;

/// Default freshness window (one hour).
pub const DEFAULT_TTL_MS: u64 = 60 * 60 * 1000;

/// Configuration for the rate cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a persisted snapshot counts as fresh.
    pub ttl_ms: u64,
    /// Background tasks processed concurrently.
    pub refresh_worker_concurrency: usize,
    /// Abandon a revalidation after this long. `None` waits indefinitely.
    pub revalidation_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            refresh_worker_concurrency: crate::queue::DEFAULT_CONCURRENCY,
            revalidation_timeout: None,
        }
    }
}

/// Fetches upstream rates and persists them as a new snapshot.
pub struct RateRefresher {
    fetcher: Arc<dyn RateFetcher>,
    store: Arc<dyn RateStore>,
    metrics: Arc<CacheMetrics>,
}

impl RateRefresher {
    /// Create a new refresher.
    pub fn new(
        fetcher: Arc<dyn RateFetcher>,
        store: Arc<dyn RateStore>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            fetcher,
            store,
            metrics,
        }
    }

    /// Fetch the latest rates and persist them.
    ///
    /// No data from the fetcher is `UpstreamUnavailable` and nothing is
    /// written. Fetch and write failures become `Internal` with the cause
    /// attached.
    #[instrument(skip(self), fields(provider = self.fetcher.name()))]
    pub async fn refresh_and_persist(&self) -> Result<ExchangeRateSnapshot> {
        let result = self.fetch_and_save().await;
        self.metrics.refresh(result.is_ok());
        result
    }

    async fn fetch_and_save(&self) -> Result<ExchangeRateSnapshot> {
        let latest = self
            .fetcher
            .fetch_latest()
            .await
            .map_err(|e| RateCacheError::internal("failed to fetch latest rates", e))?;

        let Some(latest) = latest else {
            warn!("Provider returned no rates");
            return Err(RateCacheError::UpstreamUnavailable);
        };

        if !latest.is_well_formed() {
            warn!(base = %latest.base, "Provider returned empty or non-positive rates");
        }

        let snapshot = self
            .store
            .save(latest)
            .await
            .map_err(|e| RateCacheError::internal("failed to persist rates", e))?;

        info!(
            snapshot_id = %snapshot.id,
            base = %snapshot.base,
            currencies = snapshot.rates.len(),
            observed_at = %snapshot.observed_at,
            "Rates synchronized with storage"
        );

        Ok(snapshot)
    }
}

/// Answers "what are the current rates" with stale-while-revalidate
/// semantics.
pub struct RateCacheService {
    store: Arc<dyn RateStore>,
    refresher: Arc<RateRefresher>,
    lock: RevalidationLock,
    queue: BackgroundQueue,
    config: CacheConfig,
    metrics: Arc<CacheMetrics>,
}

impl RateCacheService {
    /// Create a service over an already running queue.
    pub fn new(
        store: Arc<dyn RateStore>,
        refresher: Arc<RateRefresher>,
        queue: BackgroundQueue,
        config: CacheConfig,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            store,
            refresher,
            lock: RevalidationLock::with_timeout(config.revalidation_timeout),
            queue,
            config,
            metrics,
        }
    }

    /// Wire up the refresher, task handler, and background queue, and
    /// return the service with the queue's worker handle.
    pub fn start(
        fetcher: Arc<dyn RateFetcher>,
        store: Arc<dyn RateStore>,
        audit_log: Arc<dyn AccessLogWriter>,
        config: CacheConfig,
    ) -> (Arc<Self>, QueueWorker) {
        let metrics = Arc::new(CacheMetrics::new());
        let refresher = Arc::new(RateRefresher::new(fetcher, store.clone(), metrics.clone()));
        let handler = Arc::new(RateTaskHandler::new(refresher.clone(), audit_log));

        let (queue, worker) = BackgroundQueue::start(
            handler,
            QueueConfig {
                concurrency: config.refresh_worker_concurrency,
            },
            metrics.clone(),
        );

        let service = Arc::new(Self::new(store, refresher, queue, config, metrics));
        (service, worker)
    }

    /// Fetch the latest rates and persist them, bypassing the cache.
    pub async fn refresh_and_persist(&self) -> Result<ExchangeRateSnapshot> {
        self.refresher.refresh_and_persist().await
    }

    /// Current rates, possibly stale.
    ///
    /// Blocks on the upstream only when the store is empty. An expired
    /// snapshot is returned as-is after a background refresh is scheduled.
    #[instrument(skip(self))]
    pub async fn get_current_rates(&self) -> Result<ExchangeRateSnapshot> {
        let stored = self
            .store
            .find_latest()
            .await
            .map_err(|e| RateCacheError::internal("failed to load latest rates", e))?;

        let Some(snapshot) = stored else {
            info!("No stored rates, synchronizing with provider");
            self.metrics.cold_start();
            return self.refresher.refresh_and_persist().await;
        };

        if ttl::is_expired(snapshot.persisted_at, self.config.ttl_ms, now()) {
            self.metrics.stale_hit();
            let started = self.schedule_revalidation();
            self.metrics.revalidation(started);
            debug!(
                snapshot_id = %snapshot.id,
                persisted_at = %snapshot.persisted_at,
                revalidation_started = started,
                "Serving stale rates"
            );
        } else {
            self.metrics.fresh_hit();
            debug!(snapshot_id = %snapshot.id, "Serving fresh rates");
        }

        Ok(snapshot)
    }

    /// Record the access in the background, then return current rates.
    pub async fn get_current_rates_and_log_access(
        &self,
        source_address: &str,
    ) -> Result<ExchangeRateSnapshot> {
        self.queue.enqueue(BackgroundTask::log_access(source_address, now()));
        self.get_current_rates().await
    }

    /// Populate an empty store. Returns the new snapshot, or `None` if a
    /// snapshot already existed.
    pub async fn sync_on_launch(&self) -> Result<Option<ExchangeRateSnapshot>> {
        let stored = self
            .store
            .find_latest()
            .await
            .map_err(|e| RateCacheError::internal("failed to load latest rates", e))?;

        if stored.is_some() {
            info!("Data store is up to date");
            return Ok(None);
        }

        let snapshot = self.refresher.refresh_and_persist().await?;
        info!(snapshot_id = %snapshot.id, "Initial sync with provider completed");
        Ok(Some(snapshot))
    }

    /// Queue a refresh outside the read path (scheduled sync).
    pub fn schedule_refresh(&self) {
        self.queue.enqueue(BackgroundTask::Refresh);
    }

    /// Metrics shared by the service and its queue.
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// The revalidation lock guarding background refreshes.
    pub fn revalidation_lock(&self) -> &RevalidationLock {
        &self.lock
    }

    /// The lock stays held until the queued refresh has been processed, so
    /// one stale window produces one refresh.
    fn schedule_revalidation(&self) -> bool {
        let queue = self.queue.clone();
        self.lock.start_revalidation(move || async move {
            queue.submit(BackgroundTask::Refresh).wait().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateFetcher;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use ratecache_common::{LatestRates, RateTable, SnapshotId, Timestamp};

    fn usd_rates() -> LatestRates {
        let table: RateTable = [("EUR".to_string(), 0.85)].into_iter().collect();
        LatestRates::new("USD", table, now())
    }

    fn seed(store: &MemoryStore, persisted_at: Timestamp) -> ExchangeRateSnapshot {
        let snapshot =
            ExchangeRateSnapshot::from_latest(SnapshotId::new(1), usd_rates(), persisted_at);
        store.insert_snapshot(snapshot.clone());
        snapshot
    }

    struct Fixture {
        service: Arc<RateCacheService>,
        worker: QueueWorker,
        store: Arc<MemoryStore>,
        fetcher: Arc<MockRateFetcher>,
    }

    fn setup(ttl_ms: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MockRateFetcher::new("mock"));
        fetcher.set_rates(usd_rates());

        let (service, worker) = RateCacheService::start(
            fetcher.clone(),
            store.clone(),
            store.clone(),
            CacheConfig {
                ttl_ms,
                ..Default::default()
            },
        );

        Fixture {
            service,
            worker,
            store,
            fetcher,
        }
    }

    #[tokio::test]
    async fn test_cold_start_fetches_synchronously() {
        let fx = setup(60_000);

        let snapshot = fx.service.get_current_rates().await.unwrap();

        assert_eq!(snapshot.base, "USD");
        assert_eq!(fx.fetcher.calls(), 1);
        assert_eq!(fx.store.save_count(), 1);
        assert_eq!(fx.service.metrics().snapshot().cold_starts, 1);
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_warm_fresh_never_enqueues() {
        let fx = setup(60_000);
        let seeded = seed(&fx.store, now() - ChronoDuration::seconds(10));

        let snapshot = fx.service.get_current_rates().await.unwrap();
        fx.worker.shutdown().await;

        assert_eq!(snapshot, seeded);
        assert_eq!(fx.fetcher.calls(), 0);
        let metrics = fx.service.metrics().snapshot();
        assert_eq!(metrics.fresh_hits, 1);
        assert_eq!(metrics.tasks_enqueued, 0);
    }

    #[tokio::test]
    async fn test_warm_stale_returns_existing_and_refreshes_once() {
        let fx = setup(60_000);
        let persisted_at = now() - ChronoDuration::seconds(61);
        seed(&fx.store, persisted_at);

        let snapshot = fx.service.get_current_rates().await.unwrap();

        assert_eq!(snapshot.base, "USD");
        assert_eq!(snapshot.rate("EUR"), Some(0.85));
        assert_eq!(snapshot.to_current_rates().timestamp, persisted_at);

        fx.service.revalidation_lock().settled().await;
        fx.worker.shutdown().await;

        assert_eq!(fx.fetcher.calls(), 1);
        assert_eq!(fx.store.save_count(), 1);
        let metrics = fx.service.metrics().snapshot();
        assert_eq!(metrics.tasks_enqueued, 1);
        assert_eq!(metrics.revalidations_started, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_reads_enqueue_one_refresh() {
        let fx = setup(60_000);
        fx.fetcher.set_delay(std::time::Duration::from_millis(200));
        let seeded = seed(&fx.store, now() - ChronoDuration::minutes(5));

        let reads = (0..25).map(|_| {
            let service = fx.service.clone();
            tokio::spawn(async move { service.get_current_rates().await })
        });
        let results = futures::future::join_all(reads).await;

        for result in results {
            assert_eq!(result.unwrap().unwrap().id, seeded.id);
        }

        fx.service.revalidation_lock().settled().await;
        fx.worker.shutdown().await;

        assert_eq!(fx.fetcher.calls(), 1);
        let metrics = fx.service.metrics().snapshot();
        assert_eq!(metrics.stale_hits, 25);
        assert_eq!(metrics.revalidations_started, 1);
        assert_eq!(metrics.revalidations_skipped, 24);
        assert_eq!(metrics.tasks_enqueued, 1);
    }

    #[tokio::test]
    async fn test_failed_background_refresh_retries_on_next_stale_read() {
        let fx = setup(60_000);
        fx.fetcher.set_failure("connection refused");
        seed(&fx.store, now() - ChronoDuration::minutes(5));

        assert!(fx.service.get_current_rates().await.is_ok());
        fx.service.revalidation_lock().settled().await;

        fx.fetcher.set_rates(usd_rates());
        assert!(fx.service.get_current_rates().await.is_ok());
        fx.service.revalidation_lock().settled().await;
        fx.worker.shutdown().await;

        assert_eq!(fx.fetcher.calls(), 2);
        assert_eq!(fx.store.save_count(), 1);
        assert_eq!(fx.service.metrics().snapshot().refreshes_failed, 1);
    }

    #[tokio::test]
    async fn test_refresh_with_no_data_is_upstream_unavailable() {
        let fx = setup(60_000);
        fx.fetcher.set_empty();

        let err = fx.service.refresh_and_persist().await.unwrap_err();

        assert!(matches!(err, RateCacheError::UpstreamUnavailable));
        assert_eq!(fx.store.save_count(), 0);
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_fetch_failure_is_internal() {
        let fx = setup(60_000);
        fx.fetcher.set_failure("timeout");

        let err = fx.service.refresh_and_persist().await.unwrap_err();

        assert!(matches!(err, RateCacheError::Internal { .. }));
        assert!(err.chain().contains("timeout"));
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_write_failure_is_internal() {
        let fx = setup(60_000);
        fx.store.fail_writes(true);

        let err = fx.service.refresh_and_persist().await.unwrap_err();

        assert!(matches!(err, RateCacheError::Internal { .. }));
        assert!(err.chain().contains("save snapshot"));
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_read_failure_is_internal() {
        let fx = setup(60_000);
        fx.store.fail_reads(true);

        let err = fx.service.get_current_rates().await.unwrap_err();

        assert!(matches!(err, RateCacheError::Internal { .. }));
        assert_eq!(fx.fetcher.calls(), 0);
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_cold_start_surfaces_upstream_unavailable() {
        let fx = setup(60_000);
        fx.fetcher.set_empty();

        let err = fx.service.get_current_rates().await.unwrap_err();

        assert!(err.is_upstream());
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_log_access_is_recorded_in_background() {
        let fx = setup(60_000);
        seed(&fx.store, now());

        let snapshot = fx
            .service
            .get_current_rates_and_log_access("203.0.113.7")
            .await
            .unwrap();
        assert_eq!(snapshot.base, "USD");
        fx.worker.shutdown().await;

        let entries = fx.store.access_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_address, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_log_access_failure_does_not_affect_rates() {
        let fx = setup(60_000);
        seed(&fx.store, now());
        fx.store.fail_writes(true);

        let snapshot = fx
            .service
            .get_current_rates_and_log_access("203.0.113.7")
            .await
            .unwrap();
        fx.worker.shutdown().await;

        assert_eq!(snapshot.base, "USD");
        assert!(fx.store.access_entries().is_empty());
        assert_eq!(fx.service.metrics().snapshot().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_sync_on_launch_only_when_empty() {
        let fx = setup(60_000);

        let first = fx.service.sync_on_launch().await.unwrap();
        assert!(first.is_some());

        let second = fx.service.sync_on_launch().await.unwrap();
        assert!(second.is_none());
        assert_eq!(fx.fetcher.calls(), 1);
        fx.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_schedule_refresh_runs_in_background() {
        let fx = setup(60_000);

        fx.service.schedule_refresh();
        fx.worker.shutdown().await;

        assert_eq!(fx.store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_revalidates() {
        let fx = setup(0);
        seed(&fx.store, now() - ChronoDuration::milliseconds(5));

        fx.service.get_current_rates().await.unwrap();
        fx.service.revalidation_lock().settled().await;
        fx.worker.shutdown().await;

        assert_eq!(fx.fetcher.calls(), 1);
    }
}

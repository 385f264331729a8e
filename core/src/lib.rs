//! RateCache Core
//!
//! Stale-while-revalidate caching of exchange rates backed by a persistent
//! store and refreshed from an upstream provider.
//!
//! # Features
//!
//! - TTL freshness check on the latest persisted snapshot
//! - Single-flight revalidation so at most one refresh runs per process
//! - Bounded-concurrency background queue for refresh and audit-log work
//! - Synchronous fetch-and-persist on cold start
//!
//! # Example
//!
//! ```rust,ignore
//! use ratecache_core::{CacheConfig, RateCacheService};
//!
//! let (service, worker) =
//!     RateCacheService::start(fetcher, store, audit_log, CacheConfig::default());
//!
//! // Served from the store; triggers a background refresh when stale
//! let snapshot = service.get_current_rates_and_log_access("203.0.113.7").await?;
//!
//! worker.shutdown().await;
//! ```

pub mod ttl;
pub mod revalidation;
pub mod queue;
pub mod jobs;
pub mod service;
pub mod provider;
pub mod store;
pub mod metrics;

pub use ttl::is_expired;
pub use revalidation::RevalidationLock;
pub use queue::{
    BackgroundQueue, BackgroundTask, QueueConfig, QueueWorker, TaskHandler, TaskReceipt,
};
pub use jobs::RateTaskHandler;
pub use service::{CacheConfig, RateCacheService, RateRefresher};
pub use provider::{OpenExchangeRatesConfig, OpenExchangeRatesFetcher, RateFetcher, RetryPolicy};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateFetcher;
pub use store::{AccessLogReader, AccessLogWriter, MemoryStore, RateStore};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};

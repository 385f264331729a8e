//! Persistence traits consumed by the cache, and an in-memory backend.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use ratecache_common::{
    now, AccessLogEntry, AccessLogQuery, ExchangeRateSnapshot, LatestRates, SnapshotId,
    StorageError,
};

/// Persists and retrieves exchange-rate snapshots.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Most recent snapshot by `persisted_at`, if any.
    async fn find_latest(&self) -> Result<Option<ExchangeRateSnapshot>, StorageError>;

    /// Write `rates` as a new snapshot; the store assigns `id` and
    /// `persisted_at`.
    async fn save(&self, rates: LatestRates) -> Result<ExchangeRateSnapshot, StorageError>;
}

/// Appends to the access audit trail.
#[async_trait]
pub trait AccessLogWriter: Send + Sync {
    async fn append(&self, entry: AccessLogEntry) -> Result<(), StorageError>;
}

/// Reads the access audit trail, newest first.
#[async_trait]
pub trait AccessLogReader: Send + Sync {
    async fn query(&self, query: &AccessLogQuery) -> Result<Vec<AccessLogEntry>, StorageError>;
}

/// Process-local store backing all three traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<Vec<ExchangeRateSnapshot>>,
    access_log: RwLock<Vec<AccessLogEntry>>,
    next_id: AtomicI64,
    saves: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed snapshot, keeping its `persisted_at`.
    pub fn insert_snapshot(&self, snapshot: ExchangeRateSnapshot) {
        self.next_id.fetch_max(snapshot.id.value(), Ordering::SeqCst);
        self.snapshots.write().push(snapshot);
    }

    /// Insert an access record as-is.
    pub fn insert_access(&self, entry: AccessLogEntry) {
        self.access_log.write().push(entry);
    }

    /// Number of snapshots written through [`RateStore::save`].
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of all access log entries in insertion order.
    pub fn access_entries(&self) -> Vec<AccessLogEntry> {
        self.access_log.read().clone()
    }

    /// Make every read fail.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, operation: &'static str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::new(operation, "memory store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn find_latest(&self) -> Result<Option<ExchangeRateSnapshot>, StorageError> {
        self.check(&self.fail_reads, "find latest snapshot")?;

        Ok(self
            .snapshots
            .read()
            .iter()
            .max_by_key(|s| (s.persisted_at, s.id))
            .cloned())
    }

    async fn save(&self, rates: LatestRates) -> Result<ExchangeRateSnapshot, StorageError> {
        self.check(&self.fail_writes, "save snapshot")?;

        let id = SnapshotId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let snapshot = ExchangeRateSnapshot::from_latest(id, rates, now());
        self.snapshots.write().push(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);

        Ok(snapshot)
    }
}

#[async_trait]
impl AccessLogWriter for MemoryStore {
    async fn append(&self, entry: AccessLogEntry) -> Result<(), StorageError> {
        self.check(&self.fail_writes, "append access log")?;
        self.access_log.write().push(entry);
        Ok(())
    }
}

#[async_trait]
impl AccessLogReader for MemoryStore {
    async fn query(&self, query: &AccessLogQuery) -> Result<Vec<AccessLogEntry>, StorageError> {
        self.check(&self.fail_reads, "query access log")?;

        let (start, end) = query.range(now());
        let mut matching: Vec<AccessLogEntry> = self
            .access_log
            .read()
            .iter()
            .filter(|e| e.observed_at >= start && e.observed_at <= end)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));

        let skip = usize::try_from(query.skip()).unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(skip)
            .take(query.page_size() as usize)
            .collect())
    }
}

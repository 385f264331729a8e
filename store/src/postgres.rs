//! PostgreSQL-backed rate store and access log.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use ratecache_common::{
    AccessLogEntry, AccessLogQuery, ExchangeRateSnapshot, LatestRates, RateTable, SnapshotId,
    StorageError, Timestamp,
};
use ratecache_core::{AccessLogReader, AccessLogWriter, RateStore};

use crate::migrations;

/// Store over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::new("connect", e))?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bring the schema up to date.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        migrations::run_migrations(&self.pool).await
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn snapshot_from_row(row: &PgRow) -> Result<ExchangeRateSnapshot, sqlx::Error> {
    let Json(rates): Json<RateTable> = row.try_get("rates")?;
    Ok(ExchangeRateSnapshot {
        id: SnapshotId::new(row.try_get("id")?),
        base: row.try_get("base")?,
        rates,
        observed_at: row.try_get("rates_changed_at")?,
        persisted_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<AccessLogEntry, sqlx::Error> {
    let source_address: String = row.try_get("ip_address")?;
    let observed_at: Timestamp = row.try_get("accessed_at")?;
    Ok(AccessLogEntry::new(source_address, observed_at))
}

/// `LIMIT` and `OFFSET` values for a query.
fn page_bounds(query: &AccessLogQuery) -> (i64, i64) {
    let limit = i64::from(query.page_size());
    let offset = i64::try_from(query.skip()).unwrap_or(i64::MAX);
    (limit, offset)
}

#[async_trait]
impl RateStore for PgStore {
    #[instrument(skip(self))]
    async fn find_latest(&self) -> Result<Option<ExchangeRateSnapshot>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, base, rates, rates_changed_at, created_at
            FROM currency_rate
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::new("find latest snapshot", e))?;

        row.as_ref()
            .map(snapshot_from_row)
            .transpose()
            .map_err(|e| StorageError::new("find latest snapshot", e))
    }

    #[instrument(skip(self, rates), fields(base = %rates.base))]
    async fn save(&self, rates: LatestRates) -> Result<ExchangeRateSnapshot, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO currency_rate (base, rates, rates_changed_at)
            VALUES ($1, $2, $3)
            RETURNING id, base, rates, rates_changed_at, created_at
            "#,
        )
        .bind(&rates.base)
        .bind(Json(&rates.rates))
        .bind(rates.observed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::new("save snapshot", e))?;

        let snapshot =
            snapshot_from_row(&row).map_err(|e| StorageError::new("save snapshot", e))?;
        debug!(snapshot_id = %snapshot.id, "Snapshot persisted");
        Ok(snapshot)
    }
}

#[async_trait]
impl AccessLogWriter for PgStore {
    async fn append(&self, entry: AccessLogEntry) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO access_log (ip_address, accessed_at) VALUES ($1, $2)")
            .bind(&entry.source_address)
            .bind(entry.observed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::new("append access log", e))?;

        Ok(())
    }
}

#[async_trait]
impl AccessLogReader for PgStore {
    #[instrument(skip(self))]
    async fn query(&self, query: &AccessLogQuery) -> Result<Vec<AccessLogEntry>, StorageError> {
        let (start, end) = query.range(ratecache_common::now());
        let (limit, offset) = page_bounds(query);

        let rows = sqlx::query(
            r#"
            SELECT ip_address, accessed_at
            FROM access_log
            WHERE accessed_at >= $1 AND accessed_at <= $2
            ORDER BY accessed_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::new("query access log", e))?;

        rows.iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::new("query access log", e))
    }
}

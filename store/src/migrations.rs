//! Embedded schema migrations.
//!
//! Applied versions are tracked in `schema_migrations`; each pending
//! migration runs in its own transaction.

use sqlx::{Executor, PgPool, Row};
use tracing::{debug, info};

use ratecache_common::StorageError;

/// A single schema change.
#[derive(Debug)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub up_sql: &'static str,
}

/// Migrations in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_currency_rate_table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS currency_rate (
                id BIGSERIAL PRIMARY KEY,
                base TEXT NOT NULL,
                rates JSONB NOT NULL,
                rates_changed_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_currency_rate_created_at
                ON currency_rate (created_at DESC);
        "#,
    },
    Migration {
        version: 2,
        name: "create_access_log_table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS access_log (
                id BIGSERIAL PRIMARY KEY,
                ip_address TEXT NOT NULL,
                accessed_at TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_access_log_accessed_at
                ON access_log (accessed_at DESC);
        "#,
    },
];

/// Apply every migration newer than the recorded schema version.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    info!("Starting database migrations");

    create_migrations_table(pool).await?;

    let current_version = current_version(pool).await?;
    debug!(current_version, "Current schema version");

    let mut applied = 0;
    for migration in pending(MIGRATIONS, current_version) {
        info!(
            version = migration.version,
            name = migration.name,
            "Running migration"
        );
        apply(pool, migration).await?;
        applied += 1;
    }

    info!(applied, "Database migrations completed");
    Ok(())
}

/// Migrations with a version above `current_version`.
fn pending(migrations: &[Migration], current_version: i32) -> impl Iterator<Item = &Migration> {
    migrations
        .iter()
        .filter(move |m| m.version > current_version)
}

async fn create_migrations_table(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StorageError::new("create schema_migrations", e))?;

    Ok(())
}

async fn current_version(pool: &PgPool) -> Result<i32, StorageError> {
    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::new("read schema version", e))?;

    row.try_get("version")
        .map_err(|e| StorageError::new("read schema version", e))
}

async fn apply(pool: &PgPool, migration: &Migration) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::new("begin migration", e))?;

    // Unprepared so a migration may hold several statements.
    (&mut *tx)
        .execute(migration.up_sql)
        .await
        .map_err(|e| StorageError::new("apply migration", e))?;

    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::new("record migration", e))?;

    tx.commit()
        .await
        .map_err(|e| StorageError::new("commit migration", e))?;

    Ok(())
}

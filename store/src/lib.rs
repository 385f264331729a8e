//! RateCache Store
//!
//! PostgreSQL persistence for exchange-rate snapshots and the access log,
//! with embedded schema migrations.

pub mod migrations;
pub mod postgres;

pub use migrations::{run_migrations, Migration};
pub use postgres::PgStore;
pub use ratecache_core::MemoryStore;

//! Storage backend selection.

use std::sync::Arc;

use tracing::info;

use ratecache_common::StorageError;
use ratecache_core::{AccessLogReader, AccessLogWriter, MemoryStore, RateStore};
use ratecache_store::PgStore;

use crate::config::{StorageBackend, StorageConfig};

/// The store seen through each of its roles.
pub struct Storage {
    pub rates: Arc<dyn RateStore>,
    pub audit_writer: Arc<dyn AccessLogWriter>,
    pub audit_reader: Arc<dyn AccessLogReader>,
    postgres: Option<PgStore>,
}

impl Storage {
    /// Open the configured backend, running migrations for PostgreSQL.
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        match &config.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                Ok(Self::memory(Arc::new(MemoryStore::new())))
            }
            StorageBackend::Postgres { url } => {
                let store = PgStore::connect(url, config.max_connections).await?;
                store.migrate().await?;
                info!("DB: connected");

                let shared = Arc::new(store.clone());
                Ok(Self {
                    rates: shared.clone(),
                    audit_writer: shared.clone(),
                    audit_reader: shared,
                    postgres: Some(store),
                })
            }
        }
    }

    /// Wrap an in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            rates: store.clone(),
            audit_writer: store.clone(),
            audit_reader: store,
            postgres: None,
        }
    }

    /// Release database connections, if any.
    pub async fn close(&self) {
        if let Some(store) = &self.postgres {
            store.close().await;
        }
    }
}

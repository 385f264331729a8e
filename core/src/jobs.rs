//! Background job dispatch for rate refresh and access logging.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use ratecache_common::{now, AccessLogEntry, Result, UNKNOWN_SOURCE};

use crate::queue::{BackgroundTask, TaskHandler};
use crate::service::RateRefresher;
use crate::store::AccessLogWriter;

/// Routes queued tasks to the refresher and the audit log.
pub struct RateTaskHandler {
    refresher: Arc<RateRefresher>,
    audit_log: Arc<dyn AccessLogWriter>,
}

impl RateTaskHandler {
    /// Create a new handler.
    pub fn new(refresher: Arc<RateRefresher>, audit_log: Arc<dyn AccessLogWriter>) -> Self {
        Self {
            refresher,
            audit_log,
        }
    }
}

#[async_trait]
impl TaskHandler for RateTaskHandler {
    async fn handle(&self, task: BackgroundTask) -> Result<()> {
        match task {
            BackgroundTask::Refresh => {
                let snapshot = self.refresher.refresh_and_persist().await?;
                info!(snapshot_id = %snapshot.id, "Processed data synchronization");
            }
            BackgroundTask::LogAccess {
                source_address,
                observed_at,
            } => {
                let source_address = source_address.unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
                // An entry needs a time; fall back to when the task runs.
                let observed_at = observed_at.unwrap_or_else(now);

                let entry = AccessLogEntry::new(source_address, observed_at);
                let source = entry.source_address.clone();
                self.audit_log.append(entry).await?;
                info!(source_address = %source, "Processed access log");
            }
        }
        Ok(())
    }
}

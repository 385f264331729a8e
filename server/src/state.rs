//! Shared handler state.

use std::sync::Arc;

use ratecache_core::{AccessLogReader, RateCacheService};

/// State cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Rate cache.
    pub service: Arc<RateCacheService>,
    /// Read side of the access audit trail.
    pub access_log: Arc<dyn AccessLogReader>,
    /// Take the caller address from `X-Forwarded-For`.
    pub trust_proxy: bool,
}

impl AppState {
    /// Create new handler state.
    pub fn new(
        service: Arc<RateCacheService>,
        access_log: Arc<dyn AccessLogReader>,
        trust_proxy: bool,
    ) -> Self {
        Self {
            service,
            access_log,
            trust_proxy,
        }
    }
}

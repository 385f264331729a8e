//! Access audit trail types.

use serde::{Deserialize, Serialize};

use crate::time::{epoch, Timestamp};

/// Source address recorded when the caller's address cannot be determined.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Default page size for access log queries.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Largest page size an access log query may request.
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// One append-only audit record of a rate read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AccessLogEntry {
    /// Caller's network address, or [`UNKNOWN_SOURCE`].
    #[serde(rename = "ipAddress")]
    pub source_address: String,
    /// When the access happened.
    #[serde(rename = "accessedAt")]
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub observed_at: Timestamp,
}

impl AccessLogEntry {
    /// Create a new entry, substituting [`UNKNOWN_SOURCE`] for a blank address.
    pub fn new(source_address: impl Into<String>, observed_at: Timestamp) -> Self {
        let source_address = source_address.into();
        let source_address = if source_address.trim().is_empty() {
            UNKNOWN_SOURCE.to_string()
        } else {
            source_address
        };

        Self {
            source_address,
            observed_at,
        }
    }
}

/// Filter and pagination for reading the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogQuery {
    /// Inclusive lower bound; the Unix epoch when absent.
    pub start: Option<Timestamp>,
    /// Inclusive upper bound; the time of the query when absent.
    pub end: Option<Timestamp>,
    /// Requested page size.
    pub limit: u32,
    /// Page index (not a row offset).
    pub offset: u32,
}

impl Default for AccessLogQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl AccessLogQuery {
    /// Page size clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn page_size(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Number of rows to skip.
    pub fn skip(&self) -> u64 {
        u64::from(self.offset) * u64::from(self.page_size())
    }

    /// Resolve the date range against the current time.
    pub fn range(&self, now: Timestamp) -> (Timestamp, Timestamp) {
        (self.start.unwrap_or_else(epoch), self.end.unwrap_or(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;

    #[test]
    fn test_blank_source_becomes_unknown() {
        let entry = AccessLogEntry::new("  ", now());
        assert_eq!(entry.source_address, UNKNOWN_SOURCE);

        let entry = AccessLogEntry::new("10.0.0.1", now());
        assert_eq!(entry.source_address, "10.0.0.1");
    }

    #[test]
    fn test_entry_json_field_names() {
        let entry = AccessLogEntry::new("10.0.0.1", now());
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["ipAddress"], "10.0.0.1");
        assert!(json.get("accessedAt").is_some());
    }

    #[test]
    fn test_query_pagination() {
        let query = AccessLogQuery {
            limit: 5000,
            offset: 2,
            ..Default::default()
        };
        assert_eq!(query.page_size(), MAX_PAGE_LIMIT);
        assert_eq!(query.skip(), 2000);

        let query = AccessLogQuery {
            limit: 0,
            ..Default::default()
        };
        assert_eq!(query.page_size(), 1);
        assert_eq!(query.skip(), 0);
    }

    #[test]
    fn test_query_range_defaults() {
        let at = now();
        let (start, end) = AccessLogQuery::default().range(at);
        assert_eq!(start, epoch());
        assert_eq!(end, at);
    }
}

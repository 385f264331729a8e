//! TTL freshness check for persisted snapshots.

use chrono::Duration;
use ratecache_common::Timestamp;

/// Returns true iff `persisted_at + ttl_ms < now`.
///
/// A `ttl_ms` of zero treats every snapshot older than `now` as expired; a
/// `persisted_at` in the future (clock skew) is never expired.
pub fn is_expired(persisted_at: Timestamp, ttl_ms: u64, now: Timestamp) -> bool {
    let ttl = Duration::milliseconds(i64::try_from(ttl_ms).unwrap_or(i64::MAX));
    now.signed_duration_since(persisted_at) > ttl
}

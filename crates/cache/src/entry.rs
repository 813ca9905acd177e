//! Serialized cache entry format.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One serialized cache slot: the payload plus the freshness metadata that
/// bounds its staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    pub written_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub schema_version: String,
}

impl CacheEntry {
    pub fn new(data: Value, ttl: Duration, schema_version: &str) -> Self {
        Self {
            data,
            written_at: Utc::now(),
            ttl_ms: ttl.as_millis() as u64,
            schema_version: schema_version.to_string(),
        }
    }

    /// An entry is expired once its age strictly exceeds the TTL. Entries
    /// written in the future (clock skew) count as fresh.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.written_at).num_milliseconds() > self.ttl_ms as i64
    }

    pub fn matches_version(&self, version: &str) -> bool {
        self.schema_version == version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new(json!(1), Duration::from_millis(1000), "v1");
        let at_ttl = entry.written_at + chrono::Duration::milliseconds(1000);
        let past_ttl = entry.written_at + chrono::Duration::milliseconds(1001);
        assert!(!entry.is_expired(at_ttl));
        assert!(entry.is_expired(past_ttl));
    }

    #[test]
    fn future_written_at_counts_as_fresh() {
        let mut entry = CacheEntry::new(json!(1), Duration::from_millis(10), "v1");
        entry.written_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(!entry.is_expired(Utc::now()));
    }

    #[test]
    fn version_match() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(1), "v2");
        assert!(entry.matches_version("v2"));
        assert!(!entry.matches_version("v1"));
    }
}

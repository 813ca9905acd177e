//! Cross-context invalidation channel.
//!
//! The browser-era transport for this was a storage-event listener on one
//! well-known origin key. The essential contract is narrower: a best-effort,
//! at-least-once, self-expiring broadcast of invalidation records. This
//! module ships an in-process bridge over `tokio::sync::broadcast`; any
//! broker primitive honoring the same contract can replace it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use devflix_bus::events::CacheAction;

/// Receivers discard records older than this; the cache TTL remains the
/// correctness bound when records are missed entirely.
pub const RECORD_FRESHNESS_SECS: i64 = 10;

const CHANNEL_CAPACITY: usize = 256;

/// Short-lived invalidation record exchanged between contexts. Carries no
/// payload data: peers drop their copy and refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRecord {
    /// Logical cache key; `"*"` for a clear.
    pub key: String,
    pub action: CacheAction,
    /// Identity of the writing context; receivers skip their own records.
    pub origin: Uuid,
    pub sent_at: DateTime<Utc>,
}

impl BroadcastRecord {
    pub fn new(key: &str, action: CacheAction, origin: Uuid) -> Self {
        Self {
            key: key.to_string(),
            action,
            origin,
            sent_at: Utc::now(),
        }
    }

    /// Whether a receiver should still honor this record.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.sent_at) <= chrono::Duration::seconds(RECORD_FRESHNESS_SECS)
    }
}

/// Origin-wide broadcast bridge. Clones share one channel; hand a clone to
/// every cache belonging to the same origin.
#[derive(Clone)]
pub struct CoherenceChannel {
    sender: broadcast::Sender<BroadcastRecord>,
}

impl Default for CoherenceChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CoherenceChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Best-effort publish; an error only means "no receivers right now".
    pub fn publish(&self, record: BroadcastRecord) {
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastRecord> {
        self.sender.subscribe()
    }
}

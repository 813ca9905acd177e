//! The coherent cache itself.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use devflix_bus::events::{CacheAction, CacheChange};
use devflix_bus::{topics, NotificationBus, SubscribeOptions, Subscription};
use devflix_core::config::CacheSettings;

use crate::channel::{BroadcastRecord, CoherenceChannel};
use crate::entry::CacheEntry;
use crate::session::{SessionStore, SessionStoreError};

/// Listener key (and clear-record key) matching every cache key.
pub const ALL_KEYS: &str = "*";

/// Tuning for one cache context.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace prefix for storage keys.
    pub prefix: String,
    /// Running schema version; entries from other versions read as misses.
    pub schema_version: String,
    /// TTL applied when `set` is called without an explicit one.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "devflix-cache".to_string(),
            schema_version: "v1".to_string(),
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            prefix: settings.prefix.clone(),
            schema_version: settings.schema_version.clone(),
            default_ttl: Duration::from_secs(settings.default_ttl_secs),
        }
    }
}

/// Diagnostic snapshot returned by [`CoherentCache::health`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub approx_size_bytes: usize,
    pub schema_version: String,
}

struct CacheInner {
    config: CacheConfig,
    store: Arc<dyn SessionStore>,
    channel: CoherenceChannel,
    bus: NotificationBus,
    origin: Uuid,
}

/// Per-context read-through cache kept loosely coherent with its peers via
/// broadcast invalidation. Cheaply cloneable; clones share one context.
#[derive(Clone)]
pub struct CoherentCache {
    inner: Arc<CacheInner>,
}

impl CoherentCache {
    /// Build a cache and start its broadcast listener. The listener holds
    /// only a weak handle and exits once every cache clone is gone.
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn SessionStore>,
        channel: CoherenceChannel,
        bus: NotificationBus,
    ) -> Self {
        let inner = Arc::new(CacheInner {
            config,
            store,
            channel,
            bus,
            origin: Uuid::new_v4(),
        });
        spawn_listener(&inner);
        Self { inner }
    }

    /// Serialize `data` under `key` with the default TTL, notify local
    /// listeners, and broadcast the change to peer contexts.
    pub fn set(&self, key: &str, data: Value) {
        self.inner.set(key, data, self.inner.config.default_ttl);
    }

    pub fn set_with_ttl(&self, key: &str, data: Value, ttl: Duration) {
        self.inner.set(key, data, ttl);
    }

    /// `None` on absent, schema-version mismatch, or TTL expiry; the two
    /// latter cases evict the stale entry before returning.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }

    /// Delete `key`, notify local listeners, broadcast so peers drop theirs.
    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// [`invalidate`](Self::invalidate) every stored key whose logical name
    /// matches `pattern`; returns how many matched.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        self.inner.invalidate_pattern(pattern)
    }

    /// Remove every key under this cache's prefix, regardless of entry
    /// version. Hard reset.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Deliver `callback` on every change to `key` (or any key for
    /// [`ALL_KEYS`]), local or observed from a peer. Implemented over the
    /// notification bus; unsubscribe via the returned token.
    pub fn add_listener<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&CacheChange) + Send + Sync + 'static,
    {
        let filter = key.to_string();
        self.inner.bus.subscribe(
            topics::CACHE_CHANGED,
            SubscribeOptions::default(),
            move |notification| {
                let change: CacheChange = serde_json::from_value(notification.payload.clone())
                    .map_err(|e| anyhow::anyhow!("undecodable cache change payload: {e}"))?;
                if filter == ALL_KEYS || change.key == filter || change.key == ALL_KEYS {
                    callback(&change);
                }
                Ok(())
            },
        )
    }

    /// Handle a record observed from a peer context: drop the local copy
    /// and notify listeners. Stale records are ignored. The broadcast
    /// listener task funnels through here; tests may call it directly to
    /// simulate a peer.
    pub fn apply_broadcast(&self, record: &BroadcastRecord) {
        self.inner.apply_record(record);
    }

    /// Diagnostic snapshot plus a best-effort eviction of expired entries.
    pub fn health(&self) -> CacheHealth {
        self.inner.health()
    }
}

fn spawn_listener(inner: &Arc<CacheInner>) {
    let weak: Weak<CacheInner> = Arc::downgrade(inner);
    let mut receiver = inner.channel.subscribe();
    tokio::spawn(async move {
        loop {
            let record = match receiver.recv().await {
                Ok(record) => record,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "cache broadcast listener lagged, records dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else { break };
            if record.origin == inner.origin {
                continue;
            }
            inner.apply_record(&record);
        }
    });
}

impl CacheInner {
    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.prefix, key)
    }

    fn logical_key<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key
            .strip_prefix(self.config.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }

    fn prefixed_keys(&self) -> Vec<String> {
        let marker = format!("{}:", self.config.prefix);
        self.store
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(&marker))
            .collect()
    }

    fn set(&self, key: &str, data: Value, ttl: Duration) {
        let entry = CacheEntry::new(data.clone(), ttl, &self.config.schema_version);
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(key, error = %error, "failed to serialize cache entry");
                return;
            }
        };
        let storage_key = self.storage_key(key);
        match self.store.set(&storage_key, &raw) {
            Ok(()) => {}
            Err(SessionStoreError::QuotaExceeded { .. }) => {
                let evicted = self.evict_sweep();
                debug!(key, evicted, "quota hit, retrying set after eviction sweep");
                if let Err(error) = self.store.set(&storage_key, &raw) {
                    warn!(key, error = %error, "cache set dropped, quota still exceeded");
                    return;
                }
            }
            Err(error) => {
                warn!(key, error = %error, "cache set dropped");
                return;
            }
        }
        self.notify(key, CacheAction::Set, Some(data));
        self.broadcast(key, CacheAction::Set);
    }

    fn get(&self, key: &str) -> Option<Value> {
        let storage_key = self.storage_key(key);
        let raw = self.store.get(&storage_key)?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(key, error = %error, "undecodable cache entry evicted");
                self.store.remove(&storage_key);
                return None;
            }
        };
        if !entry.matches_version(&self.config.schema_version) {
            debug!(key, entry_version = %entry.schema_version, "cache schema mismatch, entry evicted");
            self.store.remove(&storage_key);
            return None;
        }
        if entry.is_expired(Utc::now()) {
            debug!(key, "expired cache entry evicted");
            self.store.remove(&storage_key);
            return None;
        }
        Some(entry.data)
    }

    fn invalidate(&self, key: &str) {
        self.store.remove(&self.storage_key(key));
        self.notify(key, CacheAction::Invalidate, None);
        self.broadcast(key, CacheAction::Invalidate);
    }

    fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let mut matched = 0;
        for storage_key in self.prefixed_keys() {
            let Some(logical) = self.logical_key(&storage_key) else {
                continue;
            };
            if pattern.is_match(logical) {
                let logical = logical.to_string();
                self.store.remove(&storage_key);
                self.notify(&logical, CacheAction::Invalidate, None);
                self.broadcast(&logical, CacheAction::Invalidate);
                matched += 1;
            }
        }
        matched
    }

    fn clear(&self) {
        for storage_key in self.prefixed_keys() {
            self.store.remove(&storage_key);
        }
        self.notify(ALL_KEYS, CacheAction::Clear, None);
        self.broadcast(ALL_KEYS, CacheAction::Clear);
    }

    fn apply_record(&self, record: &BroadcastRecord) {
        if !record.is_fresh(Utc::now()) {
            debug!(key = %record.key, "ignoring stale broadcast record");
            return;
        }
        match record.action {
            CacheAction::Clear => {
                for storage_key in self.prefixed_keys() {
                    self.store.remove(&storage_key);
                }
            }
            CacheAction::Set | CacheAction::Invalidate => {
                self.store.remove(&self.storage_key(&record.key));
            }
        }
        debug!(key = %record.key, action = %record.action, "peer cache change applied");
        self.notify(&record.key, record.action, None);
    }

    /// Drop expired, foreign-version, and undecodable entries. Returns how
    /// many were evicted.
    fn evict_sweep(&self) -> usize {
        let now = Utc::now();
        let mut evicted = 0;
        for storage_key in self.prefixed_keys() {
            let Some(raw) = self.store.get(&storage_key) else {
                continue;
            };
            let stale = match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    entry.is_expired(now) || !entry.matches_version(&self.config.schema_version)
                }
                Err(_) => true,
            };
            if stale {
                self.store.remove(&storage_key);
                evicted += 1;
            }
        }
        evicted
    }

    fn health(&self) -> CacheHealth {
        let now = Utc::now();
        let mut health = CacheHealth {
            total: 0,
            valid: 0,
            expired: 0,
            approx_size_bytes: 0,
            schema_version: self.config.schema_version.clone(),
        };
        for storage_key in self.prefixed_keys() {
            let Some(raw) = self.store.get(&storage_key) else {
                continue;
            };
            health.total += 1;
            health.approx_size_bytes += storage_key.len() + raw.len();
            let stale = match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    entry.is_expired(now) || !entry.matches_version(&self.config.schema_version)
                }
                Err(_) => true,
            };
            if stale {
                health.expired += 1;
                self.store.remove(&storage_key);
            } else {
                health.valid += 1;
            }
        }
        health
    }

    fn notify(&self, key: &str, action: CacheAction, data: Option<Value>) {
        let change = CacheChange {
            key: key.to_string(),
            action,
            data,
        };
        match serde_json::to_value(&change) {
            Ok(payload) => self.bus.publish(topics::CACHE_CHANGED, payload),
            Err(error) => warn!(error = %error, "failed to encode cache change"),
        }
    }

    fn broadcast(&self, key: &str, action: CacheAction) {
        self.channel
            .publish(BroadcastRecord::new(key, action, self.origin));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RECORD_FRESHNESS_SECS;
    use crate::session::MemorySessionStore;
    use serde_json::json;
    use std::sync::Mutex;

    struct Context {
        cache: CoherentCache,
        store: Arc<MemorySessionStore>,
        bus: NotificationBus,
    }

    fn context(channel: &CoherenceChannel) -> Context {
        let store = Arc::new(MemorySessionStore::new());
        let bus = NotificationBus::new();
        let cache = CoherentCache::new(
            CacheConfig {
                prefix: "test-cache".to_string(),
                schema_version: "v1".to_string(),
                default_ttl: Duration::from_secs(60),
            },
            store.clone(),
            channel.clone(),
            bus.clone(),
        );
        Context { cache, store, bus }
    }

    fn changes(bus_cache: &CoherentCache) -> (Arc<Mutex<Vec<CacheChange>>>, Subscription) {
        let seen: Arc<Mutex<Vec<CacheChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let token = bus_cache.add_listener(ALL_KEYS, move |change| {
            sink.lock().unwrap().push(change.clone());
        });
        (seen, token)
    }

    #[tokio::test]
    async fn get_hits_within_ttl() {
        let ctx = context(&CoherenceChannel::new());
        ctx.cache
            .set_with_ttl("page", json!({"n": 1}), Duration::from_millis(1000));
        assert_eq!(ctx.cache.get("page"), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn get_past_ttl_misses_and_evicts() {
        let ctx = context(&CoherenceChannel::new());
        ctx.cache
            .set_with_ttl("page", json!(1), Duration::from_millis(25));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(ctx.cache.get("page"), None);
        assert_eq!(
            ctx.store.get("test-cache:page"),
            None,
            "expired entry must be removed from storage"
        );
    }

    #[tokio::test]
    async fn schema_version_mismatch_reads_as_miss_and_evicts() {
        let ctx = context(&CoherenceChannel::new());
        let foreign = CacheEntry {
            data: json!(1),
            written_at: Utc::now(),
            ttl_ms: 60_000,
            schema_version: "v0".to_string(),
        };
        ctx.store
            .set(
                "test-cache:page",
                &serde_json::to_string(&foreign).expect("encode"),
            )
            .expect("seed");

        assert_eq!(ctx.cache.get("page"), None);
        assert_eq!(ctx.store.get("test-cache:page"), None);
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_miss_and_evicts() {
        let ctx = context(&CoherenceChannel::new());
        ctx.store.set("test-cache:page", "not json").expect("seed");
        assert_eq!(ctx.cache.get("page"), None);
        assert_eq!(ctx.store.get("test-cache:page"), None);
    }

    #[tokio::test]
    async fn invalidate_notifies_listeners() {
        let ctx = context(&CoherenceChannel::new());
        let (seen, _token) = changes(&ctx.cache);

        ctx.cache.set("page", json!(1));
        ctx.cache.invalidate("page");
        assert_eq!(ctx.cache.get("page"), None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].action, CacheAction::Set);
        assert_eq!(seen[0].data, Some(json!(1)));
        assert_eq!(seen[1].action, CacheAction::Invalidate);
        assert_eq!(seen[1].data, None);
    }

    #[tokio::test]
    async fn keyed_listener_sees_only_its_key_and_clears() {
        let ctx = context(&CoherenceChannel::new());
        let seen: Arc<Mutex<Vec<CacheChange>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ctx.cache.add_listener("page", move |change| {
            sink.lock().unwrap().push(change.clone());
        });

        ctx.cache.set("page", json!(1));
        ctx.cache.set("other", json!(2));
        ctx.cache.clear();

        let seen = seen.lock().unwrap();
        let actions: Vec<CacheAction> = seen.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![CacheAction::Set, CacheAction::Clear]);
    }

    #[tokio::test]
    async fn invalidate_pattern_matches_logical_keys() {
        let ctx = context(&CoherenceChannel::new());
        ctx.cache.set("devflix-X", json!(1));
        ctx.cache.set("devflix-X/materials", json!(2));
        ctx.cache.set("devflix-Y", json!(3));

        let pattern = Regex::new("^devflix-X").expect("pattern");
        assert_eq!(ctx.cache.invalidate_pattern(&pattern), 2);

        assert_eq!(ctx.cache.get("devflix-X"), None);
        assert_eq!(ctx.cache.get("devflix-X/materials"), None);
        assert_eq!(ctx.cache.get("devflix-Y"), Some(json!(3)));
    }

    #[tokio::test]
    async fn clear_drops_only_prefixed_keys() {
        let ctx = context(&CoherenceChannel::new());
        ctx.cache.set("page", json!(1));
        ctx.store
            .set("unrelated", "keep me")
            .expect("seed foreign key");

        ctx.cache.clear();
        assert_eq!(ctx.cache.get("page"), None);
        assert_eq!(ctx.store.get("unrelated").as_deref(), Some("keep me"));
    }

    #[tokio::test]
    async fn health_counts_and_evicts_expired() {
        let ctx = context(&CoherenceChannel::new());
        ctx.cache.set("fresh", json!(1));
        ctx.cache
            .set_with_ttl("stale", json!(2), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;

        let health = ctx.cache.health();
        assert_eq!(health.total, 2);
        assert_eq!(health.valid, 1);
        assert_eq!(health.expired, 1);
        assert!(health.approx_size_bytes > 0);
        assert_eq!(health.schema_version, "v1");

        let again = ctx.cache.health();
        assert_eq!(again.total, 1, "expired entry evicted by the first pass");
    }

    #[tokio::test]
    async fn quota_exceeded_sweeps_and_retries() {
        let store = Arc::new(MemorySessionStore::with_quota(400));
        let bus = NotificationBus::new();
        let cache = CoherentCache::new(
            CacheConfig {
                prefix: "q".to_string(),
                schema_version: "v1".to_string(),
                default_ttl: Duration::from_secs(60),
            },
            store.clone(),
            CoherenceChannel::new(),
            bus,
        );

        // An already-expired entry occupies most of the quota.
        cache.set_with_ttl("old", json!("x".repeat(120)), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.set("new", json!("y".repeat(120)));
        assert_eq!(cache.get("new"), Some(json!("y".repeat(120))));
        assert_eq!(cache.get("old"), None, "expired entry swept to make room");
    }

    #[tokio::test]
    async fn peer_record_drops_local_copy_without_rebroadcast() {
        let channel = CoherenceChannel::new();
        let b = context(&channel);
        b.cache.set("k", json!(1));
        let (seen, _token) = changes(&b.cache);

        // Direct injection of a peer's record, as if A had invalidated.
        let record = BroadcastRecord::new("k", CacheAction::Invalidate, Uuid::new_v4());
        b.cache.apply_broadcast(&record);

        assert_eq!(b.cache.get("k"), None);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action, CacheAction::Invalidate);
        assert_eq!(seen[0].data, None, "peer changes never carry data");
    }

    #[tokio::test]
    async fn stale_peer_record_is_ignored() {
        let channel = CoherenceChannel::new();
        let b = context(&channel);
        b.cache.set("k", json!(1));

        let mut record = BroadcastRecord::new("k", CacheAction::Invalidate, Uuid::new_v4());
        record.sent_at = Utc::now() - chrono::Duration::seconds(RECORD_FRESHNESS_SECS + 5);
        b.cache.apply_broadcast(&record);

        assert_eq!(b.cache.get("k"), Some(json!(1)));
    }

    #[tokio::test]
    async fn cross_context_invalidation_end_to_end() {
        let channel = CoherenceChannel::new();
        let a = context(&channel);
        let b = context(&channel);

        b.cache.set("shared", json!("b copy"));
        a.cache.invalidate("shared");

        // Listener tasks need a moment to deliver.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(b.cache.get("shared"), None, "peer copy dropped");
    }

    #[tokio::test]
    async fn own_records_do_not_self_evict() {
        let channel = CoherenceChannel::new();
        let a = context(&channel);

        a.cache.set("mine", json!(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            a.cache.get("mine"),
            Some(json!(1)),
            "a context must ignore its own broadcast records"
        );
    }

    #[tokio::test]
    async fn peer_clear_drops_everything() {
        let channel = CoherenceChannel::new();
        let b = context(&channel);
        b.cache.set("one", json!(1));
        b.cache.set("two", json!(2));

        let record = BroadcastRecord::new(ALL_KEYS, CacheAction::Clear, Uuid::new_v4());
        b.cache.apply_broadcast(&record);

        assert_eq!(b.cache.get("one"), None);
        assert_eq!(b.cache.get("two"), None);
    }

    #[tokio::test]
    async fn remote_changes_reach_listeners_via_bus() {
        let channel = CoherenceChannel::new();
        let a = context(&channel);
        let b = context(&channel);
        let (seen_b, _token) = changes(&b.cache);

        a.cache.set("k", json!(1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = seen_b.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action, CacheAction::Set);
        assert_eq!(seen[0].data, None);
        drop(seen);

        // And b's own bus never saw a's local notification directly.
        assert_eq!(b.bus.subscriber_count(topics::CACHE_CHANGED), 1);
    }
}

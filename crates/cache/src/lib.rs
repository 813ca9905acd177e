//! Coherent cache: per-context TTL caching with cross-context invalidation.
//!
//! Each execution context owns its own cache over a [`SessionStore`]; the
//! caches of one origin stay loosely synchronized by broadcasting "this key
//! changed, drop yours" records over a shared [`CoherenceChannel`]. A peer
//! never trusts a broadcast payload: it drops its copy and refetches, so
//! correctness comes from invalidation plus TTL.

mod cache;
mod channel;
mod entry;
mod session;

pub use cache::{CacheConfig, CacheHealth, CoherentCache, ALL_KEYS};
pub use channel::{BroadcastRecord, CoherenceChannel, RECORD_FRESHNESS_SECS};
pub use entry::CacheEntry;
pub use session::{MemorySessionStore, SessionStore, SessionStoreError};

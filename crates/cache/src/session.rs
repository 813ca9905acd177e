//! Session-scoped string storage behind the coherent cache.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("storage quota exceeded: {attempted} bytes against a quota of {quota}")]
    QuotaExceeded { attempted: usize, quota: usize },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// String-keyed, string-valued synchronous storage with session lifetime.
/// The deliberately narrow contract keeps cache logic independent of where
/// a context actually keeps its bytes.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError>;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// In-memory [`SessionStore`] with an optional byte quota.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes once keys plus values would exceed
    /// `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        let mut entries = self.entries.lock().expect("session store lock poisoned");
        if let Some(quota) = self.quota_bytes {
            // Replacing a key only counts the new value against the quota.
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let attempted = used + key.len() + value.len();
            if attempted > quota {
                return Err(SessionStoreError::QuotaExceeded { attempted, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_rejects_oversized_writes() {
        let store = MemorySessionStore::with_quota(10);
        store.set("ab", "cd").expect("4 bytes fit");
        let err = store.set("efgh", "ijklmn").expect_err("14 bytes total");
        assert!(matches!(err, SessionStoreError::QuotaExceeded { .. }));
        assert_eq!(store.used_bytes(), 4);
    }

    #[test]
    fn replacing_a_key_counts_only_the_new_value() {
        let store = MemorySessionStore::with_quota(10);
        store.set("k", "12345678").expect("9 bytes");
        store.set("k", "abcdefghi").expect("replacement stays within quota");
        assert_eq!(store.get("k").as_deref(), Some("abcdefghi"));
    }

    #[test]
    fn remove_and_keys_round_trip() {
        let store = MemorySessionStore::new();
        store.set("a", "1").expect("set");
        store.set("b", "2").expect("set");
        store.remove("a");
        assert_eq!(store.get("a"), None);
        assert_eq!(store.keys(), vec!["b".to_string()]);
    }
}

//! Typed payloads for the notification topics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use devflix_core::EntityKind;

/// Payload of [`MATERIALS_SYNCED`](crate::topics::MATERIALS_SYNCED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialsSynced {
    /// Instance path whose cache partition was refreshed.
    pub path: String,
    /// Entities that transitioned to active in this pass, repairs included.
    pub items_activated: u32,
}

/// Payload of [`SCHEDULE_CHECK_COMPLETED`](crate::topics::SCHEDULE_CHECK_COMPLETED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleCheckCompleted {
    pub has_changes: bool,
    pub items_activated: u32,
    /// Union of entity kinds activated in this pass.
    pub types: Vec<EntityKind>,
}

/// Action discriminator carried by cache-change notifications and the
/// cross-context broadcast records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheAction {
    Set,
    Invalidate,
    Clear,
}

impl std::fmt::Display for CacheAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheAction::Set => write!(f, "set"),
            CacheAction::Invalidate => write!(f, "invalidate"),
            CacheAction::Clear => write!(f, "clear"),
        }
    }
}

/// Payload of [`CACHE_CHANGED`](crate::topics::CACHE_CHANGED).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheChange {
    /// Logical (unprefixed) cache key; `"*"` for a clear.
    pub key: String,
    pub action: CacheAction,
    /// New value on local sets; `None` on invalidations and peer changes.
    pub data: Option<Value>,
}

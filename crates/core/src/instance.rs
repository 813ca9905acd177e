//! The aggregate root the reconciler reads and writes.

use serde::{Deserialize, Serialize};

use crate::entity::{Banner, HeaderLink, Material};

/// Prefix for instance-scoped cache partition keys.
pub const CACHE_KEY_PREFIX: &str = "devflix";

/// One deliverable site/course instance. Owned by the persistent store; the
/// reconciler reads whole instances and writes whole instances back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    /// Routing path, also the cache partition discriminator.
    pub path: String,
    #[serde(default)]
    pub banner: Option<Banner>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub header_links: Vec<HeaderLink>,
}

impl Instance {
    /// Cache key under which this instance's snapshot is stored.
    pub fn partition_key(&self) -> String {
        format!("{CACHE_KEY_PREFIX}-{}", self.path)
    }
}

/// Whole-field update written back after reconciliation. `None` leaves the
/// field untouched; `Some` replaces it entirely. The store has last-write-
/// wins document semantics, so there is no sub-field patching below this
/// granularity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceUpdate {
    pub banner: Option<Banner>,
    pub materials: Option<Vec<Material>>,
    pub header_links: Option<Vec<HeaderLink>>,
}

impl InstanceUpdate {
    pub fn is_empty(&self) -> bool {
        self.banner.is_none() && self.materials.is_none() && self.header_links.is_none()
    }

    /// Apply the staged fields onto an instance, replacing whole fields.
    pub fn apply_to(&self, instance: &mut Instance) {
        if let Some(banner) = &self.banner {
            instance.banner = Some(banner.clone());
        }
        if let Some(materials) = &self.materials {
            instance.materials = materials.clone();
        }
        if let Some(links) = &self.header_links {
            instance.header_links = links.clone();
        }
    }
}

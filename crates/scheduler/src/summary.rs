//! Result types returned by a reconciliation pass.

use chrono::{DateTime, Utc};
use serde::Serialize;

use devflix_core::EntityKind;

/// Activation tally per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivationCounts {
    pub banners: u32,
    pub materials: u32,
    pub header_links: u32,
}

impl ActivationCounts {
    pub fn record(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Banner => self.banners += 1,
            EntityKind::Material => self.materials += 1,
            EntityKind::HeaderLink => self.header_links += 1,
        }
    }

    pub fn merge(&mut self, other: &ActivationCounts) {
        self.banners += other.banners;
        self.materials += other.materials;
        self.header_links += other.header_links;
    }

    pub fn total(&self) -> u32 {
        self.banners + self.materials + self.header_links
    }

    /// Kinds with at least one activation, in declaration order.
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::new();
        if self.banners > 0 {
            kinds.push(EntityKind::Banner);
        }
        if self.materials > 0 {
            kinds.push(EntityKind::Material);
        }
        if self.header_links > 0 {
            kinds.push(EntityKind::HeaderLink);
        }
        kinds
    }
}

/// One instance whose update call failed during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceError {
    pub instance_id: String,
    pub error: String,
}

/// Outcome of one full fetch-evaluate-write-notify cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    /// The "now" the eligibility predicate was evaluated against.
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub activated: ActivationCounts,
    /// Instances whose update write succeeded.
    pub instances_updated: u32,
    pub errors: Vec<InstanceError>,
}

impl PassSummary {
    pub fn has_changes(&self) -> bool {
        self.instances_updated > 0
    }
}

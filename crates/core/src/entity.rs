//! Schedulable entities and the activation eligibility rule.
//!
//! Every entity that can carry a "become active at time T" instruction
//! implements [`Schedulable`]. The eligibility predicate lives on the trait
//! so it is written exactly once; each variant only supplies its field
//! mapping and its active-form transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Banner,
    Material,
    HeaderLink,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Banner => write!(f, "Banner"),
            EntityKind::Material => write!(f, "Material"),
            EntityKind::HeaderLink => write!(f, "HeaderLink"),
        }
    }
}

// ── Entity variants ──────────────────────────────────────────────────

/// Promotional banner shown across an instance's pages. One per instance;
/// carries no activation marker, so its activation is not race-witnessed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
    #[serde(default)]
    pub enabled: bool,
    /// When set, the banner flips to enabled once this time elapses.
    #[serde(default, with = "crate::time::lenient_timestamp")]
    pub scheduled_activation: Option<DateTime<Utc>>,
}

/// Gated course material. `locked = true` hides the content; `unlocked_at`
/// is the permanent witness that an unlock already happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub locked: bool,
    /// Admin-authored unlock time; unparseable values decode as `None`.
    #[serde(default, with = "crate::time::lenient_timestamp")]
    pub scheduled_unlock: Option<DateTime<Utc>>,
    /// Stamped by the reconciler on unlock; never cleared.
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
}

/// Navigation link that appears once its visibility time elapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderLink {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub visible: bool,
    #[serde(default, with = "crate::time::lenient_timestamp")]
    pub scheduled_visibility: Option<DateTime<Utc>>,
    /// Stamped by the reconciler when the link becomes visible; never cleared.
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

// ── Shared activation contract ───────────────────────────────────────

/// Common contract over every schedulable entity.
///
/// Eligibility is a pure function of four facts: currently inactive, a
/// scheduled time exists, that time has elapsed, and no activation marker is
/// present. The marker is terminal: once set, the predicate never re-examines
/// the scheduled time, which is what makes concurrent reconcilers converge
/// instead of flapping an entity back to inactive.
pub trait Schedulable {
    fn kind(&self) -> EntityKind;

    /// Whether the entity is already in its active state.
    fn is_active(&self) -> bool;

    /// Pending activation time, if any is scheduled.
    fn scheduled_at(&self) -> Option<DateTime<Utc>>;

    /// Permanent witness that activation already happened. Variants without
    /// a marker field report `None`.
    fn activated_marker(&self) -> Option<DateTime<Utc>>;

    /// Flip to the active form: set the active flag, clear the schedule,
    /// stamp the marker where the variant has one.
    fn activate(&mut self, now: DateTime<Utc>);

    fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_active()
            && self.activated_marker().is_none()
            && self.scheduled_at().is_some_and(|at| at <= now)
    }
}

impl Schedulable for Banner {
    fn kind(&self) -> EntityKind {
        EntityKind::Banner
    }

    fn is_active(&self) -> bool {
        self.enabled
    }

    fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_activation
    }

    fn activated_marker(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn activate(&mut self, _now: DateTime<Utc>) {
        self.enabled = true;
        self.scheduled_activation = None;
    }
}

impl Schedulable for Material {
    fn kind(&self) -> EntityKind {
        EntityKind::Material
    }

    fn is_active(&self) -> bool {
        !self.locked
    }

    fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_unlock
    }

    fn activated_marker(&self) -> Option<DateTime<Utc>> {
        self.unlocked_at
    }

    fn activate(&mut self, now: DateTime<Utc>) {
        self.locked = false;
        self.scheduled_unlock = None;
        self.unlocked_at = Some(now);
    }
}

impl Schedulable for HeaderLink {
    fn kind(&self) -> EntityKind {
        EntityKind::HeaderLink
    }

    fn is_active(&self) -> bool {
        self.visible
    }

    fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_visibility
    }

    fn activated_marker(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    fn activate(&mut self, now: DateTime<Utc>) {
        self.visible = true;
        self.scheduled_visibility = None;
        self.activated_at = Some(now);
    }
}

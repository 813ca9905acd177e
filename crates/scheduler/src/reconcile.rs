//! Per-instance activation staging.
//!
//! This is the pure half of the scheduler: given an instance and a point in
//! time, decide what changes. No store access, no clocks, no notifications,
//! which keeps the activation rules testable in isolation.

use chrono::{DateTime, Utc};
use tracing::debug;

use devflix_core::{Instance, InstanceUpdate, Material, Schedulable};

use crate::summary::ActivationCounts;

/// Changes staged for one instance, to be written back in a single update.
#[derive(Debug, Clone)]
pub struct StagedInstance {
    pub update: InstanceUpdate,
    pub counts: ActivationCounts,
}

/// Evaluate every schedulable entity of `instance` against `now` and stage
/// the due transitions. Returns `None` when nothing changed, so callers skip
/// the write entirely.
///
/// Staged fields replace the whole collection they came from; untouched
/// sibling entities are carried through unchanged inside it.
pub fn reconcile_instance(instance: &Instance, now: DateTime<Utc>) -> Option<StagedInstance> {
    let mut update = InstanceUpdate::default();
    let mut counts = ActivationCounts::default();

    if let Some(banner) = &instance.banner {
        if banner.is_eligible(now) {
            let mut staged = banner.clone();
            staged.activate(now);
            counts.record(staged.kind());
            update.banner = Some(staged);
        }
    }

    let mut materials = instance.materials.clone();
    let mut materials_changed = false;
    for material in &mut materials {
        if repair_partial_unlock(material) {
            counts.record(material.kind());
            materials_changed = true;
        } else if material.is_eligible(now) {
            material.activate(now);
            counts.record(material.kind());
            materials_changed = true;
        }
    }
    if materials_changed {
        update.materials = Some(materials);
    }

    let mut links = instance.header_links.clone();
    let mut links_changed = false;
    for link in &mut links {
        if link.is_eligible(now) {
            link.activate(now);
            counts.record(link.kind());
            links_changed = true;
        }
    }
    if links_changed {
        update.header_links = Some(links);
    }

    if update.is_empty() {
        None
    } else {
        Some(StagedInstance { update, counts })
    }
}

/// A material carrying an unlock marker but still observed locked is the
/// footprint of a partial write from an earlier pass. Restore the invariant
/// directly, without re-evaluating the time predicate.
fn repair_partial_unlock(material: &mut Material) -> bool {
    if material.locked && material.unlocked_at.is_some() {
        debug!(title = %material.title, "repairing partially written unlock");
        material.locked = false;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflix_core::{Banner, HeaderLink};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().expect("test timestamp")
    }

    fn material(title: &str, locked: bool, scheduled: Option<&str>, unlocked: Option<&str>) -> Material {
        Material {
            title: title.to_string(),
            locked,
            scheduled_unlock: scheduled.map(at),
            unlocked_at: unlocked.map(at),
        }
    }

    fn instance(
        banner: Option<Banner>,
        materials: Vec<Material>,
        header_links: Vec<HeaderLink>,
    ) -> Instance {
        Instance {
            id: "inst-1".to_string(),
            path: "X".to_string(),
            banner,
            materials,
            header_links,
        }
    }

    #[test]
    fn stages_due_material_unlock() {
        let now = at("2024-01-01T00:00:01Z");
        let inst = instance(
            None,
            vec![material("intro", true, Some("2024-01-01T00:00:00Z"), None)],
            Vec::new(),
        );

        let staged = reconcile_instance(&inst, now).expect("material is due");
        assert_eq!(staged.counts.materials, 1);
        assert_eq!(staged.counts.total(), 1);

        let materials = staged.update.materials.expect("materials staged");
        assert!(!materials[0].locked);
        assert_eq!(materials[0].scheduled_unlock, None);
        assert_eq!(materials[0].unlocked_at, Some(now));
        assert_eq!(staged.update.banner, None, "banner not staged");
    }

    #[test]
    fn nothing_staged_before_schedule() {
        let now = at("2023-12-31T23:59:59Z");
        let inst = instance(
            Some(Banner {
                enabled: false,
                scheduled_activation: Some(at("2024-01-01T00:00:00Z")),
            }),
            vec![material("intro", true, Some("2024-01-01T00:00:00Z"), None)],
            Vec::new(),
        );
        assert!(reconcile_instance(&inst, now).is_none());
    }

    #[test]
    fn marker_blocks_restaging() {
        let now = at("2024-06-01T00:00:00Z");
        let inst = instance(
            None,
            vec![material(
                "intro",
                false,
                Some("2024-01-01T00:00:00Z"),
                Some("2024-01-01T00:00:01Z"),
            )],
            Vec::new(),
        );
        assert!(reconcile_instance(&inst, now).is_none());
    }

    #[test]
    fn repairs_locked_material_with_marker() {
        // Marker set but still locked: a previous writer got half way.
        let now = at("2024-06-01T00:00:00Z");
        let inst = instance(
            None,
            vec![material("intro", true, None, Some("2024-01-01T00:00:01Z"))],
            Vec::new(),
        );

        let staged = reconcile_instance(&inst, now).expect("repair is staged");
        assert_eq!(staged.counts.materials, 1);

        let materials = staged.update.materials.expect("materials staged");
        assert!(!materials[0].locked);
        assert_eq!(
            materials[0].unlocked_at,
            Some(at("2024-01-01T00:00:01Z")),
            "repair must not touch the original marker"
        );
    }

    #[test]
    fn mixed_instance_stages_everything_due_at_once() {
        let now = at("2024-01-01T00:00:01Z");
        let inst = instance(
            Some(Banner {
                enabled: false,
                scheduled_activation: Some(at("2024-01-01T00:00:00Z")),
            }),
            vec![
                material("due", true, Some("2024-01-01T00:00:00Z"), None),
                material("future", true, Some("2024-02-01T00:00:00Z"), None),
            ],
            vec![HeaderLink {
                label: "community".to_string(),
                visible: false,
                scheduled_visibility: Some(at("2024-01-01T00:00:00Z")),
                activated_at: None,
            }],
        );

        let staged = reconcile_instance(&inst, now).expect("several entities due");
        assert_eq!(staged.counts.banners, 1);
        assert_eq!(staged.counts.materials, 1);
        assert_eq!(staged.counts.header_links, 1);

        let materials = staged.update.materials.expect("materials staged");
        assert!(!materials[0].locked);
        assert!(materials[1].locked, "future material carried through untouched");
        assert_eq!(materials[1].scheduled_unlock, Some(at("2024-02-01T00:00:00Z")));

        assert!(staged.update.banner.expect("banner staged").enabled);
        assert!(staged.update.header_links.expect("links staged")[0].visible);
    }

    #[test]
    fn second_evaluation_stages_nothing() {
        let now = at("2024-01-01T00:00:01Z");
        let mut inst = instance(
            None,
            vec![material("intro", true, Some("2024-01-01T00:00:00Z"), None)],
            Vec::new(),
        );

        let staged = reconcile_instance(&inst, now).expect("first pass stages");
        staged.update.apply_to(&mut inst);

        let later = at("2024-01-01T01:00:00Z");
        assert!(
            reconcile_instance(&inst, later).is_none(),
            "an applied activation must not re-stage"
        );
    }

    #[test]
    fn empty_instance_stages_nothing() {
        let inst = instance(None, Vec::new(), Vec::new());
        assert!(reconcile_instance(&inst, at("2024-01-01T00:00:00Z")).is_none());
    }
}

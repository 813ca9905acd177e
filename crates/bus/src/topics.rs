//! Topic constants for notification routing.
//!
//! Topics follow the pattern `devflix.<domain>.<event>` so subscribers can
//! rely on stable namespace-qualified names across components.

/// Fired once per instance whose entities were activated during a pass.
pub const MATERIALS_SYNCED: &str = "devflix.materials.synced";

/// Fired once per reconciliation pass that changed at least one instance.
pub const SCHEDULE_CHECK_COMPLETED: &str = "devflix.schedule.completed";

/// Fired by the coherent cache on every set/invalidate/clear, local or
/// observed from a peer context.
pub const CACHE_CHANGED: &str = "devflix.cache.changed";

//! Scheduled-activation reconciler.
//!
//! Polls the instance store on a fixed interval, flips entities whose
//! activation time has elapsed, and fans the changes out through the cache
//! and the notification bus. Safe to run concurrently from several contexts
//! against the same store.

pub mod error;
pub mod reconcile;
pub mod scheduler;
pub mod summary;

pub use error::SchedulerError;
pub use reconcile::{reconcile_instance, StagedInstance};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerState, SchedulerStatus};
pub use summary::{ActivationCounts, InstanceError, PassSummary};

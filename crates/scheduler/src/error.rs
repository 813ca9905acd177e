//! Scheduler error types.

use thiserror::Error;

use devflix_store::StoreError;

/// Failures surfaced by [`force_check`](crate::Scheduler::force_check) and
/// counted by the backoff policy. Per-instance write failures are not errors
/// at this level; they are reported inside the pass summary instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A pass was requested while another was still in flight.
    #[error("a reconciliation pass is already in flight")]
    PassInFlight,
}

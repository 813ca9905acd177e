//! Persistent-store contract consumed by the reconciliation scheduler.
//!
//! The concrete document store is an external collaborator; this crate only
//! owns the [`InstanceStore`] seam and an in-memory implementation shared by
//! tests and the demo worker.

mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::InstanceStore;

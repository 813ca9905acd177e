use async_trait::async_trait;

use devflix_core::{Instance, InstanceUpdate};

use crate::error::StoreError;

/// Key-addressable persistent store holding the schedulable instances.
///
/// Implementations are expected to carry last-write-wins document semantics;
/// reconcilers never assume exclusive write access, so correctness rests on
/// the activation markers, not on locking here.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fetch every instance. An empty result is a valid answer, not an
    /// error.
    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError>;

    /// Fetch one instance by id.
    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError>;

    /// Write the staged fields of one instance back, replacing whole fields.
    async fn update_instance(&self, id: &str, update: InstanceUpdate) -> Result<(), StoreError>;
}

//! In-memory instance store shared by tests and the demo worker.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use devflix_core::{Instance, InstanceUpdate};

use crate::error::StoreError;
use crate::store::InstanceStore;

/// HashMap-backed [`InstanceStore`] with whole-field update semantics,
/// mirroring a last-write-wins document store.
#[derive(Default)]
pub struct MemoryStore {
    instances: RwLock<HashMap<String, Instance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `instances`, keyed by id.
    pub fn seeded(instances: impl IntoIterator<Item = Instance>) -> Self {
        let map = instances
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();
        Self {
            instances: RwLock::new(map),
        }
    }

    pub async fn insert(&self, instance: Instance) {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance);
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        let mut all: Vec<Instance> = self.instances.read().await.values().cloned().collect();
        // Stable order keeps pass summaries and logs deterministic.
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn get_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn update_instance(&self, id: &str, update: InstanceUpdate) -> Result<(), StoreError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply_to(instance);
        Ok(())
    }
}

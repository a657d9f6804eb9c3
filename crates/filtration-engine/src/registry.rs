//! Registry of running controllers, keyed by instance id

use crate::controller::PoolController;
use crate::error::EngineError;
use dashmap::DashMap;
use std::sync::Arc;

/// Host-owned map from instance id to controller
///
/// Instances are independent; the registry only routes requests to them.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, Arc<PoolController>>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller, returning any controller it replaced
    ///
    /// The caller is responsible for shutting down the replaced controller.
    pub fn insert(&self, controller: Arc<PoolController>) -> Option<Arc<PoolController>> {
        let id = controller.id().to_string();
        tracing::debug!("Registered controller {}", id);
        self.instances.insert(id, controller)
    }

    /// Get controller by ID
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<PoolController>> {
        self.instances.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Get controller by ID or fail with [`EngineError::InstanceNotFound`]
    pub fn require(&self, id: &str) -> Result<Arc<PoolController>, EngineError> {
        self.get(id)
            .ok_or_else(|| EngineError::InstanceNotFound(id.to_string()))
    }

    /// Remove and shut down a controller
    pub async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let (_, controller) = self
            .instances
            .remove(id)
            .ok_or_else(|| EngineError::InstanceNotFound(id.to_string()))?;
        controller.shutdown().await;
        Ok(())
    }

    /// All controllers, ordered by id
    #[must_use]
    pub fn list(&self) -> Vec<Arc<PoolController>> {
        let mut controllers: Vec<Arc<PoolController>> =
            self.instances.iter().map(|r| Arc::clone(r.value())).collect();
        controllers.sort_by(|a, b| a.id().cmp(b.id()));
        controllers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Shut down every controller and empty the registry
    pub async fn shutdown_all(&self) {
        let controllers = self.list();
        self.instances.clear();
        for controller in &controllers {
            controller.shutdown().await;
        }
        tracing::info!("Shut down {} controllers", controllers.len());
    }
}

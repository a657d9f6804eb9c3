//! Pool instances: startup from stored entries, event fan-in and write-back

use crate::entities::EntityStore;
use dashmap::DashMap;
use filtration_engine::persistence::{self, PoolEntry};
use filtration_engine::{Config, ControllerEvent, InstanceRegistry, PoolController, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Owns every configured pool controller and the entries they were built from
pub struct PoolHost {
    registry: InstanceRegistry,
    entries: DashMap<String, PoolEntry>,
    entities: Arc<EntityStore>,
    data_path: PathBuf,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl PoolHost {
    pub fn new(data_dir: &Path, entities: Arc<EntityStore>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            registry: InstanceRegistry::new(),
            entries: DashMap::new(),
            entities,
            data_path: data_dir.join("pools.json"),
            event_tx,
        }
    }

    /// Load stored entries and start a controller for each
    pub async fn load(self: &Arc<Self>) {
        let entries = persistence::load_entries(&self.data_path).await;
        if entries.is_empty() {
            tracing::info!("No pools configured in {:?}", self.data_path);
        }
        for entry in entries {
            if let Err(e) = self.start_instance(entry.clone()).await {
                tracing::warn!("Failed to start pool {} ({}): {}", entry.name, entry.id, e);
            }
        }
    }

    /// Build, wire and start the controller for one entry
    pub async fn start_instance(
        self: &Arc<Self>,
        entry: PoolEntry,
    ) -> Result<Arc<PoolController>, filtration_engine::EngineError> {
        self.register_switches(&entry.config);

        let controller = Arc::new(PoolController::new(
            entry.id.clone(),
            entry.config.clone(),
            self.entities.clone(),
            self.entities.clone(),
            Arc::new(SystemClock),
        )?);

        self.forward_events(&controller);
        controller.start().await;

        tracing::info!("Started pool {} ({})", entry.name, entry.id);
        self.entries.insert(entry.id.clone(), entry);
        if let Some(previous) = self.registry.insert(controller.clone()) {
            previous.shutdown().await;
        }
        Ok(controller)
    }

    /// Add a new pool, start it and store its entry
    pub async fn create(
        self: &Arc<Self>,
        name: String,
        config: Config,
    ) -> Result<Arc<PoolController>, filtration_engine::EngineError> {
        let controller = self.start_instance(PoolEntry::new(name, config)).await?;
        self.persist().await;
        Ok(controller)
    }

    /// Stop a pool and drop its entry
    pub async fn remove(&self, id: &str) -> Result<(), filtration_engine::EngineError> {
        self.registry.remove(id).await?;
        self.entries.remove(id);
        self.persist().await;
        tracing::info!("Removed pool {}", id);
        Ok(())
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Subscribe to events from every controller
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    /// Stop every controller
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    fn register_switches(&self, config: &Config) {
        self.entities.ensure(config.pump_switch.as_str(), "off");
        if let Some(robot) = &config.robot_switch {
            self.entities.ensure(robot.as_str(), "off");
        }
    }

    /// Relay a controller's events to subscribers and persist config changes
    fn forward_events(self: &Arc<Self>, controller: &PoolController) {
        let host = Arc::clone(self);
        let mut rx = controller.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let ControllerEvent::ConfigChanged {
                            instance_id,
                            config,
                        } = &event
                        {
                            host.save_config(instance_id, config.clone()).await;
                        }
                        let _ = host.event_tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Pool event forwarder lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Pool event channel closed");
                        break;
                    }
                }
            }
        });
    }

    async fn save_config(&self, id: &str, config: Config) {
        match self.entries.get_mut(id) {
            Some(mut entry) => entry.config = config,
            None => {
                tracing::warn!("Config change for unknown pool {}", id);
                return;
            }
        }
        self.persist().await;
    }

    /// Rewrite the entries file from the in-memory entries
    async fn persist(&self) {
        let mut entries: Vec<PoolEntry> = self.entries.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        if let Err(e) = persistence::save_entries(&self.data_path, &entries).await {
            tracing::error!("Failed to save pool entries: {}", e);
        }
    }
}

//! In-memory entity store: the host's view of sensors and switches

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use filtration_engine::entity::parse_reading;
use filtration_engine::{Actuator, ActuatorError, EntityRef, StateReader};
use serde::Serialize;
use tokio::sync::broadcast;

/// Current state of one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    pub last_changed: DateTime<Utc>,
}

/// Entity states keyed by entity id
///
/// Sensors are pushed in over the API; switches are registered at startup
/// and flipped by the controllers through [`Actuator`].
pub struct EntityStore {
    states: DashMap<String, EntityState>,
    event_tx: broadcast::Sender<EntityState>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            states: DashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to entity state changes
    pub fn subscribe(&self) -> broadcast::Receiver<EntityState> {
        self.event_tx.subscribe()
    }

    /// Set an entity's state, creating it if needed
    pub fn set_state(&self, entity_id: &str, state: impl Into<String>) -> EntityState {
        let entity = EntityState {
            entity_id: entity_id.to_string(),
            state: state.into(),
            last_changed: Utc::now(),
        };
        self.states.insert(entity_id.to_string(), entity.clone());
        tracing::debug!("Entity {} is now '{}'", entity_id, entity.state);
        let _ = self.event_tx.send(entity.clone());
        entity
    }

    /// Register an entity with an initial state unless it already exists
    pub fn ensure(&self, entity_id: &str, initial: &str) {
        if !self.states.contains_key(entity_id) {
            self.set_state(entity_id, initial);
        }
    }

    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states.get(entity_id).map(|r| r.value().clone())
    }

    /// All entities, ordered by id
    #[must_use]
    pub fn list(&self) -> Vec<EntityState> {
        let mut entities: Vec<EntityState> = self.states.iter().map(|r| r.value().clone()).collect();
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entities
    }

    fn switch(&self, entity: &EntityRef, on: bool) -> Result<(), ActuatorError> {
        if !self.states.contains_key(entity.as_str()) {
            return Err(ActuatorError::EntityUnavailable(entity.to_string()));
        }
        self.set_state(entity.as_str(), if on { "on" } else { "off" });
        Ok(())
    }
}

impl StateReader for EntityStore {
    fn read(&self, entity: &EntityRef) -> Option<f64> {
        self.states
            .get(entity.as_str())
            .and_then(|r| parse_reading(&r.value().state))
    }
}

#[async_trait]
impl Actuator for EntityStore {
    async fn turn_on(&self, entity: &EntityRef) -> Result<(), ActuatorError> {
        self.switch(entity, true)
    }

    async fn turn_off(&self, entity: &EntityRef) -> Result<(), ActuatorError> {
        self.switch(entity, false)
    }
}

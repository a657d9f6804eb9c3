//! In-memory sensor and switch fakes for testing controllers

use crate::entity::{Actuator, EntityRef, StateReader};
use crate::error::ActuatorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sensor readings keyed by entity id
#[derive(Debug, Clone, Default)]
pub struct FakeSensors {
    readings: Arc<Mutex<HashMap<String, f64>>>,
}

impl FakeSensors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity: &str, value: f64) {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity.to_string(), value);
    }

    pub fn clear(&self, entity: &str) {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(entity);
    }
}

impl StateReader for FakeSensors {
    fn read(&self, entity: &EntityRef) -> Option<f64> {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity.as_str())
            .copied()
    }
}

/// Recorded switch command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCall {
    pub entity: String,
    pub on: bool,
}

/// Fake actuator that records every command it receives
#[derive(Debug, Clone, Default)]
pub struct FakeActuator {
    calls: Arc<Mutex<Vec<SwitchCall>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl FakeActuator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded commands
    #[must_use]
    pub fn calls(&self) -> Vec<SwitchCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Commands recorded for one entity
    #[must_use]
    pub fn calls_for(&self, entity: &str) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter(|c| c.entity == entity)
            .map(|c| c.on)
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Make commands to this entity fail (they are still recorded)
    pub fn fail_on(&self, entity: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entity.to_string());
    }

    fn record(&self, entity: &EntityRef, on: bool) -> Result<(), ActuatorError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SwitchCall {
                entity: entity.as_str().to_string(),
                on,
            });
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|f| f == entity.as_str()) {
            return Err(ActuatorError::Failed(format!("{entity} rejected command")));
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for FakeActuator {
    async fn turn_on(&self, entity: &EntityRef) -> Result<(), ActuatorError> {
        self.record(entity, true)
    }

    async fn turn_off(&self, entity: &EntityRef) -> Result<(), ActuatorError> {
        self.record(entity, false)
    }
}

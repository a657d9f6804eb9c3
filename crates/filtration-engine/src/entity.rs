//! Host collaborator interfaces: entity references, sensor reads and switch actuation

use crate::error::ActuatorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an external sensor or switch owned by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(String);

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Read access to the host's current sensor states
///
/// A reading that is missing, unavailable or not numeric is `None`.
pub trait StateReader: Send + Sync {
    fn read(&self, entity: &EntityRef) -> Option<f64>;
}

/// On/off control of host switches
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn turn_on(&self, entity: &EntityRef) -> Result<(), ActuatorError>;
    async fn turn_off(&self, entity: &EntityRef) -> Result<(), ActuatorError>;
}

/// Parse a raw entity state string into a temperature reading
///
/// Host placeholders such as `unknown` or `unavailable`, and non-finite
/// numbers, are treated as absent.
#[must_use]
pub fn parse_reading(raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        Ok(_) => None,
        Err(_) => {
            tracing::debug!("Ignoring non-numeric sensor state '{}'", raw);
            None
        }
    }
}

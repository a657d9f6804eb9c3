//! Filtration engine for pool pump scheduling
//!
//! Decides from water and outdoor temperature readings when a filtration
//! pump (and optionally a cleaning robot) should run, and drives that
//! decision through cancellable timers.

pub mod alarm;
pub mod clock;
pub mod config;
pub mod controller;
pub mod curve;
pub mod entity;
pub mod error;
pub mod fake;
pub mod frost;
pub mod mode;
pub mod persistence;
pub mod registry;
pub mod snapshot;
pub mod timers;
pub mod window;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{Config, ConfigUpdate};
pub use controller::{ControllerEvent, PoolController, TimerAction, Trigger};
pub use curve::CurveModel;
pub use entity::{Actuator, EntityRef, StateReader};
pub use error::{ActuatorError, ConfigError, EngineError};
pub use mode::{Branch, FrostPolicy, Mode};
pub use registry::InstanceRegistry;
pub use snapshot::StateSnapshot;
pub use window::ScheduleWindow;

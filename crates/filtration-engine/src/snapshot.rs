//! Read-only views of controller state for display

use crate::config::Config;
use crate::controller::TimerAction;
use crate::mode::{Branch, Mode};
use crate::timers::{PendingTimer, TimerHandle};
use crate::window::ScheduleWindow;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Mutable state owned by a controller, recomputed on every trigger
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControllerState {
    /// Branch executed by the last recompute
    pub effective: Option<Branch>,
    pub filtration_active: bool,
    pub frost_active: bool,
    /// Windows currently armed (empty outside scheduled mode or when a cycle was skipped)
    pub windows: Vec<ScheduleWindow>,
    /// Daily run hours for the current water temperature
    pub duration_hours: Option<f64>,
    pub water_temperature: Option<f64>,
    pub outdoor_temperature: Option<f64>,
    /// Last state the pump was commanded to
    pub pump_on: Option<bool>,
    pub robot_started_at: Option<NaiveDateTime>,
    pub last_recompute: Option<NaiveDateTime>,
}

/// A pending timer as shown to users
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerView {
    pub handle: TimerHandle,
    pub action: TimerAction,
    pub remaining_secs: u64,
    pub fires_at: NaiveDateTime,
}

impl TimerView {
    /// View of a pending timer, with the fire instant projected onto the wall clock
    #[must_use]
    pub fn new(timer: &PendingTimer<TimerAction>, now: NaiveDateTime) -> Self {
        let remaining = timer.remaining();
        let offset = chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            handle: timer.handle,
            action: timer.action,
            remaining_secs: remaining.as_secs(),
            fires_at: now + offset,
        }
    }
}

/// Serializable copy of one controller's configuration, state and timers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub id: String,
    pub mode: Mode,
    #[serde(flatten)]
    pub state: ControllerState,
    pub config: Config,
    pub timers: Vec<TimerView>,
}

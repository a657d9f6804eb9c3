//! Pool filtration controller

use crate::alarm;
use crate::clock::Clock;
use crate::config::{Config, ConfigUpdate};
use crate::curve::{CurveModel, MIN_HOURS};
use crate::entity::{Actuator, StateReader};
use crate::error::EngineError;
use crate::frost::is_frost_active;
use crate::mode::{Branch, Mode, ModeStateMachine};
use crate::snapshot::{ControllerState, StateSnapshot, TimerView};
use crate::timers::{FiredTimer, PendingTimer, TimerRegistry};
use crate::window::{coalesce, compute_windows};
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Deferred actuation carried by a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    PumpOn,
    PumpOff,
    /// Stop the pump and hand the mode back to `scheduled`
    EndShortCycle,
    RobotOn,
}

/// What caused a recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    DailyAlarm,
    ModeChange,
    ParameterChange,
    FrostRecheck,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "startup",
            Self::DailyAlarm => "daily alarm",
            Self::ModeChange => "mode change",
            Self::ParameterChange => "parameter change",
            Self::FrostRecheck => "frost re-check",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Events emitted by a controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// A recompute finished; `branch` is `None` when the cycle was skipped
    Recomputed {
        instance_id: String,
        trigger: Trigger,
        branch: Option<Branch>,
        timers: usize,
    },
    /// The selected mode changed
    ModeChanged { instance_id: String, mode: Mode },
    /// A mode request named no known mode
    ModeRejected {
        instance_id: String,
        requested: String,
    },
    /// A parameter change was installed; the host should persist `config`
    ConfigChanged { instance_id: String, config: Config },
    /// The pump was commanded on or off
    PumpSwitched { instance_id: String, on: bool },
    /// The cleaning robot was started
    RobotStarted { instance_id: String },
    /// A switch command failed
    ActuationFailed {
        instance_id: String,
        entity: String,
        error: String,
    },
}

struct Inner {
    config: Config,
    machine: ModeStateMachine,
    state: ControllerState,
}

/// One pool's filtration controller
///
/// Config and state live behind a single async mutex. Every recompute,
/// mode or parameter request and fired timer holds it for its whole run,
/// so at most one of them is in flight at a time.
pub struct PoolController {
    id: String,
    inner: Mutex<Inner>,
    timers: TimerRegistry<TimerAction>,
    fired_rx: StdMutex<Option<mpsc::UnboundedReceiver<FiredTimer<TimerAction>>>>,
    reader: Arc<dyn StateReader>,
    actuator: Arc<dyn Actuator>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<ControllerEvent>,
    snapshot_tx: watch::Sender<StateSnapshot>,
    pivot_tx: watch::Sender<NaiveTime>,
    /// Listener and alarm tasks, aborted on shutdown
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl PoolController {
    /// Create a controller; nothing runs until [`PoolController::start`]
    pub fn new(
        id: impl Into<String>,
        config: Config,
        reader: Arc<dyn StateReader>,
        actuator: Arc<dyn Actuator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let id = id.into();
        let (timers, fired_rx) = TimerRegistry::new();
        let (event_tx, _) = broadcast::channel(64);
        let machine = ModeStateMachine::new(Mode::default(), config.frost_policy);
        let state = ControllerState::default();
        let (snapshot_tx, _) = watch::channel(StateSnapshot {
            id: id.clone(),
            mode: machine.mode(),
            state: state.clone(),
            config: config.clone(),
            timers: Vec::new(),
        });
        let (pivot_tx, _) = watch::channel(config.pivot);

        Ok(Self {
            id,
            inner: Mutex::new(Inner {
                config,
                machine,
                state,
            }),
            timers,
            fired_rx: StdMutex::new(Some(fired_rx)),
            reader,
            actuator,
            clock,
            event_tx,
            snapshot_tx,
            pivot_tx,
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// Start the timer listener, the daily alarm and the frost re-check, then
    /// run the startup recompute
    pub async fn start(self: &Arc<Self>) {
        self.start_timer_listener();
        self.start_daily_alarm();

        let (recheck_minutes, has_outdoor) = {
            let inner = self.inner.lock().await;
            (
                inner.config.frost_recheck_minutes,
                inner.config.outdoor_sensor.is_some(),
            )
        };
        if recheck_minutes > 0 && has_outdoor {
            self.start_frost_recheck(recheck_minutes);
        }

        tracing::info!("[{}] Controller started", self.id);
        self.recompute(Trigger::Startup).await;
    }

    /// Stop background tasks and cancel every pending timer
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }

        // Wait for an in-flight recompute before cancelling what it armed
        let _inner = self.inner.lock().await;
        let cancelled = self.timers.cancel_all();
        tracing::info!(
            "[{}] Controller stopped, cancelled {} timers",
            self.id,
            cancelled
        );
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to snapshots published after every state change
    pub fn subscribe_snapshots(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Fresh snapshot of config, state and pending timers
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().await;
        self.build_snapshot(&inner)
    }

    pub async fn mode(&self) -> Mode {
        self.inner.lock().await.machine.mode()
    }

    pub async fn config(&self) -> Config {
        self.inner.lock().await.config.clone()
    }

    /// Timers currently armed, ordered by fire instant
    #[must_use]
    pub fn pending_timers(&self) -> Vec<PendingTimer<TimerAction>> {
        self.timers.pending()
    }

    /// Recompute the schedule and re-arm timers
    pub async fn recompute(&self, trigger: Trigger) {
        let mut inner = self.inner.lock().await;
        self.recompute_locked(&mut inner, trigger).await;
        self.publish(&inner);
    }

    /// Select a mode by name and recompute
    ///
    /// An unknown name is rejected and leaves mode, state and timers as
    /// they were.
    pub async fn set_mode(&self, requested: &str) -> Result<Mode, EngineError> {
        let mut inner = self.inner.lock().await;
        let mode = match inner.machine.request(requested) {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!("[{}] Rejected mode request: {}", self.id, e);
                self.emit(ControllerEvent::ModeRejected {
                    instance_id: self.id.clone(),
                    requested: requested.to_string(),
                });
                return Err(e);
            }
        };

        tracing::info!("[{}] Mode set to {}", self.id, mode);
        self.emit(ControllerEvent::ModeChanged {
            instance_id: self.id.clone(),
            mode,
        });

        self.recompute_locked(&mut inner, Trigger::ModeChange).await;
        self.publish(&inner);
        Ok(mode)
    }

    /// Apply a parameter change and recompute
    ///
    /// The update is validated as a whole; a rejected update changes nothing.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<Config, EngineError> {
        let mut inner = self.inner.lock().await;
        let next = inner.config.with_update(update).map_err(|e| {
            tracing::warn!("[{}] Rejected parameter change: {}", self.id, e);
            e
        })?;

        if next.pivot != inner.config.pivot {
            self.pivot_tx.send_replace(next.pivot);
        }
        inner.machine.set_policy(next.frost_policy);
        inner.config = next.clone();

        tracing::info!("[{}] Configuration updated", self.id);
        self.emit(ControllerEvent::ConfigChanged {
            instance_id: self.id.clone(),
            config: next.clone(),
        });

        self.recompute_locked(&mut inner, Trigger::ParameterChange).await;
        self.publish(&inner);
        Ok(next)
    }

    /// Set the pivot time (`"HH:MM"`)
    pub async fn set_pivot(&self, pivot: &str) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            pivot: Some(pivot.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn set_pause_minutes(&self, minutes: u32) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            pause_minutes: Some(minutes),
            ..Default::default()
        })
        .await
    }

    pub async fn set_cut_minutes(&self, minutes: u32) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            cut_minutes: Some(minutes),
            ..Default::default()
        })
        .await
    }

    pub async fn set_frost_threshold(&self, threshold: f64) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            frost_threshold: Some(threshold),
            ..Default::default()
        })
        .await
    }

    pub async fn set_coefficient(&self, coefficient: u8) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            coefficient: Some(coefficient),
            ..Default::default()
        })
        .await
    }

    pub async fn set_robot_enabled(&self, enabled: bool) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            robot_enabled: Some(enabled),
            ..Default::default()
        })
        .await
    }

    pub async fn set_curve(&self, curve: CurveModel) -> Result<Config, EngineError> {
        self.update_config(ConfigUpdate {
            curve: Some(curve),
            ..Default::default()
        })
        .await
    }

    /// Re-read the outdoor sensor and recompute only if the frost state flips
    pub async fn recheck_frost(&self) {
        let mut inner = self.inner.lock().await;
        let outdoor = inner
            .config
            .outdoor_sensor
            .as_ref()
            .and_then(|sensor| self.reader.read(sensor))
            .filter(|t| t.is_finite());
        let frost = is_frost_active(outdoor, inner.config.frost_threshold);

        if frost == inner.state.frost_active {
            tracing::debug!(
                "[{}] Frost state unchanged ({}), outdoor {:?}",
                self.id,
                frost,
                outdoor
            );
            return;
        }

        tracing::info!(
            "[{}] Frost protection {} (outdoor {:?})",
            self.id,
            if frost { "engaging" } else { "releasing" },
            outdoor
        );
        self.recompute_locked(&mut inner, Trigger::FrostRecheck).await;
        self.publish(&inner);
    }

    async fn recompute_locked(&self, inner: &mut Inner, trigger: Trigger) {
        // Nothing armed before this point may act after it
        let cancelled = self.timers.cancel_all();

        let now = self.clock.now();
        let config = inner.config.clone();

        // Non-finite readings count as absent
        let water = self
            .reader
            .read(&config.water_sensor)
            .filter(|t| t.is_finite());
        let outdoor = config
            .outdoor_sensor
            .as_ref()
            .and_then(|sensor| self.reader.read(sensor))
            .filter(|t| t.is_finite());
        let frost = is_frost_active(outdoor, config.frost_threshold);

        inner.state.water_temperature = water;
        inner.state.outdoor_temperature = outdoor;
        inner.state.frost_active = frost;
        inner.state.duration_hours = config.curve.duration_hours(water, config.coefficient);
        inner.state.last_recompute = Some(now);

        tracing::debug!(
            "[{}] Recompute on {}: mode {}, water {:?}, outdoor {:?}, cancelled {} timers",
            self.id,
            trigger,
            inner.machine.mode(),
            water,
            outdoor,
            cancelled
        );

        let Some(branch) = inner.machine.resolve(frost, water.is_some()) else {
            tracing::warn!(
                "[{}] Water temperature unavailable from {}, skipping scheduled cycle",
                self.id,
                config.water_sensor
            );
            // Their timers are gone, so the windows are no longer in force
            inner.state.windows.clear();
            self.emit(ControllerEvent::Recomputed {
                instance_id: self.id.clone(),
                trigger,
                branch: None,
                timers: 0,
            });
            return;
        };

        inner.state.effective = Some(branch);
        match branch {
            Branch::Frost => {
                tracing::warn!(
                    "[{}] Frost protection: outdoor {:?} below {}, forcing pump on",
                    self.id,
                    outdoor,
                    config.frost_threshold
                );
                inner.state.windows.clear();
                self.set_pump(inner, true, true).await;
            }
            Branch::Off => {
                inner.state.windows.clear();
                self.set_pump(inner, false, true).await;
            }
            Branch::Continuous => {
                inner.state.windows.clear();
                self.set_pump(inner, true, true).await;
            }
            Branch::ShortCycle => {
                inner.state.windows.clear();
                self.set_pump(inner, true, true).await;
                let cut = Duration::from_secs(u64::from(config.cut_minutes) * 60);
                self.timers.schedule(cut, TimerAction::EndShortCycle);
            }
            Branch::Scheduled => self.arm_schedule(inner, &config, now).await,
        }

        let armed = self.timers.len();
        tracing::info!(
            "[{}] Recomputed on {}: {:?}, {} timers armed",
            self.id,
            trigger,
            branch,
            armed
        );
        self.emit(ControllerEvent::Recomputed {
            instance_id: self.id.clone(),
            trigger,
            branch: Some(branch),
            timers: armed,
        });
    }

    /// Compute today's windows and arm their timers
    async fn arm_schedule(&self, inner: &mut Inner, config: &Config, now: NaiveDateTime) {
        let total_hours = inner.state.duration_hours.unwrap_or(MIN_HOURS);
        let windows = compute_windows(config.pivot, config.pause_minutes, total_hours, now.date());
        inner.state.windows = windows.to_vec();

        tracing::debug!(
            "[{}] {:.2}h of filtration: {} - {} and {} - {}",
            self.id,
            total_hours,
            windows[0].start,
            windows[0].end,
            windows[1].start,
            windows[1].end
        );

        let mut running = false;
        for segment in coalesce(&windows) {
            if segment.is_empty() {
                tracing::debug!("[{}] Skipping empty window at {}", self.id, segment.start);
            } else if segment.contains(now) {
                running = true;
                self.timers
                    .schedule(delay_until(now, segment.end), TimerAction::PumpOff);
            } else if now < segment.start {
                self.timers
                    .schedule(delay_until(now, segment.start), TimerAction::PumpOn);
                self.timers
                    .schedule(delay_until(now, segment.end), TimerAction::PumpOff);
            } else {
                tracing::debug!(
                    "[{}] Window {} - {} already elapsed",
                    self.id,
                    segment.start,
                    segment.end
                );
            }
        }

        self.set_pump(inner, running, true).await;

        if config.robot_enabled {
            let robot_at = windows[1].end;
            if config.robot_switch.is_none() {
                tracing::debug!("[{}] Robot enabled without a robot switch", self.id);
            } else if inner
                .state
                .robot_started_at
                .is_some_and(|started| started >= robot_at)
            {
                tracing::debug!("[{}] Robot already ran after {}", self.id, robot_at);
            } else {
                self.timers
                    .schedule(delay_until(now, robot_at), TimerAction::RobotOn);
            }
        }
    }

    /// Command the pump, unless `reassert` is false and it is already in that state
    async fn set_pump(&self, inner: &mut Inner, on: bool, reassert: bool) {
        inner.state.filtration_active = on;
        if !reassert && inner.state.pump_on == Some(on) {
            tracing::debug!("[{}] Pump already {}, skipping", self.id, on_off(on));
            return;
        }
        inner.state.pump_on = Some(on);

        let pump = &inner.config.pump_switch;
        let result = if on {
            self.actuator.turn_on(pump).await
        } else {
            self.actuator.turn_off(pump).await
        };

        match result {
            Ok(()) => {
                tracing::info!("[{}] Pump {} ({})", self.id, on_off(on), pump);
                self.emit(ControllerEvent::PumpSwitched {
                    instance_id: self.id.clone(),
                    on,
                });
            }
            Err(e) => {
                tracing::error!("[{}] Failed to switch pump {}: {}", self.id, on_off(on), e);
                self.emit(ControllerEvent::ActuationFailed {
                    instance_id: self.id.clone(),
                    entity: pump.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn start_robot(&self, inner: &mut Inner) {
        let Some(robot) = inner.config.robot_switch.clone() else {
            return;
        };

        match self.actuator.turn_on(&robot).await {
            Ok(()) => {
                inner.state.robot_started_at = Some(self.clock.now());
                tracing::info!("[{}] Robot started ({})", self.id, robot);
                self.emit(ControllerEvent::RobotStarted {
                    instance_id: self.id.clone(),
                });
            }
            Err(e) => {
                tracing::error!("[{}] Failed to start robot: {}", self.id, e);
                self.emit(ControllerEvent::ActuationFailed {
                    instance_id: self.id.clone(),
                    entity: robot.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Act on a fired timer, unless a recompute cancelled it first
    async fn handle_fired(&self, fired: FiredTimer<TimerAction>) {
        let mut inner = self.inner.lock().await;
        let Some(action) = self.timers.take(fired.handle) else {
            tracing::debug!(
                "[{}] Timer {} was cancelled before it could act",
                self.id,
                fired.handle
            );
            return;
        };

        tracing::debug!("[{}] Timer {} fired: {:?}", self.id, fired.handle, action);
        match action {
            TimerAction::PumpOn => self.set_pump(&mut inner, true, false).await,
            TimerAction::PumpOff => self.set_pump(&mut inner, false, false).await,
            TimerAction::EndShortCycle => {
                self.set_pump(&mut inner, false, false).await;
                inner.machine.revert_to_scheduled();
                tracing::info!("[{}] Short cycle finished, back to scheduled", self.id);
                self.emit(ControllerEvent::ModeChanged {
                    instance_id: self.id.clone(),
                    mode: Mode::Scheduled,
                });
            }
            TimerAction::RobotOn => self.start_robot(&mut inner).await,
        }
        self.publish(&inner);
    }

    /// Start delivering fired timers to [`PoolController::handle_fired`]
    fn start_timer_listener(self: &Arc<Self>) {
        let Some(mut rx) = self
            .fired_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            tracing::debug!("[{}] Timer listener already running", self.id);
            return;
        };

        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(fired) = rx.recv().await {
                controller.handle_fired(fired).await;
            }
            tracing::debug!("[{}] Timer channel closed", controller.id);
        });
        self.track(handle);
    }

    fn start_daily_alarm(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let handle = alarm::spawn_daily(
            self.id.clone(),
            Arc::clone(&self.clock),
            self.pivot_tx.subscribe(),
            move || {
                let controller = Arc::clone(&controller);
                async move { controller.recompute(Trigger::DailyAlarm).await }
            },
        );
        self.track(handle);
    }

    fn start_frost_recheck(self: &Arc<Self>, minutes: u32) {
        let controller = Arc::clone(self);
        let period = Duration::from_secs(u64::from(minutes) * 60);
        let handle = alarm::spawn_interval(format!("{} frost", self.id), period, move || {
            let controller = Arc::clone(&controller);
            async move { controller.recheck_frost().await }
        });
        self.track(handle);
        tracing::debug!("[{}] Frost re-check every {} minutes", self.id, minutes);
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    fn build_snapshot(&self, inner: &Inner) -> StateSnapshot {
        let now = self.clock.now();
        StateSnapshot {
            id: self.id.clone(),
            mode: inner.machine.mode(),
            state: inner.state.clone(),
            config: inner.config.clone(),
            timers: self
                .timers
                .pending()
                .iter()
                .map(|timer| TimerView::new(timer, now))
                .collect(),
        }
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot_tx.send_replace(self.build_snapshot(inner));
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Delay from `now` until `target`, zero if `target` has passed
fn delay_until(now: NaiveDateTime, target: NaiveDateTime) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

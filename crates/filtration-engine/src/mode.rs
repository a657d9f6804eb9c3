//! Operating modes and branch resolution

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operator-selected operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Pump held off
    Off,
    /// Pump held on
    Continuous,
    /// Pump on for the configured cut duration, then back to scheduled
    ShortCycle,
    /// Temperature-driven daily windows
    #[default]
    Scheduled,
}

impl Mode {
    pub const ALL: [Self; 4] = [Self::Off, Self::Continuous, Self::ShortCycle, Self::Scheduled];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Continuous => "continuous",
            Self::ShortCycle => "short_cycle",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = EngineError;

    /// Parse a mode name, case-insensitively, including the legacy aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "off" => Ok(Self::Off),
            "continuous" | "continu" => Ok(Self::Continuous),
            "short_cycle" | "hiver" | "winter" => Ok(Self::ShortCycle),
            "scheduled" | "ete" | "été" | "summer" => Ok(Self::Scheduled),
            _ => Err(EngineError::InvalidMode(s.to_string())),
        }
    }
}

/// Where frost protection sits in the mode priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrostPolicy {
    /// frost, off, continuous, short_cycle, scheduled
    #[default]
    OverridesAll,
    /// off, continuous, frost, short_cycle, scheduled
    ScheduledModesOnly,
}

/// The branch a recompute actually executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Frost,
    Off,
    Continuous,
    ShortCycle,
    Scheduled,
}

impl From<Mode> for Branch {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Off => Self::Off,
            Mode::Continuous => Self::Continuous,
            Mode::ShortCycle => Self::ShortCycle,
            Mode::Scheduled => Self::Scheduled,
        }
    }
}

/// Resolve the branch for a mode under the frost guard
#[must_use]
pub fn resolve(mode: Mode, frost_active: bool, policy: FrostPolicy) -> Branch {
    if !frost_active {
        return mode.into();
    }
    match (policy, mode) {
        (FrostPolicy::ScheduledModesOnly, Mode::Off | Mode::Continuous) => mode.into(),
        _ => Branch::Frost,
    }
}

/// Selected mode plus the frost policy used to resolve it
#[derive(Debug, Clone, Default)]
pub struct ModeStateMachine {
    mode: Mode,
    policy: FrostPolicy,
}

impl ModeStateMachine {
    #[must_use]
    pub fn new(mode: Mode, policy: FrostPolicy) -> Self {
        Self { mode, policy }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn policy(&self) -> FrostPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: FrostPolicy) {
        self.policy = policy;
    }

    /// Select a mode by name; an unknown name leaves the mode unchanged
    pub fn request(&mut self, requested: &str) -> Result<Mode, EngineError> {
        self.mode = requested.parse()?;
        Ok(self.mode)
    }

    /// End of a short cycle
    pub fn revert_to_scheduled(&mut self) {
        self.mode = Mode::Scheduled;
    }

    /// Branch to execute, or `None` when the scheduled branch has no water
    /// temperature to work from and the cycle must be skipped
    #[must_use]
    pub fn resolve(&self, frost_active: bool, water_temp_available: bool) -> Option<Branch> {
        match resolve(self.mode, frost_active, self.policy) {
            Branch::Scheduled if !water_temp_available => None,
            branch => Some(branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes_and_aliases() {
        assert_eq!("off".parse::<Mode>().unwrap(), Mode::Off);
        assert_eq!("Continuous".parse::<Mode>().unwrap(), Mode::Continuous);
        assert_eq!("continu".parse::<Mode>().unwrap(), Mode::Continuous);
        assert_eq!("short-cycle".parse::<Mode>().unwrap(), Mode::ShortCycle);
        assert_eq!("HIVER".parse::<Mode>().unwrap(), Mode::ShortCycle);
        assert_eq!("winter".parse::<Mode>().unwrap(), Mode::ShortCycle);
        assert_eq!("ete".parse::<Mode>().unwrap(), Mode::Scheduled);
        assert_eq!("summer".parse::<Mode>().unwrap(), Mode::Scheduled);
        assert!(matches!(
            "turbo".parse::<Mode>(),
            Err(EngineError::InvalidMode(m)) if m == "turbo"
        ));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for mode in Mode::ALL {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_frost_overrides_every_mode_by_default() {
        for mode in Mode::ALL {
            assert_eq!(resolve(mode, true, FrostPolicy::OverridesAll), Branch::Frost);
        }
    }

    #[test]
    fn test_frost_below_off_and_continuous_when_scheduled_only() {
        let policy = FrostPolicy::ScheduledModesOnly;
        assert_eq!(resolve(Mode::Off, true, policy), Branch::Off);
        assert_eq!(resolve(Mode::Continuous, true, policy), Branch::Continuous);
        assert_eq!(resolve(Mode::ShortCycle, true, policy), Branch::Frost);
        assert_eq!(resolve(Mode::Scheduled, true, policy), Branch::Frost);
    }

    #[test]
    fn test_no_frost_follows_selected_mode() {
        for policy in [FrostPolicy::OverridesAll, FrostPolicy::ScheduledModesOnly] {
            for mode in Mode::ALL {
                assert_eq!(resolve(mode, false, policy), Branch::from(mode));
            }
        }
    }

    #[test]
    fn test_invalid_request_keeps_mode() {
        let mut machine = ModeStateMachine::new(Mode::Continuous, FrostPolicy::default());
        assert!(machine.request("bogus").is_err());
        assert_eq!(machine.mode(), Mode::Continuous);

        assert_eq!(machine.request("off").unwrap(), Mode::Off);
        assert_eq!(machine.mode(), Mode::Off);
    }

    #[test]
    fn test_scheduled_without_water_temperature_is_skipped() {
        let machine = ModeStateMachine::default();
        assert_eq!(machine.resolve(false, false), None);
        assert_eq!(machine.resolve(false, true), Some(Branch::Scheduled));
        // Frost protection does not need the water temperature
        assert_eq!(machine.resolve(true, false), Some(Branch::Frost));
    }
}

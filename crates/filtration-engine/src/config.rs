//! Per-instance configuration and parameter updates

use crate::curve::CurveModel;
use crate::entity::EntityRef;
use crate::error::ConfigError;
use crate::mode::FrostPolicy;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Allowed adjustment coefficient, in percent
pub const COEFFICIENT_RANGE: RangeInclusive<u8> = 10..=100;
/// Allowed pause between the two daily windows, in minutes
pub const PAUSE_RANGE: RangeInclusive<u32> = 0..=1440;
/// Allowed short-cycle duration, in minutes
pub const CUT_RANGE: RangeInclusive<u32> = 1..=1440;
/// Allowed no-frost threshold, in °C
pub const THRESHOLD_RANGE: RangeInclusive<f64> = -20.0..=20.0;

/// Configuration of one filtration controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Water temperature sensor
    pub water_sensor: EntityRef,
    /// Outdoor temperature sensor; without one frost protection never engages
    #[serde(default)]
    pub outdoor_sensor: Option<EntityRef>,
    /// Pump switch
    pub pump_switch: EntityRef,
    /// Cleaning robot switch
    #[serde(default)]
    pub robot_switch: Option<EntityRef>,
    #[serde(default)]
    pub robot_enabled: bool,
    /// Time of day the two windows are centered on (`"HH:MM"`)
    #[serde(with = "pivot_format")]
    pub pivot: NaiveTime,
    #[serde(default)]
    pub pause_minutes: u32,
    /// Short-cycle duration
    #[serde(default = "default_cut_minutes")]
    pub cut_minutes: u32,
    /// Outdoor temperature below which frost protection engages
    #[serde(default)]
    pub frost_threshold: f64,
    /// Adjustment coefficient applied to the cubic curve, in percent
    #[serde(default = "default_coefficient")]
    pub coefficient: u8,
    #[serde(default)]
    pub curve: CurveModel,
    #[serde(default)]
    pub frost_policy: FrostPolicy,
    /// Outdoor re-check period; 0 disables the periodic frost check
    #[serde(default = "default_frost_recheck_minutes")]
    pub frost_recheck_minutes: u32,
}

fn default_cut_minutes() -> u32 {
    60
}

fn default_coefficient() -> u8 {
    100
}

fn default_frost_recheck_minutes() -> u32 {
    15
}

impl Config {
    /// Minimal config with every tunable at its default
    pub fn new(water_sensor: impl Into<String>, pump_switch: impl Into<String>, pivot: NaiveTime) -> Self {
        Self {
            water_sensor: EntityRef::new(water_sensor),
            outdoor_sensor: None,
            pump_switch: EntityRef::new(pump_switch),
            robot_switch: None,
            robot_enabled: false,
            pivot,
            pause_minutes: 0,
            cut_minutes: default_cut_minutes(),
            frost_threshold: 0.0,
            coefficient: default_coefficient(),
            curve: CurveModel::default(),
            frost_policy: FrostPolicy::default(),
            frost_recheck_minutes: default_frost_recheck_minutes(),
        }
    }

    /// Check every field against its allowed domain
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.water_sensor.is_empty() {
            return Err(ConfigError::MissingEntity("water_sensor"));
        }
        if self.pump_switch.is_empty() {
            return Err(ConfigError::MissingEntity("pump_switch"));
        }
        if !is_whole_minute(self.pivot) {
            return Err(ConfigError::InvalidPivot(self.pivot.to_string()));
        }
        if !COEFFICIENT_RANGE.contains(&self.coefficient) {
            return Err(ConfigError::CoefficientOutOfRange(self.coefficient));
        }
        if !PAUSE_RANGE.contains(&self.pause_minutes) {
            return Err(ConfigError::PauseOutOfRange(self.pause_minutes));
        }
        if !CUT_RANGE.contains(&self.cut_minutes) {
            return Err(ConfigError::CutOutOfRange(self.cut_minutes));
        }
        if !THRESHOLD_RANGE.contains(&self.frost_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.frost_threshold));
        }
        Ok(())
    }

    /// Produce the config an update would install, validated
    ///
    /// `self` is left untouched, so a rejected update never leaves a
    /// half-applied config behind.
    pub fn with_update(&self, update: ConfigUpdate) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        if let Some(pivot) = update.pivot {
            next.pivot = parse_pivot(&pivot)?;
        }
        if let Some(pause) = update.pause_minutes {
            next.pause_minutes = pause;
        }
        if let Some(cut) = update.cut_minutes {
            next.cut_minutes = cut;
        }
        if let Some(threshold) = update.frost_threshold {
            next.frost_threshold = threshold;
        }
        if let Some(coefficient) = update.coefficient {
            next.coefficient = coefficient;
        }
        if let Some(enabled) = update.robot_enabled {
            next.robot_enabled = enabled;
        }
        if let Some(curve) = update.curve {
            next.curve = curve;
        }
        if let Some(policy) = update.frost_policy {
            next.frost_policy = policy;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Request to change one or more tunable parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub pivot: Option<String>,
    #[serde(default)]
    pub pause_minutes: Option<u32>,
    #[serde(default)]
    pub cut_minutes: Option<u32>,
    #[serde(default)]
    pub frost_threshold: Option<f64>,
    #[serde(default)]
    pub coefficient: Option<u8>,
    #[serde(default)]
    pub robot_enabled: Option<bool>,
    #[serde(default)]
    pub curve: Option<CurveModel>,
    #[serde(default)]
    pub frost_policy: Option<FrostPolicy>,
}

impl ConfigUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pivot.is_none()
            && self.pause_minutes.is_none()
            && self.cut_minutes.is_none()
            && self.frost_threshold.is_none()
            && self.coefficient.is_none()
            && self.robot_enabled.is_none()
            && self.curve.is_none()
            && self.frost_policy.is_none()
    }
}

/// Parse a pivot time: `"HH:MM"`, `"HH:MM:00"` or a bare hour
///
/// Pivots have minute resolution; a non-zero seconds field is rejected.
pub fn parse_pivot(raw: &str) -> Result<NaiveTime, ConfigError> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
        .filter(|pivot| is_whole_minute(*pivot))
        .or_else(|| {
            trimmed
                .parse::<u32>()
                .ok()
                .and_then(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        })
        .ok_or_else(|| ConfigError::InvalidPivot(raw.to_string()))
}

fn is_whole_minute(pivot: NaiveTime) -> bool {
    pivot.second() == 0 && pivot.nanosecond() == 0
}

/// Format a pivot time as `"HH:MM"`
#[must_use]
pub fn format_pivot(pivot: NaiveTime) -> String {
    format!("{:02}:{:02}", pivot.hour(), pivot.minute())
}

/// The 96 quarter-hour pivot choices offered to a UI selector
#[must_use]
pub fn pivot_options() -> Vec<String> {
    (0..24u32)
        .flat_map(|hour| (0..60u32).step_by(15).map(move |minute| format!("{hour:02}:{minute:02}")))
        .collect()
}

/// Bounds of every adjustable parameter, for number inputs
#[derive(Debug, Clone, Serialize)]
pub struct ParameterBounds {
    pub pivots: Vec<String>,
    pub coefficient: (u8, u8),
    pub pause_minutes: (u32, u32),
    pub cut_minutes: (u32, u32),
    pub frost_threshold: (f64, f64),
    pub curves: [CurveModel; 2],
    pub frost_policies: [FrostPolicy; 2],
}

#[must_use]
pub fn parameter_bounds() -> ParameterBounds {
    ParameterBounds {
        pivots: pivot_options(),
        coefficient: (*COEFFICIENT_RANGE.start(), *COEFFICIENT_RANGE.end()),
        pause_minutes: (*PAUSE_RANGE.start(), *PAUSE_RANGE.end()),
        cut_minutes: (*CUT_RANGE.start(), *CUT_RANGE.end()),
        frost_threshold: (*THRESHOLD_RANGE.start(), *THRESHOLD_RANGE.end()),
        curves: [CurveModel::Cubic, CurveModel::Stepwise],
        frost_policies: [FrostPolicy::OverridesAll, FrostPolicy::ScheduledModesOnly],
    }
}

mod pivot_format {
    use super::{format_pivot, parse_pivot};
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(pivot: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_pivot(*pivot))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_pivot(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::new(
            "sensor.pool_water",
            "switch.pool_pump",
            NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"water_sensor": "sensor.water", "pump_switch": "switch.pump", "pivot": "13:30"}"#,
        )
        .unwrap();
        assert_eq!(config.pivot, NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        assert_eq!(config.pause_minutes, 0);
        assert_eq!(config.cut_minutes, 60);
        assert_eq!(config.coefficient, 100);
        assert_eq!(config.frost_threshold, 0.0);
        assert_eq!(config.frost_recheck_minutes, 15);
        assert_eq!(config.curve, CurveModel::Cubic);
        assert_eq!(config.frost_policy, FrostPolicy::OverridesAll);
        assert!(config.outdoor_sensor.is_none());
        assert!(!config.robot_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pivot_serializes_as_hh_mm() {
        let json = serde_json::to_value(base()).unwrap();
        assert_eq!(json["pivot"], "14:00");
    }

    #[test]
    fn test_invalid_pivot_rejected_on_load() {
        let result = serde_json::from_str::<Config>(
            r#"{"water_sensor": "a", "pump_switch": "b", "pivot": "25:00"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_pivot_forms() {
        let two_pm = NaiveTime::from_hms_opt(14, 0, 0).unwrap();
        assert_eq!(parse_pivot("14:00").unwrap(), two_pm);
        assert_eq!(parse_pivot("14:00:00").unwrap(), two_pm);
        assert_eq!(parse_pivot("14").unwrap(), two_pm);
        assert_eq!(
            parse_pivot("noon"),
            Err(ConfigError::InvalidPivot("noon".to_string()))
        );
        assert!(parse_pivot("24:00").is_err());
    }

    #[test]
    fn test_pivot_with_seconds_rejected() {
        assert_eq!(
            parse_pivot("14:00:30"),
            Err(ConfigError::InvalidPivot("14:00:30".to_string()))
        );
        assert!(serde_json::from_str::<Config>(
            r#"{"water_sensor": "a", "pump_switch": "b", "pivot": "14:00:30"}"#,
        )
        .is_err());

        let mut config = base();
        config.pivot = NaiveTime::from_hms_opt(14, 0, 30).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPivot(_))
        ));

        let update = ConfigUpdate {
            pivot: Some("09:15:45".to_string()),
            ..Default::default()
        };
        assert!(base().with_update(update).is_err());
    }

    #[test]
    fn test_pivot_survives_write_back() {
        let mut config = base();
        config.pivot = parse_pivot("09:45:00").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let reloaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.pivot, config.pivot);
        assert_eq!(
            crate::alarm::daily_expression(reloaded.pivot),
            "0 45 9 * * *"
        );
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = base();
        config.coefficient = 9;
        assert_eq!(config.validate(), Err(ConfigError::CoefficientOutOfRange(9)));

        let mut config = base();
        config.pause_minutes = 1441;
        assert_eq!(config.validate(), Err(ConfigError::PauseOutOfRange(1441)));

        let mut config = base();
        config.cut_minutes = 0;
        assert_eq!(config.validate(), Err(ConfigError::CutOutOfRange(0)));

        let mut config = base();
        config.frost_threshold = -20.5;
        assert_eq!(config.validate(), Err(ConfigError::ThresholdOutOfRange(-20.5)));

        let mut config = base();
        config.water_sensor = EntityRef::new("");
        assert_eq!(config.validate(), Err(ConfigError::MissingEntity("water_sensor")));
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let config = base();
        let rejected = config.with_update(ConfigUpdate {
            pause_minutes: Some(30),
            coefficient: Some(150),
            ..Default::default()
        });
        assert_eq!(rejected, Err(ConfigError::CoefficientOutOfRange(150)));
        assert_eq!(config.pause_minutes, 0);

        let updated = config
            .with_update(ConfigUpdate {
                pivot: Some("10:15".to_string()),
                pause_minutes: Some(30),
                curve: Some(CurveModel::Stepwise),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.pivot, NaiveTime::from_hms_opt(10, 15, 0).unwrap());
        assert_eq!(updated.pause_minutes, 30);
        assert_eq!(updated.curve, CurveModel::Stepwise);
        assert_eq!(updated.coefficient, 100);
    }

    #[test]
    fn test_pivot_options() {
        let options = pivot_options();
        assert_eq!(options.len(), 96);
        assert_eq!(options[0], "00:00");
        assert_eq!(options[1], "00:15");
        assert_eq!(options[95], "23:45");
        assert!(options.iter().all(|o| parse_pivot(o).is_ok()));
    }
}

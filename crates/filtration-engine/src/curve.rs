//! Daily filtration duration as a function of water temperature

use serde::{Deserialize, Serialize};

/// Lower bound of any computed duration, in hours
pub const MIN_HOURS: f64 = 0.0;
/// Upper bound of any computed duration, in hours
pub const MAX_HOURS: f64 = 24.0;

const CUBIC_A: f64 = 0.00335;
const CUBIC_B: f64 = -0.14953;
const CUBIC_C: f64 = 2.43489;
const CUBIC_D: f64 = -10.72859;

/// Temperature bands (inclusive upper bound, hours) for the stepwise curve
const STEPWISE_BANDS: [(f64, f64); 5] = [
    (10.0, 2.0),
    (15.0, 4.0),
    (20.0, 6.0),
    (25.0, 8.0),
    (30.0, 10.0),
];
const STEPWISE_ABOVE: f64 = 12.0;

/// Curve used to turn a water temperature into daily filtration hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveModel {
    /// Cubic fit scaled by the adjustment coefficient
    #[default]
    Cubic,
    /// Coarse temperature bands, ignores the coefficient
    Stepwise,
}

impl CurveModel {
    /// Daily filtration hours for a water temperature
    ///
    /// Returns `None` when no usable temperature is available. Results are
    /// clamped to `[MIN_HOURS, MAX_HOURS]`; a non-finite intermediate
    /// result degrades to `MIN_HOURS`.
    #[must_use]
    pub fn duration_hours(&self, water_temp: Option<f64>, coefficient: u8) -> Option<f64> {
        let temp = water_temp?;
        if !temp.is_finite() {
            tracing::warn!("Ignoring non-finite water temperature {}", temp);
            return None;
        }

        let hours = match self {
            Self::Cubic => cubic_hours(temp, coefficient),
            Self::Stepwise => stepwise_hours(temp),
        };

        if !hours.is_finite() {
            tracing::warn!(
                "Filtration curve produced {} for {}°C, falling back to {}h",
                hours,
                temp,
                MIN_HOURS
            );
            return Some(MIN_HOURS);
        }

        Some(hours.clamp(MIN_HOURS, MAX_HOURS))
    }
}

fn cubic_hours(temp: f64, coefficient: u8) -> f64 {
    let raw = CUBIC_A * temp.powi(3) + CUBIC_B * temp.powi(2) + CUBIC_C * temp + CUBIC_D;
    raw * f64::from(coefficient) / 100.0
}

fn stepwise_hours(temp: f64) -> f64 {
    STEPWISE_BANDS
        .iter()
        .find(|(upper, _)| temp <= *upper)
        .map_or(STEPWISE_ABOVE, |(_, hours)| *hours)
}

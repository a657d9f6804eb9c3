//! Frost guard predicate

/// Whether the outdoor temperature calls for frost protection
///
/// Frost is active only when a reading exists and is strictly below the
/// threshold. A missing outdoor sensor never activates the guard.
#[must_use]
pub fn is_frost_active(outdoor_temp: Option<f64>, threshold: f64) -> bool {
    outdoor_temp.is_some_and(|t| t < threshold)
}

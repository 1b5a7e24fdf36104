//! Azimuth arithmetic shared by the pointing drivers.

/// Convert between the device's west-of-south azimuth and the usual north-based one.
///
/// The conversion is its own inverse.
pub fn adjust_azimuth(azimuth: f64) -> f64 {
    (azimuth + 180.0).rem_euclid(360.0)
}

/// Shortest angular distance between two azimuths, in `0.0..=180.0`.
pub fn azimuth_distance(from: f64, to: f64) -> f64 {
    180.0 - ((to - from).rem_euclid(360.0) - 180.0).abs()
}

/// Whether `current` is within `tolerance` degrees of `target`, across the 0°/360° wrap.
pub fn has_arrived(current: f64, target: f64, tolerance: f64) -> bool {
    azimuth_distance(current, target) <= tolerance
}

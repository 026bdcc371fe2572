//! Great-circle distance on a spherical Earth

use crate::domain::types::Coordinate;
use std::f64::consts::PI;

/// Mean Earth radius used for all distance computations (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[inline]
fn deg2rad(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

/// Haversine distance between two coordinates in meters.
///
/// Inputs are expected to be finite degrees within range. Anything else yields a
/// meaningless number, never a panic.
///
/// ```
/// use metro_guardian::domain::geo::distance_m;
/// use metro_guardian::domain::types::Coordinate;
///
/// let a = Coordinate::new(28.6139, 77.2090);
/// assert_eq!(distance_m(&a, &a), 0.0);
/// ```
pub fn distance_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let dlat = deg2rad(b.latitude - a.latitude);
    let dlon = deg2rad(b.longitude - a.longitude);

    let rlat1 = deg2rad(a.latitude);
    let rlat2 = deg2rad(b.latitude);

    let sq = |x: f64| x * x;

    // h leaves [0, 1] only through rounding; clamp so the sqrt stays real
    let h = (sq((dlat / 2.0).sin()) + rlat1.cos() * rlat2.cos() * sq((dlon / 2.0).sin()))
        .clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Map link a caregiver can open to see where the rider last was
pub fn maps_link(coordinate: &Coordinate) -> String {
    format!("https://maps.google.com/?q={:.6},{:.6}", coordinate.latitude, coordinate.longitude)
}

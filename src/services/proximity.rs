//! Proximity evaluation with edge detection
//!
//! A rider is near when the straight-line distance to the destination is
//! within the alert radius (inclusive). Only the far-to-near edge matters to
//! the journey: staying near must not re-alert and drifting out must not
//! cancel anything.

/// Inclusive radius check
#[inline]
pub fn evaluate(distance_m: f64, radius_m: f64) -> bool {
    distance_m <= radius_m
}

/// What a new distance means relative to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityEdge {
    /// far -> near, and armed: start alerting
    Entered,
    /// near, and either was already near or the tracker is disarmed
    Inside,
    /// near -> far
    Exited,
    /// far, was far
    Outside,
}

/// Remembers the previous near/far state for one journey.
///
/// With a re-arm distance configured, `disarm()` suppresses further
/// `Entered` edges until a sample lands farther out than that distance.
#[derive(Debug, Clone)]
pub struct ProximityTracker {
    radius_m: f64,
    rearm_distance_m: Option<f64>,
    was_near: bool,
    armed: bool,
}

impl ProximityTracker {
    pub fn new(radius_m: f64, rearm_distance_m: Option<f64>) -> Self {
        Self { radius_m, rearm_distance_m, was_near: false, armed: true }
    }

    pub fn update(&mut self, distance_m: f64) -> ProximityEdge {
        if let Some(rearm) = self.rearm_distance_m {
            if !self.armed && distance_m > rearm {
                self.armed = true;
            }
        }

        let near = evaluate(distance_m, self.radius_m);
        let edge = match (self.was_near, near) {
            (false, true) if self.armed => ProximityEdge::Entered,
            (false, true) | (true, true) => ProximityEdge::Inside,
            (true, false) => ProximityEdge::Exited,
            (false, false) => ProximityEdge::Outside,
        };
        self.was_near = near;
        edge
    }

    /// Stop reporting `Entered` until the rider moves past the re-arm distance.
    /// No effect without a re-arm distance.
    pub fn disarm(&mut self) {
        if self.rearm_distance_m.is_some() {
            self.armed = false;
        }
    }

    pub fn is_near(&self) -> bool {
        self.was_near
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub fn reset(&mut self) {
        self.was_near = false;
        self.armed = true;
    }
}

//! Domain models - core journey types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Journey` - the live record of one ride towards a destination
//! - `Coordinate`, `Destination`, `PositionSample` - position data
//! - `CaregiverSelection` - who gets notified for this journey
//! - `geo` - great-circle distance

pub mod caregiver;
pub mod geo;
pub mod journey;
pub mod types;

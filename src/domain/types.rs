//! Shared types for the journey monitor

use serde::{Deserialize, Serialize};

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    #[inline]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5},{:.5}", self.latitude, self.longitude)
    }
}

/// Where the rider wants to get off. Fixed for the lifetime of a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    #[serde(default)]
    pub line: Option<String>,
    pub coordinate: Coordinate,
}

impl Destination {
    pub fn new(name: &str, coordinate: Coordinate) -> Self {
        Self { name: name.to_string(), line: None, coordinate }
    }

    pub fn with_line(mut self, line: &str) -> Self {
        self.line = Some(line.to_string());
        self
    }
}

/// A single fix from the position source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    /// Ground speed in meters per second
    #[serde(default)]
    pub speed_mps: Option<f64>,
    /// Fix timestamp (epoch ms)
    pub ts: u64,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, ts: u64) -> Self {
        Self { coordinate, accuracy_m: None, speed_mps: None, ts }
    }
}

/// Accuracy the position source is asked to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyHint {
    Low,
    #[default]
    Balanced,
    High,
    Highest,
}

impl AccuracyHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyHint::Low => "low",
            AccuracyHint::Balanced => "balanced",
            AccuracyHint::High => "high",
            AccuracyHint::Highest => "highest",
        }
    }
}

/// Why the position source cannot deliver fixes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no position fix yet")]
    NoFix,
    #[error("position source failed: {0}")]
    Source(String),
}

impl PositionError {
    pub fn as_str(&self) -> &str {
        match self {
            PositionError::PermissionDenied => "permission_denied",
            PositionError::NoFix => "no_fix",
            PositionError::Source(_) => "source_error",
        }
    }
}

/// Whether the journey currently has usable position data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionStatus {
    /// Subscribed, nothing received yet
    AwaitingFirstFix,
    /// Source reported a problem; waiting for it to recover
    Unavailable(PositionError),
    /// Last event from the source was a fix
    Live,
}

impl PositionStatus {
    pub fn is_awaiting_fix(&self) -> bool {
        !matches!(self, PositionStatus::Live)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PositionStatus::AwaitingFirstFix => "awaiting_fix",
            PositionStatus::Unavailable(e) => e.as_str(),
            PositionStatus::Live => "live",
        }
    }
}

/// Distance-derived proximity, except `Arrived` which only the rider can set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProximityState {
    Far,
    Near,
    Arrived,
}

impl ProximityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProximityState::Far => "far",
            ProximityState::Near => "near",
            ProximityState::Arrived => "arrived",
        }
    }
}

/// Lifecycle phase of the journey state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JourneyPhase {
    Idle,
    Tracking,
    Alerting,
    Arrived,
    Missed,
    EmergencySent,
}

impl JourneyPhase {
    /// Phases in which position updates and rider actions are accepted
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, JourneyPhase::Tracking | JourneyPhase::Alerting)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JourneyPhase::Arrived | JourneyPhase::Missed | JourneyPhase::EmergencySent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyPhase::Idle => "idle",
            JourneyPhase::Tracking => "tracking",
            JourneyPhase::Alerting => "alerting",
            JourneyPhase::Arrived => "arrived",
            JourneyPhase::Missed => "missed",
            JourneyPhase::EmergencySent => "emergency_sent",
        }
    }
}

impl std::fmt::Display for JourneyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Haptic pulse flavours understood by the actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HapticCategory {
    Light,
    Medium,
    Heavy,
    Success,
    Warning,
    Error,
}

impl HapticCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            HapticCategory::Light => "light",
            HapticCategory::Medium => "medium",
            HapticCategory::Heavy => "heavy",
            HapticCategory::Success => "success",
            HapticCategory::Warning => "warning",
            HapticCategory::Error => "error",
        }
    }
}

impl std::str::FromStr for HapticCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "light" => HapticCategory::Light,
            "medium" => HapticCategory::Medium,
            "heavy" => HapticCategory::Heavy,
            "success" => HapticCategory::Success,
            "warning" => HapticCategory::Warning,
            "error" => HapticCategory::Error,
            other => return Err(format!("unknown haptic category: {other}")),
        })
    }
}

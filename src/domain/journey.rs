//! Journey record for one ride towards a destination

use crate::domain::caregiver::CaregiverSelection;
use crate::domain::types::{
    Destination, JourneyPhase, PositionSample, PositionStatus, ProximityState,
};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Event types recorded in the journey log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JourneyEventType {
    Started,
    FirstFix,
    AwaitingFix,
    AlertingEntered,
    AlertExpired,
    Arrived,
    Missed,
    Emergency,
    Cancelled,
}

impl JourneyEventType {
    /// Convert to string representation for JSON serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyEventType::Started => "started",
            JourneyEventType::FirstFix => "first_fix",
            JourneyEventType::AwaitingFix => "awaiting_fix",
            JourneyEventType::AlertingEntered => "alerting",
            JourneyEventType::AlertExpired => "alert_expired",
            JourneyEventType::Arrived => "arrived",
            JourneyEventType::Missed => "missed",
            JourneyEventType::Emergency => "emergency",
            JourneyEventType::Cancelled => "cancelled",
        }
    }
}

/// A single event in a journey
#[derive(Debug, Clone)]
pub struct JourneyEvent {
    pub t: JourneyEventType,   // event type
    pub ts: u64,               // epoch ms
    pub extra: Option<String>, // additional data
}

impl JourneyEvent {
    pub fn new(event_type: JourneyEventType, ts: u64) -> Self {
        Self { t: event_type, ts, extra: None }
    }

    pub fn with_extra(mut self, extra: &str) -> Self {
        self.extra = Some(extra.to_string());
        self
    }

    fn to_json_value(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("t".to_string(), serde_json::Value::String(self.t.as_str().to_string()));
        obj.insert("ts".to_string(), serde_json::Value::Number(self.ts.into()));
        if let Some(x) = &self.extra {
            obj.insert("x".to_string(), serde_json::Value::String(x.clone()));
        }
        serde_json::Value::Object(obj)
    }
}

/// Live state of a journey, mutated only by the journey state machine
#[derive(Debug, Clone)]
pub struct Journey {
    pub jid: String, // UUIDv7 journey ID
    pub destination: Destination,
    pub caregivers: CaregiverSelection,
    pub phase: JourneyPhase,
    pub proximity: ProximityState,
    pub latest_sample: Option<PositionSample>,
    pub latest_distance_m: Option<f64>,
    pub position_status: PositionStatus,
    /// Number of FAR -> NEAR edges seen
    pub alert_entries: u32,
    /// Last alert session started for this journey
    pub alert_session_id: Option<u64>,
    pub started_at: u64,       // epoch ms
    pub ended_at: Option<u64>, // epoch ms
    pub events: Vec<JourneyEvent>,
}

impl Journey {
    /// Create a journey in the `Tracking` phase.
    ///
    /// # Example
    ///
    /// ```
    /// use metro_guardian::domain::caregiver::CaregiverSelection;
    /// use metro_guardian::domain::journey::Journey;
    /// use metro_guardian::domain::types::{Coordinate, Destination, JourneyPhase};
    ///
    /// let dest = Destination::new("Rajiv Chowk", Coordinate::new(28.6333, 77.2192));
    /// let journey = Journey::new(dest, CaregiverSelection::empty());
    /// assert_eq!(journey.phase, JourneyPhase::Tracking);
    /// assert!(journey.latest_sample.is_none());
    /// ```
    pub fn new(destination: Destination, caregivers: CaregiverSelection) -> Self {
        Self {
            jid: new_uuid_v7(),
            destination,
            caregivers,
            phase: JourneyPhase::Tracking,
            proximity: ProximityState::Far,
            latest_sample: None,
            latest_distance_m: None,
            position_status: PositionStatus::AwaitingFirstFix,
            alert_entries: 0,
            alert_session_id: None,
            started_at: epoch_ms(),
            ended_at: None,
            events: Vec::with_capacity(16),
        }
    }

    /// Add an event to the journey
    pub fn add_event(&mut self, event: JourneyEvent) {
        self.events.push(event);
    }

    /// Move to a final phase and stamp the end time
    pub fn complete(&mut self, phase: JourneyPhase) {
        self.phase = phase;
        self.ended_at = Some(epoch_ms());
    }

    /// Journey start as an RFC 3339 timestamp for messages
    pub fn started_at_rfc3339(&self) -> String {
        OffsetDateTime::from_unix_timestamp((self.started_at / 1000) as i64)
            .ok()
            .and_then(|dt| dt.format(&Rfc3339).ok())
            .unwrap_or_else(|| self.started_at.to_string())
    }

    /// Convert to short-key JSON string
    pub fn to_json(&self) -> String {
        let mut obj = serde_json::Map::new();

        obj.insert("jid".to_string(), serde_json::Value::String(self.jid.clone()));
        obj.insert("dest".to_string(), serde_json::Value::String(self.destination.name.clone()));
        obj.insert("out".to_string(), serde_json::Value::String(self.phase.as_str().to_string()));
        obj.insert("alerts".to_string(), serde_json::Value::Number(self.alert_entries.into()));
        obj.insert(
            "cg".to_string(),
            serde_json::Value::Number((self.caregivers.len() as u64).into()),
        );

        if let Some(d) = self.latest_distance_m {
            obj.insert("dist".to_string(), serde_json::json!((d * 10.0).round() / 10.0));
        }

        obj.insert("t0".to_string(), serde_json::Value::Number(self.started_at.into()));
        if let Some(ended) = self.ended_at {
            obj.insert("t1".to_string(), serde_json::Value::Number(ended.into()));
        }

        let events: Vec<serde_json::Value> =
            self.events.iter().map(|e| e.to_json_value()).collect();
        obj.insert("ev".to_string(), serde_json::Value::Array(events));

        serde_json::Value::Object(obj).to_string()
    }
}

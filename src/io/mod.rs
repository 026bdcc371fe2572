//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `position` - Position source interface and subscription handles
//! - `replay` - Recorded track playback
//! - `mqtt` - MQTT client receiving the rider's phone fixes
//! - `actuator` - Haptic output
//! - `dispatcher` - Caregiver notification delivery (log, webhook)
//! - `stations` - Station catalog
//! - `caregivers` - Caregiver directory
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod actuator;
pub mod caregivers;
pub mod dispatcher;
pub mod mqtt;
pub mod position;
pub mod prometheus;
pub mod replay;
pub mod stations;

// Re-export commonly used types
pub use actuator::{HapticActuator, LogActuator};
pub use caregivers::{CaregiverDirectory, StaticCaregiverDirectory};
pub use dispatcher::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
pub use mqtt::MqttPositionSource;
pub use position::{PositionSource, SubscribeOptions, Subscription};
pub use replay::ReplaySource;
pub use stations::{StaticStationCatalog, StationCatalog};

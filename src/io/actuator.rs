//! Haptic actuator interface
//!
//! The journey core only ever asks for a pulse of a given category. Whether
//! the device vibrates is the actuator's problem; errors come back as a
//! `Result` and callers log and move on.

use crate::domain::types::HapticCategory;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("haptics not supported on this device")]
    Unsupported,
    #[error("actuator unavailable: {0}")]
    Unavailable(String),
}

/// Physical vibration output
pub trait HapticActuator: Send + Sync {
    /// Fire one pulse. Must not block.
    fn pulse(&self, category: HapticCategory) -> Result<(), ActuatorError>;
}

/// Actuator that logs each pulse instead of vibrating
#[derive(Debug, Default)]
pub struct LogActuator;

impl HapticActuator for LogActuator {
    fn pulse(&self, category: HapticCategory) -> Result<(), ActuatorError> {
        info!(category = %category.as_str(), "haptic_pulse");
        Ok(())
    }
}

/// Actuator for hosts without haptics; every pulse fails
#[derive(Debug, Default)]
pub struct UnsupportedActuator;

impl HapticActuator for UnsupportedActuator {
    fn pulse(&self, _category: HapticCategory) -> Result<(), ActuatorError> {
        Err(ActuatorError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_actuator_accepts_all_categories() {
        let actuator = LogActuator;
        for category in [
            HapticCategory::Light,
            HapticCategory::Medium,
            HapticCategory::Heavy,
            HapticCategory::Success,
            HapticCategory::Warning,
            HapticCategory::Error,
        ] {
            assert!(actuator.pulse(category).is_ok());
        }
    }

    #[test]
    fn test_unsupported_actuator_fails() {
        assert_eq!(UnsupportedActuator.pulse(HapticCategory::Warning), Err(ActuatorError::Unsupported));
    }
}

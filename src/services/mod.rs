//! Services - journey logic and background workers
//!
//! This module contains the core business logic services:
//! - `journey` - Journey state machine and its event loop
//! - `proximity` - Alert radius check with edge detection
//! - `alert_scheduler` - Timed haptic alert sessions
//! - `notify_worker` - Async caregiver notification worker

pub mod alert_scheduler;
pub mod journey;
pub mod notify_worker;
pub mod proximity;

// Re-export commonly used types
pub use alert_scheduler::{AlertScheduler, AlertTiming};
pub use journey::{JourneyCommand, JourneyError, JourneyMachine, JourneyStatus};
pub use notify_worker::{create_notify_worker, NotifyCmd, NotifyWorker};

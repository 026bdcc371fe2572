//! Journey state machine and event loop
//!
//! The `JourneyMachine` owns the current journey and everything tied to it:
//! the proximity tracker, the alert scheduler and the position subscription.
//! It is driven by three inputs, handled one at a time to completion:
//! - rider commands (`JourneyCommand`)
//! - position events from the active subscription
//! - alert session expiry from the scheduler
//!
//! Handlers never await. Slow side effects (caregiver notification) are
//! handed to the notification worker over a channel.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::caregiver::CaregiverSelection;
use crate::domain::journey::Journey;
use crate::domain::types::{Destination, JourneyPhase, ProximityState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::actuator::HapticActuator;
use crate::io::position::{PositionSource, PositionUpdate, Subscription};
use crate::services::alert_scheduler::{AlertExpired, AlertScheduler, AlertTiming};
use crate::services::notify_worker::NotifyCmd;
use crate::services::proximity::{ProximityEdge, ProximityTracker};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Duration};
use tracing::{info, warn};

/// Position events buffered between a source and the journey loop
const POSITION_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JourneyError {
    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: JourneyPhase },
}

/// Result of feeding one fix to the machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Older than the latest accepted fix; ignored
    Stale,
    Evaluated { distance_m: f64, edge: ProximityEdge },
}

/// Snapshot of the machine for display and tests
#[derive(Debug, Clone, PartialEq)]
pub struct JourneyStatus {
    pub journey_id: Option<String>,
    pub phase: JourneyPhase,
    pub destination: Option<String>,
    pub proximity: Option<ProximityState>,
    pub distance_m: Option<f64>,
    pub position: Option<String>,
    pub alert_active: bool,
    pub alert_pulses: Option<u32>,
    pub alert_entries: u32,
    pub caregivers: usize,
}

#[derive(Debug)]
pub enum JourneyCommand {
    Start { destination: Destination, caregivers: CaregiverSelection },
    ConfirmArrived,
    ConfirmMissed,
    Emergency,
    Cancel,
    Status(oneshot::Sender<JourneyStatus>),
    Shutdown,
}

impl JourneyCommand {
    fn name(&self) -> &'static str {
        match self {
            JourneyCommand::Start { .. } => "start",
            JourneyCommand::ConfirmArrived => "arrived",
            JourneyCommand::ConfirmMissed => "missed",
            JourneyCommand::Emergency => "emergency",
            JourneyCommand::Cancel => "cancel",
            JourneyCommand::Status(_) => "status",
            JourneyCommand::Shutdown => "shutdown",
        }
    }
}

/// Receivers the run loop consumes besides rider commands
pub struct JourneyInputs {
    pub position_rx: mpsc::Receiver<PositionUpdate>,
    pub expired_rx: mpsc::UnboundedReceiver<AlertExpired>,
}

pub struct JourneyMachine {
    /// Application configuration
    pub(crate) config: Config,
    /// Current journey; `None` means idle
    pub(crate) journey: Option<Journey>,
    /// Edge detection for the current journey
    pub(crate) proximity: ProximityTracker,
    /// Alert sessions and one-shot haptic patterns
    pub(crate) scheduler: AlertScheduler,
    pub(crate) position_source: Arc<dyn PositionSource>,
    /// Cloned into each subscription's sink
    pub(crate) position_tx: mpsc::Sender<PositionUpdate>,
    pub(crate) subscription: Option<Subscription>,
    pub(crate) next_subscription_id: u64,
    /// Caregiver notifications, drained by the notify worker
    pub(crate) notify_tx: mpsc::UnboundedSender<NotifyCmd>,
    pub(crate) metrics: Arc<Metrics>,
}

impl JourneyMachine {
    pub fn new(
        config: Config,
        actuator: Arc<dyn HapticActuator>,
        position_source: Arc<dyn PositionSource>,
        notify_tx: mpsc::UnboundedSender<NotifyCmd>,
        metrics: Arc<Metrics>,
    ) -> (Self, JourneyInputs) {
        let (position_tx, position_rx) = mpsc::channel(POSITION_QUEUE_SIZE);
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();

        let scheduler =
            AlertScheduler::new(AlertTiming::from_config(&config), actuator, metrics.clone())
                .with_expiry_channel(expired_tx);
        let proximity = ProximityTracker::new(config.radius_m(), config.rearm_distance_m());

        let machine = Self {
            config,
            journey: None,
            proximity,
            scheduler,
            position_source,
            position_tx,
            subscription: None,
            next_subscription_id: 0,
            notify_tx,
            metrics,
        };
        (machine, JourneyInputs { position_rx, expired_rx })
    }

    pub fn phase(&self) -> JourneyPhase {
        self.journey.as_ref().map_or(JourneyPhase::Idle, |j| j.phase)
    }

    pub fn journey(&self) -> Option<&Journey> {
        self.journey.as_ref()
    }

    pub fn status(&self) -> JourneyStatus {
        let session = self.scheduler.active_session();
        match &self.journey {
            Some(j) => JourneyStatus {
                journey_id: Some(j.jid.clone()),
                phase: j.phase,
                destination: Some(j.destination.name.clone()),
                proximity: Some(j.proximity),
                distance_m: j.latest_distance_m,
                position: Some(j.position_status.as_str().to_string()),
                alert_active: session.is_some(),
                alert_pulses: session.map(|s| s.pulses),
                alert_entries: j.alert_entries,
                caregivers: j.caregivers.len(),
            },
            None => JourneyStatus {
                journey_id: None,
                phase: JourneyPhase::Idle,
                destination: None,
                proximity: None,
                distance_m: None,
                position: None,
                alert_active: false,
                alert_pulses: None,
                alert_entries: 0,
                caregivers: 0,
            },
        }
    }

    /// Run the machine until `Shutdown` or the command channel closes
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<JourneyCommand>, inputs: JourneyInputs) {
        let JourneyInputs { mut position_rx, mut expired_rx } = inputs;

        let period = Duration::from_secs(self.config.metrics_interval_secs().max(1));
        let mut metrics_interval = interval_at(tokio::time::Instant::now() + period, period);

        info!(
            radius_m = %self.config.radius_m(),
            rider = %self.config.rider_name(),
            "journey_loop_started"
        );

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(JourneyCommand::Shutdown) | None => break,
                        Some(cmd) => self.process_command(cmd),
                    }
                }
                Some(update) = position_rx.recv() => {
                    let start = Instant::now();
                    self.on_position(update);
                    self.metrics.record_event_processed(start.elapsed().as_micros() as u64);
                }
                Some(expired) = expired_rx.recv() => {
                    self.on_alert_expired(expired);
                }
                _ = metrics_interval.tick() => {
                    self.metrics.report().log();
                }
            }
        }

        self.shutdown();
        info!("journey_loop_stopped");
    }

    /// Apply one rider command, logging rejected ones
    pub fn process_command(&mut self, cmd: JourneyCommand) {
        let start = Instant::now();
        let name = cmd.name();

        let result = match cmd {
            JourneyCommand::Start { destination, caregivers } => {
                self.start_journey(destination, caregivers).map(|_| ())
            }
            JourneyCommand::ConfirmArrived => self.confirm_arrived(),
            JourneyCommand::ConfirmMissed => self.confirm_missed().map(|_| ()),
            JourneyCommand::Emergency => self.trigger_emergency().map(|_| ()),
            JourneyCommand::Cancel => self.cancel(),
            JourneyCommand::Status(reply) => {
                let _ = reply.send(self.status());
                Ok(())
            }
            JourneyCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!(command = %name, error = %e, "journey_command_rejected");
        }
        self.metrics.record_event_processed(start.elapsed().as_micros() as u64);
    }

    /// Stop timers and the subscription without touching the journey record
    fn shutdown(&mut self) {
        self.scheduler.stop();
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        if let Some(j) = self.journey.as_ref().filter(|j| j.phase.is_active()) {
            warn!(journey_id = %j.jid, phase = %j.phase, "journey_abandoned_on_shutdown");
        }
    }
}

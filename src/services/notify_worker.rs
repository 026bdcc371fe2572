//! Notification worker - delivers caregiver messages off the journey loop
//!
//! The journey machine enqueues one `NotifyCmd` per recipient and returns
//! immediately; the worker performs the (possibly slow) dispatch. The queue is
//! unbounded: a journey escalates at most once, so it holds at most one
//! message per selected caregiver. Failures are logged and counted, never retried.

use crate::domain::caregiver::Caregiver;
use crate::infra::metrics::Metrics;
use crate::io::dispatcher::NotificationDispatcher;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Why caregivers are being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Missed,
    Emergency,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Missed => "missed",
            NotifyKind::Emergency => "emergency",
        }
    }

    /// Message body for this escalation
    pub fn compose(&self, rider: &str, destination: &str, started_at: &str) -> String {
        match self {
            NotifyKind::Missed => format!(
                "{} missed the stop {} (journey started {})",
                rider, destination, started_at
            ),
            NotifyKind::Emergency => format!(
                "EMERGENCY: {} needs help on the way to {} (journey started {})",
                rider, destination, started_at
            ),
        }
    }
}

/// One message to one caregiver
#[derive(Debug, Clone)]
pub struct NotifyCmd {
    pub journey_id: String,
    pub kind: NotifyKind,
    pub contact: Caregiver,
    pub message: String,
    pub location_link: Option<String>,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

pub struct NotifyWorker {
    dispatcher: Arc<dyn NotificationDispatcher>,
    cmd_rx: mpsc::UnboundedReceiver<NotifyCmd>,
    metrics: Arc<Metrics>,
}

impl NotifyWorker {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        cmd_rx: mpsc::UnboundedReceiver<NotifyCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { dispatcher, cmd_rx, metrics }
    }

    /// Run the worker, processing commands until the channel closes
    pub async fn run(mut self) {
        info!("notify_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;

            let send_start = Instant::now();
            let result = self
                .dispatcher
                .notify(&cmd.contact, &cmd.message, cmd.location_link.as_deref())
                .await;
            let send_us = send_start.elapsed().as_micros() as u64;

            match &result {
                Ok(()) => info!(
                    journey_id = %cmd.journey_id,
                    kind = %cmd.kind.as_str(),
                    caregiver_id = %cmd.contact.id,
                    queue_delay_us = %queue_delay_us,
                    send_us = %send_us,
                    "notification_sent"
                ),
                Err(e) => error!(
                    journey_id = %cmd.journey_id,
                    kind = %cmd.kind.as_str(),
                    caregiver_id = %cmd.contact.id,
                    error = %format!("{:#}", e),
                    "notification_failed"
                ),
            }
            self.metrics.record_notification_result(result.is_ok(), queue_delay_us);

            if queue_delay_us > 1_000_000 {
                warn!(
                    journey_id = %cmd.journey_id,
                    queue_delay_us = %queue_delay_us,
                    "notify_queue_delay_high"
                );
            }
        }

        info!("notify_worker_stopped");
    }
}

/// Create a notification channel and worker
///
/// Returns the sender (for the journey machine) and the worker (to be spawned)
pub fn create_notify_worker(
    dispatcher: Arc<dyn NotificationDispatcher>,
    metrics: Arc<Metrics>,
) -> (mpsc::UnboundedSender<NotifyCmd>, NotifyWorker) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let worker = NotifyWorker::new(dispatcher, cmd_rx, metrics);
    (cmd_tx, worker)
}

//! Alert scheduler - timed haptic pulses for one approach
//!
//! A session pulses `warning` every `pulse_interval` (first pulse one
//! interval after start) and ends on its own after `session_duration`.
//! With the defaults that is 5 pulses at 3, 6, 9, 12 and 15 seconds.
//!
//! Each session is a single spawned task selecting over the pulse ticker and
//! the expiry deadline. `stop()` flips the session's cancel flag and aborts
//! the task, so once it returns no further pulse from that session fires.

use crate::domain::types::HapticCategory;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::actuator::HapticActuator;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTiming {
    pub pulse_interval: Duration,
    pub session_duration: Duration,
}

impl AlertTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pulse_interval: config.pulse_interval(),
            session_duration: config.session_duration(),
        }
    }
}

impl Default for AlertTiming {
    fn default() -> Self {
        Self { pulse_interval: Duration::from_secs(3), session_duration: Duration::from_secs(15) }
    }
}

/// Sent when a session runs to its duration cap without being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertExpired {
    pub session_id: u64,
    pub pulses: u32,
}

/// Read-only view of the running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertSessionSnapshot {
    pub id: u64,
    pub started_at: Instant,
    pub pulses: u32,
    pub cancelled: bool,
}

struct AlertSession {
    id: u64,
    started_at: Instant,
    pulses: Arc<AtomicU32>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Fire one pulse, absorbing actuator failures
fn fire_pulse(
    actuator: &dyn HapticActuator,
    metrics: &Metrics,
    category: HapticCategory,
    session_id: Option<u64>,
) -> bool {
    match actuator.pulse(category) {
        Ok(()) => {
            metrics.record_pulse(true);
            true
        }
        Err(e) => {
            metrics.record_pulse(false);
            debug!(
                category = %category.as_str(),
                session_id = ?session_id,
                error = %e,
                "haptic_pulse_failed"
            );
            false
        }
    }
}

pub struct AlertScheduler {
    timing: AlertTiming,
    actuator: Arc<dyn HapticActuator>,
    metrics: Arc<Metrics>,
    expired_tx: Option<mpsc::UnboundedSender<AlertExpired>>,
    session: Option<AlertSession>,
    next_session_id: u64,
}

impl AlertScheduler {
    pub fn new(
        timing: AlertTiming,
        actuator: Arc<dyn HapticActuator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { timing, actuator, metrics, expired_tx: None, session: None, next_session_id: 0 }
    }

    /// Report session expiry on this channel
    pub fn with_expiry_channel(mut self, tx: mpsc::UnboundedSender<AlertExpired>) -> Self {
        self.expired_tx = Some(tx);
        self
    }

    pub fn timing(&self) -> AlertTiming {
        self.timing
    }

    /// Begin a session. Returns the new session id, or `None` if one is
    /// already running (the running session is left untouched).
    pub fn start(&mut self) -> Option<u64> {
        if let Some(session) = &self.session {
            if !session.task.is_finished() {
                debug!(session_id = %session.id, "alert_session_already_active");
                return None;
            }
        }
        self.session = None;

        self.next_session_id += 1;
        let id = self.next_session_id;
        let started_at = Instant::now();
        let pulses = Arc::new(AtomicU32::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_session(
            id,
            started_at,
            self.timing,
            self.actuator.clone(),
            self.metrics.clone(),
            pulses.clone(),
            cancelled.clone(),
            self.expired_tx.clone(),
        ));

        self.metrics.record_alert_started();
        info!(
            session_id = %id,
            interval_ms = %self.timing.pulse_interval.as_millis(),
            duration_ms = %self.timing.session_duration.as_millis(),
            "alert_session_started"
        );

        self.session = Some(AlertSession { id, started_at, pulses, cancelled, task });
        Some(id)
    }

    /// End the running session immediately. Safe to call at any time;
    /// returns `true` only if a running session was stopped.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        let was_running = !session.task.is_finished();
        session.cancelled.store(true, Ordering::Relaxed);
        session.task.abort();

        if was_running {
            self.metrics.record_alert_stopped();
            info!(
                session_id = %session.id,
                pulses = %session.pulses.load(Ordering::Relaxed),
                "alert_session_stopped"
            );
        }
        was_running
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.task.is_finished())
    }

    pub fn active_session(&self) -> Option<AlertSessionSnapshot> {
        self.session.as_ref().filter(|s| !s.task.is_finished()).map(|s| AlertSessionSnapshot {
            id: s.id,
            started_at: s.started_at,
            pulses: s.pulses.load(Ordering::Relaxed),
            cancelled: s.cancelled.load(Ordering::Relaxed),
        })
    }

    /// One-shot pattern outside any session: `count` pulses `gap` apart.
    /// The first pulse fires before this returns.
    pub fn pulse_pattern(&self, category: HapticCategory, count: u32, gap: Duration) {
        if count == 0 {
            return;
        }
        fire_pulse(self.actuator.as_ref(), &self.metrics, category, None);
        if count == 1 {
            return;
        }

        let actuator = self.actuator.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            for _ in 1..count {
                tokio::time::sleep(gap).await;
                fire_pulse(actuator.as_ref(), &metrics, category, None);
            }
        });
    }
}

impl Drop for AlertScheduler {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancelled.store(true, Ordering::Relaxed);
            session.task.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    id: u64,
    started_at: Instant,
    timing: AlertTiming,
    actuator: Arc<dyn HapticActuator>,
    metrics: Arc<Metrics>,
    pulses: Arc<AtomicU32>,
    cancelled: Arc<AtomicBool>,
    expired_tx: Option<mpsc::UnboundedSender<AlertExpired>>,
) {
    let mut ticker = interval_at(started_at + timing.pulse_interval, timing.pulse_interval);
    let expiry = sleep_until(started_at + timing.session_duration);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            // A pulse due at the same instant as expiry still fires
            biased;
            _ = ticker.tick() => {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                fire_pulse(actuator.as_ref(), &metrics, HapticCategory::Warning, Some(id));
                pulses.fetch_add(1, Ordering::Relaxed);
            }
            _ = &mut expiry => break,
        }
    }

    if cancelled.load(Ordering::Relaxed) {
        return;
    }

    let pulses = pulses.load(Ordering::Relaxed);
    metrics.record_alert_expired();
    info!(session_id = %id, pulses = %pulses, "alert_session_expired");

    if let Some(tx) = expired_tx {
        if tx.send(AlertExpired { session_id: id, pulses }).is_err() {
            warn!(session_id = %id, "alert_expiry_receiver_gone");
        }
    }
}

//! Position source interface
//!
//! A source pushes `PositionEvent`s into a `PositionSink` until the returned
//! `Subscription` is unsubscribed or dropped. Every event is tagged with the
//! subscription id so the journey loop can discard stragglers from a
//! subscription it already tore down.

use crate::domain::geo::distance_m;
use crate::domain::types::{AccuracyHint, PositionError, PositionSample};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// What the journey asks the source for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubscribeOptions {
    pub accuracy_hint: AccuracyHint,
    /// Suppress fixes closer than this to the last delivered one
    pub min_distance_m: f64,
    /// Suppress fixes sooner than this after the last delivered one
    pub min_interval_ms: u64,
}

impl SubscribeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accuracy_hint: config.accuracy_hint(),
            min_distance_m: config.min_distance_m(),
            min_interval_ms: config.min_interval_ms(),
        }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { accuracy_hint: AccuracyHint::Balanced, min_distance_m: 5.0, min_interval_ms: 3000 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Fix(PositionSample),
    Unavailable(PositionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub subscription_id: u64,
    pub event: PositionEvent,
}

/// Sending half handed to a position source
#[derive(Clone)]
pub struct PositionSink {
    subscription_id: u64,
    tx: mpsc::Sender<PositionUpdate>,
    metrics: Arc<Metrics>,
}

impl PositionSink {
    pub fn new(
        subscription_id: u64,
        tx: mpsc::Sender<PositionUpdate>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { subscription_id, tx, metrics }
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Push an event without blocking the source.
    ///
    /// Returns `false` once the receiving side is gone; the source should
    /// stop producing. A full queue drops the event.
    pub fn send(&self, event: PositionEvent) -> bool {
        let update = PositionUpdate { subscription_id: self.subscription_id, event };
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_position_event_dropped();
                warn!(
                    subscription_id = %self.subscription_id,
                    "position_event_dropped: channel full"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle to a running subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    pub fn new(id: u64, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { id, cancel: Mutex::new(Some(Box::new(cancel))) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivery. Returns `true` only for the call that actually stopped it.
    pub fn unsubscribe(&self) -> bool {
        let cancel = self.cancel.lock().take();
        match cancel {
            Some(cancel) => {
                cancel();
                debug!(subscription_id = %self.id, "position_unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Something that produces position fixes
pub trait PositionSource: Send + Sync {
    /// Start delivering events into `sink`. Must be called inside a tokio runtime.
    fn subscribe(
        &self,
        sink: PositionSink,
        opts: &SubscribeOptions,
    ) -> Result<Subscription, PositionError>;
}

/// Drops fixes that are too close in time and space to the last delivered one
#[derive(Debug)]
pub struct FixThrottler {
    min_distance_m: f64,
    min_interval_ms: u64,
    last: Option<PositionSample>,
}

impl FixThrottler {
    pub fn new(opts: &SubscribeOptions) -> Self {
        Self {
            min_distance_m: opts.min_distance_m,
            min_interval_ms: opts.min_interval_ms,
            last: None,
        }
    }

    /// Returns true if the sample should be delivered, and remembers it if so.
    ///
    /// A fix passes when it is at least `min_interval_ms` newer and at least
    /// `min_distance_m` away from the last delivered fix.
    pub fn should_emit(&mut self, sample: &PositionSample) -> bool {
        if let Some(last) = &self.last {
            let elapsed = sample.ts.saturating_sub(last.ts);
            if elapsed < self.min_interval_ms {
                return false;
            }
            if distance_m(&last.coordinate, &sample.coordinate) < self.min_distance_m {
                return false;
            }
        }
        self.last = Some(*sample);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Coordinate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ~1 m of latitude
    const DEG_PER_M: f64 = 1.0 / 111_194.93;

    fn sample_at(north_m: f64, ts: u64) -> PositionSample {
        PositionSample::new(Coordinate::new(28.6 + north_m * DEG_PER_M, 77.2), ts)
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = Subscription::new(7, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        {
            let _sub = Subscription::new(1, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sink_tags_and_reports_closed() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = PositionSink::new(3, tx, Arc::new(Metrics::new()));

        assert!(sink.send(PositionEvent::Unavailable(PositionError::NoFix)));
        let update = rx.try_recv().unwrap();
        assert_eq!(update.subscription_id, 3);
        assert_eq!(update.event, PositionEvent::Unavailable(PositionError::NoFix));

        drop(rx);
        assert!(!sink.send(PositionEvent::Unavailable(PositionError::NoFix)));
    }

    #[test]
    fn test_sink_full_drops_event() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Arc::new(Metrics::new());
        let sink = PositionSink::new(1, tx, metrics.clone());

        assert!(sink.send(PositionEvent::Unavailable(PositionError::NoFix)));
        assert!(sink.send(PositionEvent::Unavailable(PositionError::NoFix)));
        assert_eq!(metrics.report().position_events_dropped, 1);
    }

    #[test]
    fn test_throttler_requires_time_and_distance() {
        let opts = SubscribeOptions { min_distance_m: 5.0, min_interval_ms: 3000, ..Default::default() };
        let mut throttler = FixThrottler::new(&opts);

        assert!(throttler.should_emit(&sample_at(0.0, 0)));
        // too soon
        assert!(!throttler.should_emit(&sample_at(50.0, 1000)));
        // late enough but barely moved
        assert!(!throttler.should_emit(&sample_at(1.0, 4000)));
        assert!(throttler.should_emit(&sample_at(20.0, 4000)));
        // measured from the last delivered fix
        assert!(!throttler.should_emit(&sample_at(22.0, 8000)));
        assert!(throttler.should_emit(&sample_at(30.0, 8000)));
    }

    #[test]
    fn test_throttler_zero_limits_pass_everything() {
        let opts = SubscribeOptions { min_distance_m: 0.0, min_interval_ms: 0, ..Default::default() };
        let mut throttler = FixThrottler::new(&opts);
        for i in 0..5 {
            assert!(throttler.should_emit(&sample_at(0.0, i)));
        }
    }
}

use super::*;
use crate::domain::caregiver::{Caregiver, CaregiverId};
use crate::domain::geo::maps_link;
use crate::domain::types::{
    Coordinate, HapticCategory, PositionError, PositionSample, PositionStatus,
};
use crate::io::actuator::ActuatorError;
use crate::io::position::{PositionEvent, PositionSink, SubscribeOptions};
use crate::services::notify_worker::NotifyKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// ~1 m of latitude on a 6371 km sphere
const DEG_PER_M: f64 = 1.0 / 111_194.93;

const CENTRAL: Coordinate = Coordinate::new(28.6139, 77.2090);

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct RecordingActuator {
    pulses: Mutex<Vec<(HapticCategory, tokio::time::Instant)>>,
}

impl RecordingActuator {
    fn categories(&self) -> Vec<HapticCategory> {
        self.pulses.lock().iter().map(|(c, _)| *c).collect()
    }

    fn count_of(&self, category: HapticCategory) -> usize {
        self.pulses.lock().iter().filter(|(c, _)| *c == category).count()
    }
}

impl HapticActuator for RecordingActuator {
    fn pulse(&self, category: HapticCategory) -> Result<(), ActuatorError> {
        self.pulses.lock().push((category, tokio::time::Instant::now()));
        Ok(())
    }
}

/// Position source the test pushes events through by hand
#[derive(Default)]
struct ManualSource {
    sinks: Mutex<Vec<PositionSink>>,
    unsubscribed: Arc<AtomicUsize>,
    fail_with: Option<PositionError>,
    last_opts: Mutex<Option<SubscribeOptions>>,
}

impl ManualSource {
    fn failing(error: PositionError) -> Self {
        Self { fail_with: Some(error), ..Default::default() }
    }

    fn subscriptions(&self) -> usize {
        self.sinks.lock().len()
    }

    fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    fn push(&self, event: PositionEvent) {
        if let Some(sink) = self.sinks.lock().last() {
            sink.send(event);
        }
    }
}

impl PositionSource for ManualSource {
    fn subscribe(
        &self,
        sink: PositionSink,
        opts: &SubscribeOptions,
    ) -> Result<Subscription, PositionError> {
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        let id = sink.subscription_id();
        self.sinks.lock().push(sink);
        *self.last_opts.lock() = Some(*opts);
        let unsubscribed = self.unsubscribed.clone();
        Ok(Subscription::new(id, move || {
            unsubscribed.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct TestMachine {
    machine: JourneyMachine,
    inputs: JourneyInputs,
    notify_rx: mpsc::UnboundedReceiver<NotifyCmd>,
    actuator: Arc<RecordingActuator>,
    source: Arc<ManualSource>,
    metrics: Arc<Metrics>,
}

impl TestMachine {
    fn new() -> Self {
        Self::with(Config::default(), ManualSource::default())
    }

    fn with(config: Config, source: ManualSource) -> Self {
        let actuator = Arc::new(RecordingActuator::default());
        let source = Arc::new(source);
        let metrics = Arc::new(Metrics::new());
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (machine, inputs) =
            JourneyMachine::new(config, actuator.clone(), source.clone(), notify_tx, metrics.clone());
        Self { machine, inputs, notify_rx, actuator, source, metrics }
    }

    fn start(&mut self) -> String {
        self.start_with(CaregiverSelection::empty())
    }

    fn start_with(&mut self, caregivers: CaregiverSelection) -> String {
        self.machine.start_journey(central_station(), caregivers).unwrap()
    }

    /// Feed a fix `meters` north of the destination
    fn feed(&mut self, meters: f64, ts: u64) -> SampleOutcome {
        self.machine.on_position_update(sample_at(meters, ts)).unwrap()
    }

    fn drain_notifications(&mut self) -> Vec<NotifyCmd> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.notify_rx.try_recv() {
            out.push(cmd);
        }
        out
    }
}

fn central_station() -> Destination {
    Destination::new("Central Station", CENTRAL)
}

fn sample_at(meters: f64, ts: u64) -> PositionSample {
    PositionSample::new(Coordinate::new(CENTRAL.latitude + meters * DEG_PER_M, CENTRAL.longitude), ts)
}

fn family() -> Vec<Caregiver> {
    vec![
        Caregiver::new(1000, "Mom", "+911111111111", "mother"),
        Caregiver::new(1001, "Dad", "+912222222222", "father"),
    ]
}

fn family_selection(ad_hoc: Option<&str>) -> CaregiverSelection {
    CaregiverSelection::snapshot(&family(), &[CaregiverId(1000), CaregiverId(1001)], ad_hoc)
}

// ============================================================================
// Proximity and alerting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_approach_alerts_on_third_sample_only() {
    let mut t = TestMachine::new();
    t.start();
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);

    t.feed(500.0, 1);
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    t.feed(120.0, 2);
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    assert!(!t.machine.scheduler.is_active());

    let outcome = t.feed(45.0, 3);
    assert!(matches!(outcome, SampleOutcome::Evaluated { edge: ProximityEdge::Entered, .. }));
    assert_eq!(t.machine.phase(), JourneyPhase::Alerting);
    assert!(t.machine.scheduler.is_active());
    assert_eq!(t.metrics.report().alert_sessions_started, 1);

    let status = t.machine.status();
    assert_eq!(status.proximity, Some(ProximityState::Near));
    assert!(status.alert_active);
    assert!((status.distance_m.unwrap() - 45.0).abs() < 0.5);
}

#[tokio::test(start_paused = true)]
async fn test_edge_trigger_sequence() {
    let mut t = TestMachine::new();
    t.start();

    let distances = [200.0, 80.0, 40.0, 40.0, 40.0, 60.0, 30.0];
    let mut entered = Vec::new();
    for (i, d) in distances.into_iter().enumerate() {
        if let SampleOutcome::Evaluated { edge: ProximityEdge::Entered, .. } = t.feed(d, i as u64) {
            entered.push(i);
        }
    }

    assert_eq!(entered, vec![2, 6]);
    assert_eq!(t.machine.journey().unwrap().alert_entries, 2);
    // The first session was still running at the second entry
    assert_eq!(t.metrics.report().alert_sessions_started, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drifting_out_does_not_cancel_session() {
    let mut t = TestMachine::new();
    t.start();
    t.feed(40.0, 1);
    t.feed(300.0, 2);

    assert_eq!(t.machine.phase(), JourneyPhase::Alerting);
    assert!(t.machine.scheduler.is_active());
    assert_eq!(t.machine.status().proximity, Some(ProximityState::Far));

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(t.actuator.count_of(HapticCategory::Warning), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stale_sample_is_ignored() {
    let mut t = TestMachine::new();
    t.start();
    t.feed(200.0, 2000);

    assert_eq!(t.feed(40.0, 1000), SampleOutcome::Stale);
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    assert!(!t.machine.scheduler.is_active());
    assert_eq!(t.metrics.report().stale_samples_total, 1);

    // Same timestamp is not stale
    assert!(matches!(t.feed(40.0, 2000), SampleOutcome::Evaluated { .. }));
    assert_eq!(t.machine.phase(), JourneyPhase::Alerting);
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_stays_alerting_and_can_realert() {
    let mut t = TestMachine::new();
    t.start();
    t.feed(40.0, 1);

    let expired = t.inputs.expired_rx.recv().await.unwrap();
    assert_eq!(expired.pulses, 5);
    t.machine.on_alert_expired(expired);
    assert_eq!(t.machine.phase(), JourneyPhase::Alerting);

    // No re-arm distance: leaving and re-entering alerts again
    t.feed(60.0, 2);
    t.feed(40.0, 3);
    assert!(t.machine.scheduler.is_active());
    assert_eq!(t.metrics.report().alert_sessions_started, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rearm_distance_after_expiry() {
    let config = Config::default().with_rearm_distance_m(Some(150.0));
    let mut t = TestMachine::with(config, ManualSource::default());
    t.start();
    t.feed(40.0, 1);

    let expired = t.inputs.expired_rx.recv().await.unwrap();
    t.machine.on_alert_expired(expired);

    // Jitter around the radius does not re-alert
    t.feed(70.0, 2);
    assert!(matches!(t.feed(40.0, 3), SampleOutcome::Evaluated { edge: ProximityEdge::Inside, .. }));
    assert!(!t.machine.scheduler.is_active());

    t.feed(200.0, 4);
    assert!(matches!(t.feed(40.0, 5), SampleOutcome::Evaluated { edge: ProximityEdge::Entered, .. }));
    assert!(t.machine.scheduler.is_active());
    assert_eq!(t.machine.journey().unwrap().alert_session_id, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_of_old_session_is_ignored() {
    let mut t = TestMachine::new();
    t.start();
    t.feed(40.0, 1);

    t.machine.on_alert_expired(AlertExpired { session_id: 99, pulses: 5 });
    let events = &t.machine.journey().unwrap().events;
    assert!(events.iter().all(|e| e.t != crate::domain::journey::JourneyEventType::AlertExpired));
}

// ============================================================================
// Position availability
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_awaiting_fix_keeps_tracking() {
    let mut t = TestMachine::new();
    t.start();
    assert_eq!(t.machine.status().position.as_deref(), Some("awaiting_fix"));

    t.machine.on_position_unavailable(PositionError::PermissionDenied).unwrap();
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    assert_eq!(
        t.machine.journey().unwrap().position_status,
        PositionStatus::Unavailable(PositionError::PermissionDenied)
    );
    assert!(t.machine.journey().unwrap().latest_distance_m.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    assert!(t.actuator.categories().is_empty());

    t.feed(300.0, 1);
    assert_eq!(t.machine.journey().unwrap().position_status, PositionStatus::Live);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_is_not_fatal() {
    let mut t = TestMachine::with(Config::default(), ManualSource::failing(PositionError::PermissionDenied));
    t.start();

    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    assert_eq!(t.machine.status().position.as_deref(), Some("permission_denied"));
    assert!(t.machine.subscription.is_none());

    // Rider actions still work
    t.machine.confirm_arrived().unwrap();
    assert_eq!(t.machine.phase(), JourneyPhase::Arrived);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_uses_configured_options() {
    let mut t = TestMachine::new();
    t.start();

    let opts = (*t.source.last_opts.lock()).unwrap();
    assert_eq!(opts, SubscribeOptions::from_config(&Config::default()));
}

#[tokio::test(start_paused = true)]
async fn test_on_position_filters_old_subscriptions() {
    let mut t = TestMachine::new();
    t.start();
    let current = t.machine.subscription.as_ref().unwrap().id();

    t.machine.on_position(PositionUpdate {
        subscription_id: current + 100,
        event: PositionEvent::Fix(sample_at(10.0, 1)),
    });
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);

    t.source.push(PositionEvent::Fix(sample_at(10.0, 2)));
    let update = t.inputs.position_rx.recv().await.unwrap();
    t.machine.on_position(update);
    assert_eq!(t.machine.phase(), JourneyPhase::Alerting);
}

// ============================================================================
// Rider actions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_confirm_arrived_is_terminal() {
    let mut t = TestMachine::new();
    t.start();
    t.feed(40.0, 1);

    t.machine.confirm_arrived().unwrap();
    assert_eq!(t.machine.phase(), JourneyPhase::Arrived);
    assert_eq!(t.machine.status().proximity, Some(ProximityState::Arrived));
    assert!(!t.machine.scheduler.is_active());
    assert_eq!(t.source.unsubscribed(), 1);

    // Later fixes change nothing and schedule nothing
    assert!(t.machine.on_position_update(sample_at(500.0, 2)).is_err());
    assert!(t.machine.on_position_update(sample_at(10.0, 3)).is_err());
    assert_eq!(t.machine.status().proximity, Some(ProximityState::Arrived));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(t.actuator.categories(), vec![HapticCategory::Success]);
    assert_eq!(t.metrics.report().alert_sessions_started, 1);
    assert!(t.drain_notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_confirm_missed_notifies_each_recipient() {
    let mut t = TestMachine::new();
    t.start_with(family_selection(Some("+919999999999")));
    t.feed(40.0, 1);

    let queued = t.machine.confirm_missed().unwrap();
    assert_eq!(queued, 3);
    assert_eq!(t.machine.phase(), JourneyPhase::Missed);

    let sent = t.drain_notifications();
    assert_eq!(sent.len(), 3);
    let started = t.machine.journey().unwrap().started_at_rfc3339();
    for cmd in &sent {
        assert_eq!(cmd.kind, NotifyKind::Missed);
        assert!(cmd.message.contains("Central Station"));
        assert!(cmd.message.contains(&started));
    }
    let phones: Vec<&str> = sent.iter().map(|c| c.contact.phone.as_str()).collect();
    assert_eq!(phones, vec!["+911111111111", "+912222222222", "+919999999999"]);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(t.actuator.categories(), vec![HapticCategory::Error]);
    assert!(t.machine.on_position_update(sample_at(10.0, 2)).is_err());
    assert_eq!(t.source.unsubscribed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_large_selection_queues_every_recipient() {
    let directory: Vec<Caregiver> = (1..=70)
        .map(|i| {
            Caregiver::new(1000 + i, &format!("Contact {}", i), &format!("+91{:010}", i), "friend")
        })
        .collect();
    let ids: Vec<CaregiverId> = directory.iter().map(|c| c.id).collect();
    let selection = CaregiverSelection::snapshot(&directory, &ids, Some("+919999999999"));

    let mut t = TestMachine::new();
    t.start_with(selection);

    // Nothing drains the queue while the handler runs
    assert_eq!(t.machine.trigger_emergency().unwrap(), 71);
    let sent = t.drain_notifications();
    assert_eq!(sent.len(), 71);
    assert_eq!(sent[70].contact.phone, "+919999999999");

    let summary = t.metrics.report();
    assert_eq!(summary.notifications_enqueued, 71);
    assert_eq!(summary.notifications_dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_escalation_counts_drops_when_worker_is_gone() {
    let mut t = TestMachine::new();
    t.start_with(family_selection(None));
    t.notify_rx.close();

    assert_eq!(t.machine.confirm_missed().unwrap(), 0);
    assert_eq!(t.machine.phase(), JourneyPhase::Missed);
    assert_eq!(t.metrics.report().notifications_dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_missed_without_caregivers_sends_nothing() {
    let mut t = TestMachine::new();
    t.start();

    assert_eq!(t.machine.confirm_missed().unwrap(), 0);
    assert!(t.drain_notifications().is_empty());
    assert_eq!(t.machine.phase(), JourneyPhase::Missed);
}

#[tokio::test(start_paused = true)]
async fn test_notifications_carry_location_link() {
    let mut t = TestMachine::new();
    t.start_with(family_selection(None));
    t.feed(120.0, 1);
    t.machine.confirm_missed().unwrap();

    let expected = maps_link(&sample_at(120.0, 1).coordinate);
    for cmd in t.drain_notifications() {
        assert_eq!(cmd.location_link.as_deref(), Some(expected.as_str()));
    }

    let config = Config::default().with_location_links(false);
    let mut t = TestMachine::with(config, ManualSource::default());
    t.start_with(family_selection(None));
    t.feed(120.0, 1);
    t.machine.confirm_missed().unwrap();
    assert!(t.drain_notifications().iter().all(|c| c.location_link.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_from_tracking() {
    let mut t = TestMachine::new();
    t.start_with(family_selection(None));
    t.feed(2000.0, 1);

    let start = tokio::time::Instant::now();
    assert_eq!(t.machine.trigger_emergency().unwrap(), 2);
    assert_eq!(t.machine.phase(), JourneyPhase::EmergencySent);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let pulses = t.actuator.pulses.lock().clone();
    assert_eq!(pulses.len(), 2);
    assert!(pulses.iter().all(|(c, _)| *c == HapticCategory::Error));
    assert_eq!(pulses[0].1 - start, Duration::ZERO);
    assert_eq!(pulses[1].1 - start, Duration::from_millis(300));

    let sent = t.drain_notifications();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|c| c.kind == NotifyKind::Emergency && c.message.starts_with("EMERGENCY")));

    // Terminal: a second emergency is rejected
    assert!(t.machine.trigger_emergency().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_emergency_while_alerting_stops_session() {
    let mut t = TestMachine::new();
    t.start();
    t.feed(40.0, 1);
    t.machine.trigger_emergency().unwrap();

    assert!(!t.machine.scheduler.is_active());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(t.actuator.count_of(HapticCategory::Warning), 0);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_while_idle_is_rejected() {
    let mut t = TestMachine::new();

    let err = t.machine.trigger_emergency().unwrap_err();
    assert_eq!(
        err,
        JourneyError::InvalidTransition { action: "trigger emergency", phase: JourneyPhase::Idle }
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(t.actuator.categories().is_empty());
    assert!(t.drain_notifications().is_empty());
    assert_eq!(t.metrics.report().invalid_transitions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_actions_rejected_while_idle() {
    let mut t = TestMachine::new();
    assert!(t.machine.confirm_arrived().is_err());
    assert!(t.machine.confirm_missed().is_err());
    assert!(t.machine.cancel().is_err());
    assert!(t.machine.on_position_update(sample_at(10.0, 1)).is_err());
    assert_eq!(t.machine.phase(), JourneyPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_returns_to_idle_quietly() {
    let mut t = TestMachine::new();
    t.start_with(family_selection(Some("+919999999999")));
    t.feed(40.0, 1);

    t.machine.cancel().unwrap();
    assert_eq!(t.machine.phase(), JourneyPhase::Idle);
    assert!(t.machine.journey().is_none());
    assert!(!t.machine.scheduler.is_active());
    assert_eq!(t.source.unsubscribed(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(t.actuator.categories().is_empty());
    assert!(t.drain_notifications().is_empty());
    assert!(t.machine.cancel().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_start_rejected_while_active_allowed_after_terminal() {
    let mut t = TestMachine::new();
    let first = t.start();

    let err = t.machine.start_journey(central_station(), CaregiverSelection::empty()).unwrap_err();
    assert_eq!(err, JourneyError::InvalidTransition { action: "start", phase: JourneyPhase::Tracking });

    t.machine.confirm_arrived().unwrap();
    let second = t.start();
    assert_ne!(first, second);
    assert_eq!(t.machine.phase(), JourneyPhase::Tracking);
    assert_eq!(t.source.subscriptions(), 2);
    assert_eq!(t.machine.journey().unwrap().alert_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_process_command_and_status() {
    let mut t = TestMachine::new();
    t.machine.process_command(JourneyCommand::Start {
        destination: central_station(),
        caregivers: family_selection(None),
    });

    let (tx, rx) = oneshot::channel();
    t.machine.process_command(JourneyCommand::Status(tx));
    let status = rx.await.unwrap();
    assert_eq!(status.phase, JourneyPhase::Tracking);
    assert_eq!(status.destination.as_deref(), Some("Central Station"));
    assert_eq!(status.caregivers, 2);

    // Rejected commands are logged, not fatal
    t.machine.process_command(JourneyCommand::Start {
        destination: central_station(),
        caregivers: CaregiverSelection::empty(),
    });
    t.machine.process_command(JourneyCommand::ConfirmMissed);
    assert_eq!(t.machine.phase(), JourneyPhase::Missed);
    assert_eq!(t.drain_notifications().len(), 2);
}

//! Journey operations
//!
//! Each operation checks the phase first and rejects with
//! `JourneyError::InvalidTransition` without touching any state.

use super::{JourneyError, JourneyMachine, SampleOutcome};
use crate::domain::caregiver::CaregiverSelection;
use crate::domain::geo::{distance_m, maps_link};
use crate::domain::journey::{epoch_ms, Journey, JourneyEvent, JourneyEventType};
use crate::domain::types::{
    Destination, HapticCategory, JourneyPhase, PositionError, PositionSample, PositionStatus,
    ProximityState,
};
use crate::infra::metrics::OutcomeKind;
use crate::io::position::{PositionEvent, PositionSink, PositionUpdate, SubscribeOptions};
use crate::services::alert_scheduler::AlertExpired;
use crate::services::notify_worker::{NotifyCmd, NotifyKind};
use crate::services::proximity::{ProximityEdge, ProximityTracker};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

impl JourneyMachine {
    fn require_active(&self, action: &'static str) -> Result<(), JourneyError> {
        let phase = self.phase();
        if phase.is_active() {
            Ok(())
        } else {
            self.metrics.record_invalid_transition();
            Err(JourneyError::InvalidTransition { action, phase })
        }
    }

    /// Begin a journey towards `destination`.
    ///
    /// Allowed when idle or after a finished journey (which it replaces).
    /// A failed subscription does not fail the start: the journey tracks
    /// with the position reported as unavailable.
    pub fn start_journey(
        &mut self,
        destination: Destination,
        caregivers: CaregiverSelection,
    ) -> Result<String, JourneyError> {
        let phase = self.phase();
        if phase.is_active() {
            self.metrics.record_invalid_transition();
            return Err(JourneyError::InvalidTransition { action: "start", phase });
        }

        self.scheduler.stop();
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.proximity =
            ProximityTracker::new(self.config.radius_m(), self.config.rearm_distance_m());

        let mut journey = Journey::new(destination, caregivers);
        journey.add_event(
            JourneyEvent::new(JourneyEventType::Started, journey.started_at)
                .with_extra(&journey.destination.name),
        );

        self.next_subscription_id += 1;
        let sink = PositionSink::new(
            self.next_subscription_id,
            self.position_tx.clone(),
            self.metrics.clone(),
        );
        match self.position_source.subscribe(sink, &SubscribeOptions::from_config(&self.config)) {
            Ok(sub) => self.subscription = Some(sub),
            Err(e) => {
                warn!(journey_id = %journey.jid, error = %e, "position_subscribe_failed");
                self.metrics.record_fix_unavailable();
                let event = JourneyEvent::new(JourneyEventType::AwaitingFix, epoch_ms());
                journey.add_event(event.with_extra(e.as_str()));
                journey.position_status = PositionStatus::Unavailable(e);
            }
        }

        info!(
            journey_id = %journey.jid,
            destination = %journey.destination.name,
            target = %journey.destination.coordinate,
            radius_m = %self.config.radius_m(),
            caregivers = %journey.caregivers.len(),
            "journey_started"
        );
        self.metrics.record_journey_started();

        let jid = journey.jid.clone();
        self.journey = Some(journey);
        Ok(jid)
    }

    /// Route an event from the position channel
    pub fn on_position(&mut self, update: PositionUpdate) {
        if self.subscription.as_ref().map(|s| s.id()) != Some(update.subscription_id) {
            debug!(subscription_id = %update.subscription_id, "position_from_old_subscription");
            return;
        }

        let result = match update.event {
            PositionEvent::Fix(sample) => self.on_position_update(sample).map(|_| ()),
            PositionEvent::Unavailable(reason) => self.on_position_unavailable(reason),
        };
        if let Err(e) = result {
            debug!(error = %e, "position_event_ignored");
        }
    }

    /// Evaluate one fix against the destination
    pub fn on_position_update(
        &mut self,
        sample: PositionSample,
    ) -> Result<SampleOutcome, JourneyError> {
        let phase = self.phase();
        let Some(journey) = self.journey.as_mut().filter(|j| j.phase.is_active()) else {
            return Err(JourneyError::InvalidTransition { action: "position_update", phase });
        };

        if journey.latest_sample.is_some_and(|last| sample.ts < last.ts) {
            self.metrics.record_stale_sample();
            debug!(journey_id = %journey.jid, ts = %sample.ts, "stale_sample_ignored");
            return Ok(SampleOutcome::Stale);
        }
        self.metrics.record_sample();

        if journey.position_status != PositionStatus::Live {
            info!(
                journey_id = %journey.jid,
                accuracy_m = ?sample.accuracy_m,
                "position_fix_acquired"
            );
            journey.add_event(JourneyEvent::new(JourneyEventType::FirstFix, epoch_ms()));
            journey.position_status = PositionStatus::Live;
        }

        let distance = distance_m(&sample.coordinate, &journey.destination.coordinate);
        journey.latest_sample = Some(sample);
        journey.latest_distance_m = Some(distance);

        let edge = self.proximity.update(distance);
        journey.proximity =
            if self.proximity.is_near() { ProximityState::Near } else { ProximityState::Far };

        if edge == ProximityEdge::Entered {
            journey.alert_entries += 1;
            journey.phase = JourneyPhase::Alerting;
            journey.add_event(
                JourneyEvent::new(JourneyEventType::AlertingEntered, epoch_ms())
                    .with_extra(&format!("dist_m={:.1}", distance)),
            );
            if let Some(session_id) = self.scheduler.start() {
                journey.alert_session_id = Some(session_id);
            }
            info!(
                journey_id = %journey.jid,
                distance_m = %format!("{:.1}", distance),
                entries = %journey.alert_entries,
                "destination_near"
            );
        } else {
            debug!(
                journey_id = %journey.jid,
                distance_m = %format!("{:.1}", distance),
                edge = ?edge,
                "position_evaluated"
            );
        }

        Ok(SampleOutcome::Evaluated { distance_m: distance, edge })
    }

    /// Record that the source cannot deliver fixes. Never changes phase.
    pub fn on_position_unavailable(&mut self, reason: PositionError) -> Result<(), JourneyError> {
        let phase = self.phase();
        let Some(journey) = self.journey.as_mut().filter(|j| j.phase.is_active()) else {
            return Err(JourneyError::InvalidTransition { action: "position_unavailable", phase });
        };

        self.metrics.record_fix_unavailable();
        let status = PositionStatus::Unavailable(reason.clone());
        if journey.position_status != status {
            warn!(journey_id = %journey.jid, reason = %reason, "awaiting_position_fix");
            let event = JourneyEvent::new(JourneyEventType::AwaitingFix, epoch_ms());
            journey.add_event(event.with_extra(reason.as_str()));
            journey.position_status = status;
        }
        Ok(())
    }

    /// Scheduler reports a session ran to its cap
    pub fn on_alert_expired(&mut self, expired: AlertExpired) {
        let Some(journey) = self.journey.as_mut() else {
            return;
        };
        if !journey.phase.is_active() || journey.alert_session_id != Some(expired.session_id) {
            debug!(session_id = %expired.session_id, "alert_expiry_ignored");
            return;
        }

        journey.add_event(
            JourneyEvent::new(JourneyEventType::AlertExpired, epoch_ms())
                .with_extra(&format!("pulses={}", expired.pulses)),
        );
        self.proximity.disarm();
        let rearm_required = !self.proximity.is_armed();
        info!(
            journey_id = %journey.jid,
            session_id = %expired.session_id,
            pulses = %expired.pulses,
            rearm_required = %rearm_required,
            "alert_expired"
        );
    }

    /// Rider confirms they got off at the destination
    pub fn confirm_arrived(&mut self) -> Result<(), JourneyError> {
        self.require_active("confirm arrival")?;

        self.scheduler.stop();
        self.scheduler.pulse_pattern(HapticCategory::Success, 1, Duration::ZERO);
        if let Some(journey) = self.journey.as_mut() {
            journey.proximity = ProximityState::Arrived;
        }
        self.finish(JourneyPhase::Arrived, JourneyEventType::Arrived, OutcomeKind::Arrived);
        Ok(())
    }

    /// Rider says they missed the stop. Returns the number of notifications queued.
    pub fn confirm_missed(&mut self) -> Result<usize, JourneyError> {
        self.require_active("confirm missed stop")?;

        self.scheduler.stop();
        self.scheduler.pulse_pattern(HapticCategory::Error, 1, Duration::ZERO);
        let queued = self.escalate(NotifyKind::Missed);
        self.finish(JourneyPhase::Missed, JourneyEventType::Missed, OutcomeKind::Missed);
        Ok(queued)
    }

    /// Rider asks for help. Returns the number of notifications queued.
    pub fn trigger_emergency(&mut self) -> Result<usize, JourneyError> {
        self.require_active("trigger emergency")?;

        self.scheduler.stop();
        self.scheduler.pulse_pattern(HapticCategory::Error, 2, self.config.emergency_gap());
        let queued = self.escalate(NotifyKind::Emergency);
        self.finish(
            JourneyPhase::EmergencySent,
            JourneyEventType::Emergency,
            OutcomeKind::Emergency,
        );
        Ok(queued)
    }

    /// Abandon the journey without notifying anyone
    pub fn cancel(&mut self) -> Result<(), JourneyError> {
        self.require_active("cancel")?;

        self.scheduler.stop();
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        if let Some(mut journey) = self.journey.take() {
            journey.add_event(JourneyEvent::new(JourneyEventType::Cancelled, epoch_ms()));
            journey.complete(JourneyPhase::Idle);
            info!(journey_id = %journey.jid, summary = %journey.to_json(), "journey_cancelled");
        }
        self.metrics.record_journey_outcome(OutcomeKind::Cancelled);
        Ok(())
    }

    /// Queue one message per recipient in the journey's selection
    fn escalate(&mut self, kind: NotifyKind) -> usize {
        let Some(journey) = self.journey.as_ref() else {
            return 0;
        };

        let message = kind.compose(
            self.config.rider_name(),
            &journey.destination.name,
            &journey.started_at_rfc3339(),
        );
        let location_link = if self.config.location_links() {
            journey.latest_sample.map(|s| maps_link(&s.coordinate))
        } else {
            None
        };

        let recipients = journey.caregivers.recipients();
        if recipients.is_empty() {
            warn!(journey_id = %journey.jid, kind = %kind.as_str(), "no_caregivers_selected");
        }

        let mut queued = 0;
        for contact in recipients {
            let caregiver_id = contact.id;
            let cmd = NotifyCmd {
                journey_id: journey.jid.clone(),
                kind,
                contact,
                message: message.clone(),
                location_link: location_link.clone(),
                enqueued_at: Instant::now(),
            };
            if self.notify_tx.send(cmd).is_ok() {
                self.metrics.record_notification_enqueued();
                queued += 1;
            } else {
                self.metrics.record_notification_dropped();
                error!(
                    journey_id = %journey.jid,
                    caregiver_id = %caregiver_id,
                    "notification_worker_gone"
                );
            }
        }

        info!(
            journey_id = %journey.jid,
            kind = %kind.as_str(),
            queued = %queued,
            "caregivers_notified"
        );
        queued
    }

    /// Enter a terminal phase: drop the subscription and log the summary
    fn finish(&mut self, phase: JourneyPhase, event: JourneyEventType, outcome: OutcomeKind) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        if let Some(journey) = self.journey.as_mut() {
            journey.add_event(JourneyEvent::new(event, epoch_ms()));
            journey.complete(phase);
            info!(
                journey_id = %journey.jid,
                outcome = %phase,
                summary = %journey.to_json(),
                "journey_completed"
            );
        }
        self.metrics.record_journey_outcome(outcome);
    }
}

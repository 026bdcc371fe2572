//! Replay position source
//!
//! Plays back a recorded track (JSON lines) with the recorded gaps between
//! fixes, scaled by a speed factor. Each line is either a fix
//! `{"ts":1000,"lat":28.61,"lon":77.20,"accuracy":8.0,"speed":11.2}` or an
//! outage `{"ts":4000,"unavailable":"no_fix"}`.

use crate::domain::types::{Coordinate, PositionError, PositionSample};
use crate::io::position::{
    FixThrottler, PositionEvent, PositionSink, PositionSource, SubscribeOptions, Subscription,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    ts: u64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    unavailable: Option<String>,
}

/// Parse a reason string as written in track files and MQTT payloads
pub fn parse_position_error(reason: &str) -> PositionError {
    match reason {
        "permission_denied" => PositionError::PermissionDenied,
        "no_fix" => PositionError::NoFix,
        other => PositionError::Source(other.to_string()),
    }
}

/// One step of a recorded track
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    /// Recorded time (epoch ms or relative ms)
    pub ts: u64,
    pub event: PositionEvent,
}

impl ReplayStep {
    pub fn fix(sample: PositionSample) -> Self {
        Self { ts: sample.ts, event: PositionEvent::Fix(sample) }
    }

    pub fn unavailable(ts: u64, reason: PositionError) -> Self {
        Self { ts, event: PositionEvent::Unavailable(reason) }
    }
}

/// Parse a JSON lines track. Blank lines and `#` comments are skipped.
pub fn parse_track(content: &str) -> Result<Vec<ReplayStep>, PositionError> {
    let mut steps = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: ReplayRecord = serde_json::from_str(line).map_err(|e| {
            PositionError::Source(format!("track line {}: {}", lineno + 1, e))
        })?;

        if let Some(reason) = record.unavailable {
            steps.push(ReplayStep::unavailable(record.ts, parse_position_error(&reason)));
            continue;
        }

        let (Some(lat), Some(lon)) = (record.lat, record.lon) else {
            return Err(PositionError::Source(format!(
                "track line {}: fix without lat/lon",
                lineno + 1
            )));
        };

        steps.push(ReplayStep::fix(PositionSample {
            coordinate: Coordinate::new(lat, lon),
            accuracy_m: record.accuracy,
            speed_mps: record.speed,
            ts: record.ts,
        }));
    }

    Ok(steps)
}

enum Track {
    File(PathBuf),
    Steps(Vec<ReplayStep>),
}

pub struct ReplaySource {
    track: Track,
    speed: f64,
}

impl ReplaySource {
    /// Replay a track file; the file is read when a journey subscribes
    pub fn from_file<P: AsRef<Path>>(path: P, speed: f64) -> Self {
        Self { track: Track::File(path.as_ref().to_path_buf()), speed }
    }

    pub fn from_steps(steps: Vec<ReplayStep>, speed: f64) -> Self {
        Self { track: Track::Steps(steps), speed }
    }

    fn load(&self) -> Result<Vec<ReplayStep>, PositionError> {
        match &self.track {
            Track::File(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    PositionError::Source(format!("cannot read {}: {}", path.display(), e))
                })?;
                parse_track(&content)
            }
            Track::Steps(steps) => Ok(steps.clone()),
        }
    }

    /// Real-time gap between two recorded timestamps
    fn gap(&self, from_ts: u64, to_ts: u64) -> Duration {
        let recorded = Duration::from_millis(to_ts.saturating_sub(from_ts));
        if self.speed > 0.0 {
            recorded.div_f64(self.speed)
        } else {
            Duration::ZERO
        }
    }
}

impl PositionSource for ReplaySource {
    fn subscribe(
        &self,
        sink: PositionSink,
        opts: &SubscribeOptions,
    ) -> Result<Subscription, PositionError> {
        let steps = self.load()?;
        let gaps: Vec<Duration> = steps
            .iter()
            .scan(None, |prev: &mut Option<u64>, step| {
                let gap = prev.map_or(Duration::ZERO, |p| self.gap(p, step.ts));
                *prev = Some(step.ts);
                Some(gap)
            })
            .collect();

        let subscription_id = sink.subscription_id();
        let mut throttler = FixThrottler::new(opts);
        info!(
            subscription_id = %subscription_id,
            steps = %steps.len(),
            speed = %self.speed,
            accuracy = %opts.accuracy_hint.as_str(),
            "replay_started"
        );

        let handle = tokio::spawn(async move {
            for (step, gap) in steps.into_iter().zip(gaps) {
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
                if let PositionEvent::Fix(sample) = &step.event {
                    if !throttler.should_emit(sample) {
                        debug!(ts = %sample.ts, "replay_fix_throttled");
                        continue;
                    }
                }
                if !sink.send(step.event) {
                    warn!(subscription_id = %subscription_id, "replay_sink_closed");
                    return;
                }
            }
            info!(subscription_id = %subscription_id, "replay_finished");
        });

        Ok(Subscription::new(subscription_id, move || handle.abort()))
    }
}

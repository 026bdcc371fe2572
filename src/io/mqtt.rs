//! MQTT position source
//!
//! Subscribes to a topic carrying the rider's phone fixes as JSON:
//! `{"lat":28.61,"lon":77.20,"accuracy":8.0,"speed":10.5,"ts":1736012340000}`
//! (`ts` may also be an RFC 3339 string). A phone that lost its fix or its
//! location permission publishes `{"error":"no_fix"}` /
//! `{"error":"permission_denied"}` instead.

use crate::domain::journey::epoch_ms;
use crate::domain::types::{Coordinate, PositionError, PositionSample};
use crate::infra::config::Config;
use crate::io::position::{
    FixThrottler, PositionEvent, PositionSink, PositionSource, SubscribeOptions, Subscription,
};
use crate::io::replay::parse_position_error;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimestampValue {
    EpochMs(u64),
    IsoString(String),
}

#[derive(Debug, Deserialize)]
struct FixPayload {
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    ts: Option<TimestampValue>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse ISO 8601 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as u64)
}

/// Parse one MQTT payload. Missing timestamps are stamped with receive time.
pub fn parse_position_payload(json_str: &str, received_ms: u64) -> Option<PositionEvent> {
    let payload: FixPayload = match serde_json::from_str(json_str) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "Failed to parse position payload");
            return None;
        }
    };

    if let Some(reason) = payload.error {
        return Some(PositionEvent::Unavailable(parse_position_error(&reason)));
    }

    let (Some(lat), Some(lon)) = (payload.lat, payload.lon) else {
        debug!("position payload without lat/lon");
        return None;
    };

    let ts = match payload.ts {
        Some(TimestampValue::EpochMs(ms)) => ms,
        Some(TimestampValue::IsoString(s)) => parse_iso_time(&s).unwrap_or(received_ms),
        None => received_ms,
    };

    Some(PositionEvent::Fix(PositionSample {
        coordinate: Coordinate::new(lat, lon),
        accuracy_m: payload.accuracy,
        speed_mps: payload.speed,
        ts,
    }))
}

pub struct MqttPositionSource {
    host: String,
    port: u16,
    topic: String,
    credentials: Option<(String, String)>,
}

impl MqttPositionSource {
    pub fn new(config: &Config) -> Self {
        let credentials = match (config.mqtt_username(), config.mqtt_password()) {
            (Some(u), Some(p)) => Some((u.to_string(), p.to_string())),
            _ => None,
        };
        Self {
            host: config.mqtt_host().to_string(),
            port: config.mqtt_port(),
            topic: config.mqtt_topic().to_string(),
            credentials,
        }
    }
}

impl PositionSource for MqttPositionSource {
    fn subscribe(
        &self,
        sink: PositionSink,
        opts: &SubscribeOptions,
    ) -> Result<Subscription, PositionError> {
        let subscription_id = sink.subscription_id();
        let client_id = format!("metro-guardian-{}", subscription_id);
        let mut mqttoptions = MqttOptions::new(client_id, self.host.as_str(), self.port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        if let Some((username, password)) = &self.credentials {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        client
            .try_subscribe(self.topic.as_str(), QoS::AtMostOnce)
            .map_err(|e| PositionError::Source(format!("mqtt subscribe failed: {}", e)))?;

        info!(
            subscription_id = %subscription_id,
            topic = %self.topic,
            host = %self.host,
            port = %self.port,
            accuracy = %opts.accuracy_hint.as_str(),
            "mqtt_position_subscribed"
        );

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut throttler = FixThrottler::new(opts);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        let _ = client.try_disconnect();
                        info!(subscription_id = %subscription_id, "mqtt_position_stopped");
                        return;
                    }
                    result = eventloop.poll() => {
                        match result {
                            Ok(Event::Incoming(Packet::Publish(publish))) => {
                                let Ok(json_str) = std::str::from_utf8(&publish.payload) else {
                                    warn!("Invalid UTF-8 in MQTT payload");
                                    continue;
                                };
                                let parsed = parse_position_payload(json_str, epoch_ms());
                                let Some(event) = parsed else {
                                    continue;
                                };
                                if let PositionEvent::Fix(sample) = &event {
                                    if !throttler.should_emit(sample) {
                                        continue;
                                    }
                                }
                                if !sink.send(event) {
                                    warn!(subscription_id = %subscription_id, "mqtt_sink_closed");
                                    return;
                                }
                            }
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                info!("MQTT connected");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                error!(error = %e, "MQTT error");
                                let reason = PositionError::Source(e.to_string());
                                if !sink.send(PositionEvent::Unavailable(reason)) {
                                    return;
                                }
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(subscription_id, move || {
            let _ = stop_tx.send(true);
        }))
    }
}

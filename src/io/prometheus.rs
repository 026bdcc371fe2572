//! Prometheus metrics HTTP endpoint
//!
//! Exposes journey metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with rider label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    rider: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{rider=\"{rider}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    rider: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{rider=\"{rider}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{rider=\"{rider}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{rider=\"{rider}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{rider=\"{rider}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, rider: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_event_metrics(&mut output, rider, &summary);
    write_alert_metrics(&mut output, rider, &summary);
    write_notification_metrics(&mut output, rider, &summary);
    write_journey_metrics(&mut output, rider, &summary);

    output
}

fn write_event_metrics(output: &mut String, rider: &str, summary: &MetricsSummary) {
    use MetricType::Counter;

    write_metric(
        output,
        "guardian_events_total",
        "Events handled by the journey loop",
        Counter,
        rider,
        summary.events_total,
    );
    write_histogram(
        output,
        "guardian_event_latency_us",
        "Journey event handling latency in microseconds",
        rider,
        &summary.lat_buckets,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "guardian_samples_total",
        "Position fixes evaluated",
        Counter,
        rider,
        summary.samples_total,
    );
    write_metric(
        output,
        "guardian_stale_samples_total",
        "Out-of-order fixes ignored",
        Counter,
        rider,
        summary.stale_samples_total,
    );
    write_metric(
        output,
        "guardian_fix_unavailable_total",
        "Position unavailable reports",
        Counter,
        rider,
        summary.fix_unavailable_total,
    );
    write_metric(
        output,
        "guardian_position_events_dropped_total",
        "Position events dropped on a full queue",
        Counter,
        rider,
        summary.position_events_dropped,
    );
}

fn write_alert_metrics(output: &mut String, rider: &str, summary: &MetricsSummary) {
    use MetricType::Counter;

    write_metric(
        output,
        "guardian_alert_sessions_started_total",
        "Alert sessions started",
        Counter,
        rider,
        summary.alert_sessions_started,
    );
    write_metric(
        output,
        "guardian_alert_sessions_expired_total",
        "Alert sessions that ran to their cap",
        Counter,
        rider,
        summary.alert_sessions_expired,
    );
    write_metric(
        output,
        "guardian_alert_sessions_stopped_total",
        "Alert sessions stopped early",
        Counter,
        rider,
        summary.alert_sessions_stopped,
    );
    write_metric(
        output,
        "guardian_pulses_total",
        "Haptic pulses delivered",
        Counter,
        rider,
        summary.pulses_sent,
    );
    write_metric(
        output,
        "guardian_pulses_failed_total",
        "Haptic pulses the actuator rejected",
        Counter,
        rider,
        summary.pulses_failed,
    );
}

fn write_notification_metrics(output: &mut String, rider: &str, summary: &MetricsSummary) {
    use MetricType::{Counter, Gauge};

    write_metric(
        output,
        "guardian_notifications_enqueued_total",
        "Caregiver notifications queued",
        Counter,
        rider,
        summary.notifications_enqueued,
    );
    write_metric(
        output,
        "guardian_notifications_dropped_total",
        "Notifications dropped on a full queue",
        Counter,
        rider,
        summary.notifications_dropped,
    );
    write_metric(
        output,
        "guardian_notifications_sent_total",
        "Notifications delivered",
        Counter,
        rider,
        summary.notifications_sent,
    );
    write_metric(
        output,
        "guardian_notifications_failed_total",
        "Notifications the dispatcher failed",
        Counter,
        rider,
        summary.notifications_failed,
    );
    write_metric(
        output,
        "guardian_notify_queue_delay_max_us",
        "Longest wait in the notification queue",
        Gauge,
        rider,
        summary.notify_queue_delay_max_us,
    );
}

fn write_journey_metrics(output: &mut String, rider: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP guardian_journeys_total Journeys by outcome");
    let _ = writeln!(output, "# TYPE guardian_journeys_total counter");
    for (outcome, val) in [
        ("started", summary.journeys_started),
        ("arrived", summary.journeys_arrived),
        ("missed", summary.journeys_missed),
        ("emergency", summary.journeys_emergency),
        ("cancelled", summary.journeys_cancelled),
    ] {
        let _ = writeln!(
            output,
            "guardian_journeys_total{{rider=\"{rider}\",outcome=\"{outcome}\"}} {val}"
        );
    }
    write_metric(
        output,
        "guardian_invalid_transitions_total",
        "Rider actions rejected for the current phase",
        MetricType::Counter,
        rider,
        summary.invalid_transitions,
    );
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    rider: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &rider),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    rider: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let rider = Arc::new(rider);

    info!(port = %port, rider = %rider, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let rider = rider.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), rider.clone())
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

//! Metro guardian - journey monitoring and stop proximity alerts for metro riders
//!
//! Watches the rider's position on the way to a destination station, vibrates
//! when the stop is near and escalates to caregivers when the rider misses it
//! or asks for help.
//!
//! Module structure:
//! - `domain/` - Core types (Journey, Coordinate, Caregiver selection, geo)
//! - `io/` - External interfaces (position sources, haptics, dispatchers, catalog)
//! - `services/` - Journey state machine, alert scheduler, notification worker
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use metro_guardian::domain::caregiver::{CaregiverId, CaregiverSelection};
use metro_guardian::infra::{Config, Metrics, NotifyMode, PositionSourceKind};
use metro_guardian::io::{
    CaregiverDirectory, HapticActuator, LogActuator, LogDispatcher, MqttPositionSource,
    NotificationDispatcher, PositionSource, ReplaySource, StaticCaregiverDirectory,
    StaticStationCatalog, StationCatalog, WebhookDispatcher,
};
use metro_guardian::services::{create_notify_worker, JourneyCommand, JourneyMachine};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Metro guardian - stop proximity alerts and caregiver escalation
#[derive(Parser, Debug)]
#[command(name = "metro-guardian", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Destination station (name or catalog index); starts a journey right away
    #[arg(short, long)]
    destination: Option<String>,

    /// Caregiver id to notify (repeatable)
    #[arg(long = "caregiver")]
    caregivers: Vec<u32>,

    /// Extra phone number to notify for this journey only
    #[arg(long)]
    custom_phone: Option<String>,

    /// Print the station catalog and exit
    #[arg(long)]
    list_stations: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-fix evaluation logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());
    let catalog = StaticStationCatalog::from_config(&config);

    if args.list_stations {
        for (i, station) in catalog.iter().enumerate() {
            println!(
                "{:>3}  {:<24} {:<8} {:.4},{:.4}",
                i, station.name, station.line, station.latitude, station.longitude
            );
        }
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        "metro-guardian starting"
    );
    info!(
        config_file = %config.config_file(),
        rider = %config.rider_name(),
        radius_m = %config.radius_m(),
        pulse_interval_ms = %config.pulse_interval().as_millis(),
        session_duration_ms = %config.session_duration().as_millis(),
        rearm_distance_m = ?config.rearm_distance_m(),
        position_source = ?config.position_source(),
        notify_mode = ?config.notify_mode(),
        stations = %catalog.len(),
        caregivers = %config.caregivers().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let rider = config.rider_name().to_string();
        tokio::spawn(async move {
            if let Err(e) = metro_guardian::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                rider,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Notification worker: dispatch happens off the journey loop, queue is unbounded
    let dispatcher: Arc<dyn NotificationDispatcher> = match config.notify_mode() {
        NotifyMode::Log => Arc::new(LogDispatcher),
        NotifyMode::Webhook => match WebhookDispatcher::new(&config) {
            Ok(webhook) => {
                info!(url = %webhook.url(), "webhook_dispatcher_ready");
                Arc::new(webhook)
            }
            Err(e) => {
                warn!(
                    error = %format!("{:#}", e),
                    "webhook_dispatcher_unavailable: notifications go to the log"
                );
                Arc::new(LogDispatcher)
            }
        },
    };
    let (notify_tx, notify_worker) = create_notify_worker(dispatcher, metrics.clone());
    let notify_handle = tokio::spawn(notify_worker.run());

    let position_source: Arc<dyn PositionSource> = match config.position_source() {
        PositionSourceKind::Replay => {
            Arc::new(ReplaySource::from_file(config.replay_file(), config.replay_speed()))
        }
        PositionSourceKind::Mqtt => Arc::new(MqttPositionSource::new(&config)),
    };
    let actuator: Arc<dyn HapticActuator> = Arc::new(LogActuator);
    let directory = StaticCaregiverDirectory::from_config(&config);

    let (machine, inputs) =
        JourneyMachine::new(config.clone(), actuator, position_source, notify_tx, metrics.clone());
    let (cmd_tx, cmd_rx) = mpsc::channel(32);

    let selected: Vec<CaregiverId> = args.caregivers.iter().copied().map(CaregiverId).collect();

    if let Some(name) = &args.destination {
        let destination = catalog
            .resolve(name)
            .with_context(|| format!("Unknown destination station '{}'", name))?;
        let caregivers = CaregiverSelection::snapshot(
            &directory.list_selectable(),
            &selected,
            args.custom_phone.as_deref(),
        );
        cmd_tx.send(JourneyCommand::Start { destination, caregivers }).await?;
    }

    // Rider actions from stdin, one per line
    let stdin_tx = cmd_tx.clone();
    let custom_phone = args.custom_phone.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
            let cmd = match word {
                "" => continue,
                "arrived" => JourneyCommand::ConfirmArrived,
                "missed" => JourneyCommand::ConfirmMissed,
                "emergency" | "sos" => JourneyCommand::Emergency,
                "cancel" => JourneyCommand::Cancel,
                "quit" => JourneyCommand::Shutdown,
                "start" => match catalog.resolve(rest) {
                    Some(destination) => {
                        let caregivers = CaregiverSelection::snapshot(
                            &directory.list_selectable(),
                            &selected,
                            custom_phone.as_deref(),
                        );
                        JourneyCommand::Start { destination, caregivers }
                    }
                    None => {
                        warn!(station = %rest, "unknown_station");
                        continue;
                    }
                },
                "status" => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    if stdin_tx.send(JourneyCommand::Status(reply_tx)).await.is_err() {
                        break;
                    }
                    if let Ok(status) = reply_rx.await {
                        info!(
                            phase = %status.phase,
                            destination = ?status.destination,
                            distance_m = ?status.distance_m.map(|d| d.round()),
                            position = ?status.position,
                            alert_active = %status.alert_active,
                            alert_pulses = ?status.alert_pulses,
                            "journey_status"
                        );
                    }
                    continue;
                }
                other => {
                    warn!(
                        input = %other,
                        "unknown_command: use start <station>|arrived|missed|emergency|cancel|status|quit"
                    );
                    continue;
                }
            };
            if stdin_tx.send(cmd).await.is_err() {
                break;
            }
        }
    });

    // Ctrl-C abandons any journey in progress and stops the loop
    let signal_tx = cmd_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown_requested");
            let _ = signal_tx.send(JourneyCommand::Cancel).await;
            let _ = signal_tx.send(JourneyCommand::Shutdown).await;
        }
    });

    machine.run(cmd_rx, inputs).await;

    // Journey loop owned the last notify sender; the worker drains and exits
    if let Err(e) = notify_handle.await {
        error!(error = %e, "notify_worker_join_failed");
    }
    let _ = shutdown_tx.send(true);
    metrics.report().log();
    info!("metro-guardian stopped");
    Ok(())
}

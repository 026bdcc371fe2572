//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: `DEFAULT_CONFIG_PATH`

use crate::domain::caregiver::Caregiver;
use crate::domain::types::AccuracyHint;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Used when neither `--config` nor `CONFIG_FILE` names a file
pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSourceKind {
    Replay,
    Mqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    Log,
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiderConfig {
    #[serde(default = "default_rider_name")]
    pub name: String,
}

impl Default for RiderConfig {
    fn default() -> Self {
        Self { name: default_rider_name() }
    }
}

fn default_rider_name() -> String {
    "Rider".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
    #[serde(default = "default_session_duration_ms")]
    pub session_duration_ms: u64,
    #[serde(default = "default_emergency_gap_ms")]
    pub emergency_gap_ms: u64,
    /// After an auto-expired alert the rider must move farther than this before
    /// another approach can alert. Unset means plain edge triggering.
    #[serde(default)]
    pub rearm_distance_m: Option<f64>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            pulse_interval_ms: default_pulse_interval_ms(),
            session_duration_ms: default_session_duration_ms(),
            emergency_gap_ms: default_emergency_gap_ms(),
            rearm_distance_m: None,
        }
    }
}

fn default_radius_m() -> f64 {
    50.0
}

fn default_pulse_interval_ms() -> u64 {
    3000
}

fn default_session_duration_ms() -> u64 {
    15000
}

fn default_emergency_gap_ms() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    #[serde(default = "default_position_source")]
    pub source: PositionSourceKind,
    #[serde(default)]
    pub accuracy_hint: AccuracyHint,
    #[serde(default = "default_min_distance_m")]
    pub min_distance_m: f64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_replay_file")]
    pub replay_file: String,
    /// Replay clock multiplier (2.0 plays a recording twice as fast)
    #[serde(default = "default_replay_speed")]
    pub replay_speed: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            source: default_position_source(),
            accuracy_hint: AccuracyHint::default(),
            min_distance_m: default_min_distance_m(),
            min_interval_ms: default_min_interval_ms(),
            replay_file: default_replay_file(),
            replay_speed: default_replay_speed(),
        }
    }
}

fn default_position_source() -> PositionSourceKind {
    PositionSourceKind::Replay
}

fn default_min_distance_m() -> f64 {
    5.0
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_replay_file() -> String {
    "tracks/demo.jsonl".to_string()
}

fn default_replay_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic: "rider/position".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_mode")]
    pub mode: NotifyMode,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
    /// Attach a maps link to the rider's last known position
    #[serde(default = "default_location_links")]
    pub location_links: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mode: default_notify_mode(),
            webhook_url: String::new(),
            timeout_ms: default_notify_timeout_ms(),
            location_links: default_location_links(),
        }
    }
}

fn default_notify_mode() -> NotifyMode {
    NotifyMode::Log
}

fn default_notify_timeout_ms() -> u64 {
    5000
}

fn default_location_links() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60, prometheus_port: 0 }
    }
}

/// One stop in the station catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationEntry {
    pub name: String,
    pub line: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl StationEntry {
    fn new(name: &str, line: &str, latitude: f64, longitude: f64) -> Self {
        Self { name: name.to_string(), line: line.to_string(), latitude, longitude }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub rider: RiderConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub stations: Vec<StationEntry>,
    #[serde(default)]
    pub caregivers: Vec<Caregiver>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    rider_name: String,
    radius_m: f64,
    pulse_interval_ms: u64,
    session_duration_ms: u64,
    emergency_gap_ms: u64,
    rearm_distance_m: Option<f64>,
    position_source: PositionSourceKind,
    accuracy_hint: AccuracyHint,
    min_distance_m: f64,
    min_interval_ms: u64,
    replay_file: String,
    replay_speed: f64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    notify_mode: NotifyMode,
    webhook_url: String,
    notify_timeout_ms: u64,
    location_links: bool,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    stations: Vec<StationEntry>,
    caregivers: Vec<Caregiver>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rider_name: default_rider_name(),
            radius_m: 50.0,
            pulse_interval_ms: 3000,
            session_duration_ms: 15000,
            emergency_gap_ms: 300,
            rearm_distance_m: None,
            position_source: PositionSourceKind::Replay,
            accuracy_hint: AccuracyHint::Balanced,
            min_distance_m: 5.0,
            min_interval_ms: 3000,
            replay_file: default_replay_file(),
            replay_speed: 1.0,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "rider/position".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            notify_mode: NotifyMode::Log,
            webhook_url: String::new(),
            notify_timeout_ms: 5000,
            location_links: true,
            metrics_interval_secs: 60,
            prometheus_port: 0,
            stations: Self::default_stations(),
            caregivers: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Delhi metro stops shipped with the app
    fn default_stations() -> Vec<StationEntry> {
        vec![
            StationEntry::new("Rithala", "Red", 28.7075, 77.1117),
            StationEntry::new("Netaji Subhash Place", "Red", 28.7026, 77.1100),
            StationEntry::new("Rajouri Garden", "Red", 28.6491, 77.1148),
            StationEntry::new("Central Secretariat", "Red", 28.6139, 77.2100),
            StationEntry::new("Dilshad Garden", "Red", 28.6730, 77.2700),
            StationEntry::new("Dwarka Sector 21", "Blue", 28.5783, 77.0470),
            StationEntry::new("Rajiv Chowk", "Blue", 28.6333, 77.2192),
            StationEntry::new("Noida City Centre", "Blue", 28.5707, 77.3762),
            StationEntry::new("Yamuna Bank", "Blue", 28.6462, 77.2903),
            StationEntry::new("Samaypur Badli", "Yellow", 28.7286, 77.1160),
            StationEntry::new("Civil Lines", "Yellow", 28.6678, 77.2197),
            StationEntry::new("Huda City Centre", "Yellow", 28.4595, 77.0728),
        ]
    }

    /// Config file path: explicit `--config`, else `CONFIG_FILE`, else the default
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        match env::var("CONFIG_FILE") {
            Ok(path) if !path.is_empty() => path,
            _ => DEFAULT_CONFIG_PATH.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let alerts = toml_config.alerts;
        anyhow::ensure!(alerts.radius_m > 0.0, "alerts.radius_m must be positive");
        anyhow::ensure!(alerts.pulse_interval_ms > 0, "alerts.pulse_interval_ms must be positive");

        // Stations only replace the built-in list when the file defines some
        let stations = if toml_config.stations.is_empty() {
            Self::default_stations()
        } else {
            toml_config.stations
        };

        Ok(Self {
            rider_name: toml_config.rider.name,
            radius_m: alerts.radius_m,
            pulse_interval_ms: alerts.pulse_interval_ms,
            session_duration_ms: alerts.session_duration_ms,
            emergency_gap_ms: alerts.emergency_gap_ms,
            rearm_distance_m: alerts.rearm_distance_m,
            position_source: toml_config.position.source,
            accuracy_hint: toml_config.position.accuracy_hint,
            min_distance_m: toml_config.position.min_distance_m,
            min_interval_ms: toml_config.position.min_interval_ms,
            replay_file: toml_config.position.replay_file,
            replay_speed: toml_config.position.replay_speed,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            notify_mode: toml_config.notify.mode,
            webhook_url: toml_config.notify.webhook_url,
            notify_timeout_ms: toml_config.notify.timeout_ms,
            location_links: toml_config.notify.location_links,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            stations,
            caregivers: toml_config.caregivers,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(cli_path: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli_path))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn rider_name(&self) -> &str {
        &self.rider_name
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_millis(self.session_duration_ms)
    }

    pub fn emergency_gap(&self) -> Duration {
        Duration::from_millis(self.emergency_gap_ms)
    }

    pub fn rearm_distance_m(&self) -> Option<f64> {
        self.rearm_distance_m
    }

    pub fn position_source(&self) -> PositionSourceKind {
        self.position_source
    }

    pub fn accuracy_hint(&self) -> AccuracyHint {
        self.accuracy_hint
    }

    pub fn min_distance_m(&self) -> f64 {
        self.min_distance_m
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_ms
    }

    pub fn replay_file(&self) -> &str {
        &self.replay_file
    }

    pub fn replay_speed(&self) -> f64 {
        self.replay_speed
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn notify_mode(&self) -> NotifyMode {
        self.notify_mode
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    pub fn notify_timeout_ms(&self) -> u64 {
        self.notify_timeout_ms
    }

    pub fn location_links(&self) -> bool {
        self.location_links
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn stations(&self) -> &[StationEntry] {
        &self.stations
    }

    pub fn caregivers(&self) -> &[Caregiver] {
        &self.caregivers
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the alert radius
    pub fn with_radius_m(mut self, radius_m: f64) -> Self {
        self.radius_m = radius_m;
        self
    }

    /// Builder method to enable the re-arm distance policy
    pub fn with_rearm_distance_m(mut self, rearm_distance_m: Option<f64>) -> Self {
        self.rearm_distance_m = rearm_distance_m;
        self
    }

    /// Builder method to set the caregiver directory
    pub fn with_caregivers(mut self, caregivers: Vec<Caregiver>) -> Self {
        self.caregivers = caregivers;
        self
    }

    /// Builder method to toggle maps links in notifications
    pub fn with_location_links(mut self, enabled: bool) -> Self {
        self.location_links = enabled;
        self
    }
}

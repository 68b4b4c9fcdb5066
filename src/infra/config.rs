//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing keys fall back to the values the lot
//! hardware was tuned with (3 bays, 15 cm entry threshold, 3/10 hit debounce,
//! 1 s exit grace).

use crate::domain::types::SlotId;
use anyhow::{ensure, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Bot-style HTTP API (Telegram)
    Telegram,
    /// Publish to an MQTT topic
    Mqtt,
    /// Write messages to the log only
    Log,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Telegram => "telegram",
            TransportKind::Mqtt => "mqtt",
            TransportKind::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotsConfig {
    /// Physical bay numbers
    #[serde(default = "default_slot_ids")]
    pub ids: Vec<u16>,
    /// Closed tickets kept for the dashboard
    #[serde(default = "default_closed_log_capacity")]
    pub closed_log_capacity: usize,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self { ids: default_slot_ids(), closed_log_capacity: default_closed_log_capacity() }
    }
}

fn default_slot_ids() -> Vec<u16> {
    vec![1, 2, 3]
}

fn default_closed_log_capacity() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Readings below this distance count as a vehicle at the gate
    #[serde(default = "default_entry_distance_cm")]
    pub entry_distance_cm: f64,
    /// Readings above this are treated as invalid
    #[serde(default = "default_max_range_cm")]
    pub max_range_cm: f64,
    #[serde(default = "default_detect_hits")]
    pub detect_hits: u32,
    #[serde(default = "default_miss_hits")]
    pub miss_hits: u32,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            entry_distance_cm: default_entry_distance_cm(),
            max_range_cm: default_max_range_cm(),
            detect_hits: default_detect_hits(),
            miss_hits: default_miss_hits(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_entry_distance_cm() -> f64 {
    15.0
}

fn default_max_range_cm() -> f64 {
    400.0
}

fn default_detect_hits() -> u32 {
    3
}

fn default_miss_hits() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyConfig {
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
    #[serde(default = "default_fee_per_min")]
    pub fee_per_min: f64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self { exit_grace_ms: default_exit_grace_ms(), fee_per_min: default_fee_per_min() }
    }
}

fn default_exit_grace_ms() -> u64 {
    1000
}

fn default_fee_per_min() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_open_pulse_us")]
    pub open_pulse_us: u32,
    #[serde(default = "default_close_pulse_us")]
    pub close_pulse_us: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { open_pulse_us: default_open_pulse_us(), close_pulse_us: default_close_pulse_us() }
    }
}

fn default_open_pulse_us() -> u32 {
    1900
}

fn default_close_pulse_us() -> u32 {
    1100
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_display_columns")]
    pub columns: usize,
    #[serde(default = "default_display_refresh_ms")]
    pub refresh_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            columns: default_display_columns(),
            refresh_ms: default_display_refresh_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_display_columns() -> usize {
    16
}

fn default_display_refresh_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Candidate ports, tried in order
    #[serde(default = "default_dashboard_ports")]
    pub ports: Vec<u16>,
    /// Bind attempts per port
    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: u32,
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
    /// Upper bound for serving one connection
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            ports: default_dashboard_ports(),
            bind_attempts: default_bind_attempts(),
            retry_wait_ms: default_retry_wait_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_dashboard_ports() -> Vec<u16> {
    vec![8080, 8000, 8888]
}

fn default_bind_attempts() -> u32 {
    4
}

fn default_retry_wait_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// Chat IDs (telegram) or sub-topics (mqtt)
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,
    #[serde(default = "default_true")]
    pub notify_on_entry: bool,
    #[serde(default)]
    pub notify_slot_free: bool,
    #[serde(default)]
    pub startup_message: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transport: default_transport(),
            recipients: Vec::new(),
            queue_capacity: default_queue_capacity(),
            min_send_interval_ms: default_min_send_interval_ms(),
            notify_on_entry: true,
            notify_slot_free: false,
            startup_message: None,
        }
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Log
}

fn default_queue_capacity() -> usize {
    64
}

fn default_min_send_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            bot_token: String::new(),
            timeout_ms: default_telegram_timeout_ms(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "parking/notifications".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    /// Bay number -> GPIO value file (active low)
    #[serde(default = "default_presence_paths")]
    pub presence_paths: HashMap<String, String>,
    /// File exporting the entry sensor distance in cm
    #[serde(default = "default_range_path")]
    pub range_path: String,
    /// PWM duty_cycle file for the gate servo
    #[serde(default = "default_servo_duty_path")]
    pub servo_duty_path: String,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            presence_paths: default_presence_paths(),
            range_path: default_range_path(),
            servo_duty_path: default_servo_duty_path(),
        }
    }
}

fn default_presence_paths() -> HashMap<String, String> {
    [("1", 32), ("2", 33), ("3", 34)]
        .into_iter()
        .map(|(slot, pin)| (slot.to_string(), format!("/sys/class/gpio/gpio{pin}/value")))
        .collect()
}

fn default_range_path() -> String {
    "/run/parking/entry_distance_cm".to_string()
}

fn default_servo_duty_path() -> String {
    "/sys/class/pwm/pwmchip0/pwm0/duty_cycle".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    slot_ids: Vec<SlotId>,
    closed_log_capacity: usize,
    poll_interval_ms: u64,
    entry_distance_cm: f64,
    max_range_cm: f64,
    detect_hits: u32,
    miss_hits: u32,
    exit_grace_ms: u64,
    fee_per_min: f64,
    open_pulse_us: u32,
    close_pulse_us: u32,
    display_enabled: bool,
    display_columns: usize,
    display_refresh_ms: u64,
    dashboard_enabled: bool,
    dashboard_bind_address: String,
    dashboard_ports: Vec<u16>,
    dashboard_bind_attempts: u32,
    dashboard_retry_wait_ms: u64,
    dashboard_request_timeout_ms: u64,
    notify_enabled: bool,
    notify_transport: TransportKind,
    notify_recipients: Vec<String>,
    notify_queue_capacity: usize,
    notify_min_send_interval_ms: u64,
    notify_on_entry: bool,
    notify_slot_free: bool,
    startup_message: Option<String>,
    telegram_api_base: String,
    telegram_bot_token: String,
    telegram_timeout_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    presence_paths: HashMap<SlotId, String>,
    range_path: String,
    servo_duty_path: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        // Bay keys are strings in TOML tables
        let mut presence_paths = HashMap::new();
        for (key, value) in toml_config.hardware.presence_paths {
            if let Ok(id) = key.parse::<u16>() {
                presence_paths.insert(SlotId(id), value);
            }
        }

        Self {
            site_id: toml_config.site.id,
            slot_ids: toml_config.slots.ids.into_iter().map(SlotId).collect(),
            closed_log_capacity: toml_config.slots.closed_log_capacity,
            poll_interval_ms: toml_config.sensors.poll_interval_ms,
            entry_distance_cm: toml_config.sensors.entry_distance_cm,
            max_range_cm: toml_config.sensors.max_range_cm,
            detect_hits: toml_config.sensors.detect_hits,
            miss_hits: toml_config.sensors.miss_hits,
            exit_grace_ms: toml_config.occupancy.exit_grace_ms,
            fee_per_min: toml_config.occupancy.fee_per_min,
            open_pulse_us: toml_config.gate.open_pulse_us,
            close_pulse_us: toml_config.gate.close_pulse_us,
            display_enabled: toml_config.display.enabled,
            display_columns: toml_config.display.columns,
            display_refresh_ms: toml_config.display.refresh_ms,
            dashboard_enabled: toml_config.dashboard.enabled,
            dashboard_bind_address: toml_config.dashboard.bind_address,
            dashboard_ports: toml_config.dashboard.ports,
            dashboard_bind_attempts: toml_config.dashboard.bind_attempts,
            dashboard_retry_wait_ms: toml_config.dashboard.retry_wait_ms,
            dashboard_request_timeout_ms: toml_config.dashboard.request_timeout_ms,
            notify_enabled: toml_config.notify.enabled,
            notify_transport: toml_config.notify.transport,
            notify_recipients: toml_config.notify.recipients,
            notify_queue_capacity: toml_config.notify.queue_capacity,
            notify_min_send_interval_ms: toml_config.notify.min_send_interval_ms,
            notify_on_entry: toml_config.notify.notify_on_entry,
            notify_slot_free: toml_config.notify.notify_slot_free,
            startup_message: toml_config.notify.startup_message,
            telegram_api_base: toml_config.telegram.api_base,
            telegram_bot_token: toml_config.telegram.bot_token,
            telegram_timeout_ms: toml_config.telegram.timeout_ms,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            presence_paths,
            range_path: toml_config.hardware.range_path,
            servo_duty_path: toml_config.hardware.servo_duty_path,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.slot_ids.is_empty(), "slots.ids must list at least one bay");
        ensure!(self.detect_hits > 0, "sensors.detect_hits must be > 0");
        ensure!(self.miss_hits > 0, "sensors.miss_hits must be > 0");
        ensure!(self.poll_interval_ms > 0, "sensors.poll_interval_ms must be > 0");
        ensure!(self.fee_per_min >= 0.0, "occupancy.fee_per_min must not be negative");
        Ok(())
    }

    /// Load configuration, falling back to defaults if the file is unusable
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn slot_ids(&self) -> &[SlotId] {
        &self.slot_ids
    }

    pub fn closed_log_capacity(&self) -> usize {
        self.closed_log_capacity
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn entry_distance_cm(&self) -> f64 {
        self.entry_distance_cm
    }

    pub fn max_range_cm(&self) -> f64 {
        self.max_range_cm
    }

    pub fn detect_hits(&self) -> u32 {
        self.detect_hits
    }

    pub fn miss_hits(&self) -> u32 {
        self.miss_hits
    }

    pub fn exit_grace_ms(&self) -> u64 {
        self.exit_grace_ms
    }

    pub fn fee_per_min(&self) -> f64 {
        self.fee_per_min
    }

    pub fn open_pulse_us(&self) -> u32 {
        self.open_pulse_us
    }

    pub fn close_pulse_us(&self) -> u32 {
        self.close_pulse_us
    }

    pub fn display_enabled(&self) -> bool {
        self.display_enabled
    }

    pub fn display_columns(&self) -> usize {
        self.display_columns
    }

    pub fn display_refresh_ms(&self) -> u64 {
        self.display_refresh_ms
    }

    pub fn dashboard_enabled(&self) -> bool {
        self.dashboard_enabled
    }

    pub fn dashboard_bind_address(&self) -> &str {
        &self.dashboard_bind_address
    }

    pub fn dashboard_ports(&self) -> &[u16] {
        &self.dashboard_ports
    }

    pub fn dashboard_bind_attempts(&self) -> u32 {
        self.dashboard_bind_attempts
    }

    pub fn dashboard_retry_wait_ms(&self) -> u64 {
        self.dashboard_retry_wait_ms
    }

    pub fn dashboard_request_timeout_ms(&self) -> u64 {
        self.dashboard_request_timeout_ms
    }

    pub fn notify_enabled(&self) -> bool {
        self.notify_enabled
    }

    pub fn notify_transport(&self) -> TransportKind {
        self.notify_transport
    }

    pub fn notify_recipients(&self) -> &[String] {
        &self.notify_recipients
    }

    pub fn notify_queue_capacity(&self) -> usize {
        self.notify_queue_capacity
    }

    pub fn notify_min_send_interval_ms(&self) -> u64 {
        self.notify_min_send_interval_ms
    }

    pub fn notify_on_entry(&self) -> bool {
        self.notify_on_entry
    }

    pub fn notify_slot_free(&self) -> bool {
        self.notify_slot_free
    }

    pub fn startup_message(&self) -> Option<&str> {
        self.startup_message.as_deref()
    }

    pub fn telegram_api_base(&self) -> &str {
        &self.telegram_api_base
    }

    pub fn telegram_bot_token(&self) -> &str {
        &self.telegram_bot_token
    }

    pub fn telegram_timeout_ms(&self) -> u64 {
        self.telegram_timeout_ms
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

    pub fn presence_paths(&self) -> &HashMap<SlotId, String> {
        &self.presence_paths
    }

    pub fn range_path(&self) -> &str {
        &self.range_path
    }

    pub fn servo_duty_path(&self) -> &str {
        &self.servo_duty_path
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the exit grace window
    pub fn with_exit_grace_ms(mut self, ms: u64) -> Self {
        self.exit_grace_ms = ms;
        self
    }

    /// Builder method for tests to pick the notification transport
    pub fn with_notify_transport(mut self, transport: TransportKind) -> Self {
        self.notify_transport = transport;
        self
    }

    /// Builder method for tests to set notification recipients
    pub fn with_notify_recipients(mut self, recipients: &[&str]) -> Self {
        self.notify_recipients = recipients.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Builder method for tests to set the startup message
    pub fn with_startup_message(mut self, text: &str) -> Self {
        self.startup_message = Some(text.to_string());
        self
    }

    /// Builder method for tests to set the bot token
    pub fn with_telegram_bot_token(mut self, token: &str) -> Self {
        self.telegram_bot_token = token.to_string();
        self
    }

    /// Builder method for tests to change the bay set
    pub fn with_slot_ids(mut self, ids: &[u16]) -> Self {
        self.slot_ids = ids.iter().copied().map(SlotId).collect();
        self
    }
}

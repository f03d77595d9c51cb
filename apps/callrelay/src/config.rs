// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use callrelay_core::{AuthorizedSystem, SystemKind};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::Level;

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_max_body_size() -> usize {
    // Recorded calls are short; 50MB leaves plenty of room for long patches.
    50 * 1024 * 1024
}

/// Telemetry and observability configuration (OpenTelemetry).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Enable OpenTelemetry tracing (spans) export.
    ///
    /// Metrics export is controlled separately via `otlp_endpoint`.
    #[serde(default)]
    pub tracing_enable: bool,
    pub otlp_endpoint: Option<String>,
    /// OTLP endpoint for trace export (e.g., `http://localhost:4318/v1/traces`).
    pub otlp_traces_endpoint: Option<String>,
    #[serde(default)]
    pub otlp_headers: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable: true,
            tracing_enable: false,
            otlp_endpoint: None,
            otlp_traces_endpoint: None,
            otlp_headers: HashMap::new(),
        }
    }
}

/// Log file format options.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (faster, lower CPU overhead)
    #[default]
    Text,
    /// JSON format (structured, better for log aggregation)
    Json,
}

/// Logging configuration for console and file output.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default)]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default)]
    pub file_path: String,
    /// Format for file logging: "text" (default) or "json"
    #[serde(default)]
    pub file_format: LogFormat,
    /// Per-adapter overrides of the output levels.
    #[serde(default)]
    pub adapters: AdapterLogLevels,
}

/// `[log.adapters]`: one optional level per part of the relay, applied on top of
/// `console_level` and `file_level`. `RUST_LOG` replaces all of them when set.
///
/// ```toml
/// [log.adapters]
/// udp = "debug"
/// dispatch = "warn"
/// ```
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct AdapterLogLevels {
    /// `POST /api/call-upload` and the other HTTP routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peerlink: Option<LogLevel>,
    /// WebSocket subscribers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<LogLevel>,
    /// Chat, webhook and transcription side effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<LogLevel>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: "./callrelay.log".to_string(),
            file_format: LogFormat::default(),
            adapters: AdapterLogLevels::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    pub address: String,
    /// Maximum request body size in bytes for call uploads (default: 50MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// URL prefix under which stored artifacts are served.
    pub public_path: String,
    /// Accept SDRTrunk-style uploads on `POST /api/call-upload`.
    #[serde(default = "default_true")]
    pub call_upload_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:4000".to_string(),
            max_body_size: default_max_body_size(),
            public_path: "/uploads".to_string(),
            call_upload_enabled: true,
        }
    }
}

/// Artifact storage configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct StorageConfig {
    /// Base directory for stored call audio. Also served read-only under `server.public_path`.
    pub upload_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { upload_dir: "./uploads".to_string() }
    }
}

/// UDP datagram receiver configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct UdpConfig {
    #[serde(default)]
    pub enabled: bool,
    pub address: String,
    /// Largest datagram accepted; anything bigger is truncated by the socket and rejected.
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self { enabled: false, address: "0.0.0.0:9123".to_string(), max_datagram_size: 65_507 }
    }
}

/// Peer-link (WhackerLink master) connection settings.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct PeerLinkConfig {
    /// Connect to configured `whackerlink` systems at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Sample rate of the 16-bit mono PCM carried in audio frames.
    pub sample_rate: u32,
    /// Capacity of the channel between peer connections and the call pipeline.
    pub channel_capacity: usize,
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            sample_rate: 8_000,
            channel_capacity: 256,
        }
    }
}

/// A radio system allowed to submit calls.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SystemConfig {
    /// System id presented by the client. Integers are accepted and compared as text.
    #[serde(deserialize_with = "string_or_number")]
    #[schemars(with = "serde_json::Value")]
    pub id: String,
    /// Display name; also the top-level directory of the system's artifacts.
    pub alias: String,
    #[serde(rename = "type")]
    pub kind: SystemKind,
    #[serde(default, alias = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Peer master address (`whackerlink` only).
    pub address: Option<String>,
    /// Peer master port (`whackerlink` only).
    pub port: Option<u16>,
}

impl From<SystemConfig> for AuthorizedSystem {
    fn from(system: SystemConfig) -> Self {
        Self {
            id: system.id,
            alias: system.alias,
            kind: system.kind,
            api_key: system.api_key,
            enabled: system.enabled,
            address: system.address,
            port: system.port,
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_chat_interval_ms() -> u64 {
    2_000
}

const fn default_queue_warn_depth() -> usize {
    25
}

/// Chat-bot announcement queue.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ChatConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Endpoint receiving announcement JSON.
    pub endpoint: Option<String>,
    /// Public base URL prepended to artifact paths in announcements.
    #[serde(default)]
    pub public_base_url: String,
    /// Talkgroups announced in chat. Ignored when `allow_all` is set.
    #[serde(default)]
    pub allowed_talkgroups: Vec<String>,
    #[serde(default)]
    pub allow_all: bool,
    /// Minimum pause between two announcements.
    #[serde(default = "default_chat_interval_ms")]
    pub min_interval_ms: u64,
    /// Queue depth above which a warning is logged.
    #[serde(default = "default_queue_warn_depth")]
    pub queue_warn_depth: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            public_base_url: String::new(),
            allowed_talkgroups: Vec::new(),
            allow_all: false,
            min_interval_ms: default_chat_interval_ms(),
            queue_warn_depth: default_queue_warn_depth(),
        }
    }
}

/// Discord-compatible webhook notifications.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: Option<String>,
    /// Post a message for every call, not only for transcriptions.
    #[serde(default)]
    pub send_calls: bool,
}

fn default_transcription_base_url() -> String {
    "https://api.assemblyai.com".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    3_000
}

/// Speech-to-text for stored calls. Results are posted to the webhook.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_transcription_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: default_transcription_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Side effects run for every stored call.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct DispatchConfig {
    /// Upper bound for any single outbound provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            chat: ChatConfig::default(),
            webhook: WebhookConfig::default(),
            transcription: TranscriptionConfig::default(),
        }
    }
}

/// Root configuration for the CallRelay server.
#[derive(Deserialize, Serialize, Default, Debug, Clone, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub udp: UdpConfig,

    #[serde(default)]
    pub peerlink: PeerLinkConfig,

    #[serde(default)]
    pub systems: Vec<SystemConfig>,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Systems converted for the registry, in configuration order.
    pub fn authorized_systems(&self) -> Vec<AuthorizedSystem> {
        self.systems.iter().cloned().map(AuthorizedSystem::from).collect()
    }
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Loads the application configuration from defaults, a TOML file, and environment variables.
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file exists but contains invalid TOML syntax
/// - Environment variables are set but contain invalid values
/// - Configuration values fail validation (e.g., an unknown system type)
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment =
        Figment::new().merge(figment::providers::Serialized::defaults(Config::default()));

    let mut file_missing = None;

    // Try to load the config file, but don't fail if it doesn't exist
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config =
        figment.merge(Env::prefixed("CR_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized to TOML.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    let default_config = Config::default();
    toml::to_string_pretty(&default_config)
}

/// Generates the JSON schema of the configuration file.
///
/// # Errors
///
/// Returns an error if the schema cannot be serialized.
pub fn generate_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(Config))
}

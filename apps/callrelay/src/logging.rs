// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tracing subscriber setup for the relay.
//!
//! `[log]` selects the outputs (console, file, or both) and their levels. `[log.adapters]`
//! raises or lowers single parts of the relay on top of those levels, and `RUST_LOG` replaces
//! the whole filter when set. With `[telemetry]` tracing enabled, spans are also exported over
//! OTLP at the level of the most verbose output.

use std::ffi::OsStr;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::{AdapterLogLevels, LogConfig, LogFormat, LogLevel, TelemetryConfig};
use crate::telemetry;

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

const DEFAULT_LOG_FILE: &str = "callrelay.log";

/// HTTP client and WebSocket internals log every frame at debug level.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "tungstenite", "tokio_tungstenite"];

/// Module each `[log.adapters]` key controls.
fn adapter_targets(adapters: &AdapterLogLevels) -> [(&'static str, Option<LogLevel>); 5] {
    [
        ("callrelay_server::server", adapters.upload),
        ("callrelay_server::udp", adapters.udp),
        ("callrelay_server::peerlink", adapters.peerlink),
        ("callrelay_server::websocket", adapters.websocket),
        ("callrelay_server::dispatch", adapters.dispatch),
    ]
}

/// Filter directives for one output running at `level`.
fn filter_directives(level: Level, adapters: &AdapterLogLevels) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    if level > Level::WARN {
        directives.extend(QUIET_DEPENDENCIES.iter().map(|target| format!("{target}=warn")));
    }
    for (target, adapter_level) in adapter_targets(adapters) {
        if let Some(adapter_level) = adapter_level {
            directives.push(format!("{target}={}", Level::from(adapter_level).as_str().to_ascii_lowercase()));
        }
    }
    directives.join(",")
}

fn output_filter(level: Level, adapters: &AdapterLogLevels) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(level, adapters)))
}

/// Levels of the enabled outputs. With both outputs disabled in `[log]` the console stays on
/// at `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outputs {
    console: Option<Level>,
    file: Option<Level>,
    fallback: bool,
}

impl Outputs {
    fn from_config(log: &LogConfig) -> Self {
        let console = log.console_enable.then(|| Level::from(log.console_level));
        let file = log.file_enable.then(|| Level::from(log.file_level));
        if console.is_none() && file.is_none() {
            return Self { console: Some(Level::INFO), file: None, fallback: true };
        }
        Self { console, file, fallback: false }
    }

    /// `Level` orders more verbose levels higher.
    fn most_verbose(self) -> Level {
        self.console.into_iter().chain(self.file).max().unwrap_or(Level::INFO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtlpTracing {
    Off,
    MissingEndpoint,
    On,
}

impl OtlpTracing {
    const fn from_config(telemetry: &TelemetryConfig) -> Self {
        match (telemetry.enable && telemetry.tracing_enable, telemetry.otlp_traces_endpoint.is_some()) {
            (false, _) => Self::Off,
            (true, false) => Self::MissingEndpoint,
            (true, true) => Self::On,
        }
    }
}

fn log_file_location(file_path: &str) -> (&Path, &OsStr) {
    let path = Path::new(file_path);
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE));
    (dir, name)
}

fn file_writer(file_path: &str) -> Result<(NonBlocking, WorkerGuard), Box<dyn std::error::Error>> {
    let (dir, name) = log_file_location(file_path);
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create log directory {}: {e}", dir.display()))?;
    Ok(tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name)))
}

fn file_layer(writer: NonBlocking, format: LogFormat, filter: EnvFilter) -> DynLayer {
    let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
    match format {
        LogFormat::Json => layer.json().with_filter(filter).boxed(),
        LogFormat::Text => layer.with_filter(filter).boxed(),
    }
}

/// Installs the global subscriber described by `[log]` and `[telemetry]`.
///
/// The returned guard flushes the log file when dropped and must live as long as the process.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created, the OTLP span exporter cannot be
/// built, or a global subscriber is already installed.
pub fn init_logging(
    log: &LogConfig,
    telemetry_config: &TelemetryConfig,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let outputs = Outputs::from_config(log);
    let otlp = OtlpTracing::from_config(telemetry_config);
    let mut layers: Vec<DynLayer> = Vec::new();
    let mut guard = None;

    if let Some(level) = outputs.file {
        let (writer, file_guard) = file_writer(&log.file_path)?;
        guard = Some(file_guard);
        layers.push(file_layer(writer, log.file_format, output_filter(level, &log.adapters)));
    }

    if let Some(level) = outputs.console {
        layers.push(tracing_subscriber::fmt::layer().with_filter(output_filter(level, &log.adapters)).boxed());
    }

    if otlp == OtlpTracing::On {
        let filter = output_filter(outputs.most_verbose(), &log.adapters);
        layers.push(telemetry::init_tracing_with_otlp(telemetry_config)?.with_filter(filter).boxed());
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    // Reported once there is a subscriber to receive them.
    if outputs.fallback {
        tracing::warn!("Both console and file logging are disabled, falling back to console logging");
    }
    match otlp {
        OtlpTracing::On => tracing::info!("OpenTelemetry tracing layer enabled"),
        OtlpTracing::MissingEndpoint => tracing::warn!(
            "OpenTelemetry tracing is enabled but `otlp_traces_endpoint` is not set; spans will not be exported"
        ),
        OtlpTracing::Off => {},
    }

    Ok(guard)
}

// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Command line entry points.
//!
//! Every command that reads the configuration goes through [`preflight`]: load, apply the
//! adapter flags, then build the [`SystemRegistry`] so a bad `[[systems]]` table stops the
//! process before any socket is bound.

use std::fmt::Write as _;
use std::process::ExitCode;

use callrelay_core::{CoreError, SystemRegistry};
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{self, Config};

#[derive(Parser, Debug)]
#[command(name = "callrelay", author, version, about = "Ingests radio scanner calls and relays them to listeners")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "callrelay.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the relay (the default)
    Serve(AdapterArgs),
    /// Validates the configuration, prints the adapters and systems it enables, and exits
    Check(AdapterArgs),
    /// Prints the default configuration as TOML, or its JSON schema
    Config {
        #[arg(long)]
        schema: bool,
    },
}

/// Overrides for the ingestion adapters. Flags win over the file and `CR_` variables.
#[derive(Args, Debug, Default, Clone)]
pub struct AdapterArgs {
    /// HTTP and WebSocket listen address
    #[arg(long)]
    pub address: Option<String>,
    /// Turn off `POST /api/call-upload`
    #[arg(long)]
    pub no_call_upload: bool,
    /// Turn off the UDP receiver
    #[arg(long)]
    pub no_udp: bool,
    /// Turn off outbound peer links
    #[arg(long)]
    pub no_peer_links: bool,
}

impl AdapterArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(address) = &self.address {
            config.server.address.clone_from(address);
        }
        if self.no_call_upload {
            config.server.call_upload_enabled = false;
        }
        if self.no_udp {
            config.udp.enabled = false;
        }
        if self.no_peer_links {
            config.peerlink.enabled = false;
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid systems: {0}")]
    Systems(#[from] CoreError),
}

/// A loaded configuration whose systems passed validation.
pub struct Preflight {
    pub config: Config,
    pub registry: SystemRegistry,
    /// Set when the config file was absent and defaults were used.
    pub file_missing: Option<String>,
}

/// Loads `config_path`, applies `args` and validates the systems.
///
/// # Errors
///
/// Returns [`CliError::Config`] if the configuration cannot be read or parsed, and
/// [`CliError::Systems`] if a system is invalid (empty id, duplicate id, missing key or an
/// incomplete peer endpoint).
pub fn preflight(config_path: &str, args: &AdapterArgs) -> Result<Preflight, CliError> {
    let loaded = config::load(config_path)?;
    let mut config = loaded.config;
    args.apply(&mut config);
    let registry = SystemRegistry::new(config.authorized_systems())?;
    Ok(Preflight { config, registry, file_missing: loaded.file_missing })
}

/// The ingestion surface a configuration opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSummary {
    pub call_upload: bool,
    pub udp: Option<String>,
    pub peer_links: usize,
    pub systems: usize,
}

impl AdapterSummary {
    pub fn new(config: &Config, registry: &SystemRegistry) -> Self {
        Self {
            call_upload: config.server.call_upload_enabled,
            udp: config.udp.enabled.then(|| config.udp.address.clone()),
            peer_links: if config.peerlink.enabled { registry.peers().count() } else { 0 },
            systems: registry.len(),
        }
    }

    /// No adapter can receive a call.
    pub const fn is_idle(&self) -> bool {
        !self.call_upload && self.udp.is_none() && self.peer_links == 0
    }

    fn log(&self, config: &Config, registry: &SystemRegistry) {
        for system in registry.iter() {
            info!(id = %system.id, alias = %system.alias, kind = %system.kind, enabled = system.enabled, "Configured system");
        }
        info!(
            address = %config.server.address,
            call_upload = self.call_upload,
            udp = self.udp.as_deref().unwrap_or("off"),
            peer_links = self.peer_links,
            systems = self.systems,
            upload_dir = %config.storage.upload_dir,
            "Starting callrelay"
        );
        if self.is_idle() {
            warn!("No ingestion adapter is enabled; the server will not receive any calls");
        }
    }
}

/// Human-readable report for `check`. Keys are never printed.
pub fn check_report(config: &Config, registry: &SystemRegistry) -> String {
    let summary = AdapterSummary::new(config, registry);
    let mut out = String::new();
    let _ = writeln!(out, "listen       {}", config.server.address);
    let _ = writeln!(out, "call upload  {}", if summary.call_upload { "on" } else { "off" });
    let _ = writeln!(out, "udp          {}", summary.udp.as_deref().unwrap_or("off"));
    let _ = writeln!(out, "peer links   {}", summary.peer_links);
    let _ = writeln!(out, "upload dir   {}", config.storage.upload_dir);
    if summary.is_idle() {
        let _ = writeln!(out, "warning: no ingestion adapter is enabled");
    }

    if registry.is_empty() {
        let _ = writeln!(out, "\nNo systems configured");
        return out;
    }
    let _ = writeln!(out, "\n{:<12} {:<20} {:<12} {:<8} ENDPOINT", "ID", "ALIAS", "TYPE", "ENABLED");
    for system in registry.iter() {
        let endpoint = system.peer_endpoint().unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<12} {:<20} {:<12} {:<8} {endpoint}",
            system.id,
            system.alias,
            system.kind.as_str(),
            system.enabled
        );
    }
    out
}

#[allow(clippy::collection_is_never_read)] // Provider must stay alive while serving
fn init_metrics(config: &Config) -> Option<opentelemetry_sdk::metrics::SdkMeterProvider> {
    if !config.telemetry.enable {
        return None;
    }
    crate::telemetry::init_metrics(&config.telemetry)
        .inspect_err(|e| warn!(error = %e, "Failed to initialize OpenTelemetry metrics"))
        .ok()
}

// Errors before logging is up go to stderr.
#[allow(clippy::disallowed_macros)]
async fn serve(config_path: &str, args: &AdapterArgs) -> ExitCode {
    let Preflight { config, registry, file_missing } = match preflight(config_path, args) {
        Ok(preflight) => preflight,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        },
    };

    let _log_guard = match crate::logging::init_logging(&config.log, &config.telemetry) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        },
    };
    let _meter_provider = init_metrics(&config);

    if let Some(path) = file_missing {
        warn!(config_path = %path, "Config file not found, using defaults");
    }
    AdapterSummary::new(&config, &registry).log(&config, &registry);

    match crate::server::start_server(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server stopped with an error");
            ExitCode::FAILURE
        },
    }
}

#[allow(clippy::disallowed_macros)]
fn check(config_path: &str, args: &AdapterArgs) -> ExitCode {
    match preflight(config_path, args) {
        Ok(preflight) => {
            if preflight.file_missing.is_some() {
                println!("{config_path} not found, checked the defaults");
            }
            print!("{}", check_report(&preflight.config, &preflight.registry));
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        },
    }
}

#[allow(clippy::disallowed_macros)]
fn print_config(schema: bool) -> ExitCode {
    let rendered = if schema {
        config::generate_schema().map_err(|e| e.to_string())
    } else {
        config::generate_default().map(|toml| format!("# Default callrelay configuration\n{toml}")).map_err(|e| e.to_string())
    };
    match rendered {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("Failed to render configuration: {e}");
            ExitCode::FAILURE
        },
    }
}

pub async fn run(cli: Cli) -> ExitCode {
    match cli.command.unwrap_or_else(|| Command::Serve(AdapterArgs::default())) {
        Command::Serve(args) => serve(&cli.config, &args).await,
        Command::Check(args) => check(&cli.config, &args),
        Command::Config { schema } => print_config(schema),
    }
}

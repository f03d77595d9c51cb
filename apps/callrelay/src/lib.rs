// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

pub mod broadcaster;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod metrics;
pub mod peerlink;
pub mod pipeline;
pub mod recordings;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod udp;
pub mod websocket;

// Re-export commonly used items for convenience
pub use config::Config;
pub use server::{create_app, create_app_with_dispatcher, start_server};

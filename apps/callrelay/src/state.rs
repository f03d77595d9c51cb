// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use callrelay_core::SystemRegistry;
use std::sync::Arc;

use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::pipeline::CallPipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SystemRegistry>,
    pub broadcaster: Broadcaster,
    pub pipeline: Arc<CallPipeline>,
}

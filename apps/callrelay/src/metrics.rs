// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! OpenTelemetry instruments for call ingestion.

use callrelay_core::{Mode, Transport};
use opentelemetry::metrics::{Counter, Gauge};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;

#[derive(Clone)]
pub struct CallMetrics {
    ingested: Counter<u64>,
    rejected: Counter<u64>,
    storage_failures: Counter<u64>,
    dispatch_failures: Counter<u64>,
    subscribers: Gauge<u64>,
    chat_queue_depth: Gauge<u64>,
}

impl CallMetrics {
    pub fn shared() -> &'static Self {
        static METRICS: OnceLock<CallMetrics> = OnceLock::new();
        METRICS.get_or_init(|| {
            let meter = global::meter("callrelay");
            Self {
                ingested: meter
                    .u64_counter("calls.ingested")
                    .with_description("Calls stored and broadcast")
                    .build(),
                rejected: meter
                    .u64_counter("calls.rejected")
                    .with_description("Calls rejected before storage")
                    .build(),
                storage_failures: meter
                    .u64_counter("calls.storage_failures")
                    .with_description("Calls whose audio could not be stored")
                    .build(),
                dispatch_failures: meter
                    .u64_counter("dispatch.failures")
                    .with_description("Failed side-effect dispatches")
                    .build(),
                subscribers: meter
                    .u64_gauge("broadcast.subscribers")
                    .with_description("Connected real-time subscribers")
                    .build(),
                chat_queue_depth: meter
                    .u64_gauge("chat.queue.depth")
                    .with_description("Pending chat announcements")
                    .build(),
            }
        })
    }

    pub fn call_ingested(&self, mode: Mode) {
        self.ingested.add(
            1,
            &[
                KeyValue::new("transport", mode.transport.as_str()),
                KeyValue::new("protocol", mode.protocol.as_str()),
            ],
        );
    }

    pub fn call_rejected(&self, transport: Transport, reason: &'static str) {
        self.rejected.add(
            1,
            &[KeyValue::new("transport", transport.as_str()), KeyValue::new("reason", reason)],
        );
    }

    pub fn storage_failed(&self) {
        self.storage_failures.add(1, &[]);
    }

    pub fn dispatch_failed(&self, dispatcher: &'static str) {
        self.dispatch_failures.add(1, &[KeyValue::new("dispatcher", dispatcher)]);
    }

    pub fn record_subscribers(&self, count: usize) {
        self.subscribers.record(count as u64, &[]);
    }

    pub fn record_chat_queue_depth(&self, depth: usize) {
        self.chat_queue_depth.record(depth as u64, &[]);
    }
}

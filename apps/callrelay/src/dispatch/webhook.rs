// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use async_trait::async_trait;
use callrelay_core::CallRecord;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::DispatchError;

/// Posts call and transcription notifications to a chat webhook.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn send_call_message(&self, record: &CallRecord) -> Result<(), DispatchError>;

    async fn send_transcription_message(
        &self,
        record: &CallRecord,
        text: &str,
    ) -> Result<(), DispatchError>;
}

/// Discord-compatible webhook (`content` plus one embed).
pub struct DiscordWebhook {
    client: reqwest::Client,
    url: String,
}

impl DiscordWebhook {
    pub const fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    async fn post(&self, body: &Value) -> Result<(), DispatchError> {
        self.client.post(&self.url).json(body).send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl WebhookNotifier for DiscordWebhook {
    async fn send_call_message(&self, record: &CallRecord) -> Result<(), DispatchError> {
        self.post(&call_message(record)).await
    }

    async fn send_transcription_message(
        &self,
        record: &CallRecord,
        text: &str,
    ) -> Result<(), DispatchError> {
        self.post(&transcription_message(record, text)).await
    }
}

fn label_or_id(record: &CallRecord) -> &str {
    if record.talkgroup_label().is_empty() {
        record.talkgroup_id()
    } else {
        record.talkgroup_label()
    }
}

/// `851012500` -> `851.0125 MHz`
fn format_frequency(hz: u64) -> String {
    if hz == 0 {
        return "Unknown".to_string();
    }
    let fraction = format!("{:06}", hz % 1_000_000);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{} MHz", hz / 1_000_000)
    } else {
        format!("{}.{fraction} MHz", hz / 1_000_000)
    }
}

fn embed(record: &CallRecord, title: String, description: Option<&str>) -> Value {
    let timestamp = OffsetDateTime::from_unix_timestamp(record.timestamp())
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok());

    let mut embed = json!({
        "title": title,
        "fields": [
            { "name": "Talkgroup", "value": record.talkgroup_id(), "inline": true },
            { "name": "Source", "value": record.source_radio_id(), "inline": true },
            { "name": "Frequency", "value": format_frequency(record.frequency()), "inline": true },
            { "name": "Mode", "value": record.mode().to_string(), "inline": true },
            { "name": "System", "value": record.system_alias(), "inline": true },
        ],
    });
    if let Some(description) = description {
        embed["description"] = Value::String(description.to_string());
    }
    if let Some(timestamp) = timestamp {
        embed["timestamp"] = Value::String(timestamp);
    }
    embed
}

pub(crate) fn call_message(record: &CallRecord) -> Value {
    json!({
        "content": format!("New call on {}", label_or_id(record)),
        "embeds": [embed(record, label_or_id(record).to_string(), None)],
    })
}

pub(crate) fn transcription_message(record: &CallRecord, text: &str) -> Value {
    json!({
        "content": format!("Transcription for {}", label_or_id(record)),
        "embeds": [embed(record, label_or_id(record).to_string(), Some(text))],
    })
}

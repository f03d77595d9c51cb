// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Side effects run after a call has been stored and broadcast.
//!
//! Every dispatcher runs detached from the ingestion path. Each outbound provider call is
//! bounded by the configured timeout, and failures are logged here and never reach adapters.

pub mod chat;
pub mod transcription;
pub mod webhook;

use callrelay_core::{AudioCodec, CallRecord, PlacedArtifact};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::config::DispatchConfig;
use crate::metrics::CallMetrics;

pub use chat::{Announcement, ChatAnnouncer, ChatQueue, HttpChatAnnouncer};
pub use transcription::{AssemblyAiTranscriber, Transcriber};
pub use webhook::{DiscordWebhook, WebhookNotifier};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A call that made it through storage. Shared by every dispatcher it is handed to.
#[derive(Debug, Clone)]
pub struct PlacedCall {
    pub record: CallRecord,
    pub artifact: PlacedArtifact,
    pub codec: AudioCodec,
}

/// Runs `fut` with an upper time bound.
///
/// # Errors
///
/// Returns the future's own error, or [`DispatchError::Timeout`] if it did not finish in time.
pub async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, DispatchError>>,
) -> Result<T, DispatchError> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| DispatchError::Timeout(timeout))?
}

/// Shared outbound HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn shared_http_client() -> Result<&'static reqwest::Client, DispatchError> {
    static CLIENT: OnceLock<Result<reqwest::Client, reqwest::Error>> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .user_agent(concat!("callrelay/", env!("CARGO_PKG_VERSION")))
                .build()
        })
        .as_ref()
        .map_err(|e| DispatchError::Provider(format!("Failed to initialize HTTP client: {e}")))
}

/// Fans a stored call out to the configured side effects.
#[derive(Clone)]
pub struct Dispatcher {
    chat: Option<ChatQueue>,
    webhook: Option<Arc<dyn WebhookNotifier>>,
    send_calls: bool,
    transcriber: Option<Arc<dyn Transcriber>>,
    timeout: Duration,
}

impl Dispatcher {
    /// A dispatcher that does nothing.
    pub const fn disabled() -> Self {
        Self {
            chat: None,
            webhook: None,
            send_calls: false,
            transcriber: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Builds the default HTTP-backed dispatchers from configuration. Must be called from
    /// within a tokio runtime (the chat worker is spawned here).
    ///
    /// # Errors
    ///
    /// Returns an error if the shared HTTP client cannot be built.
    pub fn from_config(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let mut dispatcher = Self::disabled().with_timeout(timeout);

        if config.chat.enabled {
            match &config.chat.endpoint {
                Some(endpoint) => {
                    let client = shared_http_client()?.clone();
                    let announcer = Arc::new(HttpChatAnnouncer::new(client, endpoint.clone()));
                    dispatcher = dispatcher.with_chat(ChatQueue::start(&config.chat, announcer, timeout));
                },
                None => tracing::warn!("Chat announcements enabled but no endpoint configured"),
            }
        }

        if config.webhook.enabled {
            match &config.webhook.url {
                Some(url) => {
                    let client = shared_http_client()?.clone();
                    dispatcher = dispatcher.with_webhook(
                        Arc::new(DiscordWebhook::new(client, url.clone())),
                        config.webhook.send_calls,
                    );
                },
                None => tracing::warn!("Webhook enabled but no URL configured"),
            }
        }

        let transcription = &config.transcription;
        if transcription.enabled {
            if dispatcher.webhook.is_none() {
                tracing::warn!("Transcription requires the webhook; transcription disabled");
            } else if transcription.api_key.is_empty() {
                tracing::warn!("Transcription enabled but no API key configured");
            } else {
                let client = shared_http_client()?.clone();
                dispatcher = dispatcher.with_transcriber(Arc::new(AssemblyAiTranscriber::new(
                    client,
                    &transcription.base_url,
                    transcription.api_key.clone(),
                    Duration::from_millis(transcription.poll_interval_ms.max(100)),
                )));
            }
        }

        Ok(dispatcher)
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_chat(mut self, chat: ChatQueue) -> Self {
        self.chat = Some(chat);
        self
    }

    #[must_use]
    pub fn with_webhook(mut self, webhook: Arc<dyn WebhookNotifier>, send_calls: bool) -> Self {
        self.webhook = Some(webhook);
        self.send_calls = send_calls;
        self
    }

    /// Transcriptions are only produced while a webhook is configured to receive them.
    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Starts every applicable side effect for `call` and returns immediately.
    pub fn dispatch(&self, call: &Arc<PlacedCall>) {
        if let Some(chat) = &self.chat {
            let record = &call.record;
            if chat.accepts(record.talkgroup_id()) {
                chat.enqueue(&call.artifact.url, record.talkgroup_label(), record.source_radio_id());
            }
        }

        let Some(webhook) = &self.webhook else {
            return;
        };

        if self.send_calls {
            let webhook = Arc::clone(webhook);
            let call = Arc::clone(call);
            let timeout = self.timeout;
            tokio::spawn(async move {
                if let Err(e) = bounded(timeout, webhook.send_call_message(&call.record)).await {
                    report_failure("webhook", &call.record, &e);
                }
            });
        }

        if let Some(transcriber) = &self.transcriber {
            let transcriber = Arc::clone(transcriber);
            let webhook = Arc::clone(webhook);
            let call = Arc::clone(call);
            let timeout = self.timeout;
            tokio::spawn(async move {
                transcribe_and_notify(&*transcriber, &*webhook, &call, timeout).await;
            });
        }
    }
}

async fn transcribe_and_notify(
    transcriber: &dyn Transcriber,
    webhook: &dyn WebhookNotifier,
    call: &PlacedCall,
    timeout: Duration,
) {
    let text = match bounded(timeout, transcriber.transcribe(&call.artifact.path)).await {
        Ok(Some(text)) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(
                system = %call.record.system_alias(),
                talkgroup = %call.record.talkgroup_id(),
                "Empty transcription received; skipping"
            );
            return;
        },
        Err(e) => {
            report_failure("transcription", &call.record, &e);
            return;
        },
    };

    if let Err(e) = bounded(timeout, webhook.send_transcription_message(&call.record, &text)).await
    {
        report_failure("webhook", &call.record, &e);
    }
}

fn report_failure(dispatcher: &'static str, record: &CallRecord, error: &DispatchError) {
    CallMetrics::shared().dispatch_failed(dispatcher);
    tracing::warn!(
        dispatcher,
        system = %record.system_alias(),
        talkgroup = %record.talkgroup_id(),
        error = %error,
        "Dispatch failed"
    );
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn call_messages_are_opt_in() {
        let webhook = Arc::new(RecordingWebhook::default());
        Dispatcher::disabled().with_webhook(webhook.clone(), false).dispatch(&placed_call("100"));
        settle().await;
        assert!(webhook.calls.lock().unwrap().is_empty());

        Dispatcher::disabled().with_webhook(webhook.clone(), true).dispatch(&placed_call("100"));
        settle().await;
        assert_eq!(*webhook.calls.lock().unwrap(), ["100"]);
    }

    #[tokio::test]
    async fn transcription_text_is_forwarded_to_the_webhook() {
        let webhook = Arc::new(RecordingWebhook::default());
        Dispatcher::disabled()
            .with_webhook(webhook.clone(), false)
            .with_transcriber(Arc::new(FixedTranscriber(Some("engine 5 responding"))))
            .dispatch(&placed_call("100"));
        settle().await;
        assert_eq!(*webhook.transcriptions.lock().unwrap(), ["engine 5 responding"]);
    }

    #[tokio::test]
    async fn empty_transcriptions_are_skipped() {
        let webhook = Arc::new(RecordingWebhook::default());
        for result in [None, Some(""), Some("   ")] {
            Dispatcher::disabled()
                .with_webhook(webhook.clone(), false)
                .with_transcriber(Arc::new(FixedTranscriber(result)))
                .dispatch(&placed_call("100"));
        }
        settle().await;
        assert!(webhook.transcriptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_providers_are_cut_off() {
        let err = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DispatchError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
    }
}

// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Chat announcement queue.
//!
//! Announcements are processed strictly one at a time by a single worker, with a minimum
//! pause between them so chat providers never see bursts.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{bounded, DispatchError};
use crate::config::ChatConfig;
use crate::metrics::CallMetrics;

/// One queued chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Announcement {
    pub content: String,
    pub audio_url: String,
    pub talkgroup_label: String,
    pub source: String,
}

/// Delivers announcements to a chat provider.
#[async_trait]
pub trait ChatAnnouncer: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> Result<(), DispatchError>;
}

/// Posts announcements as JSON to a bot endpoint.
pub struct HttpChatAnnouncer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatAnnouncer {
    pub const fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl ChatAnnouncer for HttpChatAnnouncer {
    async fn announce(&self, announcement: &Announcement) -> Result<(), DispatchError> {
        self.client.post(&self.endpoint).json(announcement).send().await?.error_for_status()?;
        Ok(())
    }
}

/// Handle to the announcement queue. Cloning shares the queue and its worker.
#[derive(Clone)]
pub struct ChatQueue {
    tx: mpsc::UnboundedSender<Announcement>,
    depth: Arc<AtomicUsize>,
    allowed: Arc<HashSet<String>>,
    allow_all: bool,
    public_base_url: String,
    warn_depth: usize,
}

impl ChatQueue {
    /// Creates the queue and spawns its worker. The worker exits once every handle is dropped.
    pub fn start(config: &ChatConfig, announcer: Arc<dyn ChatAnnouncer>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(
            rx,
            announcer,
            Arc::clone(&depth),
            Duration::from_millis(config.min_interval_ms),
            timeout,
        ));

        Self {
            tx,
            depth,
            allowed: Arc::new(config.allowed_talkgroups.iter().map(|tg| tg.trim().to_string()).collect()),
            allow_all: config.allow_all,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            warn_depth: config.queue_warn_depth,
        }
    }

    /// Whether calls on `talkgroup` are announced.
    pub fn accepts(&self, talkgroup: &str) -> bool {
        self.allow_all || self.allowed.contains(talkgroup)
    }

    /// Queues an announcement. Returns `false` if the worker is gone.
    pub fn enqueue(&self, artifact_url: &str, talkgroup_label: &str, source_radio_id: &str) -> bool {
        let audio_url = format!("{}{artifact_url}", self.public_base_url);
        let announcement = Announcement {
            content: format!("**{talkgroup_label}** (source {source_radio_id})\n{audio_url}"),
            audio_url,
            talkgroup_label: talkgroup_label.to_string(),
            source: source_radio_id.to_string(),
        };

        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(announcement).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("Chat announcement worker is not running; dropping announcement");
            return false;
        }

        CallMetrics::shared().record_chat_queue_depth(depth);
        if depth > self.warn_depth {
            tracing::warn!(depth, "Chat announcement queue is backing up");
        }
        true
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Announcement>,
    announcer: Arc<dyn ChatAnnouncer>,
    depth: Arc<AtomicUsize>,
    min_interval: Duration,
    timeout: Duration,
) {
    while let Some(announcement) = rx.recv().await {
        if let Err(e) = bounded(timeout, announcer.announce(&announcement)).await {
            CallMetrics::shared().dispatch_failed("chat");
            tracing::warn!(
                talkgroup_label = %announcement.talkgroup_label,
                error = %e,
                "Chat announcement failed"
            );
        }

        let remaining = depth.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        CallMetrics::shared().record_chat_queue_depth(remaining);

        if !min_interval.is_zero() {
            tokio::time::sleep(min_interval).await;
        }
    }
    tracing::debug!("Chat announcement worker stopped");
}

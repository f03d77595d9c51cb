// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The stage every adapter hands a classified call to: store, publish, dispatch.

use bytes::Bytes;
use callrelay_api::{NewCall, ServerEvent};
use callrelay_core::{ArtifactSource, ArtifactStore, AudioCodec, CallRecord, PlacedArtifact, StorageFailure};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::broadcaster::Broadcaster;
use crate::dispatch::{Dispatcher, PlacedCall};
use crate::metrics::CallMetrics;

/// Current wall-clock time in epoch seconds, for calls that carry no timestamp of their own.
pub fn received_at() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// How the audio is referenced in the broadcast event.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Subscribers fetch the stored file by URL.
    Url,
    /// The WAV bytes travel inside the event.
    InlineWav(Bytes),
}

pub struct CallPipeline {
    store: ArtifactStore,
    broadcaster: Broadcaster,
    dispatcher: Dispatcher,
}

impl CallPipeline {
    pub const fn new(store: ArtifactStore, broadcaster: Broadcaster, dispatcher: Dispatcher) -> Self {
        Self { store, broadcaster, dispatcher }
    }

    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub const fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Stores the audio for `record`, then publishes and dispatches it.
    ///
    /// Dispatchers are started but not awaited.
    ///
    /// # Errors
    ///
    /// Returns the [`StorageFailure`] if the artifact could not be placed. Nothing is
    /// published or dispatched in that case.
    pub async fn ingest(
        &self,
        record: CallRecord,
        source: ArtifactSource,
        codec: AudioCodec,
        delivery: Delivery,
    ) -> Result<PlacedArtifact, StorageFailure> {
        let artifact = match self.store.place(&record, source, codec).await {
            Ok(artifact) => artifact,
            Err(e) => {
                CallMetrics::shared().storage_failed();
                tracing::error!(
                    system = %record.system_alias(),
                    talkgroup = %record.talkgroup_id(),
                    mode = %record.mode(),
                    error = %e,
                    "Failed to store call audio"
                );
                return Err(e);
            },
        };

        tracing::info!(
            system = %record.system_alias(),
            talkgroup = %record.talkgroup_id(),
            source = %record.source_radio_id(),
            mode = %record.mode(),
            url = %artifact.url,
            "Call ingested"
        );
        CallMetrics::shared().call_ingested(record.mode());

        let event = match &delivery {
            Delivery::Url => NewCall::with_url(record.clone(), artifact.url.clone()),
            Delivery::InlineWav(wav) => NewCall::with_inline_wav(record.clone(), wav),
        };
        let receivers = self.broadcaster.publish(ServerEvent::NewCall(event));
        tracing::debug!(receivers, "Call event published");

        self.dispatcher.dispatch(&Arc::new(PlacedCall { record, artifact: artifact.clone(), codec }));
        Ok(artifact)
    }
}

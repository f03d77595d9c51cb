// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! UDP datagram adapter.
//!
//! Every datagram is one complete call (see [`UdpCallDatagram`] for the framing). Nothing is
//! ever sent back: malformed, unauthorized or unstorable datagrams are logged and dropped.

use callrelay_api::{DatagramError, UdpCallDatagram};
use callrelay_core::{classify, ArtifactSource, AuthFailure, PlacedArtifact, StorageFailure, SystemKind, SystemRegistry, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::metrics::CallMetrics;
use crate::pipeline::{received_at, CallPipeline, Delivery};

/// Why a datagram was dropped.
#[derive(Debug, Error)]
pub enum DatagramDrop {
    #[error("malformed datagram: {0}")]
    Malformed(#[from] DatagramError),

    #[error(transparent)]
    Unauthorized(#[from] AuthFailure),

    #[error(transparent)]
    Storage(#[from] StorageFailure),
}

/// Binds the receive socket.
///
/// # Errors
///
/// Returns an error if the address is invalid or already in use.
pub async fn bind(address: &str) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(address).await?;
    tracing::info!(address = %socket.local_addr()?, "UDP call receiver listening");
    Ok(socket)
}

/// Receives datagrams until `shutdown` is cancelled. Each datagram is handled in its own task.
pub async fn run_udp_receiver(
    socket: UdpSocket,
    registry: Arc<SystemRegistry>,
    pipeline: Arc<CallPipeline>,
    max_datagram_size: usize,
    shutdown: CancellationToken,
) {
    // One spare byte so oversized datagrams are detectable instead of silently truncated.
    let mut buf = vec![0u8; max_datagram_size + 1];

    loop {
        let (len, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "UDP receive failed");
                    continue;
                },
            },
        };

        if len > max_datagram_size {
            CallMetrics::shared().call_rejected(Transport::Udp, "oversized");
            tracing::debug!(%peer, max_datagram_size, "Dropping oversized datagram");
            continue;
        }

        let datagram = buf[..len].to_vec();
        let registry = Arc::clone(&registry);
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = handle_datagram(&registry, &pipeline, &datagram).await {
                log_drop(peer, &e);
            }
        });
    }

    tracing::info!("UDP call receiver stopped");
}

/// Runs one datagram through authorize, classify, store, publish and dispatch.
///
/// # Errors
///
/// Returns the reason the datagram was dropped.
pub async fn handle_datagram(
    registry: &SystemRegistry,
    pipeline: &CallPipeline,
    datagram: &[u8],
) -> Result<PlacedArtifact, DatagramDrop> {
    let call = UdpCallDatagram::decode(datagram)?;
    let system = registry.authorize(&call.system_id, &call.key, SystemKind::Udp)?;

    let record = classify(&call.fields, &system.alias, Transport::Udp, received_at());
    let artifact = pipeline
        .ingest(record, ArtifactSource::Bytes(call.audio), call.codec.audio_codec(), Delivery::Url)
        .await?;
    Ok(artifact)
}

fn log_drop(peer: SocketAddr, reason: &DatagramDrop) {
    match reason {
        DatagramDrop::Malformed(e) => {
            CallMetrics::shared().call_rejected(Transport::Udp, "malformed");
            tracing::debug!(%peer, error = %e, "Dropping malformed datagram");
        },
        DatagramDrop::Unauthorized(_) => {
            CallMetrics::shared().call_rejected(Transport::Udp, "unauthorized");
            tracing::debug!(%peer, "Dropping unauthorized datagram");
        },
        // Already logged and counted by the pipeline.
        DatagramDrop::Storage(_) => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use crate::dispatch::Dispatcher;
    use bytes::Bytes;
    use callrelay_api::{DatagramCodec, DeliveryMode, ServerEvent};
    use callrelay_core::{ArtifactStore, AuthorizedSystem};
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> Arc<SystemRegistry> {
        Arc::new(
            SystemRegistry::new([AuthorizedSystem {
                id: "12".to_string(),
                alias: "metro".to_string(),
                kind: SystemKind::Udp,
                api_key: "udp-key".to_string(),
                enabled: true,
                address: None,
                port: None,
            }])
            .unwrap(),
        )
    }

    fn datagram(key: &str) -> Bytes {
        let serde_json::Value::Object(fields) = json!({
            "talkgroup": 3_100_000,
            "source": 3_101_234,
            "dateTime": 1_700_000_000,
        }) else {
            unreachable!()
        };
        UdpCallDatagram {
            codec: DatagramCodec::Mp3,
            system_id: "12".to_string(),
            key: key.to_string(),
            fields,
            audio: Bytes::from_static(b"ID3 udp audio"),
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn valid_datagram_is_ingested() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            CallPipeline::new(ArtifactStore::new(dir.path()), Broadcaster::default(), Dispatcher::disabled());

        let artifact = handle_datagram(&registry(), &pipeline, &datagram("udp-key")).await.unwrap();
        assert!(artifact.path.ends_with("metro/3100000/2023-11-14/22-13-20.mp3"));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"ID3 udp audio");
        assert_eq!(artifact.url, "/uploads/metro/3100000/2023-11-14/22-13-20.mp3");
    }

    #[tokio::test]
    async fn bad_datagrams_are_dropped_without_storage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            CallPipeline::new(ArtifactStore::new(dir.path()), Broadcaster::default(), Dispatcher::disabled());
        let registry = registry();

        let err = handle_datagram(&registry, &pipeline, &datagram("wrong")).await.unwrap_err();
        assert!(matches!(err, DatagramDrop::Unauthorized(_)));

        let err = handle_datagram(&registry, &pipeline, b"GARBAGE!").await.unwrap_err();
        assert!(matches!(err, DatagramDrop::Malformed(DatagramError::BadMagic)));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn receiver_publishes_calls_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Broadcaster::default();
        let pipeline = Arc::new(CallPipeline::new(
            ArtifactStore::new(dir.path()),
            broadcaster.clone(),
            Dispatcher::disabled(),
        ));
        let mut sub = broadcaster.subscribe();
        let _ = sub.recv().await.unwrap();

        let socket = bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let receiver = tokio::spawn(run_udp_receiver(
            socket,
            registry(),
            pipeline,
            65_507,
            shutdown.clone(),
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"noise", addr).await.unwrap();
        sender.send_to(&datagram("udp-key"), addr).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        let ServerEvent::NewCall(call) = event.as_ref() else {
            panic!("expected a new_call event, got {event:?}");
        };
        assert_eq!(call.delivery, DeliveryMode::AudioUrl);
        assert_eq!(call.call.mode().to_string(), "DMR_UDP");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), receiver).await.unwrap().unwrap();
    }
}

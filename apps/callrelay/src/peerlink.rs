// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Peer-link adapter.
//!
//! One task per configured `whackerlink` system owns an outbound WebSocket connection to the
//! peer master and reconnects with exponential backoff when it drops. Peer tasks only parse
//! messages; every audio frame is pushed onto one shared channel and turned into a call by a
//! single consumer stage, which handles each frame in its own task.
//!
//! Peer masters send JSON text messages:
//!
//! ```json
//! {
//!   "type": "audioData",
//!   "data": {
//!     "voiceChannel": { "DstId": "100", "SrcId": "1234", "Frequency": "851012500" },
//!     "data": "<base64 PCM>"
//!   }
//! }
//! ```
//!
//! Audio is 16-bit little-endian mono PCM. It may also arrive as a plain byte array or as a
//! `{"type":"Buffer","data":[...]}` object.

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use callrelay_core::{
    ArtifactSource, AudioCodec, CallParts, CallRecord, Mode, Protocol, SystemRegistry, Transport,
};
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::config::PeerLinkConfig;
use crate::metrics::CallMetrics;
use crate::pipeline::{received_at, CallPipeline, Delivery};

/// Label used for fields the peer protocol does not carry.
const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Error)]
pub enum PeerLinkError {
    #[error("connection failed: {0}")]
    Connect(#[from] Box<tungstenite::Error>),

    #[error("invalid peer message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("invalid audio payload: {0}")]
    Audio(String),
}

/// Channel descriptor of one transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannel {
    pub destination_id: String,
    pub source_id: String,
    /// Hz, 0 when unknown.
    pub frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub voice_channel: VoiceChannel,
    /// Raw 16-bit little-endian mono PCM.
    pub pcm: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The connection to the master is established.
    Open,
    AudioData(AudioPacket),
}

/// An audio frame on its way from a peer task to the pipeline.
#[derive(Debug, Clone)]
pub struct PeerFrame {
    pub system_alias: String,
    pub packet: AudioPacket,
    pub received_at: i64,
}

// --- Wire format ---

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct WireAudio {
    #[serde(rename = "voiceChannel")]
    voice_channel: WireVoiceChannel,
    data: WireBytes,
}

#[derive(Deserialize)]
struct WireVoiceChannel {
    #[serde(rename = "DstId", default)]
    dst_id: Value,
    #[serde(rename = "SrcId", default)]
    src_id: Value,
    #[serde(rename = "Frequency", default)]
    frequency: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBytes {
    Base64(String),
    Raw(Vec<u8>),
    Buffer { data: Vec<u8> },
}

/// Parses one text message from a peer master. Returns `Ok(None)` for message types this
/// adapter does not consume.
///
/// # Errors
///
/// Returns an error for malformed JSON or an undecodable audio payload.
pub fn parse_message(text: &str) -> Result<Option<PeerEvent>, PeerLinkError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    match envelope.kind.as_str() {
        "open" => Ok(Some(PeerEvent::Open)),
        "audioData" => {
            let audio: WireAudio = serde_json::from_value(envelope.data)?;
            let pcm = match audio.data {
                WireBytes::Base64(encoded) => base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| PeerLinkError::Audio(e.to_string()))?,
                WireBytes::Raw(bytes) | WireBytes::Buffer { data: bytes } => bytes,
            };
            Ok(Some(PeerEvent::AudioData(AudioPacket {
                voice_channel: VoiceChannel {
                    destination_id: id_string(&audio.voice_channel.dst_id),
                    source_id: id_string(&audio.voice_channel.src_id),
                    frequency: frequency_hz(&audio.voice_channel.frequency),
                },
                pcm: Bytes::from(pcm),
            })))
        },
        _ => Ok(None),
    }
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Integers are Hz. Decimal values are MHz (`"851.0125"`).
fn frequency_hz(value: &Value) -> u64 {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(Ok).or_else(|| n.as_f64().map(Err)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().map(Ok).ok().or_else(|| s.parse::<f64>().ok().map(Err))
        },
        _ => None,
    };
    match parsed {
        Some(Ok(hz)) => hz,
        Some(Err(mhz)) => mhz_to_hz(mhz),
        None => 0,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mhz_to_hz(mhz: f64) -> u64 {
    let hz = (mhz * 1_000_000.0).round();
    // Bounded to well below u64::MAX, so the cast is exact.
    if hz.is_finite() && hz > 0.0 && hz < 1e15 {
        hz as u64
    } else {
        0
    }
}

// --- Call synthesis ---

/// Builds the call record for a peer frame. Peer masters carry no names, so labels are
/// placeholders and the timestamp is the receive time.
pub fn synthesize_record(frame: &PeerFrame) -> CallRecord {
    let channel = &frame.packet.voice_channel;
    CallRecord::new(
        frame.system_alias.clone(),
        Mode::new(Protocol::P25, Transport::PeerLink),
        CallParts {
            talkgroup_id: channel.destination_id.clone(),
            talkgroup_label: UNKNOWN_LABEL.to_string(),
            source_radio_id: channel.source_id.clone(),
            frequency: channel.frequency,
            timestamp: frame.received_at,
            patches: Vec::new(),
            group_label: UNKNOWN_LABEL.to_string(),
        },
    )
}

/// Wraps 16-bit little-endian mono PCM in a WAV container. A trailing odd byte is dropped.
///
/// # Errors
///
/// Returns an error if the WAV container cannot be written.
pub fn wav_from_pcm(pcm: &[u8], sample_rate: u32) -> Result<Bytes, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for sample in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
    }
    writer.finalize()?;
    Ok(Bytes::from(cursor.into_inner()))
}

// --- Connections ---

pub type MessageStream = BoxStream<'static, Result<String, PeerLinkError>>;

/// Opens connections to peer masters.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Connects to `endpoint` (`host:port`) and returns the stream of inbound text messages.
    async fn connect(&self, endpoint: &str) -> Result<MessageStream, PeerLinkError>;
}

/// WebSocket connector (`ws://host:port`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl PeerConnector for TungsteniteConnector {
    async fn connect(&self, endpoint: &str) -> Result<MessageStream, PeerLinkError> {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{endpoint}"))
            .await
            .map_err(Box::new)?;

        let messages = ws.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bin)) => String::from_utf8(bin.to_vec()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(PeerLinkError::Connect(Box::new(e)))),
            }
        });
        Ok(messages.boxed())
    }
}

/// Exponential reconnect delay: `base`, doubling per attempt, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self { base, max, current: base }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub const fn reset(&mut self) {
        self.current = self.base;
    }
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Keeps one peer connection alive until `shutdown` is cancelled or the frame consumer is
/// gone.
pub async fn run_peer(
    system_alias: String,
    endpoint: String,
    connector: Arc<dyn PeerConnector>,
    frames: mpsc::Sender<PeerFrame>,
    mut backoff: Backoff,
    shutdown: CancellationToken,
) {
    loop {
        tracing::debug!(system = %system_alias, %endpoint, "Connecting to peer master");
        let connected = tokio::select! {
            () = shutdown.cancelled() => return,
            connected = connector.connect(&endpoint) => connected,
        };

        match connected {
            Ok(messages) => {
                backoff.reset();
                tracing::info!(system = %system_alias, %endpoint, "Peer link ready");
                match read_messages(&system_alias, messages, &frames, &shutdown).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Disconnected if frames.is_closed() => return,
                    SessionEnd::Disconnected => {},
                }
            },
            Err(e) => {
                tracing::warn!(system = %system_alias, %endpoint, error = %e, "Peer link connection failed");
            },
        }

        let delay = backoff.next_delay();
        tracing::info!(system = %system_alias, ?delay, "Reconnecting to peer master");
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(delay) => {},
        }
    }
}

async fn read_messages(
    system_alias: &str,
    mut messages: MessageStream,
    frames: &mpsc::Sender<PeerFrame>,
    shutdown: &CancellationToken,
) -> SessionEnd {
    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => return SessionEnd::Shutdown,
            message = messages.next() => message,
        };

        let text = match message {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                tracing::warn!(system = %system_alias, error = %e, "Peer link lost");
                return SessionEnd::Disconnected;
            },
            None => {
                tracing::warn!(system = %system_alias, "Peer master closed the connection");
                return SessionEnd::Disconnected;
            },
        };

        match parse_message(&text) {
            Ok(Some(PeerEvent::AudioData(packet))) => {
                let frame = PeerFrame {
                    system_alias: system_alias.to_string(),
                    packet,
                    received_at: received_at(),
                };
                if frames.send(frame).await.is_err() {
                    return SessionEnd::Disconnected;
                }
            },
            Ok(Some(PeerEvent::Open)) => {
                tracing::debug!(system = %system_alias, "Peer master acknowledged the connection");
            },
            Ok(None) => {},
            Err(e) => {
                CallMetrics::shared().call_rejected(Transport::PeerLink, "malformed");
                tracing::debug!(system = %system_alias, error = %e, "Ignoring malformed peer message");
            },
        }
    }
}

/// Consumes frames from every peer task until all of them have stopped.
pub async fn run_frame_stage(
    mut frames: mpsc::Receiver<PeerFrame>,
    pipeline: Arc<CallPipeline>,
    sample_rate: u32,
) {
    while let Some(frame) = frames.recv().await {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            handle_frame(&pipeline, frame, sample_rate).await;
        });
    }
    tracing::debug!("Peer frame stage stopped");
}

/// Turns one frame into a stored call. Returns `false` when the frame was dropped.
async fn handle_frame(pipeline: &CallPipeline, frame: PeerFrame, sample_rate: u32) -> bool {
    let record = synthesize_record(&frame);
    tracing::debug!(
        system = %record.system_alias(),
        talkgroup = %record.talkgroup_id(),
        source = %record.source_radio_id(),
        frequency = record.frequency(),
        "Peer audio frame received"
    );

    let wav = match wav_from_pcm(&frame.packet.pcm, sample_rate) {
        Ok(wav) => wav,
        Err(e) => {
            tracing::warn!(system = %record.system_alias(), error = %e, "Failed to wrap peer audio");
            return false;
        },
    };

    let system = record.system_alias().to_string();
    let talkgroup = record.talkgroup_id().to_string();
    match pipeline
        .ingest(record, ArtifactSource::Bytes(wav.clone()), AudioCodec::Wav, Delivery::InlineWav(wav))
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(%system, %talkgroup, reason = %e, "Dropped peer-link call");
            false
        },
    }
}

/// Spawns one task per enabled peer-link system plus the shared frame stage.
pub fn spawn_peer_links(
    registry: &SystemRegistry,
    config: &PeerLinkConfig,
    pipeline: Arc<CallPipeline>,
    connector: Arc<dyn PeerConnector>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let peers: Vec<_> = registry
        .peers()
        .filter_map(|system| Some((system.alias.clone(), system.peer_endpoint()?)))
        .collect();
    if peers.is_empty() {
        return Vec::new();
    }

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let mut handles = Vec::with_capacity(peers.len() + 1);
    handles.push(tokio::spawn(run_frame_stage(rx, pipeline, config.sample_rate)));

    for (alias, endpoint) in peers {
        tracing::info!(system = %alias, %endpoint, "Starting peer link");
        let backoff = Backoff::new(
            Duration::from_millis(config.reconnect_base_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
        );
        handles.push(tokio::spawn(run_peer(
            alias,
            endpoint,
            Arc::clone(&connector),
            tx.clone(),
            backoff,
            shutdown.clone(),
        )));
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use crate::dispatch::Dispatcher;
    use callrelay_api::{DeliveryMode, ServerEvent};
    use callrelay_core::{ArtifactStore, AuthorizedSystem, SystemKind};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn audio_message(data: &Value) -> String {
        json!({
            "type": "audioData",
            "data": {
                "voiceChannel": { "DstId": "100", "SrcId": 1234, "Frequency": "851.0125" },
                "data": data,
            }
        })
        .to_string()
    }

    #[test]
    fn backoff_doubles_up_to_the_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn audio_payload_encodings_are_accepted() {
        let pcm = [1u8, 0, 2, 0];
        let encodings = [
            json!(base64::engine::general_purpose::STANDARD.encode(pcm)),
            json!(pcm),
            json!({ "type": "Buffer", "data": pcm }),
        ];

        for encoding in encodings {
            let Some(PeerEvent::AudioData(packet)) = parse_message(&audio_message(&encoding)).unwrap()
            else {
                panic!("expected audio for {encoding}");
            };
            assert_eq!(packet.pcm.as_ref(), pcm);
            assert_eq!(
                packet.voice_channel,
                VoiceChannel {
                    destination_id: "100".to_string(),
                    source_id: "1234".to_string(),
                    frequency: 851_012_500,
                }
            );
        }
    }

    #[test]
    fn other_messages_are_ignored_or_rejected() {
        assert_eq!(parse_message(r#"{"type":"open"}"#).unwrap(), Some(PeerEvent::Open));
        assert_eq!(parse_message(r#"{"type":"grantRequest","data":{}}"#).unwrap(), None);
        assert!(parse_message("not json").is_err());
        assert!(parse_message(&audio_message(&json!("***"))).is_err());
    }

    #[test]
    fn frequency_accepts_hz_and_mhz() {
        assert_eq!(frequency_hz(&json!(851_012_500)), 851_012_500);
        assert_eq!(frequency_hz(&json!("851012500")), 851_012_500);
        assert_eq!(frequency_hz(&json!(460.5)), 460_500_000);
        assert_eq!(frequency_hz(&json!("bogus")), 0);
        assert_eq!(frequency_hz(&Value::Null), 0);
    }

    #[test]
    fn frames_become_placeholder_labelled_p25_calls() {
        let frame = PeerFrame {
            system_alias: "wl".to_string(),
            packet: AudioPacket {
                voice_channel: VoiceChannel {
                    destination_id: "100".to_string(),
                    source_id: "1234".to_string(),
                    frequency: 851_012_500,
                },
                pcm: Bytes::new(),
            },
            received_at: 1_700_000_000,
        };

        let record = synthesize_record(&frame);
        assert_eq!(record.mode().to_string(), "P25_PEERLINK");
        assert_eq!(record.talkgroup_id(), "100");
        assert_eq!(record.source_radio_id(), "1234");
        assert_eq!(record.talkgroup_label(), "Unknown");
        assert_eq!(record.group_label(), "Unknown");
        assert_eq!(record.timestamp(), 1_700_000_000);
        assert!(record.patches().is_empty());
    }

    #[test]
    fn pcm_is_wrapped_as_16_bit_mono_wav() {
        let samples: [i16; 4] = [0, 1000, -1000, i16::MAX];
        let mut pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        pcm.push(0xAA);

        let wav = wav_from_pcm(&pcm, 8000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(wav.to_vec())).unwrap();
        let spec = reader.spec();
        assert_eq!((spec.channels, spec.sample_rate, spec.bits_per_sample), (1, 8000, 16));
        let decoded: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(decoded, samples);
    }

    /// Connector that fails `failures` times, then serves the scripted messages once per
    /// successful connection.
    struct ScriptedConnector {
        failures: Mutex<usize>,
        sessions: Mutex<VecDeque<Vec<String>>>,
        attempts: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl PeerConnector for ScriptedConnector {
        async fn connect(&self, _endpoint: &str) -> Result<MessageStream, PeerLinkError> {
            self.attempts.lock().unwrap().push(tokio::time::Instant::now());
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(PeerLinkError::Audio("refused".to_string()));
                }
            }
            let session = self.sessions.lock().unwrap().pop_front();
            match session {
                Some(messages) => Ok(futures::stream::iter(messages.into_iter().map(Ok)).boxed()),
                None => Ok(futures::stream::pending().boxed()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn peer_reconnects_with_backoff_and_forwards_frames() {
        let connector = Arc::new(ScriptedConnector {
            failures: Mutex::new(2),
            sessions: Mutex::new(VecDeque::from([
                vec![audio_message(&json!([1, 0])), r#"{"type":"keepAlive"}"#.to_string()],
                vec![audio_message(&json!([2, 0]))],
            ])),
            attempts: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_peer(
            "wl".to_string(),
            "10.0.0.5:3009".to_string(),
            connector.clone(),
            tx,
            Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            shutdown.clone(),
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.system_alias, "wl");
        assert_eq!(first.packet.pcm.as_ref(), [1, 0]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.packet.pcm.as_ref(), [2, 0]);

        let attempts = connector.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 4);
        // Two failures back off 1s then 2s; the drop after a successful session resets to 1s.
        let gaps: Vec<_> = attempts.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        for (gap, expected) in gaps.iter().zip([1_000, 2_000, 1_000]) {
            assert!((expected..expected + 10).contains(gap), "gaps {gaps:?}");
        }

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn frames_are_stored_and_streamed_inline() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Broadcaster::default();
        let pipeline = Arc::new(CallPipeline::new(
            ArtifactStore::new(dir.path()),
            broadcaster.clone(),
            Dispatcher::disabled(),
        ));
        let mut sub = broadcaster.subscribe();
        let _ = sub.recv().await.unwrap();

        let registry = SystemRegistry::new([AuthorizedSystem {
            id: "wl-1".to_string(),
            alias: "wl".to_string(),
            kind: SystemKind::Whackerlink,
            api_key: String::new(),
            enabled: true,
            address: Some("10.0.0.5".to_string()),
            port: Some(3009),
        }])
        .unwrap();
        let connector = Arc::new(ScriptedConnector {
            failures: Mutex::new(0),
            sessions: Mutex::new(VecDeque::from([vec![audio_message(&json!([1, 0, 2, 0]))]])),
            attempts: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();
        let handles = spawn_peer_links(
            &registry,
            &PeerLinkConfig::default(),
            pipeline,
            connector,
            &shutdown,
        );
        assert_eq!(handles.len(), 2);

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
        let ServerEvent::NewCall(call) = event.as_ref() else {
            panic!("expected a new_call event, got {event:?}");
        };
        assert_eq!(call.delivery, DeliveryMode::WavStream);
        assert_eq!(call.call.mode().to_string(), "P25_PEERLINK");
        assert_eq!(call.call.talkgroup_id(), "100");

        let wav = call.inline_audio().unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[wav.len() - 4..], [1, 0, 2, 0]);

        shutdown.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn unstorable_frames_are_dropped_without_an_event() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the upload directory should be.
        let blocked = dir.path().join("uploads");
        std::fs::write(&blocked, b"").unwrap();

        let broadcaster = Broadcaster::default();
        let pipeline =
            CallPipeline::new(ArtifactStore::new(blocked.clone()), broadcaster.clone(), Dispatcher::disabled());
        let mut sub = broadcaster.subscribe();
        let _ = sub.recv().await.unwrap();

        let frame = PeerFrame {
            system_alias: "wl".to_string(),
            packet: AudioPacket {
                voice_channel: VoiceChannel {
                    destination_id: "100".to_string(),
                    source_id: "1234".to_string(),
                    frequency: 851_012_500,
                },
                pcm: Bytes::from_static(&[1, 0, 2, 0]),
            },
            received_at: 1_700_000_000,
        };
        assert!(!handle_frame(&pipeline, frame.clone(), 8_000).await);
        assert!(tokio::time::timeout(Duration::from_millis(100), sub.recv()).await.is_err());

        std::fs::remove_file(&blocked).unwrap();
        assert!(handle_frame(&pipeline, frame, 8_000).await);
        assert!(matches!(sub.recv().await.unwrap().as_ref(), ServerEvent::NewCall(_)));
    }
}

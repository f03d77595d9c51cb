// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! api: Defines the wire contracts of CallRelay.
//!
//! - Server-to-client WebSocket events ([`ServerEvent`])
//! - The recordings listing returned by `GET /api/recordings` ([`RecordingEntry`])
//! - The UDP call datagram framing ([`datagram`])
//!
//! All WebSocket traffic is JSON text frames; the types here derive `TS` so the web client can
//! share them.

use base64::Engine;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub mod datagram;

pub use callrelay_core::CallRecord;
pub use datagram::{DatagramCodec, DatagramError, UdpCallDatagram};

// --- Broadcast Events ---

/// How a `new_call` event carries its audio.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[ts(export)]
pub enum DeliveryMode {
    /// `audio` is a URL of the stored artifact.
    #[serde(rename = "AUDIO_URL")]
    AudioUrl,
    /// `audio` is a base64-encoded WAV file.
    #[serde(rename = "WAV_STREAM")]
    WavStream,
}

/// Payload of a `new_call` event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[ts(export)]
pub struct NewCall {
    /// Artifact URL ([`DeliveryMode::AudioUrl`]) or base64 WAV bytes ([`DeliveryMode::WavStream`]).
    pub audio: String,
    pub call: CallRecord,
    #[serde(rename = "type")]
    pub delivery: DeliveryMode,
}

impl NewCall {
    pub fn with_url(call: CallRecord, url: impl Into<String>) -> Self {
        Self { audio: url.into(), call, delivery: DeliveryMode::AudioUrl }
    }

    pub fn with_inline_wav(call: CallRecord, wav: &[u8]) -> Self {
        Self {
            audio: base64::engine::general_purpose::STANDARD.encode(wav),
            call,
            delivery: DeliveryMode::WavStream,
        }
    }

    /// Decodes the inline WAV bytes. `None` for URL deliveries or malformed base64.
    pub fn inline_audio(&self) -> Option<Vec<u8>> {
        match self.delivery {
            DeliveryMode::WavStream => {
                base64::engine::general_purpose::STANDARD.decode(&self.audio).ok()
            },
            DeliveryMode::AudioUrl => None,
        }
    }
}

/// Server-to-client WebSocket event.
///
/// # Example
/// ```json
/// {
///   "event": "new_call",
///   "data": {
///     "audio": "/uploads/county/100/2023-11-14/22-13-20.mp3",
///     "call": { "systemAlias": "county", "mode": "P25_SDRTRUNK", "talkgroupId": "100", ... },
///     "type": "AUDIO_URL"
///   }
/// }
/// ```
///
/// ```json
/// { "event": "userCount", "data": 3 }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[ts(export)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A call was stored and is ready for playback.
    #[serde(rename = "new_call")]
    NewCall(NewCall),
    /// Number of currently connected WebSocket clients.
    #[serde(rename = "userCount")]
    UserCount(usize),
}

// --- Recordings ---

/// One entry of a `GET /api/recordings` listing.
///
/// The listing covers the single directory the filters select. Above the date level the
/// entries are directories (`directory == true`); inside a date directory they are the stored
/// artifacts. Levels that are not known yet are empty strings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[ts(export)]
pub struct RecordingEntry {
    pub filename: String,
    /// Public URL of the file or directory.
    pub path: String,
    pub system: String,
    pub talkgroup: String,
    /// `YYYY-MM-DD`
    pub date: String,
    #[serde(default)]
    pub directory: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use callrelay_core::{CallParts, Mode, Protocol, Transport};

    fn call() -> CallRecord {
        CallRecord::new(
            "county",
            Mode::new(Protocol::P25, Transport::SdrTrunk),
            CallParts {
                talkgroup_id: "100".to_string(),
                timestamp: 1_700_000_000,
                ..CallParts::default()
            },
        )
    }

    #[test]
    fn new_call_event_shape() {
        let event = ServerEvent::NewCall(NewCall::with_url(call(), "/uploads/a.mp3"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "new_call");
        assert_eq!(json["data"]["type"], "AUDIO_URL");
        assert_eq!(json["data"]["audio"], "/uploads/a.mp3");
        assert_eq!(json["data"]["call"]["mode"], "P25_SDRTRUNK");
        assert_eq!(json["data"]["call"]["talkgroupId"], "100");
    }

    #[test]
    fn user_count_event_shape() {
        let json = serde_json::to_string(&ServerEvent::UserCount(3)).unwrap();
        assert_eq!(json, r#"{"event":"userCount","data":3}"#);

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServerEvent::UserCount(3));
    }

    #[test]
    fn inline_wav_is_base64() {
        let payload = NewCall::with_inline_wav(call(), b"RIFF....WAVE");
        assert_eq!(payload.delivery, DeliveryMode::WavStream);
        assert_eq!(payload.audio, "UklGRi4uLi5XQVZF");
        assert_eq!(payload.inline_audio().as_deref(), Some(&b"RIFF....WAVE"[..]));
        assert_eq!(NewCall::with_url(call(), "/x").inline_audio(), None);
    }
}

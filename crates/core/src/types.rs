// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types that flow through the ingestion pipeline.
//!
//! - [`CallRecord`]: the canonical, immutable representation of one radio transmission
//! - [`Mode`]: protocol family combined with the transport the call arrived on
//! - [`AudioCodec`]: codec of the stored artifact (decides the file extension)
//! - [`RawFields`]: the loosely-typed field mapping adapters hand to the classifier

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// Raw call fields as received from an adapter (form fields, datagram header).
///
/// Values are JSON strings or numbers; the classifier accepts either for numeric fields.
pub type RawFields = serde_json::Map<String, serde_json::Value>;

/// Radio protocol family detected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ltr,
    P25,
    Dmr,
    Unknown,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ltr => "LTR",
            Self::P25 => "P25",
            Self::Dmr => "DMR",
            Self::Unknown => "UNK",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport a call was ingested through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// SDRTrunk-style HTTP multipart upload.
    SdrTrunk,
    /// Self-contained UDP datagram.
    Udp,
    /// Live audio frame from a peer-link connection.
    PeerLink,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SdrTrunk => "SDRTRUNK",
            Self::Udp => "UDP",
            Self::PeerLink => "PEERLINK",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol + transport tag carried by every [`CallRecord`].
///
/// Serialized as a single string such as `P25_SDRTRUNK` or `UNK_UDP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    pub protocol: Protocol,
    pub transport: Transport,
}

impl Mode {
    pub const fn new(protocol: Protocol, transport: Transport) -> Self {
        Self { protocol, transport }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.protocol, self.transport)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, transport) =
            s.split_once('_').ok_or_else(|| format!("invalid call mode '{s}'"))?;
        let protocol = match protocol {
            "LTR" => Protocol::Ltr,
            "P25" => Protocol::P25,
            "DMR" => Protocol::Dmr,
            "UNK" => Protocol::Unknown,
            other => return Err(format!("unknown protocol '{other}' in call mode")),
        };
        let transport = match transport {
            "SDRTRUNK" => Transport::SdrTrunk,
            "UDP" => Transport::Udp,
            "PEERLINK" => Transport::PeerLink,
            other => return Err(format!("unknown transport '{other}' in call mode")),
        };
        Ok(Self { protocol, transport })
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Codec of a stored audio artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Mp3,
    Wav,
}

impl AudioCodec {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
        }
    }
}

/// Everything needed to build a [`CallRecord`].
///
/// Kept separate from the record itself so the record can stay immutable once built.
#[derive(Debug, Clone, Default)]
pub struct CallParts {
    pub talkgroup_id: String,
    pub talkgroup_label: String,
    pub source_radio_id: String,
    /// Channel frequency in Hz.
    pub frequency: u64,
    /// Epoch seconds, must be positive.
    pub timestamp: i64,
    pub patches: Vec<String>,
    pub group_label: String,
}

/// Canonical normalized representation of one radio transmission event.
///
/// Constructed once per event and never mutated afterwards; all fields are read through
/// accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    system_alias: String,
    #[ts(type = "string")]
    mode: Mode,
    talkgroup_id: String,
    talkgroup_label: String,
    source_radio_id: String,
    frequency: u64,
    timestamp: i64,
    patches: Vec<String>,
    group_label: String,
}

impl CallRecord {
    pub fn new(system_alias: impl Into<String>, mode: Mode, parts: CallParts) -> Self {
        debug_assert!(parts.timestamp > 0, "call timestamps are positive epoch seconds");
        Self {
            system_alias: system_alias.into(),
            mode,
            talkgroup_id: parts.talkgroup_id,
            talkgroup_label: parts.talkgroup_label,
            source_radio_id: parts.source_radio_id,
            frequency: parts.frequency,
            timestamp: parts.timestamp,
            patches: parts.patches,
            group_label: parts.group_label,
        }
    }

    pub fn system_alias(&self) -> &str {
        &self.system_alias
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub fn talkgroup_id(&self) -> &str {
        &self.talkgroup_id
    }

    pub fn talkgroup_label(&self) -> &str {
        &self.talkgroup_label
    }

    pub fn source_radio_id(&self) -> &str {
        &self.source_radio_id
    }

    /// Frequency in Hz (0 when unknown).
    pub const fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Epoch seconds.
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn patches(&self) -> &[String] {
        &self.patches
    }

    pub fn group_label(&self) -> &str {
        &self.group_label
    }
}

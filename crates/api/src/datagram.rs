// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! UDP call datagram framing.
//!
//! One datagram carries one complete call. All integers are big-endian.
//!
//! | Offset | Size | Field                                                    |
//! |--------|------|----------------------------------------------------------|
//! | 0      | 4    | magic `CALL`                                             |
//! | 4      | 1    | version (1)                                              |
//! | 5      | 1    | codec: 0 = mp3, 1 = wav                                  |
//! | 6      | 2    | header length `N`                                        |
//! | 8      | N    | UTF-8 JSON object: `system`, `key` and the call fields   |
//! | 8 + N  | rest | audio payload (non-empty)                                |

use bytes::{BufMut, Bytes, BytesMut};
use callrelay_core::{AudioCodec, RawFields};
use serde_json::Value;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"CALL";
pub const VERSION: u8 = 1;
/// Size of the fixed prefix before the JSON header.
pub const PREFIX_LEN: usize = 8;

/// Codec byte of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatagramCodec {
    Mp3 = 0,
    Wav = 1,
}

impl DatagramCodec {
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Mp3),
            1 => Some(Self::Wav),
            _ => None,
        }
    }

    pub const fn audio_codec(self) -> AudioCodec {
        match self {
            Self::Mp3 => AudioCodec::Mp3,
            Self::Wav => AudioCodec::Wav,
        }
    }
}

#[derive(Debug, Error)]
pub enum DatagramError {
    #[error("datagram too short ({len} bytes)")]
    TooShort { len: usize },

    #[error("bad magic")]
    BadMagic,

    #[error("unsupported datagram version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown codec {0}")]
    UnknownCodec(u8),

    #[error("header length {declared} exceeds remaining {available} bytes")]
    HeaderOverrun { declared: usize, available: usize },

    #[error("header is too large to encode ({0} bytes)")]
    HeaderTooLarge(usize),

    #[error("invalid header JSON: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    #[error("header is not a JSON object")]
    HeaderNotObject,

    #[error("header is missing '{0}'")]
    MissingField(&'static str),

    #[error("datagram carries no audio")]
    EmptyAudio,
}

/// A decoded call datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct UdpCallDatagram {
    pub codec: DatagramCodec,
    pub system_id: String,
    pub key: String,
    /// Call fields with `system` and `key` removed.
    pub fields: RawFields,
    pub audio: Bytes,
}

impl UdpCallDatagram {
    /// Parses one datagram.
    ///
    /// # Errors
    ///
    /// Returns a [`DatagramError`] describing the first framing violation found.
    pub fn decode(datagram: &[u8]) -> Result<Self, DatagramError> {
        if datagram.len() < PREFIX_LEN {
            return Err(DatagramError::TooShort { len: datagram.len() });
        }
        if &datagram[..4] != MAGIC {
            return Err(DatagramError::BadMagic);
        }
        if datagram[4] != VERSION {
            return Err(DatagramError::UnsupportedVersion(datagram[4]));
        }
        let codec =
            DatagramCodec::from_byte(datagram[5]).ok_or(DatagramError::UnknownCodec(datagram[5]))?;

        let header_len = usize::from(u16::from_be_bytes([datagram[6], datagram[7]]));
        let rest = &datagram[PREFIX_LEN..];
        if header_len > rest.len() {
            return Err(DatagramError::HeaderOverrun {
                declared: header_len,
                available: rest.len(),
            });
        }
        let (header, audio) = rest.split_at(header_len);

        let Value::Object(mut fields) = serde_json::from_slice::<Value>(header)? else {
            return Err(DatagramError::HeaderNotObject);
        };
        let system_id = take_string(&mut fields, "system")?;
        let key = take_string(&mut fields, "key")?;

        if audio.is_empty() {
            return Err(DatagramError::EmptyAudio);
        }

        Ok(Self { codec, system_id, key, fields, audio: Bytes::copy_from_slice(audio) })
    }

    /// Serializes the datagram. Used by senders and tests.
    ///
    /// # Errors
    ///
    /// Returns [`DatagramError::HeaderTooLarge`] if the JSON header does not fit in 16 bits.
    pub fn encode(&self) -> Result<Bytes, DatagramError> {
        let mut header = self.fields.clone();
        header.insert("system".to_string(), Value::String(self.system_id.clone()));
        header.insert("key".to_string(), Value::String(self.key.clone()));
        let header = serde_json::to_vec(&Value::Object(header))?;
        let header_len =
            u16::try_from(header.len()).map_err(|_| DatagramError::HeaderTooLarge(header.len()))?;

        let mut buf = BytesMut::with_capacity(PREFIX_LEN + header.len() + self.audio.len());
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.codec as u8);
        buf.put_u16(header_len);
        buf.put_slice(&header);
        buf.put_slice(&self.audio);
        Ok(buf.freeze())
    }
}

/// Removes `name` from the header. Numeric system ids are accepted.
fn take_string(fields: &mut RawFields, name: &'static str) -> Result<String, DatagramError> {
    match fields.remove(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(DatagramError::MissingField(name)),
    }
}

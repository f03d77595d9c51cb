// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Call classification.
//!
//! Turns a raw field mapping into a [`CallRecord`] by running an ordered list of typed
//! predicates (LTR, then P25, then DMR). The first predicate whose required fields are
//! present and well formed decides the protocol; when none match the record is tagged
//! [`Protocol::Unknown`] and the remaining fields are copied best-effort.
//!
//! Classification is pure: the only time input is the caller-supplied `received_at`, which
//! is used solely when the fields do not carry a usable `dateTime`.

use serde_json::Value;
use std::borrow::Cow;

use crate::types::{CallParts, CallRecord, Mode, Protocol, RawFields, Transport};

/// Largest P25 talkgroup id (16-bit).
const P25_MAX_TALKGROUP: u64 = 65_535;
/// Largest 24-bit radio/talkgroup id (P25 unit ids, DMR ids).
const MAX_24_BIT_ID: u64 = 16_777_215;

type Predicate = fn(&RawFields) -> bool;

const PREDICATES: [(Protocol, Predicate); 3] = [
    (Protocol::Ltr, is_ltr_call),
    (Protocol::P25, is_p25_call),
    (Protocol::Dmr, is_dmr_call),
];

/// Classifies `fields` into a call record for `system_alias`.
pub fn classify(
    fields: &RawFields,
    system_alias: &str,
    transport: Transport,
    received_at: i64,
) -> CallRecord {
    let protocol = detect_protocol(fields);
    if protocol == Protocol::Unknown {
        tracing::debug!(system = %system_alias, "No call shape matched, tagging call as unknown");
    }

    let talkgroup_id = match protocol {
        // Normalize numeric ids so "0100" and 100 land in the same directory.
        Protocol::P25 | Protocol::Dmr => {
            field_u64(fields, "talkgroup").map(|tg| tg.to_string()).unwrap_or_default()
        },
        Protocol::Ltr | Protocol::Unknown => field_str(fields, "talkgroup").unwrap_or_default(),
    };

    let timestamp = field_i64(fields, "dateTime").filter(|ts| *ts > 0).unwrap_or(received_at);

    let parts = CallParts {
        talkgroup_id,
        talkgroup_label: field_str(fields, "talkgroupLabel").unwrap_or_default(),
        source_radio_id: field_str(fields, "source").unwrap_or_default(),
        frequency: field_u64(fields, "frequency").unwrap_or(0),
        timestamp,
        patches: fields.get("patches").map(parse_patches).unwrap_or_default(),
        group_label: field_str(fields, "talkgroupGroup").unwrap_or_default(),
    };

    CallRecord::new(system_alias, Mode::new(protocol, transport), parts)
}

/// Runs the predicates in order and returns the first matching protocol.
pub fn detect_protocol(fields: &RawFields) -> Protocol {
    PREDICATES
        .iter()
        .find(|(_, predicate)| predicate(fields))
        .map_or(Protocol::Unknown, |(protocol, _)| *protocol)
}

/// LTR talkgroups are written `A-HH-GGG` (area, home repeater, group).
fn is_ltr_call(fields: &RawFields) -> bool {
    has_timestamp(fields) && field_str(fields, "talkgroup").is_some_and(|tg| is_ltr_talkgroup(&tg))
}

fn is_p25_call(fields: &RawFields) -> bool {
    has_timestamp(fields)
        && field_u64(fields, "talkgroup").is_some_and(|tg| (1..=P25_MAX_TALKGROUP).contains(&tg))
        && field_u64(fields, "source").is_some_and(|src| (1..=MAX_24_BIT_ID).contains(&src))
        && field_u64(fields, "frequency").is_some_and(|freq| freq > 0)
}

fn is_dmr_call(fields: &RawFields) -> bool {
    has_timestamp(fields)
        && field_u64(fields, "talkgroup").is_some_and(|tg| (1..=MAX_24_BIT_ID).contains(&tg))
        && field_u64(fields, "source").is_some_and(|src| (1..=MAX_24_BIT_ID).contains(&src))
}

fn has_timestamp(fields: &RawFields) -> bool {
    field_i64(fields, "dateTime").is_some_and(|ts| ts > 0)
}

fn is_ltr_talkgroup(value: &str) -> bool {
    let mut parts = value.split('-');
    let (Some(area), Some(home), Some(group), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let in_range = |raw: &str, max_len: usize, range: std::ops::RangeInclusive<u16>| {
        !raw.is_empty()
            && raw.len() <= max_len
            && raw.bytes().all(|b| b.is_ascii_digit())
            && raw.parse::<u16>().is_ok_and(|n| range.contains(&n))
    };

    in_range(area, 1, 0..=1) && in_range(home, 2, 1..=20) && in_range(group, 3, 1..=254)
}

/// Reads a field as a trimmed string. Numbers are rendered in their JSON form.
fn field_str(fields: &RawFields, name: &str) -> Option<String> {
    let value: Cow<'_, str> = match fields.get(name)? {
        Value::String(s) => Cow::Borrowed(s.trim()),
        Value::Number(n) => Cow::Owned(n.to_string()),
        _ => return None,
    };
    if value.is_empty() {
        None
    } else {
        Some(value.into_owned())
    }
}

fn field_u64(fields: &RawFields, name: &str) -> Option<u64> {
    match fields.get(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_i64(fields: &RawFields, name: &str) -> Option<i64> {
    match fields.get(name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Patches arrive as a JSON array, a JSON array encoded in a string (`"[101,102]"`), or a
/// plain comma separated list.
fn parse_patches(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(patch_id).collect(),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.starts_with('[') {
                serde_json::from_str::<Vec<Value>>(raw)
                    .map(|items| items.iter().filter_map(patch_id).collect())
                    .unwrap_or_default()
            } else {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            }
        },
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

fn patch_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Codec for the binary header list produced by HAProxy's `req.hdrs_bin` and
//! `res.hdrs_bin` sample fetches.
//!
//! The list is a sequence of `<varint name length><name><varint value
//! length><value>` pairs terminated by an empty name paired with an empty
//! value. Lengths use HAProxy's variable-length integer encoding: values
//! below 240 fit in one byte, larger ones put their 4 low bits in a first
//! byte `>= 240` followed by 7-bit groups, each byte `>= 128` announcing
//! another one.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::error::{Error, Result};

const VARINT_ONE_BYTE_LIMIT: u64 = 240;
const VARINT_CONTINUATION: u8 = 128;

/// Ordered multi-map of the headers carried by a binary header list.
///
/// Names are matched case-insensitively and keep the spelling of their first
/// occurrence. Values are the raw bytes sent by HAProxy: nothing is
/// validated against the HTTP grammar, so headers HAProxy accepted (for
/// instance with `option accept-invalid-http-request`) are never lost here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, Vec<Vec<u8>>)>,
}

impl HeaderList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the values of `name`, creating the entry after the
    /// existing ones when the name is new.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.get_all(name).first().map(Vec::as_slice)
    }

    /// Every value of `name`, in order of appearance.
    pub fn get_all(&self, name: &str) -> &[Vec<u8>] {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, value)` pairs, grouped by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_slice()))
        })
    }

    /// Converts the list into an [`HeaderMap`]. Entries whose name or value
    /// is not valid HTTP are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in self.iter() {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                debug!("haproxy_spoa: skipping header with invalid name {name:?}");
                continue;
            };
            let Ok(header_value) = HeaderValue::from_bytes(value) else {
                debug!("haproxy_spoa: skipping invalid value of header {name}");
                continue;
            };
            headers.append(header_name, header_value);
        }
        headers
    }
}

impl From<&HeaderMap> for HeaderList {
    fn from(headers: &HeaderMap) -> Self {
        let mut list = Self::new();
        for (name, value) in headers {
            list.append(name.as_str(), value.as_bytes());
        }
        list
    }
}

/// Decodes a binary header list. Duplicate names accumulate their values in
/// order of appearance; names that are not UTF-8 are decoded lossily.
///
/// Bytes following the terminator are ignored.
pub fn decode_header_list(buf: Option<&[u8]>) -> Result<HeaderList> {
    let Some(mut buf) = buf.filter(|b| !b.is_empty()) else {
        return Err(Error::malformed("empty header list"));
    };

    let mut headers = HeaderList::new();
    loop {
        let name = read_string(&mut buf, "header name")?;
        let value = read_string(&mut buf, "header value")?;

        if name.is_empty() {
            if !value.is_empty() {
                return Err(Error::malformed(
                    "header list contains a value paired with an empty name",
                ));
            }
            return Ok(headers);
        }

        headers.append(String::from_utf8_lossy(name), value);
    }
}

/// Encodes `headers` in the binary header list format, terminator included.
pub fn encode_header_list(headers: &HeaderList) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, value) in headers.iter() {
        write_string(&mut buf, name.as_bytes());
        write_string(&mut buf, value);
    }
    write_varint(&mut buf, 0);
    write_varint(&mut buf, 0);
    buf
}

fn read_string<'a>(buf: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    let len = read_varint(buf)
        .ok_or_else(|| Error::malformed(format!("truncated or invalid length of {what}")))?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= buf.len())
        .ok_or_else(|| {
            Error::malformed(format!(
                "{what} length {len} exceeds the {} remaining bytes",
                buf.len()
            ))
        })?;

    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Ok(value)
}

/// Reads a varint from the front of `buf`, advancing it. Returns `None` when
/// the buffer ends in the middle of the integer or when it overflows 64 bits.
pub(crate) fn read_varint(buf: &mut &[u8]) -> Option<u64> {
    let (&first, mut rest) = buf.split_first()?;
    let mut value = u64::from(first);

    if value >= VARINT_ONE_BYTE_LIMIT {
        let mut shift = 4u32;
        loop {
            let (&byte, tail) = rest.split_first()?;
            rest = tail;

            let chunk = u64::from(byte).checked_shl(shift)?;
            if shift > 0 && chunk >> shift != u64::from(byte) {
                return None;
            }
            value = value.checked_add(chunk)?;
            shift += 7;

            if byte < VARINT_CONTINUATION {
                break;
            }
            if shift >= u64::BITS {
                return None;
            }
        }
    }

    *buf = rest;
    Some(value)
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    if value < VARINT_ONE_BYTE_LIMIT {
        buf.push(value as u8);
        return;
    }

    buf.push((value as u8) | 0xF0);
    value = (value - VARINT_ONE_BYTE_LIMIT) >> 4;
    while value >= u64::from(VARINT_CONTINUATION) {
        buf.push((value as u8) | VARINT_CONTINUATION);
        value = (value - u64::from(VARINT_CONTINUATION)) >> 7;
    }
    buf.push(value as u8);
}

fn write_string(buf: &mut Vec<u8>, value: &[u8]) {
    write_varint(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

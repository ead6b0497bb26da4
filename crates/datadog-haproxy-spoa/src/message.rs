// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed views over the four SPOE messages declared in the HAProxy
//! configuration:
//!
//! | message                     | fields                                                  |
//! |-----------------------------|---------------------------------------------------------|
//! | `http-request-headers-msg`  | `method`, `path`, `headers`, `https`, `timeout`, `ip`, `ip_port` |
//! | `http-request-body-msg`     | `body`, `span_id`                                       |
//! | `http-response-headers-msg` | `headers`, `status`, `span_id`                          |
//! | `http-response-body-msg`    | `body`, `body_size`, `span_id`                          |

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode};

use crate::error::{Error, Result};
use crate::headers::decode_header_list;
use crate::spoe::{Message, TypedData};

pub const REQUEST_HEADERS_MESSAGE: &str = "http-request-headers-msg";
pub const REQUEST_BODY_MESSAGE: &str = "http-request-body-msg";
pub const RESPONSE_HEADERS_MESSAGE: &str = "http-response-headers-msg";
pub const RESPONSE_BODY_MESSAGE: &str = "http-response-body-msg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl MessageKind {
    /// Name of the message in the SPOE configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::RequestHeaders => REQUEST_HEADERS_MESSAGE,
            Self::RequestBody => REQUEST_BODY_MESSAGE,
            Self::ResponseHeaders => RESPONSE_HEADERS_MESSAGE,
            Self::ResponseBody => RESPONSE_BODY_MESSAGE,
        }
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            REQUEST_HEADERS_MESSAGE => Ok(Self::RequestHeaders),
            REQUEST_BODY_MESSAGE => Ok(Self::RequestBody),
            RESPONSE_HEADERS_MESSAGE => Ok(Self::ResponseHeaders),
            RESPONSE_BODY_MESSAGE => Ok(Self::ResponseBody),
            other => Err(Error::UnknownMessage(other.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// HTTP request rebuilt from a request-headers message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoRequest {
    pub method: Method,
    pub path: String,
    pub scheme: &'static str,
    /// Value of the `Host` header.
    pub authority: String,
    /// Client address as `ip:port`, or the bare ip when HAProxy did not send
    /// the port.
    pub remote_addr: Option<String>,
    pub headers: HeaderMap,
    /// Whether a body may follow the headers.
    pub body_expected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_expected: bool,
}

/// An `http-request-headers-msg` message.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeaders<'a> {
    message: &'a Message,
    body_parsing_size_limit: i64,
}

impl<'a> RequestHeaders<'a> {
    /// # Arguments
    ///
    /// * `message` - the `http-request-headers-msg` message.
    /// * `body_parsing_size_limit` - configured body size limit, exposed to
    ///   the processor.
    pub fn new(message: &'a Message, body_parsing_size_limit: i64) -> Self {
        Self {
            message,
            body_parsing_size_limit,
        }
    }

    /// Underlying SPOE message.
    pub fn message(&self) -> &'a Message {
        self.message
    }

    /// Rebuilds the HTTP request from the message fields.
    ///
    /// # Returns
    ///
    /// [`Error::MissingField`] when the method, the path or the `Host`
    /// header is absent, [`Error::MalformedInput`] when a field or the
    /// header list cannot be decoded. Headers that are not valid HTTP are
    /// left out of [`PseudoRequest::headers`].
    pub fn extract_request(&self) -> Result<PseudoRequest> {
        let headers = decode_headers(self.message)?;

        let method = string_field(self.message, "method")?.ok_or(Error::MissingField("method"))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::malformed(format!("invalid method {method:?}")))?;

        let path = string_field(self.message, "path")?
            .filter(|path| !path.is_empty())
            .ok_or(Error::MissingField("path"))?
            .to_string();

        let authority = headers
            .get(http::header::HOST)
            .ok_or(Error::MissingField("host"))?
            .to_str()
            .map_err(|_| Error::malformed("host header is not valid ASCII"))?
            .to_string();

        let https = match self.message.kv.get("https") {
            None => false,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| Error::malformed(format!("https field is not a boolean: {value}")))?,
        };

        let body_expected = body_expected(&headers)?;
        Ok(PseudoRequest {
            method,
            path,
            scheme: if https { "https" } else { "http" },
            authority,
            remote_addr: remote_addr(self.message)?,
            headers,
            body_expected,
        })
    }

    /// True when no body follows the headers.
    pub fn end_of_stream(&self) -> Result<bool> {
        Ok(!body_expected(&decode_headers(self.message)?)?)
    }

    /// HAProxy processing timeout of the transaction, e.g. `"1m"`.
    pub fn timeout(&self) -> Option<&'a str> {
        self.message.kv.get("timeout").and_then(TypedData::as_str)
    }

    /// Maximum number of body bytes the processor should analyze. Zero or
    /// negative means bodies are never requested.
    pub fn body_parsing_size_limit(&self) -> i64 {
        self.body_parsing_size_limit
    }
}

/// An `http-response-headers-msg` message.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeaders<'a> {
    message: &'a Message,
}

impl<'a> ResponseHeaders<'a> {
    pub fn new(message: &'a Message) -> Self {
        Self { message }
    }

    /// Underlying SPOE message.
    pub fn message(&self) -> &'a Message {
        self.message
    }

    /// Rebuilds the HTTP response. The status may be sent as a string or as
    /// an integer.
    pub fn extract_response(&self) -> Result<PseudoResponse> {
        let headers = decode_headers(self.message)?;

        let status = match self.message.kv.get("status") {
            None => return Err(Error::MissingField("status")),
            Some(TypedData::String(status)) => status
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::malformed(format!("invalid status {status:?}")))?,
            Some(value) => value
                .as_i64()
                .and_then(|status| u16::try_from(status).ok())
                .ok_or_else(|| Error::malformed(format!("invalid status {value}")))?,
        };
        let status = StatusCode::from_u16(status)
            .map_err(|_| Error::malformed(format!("status {status} out of range")))?;

        let body_expected = body_expected(&headers)?;
        Ok(PseudoResponse {
            status,
            headers,
            body_expected,
        })
    }

    /// True when no body follows the headers.
    pub fn end_of_stream(&self) -> Result<bool> {
        Ok(!body_expected(&decode_headers(self.message)?)?)
    }
}

/// An `http-request-body-msg` or `http-response-body-msg` message. The body
/// is always delivered in a single message.
#[derive(Debug, Clone, Copy)]
pub struct HttpBody<'a> {
    message: &'a Message,
}

impl<'a> HttpBody<'a> {
    pub fn new(message: &'a Message) -> Self {
        Self { message }
    }

    /// Underlying SPOE message.
    pub fn message(&self) -> &'a Message {
        self.message
    }

    /// Body bytes forwarded by HAProxy, possibly truncated to the
    /// `tune.bufsize` of the proxy. Empty when the field is absent.
    pub fn body(&self) -> &'a [u8] {
        self.message
            .kv
            .get("body")
            .and_then(TypedData::as_bytes)
            .unwrap_or_default()
    }

    /// Full size of the body when HAProxy only forwarded its beginning.
    pub fn body_size(&self) -> Option<u64> {
        self.message
            .kv
            .get("body_size")
            .and_then(TypedData::as_i64)
            .and_then(|size| u64::try_from(size).ok())
    }

    pub fn end_of_stream(&self) -> bool {
        true
    }
}

/// Reads the correlation identifier echoed back by HAProxy in the messages
/// following the request headers.
pub fn correlation_id(message: &Message) -> Result<u64> {
    let span_id = message
        .kv
        .get("span_id")
        .ok_or_else(|| Error::malformed("span_id field is missing"))?;
    let span_id = span_id
        .as_str()
        .ok_or_else(|| Error::malformed(format!("span_id field is not a string: {span_id}")))?;

    match span_id.trim().parse::<u64>() {
        Ok(0) => Err(Error::malformed("span_id is zero")),
        Ok(id) => Ok(id),
        Err(e) => Err(Error::malformed(format!("invalid span_id {span_id:?}: {e}"))),
    }
}

/// Headers that are not valid HTTP are left out of the map.
fn decode_headers(message: &Message) -> Result<HeaderMap> {
    decode_header_list(message.kv.get("headers").and_then(TypedData::as_bytes))
        .map(|headers| headers.to_header_map())
}

fn string_field<'a>(message: &'a Message, name: &'static str) -> Result<Option<&'a str>> {
    match message.kv.get(name) {
        None | Some(TypedData::Null) => Ok(None),
        Some(TypedData::String(value)) => Ok(Some(value)),
        Some(value) => Err(Error::malformed(format!(
            "{name} field is not a string: {value}"
        ))),
    }
}

/// A missing `Content-Length` leaves room for a body, e.g. with chunked
/// transfer encoding.
fn body_expected(headers: &HeaderMap) -> Result<bool> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(true);
    };

    value
        .to_str()
        .ok()
        .and_then(|length| length.trim().parse::<u64>().ok())
        .map(|length| length > 0)
        .ok_or_else(|| Error::malformed(format!("invalid content-length {value:?}")))
}

fn remote_addr(message: &Message) -> Result<Option<String>> {
    let ip = match message.kv.get("ip") {
        None | Some(TypedData::Null) => return Ok(None),
        Some(TypedData::Ipv4(ip)) => IpAddr::V4(*ip),
        Some(TypedData::Ipv6(ip)) => IpAddr::V6(*ip),
        Some(TypedData::String(ip)) => ip
            .parse()
            .map_err(|_| Error::malformed(format!("invalid client ip {ip:?}")))?,
        Some(value) => {
            return Err(Error::malformed(format!("ip field is not an address: {value}")))
        }
    };

    let port = match message.kv.get("ip_port") {
        None | Some(TypedData::Null) => return Ok(Some(ip.to_string())),
        Some(value) => value
            .as_i64()
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| Error::malformed(format!("invalid client port {value}")))?,
    };

    Ok(Some(SocketAddr::new(ip, port).to_string()))
}

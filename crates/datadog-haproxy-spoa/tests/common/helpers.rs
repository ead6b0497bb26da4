// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests: build the messages HAProxy would
//! send and read back the variables the agent set.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use datadog_haproxy_spoa::actions::{
    BLOCKED_VAR, BODY_VAR, HEADERS_VAR, REQUEST_BODY_VAR, SPAN_ID_VAR, STATUS_CODE_VAR,
};
use datadog_haproxy_spoa::spoe::{Actions, KvList, Message, Request, TypedData};
use datadog_haproxy_spoa::{
    encode_header_list, CacheConfig, HaProxySpoa, HaProxySpoaConfig, HeaderList, MessageKind,
    MessageProcessor,
};

use super::mocks::MockProcessor;

/// Builds a handler around a fresh [`MockProcessor`].
pub fn setup(config: HaProxySpoaConfig) -> (HaProxySpoa, Arc<MockProcessor>) {
    let processor = Arc::new(MockProcessor::new());
    let shared: Arc<dyn MessageProcessor> = processor.clone();
    let handler = HaProxySpoa::new(config, shared).expect("failed to build the handler");
    (handler, processor)
}

pub fn config_with_body_limit(body_parsing_size_limit: i64) -> HaProxySpoaConfig {
    HaProxySpoaConfig {
        body_parsing_size_limit,
        cache: CacheConfig {
            default_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(100),
        },
        ..Default::default()
    }
}

pub fn binary_headers(headers: &[(&str, &str)]) -> Vec<u8> {
    let mut list = HeaderList::new();
    for (name, value) in headers {
        list.append(*name, *value);
    }
    encode_header_list(&list)
}

pub fn request_headers_message(
    headers: &[(&str, &str)],
    method: &str,
    path: &str,
    body_length: usize,
    timeout: &str,
) -> Message {
    let content_length = body_length.to_string();
    let mut headers = headers.to_vec();
    if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("host")) {
        headers.push(("Host", "datadoghq.com"));
    }
    let has_length = headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-length"));
    if body_length > 0 && !has_length {
        headers.push(("Content-Length", &content_length));
    }

    let mut kv = KvList::new();
    kv.add("method", method)
        .add("path", path)
        .add("headers", binary_headers(&headers))
        .add("https", true)
        .add("timeout", timeout)
        .add("ip", IpAddr::V4(Ipv4Addr::new(123, 123, 123, 123)))
        .add("ip_port", 12345);
    Message::new(MessageKind::RequestHeaders.name(), kv)
}

pub fn request_body_message(body: &[u8], span_id: &str) -> Message {
    let mut kv = KvList::new();
    kv.add("body", body.to_vec()).add("span_id", span_id);
    Message::new(MessageKind::RequestBody.name(), kv)
}

pub fn response_headers_message(
    headers: &[(&str, &str)],
    status: &str,
    span_id: &str,
    body_length: usize,
) -> Message {
    let content_length = body_length.to_string();
    let mut headers = headers.to_vec();
    if body_length > 0 {
        headers.push(("Content-Length", &content_length));
    }

    let mut kv = KvList::new();
    kv.add("headers", binary_headers(&headers))
        .add("status", status)
        .add("span_id", span_id);
    Message::new(MessageKind::ResponseHeaders.name(), kv)
}

pub fn response_body_message(body: &[u8], span_id: &str) -> Message {
    let mut kv = KvList::new();
    kv.add("body_size", i32::try_from(body.len()).unwrap())
        .add("body", body.to_vec())
        .add("span_id", span_id);
    Message::new(MessageKind::ResponseBody.name(), kv)
}

/// Sends a frame made of `messages` and returns the actions set in reply.
pub fn send(handler: &HaProxySpoa, messages: Vec<Message>) -> Actions {
    let mut request = Request::new("test-engine", 1, 1);
    request.messages = messages;
    handler.handle(&mut request);
    request.actions
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedReply {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub status_code: i32,
}

/// What HAProxy reads from the variables after a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub span_id: Option<String>,
    pub body_requested: bool,
    pub blocked: Option<BlockedReply>,
}

pub fn reply(actions: &Actions) -> Reply {
    let blocked = actions.find_var(BLOCKED_VAR).and_then(TypedData::as_bool) == Some(true);
    if blocked {
        let headers = actions
            .find_var(HEADERS_VAR)
            .and_then(TypedData::as_str)
            .expect("blocked action without headers");
        let body = actions
            .find_var(BODY_VAR)
            .and_then(TypedData::as_bytes)
            .expect("blocked action without body");
        let status_code = match actions.find_var(STATUS_CODE_VAR) {
            Some(TypedData::Int32(status)) => *status,
            other => panic!("blocked action with invalid status code: {other:?}"),
        };
        return Reply {
            blocked: Some(BlockedReply {
                headers: parse_blocked_headers(headers),
                body: body.to_vec(),
                status_code,
            }),
            ..Reply::default()
        };
    }

    Reply {
        span_id: actions
            .find_var(SPAN_ID_VAR)
            .and_then(TypedData::as_str)
            .map(str::to_string),
        body_requested: actions.find_var(REQUEST_BODY_VAR).and_then(TypedData::as_bool) == Some(true),
        blocked: None,
    }
}

fn parse_blocked_headers(headers: &str) -> HashMap<String, String> {
    headers
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, value) = line.split_once(": ").expect("invalid header line");
            (name.to_string(), value.to_string())
        })
        .collect()
}

pub fn send_request_headers(
    handler: &HaProxySpoa,
    headers: &[(&str, &str)],
    method: &str,
    path: &str,
    body_length: usize,
) -> Reply {
    let message = request_headers_message(headers, method, path, body_length, "1m");
    reply(&send(handler, vec![message]))
}

pub fn send_request_body(handler: &HaProxySpoa, body: &[u8], span_id: &str) -> Reply {
    reply(&send(handler, vec![request_body_message(body, span_id)]))
}

pub fn send_response_headers(
    handler: &HaProxySpoa,
    headers: &[(&str, &str)],
    status: &str,
    span_id: &str,
    body_length: usize,
) -> Reply {
    let message = response_headers_message(headers, status, span_id, body_length);
    reply(&send(handler, vec![message]))
}

pub fn send_response_body(handler: &HaProxySpoa, body: &[u8], span_id: &str) -> Reply {
    reply(&send(handler, vec![response_body_message(body, span_id)]))
}

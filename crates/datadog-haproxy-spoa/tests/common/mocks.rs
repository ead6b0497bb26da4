// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock tracer and security processor for testing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use datadog_haproxy_spoa::actions::{
    DATADOG_PARENT_ID_KEY, DATADOG_SAMPLING_PRIORITY_KEY, DATADOG_TRACE_ID_KEY,
};
use datadog_haproxy_spoa::{
    ActionDecision, BlockAction, ContinueAction, HttpBody, MessageKind, MessageProcessor,
    Outcome, RequestHeaders, RequestState, ResponseHeaders, Transaction,
};
use http::{HeaderMap, HeaderValue};

/// User agent blocked on request headers.
pub const BLOCKED_USER_AGENT: &str = "dd-test-scanner-log-block";
/// Response header value blocked on response headers.
pub const BLOCKED_RESPONSE_HEADER: &str = "match-response-header";
/// Body payload blocked on either body message.
pub const BLOCKED_PAYLOAD: &str = "<script>";

pub const BLOCKING_RESPONSE_BODY: &str =
    r#"{"errors":[{"title":"You've been blocked","detail":"Sorry, you cannot access this page."}]}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub span_id: u64,
    pub resource: String,
    pub outcome: Outcome,
}

/// Hands out span ids and records the spans once finished.
#[derive(Default)]
pub struct MockTracer {
    last_span_id: AtomicU64,
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl MockTracer {
    pub fn start_span(&self, resource: String) -> MockSpan {
        MockSpan {
            span_id: self.last_span_id.fetch_add(1, Ordering::Relaxed) + 1,
            resource,
            finished: Arc::clone(&self.finished),
        }
    }

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.finished.lock().unwrap().clone()
    }
}

pub struct MockSpan {
    span_id: u64,
    resource: String,
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl Transaction for MockSpan {
    fn span_id(&self) -> Option<u64> {
        Some(self.span_id)
    }

    fn finish(&mut self, outcome: Outcome) {
        self.finished.lock().unwrap().push(FinishedSpan {
            span_id: self.span_id,
            resource: self.resource.clone(),
            outcome,
        });
    }
}

/// Security processor matching a handful of fixed patterns instead of
/// running a WAF.
pub struct MockProcessor {
    pub tracer: MockTracer,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self {
            tracer: MockTracer::default(),
        }
    }

    fn block(status: u16) -> ActionDecision {
        ActionDecision::Block(BlockAction {
            status,
            headers: vec![(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )],
            body: BLOCKING_RESPONSE_BODY.as_bytes().to_vec(),
        })
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

fn propagation_headers(span_id: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(DATADOG_TRACE_ID_KEY, HeaderValue::from(span_id));
    headers.insert(DATADOG_PARENT_ID_KEY, HeaderValue::from(span_id));
    headers.insert(DATADOG_SAMPLING_PRIORITY_KEY, HeaderValue::from_static("1"));
    headers
}

impl MessageProcessor for MockProcessor {
    fn on_request_headers(
        &self,
        request: &RequestHeaders<'_>,
    ) -> anyhow::Result<(RequestState, ActionDecision)> {
        let pseudo = request.extract_request()?;
        let span = self
            .tracer
            .start_span(format!("{} {}", pseudo.method, pseudo.path));
        let span_id = span.span_id;
        let state = RequestState::new(Box::new(span));

        let user_agent = pseudo
            .headers
            .get(http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if user_agent.contains(BLOCKED_USER_AGENT) {
            return Ok((state, Self::block(403)));
        }

        let body = pseudo.body_expected
            && is_json(&pseudo.headers)
            && request.body_parsing_size_limit() > 0;
        let decision = ContinueAction::new(MessageKind::RequestHeaders)
            .with_body(body)
            .with_header_mutations(propagation_headers(span_id));
        Ok((state, ActionDecision::Continue(decision)))
    }

    fn on_request_body(
        &self,
        body: &HttpBody<'_>,
        state: &mut RequestState,
    ) -> anyhow::Result<ActionDecision> {
        anyhow::ensure!(state.is_ongoing(), "received request body too early");

        if String::from_utf8_lossy(body.body()).contains(BLOCKED_PAYLOAD) {
            return Ok(Self::block(403));
        }
        Ok(ActionDecision::Continue(ContinueAction::new(
            MessageKind::RequestBody,
        )))
    }

    fn on_response_headers(
        &self,
        response: &ResponseHeaders<'_>,
        _state: &mut RequestState,
    ) -> anyhow::Result<ActionDecision> {
        let pseudo = response.extract_response()?;

        let matched = pseudo
            .headers
            .get("test")
            .is_some_and(|value| value == BLOCKED_RESPONSE_HEADER);
        if matched {
            return Ok(Self::block(418));
        }

        Ok(ActionDecision::Continue(
            ContinueAction::new(MessageKind::ResponseHeaders)
                .with_body(pseudo.body_expected && is_json(&pseudo.headers)),
        ))
    }

    fn on_response_body(
        &self,
        body: &HttpBody<'_>,
        _state: &mut RequestState,
    ) -> anyhow::Result<ActionDecision> {
        if String::from_utf8_lossy(body.body()).contains(BLOCKED_PAYLOAD) {
            return Ok(Self::block(403));
        }
        Ok(ActionDecision::Finish)
    }
}

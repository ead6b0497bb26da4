// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Contract of the security and tracing pipeline driven by the dispatch loop.

use http::HeaderMap;

use crate::message::{HttpBody, MessageKind, RequestHeaders, ResponseHeaders};
use crate::state::RequestState;

/// Let the transaction go on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueAction {
    /// Message the decision answers.
    pub message_kind: MessageKind,
    /// Ask HAProxy to forward the body of the current direction.
    pub body: bool,
    /// Trace propagation headers produced by the tracer injection, only
    /// meaningful on request headers.
    pub header_mutations: Option<HeaderMap>,
}

impl ContinueAction {
    pub fn new(message_kind: MessageKind) -> Self {
        Self {
            message_kind,
            body: false,
            header_mutations: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: bool) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_header_mutations(mut self, headers: HeaderMap) -> Self {
        self.header_mutations = Some(headers);
        self
    }
}

/// Replace the upstream response with a synthesized one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAction {
    pub status: u16,
    /// Response headers in emission order, names kept as written.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDecision {
    Continue(ContinueAction),
    Block(BlockAction),
    /// The transaction is over, nothing to send back.
    Finish,
}

impl ActionDecision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue(_))
    }
}

/// The security and tracing pipeline fed with the HTTP events rebuilt from
/// SPOE messages.
///
/// The protocol message is handed over with each event; implementations
/// read it through the typed adapters only.
pub trait MessageProcessor: Send + Sync {
    /// Opens the transaction: starts the span, runs the request rules and
    /// returns the state that will follow the request until its end.
    fn on_request_headers(
        &self,
        request: &RequestHeaders<'_>,
    ) -> anyhow::Result<(RequestState, ActionDecision)>;

    fn on_request_body(
        &self,
        body: &HttpBody<'_>,
        state: &mut RequestState,
    ) -> anyhow::Result<ActionDecision>;

    fn on_response_headers(
        &self,
        response: &ResponseHeaders<'_>,
        state: &mut RequestState,
    ) -> anyhow::Result<ActionDecision>;

    fn on_response_body(
        &self,
        body: &HttpBody<'_>,
        state: &mut RequestState,
    ) -> anyhow::Result<ActionDecision>;
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Why an in-flight transaction was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The response went through the agent and the transaction ended normally.
    Completed,
    /// The request or response was blocked.
    Blocked,
    /// The transaction never completed (backend timeout, body never sent,
    /// agent shutdown) and was reclaimed by the request-state cache.
    Abandoned,
}

/// Processor-specific context attached to one HTTP transaction, usually the
/// root span of the request and its security context.
pub trait Transaction: Send + Sync {
    /// Identifier of the span opened for the transaction, if any. It becomes
    /// the correlation identifier of the following SPOE messages.
    fn span_id(&self) -> Option<u64>;

    /// Closes the span and flushes whatever the processor accumulated. Called
    /// at most once per transaction.
    fn finish(&mut self, outcome: Outcome);
}

/// Which body, if any, the agent asked HAProxy to forward next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// One in-flight HTTP transaction as seen through the SPOE messages.
///
/// A state is only mutated by the frame handler currently processing a
/// message for its correlation identifier. HAProxy pins a transaction to a
/// single stream, so two frames never carry messages for the same identifier
/// concurrently; this is relied upon, not verified.
pub struct RequestState {
    context: Box<dyn Transaction>,
    ongoing: bool,
    awaiting_body: Option<Direction>,
    timeout: Option<String>,
}

impl RequestState {
    pub fn new(context: Box<dyn Transaction>) -> Self {
        Self {
            context,
            ongoing: true,
            awaiting_body: None,
            timeout: None,
        }
    }

    /// Identifier of the span of the transaction, used as cache key.
    pub fn span_id(&self) -> Option<u64> {
        self.context.span_id()
    }

    /// False once [`RequestState::close`] has been called.
    pub fn is_ongoing(&self) -> bool {
        self.ongoing
    }

    /// Direction of the body HAProxy was asked to send next, if any.
    pub fn awaiting_body(&self) -> Option<Direction> {
        self.awaiting_body
    }

    pub fn set_awaiting_body(&mut self, direction: Option<Direction>) {
        self.awaiting_body = direction;
    }

    /// Timeout declared by HAProxy with the request headers. Messages that do
    /// not carry one refresh the cache entry with it.
    pub fn timeout(&self) -> Option<&str> {
        self.timeout.as_deref()
    }

    pub fn set_timeout(&mut self, timeout: Option<&str>) {
        self.timeout = timeout.map(str::to_string);
    }

    pub fn context(&self) -> &dyn Transaction {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> &mut dyn Transaction {
        self.context.as_mut()
    }

    /// Finalizes the transaction. Safe to call several times: only the first
    /// call reaches [`Transaction::finish`].
    pub fn close(&mut self, outcome: Outcome) {
        if !self.ongoing {
            return;
        }
        self.ongoing = false;
        self.awaiting_body = None;
        self.context.finish(outcome);
    }
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestState")
            .field("span_id", &self.span_id())
            .field("ongoing", &self.ongoing)
            .field("awaiting_body", &self.awaiting_body)
            .finish_non_exhaustive()
    }
}

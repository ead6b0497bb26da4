// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-frame dispatch of the SPOE messages to the [`MessageProcessor`].
//!
//! A transaction goes through the following messages, all but the first one
//! carrying the `span_id` returned when its request headers were processed:
//!
//! ```text
//! request headers ─┬─> request body ─┬─> response headers ─┬─> response body ─> done
//!                  └─────────────────┘                     └──────────────────> done
//! ```
//!
//! Between two messages the [`RequestState`] lives in the
//! [`RequestStateCache`]; it is taken out while a message is processed and
//! stored back, with a refreshed expiry, unless the transaction is over.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::actions::{translate, MISSING_SPAN_MESSAGE};
use crate::cache::{EvictionReason, RequestStateCache};
use crate::config::HaProxySpoaConfig;
use crate::error::{Error, Result};
use crate::message::{correlation_id, HttpBody, MessageKind, RequestHeaders, ResponseHeaders};
use crate::processor::{ActionDecision, ContinueAction, MessageProcessor};
use crate::spoe::{Actions, Message, Request};
use crate::state::{Direction, Outcome, RequestState};

/// Entry point registered with the SPOA server for `NOTIFY` frames.
pub struct HaProxySpoa {
    processor: Arc<dyn MessageProcessor>,
    cache: RequestStateCache,
    config: HaProxySpoaConfig,
}

impl HaProxySpoa {
    /// Builds the handler and starts the request state sweeper.
    ///
    /// # Arguments
    ///
    /// * `config` - agent configuration. Its cancellation token also stops
    ///   the sweeper.
    /// * `processor` - security processor receiving every HTTP event.
    ///
    /// # Returns
    ///
    /// An [`Error::InternalError`] when called outside of a Tokio runtime.
    pub fn new(config: HaProxySpoaConfig, processor: Arc<dyn MessageProcessor>) -> Result<Self> {
        if config.body_parsing_size_limit <= 0 {
            info!("haproxy_spoa: body parsing size limit set to 0 or negative. The request and response bodies will NOT be analyzed.");
        }
        info!(
            "haproxy_spoa: configuration: blocking_unavailable={}, body_parsing_size_limit={}B, request_timeout={:?}, sweep_interval={:?}",
            config.blocking_unavailable,
            config.body_parsing_size_limit,
            config.cache.default_timeout,
            config.cache.sweep_interval,
        );

        let cache = RequestStateCache::with_cancellation(
            config.cache.clone(),
            Arc::new(finalize_evicted),
            &config.cancellation,
        );
        cache.start()?;

        Ok(Self {
            processor,
            cache,
            config,
        })
    }

    /// Configuration the handler was built with.
    pub fn config(&self) -> &HaProxySpoaConfig {
        &self.config
    }

    /// Cache holding the state of the transactions in flight.
    pub fn cache(&self) -> &RequestStateCache {
        &self.cache
    }

    /// Handles every message of the frame in order, appending the resulting
    /// actions to `request`. The first failing message is logged and ends
    /// the processing of the frame; actions of the previous messages are
    /// kept.
    pub fn handle(&self, request: &mut Request) {
        let span = tracing::debug_span!(
            "frame",
            stream_id = request.stream_id,
            frame_id = request.frame_id
        );
        let _entered = span.enter();

        for message in &request.messages {
            if let Err(e) = self.handle_message(message, &mut request.actions) {
                match &e {
                    Error::InternalError(_) | Error::Processor(_) => {
                        error!("haproxy_spoa: failed to handle {}: {e}", message.name);
                    }
                    _ => warn!("haproxy_spoa: failed to handle {}: {e}", message.name),
                }
                return;
            }
        }
    }

    /// Stops the sweeper and finalizes every transaction still in flight as
    /// abandoned. Also run when the handler is dropped.
    pub fn close(&self) {
        self.cache.stop();
        self.cache.clear();
    }

    fn handle_message(&self, message: &Message, actions: &mut Actions) -> Result<()> {
        let kind = message.name.parse::<MessageKind>()?;
        debug!("haproxy_spoa: handling {kind}");

        match kind {
            MessageKind::RequestHeaders => {
                let request = RequestHeaders::new(message, self.config.body_parsing_size_limit);
                let (mut state, decision) = self.processor.on_request_headers(&request)?;
                state.set_timeout(request.timeout());
                self.complete(kind, None, state, decision, actions)
            }
            MessageKind::RequestBody => self.with_state(
                kind,
                message,
                "received request body without request headers",
                actions,
                |state| self.processor.on_request_body(&HttpBody::new(message), state),
            ),
            MessageKind::ResponseHeaders => self.with_state(
                kind,
                message,
                "received response headers without request context",
                actions,
                |state| {
                    self.processor
                        .on_response_headers(&ResponseHeaders::new(message), state)
                },
            ),
            MessageKind::ResponseBody => self.with_state(
                kind,
                message,
                "received response body without request context",
                actions,
                |state| self.processor.on_response_body(&HttpBody::new(message), state),
            ),
        }
    }

    /// Runs `process` on the state of the transaction `message` belongs to.
    fn with_state<F>(
        &self,
        kind: MessageKind,
        message: &Message,
        violation: &'static str,
        actions: &mut Actions,
        process: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut RequestState) -> anyhow::Result<ActionDecision>,
    {
        let id = correlation_id(message)?;
        let mut state = self.cache.take(id).map_err(|e| match e {
            Error::NotFound(_) => Error::ProtocolViolation(violation),
            other => other,
        })?;

        match process(&mut state) {
            Ok(decision) => self.complete(kind, Some(id), state, decision, actions),
            Err(e) => {
                self.keep(id, state)?;
                Err(e.into())
            }
        }
    }

    /// Translates `decision` into actions, then either stores the state back
    /// or ends the transaction.
    fn complete(
        &self,
        kind: MessageKind,
        id: Option<u64>,
        mut state: RequestState,
        decision: ActionDecision,
        actions: &mut Actions,
    ) -> Result<()> {
        let decision = self.enforce_config(kind, decision);
        let id = id.or_else(|| state.span_id()).filter(|id| *id != 0);

        if let Err(e) = translate(kind, &decision, id, actions) {
            state.close(Outcome::Abandoned);
            return Err(e);
        }

        match &decision {
            ActionDecision::Continue(action) => {
                let done = match kind {
                    MessageKind::ResponseBody => true,
                    MessageKind::ResponseHeaders => !action.body,
                    MessageKind::RequestHeaders | MessageKind::RequestBody => false,
                };
                if done {
                    state.close(Outcome::Completed);
                } else {
                    state.set_awaiting_body(action.body.then_some(direction(kind)));
                }
            }
            ActionDecision::Block(action) => {
                debug!("haproxy_spoa: blocking {kind} with status {}", action.status);
                state.close(Outcome::Blocked);
            }
            ActionDecision::Finish => state.close(Outcome::Completed),
        }

        // A terminal decision on request headers may lack an id: that state
        // never reached the cache.
        let Some(id) = id else {
            if state.is_ongoing() {
                state.close(Outcome::Abandoned);
                return Err(Error::internal(MISSING_SPAN_MESSAGE));
            }
            return Ok(());
        };
        if state.is_ongoing() {
            self.keep(id, state)
        } else {
            self.cache.discard(id, state);
            Ok(())
        }
    }

    fn keep(&self, id: u64, state: RequestState) -> Result<()> {
        let timeout = state.timeout().map(str::to_string);
        self.cache.store(id, state, timeout.as_deref())
    }

    fn enforce_config(&self, kind: MessageKind, decision: ActionDecision) -> ActionDecision {
        match decision {
            ActionDecision::Block(action) if self.config.blocking_unavailable => {
                debug!(
                    "haproxy_spoa: blocking unavailable, {kind} would have been blocked with status {}",
                    action.status
                );
                ActionDecision::Continue(ContinueAction::new(kind))
            }
            ActionDecision::Continue(mut action)
                if action.body && self.config.body_parsing_size_limit <= 0 =>
            {
                debug!("haproxy_spoa: body analysis disabled, not requesting the body after {kind}");
                action.body = false;
                ActionDecision::Continue(action)
            }
            decision => decision,
        }
    }
}

impl Drop for HaProxySpoa {
    fn drop(&mut self) {
        self.close();
    }
}

fn direction(kind: MessageKind) -> Direction {
    match kind {
        MessageKind::RequestHeaders | MessageKind::RequestBody => Direction::Request,
        MessageKind::ResponseHeaders | MessageKind::ResponseBody => Direction::Response,
    }
}

fn finalize_evicted(id: u64, mut state: RequestState, reason: EvictionReason) {
    if state.is_ongoing() {
        debug!("haproxy_spoa: finalizing unfinished request for span id {id} ({reason:?})");
        state.close(Outcome::Abandoned);
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request-state machine of a HAProxy Stream Processing Offload Agent
//! running App & API Protection.
//!
//! HAProxy sends one SPOE message per HTTP event (request headers, request
//! body, response headers, response body). [`HaProxySpoa::handle`] rebuilds
//! each event, correlates it with the transaction it belongs to through the
//! span id handed back to HAProxy, feeds it to a [`MessageProcessor`] and
//! answers with the `set-var` actions the HAProxy configuration acts upon.
//!
//! The SPOP framing and the security engine are provided by the caller:
//! frames come in as [`spoe::Request`] values and decisions come out of the
//! [`MessageProcessor`] implementation.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod actions;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod headers;
pub mod logger;
pub mod message;
pub mod processor;
pub mod spoe;
pub mod state;

pub use cache::{CacheConfig, EvictionReason, RequestStateCache};
pub use config::{ConfigError, HaProxySpoaConfig};
pub use error::{Error, Result};
pub use handler::HaProxySpoa;
pub use headers::{decode_header_list, encode_header_list, HeaderList};
pub use message::{HttpBody, MessageKind, RequestHeaders, ResponseHeaders};
pub use processor::{ActionDecision, BlockAction, ContinueAction, MessageProcessor};
pub use state::{Direction, Outcome, RequestState, Transaction};

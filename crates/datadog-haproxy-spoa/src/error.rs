// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while handling a SPOE message.
///
/// Every variant is local to the message being processed: the dispatch loop
/// logs it and stops handling the current frame, but never propagates it to
/// the agent server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Corrupt binary header list, unparsable numeric field or invalid
    /// correlation identifier.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A field required to rebuild the HTTP request or response is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A message arrived out of the expected request/response sequence.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// No in-flight request is tracked for this correlation identifier.
    #[error("no request state found for span id {0}")]
    NotFound(u64),

    /// Bookkeeping invariant of the agent itself was violated.
    #[error("internal error: {0}")]
    InternalError(String),

    /// The message name is not one the agent knows how to handle.
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// The message processor failed to handle the event.
    #[error("message processor error: {0:#}")]
    Processor(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

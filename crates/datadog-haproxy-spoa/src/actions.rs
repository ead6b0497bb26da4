// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Translation of processor decisions into the `set-var` actions read by the
//! HAProxy configuration.
//!
//! Variable names are a contract with that configuration (`var(txn.dd.*)`
//! lookups and the Lua script building blocking responses): renaming one
//! here requires the same change on the HAProxy side.

use http::HeaderMap;

use crate::error::{Error, Result};
use crate::message::MessageKind;
use crate::processor::{ActionDecision, BlockAction, ContinueAction};
use crate::spoe::{Actions, Scope};

pub const SPAN_ID_VAR: &str = "span_id";
pub const REQUEST_BODY_VAR: &str = "request_body";
pub const BLOCKED_VAR: &str = "blocked";
pub const HEADERS_VAR: &str = "headers";
pub const BODY_VAR: &str = "body";
pub const STATUS_CODE_VAR: &str = "status_code";

pub const DATADOG_TRACE_ID_KEY: &str = "x-datadog-trace-id";
pub const DATADOG_PARENT_ID_KEY: &str = "x-datadog-parent-id";
pub const DATADOG_ORIGIN_KEY: &str = "x-datadog-origin";
pub const DATADOG_SAMPLING_PRIORITY_KEY: &str = "x-datadog-sampling-priority";
pub const DATADOG_TAGS_KEY: &str = "x-datadog-tags";

/// Propagation header produced by the tracer, and the variable HAProxy
/// copies it from when forwarding the request upstream.
pub const PROPAGATION_VARIABLES: [(&str, &str); 5] = [
    (DATADOG_TRACE_ID_KEY, "x_datadog_trace_id"),
    (DATADOG_PARENT_ID_KEY, "x_datadog_parent_id"),
    (DATADOG_ORIGIN_KEY, "x_datadog_origin"),
    (DATADOG_SAMPLING_PRIORITY_KEY, "x_datadog_sampling_priority"),
    (DATADOG_TAGS_KEY, "x_datadog_tags"),
];

const SCOPE: Scope = Scope::Transaction;

pub(crate) const MISSING_SPAN_MESSAGE: &str =
    "failed to retrieve the span from the context of the request";

/// Appends to `actions` the variables answering `decision`, taken on a
/// message of type `kind`.
///
/// # Arguments
///
/// * `kind` - type of the message being answered. The span id and the
///   propagation variables are only set when it is
///   [`MessageKind::RequestHeaders`], whatever the decision is tagged with.
/// * `span_id` - identifier of the span opened for the transaction, required
///   to continue after request headers.
///
/// # Returns
///
/// An [`Error::InternalError`] when the span id is required but missing or
/// zero. Nothing is appended in that case.
pub fn translate(
    kind: MessageKind,
    decision: &ActionDecision,
    span_id: Option<u64>,
    actions: &mut Actions,
) -> Result<()> {
    match decision {
        ActionDecision::Continue(action) => translate_continue(kind, action, span_id, actions),
        ActionDecision::Block(action) => {
            translate_block(action, actions);
            Ok(())
        }
        ActionDecision::Finish => Ok(()),
    }
}

fn translate_continue(
    kind: MessageKind,
    action: &ContinueAction,
    span_id: Option<u64>,
    actions: &mut Actions,
) -> Result<()> {
    if kind == MessageKind::RequestHeaders {
        let span_id = span_id
            .filter(|id| *id != 0)
            .ok_or_else(|| Error::internal(MISSING_SPAN_MESSAGE))?;
        actions.set_var(SCOPE, SPAN_ID_VAR, span_id.to_string());

        if let Some(mutations) = &action.header_mutations {
            set_propagation_vars(mutations, actions);
        }
    }

    if action.body {
        actions.set_var(SCOPE, REQUEST_BODY_VAR, true);
    }
    Ok(())
}

fn set_propagation_vars(mutations: &HeaderMap, actions: &mut Actions) {
    for (header, var) in PROPAGATION_VARIABLES {
        let Some(value) = mutations.get(header) else {
            continue;
        };
        match value.to_str() {
            Ok(value) => actions.set_var(SCOPE, var, value),
            Err(_) => tracing::debug!("haproxy_spoa: skipping non-ASCII propagation header {header}"),
        }
    }
}

fn translate_block(action: &BlockAction, actions: &mut Actions) {
    actions.set_var(SCOPE, BLOCKED_VAR, true);
    actions.set_var(SCOPE, HEADERS_VAR, serialize_headers(&action.headers));
    actions.set_var(SCOPE, BODY_VAR, action.body.clone());
    actions.set_var(SCOPE, STATUS_CODE_VAR, i32::from(action.status));
}

/// `Name: value` lines, each terminated by `\n`, split back into headers by
/// the Lua script of the HAProxy configuration.
fn serialize_headers(headers: &[(String, String)]) -> String {
    headers.iter().fold(String::new(), |mut out, (name, value)| {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
        out
    })
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the SPOA process.
//!
//! Lines look like:
//!
//! ```text
//! HAPROXY_SPOA | WARN | haproxy_spoa: protocol violation: received request body without request headers
//! HAPROXY_SPOA | DEBUG | frame{stream_id=1 frame_id=3}: haproxy_spoa: evicted 2 expired request states
//! ```

use std::fmt;

use tracing_core::dispatcher::{self, Dispatch, SetGlobalDefaultError};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Prefixes every line with `HAPROXY_SPOA` and the level, followed by the
/// active spans from the root and the event fields.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "HAPROXY_SPOA | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber. `log_level` is an `EnvFilter` directive,
/// `info` when it cannot be parsed.
pub fn init(log_level: &str) -> Result<(), SetGlobalDefaultError> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();
    dispatcher::set_global_default(Dispatch::new(subscriber))
}

// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Log configuration for discovery server binaries.

use std::io::{self, IsTerminal};

use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::{format, Writer};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Configures the stderr log.
#[derive(Debug, Clone)]
pub struct StderrLogConfig {
    /// An optional prefix for each stderr log line.
    pub prefix: Option<String>,
    /// A filter which determines which events are emitted to the log.
    pub filter: Targets,
}

/// Installs a global subscriber that writes events to stderr.
///
/// Fails if a global subscriber was installed before.
pub fn configure(config: StderrLogConfig) -> anyhow::Result<()> {
    let stderr_log_layer = fmt::layer()
        .event_format(PrefixFormat {
            inner: format(),
            prefix: config.prefix,
        })
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_filter(config.filter);

    tracing_subscriber::registry()
        .with(stderr_log_layer)
        .try_init()?;
    Ok(())
}

/// A wrapper around a [`FormatEvent`] that adds an optional prefix to each event.
#[derive(Debug)]
pub struct PrefixFormat<F> {
    inner: F,
    prefix: Option<String>,
}

impl<F, C, N> FormatEvent<C, N> for PrefixFormat<F>
where
    C: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<C, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, C, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(writer, "{prefix}: ")?;
        }
        self.inner.format_event(ctx, writer, event)
    }
}

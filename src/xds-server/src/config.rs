// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command-line configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::filter::Targets;

use crate::logging::StderrLogConfig;

const NO_VERSION_HELP_TEMPLATE: &str = "{about}

USAGE:
    {usage}

{all-args}";

/// Parses command-line arguments with the help template shared by all discovery binaries.
pub fn parse_args<O>() -> O
where
    O: Parser,
{
    let clap = O::command()
        .disable_version_flag(true)
        .args_override_self(true)
        .help_template(NO_VERSION_HELP_TEMPLATE);
    match O::from_arg_matches(&clap.get_matches()) {
        Ok(args) => args,
        Err(error) => error.exit(),
    }
}

/// The flavor of discovery stream to replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StreamMode {
    /// State-of-the-world delivery.
    Sotw,
    /// Incremental delivery.
    Delta,
}

/// Replays a recorded sequence of discovery requests against a snapshot and prints the
/// responses a server would send, one JSON document per line.
#[derive(Debug, Parser)]
pub struct ReplayArgs {
    /// Path to a JSON file containing the snapshot to serve.
    #[clap(long, value_name = "PATH")]
    pub snapshot: PathBuf,
    /// Path to a JSON file containing an array of requests.
    #[clap(long, value_name = "PATH")]
    pub requests: PathBuf,
    /// The flavor of the replayed stream.
    #[clap(long, value_enum, default_value = "sotw")]
    pub mode: StreamMode,
    /// The node the snapshot is served to. Used for requests that do not name a node.
    #[clap(long, env = "XDS_NODE_ID", value_name = "ID", default_value = "replay")]
    pub node_id: String,
    /// Which log messages to emit.
    ///
    /// See the `tracing_subscriber::filter::Targets` documentation for the syntax.
    #[clap(
        long,
        env = "XDS_LOG_FILTER",
        value_name = "FILTER",
        default_value = "info"
    )]
    pub log_filter: Targets,
    /// A prefix for every log line.
    #[clap(long, env = "XDS_LOG_PREFIX", value_name = "PREFIX")]
    pub log_prefix: Option<String>,
}

impl ReplayArgs {
    pub fn log_config(&self) -> StderrLogConfig {
        StderrLogConfig {
            prefix: self.log_prefix.clone(),
            filter: self.log_filter.clone(),
        }
    }
}

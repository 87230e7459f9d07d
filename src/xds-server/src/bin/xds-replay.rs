// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Replays recorded discovery requests against a snapshot.

use std::fs;
use std::path::Path;
use std::process;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use xds_server::config::{self, ReplayArgs, StreamMode};
use xds_server::transport::{self as xds_transport, ChannelClient};
use xds_server::{logging, Server, SnapshotCache};
use xds_stream::protocol::{DeltaDiscoveryRequest, DiscoveryRequest, Node};
use xds_stream::Snapshot;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: ReplayArgs = config::parse_args();
    if let Err(err) = run(args).await {
        eprintln!("xds-replay: fatal: {err:#}");
        process::exit(1);
    }
}

async fn run(args: ReplayArgs) -> anyhow::Result<()> {
    logging::configure(args.log_config())?;

    let snapshot: Snapshot = read_json(&args.snapshot)?;
    let cache = SnapshotCache::new();
    cache.set_snapshot(&args.node_id, snapshot);
    let server = Server::new(cache);
    let node = Node {
        id: args.node_id.clone(),
        ..Default::default()
    };

    match args.mode {
        StreamMode::Sotw => {
            let mut requests: Vec<DiscoveryRequest> = read_json(&args.requests)?;
            for request in &mut requests {
                request.node.get_or_insert_with(|| node.clone());
            }
            let (transport, client) = xds_transport::channel();
            let serve = server.serve_sotw(transport);
            let (result, printed) = tokio::join!(serve, replay(client, requests));
            result?;
            let printed = printed?;
            info!(responses = printed, "replay finished");
        }
        StreamMode::Delta => {
            let mut requests: Vec<DeltaDiscoveryRequest> = read_json(&args.requests)?;
            for request in &mut requests {
                request.node.get_or_insert_with(|| node.clone());
            }
            let (transport, client) = xds_transport::channel();
            let serve = server.serve_delta(transport);
            let (result, printed) = tokio::join!(serve, replay(client, requests));
            result?;
            let printed = printed?;
            info!(responses = printed, "replay finished");
        }
    }
    Ok(())
}

/// Sends every request, closes the stream, and prints each response on its own line.
///
/// Returns the number of responses printed.
async fn replay<Req, Resp>(
    client: ChannelClient<Req, Resp>,
    requests: Vec<Req>,
) -> anyhow::Result<usize>
where
    Req: std::fmt::Debug,
    Resp: Serialize,
{
    for request in requests {
        client.send(request)?;
    }
    let mut responses = client.close();
    let mut printed = 0;
    while let Some(response) = responses.recv().await {
        println!("{}", serde_json::to_string(&response)?);
        printed += 1;
    }
    Ok(printed)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

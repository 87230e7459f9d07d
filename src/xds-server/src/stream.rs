// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Discovery stream drivers.
//!
//! Every stream is served by a single task. The task owns the stream's [`StreamState`] and
//! reacts to three kinds of events:
//!
//!  * A request from the client opens or changes a subscription. Its type is reconciled right
//!    away.
//!  * A change of the node's snapshot. Every subscribed type is reconciled, in priority order if
//!    the stream asked for ordered delivery.
//!  * Server shutdown, which ends the stream without sending anything further.
//!
//! Responses are recorded in the stream's state only after the transport accepted them, so a
//! failed send never makes the server believe the client holds resources it never received.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use xds_stream::protocol::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse, Request,
};
use xds_stream::{
    DeliveryMode, Diff, OrderingController, Reconciler, RequestError, Snapshot, StreamPhase,
    StreamState, TypeUrl, VersionSet,
};

use crate::cache::{SnapshotCache, SnapshotWatch};
use crate::transport::DiscoveryTransport;

/// Errors that end a stream.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The client sent a request that cannot be applied to the stream.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    /// The transport failed.
    #[error("transport error: {0:#}")]
    Transport(#[from] anyhow::Error),
    /// The server shut down while the stream was active.
    #[error("stream cancelled")]
    Cancelled,
}

/// A flavor of the discovery protocol.
pub trait Protocol: Send + 'static {
    type Request: Request + Debug + Send + 'static;
    type Response: Debug + Send + 'static;

    /// How diffs are computed for streams of this flavor.
    const MODE: DeliveryMode;

    /// Applies the subscription changes carried by `request` to `state`, returning whether the
    /// requested names changed.
    fn apply(
        state: &mut StreamState,
        type_url: &TypeUrl,
        request: &Self::Request,
    ) -> Result<bool, RequestError>;

    /// Turns a diff into a response, returning the versions to record once it was sent.
    fn respond(diff: Diff, nonce: String) -> (Self::Response, VersionSet);
}

/// The state-of-the-world flavor.
#[derive(Debug)]
pub struct Sotw;

impl Protocol for Sotw {
    type Request = DiscoveryRequest;
    type Response = DiscoveryResponse;

    const MODE: DeliveryMode = DeliveryMode::Sotw;

    fn apply(
        state: &mut StreamState,
        type_url: &TypeUrl,
        request: &DiscoveryRequest,
    ) -> Result<bool, RequestError> {
        state.apply_sotw(type_url, &request.resource_names)
    }

    fn respond(diff: Diff, nonce: String) -> (DiscoveryResponse, VersionSet) {
        diff.into_sotw_response(nonce)
    }
}

/// The incremental flavor.
#[derive(Debug)]
pub struct Delta;

impl Protocol for Delta {
    type Request = DeltaDiscoveryRequest;
    type Response = DeltaDiscoveryResponse;

    const MODE: DeliveryMode = DeliveryMode::Delta;

    fn apply(
        state: &mut StreamState,
        type_url: &TypeUrl,
        request: &DeltaDiscoveryRequest,
    ) -> Result<bool, RequestError> {
        state.apply_delta(
            type_url,
            &request.resource_names_subscribe,
            &request.resource_names_unsubscribe,
            &request.initial_resource_versions,
        )
    }

    fn respond(diff: Diff, nonce: String) -> (DeltaDiscoveryResponse, VersionSet) {
        diff.into_delta_response(nonce)
    }
}

/// Serves discovery streams from a [`SnapshotCache`].
#[derive(Clone, Debug)]
pub struct Server {
    cache: SnapshotCache,
    shutdown: CancellationToken,
    next_stream_id: Arc<AtomicU64>,
}

impl Server {
    pub fn new(cache: SnapshotCache) -> Self {
        Self {
            cache,
            shutdown: CancellationToken::new(),
            next_stream_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Ends every active stream of this server and refuses new ones.
    ///
    /// Streams observe the shutdown at their next event and send nothing further.
    pub fn shutdown(&self) {
        info!("shutting down discovery server");
        self.shutdown.cancel();
    }

    /// Serves a state-of-the-world stream until the client closes it, the server shuts down, or
    /// an error occurs.
    pub async fn serve_sotw<T>(&self, transport: T) -> Result<(), StreamError>
    where
        T: DiscoveryTransport<DiscoveryRequest, DiscoveryResponse>,
    {
        self.serve::<Sotw, T>(transport).await
    }

    /// Serves an incremental stream until the client closes it, the server shuts down, or an
    /// error occurs.
    pub async fn serve_delta<T>(&self, transport: T) -> Result<(), StreamError>
    where
        T: DiscoveryTransport<DeltaDiscoveryRequest, DeltaDiscoveryResponse>,
    {
        self.serve::<Delta, T>(transport).await
    }

    /// Serves a stream of the given protocol flavor.
    ///
    /// Cancellation is not reported as an error.
    pub async fn serve<P, T>(&self, transport: T) -> Result<(), StreamError>
    where
        P: Protocol,
        T: DiscoveryTransport<P::Request, P::Response>,
    {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let mode = match P::MODE {
            DeliveryMode::Sotw => "sotw",
            DeliveryMode::Delta => "delta",
        };
        let task = StreamTask::<P, T> {
            transport,
            cache: self.cache.clone(),
            shutdown: self.shutdown.clone(),
            state: StreamState::new(),
            ordering: OrderingController::new(false),
            node_id: None,
            snapshots: None,
            nonces: BTreeMap::new(),
            next_nonce: 0,
            _protocol: PhantomData,
        };

        let result = task.run().instrument(info_span!("stream", id, mode)).await;
        match result {
            Err(StreamError::Cancelled) => Ok(()),
            result => result,
        }
    }
}

/// The task serving a single stream.
struct StreamTask<P, T> {
    transport: T,
    cache: SnapshotCache,
    shutdown: CancellationToken,
    state: StreamState,
    /// Replaced once the stream declared its ordering mode.
    ordering: OrderingController,
    /// The node the stream serves, learned from the first request that names one.
    node_id: Option<String>,
    snapshots: Option<SnapshotWatch>,
    /// The nonce of the last response sent, per type.
    nonces: BTreeMap<TypeUrl, String>,
    next_nonce: u64,
    _protocol: PhantomData<fn() -> P>,
}

impl<P, T> StreamTask<P, T>
where
    P: Protocol,
    T: DiscoveryTransport<P::Request, P::Response>,
{
    async fn run(mut self) -> Result<(), StreamError> {
        info!("stream opened");
        let result = self.run_message_loop().await;
        let abandoned = self.ordering.abandon();
        match &result {
            Ok(()) => info!(abandoned, "stream closed by client"),
            Err(StreamError::Cancelled) => info!(abandoned, "stream cancelled"),
            Err(error) => warn!(abandoned, "stream failed: {error}"),
        }
        result
    }

    async fn run_message_loop(&mut self) -> Result<(), StreamError> {
        loop {
            tokio::select! {
                // Shutdown takes precedence over any other pending event.
                biased;

                _ = self.shutdown.cancelled() => return Err(StreamError::Cancelled),
                request = self.transport.recv() => {
                    let Some(request) = request? else {
                        return Ok(());
                    };
                    self.handle_request(request).await?;
                }
                () = snapshot_changed(&mut self.snapshots) => {
                    debug!("snapshot changed");
                    let type_urls: Vec<_> = self.state.type_urls().cloned().collect();
                    self.reconcile(type_urls).await?;
                }
            }
        }
    }

    async fn handle_request(&mut self, request: P::Request) -> Result<(), StreamError> {
        let type_url = request.resource_type()?;
        trace!(%type_url, ?request, "received request");

        let watched_node = self.watch_node(&request);
        self.declare_ordering(request.ordered());

        let nonce = request.response_nonce();
        let stale = !nonce.is_empty()
            && self
                .nonces
                .get(&type_url)
                .is_some_and(|last_nonce| last_nonce != nonce);
        if stale {
            match P::MODE {
                // A newer response is in flight and supersedes whatever this request says.
                DeliveryMode::Sotw => {
                    debug!(%type_url, nonce, "ignoring request with stale nonce");
                    return Ok(());
                }
                DeliveryMode::Delta => debug!(%type_url, nonce, "request carries stale nonce"),
            }
        }
        if request.is_nack() {
            let (code, message) = request
                .error_detail()
                .map(|error| (error.code, error.message.as_str()))
                .unwrap_or_default();
            warn!(%type_url, nonce, code, "client rejected response: {message}");
        }

        let changed = P::apply(&mut self.state, &type_url, &request)?;

        if watched_node {
            let type_urls: Vec<_> = self.state.type_urls().cloned().collect();
            self.reconcile(type_urls).await
        } else if changed {
            self.reconcile(vec![type_url]).await
        } else {
            // Only acknowledges a response. Resources are resent on snapshot or interest changes.
            trace!(%type_url, nonce, "request leaves subscription unchanged");
            Ok(())
        }
    }

    /// Starts watching the snapshot of the node named by `request`, unless a node is already
    /// known. Returns whether a watch was installed.
    fn watch_node(&mut self, request: &P::Request) -> bool {
        let Some(node) = request.node() else {
            return false;
        };
        match &self.node_id {
            Some(node_id) => {
                if *node_id != node.id {
                    debug!(node = node_id, requested = node.id, "ignoring node change");
                }
                false
            }
            None => {
                info!(node = node.id, "serving node");
                self.snapshots = Some(self.cache.watch(&node.id));
                self.node_id = Some(node.id.clone());
                true
            }
        }
    }

    /// Takes the ordering preference of the first request. Later requests do not carry one.
    fn declare_ordering(&mut self, ordered: bool) {
        if self.state.phase() != StreamPhase::Uninitialized {
            return;
        }
        match self.state.declare_ordered(ordered) {
            Ok(ordered) => {
                debug!(ordered, "declared delivery ordering");
                self.ordering = OrderingController::new(ordered);
            }
            Err(error) => warn!("ignoring ordering preference: {error}"),
        }
    }

    /// Runs one reconciliation round over `type_urls` and sends the resulting responses.
    async fn reconcile(&mut self, type_urls: Vec<TypeUrl>) -> Result<(), StreamError> {
        let snapshot = self.current_snapshot();
        let reconciler = Reconciler::new(snapshot.as_deref());
        let round = self.ordering.begin_round(&type_urls);
        trace!(round, types = type_urls.len(), "reconciling");

        for type_url in &type_urls {
            let flushable = match reconciler.reconcile(P::MODE, &self.state, type_url) {
                Some(diff) if diff.is_required() => self.ordering.offer(diff),
                _ => self.ordering.settle(type_url),
            };
            for diff in flushable {
                self.flush(diff).await?;
            }
        }
        Ok(())
    }

    async fn flush(&mut self, diff: Diff) -> Result<(), StreamError> {
        if self.shutdown.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        self.next_nonce += 1;
        let nonce = self.next_nonce.to_string();
        let type_url = diff.type_url.clone();
        let resources = diff.resources.len();
        let removed = diff.removed.len();
        let (response, versions) = P::respond(diff, nonce.clone());

        self.transport.send(response).await?;
        debug!(%type_url, nonce, resources, removed, "sent response");

        self.state.record_versions(&type_url, versions);
        self.nonces.insert(type_url, nonce);
        Ok(())
    }

    fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshots
            .as_ref()
            .and_then(|snapshots| snapshots.borrow().clone())
    }
}

/// Resolves once the watched snapshot changed. Never resolves if nothing is watched.
async fn snapshot_changed(snapshots: &mut Option<SnapshotWatch>) {
    match snapshots {
        Some(snapshots) => {
            if snapshots.changed().await.is_err() {
                future::pending::<()>().await;
            }
        }
        None => future::pending().await,
    }
}

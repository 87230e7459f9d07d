// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The transport underneath a discovery stream.
//!
//! Stream drivers are agnostic of the wire: they receive decoded requests and hand back
//! responses through a [`DiscoveryTransport`]. [`ChannelTransport`] connects a driver to an
//! in-process client, and [`StreamTransport`] adapts any request [`Stream`] and response [`Sink`],
//! such as the halves of a gRPC streaming call.

use std::fmt::Debug;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

/// The server end of a bidirectional discovery stream.
#[async_trait]
pub trait DiscoveryTransport<Req, Resp>: Send {
    /// Receives the next request from the client.
    ///
    /// Returns `None` once the client closed its end of the stream.
    ///
    /// # Cancel safety
    ///
    /// Implementations must make this method cancel safe. If `recv` is used as the event in a
    /// [`tokio::select!`] statement and some other branch completes first, no request may be
    /// lost.
    async fn recv(&mut self) -> anyhow::Result<Option<Req>>;

    /// Sends a response to the client.
    async fn send(&mut self, response: Resp) -> anyhow::Result<()>;
}

/// A transport backed by in-process channels.
#[derive(Debug)]
pub struct ChannelTransport<Req, Resp> {
    requests: mpsc::UnboundedReceiver<Req>,
    responses: mpsc::UnboundedSender<Resp>,
}

impl<Req, Resp> ChannelTransport<Req, Resp> {
    pub fn new(
        requests: mpsc::UnboundedReceiver<Req>,
        responses: mpsc::UnboundedSender<Resp>,
    ) -> Self {
        Self {
            requests,
            responses,
        }
    }
}

/// The client end of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelClient<Req, Resp> {
    requests: mpsc::UnboundedSender<Req>,
    responses: mpsc::UnboundedReceiver<Resp>,
}

impl<Req: Debug, Resp> ChannelClient<Req, Resp> {
    /// Sends a request to the server.
    pub fn send(&self, request: Req) -> anyhow::Result<()> {
        self.requests
            .send(request)
            .map_err(|error| anyhow!("server disconnected: {:?}", error.0))
    }

    /// Receives the next response, or `None` once the server dropped its end.
    pub async fn recv(&mut self) -> Option<Resp> {
        self.responses.recv().await
    }

    /// Closes the request half, signaling that the client will send no more requests.
    ///
    /// Responses that are already in flight can still be received.
    pub fn close(self) -> mpsc::UnboundedReceiver<Resp> {
        self.responses
    }
}

/// Creates a connected pair of a [`ChannelTransport`] and its [`ChannelClient`].
pub fn channel<Req, Resp>() -> (ChannelTransport<Req, Resp>, ChannelClient<Req, Resp>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let transport = ChannelTransport::new(request_rx, response_tx);
    let client = ChannelClient {
        requests: request_tx,
        responses: response_rx,
    };
    (transport, client)
}

#[async_trait]
impl<Req, Resp> DiscoveryTransport<Req, Resp> for ChannelTransport<Req, Resp>
where
    Req: Send,
    Resp: Send,
{
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    async fn recv(&mut self) -> anyhow::Result<Option<Req>> {
        // `mpsc::UnboundedReceiver::recv` is documented to be cancel safe.
        Ok(self.requests.recv().await)
    }

    async fn send(&mut self, response: Resp) -> anyhow::Result<()> {
        self.responses
            .send(response)
            .map_err(|_| anyhow!("client disconnected"))
    }
}

/// A transport over a stream of requests and a sink of responses.
#[derive(Debug)]
pub struct StreamTransport<S, K> {
    requests: S,
    responses: K,
}

impl<S, K> StreamTransport<S, K> {
    pub fn new(requests: S, responses: K) -> Self {
        Self {
            requests,
            responses,
        }
    }
}

#[async_trait]
impl<Req, Resp, S, K> DiscoveryTransport<Req, Resp> for StreamTransport<S, K>
where
    Req: Send,
    Resp: Send + 'static,
    S: Stream<Item = anyhow::Result<Req>> + Unpin + Send,
    K: Sink<Resp> + Unpin + Send,
    K::Error: std::error::Error + Send + Sync + 'static,
{
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    async fn recv(&mut self) -> anyhow::Result<Option<Req>> {
        // `StreamExt::next` is cancel safe.
        self.requests.next().await.transpose()
    }

    async fn send(&mut self, response: Resp) -> anyhow::Result<()> {
        self.responses.send(response).await?;
        Ok(())
    }
}

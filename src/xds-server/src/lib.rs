// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Discovery stream drivers for a configuration control plane.
//!
//! This crate runs the server side of discovery streams on top of the bookkeeping in
//! [`xds_stream`]: a [`SnapshotCache`] holds the resource snapshot of every node, and a
//! [`Server`] drives one task per stream that applies client requests to the stream's state,
//! reconciles it against the node's snapshot, and sends the resulting responses over a
//! [`DiscoveryTransport`].

pub mod cache;
pub mod config;
pub mod logging;
pub mod stream;
pub mod transport;

pub use crate::cache::SnapshotCache;
pub use crate::stream::{Delta, Protocol, Server, Sotw, StreamError};
pub use crate::transport::{ChannelTransport, DiscoveryTransport, StreamTransport};

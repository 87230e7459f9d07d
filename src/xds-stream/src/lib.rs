// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-stream state tracking and response reconciliation for discovery streams.
//!
//! A control plane distributes configuration resources (listeners, routes, clusters, endpoints,
//! secrets, ...) to remote proxies over long-lived bidirectional streams. Each stream subscribes to
//! a set of resource types, and within each type either to all resources (a wildcard
//! subscription) or to an explicit subset of names. Two delivery modes exist:
//!
//!  * State-of-the-world (SOTW): every response carries the complete resource set for a type.
//!    Removals are communicated by absence.
//!  * Delta: every response carries only added or changed resources, plus an explicit list of
//!    removed names. Versions are tracked per resource so unchanged resources are not resent.
//!
//! This crate contains the parts of a discovery server that decide what to send:
//!
//!  * [`StreamState`] tracks, per stream and per resource type, what the client subscribed to
//!    and which resource versions it is believed to hold.
//!  * [`Reconciler`] computes response [`Diff`]s from a [`StreamState`] and a [`Snapshot`].
//!  * [`OrderingController`] sequences diffs across resource types for streams that require a
//!    deterministic delivery order.
//!
//! Framing, transport, and the snapshot store itself live elsewhere.

pub mod error;
pub mod ordering;
pub mod protocol;
pub mod reconcile;
pub mod resource;
pub mod snapshot;
pub mod state;
pub mod version;

pub use crate::error::{OrderingRedeclared, RequestError};
pub use crate::ordering::OrderingController;
pub use crate::reconcile::{DeliveryMode, Diff, Reconciler};
pub use crate::resource::{Resource, TypeUrl};
pub use crate::snapshot::{ResourceSet, Snapshot};
pub use crate::state::{StreamPhase, StreamState, SubscriptionState};
pub use crate::version::VersionSet;

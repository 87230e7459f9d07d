// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Computation of response diffs.
//!
//! Reconciliation compares what a client is believed to hold, as tracked by its [`StreamState`],
//! with what a [`Snapshot`] says currently exists, and decides what to send:
//!
//!  * In state-of-the-world mode the response lists every subscribed resource. There is no
//!    removal list; clients drop whatever a response omits. A response is only sent if the
//!    resulting set differs from the last recorded one, or if it would be the first response for
//!    the subscription.
//!  * In delta mode the response lists resources whose version differs from the recorded one,
//!    and the recorded names that no longer exist or are no longer of interest.
//!
//! Reconciliation never mutates the stream state. The resulting [`Diff`] carries the versions the
//! client will hold once it was sent; they are recorded with [`StreamState::record_versions`]
//! after the response has been accepted for sending.

use std::collections::BTreeSet;

use tracing::trace;

use crate::protocol::{DeltaDiscoveryResponse, DiscoveryResponse};
use crate::resource::{Resource, TypeUrl};
use crate::snapshot::{ResourceSet, Snapshot};
use crate::state::StreamState;
use crate::version::VersionSet;

/// The delivery mode of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    /// State-of-the-world: every response carries the complete resource set.
    Sotw,
    /// Incremental: responses carry changes and removals only.
    Delta,
}

/// The outcome of reconciling one resource type of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diff {
    pub type_url: TypeUrl,
    pub mode: DeliveryMode,
    /// The snapshot's version label for the type.
    pub version: String,
    /// The resources to send.
    pub resources: Vec<Resource>,
    /// The names the client must drop. Always empty in state-of-the-world mode.
    pub removed: BTreeSet<String>,
    /// The versions the client holds once this diff was sent.
    pub versions: VersionSet,
    /// Whether a response must be sent for this diff.
    required: bool,
}

impl Diff {
    /// Reports whether the diff neither sends nor removes any resource.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.removed.is_empty()
    }

    /// Reports whether a response must be sent for this diff.
    ///
    /// Diffs that are not required would only repeat what the client already holds.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Converts a state-of-the-world diff into a response with the given nonce.
    ///
    /// Returns the versions to record once the response was sent.
    pub fn into_sotw_response(self, nonce: String) -> (DiscoveryResponse, VersionSet) {
        let response = DiscoveryResponse {
            version_info: self.version,
            resources: self.resources,
            type_url: self.type_url,
            nonce,
        };
        (response, self.versions)
    }

    /// Converts a delta diff into a response with the given nonce.
    ///
    /// Returns the versions to record once the response was sent.
    pub fn into_delta_response(self, nonce: String) -> (DeltaDiscoveryResponse, VersionSet) {
        let response = DeltaDiscoveryResponse {
            system_version_info: self.version,
            resources: self.resources,
            type_url: self.type_url,
            removed_resources: self.removed.into_iter().collect(),
            nonce,
        };
        (response, self.versions)
    }
}

/// Computes diffs against a single snapshot.
///
/// A missing snapshot, or a snapshot without a given type, is treated as "no resources of that
/// type exist", which is a valid state to report to clients.
#[derive(Clone, Copy, Debug)]
pub struct Reconciler<'a> {
    snapshot: Option<&'a Snapshot>,
}

impl<'a> Reconciler<'a> {
    pub fn new(snapshot: Option<&'a Snapshot>) -> Self {
        Self { snapshot }
    }

    /// Reconciles `type_url` in the given delivery mode.
    ///
    /// Returns `None` if the stream is not subscribed to `type_url`.
    pub fn reconcile(
        &self,
        mode: DeliveryMode,
        state: &StreamState,
        type_url: &TypeUrl,
    ) -> Option<Diff> {
        match mode {
            DeliveryMode::Sotw => self.sotw(state, type_url),
            DeliveryMode::Delta => self.delta(state, type_url),
        }
    }

    /// Computes the state-of-the-world diff for `type_url`.
    pub fn sotw(&self, state: &StreamState, type_url: &TypeUrl) -> Option<Diff> {
        let subscription = state.subscription(type_url)?;
        let current = subscription.current_versions();

        let resources: Vec<Resource> = self
            .resources(type_url)
            .into_iter()
            .flat_map(|set| set.items.values())
            .filter(|resource| subscription.is_interested(&resource.name))
            .cloned()
            .collect();
        let versions: VersionSet = resources
            .iter()
            .map(|resource| (resource.name.as_str(), resource.version.as_str()))
            .collect();

        let unchanged = versions.len() == current.len()
            && resources
                .iter()
                .all(|resource| current.holds(&resource.name, &resource.version));
        let required = subscription.is_first() || !unchanged;

        trace!(
            %type_url,
            resources = resources.len(),
            first = subscription.is_first(),
            required,
            "computed sotw diff",
        );

        Some(Diff {
            type_url: type_url.clone(),
            mode: DeliveryMode::Sotw,
            version: self.version(type_url),
            resources,
            removed: BTreeSet::new(),
            versions,
            required,
        })
    }

    /// Computes the delta diff for `type_url`.
    pub fn delta(&self, state: &StreamState, type_url: &TypeUrl) -> Option<Diff> {
        let subscription = state.subscription(type_url)?;
        let current = subscription.current_versions();
        let set = self.resources(type_url);

        let resources: Vec<Resource> = set
            .into_iter()
            .flat_map(|set| set.items.values())
            .filter(|resource| {
                subscription.is_interested(&resource.name)
                    && !current.holds(&resource.name, &resource.version)
            })
            .cloned()
            .collect();
        let removed: BTreeSet<String> = current
            .names()
            .filter(|name| {
                let exists = set.is_some_and(|set| set.contains(name));
                !exists || !subscription.is_interested(name)
            })
            .map(String::from)
            .collect();

        let mut versions = current.clone();
        for name in &removed {
            versions.remove(name);
        }
        for resource in &resources {
            versions.insert(resource.name.clone(), resource.version.clone());
        }

        // Wildcard clients learn that the initial state of the world is known even if it is
        // empty. Explicit subscribers only hear about the names they asked for.
        let required = !resources.is_empty()
            || !removed.is_empty()
            || (subscription.is_first() && subscription.is_wildcard());

        trace!(
            %type_url,
            resources = resources.len(),
            removed = removed.len(),
            required,
            "computed delta diff",
        );

        Some(Diff {
            type_url: type_url.clone(),
            mode: DeliveryMode::Delta,
            version: self.version(type_url),
            resources,
            removed,
            versions,
            required,
        })
    }

    fn resources(&self, type_url: &TypeUrl) -> Option<&'a ResourceSet> {
        self.snapshot.and_then(|snapshot| snapshot.resources(type_url))
    }

    fn version(&self, type_url: &TypeUrl) -> String {
        self.snapshot
            .map(|snapshot| snapshot.version(type_url).to_string())
            .unwrap_or_default()
    }
}

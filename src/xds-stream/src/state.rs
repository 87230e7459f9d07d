// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-stream subscription state.
//!
//! A [`StreamState`] is created when a stream opens and dropped when it closes. It is owned by
//! the task that serves the stream, which is the only writer; it is never shared across tasks.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{OrderingRedeclared, RequestError};
use crate::resource::{TypeUrl, WILDCARD_NAME};
use crate::version::VersionSet;

static NO_NAMES: BTreeSet<String> = BTreeSet::new();
static NO_VERSIONS: VersionSet = VersionSet::new();

/// The lifecycle of a stream.
///
/// The ordering mode of a stream is declared by its first request and cannot change afterwards.
/// The stream leaves its initial phase once the first response has been recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    /// No ordering mode has been declared and no response has been recorded.
    Uninitialized,
    /// The ordering mode has been declared, but no response has been recorded yet.
    ModeDeclared { ordered: bool },
    /// At least one response has been recorded.
    Steady { ordered: bool },
}

impl StreamPhase {
    pub fn is_ordered(&self) -> bool {
        match self {
            StreamPhase::Uninitialized => false,
            StreamPhase::ModeDeclared { ordered } | StreamPhase::Steady { ordered } => *ordered,
        }
    }
}

/// The subscription of a stream to a single resource type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionState {
    /// Whether the client subscribes to all resources of the type.
    ///
    /// Derived from the first request for the type and fixed afterwards.
    wildcard: bool,
    /// The names the client explicitly asked for.
    ///
    /// Ignored for delivery decisions of wildcard subscriptions.
    known_names: BTreeSet<String>,
    /// The resources the client is believed to hold, as of the last recorded response.
    versions: VersionSet,
    /// Whether no response has been recorded for this subscription yet.
    first: bool,
}

impl SubscriptionState {
    /// Creates a subscription.
    ///
    /// `initial_versions` seeds the versions a reconnecting client already holds. Without a seed
    /// the client is assumed to hold nothing.
    pub fn new(wildcard: bool, initial_versions: Option<VersionSet>) -> Self {
        Self {
            wildcard,
            known_names: BTreeSet::new(),
            versions: initial_versions.unwrap_or_default(),
            first: true,
        }
    }

    /// Returns the versions the client is believed to hold.
    pub fn current_versions(&self) -> &VersionSet {
        &self.versions
    }

    /// Replaces the tracked versions after a response has been accepted for sending.
    pub fn record_versions(&mut self, versions: VersionSet) {
        self.versions = versions;
        self.first = false;
    }

    /// Reports whether no response has been recorded for this subscription yet.
    pub fn is_first(&self) -> bool {
        self.first
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Replaces the explicitly requested names. Does not affect the wildcard flag.
    pub fn set_known_names(&mut self, names: BTreeSet<String>) {
        self.known_names = names;
    }

    pub fn known_names(&self) -> &BTreeSet<String> {
        &self.known_names
    }

    /// Reports whether the client should be sent `name`, if it exists.
    pub fn is_interested(&self, name: &str) -> bool {
        self.wildcard || self.known_names.contains(name)
    }
}

/// The state of a single discovery stream across all of its resource types.
#[derive(Debug)]
pub struct StreamState {
    phase: StreamPhase,
    subscriptions: BTreeMap<TypeUrl, SubscriptionState>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            phase: StreamPhase::Uninitialized,
            subscriptions: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Declares the ordering mode of the stream and returns it.
    ///
    /// Meant to be called with the preference of the first request. Declaring the mode that is
    /// already in effect is a no-op; attempting to change it is refused and leaves the declared
    /// mode in place.
    pub fn declare_ordered(&mut self, ordered: bool) -> Result<bool, OrderingRedeclared> {
        match self.phase {
            StreamPhase::Uninitialized => {
                self.phase = StreamPhase::ModeDeclared { ordered };
                Ok(ordered)
            }
            StreamPhase::ModeDeclared { ordered: declared }
            | StreamPhase::Steady { ordered: declared } => {
                if declared == ordered {
                    Ok(ordered)
                } else {
                    Err(OrderingRedeclared {
                        declared,
                        requested: ordered,
                    })
                }
            }
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.phase.is_ordered()
    }

    /// Reports whether no response has been recorded on this stream yet.
    pub fn is_first(&self) -> bool {
        !matches!(self.phase, StreamPhase::Steady { .. })
    }

    pub fn subscription(&self, type_url: &TypeUrl) -> Option<&SubscriptionState> {
        self.subscriptions.get(type_url)
    }

    /// Iterates over the subscribed types.
    pub fn type_urls(&self) -> impl Iterator<Item = &TypeUrl> {
        self.subscriptions.keys()
    }

    /// Reports whether the stream holds a wildcard subscription to `type_url`.
    pub fn is_wildcard(&self, type_url: &TypeUrl) -> bool {
        self.subscriptions
            .get(type_url)
            .is_some_and(SubscriptionState::is_wildcard)
    }

    /// Returns the versions of `type_url` the client is believed to hold.
    pub fn current_versions(&self, type_url: &TypeUrl) -> &VersionSet {
        self.subscriptions
            .get(type_url)
            .map_or(&NO_VERSIONS, SubscriptionState::current_versions)
    }

    /// Records the versions of `type_url` the client holds after a response was accepted for
    /// sending.
    ///
    /// Recording is idempotent: recording the same versions twice leaves the same state.
    pub fn record_versions(&mut self, type_url: &TypeUrl, versions: VersionSet) {
        let Some(subscription) = self.subscriptions.get_mut(type_url) else {
            debug!(%type_url, "ignoring versions recorded for unsubscribed type");
            return;
        };
        subscription.record_versions(versions);

        self.phase = match self.phase {
            StreamPhase::Uninitialized => StreamPhase::Steady { ordered: false },
            StreamPhase::ModeDeclared { ordered } | StreamPhase::Steady { ordered } => {
                StreamPhase::Steady { ordered }
            }
        };
    }

    /// Replaces the explicitly requested names of `type_url`.
    ///
    /// Creates an explicit subscription if the type was not subscribed before. The wildcard flag
    /// of an existing subscription is left unchanged.
    pub fn set_known_names(&mut self, type_url: TypeUrl, names: BTreeSet<String>) {
        self.subscriptions
            .entry(type_url)
            .or_insert_with(|| SubscriptionState::new(false, None))
            .set_known_names(names);
    }

    /// Returns the explicitly requested names of `type_url`.
    pub fn known_names(&self, type_url: &TypeUrl) -> &BTreeSet<String> {
        self.subscriptions
            .get(type_url)
            .map_or(&NO_NAMES, SubscriptionState::known_names)
    }

    /// Applies the resource names of a state-of-the-world request to the subscription of
    /// `type_url`.
    ///
    /// The first request for a type determines whether the subscription is a wildcard
    /// subscription. Later requests replace the requested names but must agree with that
    /// decision: a wildcard subscription cannot name resources without also naming `"*"`, and an
    /// explicit subscription cannot name `"*"`. An empty list narrows an explicit subscription to
    /// nothing.
    ///
    /// Returns whether the request opened the subscription or changed its requested names. A
    /// request that changes neither only acknowledges a response.
    pub fn apply_sotw(
        &mut self,
        type_url: &TypeUrl,
        resource_names: &[String],
    ) -> Result<bool, RequestError> {
        let (names, names_wildcard) = split_wildcard(resource_names);

        match self.subscriptions.get_mut(type_url) {
            None => {
                let wildcard = resource_names.is_empty() || names_wildcard;
                let mut subscription = SubscriptionState::new(wildcard, None);
                subscription.set_known_names(names);
                debug!(%type_url, wildcard, "opened subscription");
                self.subscriptions.insert(type_url.clone(), subscription);
                Ok(true)
            }
            Some(subscription) => {
                let conflict = if subscription.wildcard {
                    !resource_names.is_empty() && !names_wildcard
                } else {
                    names_wildcard
                };
                if conflict {
                    return Err(RequestError::WildcardConflict {
                        type_url: type_url.clone(),
                        wildcard: subscription.wildcard,
                    });
                }
                let changed = subscription.known_names != names;
                subscription.set_known_names(names);
                Ok(changed)
            }
        }
    }

    /// Applies the subscription changes of an incremental request to the subscription of
    /// `type_url`.
    ///
    /// The first request for a type determines whether the subscription is a wildcard
    /// subscription and may seed the versions held by a reconnecting client. The interest set
    /// becomes `(previous ∪ subscribe) − unsubscribe`. On an explicit subscription, unsubscribing
    /// from a name outside of `previous ∪ subscribe` is an error, as is subscribing to `"*"`. A
    /// wildcard subscription covers every name, so unsubscribing from a name it did not request
    /// explicitly leaves its interest unchanged.
    ///
    /// Returns whether the request opened the subscription or changed its requested names.
    pub fn apply_delta(
        &mut self,
        type_url: &TypeUrl,
        subscribe: &[String],
        unsubscribe: &[String],
        initial_versions: &BTreeMap<String, String>,
    ) -> Result<bool, RequestError> {
        let (subscribe_names, subscribe_wildcard) = split_wildcard(subscribe);

        match self.subscriptions.get_mut(type_url) {
            None => {
                let wildcard = subscribe.is_empty() || subscribe_wildcard;
                let names = next_interest(
                    type_url,
                    wildcard,
                    BTreeSet::new(),
                    subscribe_names,
                    unsubscribe,
                )?;
                let seed = if initial_versions.is_empty() {
                    None
                } else {
                    Some(VersionSet::from(initial_versions.clone()))
                };
                let mut subscription = SubscriptionState::new(wildcard, seed);
                subscription.set_known_names(names);
                debug!(
                    %type_url,
                    wildcard,
                    seeded = initial_versions.len(),
                    "opened subscription",
                );
                self.subscriptions.insert(type_url.clone(), subscription);
                Ok(true)
            }
            Some(subscription) => {
                if !subscription.wildcard && subscribe_wildcard {
                    return Err(RequestError::WildcardConflict {
                        type_url: type_url.clone(),
                        wildcard: false,
                    });
                }
                if !initial_versions.is_empty() {
                    debug!(%type_url, "ignoring initial resource versions on a later request");
                }
                let names = next_interest(
                    type_url,
                    subscription.wildcard,
                    subscription.known_names.clone(),
                    subscribe_names,
                    unsubscribe,
                )?;
                let changed = subscription.known_names != names;
                subscription.set_known_names(names);
                Ok(changed)
            }
        }
    }
}

/// Splits a name list into the explicit names and whether it contains the wildcard name.
fn split_wildcard(names: &[String]) -> (BTreeSet<String>, bool) {
    let mut wildcard = false;
    let mut explicit = BTreeSet::new();
    for name in names {
        if name == WILDCARD_NAME {
            wildcard = true;
        } else {
            explicit.insert(name.clone());
        }
    }
    (explicit, wildcard)
}

/// Computes `(previous ∪ subscribe) − unsubscribe`, validating `unsubscribe`.
fn next_interest(
    type_url: &TypeUrl,
    wildcard: bool,
    mut names: BTreeSet<String>,
    subscribe: BTreeSet<String>,
    unsubscribe: &[String],
) -> Result<BTreeSet<String>, RequestError> {
    names.extend(subscribe);
    for name in unsubscribe {
        if name == WILDCARD_NAME && wildcard {
            return Err(RequestError::WildcardConflict {
                type_url: type_url.clone(),
                wildcard,
            });
        }
        if !names.remove(name) {
            if !wildcard {
                return Err(RequestError::UnknownUnsubscribe {
                    type_url: type_url.clone(),
                    name: name.clone(),
                });
            }
            debug!(%type_url, name, "ignoring unsubscribe from a name held through the wildcard");
        }
    }
    Ok(names)
}

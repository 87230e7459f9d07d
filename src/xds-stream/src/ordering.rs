// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Cross-type delivery ordering.
//!
//! Streams that multiplex several resource types may require that types are delivered in
//! dependency order, so that a proxy never receives a resource that references another resource
//! it has not received yet. The [`OrderingController`] enforces this per reconciliation round:
//! a diff for a type is held back until every type of higher priority in the same round has
//! either been flushed or was found to have nothing to send.
//!
//! Unordered streams skip all of this and flush every diff as soon as it is computed, trading
//! the ordering guarantee for lower latency.

use std::collections::BTreeMap;
use std::mem;

use tracing::{debug, trace};

use crate::reconcile::Diff;
use crate::resource::TypeUrl;

/// The progress of one type within a round.
#[derive(Debug)]
enum Slot {
    /// The type takes part in the round but has not been reconciled yet.
    Pending,
    /// A diff was computed but is held back by a pending type of higher priority.
    Ready(Diff),
    /// The type's diff was flushed, or the type had nothing to send.
    Settled,
}

/// Orders slots by delivery priority, breaking ties by URL.
type SlotKey = (usize, TypeUrl);

fn slot_key(type_url: &TypeUrl) -> SlotKey {
    (type_url.priority(), type_url.clone())
}

/// Sequences diffs of a single stream across resource types.
#[derive(Debug)]
pub struct OrderingController {
    ordered: bool,
    /// The number of rounds begun so far.
    round: u64,
    /// The slots of the current round. Always empty for unordered streams.
    slots: BTreeMap<SlotKey, Slot>,
}

impl OrderingController {
    pub fn new(ordered: bool) -> Self {
        Self {
            ordered,
            round: 0,
            slots: BTreeMap::new(),
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Begins a new round in which each of `type_urls` will be reconciled.
    ///
    /// Diffs still held back from the previous round are dropped. They were computed against
    /// state that the new round supersedes, and the types they belong to are expected to take
    /// part in the new round.
    pub fn begin_round<'a>(&mut self, type_urls: impl IntoIterator<Item = &'a TypeUrl>) -> u64 {
        let dropped = self.abandon();
        if dropped > 0 {
            debug!(round = self.round, dropped, "superseded unfinished round");
        }

        self.round += 1;
        if self.ordered {
            for type_url in type_urls {
                self.slots.insert(slot_key(type_url), Slot::Pending);
            }
        }
        self.round
    }

    /// Offers a computed diff, returning the diffs that may be flushed now, in order.
    ///
    /// A diff for a type that is not part of the current round joins the round.
    pub fn offer(&mut self, diff: Diff) -> Vec<Diff> {
        if !self.ordered {
            return vec![diff];
        }

        let key = slot_key(&diff.type_url);
        if let Some(Slot::Ready(held)) = self.slots.get(&key) {
            trace!(type_url = %held.type_url, round = self.round, "replacing held diff");
        }
        self.slots.insert(key, Slot::Ready(diff));
        self.drain()
    }

    /// Records that `type_url` has nothing to send in the current round, returning the diffs
    /// that may be flushed now, in order.
    pub fn settle(&mut self, type_url: &TypeUrl) -> Vec<Diff> {
        if !self.ordered {
            return Vec::new();
        }

        self.slots.insert(slot_key(type_url), Slot::Settled);
        self.drain()
    }

    /// Reports whether every type of the current round has been settled.
    pub fn is_round_complete(&self) -> bool {
        self.slots
            .values()
            .all(|slot| matches!(slot, Slot::Settled))
    }

    /// Abandons the current round, dropping any held diffs without flushing them.
    ///
    /// Returns the number of dropped diffs.
    pub fn abandon(&mut self) -> usize {
        let dropped = self
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count();
        self.slots.clear();
        dropped
    }

    /// Releases ready diffs in priority order, up to the first pending type.
    fn drain(&mut self) -> Vec<Diff> {
        let mut flushable = Vec::new();
        for slot in self.slots.values_mut() {
            match slot {
                Slot::Pending => break,
                Slot::Settled => {}
                Slot::Ready(_) => {
                    if let Slot::Ready(diff) = mem::replace(slot, Slot::Settled) {
                        flushable.push(diff);
                    }
                }
            }
        }
        flushable
    }
}

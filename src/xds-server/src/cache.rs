// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An in-memory store of per-node snapshots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};
use xds_stream::Snapshot;

/// A receiver that observes the snapshot of a single node.
///
/// Holds `None` while no snapshot is set for the node.
pub type SnapshotWatch = watch::Receiver<Option<Arc<Snapshot>>>;

/// Holds the current snapshot of every node and notifies streams when it changes.
///
/// Cloning the cache yields a handle to the same underlying store.
#[derive(Clone, Debug, Default)]
pub struct SnapshotCache {
    nodes: Arc<Mutex<BTreeMap<String, watch::Sender<Option<Arc<Snapshot>>>>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot of `node_id` and wakes every stream watching that node.
    pub fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) {
        let types = snapshot.type_urls().count();
        self.update(node_id, Some(Arc::new(snapshot)));
        info!(node = node_id, types, "updated snapshot");
    }

    /// Removes the snapshot of `node_id`.
    ///
    /// Streams watching the node observe the removal and treat every type as empty.
    pub fn clear_snapshot(&self, node_id: &str) {
        let nodes = self.nodes.lock().expect("lock poisoned");
        if let Some(sender) = nodes.get(node_id) {
            sender.send_replace(None);
            info!(node = node_id, "cleared snapshot");
        }
    }

    /// Returns the current snapshot of `node_id`, if any.
    pub fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        let nodes = self.nodes.lock().expect("lock poisoned");
        nodes.get(node_id).and_then(|sender| sender.borrow().clone())
    }

    /// Watches the snapshot of `node_id`.
    ///
    /// Nodes may be watched before a snapshot was set for them.
    pub fn watch(&self, node_id: &str) -> SnapshotWatch {
        let mut nodes = self.nodes.lock().expect("lock poisoned");
        nodes
            .entry(node_id.to_string())
            .or_insert_with(|| {
                debug!(node = node_id, "watching node without snapshot");
                watch::channel(None).0
            })
            .subscribe()
    }

    fn update(&self, node_id: &str, snapshot: Option<Arc<Snapshot>>) {
        let mut nodes = self.nodes.lock().expect("lock poisoned");
        match nodes.get(node_id) {
            Some(sender) => {
                sender.send_replace(snapshot);
            }
            None => {
                let (sender, _) = watch::channel(snapshot);
                nodes.insert(node_id.to_string(), sender);
            }
        }
    }
}

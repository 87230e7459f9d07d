// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Discovery protocol messages.
//!
//! These are the messages exchanged between a discovery server and its clients, independent of
//! how they are framed on the wire. Clients send requests; the server sends responses.
//!
//! Every response carries a nonce that is unique within its stream. Clients acknowledge a
//! response by sending a request that echoes its nonce in `response_nonce`. A request that also
//! carries `error_detail` rejects (NACKs) the response; otherwise it accepts (ACKs) it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::resource::{Resource, TypeUrl};

/// Identifies the client of a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// An opaque identifier of the proxy. Snapshots are keyed by this identifier.
    pub id: String,
    /// The cluster the proxy belongs to.
    #[serde(default)]
    pub cluster: String,
}

/// The error detail attached to a NACK.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

/// A state-of-the-world request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryRequest {
    /// The version of the last accepted response for this type, if any.
    pub version_info: String,
    /// The requesting node. Only required on the first request of a stream.
    pub node: Option<Node>,
    /// The resource names of interest. An empty list on the first request for a type, or a list
    /// containing `"*"`, subscribes to all resources of the type.
    pub resource_names: Vec<String>,
    pub type_url: String,
    /// The nonce of the response this request acknowledges.
    pub response_nonce: String,
    /// Set when the client rejects the response identified by `response_nonce`.
    pub error_detail: Option<Status>,
    /// Whether the client requires deterministic cross-type delivery order. Only the value of
    /// the first request of a stream is honored.
    pub ordered: bool,
}

/// A state-of-the-world response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub version_info: String,
    /// The complete set of resources of this type the client is subscribed to.
    pub resources: Vec<Resource>,
    pub type_url: TypeUrl,
    pub nonce: String,
}

/// An incremental request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaDiscoveryRequest {
    pub node: Option<Node>,
    pub type_url: String,
    /// Names to add to the subscription. An empty list on the first request for a type, or a
    /// list containing `"*"`, subscribes to all resources of the type.
    pub resource_names_subscribe: Vec<String>,
    /// Names to remove from the subscription.
    pub resource_names_unsubscribe: Vec<String>,
    /// The resources a reconnecting client already holds. Only honored on the first request for
    /// a type.
    pub initial_resource_versions: BTreeMap<String, String>,
    pub response_nonce: String,
    pub error_detail: Option<Status>,
    pub ordered: bool,
}

/// An incremental response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaDiscoveryResponse {
    pub system_version_info: String,
    /// Added or changed resources.
    pub resources: Vec<Resource>,
    pub type_url: TypeUrl,
    /// Names the client must drop.
    pub removed_resources: Vec<String>,
    pub nonce: String,
}

/// The parts of a request that are common to both delivery modes.
pub trait Request {
    fn node(&self) -> Option<&Node>;
    fn type_url(&self) -> &str;
    fn response_nonce(&self) -> &str;
    fn error_detail(&self) -> Option<&Status>;
    fn ordered(&self) -> bool;

    /// Returns the requested resource type.
    fn resource_type(&self) -> Result<TypeUrl, RequestError> {
        match self.type_url() {
            "" => Err(RequestError::MissingTypeUrl),
            url => Ok(TypeUrl::from(url)),
        }
    }

    /// Reports whether this request rejects a previous response.
    fn is_nack(&self) -> bool {
        self.error_detail().is_some()
    }
}

impl Request for DiscoveryRequest {
    fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    fn type_url(&self) -> &str {
        &self.type_url
    }

    fn response_nonce(&self) -> &str {
        &self.response_nonce
    }

    fn error_detail(&self) -> Option<&Status> {
        self.error_detail.as_ref()
    }

    fn ordered(&self) -> bool {
        self.ordered
    }
}

impl Request for DeltaDiscoveryRequest {
    fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    fn type_url(&self) -> &str {
        &self.type_url
    }

    fn response_nonce(&self) -> &str {
        &self.response_nonce
    }

    fn error_detail(&self) -> Option<&Status> {
        self.error_detail.as_ref()
    }

    fn ordered(&self) -> bool {
        self.ordered
    }
}

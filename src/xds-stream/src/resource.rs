// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Resource types and resources.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The name that denotes a wildcard subscription when it appears in a name list.
pub const WILDCARD_NAME: &str = "*";

const TYPE_PREFIX: &str = "type.googleapis.com/";

/// The type URL of a discovery resource.
///
/// The well-known Envoy v3 resource types are resolved to dedicated variants. Any other URL is
/// carried as [`TypeUrl::Other`], so that servers can distribute extension types without changes
/// to this enum.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeUrl {
    Cluster,
    Endpoint,
    ExtensionConfig,
    Listener,
    Route,
    Runtime,
    ScopedRoute,
    Secret,
    VirtualHost,
    Other(String),
}

impl TypeUrl {
    /// The types with a dedicated variant, in delivery priority order.
    pub const KNOWN: [TypeUrl; 9] = [
        TypeUrl::Cluster,
        TypeUrl::Endpoint,
        TypeUrl::Listener,
        TypeUrl::Route,
        TypeUrl::ScopedRoute,
        TypeUrl::VirtualHost,
        TypeUrl::Secret,
        TypeUrl::Runtime,
        TypeUrl::ExtensionConfig,
    ];

    /// Returns the full type URL.
    pub fn as_str(&self) -> &str {
        match self {
            TypeUrl::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            TypeUrl::Endpoint => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
            TypeUrl::ExtensionConfig => {
                "type.googleapis.com/envoy.config.core.v3.TypedExtensionConfig"
            }
            TypeUrl::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            TypeUrl::Route => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
            TypeUrl::Runtime => "type.googleapis.com/envoy.service.runtime.v3.Runtime",
            TypeUrl::ScopedRoute => {
                "type.googleapis.com/envoy.config.route.v3.ScopedRouteConfiguration"
            }
            TypeUrl::Secret => {
                "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret"
            }
            TypeUrl::VirtualHost => "type.googleapis.com/envoy.config.route.v3.VirtualHost",
            TypeUrl::Other(url) => url,
        }
    }

    /// Returns the delivery priority of this type on ordered streams.
    ///
    /// Lower values are delivered first. Clusters precede the endpoints that populate them, and
    /// listeners precede the routes they reference, so that a proxy never receives a resource
    /// that points at something it has not been sent yet.
    pub fn priority(&self) -> usize {
        Self::KNOWN
            .iter()
            .position(|known| known == self)
            .unwrap_or(Self::KNOWN.len())
    }

    /// Compares two types by delivery priority, breaking ties by URL.
    pub fn cmp_priority(&self, other: &TypeUrl) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| self.as_str().cmp(other.as_str()))
    }

    /// Returns the short name of the type, e.g. `Cluster` for the cluster type.
    pub fn short_name(&self) -> &str {
        let url = self.as_str();
        let name = url.strip_prefix(TYPE_PREFIX).unwrap_or(url);
        name.rsplit('.').next().unwrap_or(name)
    }
}

impl From<&str> for TypeUrl {
    fn from(url: &str) -> TypeUrl {
        TypeUrl::KNOWN
            .iter()
            .find(|known| known.as_str() == url)
            .cloned()
            .unwrap_or_else(|| TypeUrl::Other(url.to_string()))
    }
}

impl From<String> for TypeUrl {
    fn from(url: String) -> TypeUrl {
        match TypeUrl::from(url.as_str()) {
            TypeUrl::Other(_) => TypeUrl::Other(url),
            known => known,
        }
    }
}

impl From<TypeUrl> for String {
    fn from(url: TypeUrl) -> String {
        match url {
            TypeUrl::Other(url) => url,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, versioned resource.
///
/// The content is opaque to this crate. The version token is compared by equality only; it is
/// never parsed or ordered, since different producers may use incomparable token formats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource name, unique within its type.
    pub name: String,
    /// The opaque version token of the content.
    pub version: String,
    /// The encoded resource.
    #[serde(default)]
    pub content: Bytes,
}

impl Resource {
    pub fn new(name: impl Into<String>, version: impl Into<String>, content: Bytes) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_urls_round_trip() {
        for known in TypeUrl::KNOWN {
            let url = String::from(known.clone());
            assert_eq!(TypeUrl::from(url), known);
        }

        let custom = "type.googleapis.com/acme.Widget";
        assert_eq!(TypeUrl::from(custom), TypeUrl::Other(custom.to_string()));
        assert_eq!(TypeUrl::from(custom).short_name(), "Widget");
        assert_eq!(TypeUrl::Endpoint.short_name(), "ClusterLoadAssignment");
    }

    #[test]
    fn priority_orders_dependencies_first() {
        let mut types = vec![
            TypeUrl::Other("b".into()),
            TypeUrl::Route,
            TypeUrl::Secret,
            TypeUrl::Endpoint,
            TypeUrl::Other("a".into()),
            TypeUrl::Listener,
            TypeUrl::Cluster,
        ];
        types.sort_by(TypeUrl::cmp_priority);
        assert_eq!(
            types,
            vec![
                TypeUrl::Cluster,
                TypeUrl::Endpoint,
                TypeUrl::Listener,
                TypeUrl::Route,
                TypeUrl::Secret,
                TypeUrl::Other("a".into()),
                TypeUrl::Other("b".into()),
            ]
        );
    }

    #[test]
    fn serde_uses_url_strings() {
        let json = serde_json::to_string(&TypeUrl::Listener).expect("serializable");
        assert_eq!(json, "\"type.googleapis.com/envoy.config.listener.v3.Listener\"");
        let parsed: TypeUrl = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(parsed, TypeUrl::Listener);
    }
}

// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Point-in-time views of the resources available to a client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::{Resource, TypeUrl};
use crate::version::VersionSet;

/// The resources of a single type within a [`Snapshot`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    /// The version label of this set, echoed to clients as the response version.
    pub version: String,
    /// The resources, keyed by name.
    #[serde(with = "resource_list")]
    pub items: BTreeMap<String, Resource>,
}

impl ResourceSet {
    pub fn new(version: impl Into<String>, resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            version: version.into(),
            items: resources
                .into_iter()
                .map(|resource| (resource.name.clone(), resource))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Returns the name-to-version mapping of the contained resources.
    pub fn versions(&self) -> VersionSet {
        self.items
            .values()
            .map(|resource| (resource.name.as_str(), resource.version.as_str()))
            .collect()
    }
}

/// An immutable view of all resources available to one client at one point in time.
///
/// A type missing from the snapshot is equivalent to a type without resources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    types: BTreeMap<TypeUrl, ResourceSet>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the resources of `type_url`, replacing any resources previously set for that type.
    pub fn with_resources(
        mut self,
        type_url: TypeUrl,
        version: impl Into<String>,
        resources: impl IntoIterator<Item = Resource>,
    ) -> Self {
        self.types.insert(type_url, ResourceSet::new(version, resources));
        self
    }

    /// Returns the resources of `type_url`, if the snapshot contains the type.
    pub fn resources(&self, type_url: &TypeUrl) -> Option<&ResourceSet> {
        self.types.get(type_url)
    }

    /// Returns the version label of `type_url`, or the empty string if the type is absent.
    pub fn version(&self, type_url: &TypeUrl) -> &str {
        self.types
            .get(type_url)
            .map(|set| set.version.as_str())
            .unwrap_or_default()
    }

    pub fn type_urls(&self) -> impl Iterator<Item = &TypeUrl> {
        self.types.keys()
    }
}

/// Serializes the items of a [`ResourceSet`] as a list rather than a map keyed by the
/// resource name, which would repeat every name.
mod resource_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::resource::Resource;

    pub fn serialize<S>(
        items: &BTreeMap<String, Resource>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(items.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Resource>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let resources = Vec::<Resource>::deserialize(deserializer)?;
        Ok(resources
            .into_iter()
            .map(|resource| (resource.name.clone(), resource))
            .collect())
    }
}

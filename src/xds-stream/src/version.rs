// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Version sets.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A mapping from resource name to opaque version token.
///
/// A name present in a `VersionSet` means the client is believed to hold that resource at that
/// version. Tokens are only ever compared for equality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionSet {
    versions: BTreeMap<String, String>,
}

impl VersionSet {
    pub const fn new() -> Self {
        Self {
            versions: BTreeMap::new(),
        }
    }

    /// Returns the version token recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.versions.get(name).map(String::as_str)
    }

    /// Records `version` for `name`, returning the previously recorded token.
    pub fn insert(&mut self, name: String, version: String) -> Option<String> {
        self.versions.insert(name, version)
    }

    /// Forgets `name`, returning its recorded token.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.versions.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.versions.contains_key(name)
    }

    /// Reports whether the client is known to hold `name` at exactly `version`.
    ///
    /// An empty token cannot be compared and never matches, so resources without a usable version
    /// are always treated as changed.
    pub fn holds(&self, name: &str, version: &str) -> bool {
        !version.is_empty() && self.get(name) == Some(version)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterates over `(name, version)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.versions
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_str()))
    }

    /// Iterates over the recorded names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

impl From<BTreeMap<String, String>> for VersionSet {
    fn from(versions: BTreeMap<String, String>) -> Self {
        Self { versions }
    }
}

impl FromIterator<(String, String)> for VersionSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            versions: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for VersionSet {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(name, version)| (name.to_string(), version.to_string()))
            .collect()
    }
}

impl IntoIterator for VersionSet {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.versions.into_iter()
    }
}

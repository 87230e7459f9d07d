// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors returned by stream state operations.
//!
//! Each fallible operation returns an error type that lists exactly the failure modes of that
//! operation. None of them are fatal to the process; at worst they end the stream on which they
//! occurred.

use thiserror::Error;

use crate::resource::TypeUrl;

/// Errors arising from a malformed client request.
///
/// A request that fails validation is rejected as a whole and leaves the stream state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request did not name a resource type.
    #[error("request is missing a type URL")]
    MissingTypeUrl,
    /// The request's names would turn a wildcard subscription into an explicit one, or vice versa.
    #[error(
        "resource names for {type_url} conflict with its {} subscription",
        subscription_kind(.wildcard)
    )]
    WildcardConflict {
        type_url: TypeUrl,
        /// Whether the existing subscription is a wildcard subscription.
        wildcard: bool,
    },
    /// The request unsubscribed from a name that was never subscribed.
    #[error("cannot unsubscribe from {name:?} of {type_url}: not subscribed")]
    UnknownUnsubscribe { type_url: TypeUrl, name: String },
}

fn subscription_kind(wildcard: &bool) -> &'static str {
    if *wildcard {
        "wildcard"
    } else {
        "explicit"
    }
}

/// Error returned in response to an attempt to change the ordering mode of a stream after it was
/// declared.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stream ordering already declared as {declared}, refusing to change it to {requested}")]
pub struct OrderingRedeclared {
    pub declared: bool,
    pub requested: bool,
}

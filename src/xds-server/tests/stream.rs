// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! End-to-end tests of discovery streams over in-process channels.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::task::JoinHandle;
use xds_server::transport::{self, ChannelClient};
use xds_server::{Server, SnapshotCache, StreamError};
use xds_stream::protocol::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse, Node,
    Status,
};
use xds_stream::{RequestError, Resource, Snapshot, TypeUrl};

const NODE: &str = "edge-1";

type SotwClient = ChannelClient<DiscoveryRequest, DiscoveryResponse>;
type DeltaClient = ChannelClient<DeltaDiscoveryRequest, DeltaDiscoveryResponse>;

fn node() -> Option<Node> {
    Some(Node {
        id: NODE.into(),
        cluster: "edge".into(),
    })
}

fn resources(resources: &[(&str, &str)]) -> Vec<Resource> {
    resources
        .iter()
        .map(|(name, version)| Resource::new(*name, *version, Bytes::from(name.to_string())))
        .collect()
}

fn snapshot(version: &str, type_url: TypeUrl, items: &[(&str, &str)]) -> Snapshot {
    Snapshot::new().with_resources(type_url, version, resources(items))
}

fn sotw_request(type_url: TypeUrl, names: &[&str], nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        node: node(),
        resource_names: names.iter().map(|name| name.to_string()).collect(),
        type_url: type_url.as_str().into(),
        response_nonce: nonce.into(),
        ..Default::default()
    }
}

fn delta_request(
    type_url: TypeUrl,
    subscribe: &[&str],
    unsubscribe: &[&str],
    nonce: &str,
) -> DeltaDiscoveryRequest {
    DeltaDiscoveryRequest {
        node: node(),
        type_url: type_url.as_str().into(),
        resource_names_subscribe: subscribe.iter().map(|name| name.to_string()).collect(),
        resource_names_unsubscribe: unsubscribe.iter().map(|name| name.to_string()).collect(),
        response_nonce: nonce.into(),
        ..Default::default()
    }
}

fn start_sotw(server: &Server) -> (SotwClient, JoinHandle<Result<(), StreamError>>) {
    let (transport, client) = transport::channel();
    let server = server.clone();
    let handle = tokio::spawn(async move { server.serve_sotw(transport).await });
    (client, handle)
}

fn start_delta(server: &Server) -> (DeltaClient, JoinHandle<Result<(), StreamError>>) {
    let (transport, client) = transport::channel();
    let server = server.clone();
    let handle = tokio::spawn(async move { server.serve_delta(transport).await });
    (client, handle)
}

fn names(resources: &[Resource]) -> Vec<&str> {
    resources.iter().map(|resource| resource.name.as_str()).collect()
}

#[tokio::test]
async fn sotw_wildcard_receives_snapshot_and_updates() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(
        NODE,
        snapshot("1", TypeUrl::Cluster, &[("svcA", "1"), ("svcB", "1")]),
    );
    let server = Server::new(cache.clone());
    let (mut client, _handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Cluster, &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(response.type_url, TypeUrl::Cluster);
    assert_eq!(response.version_info, "1");
    assert_eq!(names(&response.resources), ["svcA", "svcB"]);

    // Acknowledging the response does not trigger another one.
    client
        .send(sotw_request(TypeUrl::Cluster, &[], &response.nonce))
        .expect("server alive");

    cache.set_snapshot(NODE, snapshot("2", TypeUrl::Cluster, &[("svcA", "2")]));
    let update = client.recv().await.expect("response");
    assert_eq!(update.version_info, "2");
    assert_eq!(names(&update.resources), ["svcA"]);
    assert_ne!(update.nonce, response.nonce);
}

#[tokio::test]
async fn sotw_first_response_is_sent_without_snapshot() {
    let cache = SnapshotCache::new();
    let server = Server::new(cache.clone());
    let (mut client, _handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Listener, &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(response.type_url, TypeUrl::Listener);
    assert_eq!(response.version_info, "");
    assert!(response.resources.is_empty());

    cache.set_snapshot(NODE, snapshot("1", TypeUrl::Listener, &[("http", "1")]));
    let update = client.recv().await.expect("response");
    assert_eq!(names(&update.resources), ["http"]);
}

#[tokio::test]
async fn sotw_ignores_requests_with_stale_nonces() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(
        NODE,
        snapshot("1", TypeUrl::Cluster, &[("svcA", "1"), ("svcB", "1"), ("svcC", "1")]),
    );
    let server = Server::new(cache);
    let (mut client, _handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Cluster, &["svcA"], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["svcA"]);

    client
        .send(sotw_request(TypeUrl::Cluster, &["svcA", "svcB"], "stale"))
        .expect("server alive");
    client
        .send(sotw_request(
            TypeUrl::Cluster,
            &["svcA", "svcC"],
            &response.nonce,
        ))
        .expect("server alive");
    let update = client.recv().await.expect("response");
    assert_eq!(names(&update.resources), ["svcA", "svcC"]);
}

#[tokio::test]
async fn sotw_rejections_are_not_answered() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(NODE, snapshot("1", TypeUrl::Cluster, &[("svcA", "1")]));
    let server = Server::new(cache.clone());
    let (mut client, _handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Cluster, &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");

    let mut nack = sotw_request(TypeUrl::Cluster, &[], &response.nonce);
    nack.error_detail = Some(Status {
        code: 3,
        message: "invalid cluster".into(),
    });
    client.send(nack).expect("server alive");

    cache.set_snapshot(NODE, snapshot("2", TypeUrl::Cluster, &[("svcA", "2")]));
    let update = client.recv().await.expect("response");
    assert_eq!(update.version_info, "2");
}

#[tokio::test]
async fn sotw_wildcard_conflict_ends_the_stream() {
    let cache = SnapshotCache::new();
    let server = Server::new(cache);
    let (mut client, handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Cluster, &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    client
        .send(sotw_request(TypeUrl::Cluster, &["svcA"], &response.nonce))
        .expect("server alive");

    let result = handle.await.expect("task completes");
    assert!(matches!(
        result,
        Err(StreamError::InvalidRequest(RequestError::WildcardConflict {
            wildcard: true,
            ..
        }))
    ));
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn missing_type_url_ends_the_stream() {
    let server = Server::new(SnapshotCache::new());
    let (client, handle) = start_sotw(&server);

    client
        .send(DiscoveryRequest {
            node: node(),
            ..Default::default()
        })
        .expect("server alive");

    let result = handle.await.expect("task completes");
    assert!(matches!(
        result,
        Err(StreamError::InvalidRequest(RequestError::MissingTypeUrl))
    ));
}

/// Subscribes to each of `types` in turn, declaring the ordering preference on the first request
/// only, and acknowledges every response. Then updates all types at once and returns the order
/// in which they were delivered.
async fn deliveries_after_update(ordered: bool, types: &[TypeUrl]) -> Vec<TypeUrl> {
    let cache = SnapshotCache::new();
    let server = Server::new(cache.clone());
    let (mut client, _handle) = start_sotw(&server);

    for (i, type_url) in types.iter().enumerate() {
        let mut request = sotw_request(type_url.clone(), &[], "");
        request.ordered = ordered && i == 0;
        client.send(request).expect("server alive");
        let response = client.recv().await.expect("response");
        assert_eq!(&response.type_url, type_url);
        client
            .send(sotw_request(type_url.clone(), &[], &response.nonce))
            .expect("server alive");
    }

    let update = types.iter().fold(Snapshot::new(), |snapshot, type_url| {
        snapshot.with_resources(type_url.clone(), "1", resources(&[("r", "1")]))
    });
    cache.set_snapshot(NODE, update);

    let mut delivered = Vec::new();
    for _ in types {
        delivered.push(client.recv().await.expect("response").type_url);
    }
    delivered
}

#[tokio::test]
async fn ordered_streams_deliver_in_priority_order() {
    let types = [
        TypeUrl::ExtensionConfig,
        TypeUrl::Secret,
        TypeUrl::Listener,
        TypeUrl::Cluster,
    ];
    // Follow-up requests leave the preference unset, which does not undo the declaration.
    assert_eq!(
        deliveries_after_update(true, &types).await,
        [
            TypeUrl::Cluster,
            TypeUrl::Listener,
            TypeUrl::Secret,
            TypeUrl::ExtensionConfig,
        ]
    );
}

#[tokio::test]
async fn unordered_streams_deliver_in_subscription_map_order() {
    let types = [
        TypeUrl::ExtensionConfig,
        TypeUrl::Secret,
        TypeUrl::Listener,
        TypeUrl::Cluster,
    ];
    assert_eq!(
        deliveries_after_update(false, &types).await,
        [
            TypeUrl::Cluster,
            TypeUrl::ExtensionConfig,
            TypeUrl::Listener,
            TypeUrl::Secret,
        ]
    );
}

#[tokio::test]
async fn sotw_acks_do_not_resend_unversioned_resources() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(NODE, snapshot("1", TypeUrl::Cluster, &[("c", "")]));
    let server = Server::new(cache);
    let (mut client, _handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Cluster, &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["c"]);

    for _ in 0..3 {
        client
            .send(sotw_request(TypeUrl::Cluster, &[], &response.nonce))
            .expect("server alive");
    }
    client
        .send(sotw_request(TypeUrl::Listener, &[], ""))
        .expect("server alive");
    let next = client.recv().await.expect("response");
    assert_eq!(next.type_url, TypeUrl::Listener);
}

#[tokio::test]
async fn delta_acks_do_not_resend_unversioned_resources() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(NODE, snapshot("1", TypeUrl::Cluster, &[("c", "")]));
    let server = Server::new(cache);
    let (mut client, _handle) = start_delta(&server);

    client
        .send(delta_request(TypeUrl::Cluster, &[], &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["c"]);

    client
        .send(delta_request(TypeUrl::Cluster, &[], &[], &response.nonce))
        .expect("server alive");
    client
        .send(delta_request(TypeUrl::Listener, &[], &[], ""))
        .expect("server alive");
    let next = client.recv().await.expect("response");
    assert_eq!(next.type_url, TypeUrl::Listener);
}

#[tokio::test]
async fn delta_subscriptions_follow_interest() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(
        NODE,
        snapshot("1", TypeUrl::Cluster, &[("svcA", "v1"), ("svcB", "v1"), ("svcC", "v1")]),
    );
    let server = Server::new(cache);
    let (mut client, _handle) = start_delta(&server);

    client
        .send(delta_request(TypeUrl::Cluster, &["svcA", "svcB"], &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["svcA", "svcB"]);
    assert!(response.removed_resources.is_empty());

    client
        .send(delta_request(
            TypeUrl::Cluster,
            &["svcC"],
            &["svcA"],
            &response.nonce,
        ))
        .expect("server alive");
    let update = client.recv().await.expect("response");
    assert_eq!(names(&update.resources), ["svcC"]);
    assert_eq!(update.removed_resources, ["svcA"]);
}

#[tokio::test]
async fn delta_wildcard_reports_changes_and_removals() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(
        NODE,
        snapshot("1", TypeUrl::Cluster, &[("svcA", "1"), ("svcB", "1")]),
    );
    let server = Server::new(cache.clone());
    let (mut client, _handle) = start_delta(&server);

    client
        .send(delta_request(TypeUrl::Cluster, &[], &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["svcA", "svcB"]);

    cache.set_snapshot(
        NODE,
        snapshot("2", TypeUrl::Cluster, &[("svcA", "2"), ("svcC", "1")]),
    );
    let update = client.recv().await.expect("response");
    assert_eq!(update.system_version_info, "2");
    assert_eq!(names(&update.resources), ["svcA", "svcC"]);
    assert_eq!(update.removed_resources, ["svcB"]);
}

#[tokio::test]
async fn delta_resumes_from_initial_versions() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(
        NODE,
        snapshot("1", TypeUrl::Cluster, &[("svcA", "1"), ("svcB", "1")]),
    );
    let server = Server::new(cache);
    let (mut client, _handle) = start_delta(&server);

    let mut request = delta_request(TypeUrl::Cluster, &[], &[], "");
    request.initial_resource_versions = BTreeMap::from([
        ("svcA".to_string(), "1".to_string()),
        ("gone".to_string(), "1".to_string()),
    ]);
    client.send(request).expect("server alive");

    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["svcB"]);
    assert_eq!(response.removed_resources, ["gone"]);
}

#[tokio::test]
async fn delta_wildcard_unsubscribe_keeps_the_stream() {
    let cache = SnapshotCache::new();
    cache.set_snapshot(
        NODE,
        snapshot("1", TypeUrl::Cluster, &[("a", "1"), ("b", "1")]),
    );
    let server = Server::new(cache.clone());
    let (mut client, _handle) = start_delta(&server);

    client
        .send(delta_request(TypeUrl::Cluster, &[], &[], ""))
        .expect("server alive");
    let response = client.recv().await.expect("response");
    assert_eq!(names(&response.resources), ["a", "b"]);

    // The wildcard still covers `a`, so unsubscribing from it changes nothing.
    client
        .send(delta_request(TypeUrl::Cluster, &[], &["a"], &response.nonce))
        .expect("server alive");

    cache.set_snapshot(
        NODE,
        snapshot("2", TypeUrl::Cluster, &[("a", "1"), ("b", "2")]),
    );
    let update = client.recv().await.expect("response");
    assert_eq!(names(&update.resources), ["b"]);
    assert!(update.removed_resources.is_empty());
}

#[tokio::test]
async fn delta_rejects_unknown_unsubscriptions() {
    let server = Server::new(SnapshotCache::new());
    let (client, handle) = start_delta(&server);

    client
        .send(delta_request(TypeUrl::Route, &["a"], &["b"], ""))
        .expect("server alive");

    let result = handle.await.expect("task completes");
    assert!(matches!(
        result,
        Err(StreamError::InvalidRequest(RequestError::UnknownUnsubscribe { .. }))
    ));
}

#[tokio::test]
async fn shutdown_ends_streams_quietly() {
    let cache = SnapshotCache::new();
    let server = Server::new(cache);
    let (mut client, handle) = start_sotw(&server);

    client
        .send(sotw_request(TypeUrl::Cluster, &[], ""))
        .expect("server alive");
    client.recv().await.expect("response");

    server.shutdown();
    handle
        .await
        .expect("task completes")
        .expect("cancellation is not an error");
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn closing_the_request_half_ends_the_stream() {
    let server = Server::new(SnapshotCache::new());
    let (client, handle) = start_delta(&server);

    client
        .send(delta_request(TypeUrl::Cluster, &[], &[], ""))
        .expect("server alive");
    let mut responses = client.close();

    handle
        .await
        .expect("task completes")
        .expect("closing is not an error");
    let response = responses.recv().await.expect("response");
    assert!(response.resources.is_empty());
    assert!(responses.recv().await.is_none());
}

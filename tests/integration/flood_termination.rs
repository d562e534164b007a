#![allow(missing_docs)]

use weft::{Cluster, ClusterConfig, GraphElementHandle, PropertyPredicate, WeftError};

fn cluster(num_shards: u32) -> Cluster {
    let mut config = ClusterConfig::default();
    config.cluster.num_shards = num_shards;
    config.coordinator.cache_update_interval_ms = 3_600_000;
    Cluster::start(&config).unwrap()
}

fn nodes(cluster: &Cluster, count: usize) -> Vec<GraphElementHandle> {
    (0..count)
        .map(|_| cluster.coordinator().create_node().unwrap())
        .collect()
}

#[test]
fn edge_creation_and_deletion_toggle_reachability() {
    let cluster = cluster(2);
    let mut client = cluster.client().unwrap();
    let any = PropertyPredicate::any;

    let a = client.create_node().unwrap();
    let b = client.create_node().unwrap();
    let ab = client.create_edge(a, b).unwrap();
    assert!(client.reachable(a, b, any()).unwrap());

    client.delete_edge(a, ab).unwrap();
    assert!(!client.reachable(a, b, any()).unwrap());
}

#[test]
fn second_node_deletion_is_rejected() {
    let cluster = cluster(2);
    let coordinator = cluster.coordinator();
    let a = coordinator.create_node().unwrap();
    coordinator.delete_node(a).unwrap();
    let deleted_at = coordinator.metadata(a).unwrap().deletion_time;
    assert!(deleted_at.is_some());

    let pending_before = coordinator.stats().pending_requests;
    assert!(matches!(
        coordinator.delete_node(a),
        Err(WeftError::ProtocolViolation(_))
    ));
    assert_eq!(coordinator.metadata(a).unwrap().deletion_time, deleted_at);
    assert_eq!(coordinator.stats().pending_requests, pending_before);
}

#[test]
fn two_hop_flood_crosses_shards() {
    let cluster = cluster(3);
    let coordinator = cluster.coordinator();
    let n = nodes(&cluster, 3);
    assert_ne!(n[1].shard, n[2].shard);
    coordinator.create_edge(n[0], n[1]).unwrap();
    coordinator.create_edge(n[1], n[2]).unwrap();
    assert!(coordinator.reachable(n[0], n[2], &PropertyPredicate::any()).unwrap());
    assert!(!coordinator.reachable(n[2], n[0], &PropertyPredicate::any()).unwrap());
}

#[test]
fn long_chain_across_every_shard() {
    let cluster = cluster(4);
    let coordinator = cluster.coordinator();
    let n = nodes(&cluster, 17);
    for pair in n.windows(2) {
        coordinator.create_edge(pair[0], pair[1]).unwrap();
    }
    let any = PropertyPredicate::any();
    assert!(coordinator.reachable(n[0], n[16], &any).unwrap());
    assert!(coordinator.reachable(n[5], n[11], &any).unwrap());
    assert!(!coordinator.reachable(n[16], n[0], &any).unwrap());
    assert_eq!(coordinator.stats().floods, 0);
}

#[test]
fn cycles_terminate_with_a_negative_answer() {
    let cluster = cluster(3);
    let coordinator = cluster.coordinator();
    let n = nodes(&cluster, 6);
    // Ring over n[0..5]; n[5] is isolated.
    for i in 0..5 {
        coordinator.create_edge(n[i], n[(i + 1) % 5]).unwrap();
    }
    coordinator.create_edge(n[2], n[0]).unwrap();
    let any = PropertyPredicate::any();
    assert!(!coordinator.reachable(n[0], n[5], &any).unwrap());
    assert!(coordinator.reachable(n[3], n[1], &any).unwrap());
    assert_eq!(coordinator.stats().floods, 0);
    assert_eq!(coordinator.stats().pending_requests, 0);
}

#[test]
fn wide_fan_out_is_split_into_batches() {
    let mut config = ClusterConfig::default();
    config.cluster.num_shards = 2;
    config.shard.max_nodes_per_forward = 3;
    config.coordinator.cache_update_interval_ms = 3_600_000;
    let cluster = Cluster::start(&config).unwrap();
    let coordinator = cluster.coordinator();

    let hub = coordinator.create_node().unwrap();
    let leaves = nodes(&cluster, 20);
    for leaf in &leaves {
        coordinator.create_edge(hub, *leaf).unwrap();
    }
    let target = leaves[19];
    let sink = coordinator.create_node().unwrap();
    coordinator.create_edge(target, sink).unwrap();
    let any = PropertyPredicate::any();
    assert!(coordinator.reachable(hub, sink, &any).unwrap());
    assert!(!coordinator.reachable(leaves[0], sink, &any).unwrap());
}

#[test]
fn a_node_reaches_itself() {
    let cluster = cluster(2);
    let coordinator = cluster.coordinator();
    let a = coordinator.create_node().unwrap();
    let outcome = coordinator
        .reachable_detailed(a, a, &PropertyPredicate::any())
        .unwrap();
    assert!(outcome.reachable);
    assert_eq!(outcome.attempts, 0);
}

#[test]
fn deleted_endpoints_are_refused() {
    let cluster = cluster(2);
    let coordinator = cluster.coordinator();
    let a = coordinator.create_node().unwrap();
    let b = coordinator.create_node().unwrap();
    coordinator.create_edge(a, b).unwrap();
    coordinator.delete_node(b).unwrap();
    assert!(matches!(
        coordinator.reachable(a, b, &PropertyPredicate::any()),
        Err(WeftError::DeletedEndpoint(handle)) if handle == b
    ));
    assert!(matches!(
        coordinator.create_edge(b, a),
        Err(WeftError::ProtocolViolation(_))
    ));
}

#[test]
fn deleted_intermediate_node_breaks_the_path() {
    let cluster = cluster(3);
    let coordinator = cluster.coordinator();
    let n = nodes(&cluster, 3);
    coordinator.create_edge(n[0], n[1]).unwrap();
    coordinator.create_edge(n[1], n[2]).unwrap();
    let any = PropertyPredicate::any();
    assert!(coordinator.reachable(n[0], n[2], &any).unwrap());
    coordinator.delete_node(n[1]).unwrap();
    assert!(!coordinator.reachable(n[0], n[2], &any).unwrap());
}

#[test]
fn predicate_filters_edges() {
    let mut config = ClusterConfig::default();
    config.cluster.num_shards = 2;
    // Property requests get no reply; one frontend worker keeps them ordered before
    // the queries that follow.
    config.coordinator.client_workers = 1;
    config.coordinator.cache_update_interval_ms = 3_600_000;
    let cluster = Cluster::start(&config).unwrap();
    let mut client = cluster.client().unwrap();
    let a = client.create_node().unwrap();
    let b = client.create_node().unwrap();
    let c = client.create_node().unwrap();
    let ab = client.create_edge(a, b).unwrap();
    let bc = client.create_edge(b, c).unwrap();
    client.add_edge_property(a, ab, "color", "red").unwrap();
    client.add_edge_property(b, bc, "color", "red").unwrap();
    client.add_edge_property(b, bc, "weight", "3").unwrap();

    let red = PropertyPredicate::new([("color", "red")]);
    let heavy_red = PropertyPredicate::new([("color", "red"), ("weight", "3")]);
    assert!(client.reachable(a, c, red.clone()).unwrap());
    assert!(client.reachable(b, c, heavy_red.clone()).unwrap());
    assert!(!client.reachable(a, c, heavy_red).unwrap());

    client.delete_edge_property(a, ab, "color").unwrap();
    assert!(!client.reachable(a, c, red).unwrap());
    assert!(client.reachable(a, c, PropertyPredicate::any()).unwrap());
}

#[test]
fn handles_from_the_wrong_shard_are_not_found() {
    let cluster = cluster(2);
    let coordinator = cluster.coordinator();
    let a = coordinator.create_node().unwrap();
    let ghost = GraphElementHandle::node(a.shard, a.index + 100);
    assert!(matches!(
        coordinator.reachable(a, ghost, &PropertyPredicate::any()),
        Err(WeftError::NotFound(_))
    ));
}

#![allow(missing_docs)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use weft::{Cluster, ClusterConfig, PropertyPredicate};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Cluster whose cache broadcast only runs when a test asks for it.
fn manual_cache_cluster(num_shards: u32) -> Cluster {
    init_tracing();
    let mut config = ClusterConfig::default();
    config.cluster.num_shards = num_shards;
    config.coordinator.cache_update_interval_ms = 3_600_000;
    Cluster::start(&config).unwrap()
}

#[test]
fn stale_cached_answer_is_retried_after_deletion() {
    let cluster = manual_cache_cluster(3);
    let coordinator = cluster.coordinator();
    let any = PropertyPredicate::any();

    let a = coordinator.create_node().unwrap();
    let b = coordinator.create_node().unwrap();
    let c = coordinator.create_node().unwrap();
    coordinator.create_edge(a, b).unwrap();
    let bc = coordinator.create_edge(b, c).unwrap();

    let fresh = coordinator.reachable_detailed(a, c, &any).unwrap();
    assert!(fresh.reachable);
    assert_eq!(fresh.used_cache_id, None);
    assert_eq!(fresh.attempts, 1);

    // First round installs the answer inactive, the second activates it.
    let installed = coordinator.run_cache_round().unwrap().unwrap();
    assert_eq!(installed.installed, 1);
    let activated = coordinator.run_cache_round().unwrap().unwrap();
    assert_eq!(activated.activated, 1);

    let cached = coordinator.reachable_detailed(a, c, &any).unwrap();
    assert!(cached.reachable);
    assert_eq!(cached.attempts, 1);
    let cache_id = cached.used_cache_id.expect("answer should come from the cache");

    coordinator.delete_edge(b, bc).unwrap();
    let after = coordinator.reachable_detailed(a, c, &any).unwrap();
    assert!(!after.reachable);
    assert_eq!(after.attempts, 2);
    assert_eq!(after.used_cache_id, None);

    // The next broadcast drops the invalidated entry everywhere.
    let summary = coordinator.run_cache_round().unwrap().unwrap();
    assert!(summary.bad >= 1, "cache id {cache_id} should be broadcast as bad");
    let again = coordinator.reachable_detailed(a, c, &any).unwrap();
    assert!(!again.reachable);
    assert_eq!(again.attempts, 1);
}

#[test]
fn cache_is_keyed_by_predicate() {
    let cluster = manual_cache_cluster(2);
    let coordinator = cluster.coordinator();
    let a = coordinator.create_node().unwrap();
    let b = coordinator.create_node().unwrap();
    let ab = coordinator.create_edge(a, b).unwrap();
    coordinator.add_edge_property(a, ab, "kind", "road").unwrap();

    let roads = PropertyPredicate::new([("kind", "road")]);
    assert!(coordinator.reachable(a, b, &roads).unwrap());
    coordinator.run_cache_round().unwrap();
    coordinator.run_cache_round().unwrap();

    let rails = PropertyPredicate::new([("kind", "rail")]);
    let outcome = coordinator.reachable_detailed(a, b, &rails).unwrap();
    assert!(!outcome.reachable);
    assert_eq!(outcome.used_cache_id, None);

    let outcome = coordinator.reachable_detailed(a, b, &roads).unwrap();
    assert!(outcome.reachable);
    assert!(outcome.used_cache_id.is_some());
}

#[test]
fn deleting_a_property_invalidates_answers_that_relied_on_it() {
    let cluster = manual_cache_cluster(2);
    let coordinator = cluster.coordinator();
    let a = coordinator.create_node().unwrap();
    let b = coordinator.create_node().unwrap();
    let ab = coordinator.create_edge(a, b).unwrap();
    coordinator.add_edge_property(a, ab, "kind", "road").unwrap();
    let roads = PropertyPredicate::new([("kind", "road")]);

    assert!(coordinator.reachable(a, b, &roads).unwrap());
    coordinator.run_cache_round().unwrap();
    coordinator.run_cache_round().unwrap();
    assert!(coordinator
        .reachable_detailed(a, b, &roads)
        .unwrap()
        .used_cache_id
        .is_some());

    coordinator.delete_edge_property(a, ab, "kind").unwrap();
    // The deletion is settled before the answer is accepted, so the stale entry is
    // never returned.
    assert!(!coordinator.reachable(a, b, &roads).unwrap());
    assert!(coordinator.reachable(a, b, &PropertyPredicate::any()).unwrap());
}

#[test]
fn install_rejected_when_path_was_deleted_before_the_round() {
    let cluster = manual_cache_cluster(2);
    let coordinator = cluster.coordinator();
    let any = PropertyPredicate::any();
    let a = coordinator.create_node().unwrap();
    let b = coordinator.create_node().unwrap();
    let ab = coordinator.create_edge(a, b).unwrap();

    assert!(coordinator.reachable(a, b, &any).unwrap());
    coordinator.delete_edge(a, ab).unwrap();
    let summary = coordinator.run_cache_round().unwrap().unwrap();
    assert_eq!(summary.installed, 1);
    assert_eq!(summary.rejected.len(), 1);
    coordinator.run_cache_round().unwrap();

    let outcome = coordinator.reachable_detailed(a, b, &any).unwrap();
    assert!(!outcome.reachable);
    assert_eq!(outcome.attempts, 1);
}

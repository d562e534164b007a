#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;

use weft::{Cluster, ClusterConfig, PropertyPredicate, Result};

const NUM_THREADS: usize = 6;
const QUERIES_PER_PHASE: usize = 20;

fn busy_cluster() -> Arc<Cluster> {
    let mut config = ClusterConfig::default();
    config.cluster.num_shards = 3;
    // Broadcast often so rounds interleave with queries and deletions.
    config.coordinator.cache_update_interval_ms = 5;
    config.coordinator.client_workers = NUM_THREADS;
    Arc::new(Cluster::start(&config).unwrap())
}

#[test]
fn queries_after_a_deletion_never_see_the_deleted_edge() {
    let cluster = busy_cluster();
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = Vec::new();

    for _ in 0..NUM_THREADS {
        let cluster = Arc::clone(&cluster);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            let mut client = cluster.client()?;
            let any = PropertyPredicate::any;
            let a = client.create_node()?;
            let b = client.create_node()?;
            let c = client.create_node()?;
            client.create_edge(a, b)?;
            let bc = client.create_edge(b, c)?;
            barrier.wait();

            for _ in 0..QUERIES_PER_PHASE {
                assert!(client.reachable(a, c, any())?);
            }
            client.delete_edge(b, bc)?;
            for _ in 0..QUERIES_PER_PHASE {
                assert!(!client.reachable(a, c, any())?);
            }
            Ok(())
        }));
    }

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    let stats = cluster.coordinator().stats();
    assert_eq!(stats.pending_requests, 0);
    assert_eq!(stats.pending_deletions, 0);
    assert_eq!(stats.floods, 0);
}

#[test]
fn unrelated_deletions_do_not_disturb_readers() {
    let cluster = busy_cluster();
    let coordinator = cluster.coordinator().clone();
    let any = PropertyPredicate::any();

    let spine: Vec<_> = (0..4).map(|_| coordinator.create_node().unwrap()).collect();
    for pair in spine.windows(2) {
        coordinator.create_edge(pair[0], pair[1]).unwrap();
    }
    let mut doomed = Vec::new();
    for i in 0..NUM_THREADS * 4 {
        let leaf = coordinator.create_node().unwrap();
        let from = spine[i % spine.len()];
        doomed.push((from, coordinator.create_edge(from, leaf).unwrap()));
    }
    let doomed = Arc::new(doomed);
    let spine = Arc::new(spine);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = Vec::new();

    for worker in 0..NUM_THREADS {
        let coordinator = coordinator.clone();
        let doomed = Arc::clone(&doomed);
        let spine = Arc::clone(&spine);
        let barrier = Arc::clone(&barrier);
        let any = any.clone();
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            if worker % 2 == 0 {
                for (node, edge) in doomed.iter().skip(worker).step_by(NUM_THREADS) {
                    coordinator.delete_edge(*node, *edge)?;
                }
            } else {
                for _ in 0..QUERIES_PER_PHASE {
                    assert!(coordinator.reachable(spine[0], spine[3], &any)?);
                    assert!(!coordinator.reachable(spine[3], spine[0], &any)?);
                }
            }
            Ok(())
        }));
    }

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert!(coordinator.reachable(spine[0], spine[3], &any).unwrap());
}

#[test]
fn concurrent_creates_get_distinct_handles() {
    let cluster = busy_cluster();
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = Vec::new();
    for _ in 0..NUM_THREADS {
        let coordinator = cluster.coordinator().clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            (0..25)
                .map(|_| coordinator.create_node().unwrap())
                .collect::<Vec<_>>()
        }));
    }
    let mut all: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total);
    assert_eq!(cluster.coordinator().stats().elements, total);
}

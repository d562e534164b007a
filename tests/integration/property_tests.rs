#![allow(missing_docs)]

use std::collections::{BTreeSet, VecDeque};

use proptest::prelude::*;
use weft::{Cluster, ClusterConfig, PropertyPredicate};

const MAX_NODES: usize = 7;

#[derive(Debug, Clone)]
struct Workload {
    num_shards: u32,
    nodes: usize,
    edges: Vec<(usize, usize)>,
    deletions: BTreeSet<usize>,
    queries: Vec<(usize, usize)>,
}

fn arb_workload() -> impl Strategy<Value = Workload> {
    (1u32..=3, 2usize..=MAX_NODES)
        .prop_flat_map(|(num_shards, nodes)| {
            let edge = (0..nodes, 0..nodes);
            (
                Just(num_shards),
                Just(nodes),
                prop::collection::vec(edge.clone(), 0..12),
                prop::collection::btree_set(0usize..12, 0..4),
                prop::collection::vec(edge, 1..6),
            )
        })
        .prop_map(|(num_shards, nodes, edges, deletions, queries)| Workload {
            num_shards,
            nodes,
            deletions: deletions.into_iter().filter(|i| *i < edges.len()).collect(),
            edges,
            queries,
        })
}

fn expected_reachable(nodes: usize, edges: &[(usize, usize)], from: usize, to: usize) -> bool {
    let mut seen = vec![false; nodes];
    let mut queue = VecDeque::from([from]);
    seen[from] = true;
    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        for &(_, dst) in edges.iter().filter(|(src, _)| *src == node) {
            if !seen[dst] {
                seen[dst] = true;
                queue.push_back(dst);
            }
        }
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_reachability_matches_local_bfs(workload in arb_workload()) {
        let mut config = ClusterConfig::default();
        config.cluster.num_shards = workload.num_shards;
        config.coordinator.shard_workers = 2;
        config.coordinator.client_workers = 2;
        config.coordinator.cache_update_interval_ms = 3_600_000;
        let cluster = Cluster::start(&config).unwrap();
        let coordinator = cluster.coordinator();
        let any = PropertyPredicate::any();

        let handles: Vec<_> = (0..workload.nodes)
            .map(|_| coordinator.create_node().unwrap())
            .collect();
        let edge_handles: Vec<_> = workload
            .edges
            .iter()
            .map(|&(src, dst)| coordinator.create_edge(handles[src], handles[dst]).unwrap())
            .collect();

        // Warm the caches before deleting so stale answers would be visible.
        for &(from, to) in &workload.queries {
            let got = coordinator.reachable(handles[from], handles[to], &any).unwrap();
            prop_assert_eq!(got, expected_reachable(workload.nodes, &workload.edges, from, to));
        }
        coordinator.run_cache_round().unwrap();
        coordinator.run_cache_round().unwrap();

        for &index in &workload.deletions {
            let (src, _) = workload.edges[index];
            coordinator.delete_edge(handles[src], edge_handles[index]).unwrap();
        }
        let surviving: Vec<_> = workload
            .edges
            .iter()
            .enumerate()
            .filter(|(i, _)| !workload.deletions.contains(i))
            .map(|(_, edge)| *edge)
            .collect();

        for &(from, to) in &workload.queries {
            let got = coordinator.reachable(handles[from], handles[to], &any).unwrap();
            prop_assert_eq!(got, expected_reachable(workload.nodes, &surviving, from, to));
        }
    }
}

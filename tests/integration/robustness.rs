#![allow(missing_docs)]

use weft::net::message::ClientRequest;
use weft::net::{send_message, Endpoint, Message, Transport};
use weft::types::HopId;
use weft::{Cluster, ClusterConfig, PropertyPredicate, ShardId, WeftError};

fn cluster() -> Cluster {
    let mut config = ClusterConfig::default();
    config.cluster.num_shards = 2;
    config.coordinator.cache_update_interval_ms = 3_600_000;
    config.coordinator.reply_timeout_ms = Some(2_000);
    Cluster::start(&config).unwrap()
}

#[test]
fn garbage_and_stray_messages_are_dropped() {
    let cluster = cluster();
    let rogue = cluster.network().bind(Endpoint::Client(9_999)).unwrap();

    for to in [Endpoint::Coordinator, Endpoint::Frontend, Endpoint::Shard(ShardId(0))] {
        rogue.send(to, b"not a frame".to_vec()).unwrap();
    }
    let a = cluster.coordinator().create_node().unwrap();
    let strays = [
        Message::CreateAck {
            request_id: 424_242,
            handle: a,
        },
        Message::DeleteAck {
            request_id: 424_243,
            invalidated: vec![1, 2, 3],
        },
        Message::ReachabilityProgress {
            query_id: 424_244,
            hop: HopId::root(424_244),
            forwarded: Vec::new(),
        },
        Message::CacheUpdateAck {
            rejected: Vec::new(),
        },
    ];
    for message in &strays {
        send_message(&rogue, Endpoint::Coordinator, message).unwrap();
    }
    // A client message on the shard inbox is not a shard message.
    send_message(
        &rogue,
        Endpoint::Coordinator,
        &Message::Client {
            ticket: 1,
            request: ClientRequest::CreateNode,
        },
    )
    .unwrap();

    let coordinator = cluster.coordinator();
    let b = coordinator.create_node().unwrap();
    coordinator.create_edge(a, b).unwrap();
    assert!(coordinator.reachable(a, b, &PropertyPredicate::any()).unwrap());
    assert_eq!(coordinator.stats().pending_requests, 0);
}

#[test]
fn an_unreachable_shard_fails_fast() {
    let cluster = cluster();
    let coordinator = cluster.coordinator();
    let first = coordinator.create_node().unwrap();
    assert_eq!(first.shard, ShardId(0));

    cluster.network().unbind(Endpoint::Shard(ShardId(1)));
    assert!(matches!(
        coordinator.create_node(),
        Err(WeftError::Disconnected(_))
    ));
    assert_eq!(coordinator.stats().pending_requests, 0);

    // Shard 0 still serves; placement moved on past the dead shard.
    let third = coordinator.create_node().unwrap();
    assert_eq!(third.shard, ShardId(0));
    coordinator.create_edge(first, third).unwrap();
    assert!(coordinator
        .reachable(first, third, &PropertyPredicate::any())
        .unwrap());

    // The broadcast completes without an ack from the missing shard.
    let summary = coordinator.run_cache_round().unwrap().unwrap();
    assert_eq!(summary.installed, 1);
}

#[test]
fn operations_after_shutdown_are_refused() {
    let mut cluster = cluster();
    let a = cluster.coordinator().create_node().unwrap();
    let coordinator = cluster.coordinator().clone();
    cluster.shutdown();
    assert!(matches!(
        coordinator.create_node(),
        Err(WeftError::Disconnected(_))
    ));
    assert!(matches!(
        coordinator.reachable(a, a, &PropertyPredicate::any()),
        Err(WeftError::Disconnected(_))
    ));
}

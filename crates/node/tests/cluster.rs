//! Two-peer cluster tests: key routing, TCC MULTI partitioning, cross-peer
//! WATCH propagation and pub/sub fan-out.

mod common;

use common::*;
use cluster::ring::{Ring, DEFAULT_REPLICAS};
use engine::config::ServerConfig;
use resp::{reply, RespValue};
use tokio::net::TcpListener;

struct Peers {
    node1: TestServer,
    node2: TestServer,
    ring: Ring,
    addr1: String,
    addr2: String,
}

async fn start_two_peers(open_atomic_tx: bool) -> Peers {
    let listener1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr1 = listener1.local_addr().unwrap().to_string();
    let addr2 = listener2.local_addr().unwrap().to_string();

    let config = |self_addr: &str, peer: &str| ServerConfig {
        self_addr: self_addr.to_string(),
        peers: vec![peer.to_string()],
        open_atomic_tx,
        ..ServerConfig::default()
    };

    let node1 = start_server_on(listener1, config(&addr1, &addr2)).await;
    let node2 = start_server_on(listener2, config(&addr2, &addr1)).await;

    let mut ring = Ring::new(DEFAULT_REPLICAS);
    ring.add_nodes(&[addr1.clone(), addr2.clone()]);

    Peers {
        node1,
        node2,
        ring,
        addr1,
        addr2,
    }
}

impl Peers {
    /// A key the given node owns, derived deterministically from `prefix`.
    fn key_owned_by(&self, owner: &str, prefix: &str) -> String {
        for i in 0..10_000 {
            let key = format!("{prefix}{i}");
            if self.ring.pick_node(key.as_bytes()) == Some(owner) {
                return key;
            }
        }
        panic!("no key for {owner}");
    }

    async fn stop(self) {
        self.node1.stop().await;
        self.node2.stop().await;
    }
}

#[tokio::test]
async fn test_remote_key_routing() {
    let peers = start_two_peers(false).await;
    let remote_key = peers.key_owned_by(&peers.addr2, "routed-");

    // write through node1 even though node2 owns the key
    let mut client = peers.node1.connect().await;
    assert_eq!(send(&mut client, &["SET", &remote_key, "v"]).await, reply::ok());

    // visible on node2 directly
    let mut client2 = peers.node2.connect().await;
    assert_bulk(&send(&mut client2, &["GET", &remote_key]).await, "v");
    // and through node1's routing
    assert_bulk(&send(&mut client, &["GET", &remote_key]).await, "v");

    peers.stop().await;
}

#[tokio::test]
async fn test_tcc_multi_partitions_batch() {
    let peers = start_two_peers(false).await;
    let key1 = peers.key_owned_by(&peers.addr1, "alpha-");
    let key2 = peers.key_owned_by(&peers.addr2, "beta-");

    let mut client = peers.node1.connect().await;
    assert_eq!(send(&mut client, &["MULTI"]).await, reply::ok());
    assert_eq!(send(&mut client, &["SET", &key1, "A"]).await, reply::queued());
    assert_eq!(send(&mut client, &["SET", &key2, "B"]).await, reply::queued());
    match send(&mut client, &["EXEC"]).await {
        RespValue::Array(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[0], reply::ok());
            assert_eq!(items[1], reply::ok());
        }
        other => panic!("unexpected EXEC reply {other:?}"),
    }

    let mut client1 = peers.node1.connect().await;
    let mut client2 = peers.node2.connect().await;
    assert_bulk(&send(&mut client1, &["GET", &key1]).await, "A");
    assert_bulk(&send(&mut client2, &["GET", &key2]).await, "B");

    peers.stop().await;
}

#[tokio::test]
async fn test_cross_peer_watch_aborts_tcc() {
    let peers = start_two_peers(false).await;
    let remote_key = peers.key_owned_by(&peers.addr2, "watched-");

    let mut watcher = peers.node1.connect().await;
    send(&mut watcher, &["SET", &remote_key, "1"]).await;
    assert_eq!(send(&mut watcher, &["WATCH", &remote_key]).await, reply::ok());
    assert_eq!(send(&mut watcher, &["MULTI"]).await, reply::ok());
    assert_eq!(send(&mut watcher, &["SET", &remote_key, "2"]).await, reply::queued());

    // another client writes the watched key on its owning peer
    let mut writer = peers.node2.connect().await;
    assert_eq!(send(&mut writer, &["SET", &remote_key, "9"]).await, reply::ok());

    assert_eq!(send(&mut watcher, &["EXEC"]).await, reply::null_bulk());
    assert_bulk(&send(&mut watcher, &["GET", &remote_key]).await, "9");

    peers.stop().await;
}

#[tokio::test]
async fn test_tcc_atomic_rollback_across_peers() {
    let peers = start_two_peers(true).await;
    let key1 = peers.key_owned_by(&peers.addr1, "roll-a-");
    let key2 = peers.key_owned_by(&peers.addr2, "roll-b-");

    let mut client = peers.node1.connect().await;
    send(&mut client, &["SET", &key1, "1"]).await;
    send(&mut client, &["SET", &key2, "xyz"]).await;

    send(&mut client, &["MULTI"]).await;
    send(&mut client, &["INCR", &key1]).await;
    send(&mut client, &["INCR", &key2]).await;
    let result = send(&mut client, &["EXEC"]).await;
    assert!(result.is_error(), "expected commit failure, got {result:?}");

    // the failing peer rolled its increment back
    assert_bulk(&send(&mut client, &["GET", &key2]).await, "xyz");

    peers.stop().await;
}

#[tokio::test]
async fn test_publish_fans_out() {
    let peers = start_two_peers(false).await;

    // subscriber on node2, publisher on node1
    let mut subscriber = peers.node2.connect().await;
    match send(&mut subscriber, &["SUBSCRIBE", "events"]).await {
        RespValue::Array(items) => assert_eq!(items.len(), 3),
        other => panic!("unexpected subscribe reply {other:?}"),
    }

    let mut publisher = peers.node1.connect().await;
    assert_eq!(
        send(&mut publisher, &["PUBLISH", "events", "ping"]).await,
        reply::integer(1)
    );
    let pushed = subscriber.recv().await.expect("pushed message");
    match pushed {
        RespValue::Array(items) => {
            assert_eq!(items[0], reply::bulk(bytes::Bytes::from("message")));
            assert_eq!(items[2], reply::bulk(bytes::Bytes::from("ping")));
        }
        other => panic!("unexpected push {other:?}"),
    }

    // cluster-wide channel listing sees the remote subscriber
    match send(&mut publisher, &["PUBSUB", "CHANNELS"]).await {
        RespValue::Array(items) => assert_eq!(items.len(), 1),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        send(&mut publisher, &["PUBSUB", "NUMSUB", "events"]).await,
        reply::multi_bulk(resp::cmdline(&["events", "1"]))
    );

    peers.stop().await;
}

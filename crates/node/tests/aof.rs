//! Append-only persistence: restart round-trips and online rewrite.

mod common;

use common::*;
use engine::config::ServerConfig;
use resp::{reply, RespValue};

fn aof_config(dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        append_only: true,
        aof_filename: dir
            .path()
            .join("dump.aof")
            .to_string_lossy()
            .to_string(),
        aof_fsync: 0, // always
        ..ServerConfig::default()
    }
}

async fn seed(client: &mut cluster::Client) {
    assert_eq!(send(client, &["SET", "a", "1"]).await, reply::ok());
    assert_eq!(send(client, &["RPUSH", "L", "x", "y", "z"]).await, reply::integer(3));
    assert_eq!(send(client, &["HSET", "H", "f", "1"]).await, reply::integer(1));
    assert_eq!(send(client, &["ZADD", "z", "1", "m"]).await, reply::integer(1));
    assert_eq!(send(client, &["EXPIRE", "a", "3600"]).await, reply::integer(1));
}

async fn verify(client: &mut cluster::Client) {
    assert_bulk(&send(client, &["GET", "a"]).await, "1");
    assert_eq!(
        send(client, &["LRANGE", "L", "0", "-1"]).await,
        reply::multi_bulk(resp::cmdline(&["x", "y", "z"]))
    );
    assert_bulk(&send(client, &["HGET", "H", "f"]).await, "1");
    assert_bulk(&send(client, &["ZSCORE", "z", "m"]).await, "1");
    match send(client, &["TTL", "a"]).await {
        RespValue::Integer(n) => assert!(n > 0 && n <= 3600, "ttl {n} out of range"),
        other => panic!("unexpected TTL reply {other:?}"),
    }
}

#[tokio::test]
async fn test_restart_rebuilds_state() {
    let dir = tempfile::tempdir().unwrap();

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    seed(&mut client).await;
    send(&mut client, &["SET", "gone", "soon"]).await;
    assert_eq!(send(&mut client, &["DEL", "gone"]).await, reply::integer(1));
    server.stop().await;

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    verify(&mut client).await;
    assert_eq!(send(&mut client, &["EXISTS", "gone"]).await, reply::integer(0));
    server.stop().await;
}

#[tokio::test]
async fn test_restart_preserves_selected_databases() {
    let dir = tempfile::tempdir().unwrap();

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    send(&mut client, &["SET", "k", "zero"]).await;
    send(&mut client, &["SELECT", "2"]).await;
    send(&mut client, &["SET", "k", "two"]).await;
    server.stop().await;

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    assert_bulk(&send(&mut client, &["GET", "k"]).await, "zero");
    send(&mut client, &["SELECT", "2"]).await;
    assert_bulk(&send(&mut client, &["GET", "k"]).await, "two");
    server.stop().await;
}

#[tokio::test]
async fn test_rewrite_then_restart() {
    let dir = tempfile::tempdir().unwrap();

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    seed(&mut client).await;
    // churn that the rewrite should compact away
    for i in 0..50 {
        send(&mut client, &["SET", "churn", &i.to_string()]).await;
    }
    send(&mut client, &["DEL", "churn"]).await;

    let before = std::fs::metadata(dir.path().join("dump.aof")).unwrap().len();
    assert_eq!(send(&mut client, &["REWRITEAOF"]).await, reply::ok());
    let after = std::fs::metadata(dir.path().join("dump.aof")).unwrap().len();
    assert!(after < before, "rewrite did not shrink the log ({before} -> {after})");

    // writes after the rewrite keep landing in the new file
    send(&mut client, &["SET", "post", "rewrite"]).await;
    server.stop().await;

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    verify(&mut client).await;
    assert_bulk(&send(&mut client, &["GET", "post"]).await, "rewrite");
    assert_eq!(send(&mut client, &["EXISTS", "churn"]).await, reply::integer(0));
    server.stop().await;
}

#[tokio::test]
async fn test_bgrewriteaof_reports_status() {
    let dir = tempfile::tempdir().unwrap();

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    send(&mut client, &["SET", "k", "v"]).await;
    match send(&mut client, &["BGREWRITEAOF"]).await {
        RespValue::SimpleString(s) => {
            assert!(String::from_utf8_lossy(&s).contains("rewriting"))
        }
        other => panic!("unexpected {other:?}"),
    }
    // wait for the background rewrite to settle before shutdown
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    server.stop().await;

    let server = start_server(aof_config(&dir)).await;
    let mut client = server.connect().await;
    assert_bulk(&send(&mut client, &["GET", "k"]).await, "v");
    server.stop().await;
}

//! End-to-end tests against a standalone node over a real socket.

mod common;

use common::*;
use engine::config::ServerConfig;
use resp::{reply, RespValue};
use std::time::Duration;

fn basic_config() -> ServerConfig {
    ServerConfig::default()
}

fn atomic_config() -> ServerConfig {
    ServerConfig {
        open_atomic_tx: true,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_basic_string_and_ttl() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    assert_eq!(send(&mut client, &["SET", "foo", "bar"]).await, reply::ok());
    assert_bulk(&send(&mut client, &["GET", "foo"]).await, "bar");
    assert_eq!(send(&mut client, &["EXPIRE", "foo", "1"]).await, reply::integer(1));
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(send(&mut client, &["EXISTS", "foo"]).await, reply::integer(0));

    server.stop().await;
}

#[tokio::test]
async fn test_wrong_type_leaves_value_untouched() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    assert_eq!(send(&mut client, &["SET", "k", "hello"]).await, reply::ok());
    assert_err_contains(&send(&mut client, &["LPUSH", "k", "x"]).await, "WRONGTYPE");
    assert_bulk(&send(&mut client, &["GET", "k"]).await, "hello");

    server.stop().await;
}

#[tokio::test]
async fn test_atomic_multi_rollback() {
    let server = start_server(atomic_config()).await;
    let mut client = server.connect().await;

    send(&mut client, &["SET", "a", "1"]).await;
    send(&mut client, &["SET", "b", "xyz"]).await;
    assert_eq!(send(&mut client, &["MULTI"]).await, reply::ok());
    assert_eq!(send(&mut client, &["INCR", "a"]).await, reply::queued());
    assert_eq!(send(&mut client, &["INCR", "b"]).await, reply::queued());
    assert_err_contains(
        &send(&mut client, &["EXEC"]).await,
        "EXECABORT Transaction rollback because of errors during executing. (atomic tx is open)",
    );
    assert_bulk(&send(&mut client, &["GET", "a"]).await, "1");
    assert_bulk(&send(&mut client, &["GET", "b"]).await, "xyz");

    server.stop().await;
}

#[tokio::test]
async fn test_exec_after_syntax_error_discards() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    send(&mut client, &["MULTI"]).await;
    assert_err_contains(&send(&mut client, &["SET", "k"]).await, "wrong number of arguments");
    assert_eq!(send(&mut client, &["SET", "k", "v"]).await, reply::queued());
    assert_err_contains(
        &send(&mut client, &["EXEC"]).await,
        "EXECABORT Transaction discarded because of previous errors.",
    );
    assert_eq!(send(&mut client, &["EXISTS", "k"]).await, reply::integer(0));

    server.stop().await;
}

#[tokio::test]
async fn test_watch_abort_across_sessions() {
    let server = start_server(basic_config()).await;
    let mut watcher = server.connect().await;
    let mut writer = server.connect().await;

    send(&mut watcher, &["SET", "k", "1"]).await;
    assert_eq!(send(&mut watcher, &["WATCH", "k"]).await, reply::ok());
    send(&mut watcher, &["MULTI"]).await;
    assert_eq!(send(&mut watcher, &["INCR", "k"]).await, reply::queued());

    // concurrent write invalidates the watched version
    assert_eq!(send(&mut writer, &["SET", "k", "9"]).await, reply::ok());

    assert_eq!(send(&mut watcher, &["EXEC"]).await, reply::null_bulk());
    assert_bulk(&send(&mut watcher, &["GET", "k"]).await, "9");

    server.stop().await;
}

#[tokio::test]
async fn test_multi_commits_without_interference() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    send(&mut client, &["WATCH", "w"]).await;
    send(&mut client, &["MULTI"]).await;
    send(&mut client, &["SET", "x", "1"]).await;
    send(&mut client, &["INCR", "x"]).await;
    match send(&mut client, &["EXEC"]).await {
        RespValue::Array(items) => {
            assert_eq!(items.len(), 2);
            assert_eq!(items[1], reply::integer(2));
        }
        other => panic!("unexpected EXEC reply {other:?}"),
    }
    assert_bulk(&send(&mut client, &["GET", "x"]).await, "2");

    server.stop().await;
}

#[tokio::test]
async fn test_sorted_set_range_by_score() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    assert_eq!(
        send(&mut client, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]).await,
        reply::integer(4)
    );
    assert_eq!(
        send(&mut client, &["ZRANGEBYSCORE", "z", "(1", "3", "WITHSCORES"]).await,
        reply::multi_bulk(resp::cmdline(&["b", "2", "c", "3"]))
    );
    assert_eq!(
        send(&mut client, &["ZREMRANGEBYSCORE", "z", "2", "3"]).await,
        reply::integer(2)
    );
    assert_eq!(
        send(&mut client, &["ZRANGE", "z", "0", "-1"]).await,
        reply::multi_bulk(resp::cmdline(&["a", "d"]))
    );

    server.stop().await;
}

#[tokio::test]
async fn test_pubsub_delivery() {
    let server = start_server(basic_config()).await;
    let mut subscriber = server.connect().await;
    let mut publisher = server.connect().await;

    // the subscribe confirmation is the "reply" to SUBSCRIBE
    match send(&mut subscriber, &["SUBSCRIBE", "news"]).await {
        RespValue::Array(items) => {
            assert_eq!(items.len(), 3);
            assert_eq!(items[2], reply::integer(1));
        }
        other => panic!("unexpected subscribe reply {other:?}"),
    }

    assert_eq!(
        send(&mut publisher, &["PUBLISH", "news", "hello"]).await,
        reply::integer(1)
    );
    let pushed = subscriber.recv().await.expect("pushed message");
    assert_eq!(
        pushed,
        RespValue::Array(vec![
            reply::bulk(bytes::Bytes::from("message")),
            reply::bulk(bytes::Bytes::from("news")),
            reply::bulk(bytes::Bytes::from("hello")),
        ])
    );

    assert_eq!(
        send(&mut publisher, &["PUBSUB", "CHANNELS"]).await,
        reply::multi_bulk(resp::cmdline(&["news"]))
    );
    assert_eq!(
        send(&mut publisher, &["PUBSUB", "NUMSUB", "news", "ghost"]).await,
        reply::multi_bulk(resp::cmdline(&["news", "1", "ghost", "0"]))
    );

    server.stop().await;
}

#[tokio::test]
async fn test_auth_required() {
    let server = start_server(ServerConfig {
        password: "sesame".to_string(),
        ..ServerConfig::default()
    })
    .await;
    let mut client = server.connect().await;

    assert_err_contains(&send(&mut client, &["GET", "k"]).await, "NOAUTH");
    assert_err_contains(&send(&mut client, &["AUTH", "wrong"]).await, "invalid password");
    assert_err_contains(&send(&mut client, &["GET", "k"]).await, "NOAUTH");
    assert_eq!(send(&mut client, &["AUTH", "sesame"]).await, reply::ok());
    assert_eq!(send(&mut client, &["SET", "k", "v"]).await, reply::ok());

    server.stop().await;
}

#[tokio::test]
async fn test_select_isolates_databases() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    send(&mut client, &["SET", "k", "zero"]).await;
    assert_eq!(send(&mut client, &["SELECT", "1"]).await, reply::ok());
    assert_eq!(send(&mut client, &["GET", "k"]).await, reply::null_bulk());
    send(&mut client, &["SET", "k", "one"]).await;
    assert_eq!(send(&mut client, &["SELECT", "0"]).await, reply::ok());
    assert_bulk(&send(&mut client, &["GET", "k"]).await, "zero");
    assert_err_contains(
        &send(&mut client, &["SELECT", "99"]).await,
        "ERR DB index is out of range",
    );

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_command_and_arity() {
    let server = start_server(basic_config()).await;
    let mut client = server.connect().await;

    assert_err_contains(&send(&mut client, &["NOSUCHCMD", "x"]).await, "unknown command");
    assert_err_contains(
        &send(&mut client, &["GET", "a", "b"]).await,
        "wrong number of arguments",
    );

    server.stop().await;
}

//! Shared helpers: spin up real servers on ephemeral ports and talk to them
//! with the peer client.

use cluster::Client;
use engine::config::ServerConfig;
use resp::RespValue;
use rudis::node::Node;
use rudis::server::Server;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub struct TestServer {
    pub addr: String,
    shutdown: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<()>>,
}

/// Bind an ephemeral port, then start a node configured for it.
pub async fn start_server(config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    start_server_on(listener, config).await
}

/// Start a node on an already-bound listener (used by the cluster tests,
/// where peer addresses must be known before the nodes exist).
pub async fn start_server_on(listener: TcpListener, mut config: ServerConfig) -> TestServer {
    let addr = listener.local_addr().expect("local addr");
    config.bind = addr.ip().to_string();
    config.port = addr.port();

    let node = Node::new(config).await.expect("node start");
    let server = Server::new(node);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = shutdown_rx.await;
            })
            .await;
        let _ = done_tx.send(());
    });

    TestServer {
        addr: addr.to_string(),
        shutdown: Some(shutdown_tx),
        done: Some(done_rx),
    }
}

impl TestServer {
    pub async fn connect(&self) -> Client {
        Client::connect(&self.addr).await.expect("connect")
    }

    /// Graceful stop: waits until the node (and its AOF writer) finished
    /// closing.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(done) = self.done.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), done).await;
        }
    }
}

pub async fn send(client: &mut Client, parts: &[&str]) -> RespValue {
    client.send(&resp::cmdline(parts)).await.expect("request")
}

pub fn assert_bulk(value: &RespValue, expected: &str) {
    match value {
        RespValue::BulkString(Some(b)) => assert_eq!(&b[..], expected.as_bytes()),
        other => panic!("expected bulk '{expected}', got {other:?}"),
    }
}

pub fn assert_err_contains(value: &RespValue, needle: &str) {
    match value {
        RespValue::Error(msg) => {
            let text = String::from_utf8_lossy(msg);
            assert!(text.contains(needle), "error '{text}' missing '{needle}'");
        }
        other => panic!("expected error containing '{needle}', got {other:?}"),
    }
}

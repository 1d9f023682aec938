//! TCP front end: accept loop, per-connection handler tasks, idle-session
//! reaping and graceful shutdown.

use crate::node::Node;
use bytes::Bytes;
use engine::session::Session;
use parking_lot::Mutex;
use resp::{encode_to_vec, reply, AsyncRespParser, RespError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct Server {
    node: Arc<Node>,
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
}

impl Server {
    pub fn new(node: Arc<Node>) -> Arc<Server> {
        Arc::new(Server {
            node,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Accept connections until `shutdown` resolves, then close every
    /// session and the node.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "server listening");
        }
        if self.node.config.keepalive > 0 {
            tokio::spawn(reap_idle_sessions(
                self.clone(),
                Duration::from_secs(self.node.config.keepalive),
            ));
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "accepted connection");
                        let server = self.clone();
                        tokio::spawn(async move { server.handle_conn(stream).await });
                    }
                    Err(e) => error!("accept failed: {e}"),
                },
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        info!("server shutting down");
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        for session in sessions {
            session.close();
        }
        self.node.close().await;
    }

    async fn handle_conn(self: Arc<Self>, stream: TcpStream) {
        let (reader, mut writer) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let session = Session::new(out_tx);
        self.sessions.lock().insert(session.id(), session.clone());

        // writer task: drains the session's outbound queue; ends when the
        // last sender (the session) is dropped
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut parser = AsyncRespParser::new(reader);
        loop {
            if session.is_closed() {
                break;
            }
            tokio::select! {
                _ = session.closed_signal() => break,
                parsed = parser.parse() => match parsed {
                    Ok(frame) => {
                        let Some(cmdline) = frame.to_command() else {
                            // only multi-bulk command frames are accepted
                            let err = reply::err("ERR Protocol error: expected multi bulk command");
                            session.write(Bytes::from(encode_to_vec(&err)));
                            break;
                        };
                        session.touch();
                        if let Some(result) = self.node.handle(&session, &cmdline).await {
                            session.write(Bytes::from(encode_to_vec(&result)));
                        }
                    }
                    Err(RespError::UnexpectedEof) => break,
                    Err(e) => {
                        // malformed input closes the connection
                        let err = reply::err(format!("ERR Protocol error: {e}"));
                        session.write(Bytes::from(encode_to_vec(&err)));
                        break;
                    }
                },
            }
        }

        session.close();
        self.node.publish().drop_session(&session);
        self.sessions.lock().remove(&session.id());
        debug!(session = session.id(), "connection closed");
    }
}

/// Scan every keepalive/2 and close sessions idle past the keepalive.
async fn reap_idle_sessions(server: Arc<Server>, keepalive: Duration) {
    let mut ticker = tokio::time::interval(keepalive / 2);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let idle: Vec<Arc<Session>> = server
            .sessions
            .lock()
            .values()
            .filter(|s| s.idle_for() > keepalive)
            .cloned()
            .collect();
        for session in idle {
            warn!(session = session.id(), "closing idle connection");
            session.close();
        }
    }
}

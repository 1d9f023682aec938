//! Cluster router and peer-facing transaction verbs.

use crate::ids::SnowflakeGenerator;
use crate::peer::PeerGetter;
use crate::ring::{Ring, DEFAULT_REPLICAS};
use crate::tcc::{Coordinator, LocalTransaction, TxTable};
use bytes::Bytes;
use engine::config::ServerConfig;
use engine::db::Db;
use engine::session::Session;
use parking_lot::Mutex;
use resp::{reply, CmdLine, RespValue};
use std::collections::HashMap;
use std::sync::Arc;
use storage::TimeWheel;

pub struct Cluster {
    self_addr: String,
    ring: Ring,
    getters: HashMap<String, PeerGetter>,
    peers: Vec<String>,
    ids: SnowflakeGenerator,
    coordinators: Mutex<HashMap<String, Arc<Coordinator>>>,
    transactions: TxTable,
    wheel: TimeWheel,
}

impl Cluster {
    /// Build the ring and the per-peer connection pools. The local node gets
    /// a getter too, so TCC traffic uses one uniform path.
    pub fn new(config: &ServerConfig, wheel: TimeWheel) -> Cluster {
        let self_addr = config.self_addr.clone();
        let mut ring = Ring::new(DEFAULT_REPLICAS);
        ring.add_nodes(std::slice::from_ref(&self_addr));
        ring.add_nodes(&config.peers);

        let mut getters = HashMap::new();
        for addr in config.peers.iter().chain(std::iter::once(&self_addr)) {
            getters.insert(
                addr.clone(),
                PeerGetter::new(addr, config.databases, &config.password),
            );
        }

        Cluster {
            ids: SnowflakeGenerator::new(&self_addr),
            self_addr,
            ring,
            getters,
            peers: config.peers.clone(),
            coordinators: Mutex::new(HashMap::new()),
            transactions: Arc::new(Mutex::new(HashMap::new())),
            wheel,
        }
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn peer_addrs(&self) -> &[String] {
        &self.peers
    }

    /// The node owning `key`; unplaceable keys stay local.
    pub fn pick_node(&self, key: &[u8]) -> &str {
        self.ring.pick_node(key).unwrap_or(&self.self_addr)
    }

    /// Route a data command: locally when this node owns the key or the
    /// session is queueing a MULTI batch (execution is deferred to TCC),
    /// remotely otherwise.
    pub async fn exec(&self, session: &Session, db: &Arc<Db>, cmdline: &CmdLine) -> RespValue {
        if cmdline.len() <= 1 || session.in_multi() {
            return db.exec(session, cmdline).await;
        }
        let peer = self.pick_node(&cmdline[1]);
        if peer == self.self_addr {
            return db.exec(session, cmdline).await;
        }
        let peer = peer.to_string();
        self.exec_in_peer(&peer, session.db_index(), cmdline).await
    }

    pub async fn exec_in_peer(&self, peer: &str, db_index: usize, cmdline: &CmdLine) -> RespValue {
        match self.getters.get(peer) {
            Some(getter) => getter.remote_exec(db_index, cmdline).await,
            None => reply::err("ERR Cluster Peers error"),
        }
    }

    /* ---- client-facing transaction commands ---- */

    pub fn start_multi(&self, session: &Session) -> RespValue {
        if session.in_multi() {
            return reply::err("ERR MULTI calls can not be nested");
        }
        session.set_multi(true);
        let id = self.ids.next();
        let coordinator = Arc::new(Coordinator::new(id.clone(), session.db_index()));
        self.coordinators.lock().insert(id.clone(), coordinator);
        session.set_tx_id(Some(id));
        reply::ok()
    }

    pub async fn exec_multi(self: &Arc<Self>, session: &Session) -> RespValue {
        if !session.in_multi() {
            return reply::err("ERR EXEC without MULTI");
        }
        let cmdlines = session.queued_cmds();
        let watching = session.watching();
        let had_errors = session.has_syntax_errs();
        let tx_id = session.tx_id();
        session.set_multi(false);
        session.cancel_watching();
        session.set_tx_id(None);

        let coordinator = tx_id.and_then(|id| self.coordinators.lock().remove(&id));
        if had_errors {
            return reply::err("EXECABORT Transaction discarded because of previous errors.");
        }
        let Some(coordinator) = coordinator else {
            return reply::err("ERR EXEC without MULTI");
        };
        coordinator.exec_tx(self, cmdlines, watching).await
    }

    pub fn discard_multi(&self, session: &Session) -> RespValue {
        if !session.in_multi() {
            return reply::err("ERR DISCARD without MULTI");
        }
        if let Some(id) = session.tx_id() {
            self.coordinators.lock().remove(&id);
        }
        session.set_multi(false);
        session.cancel_watching();
        session.set_tx_id(None);
        reply::ok()
    }

    /// WATCH in cluster mode: fetch each key's version from its owning node
    /// and capture it on the session.
    pub async fn watch(&self, session: &Session, db: &Arc<Db>, args: &[Bytes]) -> RespValue {
        if session.in_multi() {
            return reply::err("ERR WATCH inside MULTI is not allowed");
        }
        if args.is_empty() {
            return reply::arg_num("watch");
        }
        for key in args {
            let cmdline = vec![Bytes::from_static(b"KEYVERSION"), key.clone()];
            match self.exec(session, db, &cmdline).await {
                RespValue::Integer(version) => session.watch(key.clone(), version as u32),
                error if error.is_error() => return error,
                _ => return reply::err("ERR Cluster Peers error"),
            }
        }
        reply::ok()
    }

    pub fn unwatch(&self, session: &Session) -> RespValue {
        if session.in_multi() {
            return reply::err("ERR UNWATCH inside MULTI is not allowed");
        }
        session.cancel_watching();
        reply::ok()
    }

    /* ---- peer-internal verbs ---- */

    /// `TRY <txid> start | watched <key> <version> | end | <cmd…>`
    pub async fn try_cmd(&self, db: &Arc<Db>, args: &[Bytes]) -> RespValue {
        if args.len() < 2 {
            return reply::arg_num("try");
        }
        let id = String::from_utf8_lossy(&args[0]).to_string();
        let sub = args[1].to_ascii_lowercase();
        match sub.as_slice() {
            b"start" => {
                let tx = LocalTransaction::new(id.clone(), db.clone());
                self.transactions.lock().insert(id, tx);
                reply::ok()
            }
            b"end" => match self.transaction(&id) {
                Some(tx) => tx.try_end(&self.wheel, self.transactions.clone()).await,
                None => reply::err("ERR TRY END WITHOUT TRY START"),
            },
            b"watched" => {
                if args.len() != 4 {
                    return reply::arg_num("try");
                }
                match self.transaction(&id) {
                    Some(tx) => tx.save_watched(args[2].clone(), &args[3]).await,
                    None => reply::err("ERR TRY WATCHED WITHOUT TRY START"),
                }
            }
            _ => match self.transaction(&id) {
                Some(tx) => tx.add_cmdline(args[1..].to_vec()).await,
                None => reply::err("ERR TRY COMMAND WITHOUT TRY START"),
            },
        }
    }

    pub async fn commit_cmd(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return reply::arg_num("commit");
        }
        let id = String::from_utf8_lossy(&args[0]).to_string();
        match self.transaction(&id) {
            Some(tx) => tx.commit().await,
            None => reply::err("ERR COMMIT WITHOUT TRY"),
        }
    }

    pub async fn cancel_cmd(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return reply::arg_num("cancel");
        }
        let id = String::from_utf8_lossy(&args[0]).to_string();
        match self.transaction(&id) {
            Some(tx) => tx.cancel().await,
            None => reply::err("ERR CANCEL WITHOUT TRY"),
        }
    }

    pub async fn end_cmd(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return reply::arg_num("end");
        }
        let id = String::from_utf8_lossy(&args[0]).to_string();
        let Some(tx) = self.transaction(&id) else {
            return reply::err("ERR END WITHOUT TRY");
        };
        let result = tx.end(&self.wheel).await;
        self.transactions.lock().remove(&id);
        result
    }

    fn transaction(&self, id: &str) -> Option<Arc<LocalTransaction>> {
        self.transactions.lock().get(id).cloned()
    }

    pub async fn close(&self) {
        for getter in self.getters.values() {
            getter.close().await;
        }
    }
}

//! System commands: authentication, database selection, rewrite controls,
//! client transactions and pub/sub routing (standalone and cluster
//! fan-out).

use crate::node::Node;
use bytes::Bytes;
use cluster::Cluster;
use engine::session::Session;
use resp::{reply, RespValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

impl Node {
    pub(crate) fn auth(&self, session: &Session, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return reply::arg_num("auth");
        }
        if self.config.password.is_empty() {
            return reply::err("ERR Client sent AUTH, but no password is set");
        }
        let password = String::from_utf8_lossy(&args[0]).to_string();
        session.set_password(password.clone());
        if password != self.config.password {
            return reply::err("ERR invalid password");
        }
        reply::ok()
    }

    pub(crate) fn is_authenticated(&self, session: &Session) -> bool {
        self.config.password.is_empty() || session.password() == self.config.password
    }

    pub(crate) fn select(&self, session: &Session, args: &[Bytes]) -> RespValue {
        if session.in_multi() {
            let err = reply::err("ERR cannot select database within multi");
            session.enqueue_syntax_err(err.clone());
            return err;
        }
        if session.watching_count() > 0 {
            return reply::err("ERR cannot select database when watching");
        }
        if args.len() != 1 {
            return reply::arg_num("select");
        }
        let Some(index) = std::str::from_utf8(&args[0])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        else {
            return reply::not_integer();
        };
        if index >= self.dbs.len() {
            return reply::db_index_out_of_range();
        }
        session.select(index);
        reply::ok()
    }

    /* ---- AOF rewrite controls ---- */

    pub(crate) fn bgrewriteaof(&self) -> RespValue {
        let persister = self.persister.read().clone();
        let Some(persister) = persister else {
            return reply::err("ERR append only is disabled");
        };
        if persister.is_rewriting() {
            return reply::status("Background append only file rewriting doing");
        }
        tokio::spawn(async move {
            if let Err(e) = persister.rewrite().await {
                warn!("background aof rewrite failed: {e}");
            }
        });
        reply::status("Background append only file rewriting started")
    }

    pub(crate) async fn rewriteaof(&self) -> RespValue {
        let persister = self.persister.read().clone();
        let Some(persister) = persister else {
            return reply::err("ERR append only is disabled");
        };
        match persister.rewrite().await {
            Ok(()) => reply::ok(),
            Err(e) => reply::err(format!("ERR {e}")),
        }
    }

    /* ---- MULTI / EXEC / WATCH (standalone) ---- */

    pub(crate) fn start_multi(&self, session: &Session, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return reply::arg_num("multi");
        }
        if session.in_multi() {
            return reply::err("ERR MULTI calls can not be nested");
        }
        session.set_multi(true);
        reply::ok()
    }

    pub(crate) async fn exec_multi_standalone(
        &self,
        session: &Session,
        args: &[Bytes],
    ) -> RespValue {
        if !args.is_empty() {
            return reply::arg_num("exec");
        }
        if !session.in_multi() {
            return reply::err("ERR EXEC without MULTI");
        }
        if session.has_syntax_errs() {
            session.set_multi(false);
            session.cancel_watching();
            return reply::err("EXECABORT Transaction discarded because of previous errors.");
        }
        let result = match self.db_for(session) {
            Ok(db) => db.exec_multi(session).await,
            Err(e) => e,
        };
        session.set_multi(false);
        session.cancel_watching();
        result
    }

    pub(crate) fn discard_multi(&self, session: &Session, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return reply::arg_num("discard");
        }
        if !session.in_multi() {
            return reply::err("ERR DISCARD without MULTI");
        }
        session.set_multi(false);
        session.cancel_watching();
        reply::ok()
    }

    pub(crate) fn watch_standalone(&self, session: &Session, args: &[Bytes]) -> RespValue {
        if session.in_multi() {
            return reply::err("ERR WATCH inside MULTI is not allowed");
        }
        if args.is_empty() {
            return reply::arg_num("watch");
        }
        let db = match self.db_for(session) {
            Ok(db) => db,
            Err(e) => return e,
        };
        for key in args {
            session.watch(key.clone(), db.version(key));
        }
        reply::ok()
    }

    pub(crate) fn unwatch(&self, session: &Session, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return reply::arg_num("unwatch");
        }
        if session.in_multi() {
            return reply::err("ERR UNWATCH inside MULTI is not allowed");
        }
        session.cancel_watching();
        reply::ok()
    }

    /* ---- pub/sub ---- */

    pub(crate) fn subscribe(&self, session: &Arc<Session>, args: &[Bytes]) -> Option<RespValue> {
        if args.is_empty() {
            return Some(reply::arg_num("subscribe"));
        }
        let names: Vec<String> = args
            .iter()
            .map(|a| String::from_utf8_lossy(a).to_string())
            .collect();
        self.publish.subscribe(session, &names);
        None
    }

    pub(crate) fn unsubscribe(&self, session: &Arc<Session>, args: &[Bytes]) -> Option<RespValue> {
        let names: Vec<String> = if args.is_empty() {
            session.subscriptions()
        } else {
            args.iter()
                .map(|a| String::from_utf8_lossy(a).to_string())
                .collect()
        };
        self.publish.unsubscribe(session, &names);
        None
    }

    pub(crate) async fn publish_local(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 2 {
            return reply::arg_num("publish");
        }
        let name = String::from_utf8_lossy(&args[0]).to_string();
        let delivered = self.publish.publish(&name, args[1].clone()).await;
        reply::integer(delivered as i64)
    }

    pub(crate) fn pubsub_local(&self, args: &[Bytes]) -> RespValue {
        if args.is_empty() {
            return reply::arg_num("pubsub");
        }
        let sub = args[0].to_ascii_lowercase();
        match sub.as_slice() {
            b"channels" => {
                if args.len() != 1 {
                    return reply::arg_num("pubsub channels");
                }
                let channels = self
                    .publish
                    .active_channels()
                    .into_iter()
                    .map(Bytes::from)
                    .collect();
                reply::multi_bulk(channels)
            }
            b"numsub" => {
                let names: Vec<String> = args[1..]
                    .iter()
                    .map(|a| String::from_utf8_lossy(a).to_string())
                    .collect();
                let pairs = self.publish.subscriber_counts(&names);
                flatten_counts(pairs)
            }
            other => reply::err(format!(
                "ERR Unknown PUBSUB subcommand or wrong number of arguments for '{}'",
                String::from_utf8_lossy(other)
            )),
        }
    }

    /// Cluster PUBLISH: deliver locally, then fan `SINGLEPUBLISH` out to
    /// every peer and sum the subscriber counts.
    pub(crate) async fn publish_cluster(
        &self,
        cluster_router: &Arc<Cluster>,
        args: &[Bytes],
    ) -> RespValue {
        if args.len() != 2 {
            return reply::arg_num("publish");
        }
        let name = String::from_utf8_lossy(&args[0]).to_string();
        let mut delivered = self.publish.publish(&name, args[1].clone()).await as i64;

        let mut fanout = resp::cmdline(&["SINGLEPUBLISH"]);
        fanout.extend(args.iter().cloned());
        for peer in cluster_router.peer_addrs() {
            match cluster_router.exec_in_peer(peer, 0, &fanout).await {
                RespValue::Integer(n) => delivered += n,
                other => warn!(peer = %peer, "singlepublish failed: {other:?}"),
            }
        }
        reply::integer(delivered)
    }

    /// Cluster PUBSUB: merge local results with every peer's
    /// `SINGLEPUBSUB`: channel lists deduplicate, subscriber counts sum.
    pub(crate) async fn pubsub_cluster(
        &self,
        cluster_router: &Arc<Cluster>,
        args: &[Bytes],
    ) -> RespValue {
        if args.is_empty() {
            return reply::arg_num("pubsub");
        }
        let sub = args[0].to_ascii_lowercase();
        let mut fanout = resp::cmdline(&["SINGLEPUBSUB"]);
        fanout.extend(args.iter().cloned());

        match sub.as_slice() {
            b"channels" => {
                if args.len() != 1 {
                    return reply::arg_num("pubsub channels");
                }
                let mut seen: HashSet<String> =
                    self.publish.active_channels().into_iter().collect();
                for peer in cluster_router.peer_addrs() {
                    if let RespValue::Array(items) =
                        cluster_router.exec_in_peer(peer, 0, &fanout).await
                    {
                        for item in items {
                            if let RespValue::BulkString(Some(name)) = item {
                                seen.insert(String::from_utf8_lossy(&name).to_string());
                            }
                        }
                    }
                }
                reply::multi_bulk(seen.into_iter().map(Bytes::from).collect())
            }
            b"numsub" => {
                let names: Vec<String> = args[1..]
                    .iter()
                    .map(|a| String::from_utf8_lossy(a).to_string())
                    .collect();
                let mut counts: HashMap<String, usize> =
                    self.publish.subscriber_counts(&names).into_iter().collect();
                for peer in cluster_router.peer_addrs() {
                    if let RespValue::Array(items) =
                        cluster_router.exec_in_peer(peer, 0, &fanout).await
                    {
                        for pair in items.chunks(2) {
                            let [RespValue::BulkString(Some(name)), RespValue::BulkString(Some(num))] =
                                pair
                            else {
                                continue;
                            };
                            let Ok(n) = String::from_utf8_lossy(num).parse::<usize>() else {
                                continue;
                            };
                            *counts
                                .entry(String::from_utf8_lossy(name).to_string())
                                .or_insert(0) += n;
                        }
                    }
                }
                flatten_counts(counts)
            }
            other => reply::err(format!(
                "ERR Unknown PUBSUB subcommand or wrong number of arguments for '{}'",
                String::from_utf8_lossy(other)
            )),
        }
    }
}

fn flatten_counts(counts: impl IntoIterator<Item = (String, usize)>) -> RespValue {
    let mut out = Vec::new();
    for (name, count) in counts {
        out.push(Bytes::from(name));
        out.push(Bytes::from(count.to_string()));
    }
    reply::multi_bulk(out)
}

//! The coordinator side of a TCC transaction.
//!
//! Partitions the queued batch by consistent hash of each command's first
//! key, drives try → commit/cancel → end against every involved peer, and
//! recombines per-peer replies back into the batch's original order.

use crate::cluster::Cluster;
use bytes::Bytes;
use resp::{reply, CmdLine, RespValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct Coordinator {
    id: String,
    db_index: usize,
}

impl Coordinator {
    pub fn new(id: String, db_index: usize) -> Coordinator {
        Coordinator { id, db_index }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drive the whole distributed transaction. A failure anywhere in the
    /// try phase aborts: cancel is broadcast best-effort and the client sees
    /// a nil bulk, exactly like a failed WATCH.
    pub async fn exec_tx(
        &self,
        cluster: &Arc<Cluster>,
        cmdlines: Vec<CmdLine>,
        watching: HashMap<Bytes, u32>,
    ) -> RespValue {
        // group the batch by owning peer, remembering original positions
        let mut groups: HashMap<String, Vec<CmdLine>> = HashMap::new();
        let mut index_map: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, line) in cmdlines.iter().enumerate() {
            let peer = if line.len() > 1 {
                cluster.pick_node(&line[1]).to_string()
            } else {
                cluster.self_addr().to_string()
            };
            groups.entry(peer.clone()).or_default().push(line.clone());
            index_map.entry(peer).or_default().push(i);
        }

        // watched keys group the same way; a peer that only watches still
        // participates so its versions get verified under lock
        let mut watch_groups: HashMap<String, Vec<(Bytes, u32)>> = HashMap::new();
        for (key, version) in watching {
            let peer = cluster.pick_node(&key).to_string();
            watch_groups.entry(peer.clone()).or_default().push((key, version));
            groups.entry(peer).or_default();
        }

        let mut need_cancel = false;
        for (peer, lines) in &groups {
            let watched = watch_groups.get(peer).map(|v| v.as_slice()).unwrap_or(&[]);
            let result = self.send_try(cluster, peer, lines, watched).await;
            if result.is_error() {
                warn!(tx = %self.id, peer = %peer, "try phase failed, aborting");
                need_cancel = true;
                break;
            }
        }

        if need_cancel {
            for peer in groups.keys() {
                let _ = cluster
                    .exec_in_peer(peer, self.db_index, &cmd(&["cancel", &self.id]))
                    .await;
                let _ = cluster
                    .exec_in_peer(peer, self.db_index, &cmd(&["end", &self.id]))
                    .await;
            }
            return reply::null_bulk();
        }

        // commit every involved peer in parallel
        let mut handles = Vec::with_capacity(groups.len());
        for peer in groups.keys().cloned() {
            let cluster = cluster.clone();
            let id = self.id.clone();
            let db_index = self.db_index;
            handles.push((
                peer.clone(),
                tokio::spawn(async move {
                    cluster
                        .exec_in_peer(&peer, db_index, &cmd(&["commit", &id]))
                        .await
                }),
            ));
        }

        let mut replies = HashMap::new();
        let mut commit_error = None;
        for (peer, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|_| reply::err("ERR commit task failed"));
            if result.is_error() && commit_error.is_none() {
                commit_error = Some(result.clone());
            }
            replies.insert(peer, result);
        }

        for peer in groups.keys() {
            let _ = cluster
                .exec_in_peer(peer, self.db_index, &cmd(&["end", &self.id]))
                .await;
        }

        // a commit-phase failure may leave the batch partially applied on
        // other peers; surface the error instead of a partial result
        if let Some(err) = commit_error {
            return err;
        }

        self.recombine(cmdlines.len(), replies, &index_map)
    }

    async fn send_try(
        &self,
        cluster: &Arc<Cluster>,
        peer: &str,
        lines: &[CmdLine],
        watched: &[(Bytes, u32)],
    ) -> RespValue {
        let start = cmd(&["try", &self.id, "start"]);
        let result = cluster.exec_in_peer(peer, self.db_index, &start).await;
        if result.is_error() {
            return result;
        }

        for (key, version) in watched {
            let mut line = cmd(&["try", &self.id, "watched"]);
            line.push(key.clone());
            line.push(Bytes::from(version.to_string()));
            let result = cluster.exec_in_peer(peer, self.db_index, &line).await;
            if result.is_error() {
                return result;
            }
        }

        for body in lines {
            let mut line = cmd(&["try", &self.id]);
            line.extend(body.iter().cloned());
            let result = cluster.exec_in_peer(peer, self.db_index, &line).await;
            if result.is_error() {
                return result;
            }
        }

        let end = cmd(&["try", &self.id, "end"]);
        cluster.exec_in_peer(peer, self.db_index, &end).await
    }

    /// Merge per-peer multi-bulk commit replies back into original batch
    /// order.
    fn recombine(
        &self,
        total: usize,
        replies: HashMap<String, RespValue>,
        index_map: &HashMap<String, Vec<usize>>,
    ) -> RespValue {
        let mut combined = vec![RespValue::Null; total];
        for (peer, result) in replies {
            let Some(indices) = index_map.get(&peer) else {
                continue;
            };
            if let RespValue::Array(items) = result {
                for (j, item) in items.into_iter().enumerate() {
                    if let Some(&original) = indices.get(j) {
                        combined[original] = item;
                    }
                }
            }
        }
        RespValue::Array(combined)
    }
}

fn cmd(parts: &[&str]) -> CmdLine {
    resp::cmdline(parts)
}

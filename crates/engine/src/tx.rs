//! MULTI batch execution: one lock acquisition for the whole batch, WATCH
//! version verification, and optional undo-log rollback.

use crate::db::Db;
use crate::entity;
use crate::registry::{self, Flag};
use crate::session::Session;
use bytes::Bytes;
use resp::{reply, CmdLine, RespValue};
use std::collections::HashMap;

impl Db {
    /// Execute the session's queued batch. Syntax was validated while
    /// queueing.
    pub async fn exec_multi(&self, session: &Session) -> RespValue {
        let cmdlines = session.queued_cmds();
        let watching = session.watching();
        self.exec_multi_lines(&cmdlines, &watching).await
    }

    /// Execute a batch against this database under one lock set.
    ///
    /// The lock set is the union of every queued command's write/read keys
    /// plus the watched keys (as readers). If any watched key's version
    /// moved, nothing executes and the reply is a nil bulk.
    pub async fn exec_multi_lines(
        &self,
        cmdlines: &[CmdLine],
        watching: &HashMap<Bytes, u32>,
    ) -> RespValue {
        let mut write_keys = Vec::new();
        let mut read_keys = Vec::new();
        for line in cmdlines {
            let (w, r) = registry::write_read_keys(line);
            write_keys.extend(w);
            read_keys.extend(r);
        }
        read_keys.extend(watching.keys().cloned());

        let _guard = self.locks.lock(&write_keys, &read_keys).await;

        if self.versions_changed(watching) {
            return reply::null_bulk();
        }

        let mut results = Vec::with_capacity(cmdlines.len());
        let mut undo_logs: Vec<Vec<CmdLine>> = Vec::new();
        let mut aborted = false;
        for line in cmdlines {
            let name = String::from_utf8_lossy(&line[0]).to_ascii_lowercase();
            let Some(cmd) = registry::lookup(&name) else {
                continue;
            };

            if self.atomic_tx && cmd.flag == Flag::Write {
                undo_logs.push(self.undo_log(&line[1]));
            }

            let (result, aof_ctx) = (cmd.execute)(self, &line[1..]);
            if self.atomic_tx && result.is_error() {
                // the failed command mutated nothing; its own undo entry
                // must not replay
                if cmd.flag == Flag::Write {
                    undo_logs.pop();
                }
                aborted = true;
                break;
            }
            self.after_exec(aof_ctx, line).await;
            results.push(result);
        }

        if aborted {
            for log in undo_logs.iter().rev() {
                for line in log {
                    self.exec_with_lock(line).await;
                }
            }
            return reply::err(
                "EXECABORT Transaction rollback because of errors during executing. (atomic tx is open)",
            );
        }

        if results.is_empty() {
            return reply::empty_multi_bulk();
        }
        self.bump_versions(&write_keys);
        RespValue::Array(results)
    }

    pub fn versions_changed(&self, watching: &HashMap<Bytes, u32>) -> bool {
        watching
            .iter()
            .any(|(key, version)| self.version(key) != *version)
    }

    /// Command lines that restore `key` to its current state: delete the new
    /// value, re-create the old one, re-apply its TTL.
    pub fn undo_log(&self, key: &Bytes) -> Vec<CmdLine> {
        let del = vec![Bytes::from_static(b"DEL"), key.clone()];
        let mut log = vec![del];
        let restore = self.with_entity(key, |e| entity::entity_to_cmdline(key, e));
        if let Some(restore) = restore {
            log.push(restore);
            if let Some(at) = self.ttl_of(key) {
                log.push(entity::expire_to_cmdline(key, at));
            }
        }
        log
    }
}

//! The participant side of a TCC transaction.
//!
//! Lifecycle: `try <id> start` creates it, queued `try <id> <cmd>` lines
//! accumulate commands and their key sets, `try <id> end` takes the union
//! lock set and arms the abort timer, then exactly one of `commit`/`cancel`
//! runs, and `end` tears it down. The per-transaction mutex makes commit and
//! cancel mutually exclusive; the abort timer only fires while the phase is
//! still Try.

use bytes::Bytes;
use engine::db::Db;
use engine::registry;
use parking_lot::Mutex;
use resp::{reply, CmdLine, RespValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storage::{LockSet, TimeWheel};
use tracing::info;

/// Try-phase locks auto-cancel after this long without a commit/cancel.
pub const MAX_LOCK_TIME: Duration = Duration::from_secs(5);

/// The per-node table of in-flight transactions, shared with the timing
/// wheel's abort jobs.
pub type TxTable = Arc<Mutex<HashMap<String, Arc<LocalTransaction>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Create,
    Try,
    Commit,
    Cancel,
}

struct TxInner {
    phase: Phase,
    write_keys: Vec<Bytes>,
    read_keys: Vec<Bytes>,
    watched: HashMap<Bytes, u32>,
    cmdlines: Vec<CmdLine>,
    undo_logs: Vec<Vec<CmdLine>>,
    /// keys written successfully during commit; their versions bump at end
    written: Vec<Bytes>,
    locks: Option<LockSet>,
}

pub struct LocalTransaction {
    id: String,
    db: Arc<Db>,
    inner: tokio::sync::Mutex<TxInner>,
}

impl LocalTransaction {
    pub fn new(id: String, db: Arc<Db>) -> Arc<LocalTransaction> {
        Arc::new(LocalTransaction {
            id,
            db,
            inner: tokio::sync::Mutex::new(TxInner {
                phase: Phase::Create,
                write_keys: Vec::new(),
                read_keys: Vec::new(),
                watched: HashMap::new(),
                cmdlines: Vec::new(),
                undo_logs: Vec::new(),
                written: Vec::new(),
                locks: None,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `try <id> <cmd…>`: record one command and its key sets.
    pub async fn add_cmdline(&self, cmdline: CmdLine) -> RespValue {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Create && inner.phase != Phase::Try {
            return reply::err("ERR TRY ERROR");
        }
        if let Some(err) = registry::check_syntax(&cmdline) {
            return err;
        }
        inner.phase = Phase::Try;

        let (write, read) = registry::write_read_keys(&cmdline);
        inner.write_keys.extend(write);
        inner.read_keys.extend(read);
        inner.cmdlines.push(cmdline);
        reply::ok()
    }

    /// `try <id> watched <key> <version>`: record a watched key's captured
    /// version; it joins the read lock set and is re-verified at try end.
    pub async fn save_watched(&self, key: Bytes, version_raw: &[u8]) -> RespValue {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Create && inner.phase != Phase::Try {
            return reply::err("ERR TRY ERROR");
        }
        inner.phase = Phase::Try;

        let Some(version) = std::str::from_utf8(version_raw)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return reply::err("ERR TRY WATCHED VERSION MUST BE NUMBER");
        };
        inner.watched.insert(key.clone(), version);
        inner.read_keys.push(key);
        reply::ok()
    }

    /// `try <id> end`: take the union lock set, arm the abort timer and
    /// re-verify watched versions under the locks.
    pub async fn try_end(self: &Arc<Self>, wheel: &TimeWheel, table: TxTable) -> RespValue {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Try {
            return reply::err("ERR TRY ERROR");
        }

        let locks = self.db.locks.lock(&inner.write_keys, &inner.read_keys).await;
        inner.locks = Some(locks);

        let tx = self.clone();
        wheel.delay(MAX_LOCK_TIME, self.id.clone(), async move {
            tx.auto_cancel(table).await;
        });

        for (key, version) in &inner.watched {
            if self.db.version(key) != *version {
                return reply::err("ERR VERSION CHANGED");
            }
        }
        reply::ok()
    }

    /// Abort timer body: roll back only if nobody committed/cancelled yet.
    async fn auto_cancel(self: Arc<Self>, table: TxTable) {
        {
            let inner = self.inner.lock().await;
            if inner.phase != Phase::Try {
                return;
            }
        }
        info!(tx = %self.id, "transaction try phase timed out, cancelling");
        self.cancel().await;
        table.lock().remove(&self.id);
    }

    /// `commit <id>`: replay recorded commands under the held locks and
    /// return the multi-bulk of their replies. With atomic-tx on, a failing
    /// command rolls the batch back and the reply is the abort error.
    pub async fn commit(&self) -> RespValue {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Try || inner.locks.is_none() {
            return reply::err("ERR COMMIT ERROR");
        }

        let atomic = self.db.atomic_tx();
        let cmdlines = inner.cmdlines.clone();
        let mut results = Vec::with_capacity(cmdlines.len());
        let mut aborted = false;
        for cmdline in &cmdlines {
            let name = String::from_utf8_lossy(&cmdline[0]).to_ascii_lowercase();
            let write = !registry::is_read_only(&name);
            let undo_recorded = atomic && write && cmdline.len() > 1;
            if undo_recorded {
                inner.undo_logs.push(self.db.undo_log(&cmdline[1]));
            }
            let result = self.db.exec_with_lock(cmdline).await;
            if atomic && result.is_error() {
                if undo_recorded {
                    inner.undo_logs.pop();
                }
                aborted = true;
                break;
            }
            if write && !result.is_error() && cmdline.len() > 1 {
                inner.written.push(cmdline[1].clone());
            }
            results.push(result);
        }

        if aborted {
            let undo: Vec<Vec<CmdLine>> = inner.undo_logs.drain(..).collect();
            for log in undo.iter().rev() {
                for line in log {
                    self.db.exec_with_lock(line).await;
                }
            }
            inner.written.clear();
            inner.locks = None;
            inner.phase = Phase::Cancel;
            return reply::err(
                "EXECABORT Transaction rollback because of errors during executing. (atomic tx is open)",
            );
        }

        inner.phase = Phase::Commit;
        RespValue::Array(results)
    }

    /// `cancel <id>`: replay undo entries in reverse and release the locks.
    pub async fn cancel(&self) -> RespValue {
        let mut inner = self.inner.lock().await;
        if inner.phase == Phase::Commit {
            return reply::err("ERR CANCEL AFTER COMMIT");
        }
        let undo: Vec<Vec<CmdLine>> = inner.undo_logs.drain(..).collect();
        for log in undo.iter().rev() {
            for line in log {
                self.db.exec_with_lock(line).await;
            }
        }
        inner.written.clear();
        inner.locks = None;
        inner.phase = Phase::Cancel;
        reply::ok()
    }

    /// `end <id>`: cancel the abort timer, bump versions for committed
    /// writes, release the locks and let the caller discard the object.
    pub async fn end(&self, wheel: &TimeWheel) -> RespValue {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Commit => {
                let written = std::mem::take(&mut inner.written);
                self.db.bump_versions(&written);
            }
            Phase::Cancel => {}
            _ => return reply::err("ERR END WITHOUT COMMIT OR CANCEL"),
        }
        inner.locks = None;
        wheel.cancel(&self.id);
        reply::ok()
    }
}

//! One logical database: data map + TTL map + version map + stripe locks,
//! and the locked command-execution paths over them.

use crate::aof::Persister;
use crate::entity::{self, DataEntity};
use crate::registry::{self, AofCtx, Flag};
use crate::session::Session;
use bytes::Bytes;
use resp::{reply, CmdLine, RespValue};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use storage::{ConcurrentDict, LockMap, TimeWheel};

const DATA_SHARDS: usize = 1 << 16;
const TTL_SHARDS: usize = 1 << 10;
const LOCK_STRIPES: usize = 1024;

/// Tick interval and slot count shared by every wheel the server starts.
pub const WHEEL_INTERVAL: Duration = Duration::from_secs(1);
pub const WHEEL_SLOTS: usize = 3600;

pub struct Db {
    pub(crate) me: Weak<Db>,
    index: usize,
    pub(crate) data: ConcurrentDict<DataEntity>,
    pub(crate) ttl: ConcurrentDict<SystemTime>,
    versions: ConcurrentDict<u32>,
    pub locks: LockMap,
    pub(crate) wheel: TimeWheel,
    pub(crate) atomic_tx: bool,
    aof: parking_lot::RwLock<Option<Arc<Persister>>>,
}

impl Db {
    /// A full-size database.
    pub fn new(index: usize, wheel: TimeWheel, atomic_tx: bool) -> Arc<Db> {
        Self::with_shards(index, wheel, atomic_tx, DATA_SHARDS, TTL_SHARDS, LOCK_STRIPES)
    }

    /// A small database for auxiliary engines (AOF rewrite replay).
    pub fn new_basic(index: usize, wheel: TimeWheel) -> Arc<Db> {
        Self::with_shards(index, wheel, false, 16, 16, 16)
    }

    #[cfg(test)]
    pub(crate) fn new_basic_atomic(index: usize, wheel: TimeWheel) -> Arc<Db> {
        Self::with_shards(index, wheel, true, 16, 16, 16)
    }

    fn with_shards(
        index: usize,
        wheel: TimeWheel,
        atomic_tx: bool,
        data_shards: usize,
        ttl_shards: usize,
        lock_stripes: usize,
    ) -> Arc<Db> {
        Arc::new_cyclic(|me| Db {
            me: me.clone(),
            index,
            data: ConcurrentDict::with_shards(data_shards),
            ttl: ConcurrentDict::with_shards(ttl_shards),
            versions: ConcurrentDict::with_shards(data_shards),
            locks: LockMap::new(lock_stripes),
            wheel,
            atomic_tx,
            aof: parking_lot::RwLock::new(None),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether undo-log rollback is enabled for batches against this
    /// database.
    pub fn atomic_tx(&self) -> bool {
        self.atomic_tx
    }

    pub fn bind_aof(&self, persister: Arc<Persister>) {
        *self.aof.write() = Some(persister);
    }

    /// The single entry point for a command against this database.
    ///
    /// Inside MULTI, well-formed commands are queued (`QUEUED`) and syntax
    /// errors are recorded for the later `EXEC` abort; otherwise the command
    /// dispatches immediately.
    pub async fn exec(&self, session: &Session, cmdline: &CmdLine) -> RespValue {
        if session.in_multi() {
            if let Some(err) = registry::check_syntax(cmdline) {
                session.enqueue_syntax_err(err.clone());
                return err;
            }
            session.enqueue_cmd(cmdline.clone());
            return reply::queued();
        }
        self.exec_normal(cmdline).await
    }

    async fn exec_normal(&self, cmdline: &CmdLine) -> RespValue {
        if let Some(err) = registry::check_syntax(cmdline) {
            return err;
        }
        let name = String::from_utf8_lossy(&cmdline[0]).to_ascii_lowercase();
        let Some(cmd) = registry::lookup(&name) else {
            return reply::unknown_command(&name);
        };

        let (write_keys, read_keys) = (cmd.keys)(&cmdline[1..]);
        let _guard = self.locks.lock(&write_keys, &read_keys).await;
        let (result, aof_ctx) = (cmd.execute)(self, &cmdline[1..]);
        self.after_exec(aof_ctx, cmdline).await;
        if cmd.flag == Flag::Write && !result.is_error() {
            self.bump_versions(&write_keys);
        }
        result
    }

    /// Dispatch without acquiring stripe locks; the caller already holds
    /// them. Used by TCC commit and by undo-log replay. Does not bump
    /// versions.
    pub async fn exec_with_lock(&self, cmdline: &CmdLine) -> RespValue {
        if let Some(err) = registry::check_syntax(cmdline) {
            return err;
        }
        let name = String::from_utf8_lossy(&cmdline[0]).to_ascii_lowercase();
        let Some(cmd) = registry::lookup(&name) else {
            return reply::unknown_command(&name);
        };
        let (result, aof_ctx) = (cmd.execute)(self, &cmdline[1..]);
        self.after_exec(aof_ctx, cmdline).await;
        result
    }

    /// Persistence follow-up: append the command (and a derived `PEXPIREAT`
    /// when the executor set a TTL) to the AOF.
    pub(crate) async fn after_exec(&self, aof_ctx: Option<AofCtx>, cmdline: &CmdLine) {
        let Some(ctx) = aof_ctx else { return };
        if !ctx.need_aof {
            return;
        }
        let persister = self.aof.read().clone();
        let Some(persister) = persister else { return };
        persister.save(self.index, cmdline.clone()).await;
        if let Some(at) = ctx.expire_at {
            let key = &cmdline[1];
            persister.save(self.index, entity::expire_to_cmdline(key, at)).await;
        }
    }

    /* ---- data access ---- */

    /// Read access to the entity under `key`, with lazy TTL eviction.
    pub fn with_entity<R>(&self, key: &[u8], f: impl FnOnce(&DataEntity) -> R) -> Option<R> {
        if self.is_expired(key) {
            return None;
        }
        self.data.read(key, f)
    }

    /// Write access to the entity under `key`, with lazy TTL eviction.
    pub fn with_entity_mut<R>(&self, key: &[u8], f: impl FnOnce(&mut DataEntity) -> R) -> Option<R> {
        if self.is_expired(key) {
            return None;
        }
        self.data.write(key, f)
    }

    /// Write access, creating the entity with `init` when absent.
    pub fn entry<R>(
        &self,
        key: Bytes,
        init: impl FnOnce() -> DataEntity,
        f: impl FnOnce(&mut DataEntity) -> R,
    ) -> R {
        self.is_expired(&key);
        self.data.entry(key, init, f)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        !self.is_expired(key) && self.data.contains_key(key)
    }

    pub fn put_entity(&self, key: Bytes, entity: DataEntity) -> usize {
        self.data.put(key, entity)
    }

    pub fn put_if_absent(&self, key: Bytes, entity: DataEntity) -> usize {
        self.is_expired(&key);
        self.data.put_if_absent(key, entity)
    }

    pub fn put_if_exists(&self, key: Bytes, entity: DataEntity) -> usize {
        if self.is_expired(&key) {
            return 0;
        }
        self.data.put_if_exists(key, entity)
    }

    /// Remove the key, its TTL entry and any pending expiration task.
    pub fn remove_key(&self, key: &[u8]) {
        self.data.remove(key);
        self.ttl.remove(key);
        self.wheel.cancel(&crate::ttl::expire_task_key(key));
    }

    pub fn remove_keys(&self, keys: &[Bytes]) -> usize {
        let mut deleted = 0;
        for key in keys {
            if self.data.contains_key(key) {
                self.remove_key(key);
                deleted += 1;
            }
        }
        deleted
    }

    /* ---- versions ---- */

    /// Current version of `key`; missing keys are version 0.
    pub fn version(&self, key: &[u8]) -> u32 {
        self.versions.get(key).unwrap_or(0)
    }

    pub fn bump_version(&self, key: &Bytes) {
        self.versions.entry(key.clone(), || 0, |v| *v = v.wrapping_add(1));
    }

    pub fn bump_versions(&self, keys: &[Bytes]) {
        for key in keys {
            self.bump_version(key);
        }
    }

    /* ---- iteration / maintenance ---- */

    /// Visit every live entry with its optional expiration instant.
    pub fn for_each(&self, mut f: impl FnMut(&Bytes, &DataEntity, Option<SystemTime>) -> bool) {
        self.data.for_each(|key, entity| {
            let expiration = self.ttl.get(key);
            f(key, entity, expiration)
        });
    }

    /// Drop all data and TTLs of this database.
    pub fn flush(&self) {
        self.data.clear();
        self.ttl.clear();
    }

    /// (key count, ttl count)
    pub fn sizes(&self) -> (usize, usize) {
        (self.data.len(), self.ttl.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Arc<Db> {
        Db::new_basic(0, TimeWheel::start(WHEEL_INTERVAL, 8))
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_exec_set_get() {
        let db = test_db();
        let session = Session::fake();
        let r = db.exec(&session, &resp::cmdline(&["SET", "k", "v"])).await;
        assert_eq!(r, reply::ok());
        let r = db.exec(&session, &resp::cmdline(&["GET", "k"])).await;
        assert_eq!(r, reply::bulk(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_exec_queues_inside_multi() {
        let db = test_db();
        let session = Session::fake();
        session.set_multi(true);
        let r = db.exec(&session, &resp::cmdline(&["SET", "k", "v"])).await;
        assert_eq!(r, reply::queued());
        assert_eq!(session.queued_cmds().len(), 1);
        // nothing executed yet
        assert!(!db.contains_key(b"k"));
        // syntax errors are recorded, not queued
        let r = db.exec(&session, &resp::cmdline(&["SET", "k"])).await;
        assert!(r.is_error());
        assert!(session.has_syntax_errs());
        assert_eq!(session.queued_cmds().len(), 1);
    }

    #[tokio::test]
    async fn test_versions_bump_on_successful_write_only() {
        let db = test_db();
        let session = Session::fake();
        assert_eq!(db.version(b"k"), 0);
        db.exec(&session, &resp::cmdline(&["SET", "k", "v"])).await;
        assert_eq!(db.version(b"k"), 1);
        db.exec(&session, &resp::cmdline(&["GET", "k"])).await;
        assert_eq!(db.version(b"k"), 1);
        // failed write does not bump
        let r = db.exec(&session, &resp::cmdline(&["LPUSH", "k", "x"])).await;
        assert!(r.is_error());
        assert_eq!(db.version(b"k"), 1);
        db.exec(&session, &resp::cmdline(&["APPEND", "k", "w"])).await;
        assert_eq!(db.version(b"k"), 2);
    }

    #[tokio::test]
    async fn test_remove_key_clears_ttl() {
        let db = test_db();
        db.put_entity(b("k"), DataEntity::String(b("v")));
        db.expire_at(b("k"), SystemTime::now() + Duration::from_secs(60));
        assert!(db.ttl_of(b"k").is_some());
        db.remove_key(b"k");
        assert!(db.ttl_of(b"k").is_none());
        assert!(!db.contains_key(b"k"));
    }

    #[tokio::test]
    async fn test_lazy_expiration() {
        let db = test_db();
        db.put_entity(b("k"), DataEntity::String(b("v")));
        db.expire_at(b("k"), SystemTime::now() - Duration::from_millis(10));
        // logically absent and physically evicted on first touch
        assert!(!db.contains_key(b"k"));
        assert_eq!(db.sizes().0, 0);
    }
}

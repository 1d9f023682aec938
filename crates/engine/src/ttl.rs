//! TTL operations: the TTL map is authoritative, the timing wheel provides
//! timely physical removal, and reads evict lazily.

use crate::db::Db;
use bytes::Bytes;
use std::time::SystemTime;
use tracing::debug;

pub(crate) fn expire_task_key(key: &[u8]) -> String {
    format!("expire:{}", String::from_utf8_lossy(key))
}

impl Db {
    /// Record an absolute expiration for `key` and schedule the wheel task.
    ///
    /// The callback re-checks the TTL map under the key's stripe lock: the
    /// entry may have been replaced or removed since this task was queued,
    /// in which case the newer task owns the key.
    pub fn expire_at(&self, key: Bytes, at: SystemTime) {
        self.ttl.put(key.clone(), at);
        let task_key = expire_task_key(&key);
        let me = self.me.clone();
        self.wheel.at(at, task_key, async move {
            let Some(db) = me.upgrade() else { return };
            let _guard = db.locks.lock_key(&key, true).await;
            let Some(deadline) = db.ttl.get(&key) else { return };
            if SystemTime::now() >= deadline {
                debug!(key = %String::from_utf8_lossy(&key), "expired");
                db.remove_key(&key);
            }
        });
    }

    /// Drop the TTL of `key` and cancel its pending wheel task. Returns true
    /// when a TTL existed.
    pub fn persist(&self, key: &[u8]) -> bool {
        let had = self.ttl.remove(key).is_some();
        if had {
            self.wheel.cancel(&expire_task_key(key));
        }
        had
    }

    /// True when `key` carries a TTL in the past; evicts it as a side
    /// effect.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        let Some(at) = self.ttl.get(key) else {
            return false;
        };
        let expired = SystemTime::now() >= at;
        if expired {
            self.remove_key(key);
        }
        expired
    }

    pub fn ttl_of(&self, key: &[u8]) -> Option<SystemTime> {
        self.ttl.get(key)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Db, WHEEL_INTERVAL};
    use crate::entity::DataEntity;
    use bytes::Bytes;
    use std::time::{Duration, SystemTime};
    use storage::TimeWheel;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_persist_cancels_expiration() {
        let db = Db::new_basic(0, TimeWheel::start(WHEEL_INTERVAL, 8));
        db.put_entity(b("k"), DataEntity::String(b("v")));
        db.expire_at(b("k"), SystemTime::now() + Duration::from_secs(300));
        assert!(db.persist(b"k"));
        assert!(!db.persist(b"k"));
        assert!(db.ttl_of(b"k").is_none());
        assert!(db.contains_key(b"k"));
    }

    #[tokio::test]
    async fn test_replacing_ttl_uses_latest_instant() {
        let db = Db::new_basic(0, TimeWheel::start(WHEEL_INTERVAL, 8));
        db.put_entity(b("k"), DataEntity::String(b("v")));
        db.expire_at(b("k"), SystemTime::now() - Duration::from_secs(1));
        db.expire_at(b("k"), SystemTime::now() + Duration::from_secs(300));
        // the newer, future instant is authoritative
        assert!(db.contains_key(b"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wheel_removes_physically() {
        let db = Db::new_basic(0, TimeWheel::start(WHEEL_INTERVAL, 8));
        db.put_entity(b("k"), DataEntity::String(b("v")));
        db.expire_at(b("k"), SystemTime::now() - Duration::from_millis(10));
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        // removed by the wheel task without any read touching the key
        assert_eq!(db.sizes().0, 0);
    }
}

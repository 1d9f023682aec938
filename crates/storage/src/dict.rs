//! Sharded concurrent dictionary.
//!
//! Keys are routed to one of a power-of-two number of shards by FNV-1a; each
//! shard is an independent `HashMap` behind its own reader/writer lock, so
//! operations on different shards never contend. The length is tracked
//! atomically so `len` does not touch any shard.

use crate::fnv32;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct ConcurrentDict<V> {
    shards: Vec<RwLock<HashMap<Bytes, V>>>,
    mask: u32,
    len: AtomicUsize,
}

impl<V> ConcurrentDict<V> {
    /// Create a dict with at least `shards` shards, rounded up to a power of
    /// two (minimum 16).
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(16).next_power_of_two();
        let shards = (0..count).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            shards,
            mask: (count - 1) as u32,
            len: AtomicUsize::new(0),
        }
    }

    fn shard(&self, key: &[u8]) -> &RwLock<HashMap<Bytes, V>> {
        &self.shards[(fnv32(key) & self.mask) as usize]
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Run `f` against the value under the shard's read lock.
    ///
    /// The closure must not reenter this dict; the shard lock is held for its
    /// duration.
    pub fn read<R>(&self, key: &[u8], f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(f)
    }

    /// Run `f` against the value under the shard's write lock.
    pub fn write<R>(&self, key: &[u8], f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard(key).write().get_mut(key).map(f)
    }

    /// Run `f` against the value, inserting `init()` first if the key is
    /// absent.
    pub fn entry<R>(&self, key: Bytes, init: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        let mut shard = self.shard(&key).write();
        let value = shard.entry(key).or_insert_with(|| {
            self.len.fetch_add(1, Ordering::Relaxed);
            init()
        });
        f(value)
    }

    /// Insert or replace. Returns 1 if the key was newly inserted.
    pub fn put(&self, key: Bytes, value: V) -> usize {
        let old = self.shard(&key).write().insert(key, value);
        if old.is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
            1
        } else {
            0
        }
    }

    /// Insert only when absent. Returns 1 on insert, 0 otherwise.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> usize {
        let mut shard = self.shard(&key).write();
        if shard.contains_key(&key) {
            0
        } else {
            shard.insert(key, value);
            self.len.fetch_add(1, Ordering::Relaxed);
            1
        }
    }

    /// Replace only when present. Returns 1 on replace, 0 otherwise.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> usize {
        let mut shard = self.shard(&key).write();
        match shard.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let removed = self.shard(key).write().remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Visit every entry; stop early when `f` returns false.
    ///
    /// Shards are visited in a fixed order, each under its read lock for the
    /// duration of that shard's scan only, so the traversal is a per-shard
    /// snapshot rather than a global one. `f` must not reenter this dict.
    pub fn for_each(&self, mut f: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let guard = shard.read();
            for (k, v) in guard.iter() {
                if !f(k, v) {
                    return;
                }
            }
        }
    }

    pub fn keys(&self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|k, _| {
            out.push(k.clone());
            true
        });
        out
    }

    /// Sample `limit` keys, possibly with repetition.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(limit);
        while out.len() < limit {
            if self.len() == 0 {
                break;
            }
            // draw the nth live key; shards may shift underneath, so a draw
            // can come up empty and is simply retried
            let mut remaining = rng.gen_range(0..self.len());
            let mut picked = None;
            for shard in &self.shards {
                let guard = shard.read();
                if remaining < guard.len() {
                    picked = guard.keys().nth(remaining).cloned();
                    break;
                }
                remaining -= guard.len();
            }
            match picked {
                Some(k) => out.push(k),
                None => continue,
            }
        }
        out
    }

    /// Sample up to `limit` distinct keys.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..self.shards.len());
        let mut out = Vec::with_capacity(limit);
        for offset in 0..self.shards.len() {
            if out.len() >= limit {
                break;
            }
            let shard = &self.shards[(start + offset) % self.shards.len()];
            let guard = shard.read();
            for k in guard.keys() {
                if out.len() >= limit {
                    break;
                }
                out.push(k.clone());
            }
        }
        out
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut guard = shard.write();
            let removed = guard.len();
            guard.clear();
            self.len.fetch_sub(removed, Ordering::Relaxed);
        }
    }
}

impl<V: Clone> ConcurrentDict<V> {
    /// Clone the value out. Meant for small values (instants, counters).
    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }
}

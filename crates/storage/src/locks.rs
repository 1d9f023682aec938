//! Striped per-key reader/writer lock manager.
//!
//! A fixed array of async rwlocks indexed by `fnv32(key) % stripes`. Two
//! distinct keys may share a stripe, so multi-key acquisition computes the
//! *set* of stripe indices and takes them in ascending order; release happens
//! in descending order when the returned [`LockSet`] drops. A stripe named by
//! both the write and read sets is taken as a writer. This ordering is the
//! sole deadlock-avoidance mechanism; every caller must go through
//! [`LockMap::lock`].
//!
//! The guards are owned (`Arc`-backed) so a [`LockSet`] can be held across
//! await points and stored inside long-lived transaction state.

use crate::fnv32;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

pub struct LockMap {
    stripes: Vec<Arc<RwLock<()>>>,
}

enum StripeGuard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// The held stripes of one multi-key acquisition.
pub struct LockSet {
    guards: Vec<StripeGuard>,
}

impl Drop for LockSet {
    fn drop(&mut self) {
        // Guards were pushed in ascending stripe order; popping releases
        // them descending.
        while self.guards.pop().is_some() {}
    }
}

impl LockMap {
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1))
            .map(|_| Arc::new(RwLock::new(())))
            .collect();
        Self { stripes }
    }

    fn index(&self, key: &[u8]) -> usize {
        (fnv32(key) as usize) % self.stripes.len()
    }

    /// Acquire the union of stripes covering `write_keys` and `read_keys`.
    pub async fn lock(&self, write_keys: &[Bytes], read_keys: &[Bytes]) -> LockSet {
        // index -> needs write
        let mut wanted: BTreeMap<usize, bool> = BTreeMap::new();
        for key in read_keys {
            wanted.entry(self.index(key)).or_insert(false);
        }
        for key in write_keys {
            *wanted.entry(self.index(key)).or_insert(true) = true;
        }

        let mut guards = Vec::with_capacity(wanted.len());
        for (index, write) in wanted {
            let stripe = self.stripes[index].clone();
            if write {
                guards.push(StripeGuard::Write(stripe.write_owned().await));
            } else {
                guards.push(StripeGuard::Read(stripe.read_owned().await));
            }
        }
        LockSet { guards }
    }

    /// Convenience single-key acquisition.
    pub async fn lock_key(&self, key: &Bytes, write: bool) -> LockSet {
        if write {
            self.lock(std::slice::from_ref(key), &[]).await
        } else {
            self.lock(&[], std::slice::from_ref(key)).await
        }
    }
}

//! Set container: a thin wrapper over the sharded dict with unit values.

use crate::dict::ConcurrentDict;
use bytes::Bytes;

const SET_SHARDS: usize = 16;

pub struct Set {
    members: ConcurrentDict<()>,
}

impl Set {
    pub fn new() -> Self {
        Self {
            members: ConcurrentDict::with_shards(SET_SHARDS),
        }
    }

    /// Returns 1 when the member was newly added.
    pub fn add(&self, member: Bytes) -> usize {
        self.members.put_if_absent(member, ())
    }

    /// Returns 1 when the member was present.
    pub fn remove(&self, member: &[u8]) -> usize {
        usize::from(self.members.remove(member).is_some())
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains_key(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> Vec<Bytes> {
        self.members.keys()
    }

    pub fn random_members(&self, limit: usize) -> Vec<Bytes> {
        self.members.random_keys(limit)
    }

    pub fn random_distinct_members(&self, limit: usize) -> Vec<Bytes> {
        self.members.random_distinct_keys(limit)
    }
}

impl Default for Set {
    fn default() -> Self {
        Self::new()
    }
}

//! The tagged value entity stored under each key, and its re-serialization
//! into write commands for the append-only file and undo logs.

use bytes::Bytes;
use resp::CmdLine;
use std::time::{SystemTime, UNIX_EPOCH};
use storage::{QuickList, Set, SortedSet};

pub struct Hash {
    fields: storage::ConcurrentDict<Bytes>,
}

impl Hash {
    pub fn new() -> Self {
        Self {
            fields: storage::ConcurrentDict::with_shards(16),
        }
    }

    pub fn get(&self, field: &[u8]) -> Option<Bytes> {
        self.fields.get(field)
    }

    /// Returns 1 when the field was newly created.
    pub fn set(&self, field: Bytes, value: Bytes) -> usize {
        self.fields.put(field, value)
    }

    pub fn set_if_absent(&self, field: Bytes, value: Bytes) -> usize {
        self.fields.put_if_absent(field, value)
    }

    pub fn remove(&self, field: &[u8]) -> usize {
        usize::from(self.fields.remove(field).is_some())
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn for_each(&self, f: impl FnMut(&Bytes, &Bytes) -> bool) {
        self.fields.for_each(f)
    }

    pub fn fields(&self) -> Vec<Bytes> {
        self.fields.keys()
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::new()
    }
}

/// One stored value. Owned by exactly one database and key.
pub enum DataEntity {
    String(Bytes),
    List(QuickList),
    Hash(Hash),
    Set(Set),
    SortedSet(SortedSet),
}

impl DataEntity {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::String(_) => "string",
            DataEntity::List(_) => "list",
            DataEntity::Hash(_) => "hash",
            DataEntity::Set(_) => "set",
            DataEntity::SortedSet(_) => "zset",
        }
    }

    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            DataEntity::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&QuickList> {
        match self {
            DataEntity::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut QuickList> {
        match self {
            DataEntity::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&Hash> {
        match self {
            DataEntity::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Set> {
        match self {
            DataEntity::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_zset(&self) -> Option<&SortedSet> {
        match self {
            DataEntity::SortedSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_zset_mut(&mut self) -> Option<&mut SortedSet> {
        match self {
            DataEntity::SortedSet(z) => Some(z),
            _ => None,
        }
    }
}

fn arg(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Render a score the way replies do: integral scores without a fraction.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

/// Re-serialize an entity as the single write command that rebuilds it.
pub fn entity_to_cmdline(key: &[u8], entity: &DataEntity) -> CmdLine {
    let key = Bytes::copy_from_slice(key);
    match entity {
        DataEntity::String(value) => vec![arg("SET"), key, value.clone()],
        DataEntity::List(list) => {
            let mut cmd = Vec::with_capacity(2 + list.len());
            cmd.push(arg("RPUSH"));
            cmd.push(key);
            cmd.extend(list.iter().cloned());
            cmd
        }
        DataEntity::Hash(hash) => {
            let mut cmd = Vec::with_capacity(2 + hash.len() * 2);
            cmd.push(arg("HSET"));
            cmd.push(key);
            hash.for_each(|field, value| {
                cmd.push(field.clone());
                cmd.push(value.clone());
                true
            });
            cmd
        }
        DataEntity::Set(set) => {
            let mut cmd = Vec::with_capacity(2 + set.len());
            cmd.push(arg("SADD"));
            cmd.push(key);
            cmd.extend(set.members());
            cmd
        }
        DataEntity::SortedSet(zset) => {
            let mut cmd = Vec::with_capacity(2 + zset.len() * 2);
            cmd.push(arg("ZADD"));
            cmd.push(key);
            for (member, score) in zset.range_by_rank(0, zset.len().saturating_sub(1)) {
                cmd.push(Bytes::from(format_score(score)));
                cmd.push(member);
            }
            cmd
        }
    }
}

/// `PEXPIREAT key <unix-ms>` for an absolute expiration instant.
pub fn expire_to_cmdline(key: &[u8], at: SystemTime) -> CmdLine {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    vec![
        arg("PEXPIREAT"),
        Bytes::copy_from_slice(key),
        Bytes::from(millis.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_string_to_cmdline() {
        let entity = DataEntity::String(Bytes::from("v"));
        let cmd = entity_to_cmdline(b"k", &entity);
        assert_eq!(cmd, resp::cmdline(&["SET", "k", "v"]));
    }

    #[test]
    fn test_list_to_cmdline_preserves_order() {
        let mut list = QuickList::new();
        for v in ["x", "y", "z"] {
            list.push_back(Bytes::copy_from_slice(v.as_bytes()));
        }
        let cmd = entity_to_cmdline(b"L", &DataEntity::List(list));
        assert_eq!(cmd, resp::cmdline(&["RPUSH", "L", "x", "y", "z"]));
    }

    #[test]
    fn test_zset_to_cmdline_scores_first() {
        let mut z = SortedSet::new();
        z.add(Bytes::from("m"), 1.5);
        let cmd = entity_to_cmdline(b"z", &DataEntity::SortedSet(z));
        assert_eq!(cmd, resp::cmdline(&["ZADD", "z", "1.5", "m"]));
    }

    #[test]
    fn test_expire_to_cmdline() {
        let at = UNIX_EPOCH + Duration::from_millis(1234567);
        let cmd = expire_to_cmdline(b"k", at);
        assert_eq!(cmd, resp::cmdline(&["PEXPIREAT", "k", "1234567"]));
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(3.0), "3");
        assert_eq!(format_score(-2.0), "-2");
        assert_eq!(format_score(1.5), "1.5");
    }
}

//! CRC32 consistent-hash ring with virtual nodes.

use std::collections::HashMap;

pub const DEFAULT_REPLICAS: usize = 16;

pub struct Ring {
    replicas: usize,
    keys: Vec<u32>,
    nodes: HashMap<u32, String>,
}

impl Ring {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            keys: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert `replicas` virtual nodes per name; empty names are skipped.
    pub fn add_nodes(&mut self, names: &[String]) {
        for name in names {
            if name.is_empty() {
                continue;
            }
            for i in 0..self.replicas {
                let hash = crc32fast::hash(format!("{name}-{i}").as_bytes());
                self.keys.push(hash);
                self.nodes.insert(hash, name.clone());
            }
        }
        self.keys.sort_unstable();
        self.keys.dedup();
    }

    /// The node owning `key`: the first ring hash clockwise from
    /// `crc32(key)`, wrapping.
    pub fn pick_node(&self, key: &[u8]) -> Option<&str> {
        if self.is_empty() {
            return None;
        }
        let hash = crc32fast::hash(key);
        let index = self.keys.partition_point(|&k| k < hash);
        let slot = self.keys[index % self.keys.len()];
        self.nodes.get(&slot).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(names: &[&str]) -> Ring {
        let mut r = Ring::new(DEFAULT_REPLICAS);
        r.add_nodes(&names.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        r
    }

    #[test]
    fn test_empty_ring() {
        let r = Ring::new(DEFAULT_REPLICAS);
        assert!(r.pick_node(b"k").is_none());
    }

    #[test]
    fn test_pick_is_stable() {
        let r = ring(&["a:1", "b:1", "c:1"]);
        let first = r.pick_node(b"some-key").unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(r.pick_node(b"some-key").unwrap(), first);
        }
    }

    #[test]
    fn test_all_nodes_receive_keys() {
        let r = ring(&["a:1", "b:1", "c:1"]);
        let mut seen = std::collections::HashSet::new();
        for i in 0..500 {
            let key = format!("key-{i}");
            seen.insert(r.pick_node(key.as_bytes()).unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_adding_node_moves_few_keys() {
        let before = ring(&["a:1", "b:1"]);
        let after = ring(&["a:1", "b:1", "c:1"]);
        let mut moved = 0;
        for i in 0..1000 {
            let key = format!("key-{i}");
            let b = before.pick_node(key.as_bytes()).unwrap();
            let a = after.pick_node(key.as_bytes()).unwrap();
            if a != b {
                moved += 1;
                assert_eq!(a, "c:1", "keys may only move to the new node");
            }
        }
        assert!(moved < 700, "consistent hashing moved {moved}/1000 keys");
    }
}

//! Snowflake-style distributed transaction ids.
//!
//! 64-bit layout: 41 bits of milliseconds since a fixed epoch, 10 bits of
//! node id (derived from the node's advertised address), 12 bits of
//! per-millisecond sequence.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2020-01-01T00:00:00Z
const EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u64 = 10;
const SEQ_BITS: u64 = 12;

pub struct SnowflakeGenerator {
    node: u64,
    state: Mutex<(u64, u64)>, // (last ms, sequence)
}

impl SnowflakeGenerator {
    pub fn new(node_tag: &str) -> Self {
        Self {
            node: (crc32fast::hash(node_tag.as_bytes()) as u64) & ((1 << NODE_BITS) - 1),
            state: Mutex::new((0, 0)),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(EPOCH_MS)
    }

    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = Self::now_ms();
        if now < state.0 {
            // clock went backwards; stay on the last stamp
            now = state.0;
        }
        if now == state.0 {
            state.1 = (state.1 + 1) & ((1 << SEQ_BITS) - 1);
            if state.1 == 0 {
                // sequence exhausted inside one millisecond
                while now <= state.0 {
                    now = Self::now_ms();
                }
            }
        } else {
            state.1 = 0;
        }
        state.0 = now;
        (now << (NODE_BITS + SEQ_BITS)) | (self.node << SEQ_BITS) | state.1
    }

    /// Decimal rendering used as the wire-visible transaction id.
    pub fn next(&self) -> String {
        self.next_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let generator = SnowflakeGenerator::new("127.0.0.1:6179");
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(seen.insert(id), "duplicate id");
            assert!(id >= last);
            last = id;
        }
    }

    #[test]
    fn test_node_tag_differentiates() {
        let a = SnowflakeGenerator::new("10.0.0.1:7000");
        let b = SnowflakeGenerator::new("10.0.0.2:7000");
        assert_ne!(a.node, b.node);
    }
}

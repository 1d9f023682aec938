//! Sorted set: skiplist ordered by (score, member) plus a member → score
//! dict.
//!
//! The skiplist is arena-backed (nodes live in a `Vec`, links are indices,
//! index 0 is the head sentinel) and each forward link carries a span, the
//! number of level-0 steps it crosses, which is what makes rank queries
//! O(log N).

use bytes::Bytes;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;

const MAX_LEVEL: usize = 16;
/// Head sentinel index; doubles as the nil link since the head can never be
/// a successor.
const NIL: usize = 0;

/// An inclusive/exclusive/infinite score range border.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// Parse a border argument: `5`, `(5`, `+inf`, `-inf`.
    pub fn parse(raw: &[u8]) -> Option<ScoreBound> {
        let s = std::str::from_utf8(raw).ok()?;
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "+inf" | "inf" => return Some(ScoreBound::PosInf),
            "-inf" => return Some(ScoreBound::NegInf),
            _ => {}
        }
        let (exclusive, digits) = match lower.strip_prefix('(') {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };
        let value: f64 = digits.parse().ok()?;
        if value.is_nan() {
            return None;
        }
        Some(if exclusive {
            ScoreBound::Exclusive(value)
        } else {
            ScoreBound::Inclusive(value)
        })
    }

    /// Does `score` satisfy this border when used as a lower bound?
    fn allows_from_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(v) => score >= v,
            ScoreBound::Exclusive(v) => score > v,
        }
    }

    /// Does `score` satisfy this border when used as an upper bound?
    fn allows_from_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(v) => score <= v,
            ScoreBound::Exclusive(v) => score < v,
        }
    }
}

struct Node {
    member: Bytes,
    score: f64,
    next: Vec<usize>,
    span: Vec<usize>,
}

struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    level: usize,
    len: usize,
}

fn key_cmp(a_score: f64, a_member: &[u8], b_score: f64, b_member: &[u8]) -> Ordering {
    a_score.total_cmp(&b_score).then_with(|| a_member.cmp(b_member))
}

impl SkipList {
    fn new() -> Self {
        let head = Node {
            member: Bytes::new(),
            score: 0.0,
            next: vec![NIL; MAX_LEVEL],
            span: vec![0; MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            level: 1,
            len: 0,
        }
    }

    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen_ratio(1, 4) {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, member: Bytes, score: f64, level: usize) -> usize {
        let node = Node {
            member,
            score,
            next: vec![NIL; level],
            span: vec![0; level],
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn insert(&mut self, member: Bytes, score: f64) {
        let mut update = [NIL; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = NIL;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let nxt = self.nodes[x].next[i];
                if nxt == NIL {
                    break;
                }
                let n = &self.nodes[nxt];
                if key_cmp(n.score, &n.member, score, &member) == Ordering::Less {
                    rank[i] += self.nodes[x].span[i];
                    x = nxt;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let level = Self::random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = NIL;
                self.nodes[NIL].span[i] = self.len;
            }
            self.level = level;
        }

        let idx = self.alloc(member, score, level);
        for i in 0..level {
            let prev = update[i];
            let prev_next = self.nodes[prev].next[i];
            let prev_span = self.nodes[prev].span[i];
            self.nodes[idx].next[i] = prev_next;
            self.nodes[prev].next[i] = idx;
            self.nodes[idx].span[i] = prev_span - (rank[0] - rank[i]);
            self.nodes[prev].span[i] = (rank[0] - rank[i]) + 1;
        }
        for i in level..self.level {
            self.nodes[update[i]].span[i] += 1;
        }
        self.len += 1;
    }

    fn remove(&mut self, member: &[u8], score: f64) -> bool {
        let mut update = [NIL; MAX_LEVEL];
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let nxt = self.nodes[x].next[i];
                if nxt == NIL {
                    break;
                }
                let n = &self.nodes[nxt];
                if key_cmp(n.score, &n.member, score, member) == Ordering::Less {
                    x = nxt;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let target = self.nodes[x].next[0];
        if target == NIL {
            return false;
        }
        {
            let n = &self.nodes[target];
            if key_cmp(n.score, &n.member, score, member) != Ordering::Equal {
                return false;
            }
        }

        for i in 0..self.level {
            let prev = update[i];
            if self.nodes[prev].next[i] == target {
                let target_span = self.nodes[target].span.get(i).copied().unwrap_or(0);
                let target_next = self.nodes[target].next.get(i).copied().unwrap_or(NIL);
                self.nodes[prev].span[i] += target_span;
                self.nodes[prev].span[i] -= 1;
                self.nodes[prev].next[i] = target_next;
            } else {
                self.nodes[prev].span[i] -= 1;
            }
        }
        while self.level > 1 && self.nodes[NIL].next[self.level - 1] == NIL {
            self.level -= 1;
        }
        self.free.push(target);
        self.len -= 1;
        true
    }

    /// 0-based rank of (member, score).
    fn rank(&self, member: &[u8], score: f64) -> Option<usize> {
        let mut rank = 0usize;
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let nxt = self.nodes[x].next[i];
                if nxt == NIL {
                    break;
                }
                let n = &self.nodes[nxt];
                if key_cmp(n.score, &n.member, score, member) != Ordering::Greater {
                    rank += self.nodes[x].span[i];
                    x = nxt;
                } else {
                    break;
                }
            }
            if x != NIL && self.nodes[x].member == member {
                return Some(rank - 1);
            }
        }
        None
    }

    /// Node index at 0-based rank.
    fn node_at_rank(&self, rank: usize) -> Option<usize> {
        if rank >= self.len {
            return None;
        }
        let wanted = rank + 1;
        let mut traversed = 0usize;
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let nxt = self.nodes[x].next[i];
                if nxt == NIL || traversed + self.nodes[x].span[i] > wanted {
                    break;
                }
                traversed += self.nodes[x].span[i];
                x = nxt;
            }
            if traversed == wanted {
                return Some(x);
            }
        }
        None
    }

    /// First node whose score satisfies the lower bound.
    fn first_in_score_range(&self, min: ScoreBound) -> usize {
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let nxt = self.nodes[x].next[i];
                if nxt == NIL || min.allows_from_below(self.nodes[nxt].score) {
                    break;
                }
                x = nxt;
            }
        }
        self.nodes[x].next[0]
    }
}

pub struct SortedSet {
    dict: HashMap<Bytes, f64>,
    list: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self {
            dict: HashMap::new(),
            list: SkipList::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Add or update. Returns true when the member is new.
    pub fn add(&mut self, member: Bytes, score: f64) -> bool {
        match self.dict.get(&member).copied() {
            Some(old) => {
                if old.total_cmp(&score) != Ordering::Equal {
                    self.list.remove(&member, old);
                    self.list.insert(member.clone(), score);
                    self.dict.insert(member, score);
                }
                false
            }
            None => {
                self.list.insert(member.clone(), score);
                self.dict.insert(member, score);
                true
            }
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.dict.get(member).copied()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.dict.contains_key(member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.dict.remove(member) {
            Some(score) => {
                self.list.remove(member, score);
                true
            }
            None => false,
        }
    }

    /// 0-based ascending rank.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        self.list.rank(member, score)
    }

    /// 0-based descending rank.
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|r| self.len() - 1 - r)
    }

    /// Elements with ranks in `[start, stop]` (0-based, already normalized;
    /// stop is clamped).
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(Bytes, f64)> {
        if self.len() == 0 || start >= self.len() || start > stop {
            return Vec::new();
        }
        let stop = stop.min(self.len() - 1);
        let mut out = Vec::with_capacity(stop - start + 1);
        let Some(mut idx) = self.list.node_at_rank(start) else {
            return out;
        };
        for _ in start..=stop {
            if idx == NIL {
                break;
            }
            let node = &self.list.nodes[idx];
            out.push((node.member.clone(), node.score));
            idx = node.next[0];
        }
        out
    }

    /// Ascending elements whose score lies between the two borders.
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound) -> Vec<(Bytes, f64)> {
        let mut out = Vec::new();
        let mut idx = self.list.first_in_score_range(min);
        while idx != NIL {
            let node = &self.list.nodes[idx];
            if !max.allows_from_above(node.score) {
                break;
            }
            out.push((node.member.clone(), node.score));
            idx = node.next[0];
        }
        out
    }

    pub fn count(&self, min: ScoreBound, max: ScoreBound) -> usize {
        let mut count = 0;
        let mut idx = self.list.first_in_score_range(min);
        while idx != NIL {
            let node = &self.list.nodes[idx];
            if !max.allows_from_above(node.score) {
                break;
            }
            count += 1;
            idx = node.next[0];
        }
        count
    }

    pub fn remove_range_by_rank(&mut self, start: usize, stop: usize) -> usize {
        let doomed: Vec<Bytes> = self
            .range_by_rank(start, stop)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    pub fn remove_range_by_score(&mut self, min: ScoreBound, max: ScoreBound) -> usize {
        let doomed: Vec<Bytes> = self
            .range_by_score(min, max)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }
}

impl Default for SortedSet {
    fn default() -> Self {
        Self::new()
    }
}

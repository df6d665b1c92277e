//! Gen/kill dataflow domains over bit vectors.
//!
//! A gen/kill domain tracks one bit per fact. Transfers "gen" some facts
//! and "kill" others; the join is set union for *maybe* analyses and set
//! intersection for *must* analyses.

use std::fmt::Write as _;

use super::{AbstractDomain, ReachableKind};

/// Join behaviour of a gen/kill analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenKillKind {
    /// Union join: a fact holds if it may hold on some path.
    Maybe,
    /// Intersection join: a fact holds only if it holds on every path.
    Must,
}

/// A fixed-size bit vector over `u64` words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { words: vec![0; len.div_ceil(64)], len }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len, "bit index {idx} out of range {}", self.len);
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len, "bit index {idx} out of range {}", self.len);
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    #[inline]
    pub fn clear(&mut self, idx: usize) {
        debug_assert!(idx < self.len, "bit index {idx} out of range {}", self.len);
        self.words[idx / 64] &= !(1 << (idx % 64));
    }

    /// Sets every bit.
    pub fn set_all(&mut self) {
        for w in &mut self.words {
            *w = u64::MAX;
        }
        self.trim_tail();
    }

    /// `self |= other`; returns whether any bit changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.len, other.len);
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let next = *a | b;
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    /// `self &= other`; returns whether any bit changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.len, other.len);
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let next = *a & b;
            changed |= next != *a;
            *a = next;
        }
        changed
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    fn trim_tail(&mut self) {
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1 << tail) - 1;
            }
        }
    }
}

/// The bit-vector state of a gen/kill analysis at one program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenKillDomain {
    pub kind: ReachableKind,
    pub states: BitSet,
    mode: GenKillKind,
}

impl GenKillDomain {
    #[must_use]
    pub fn new(size: usize, mode: GenKillKind) -> Self {
        Self { kind: ReachableKind::Unreachable, states: BitSet::new(size), mode }
    }

    pub fn gen_fact(&mut self, idx: usize) {
        self.states.set(idx);
    }

    pub fn kill_fact(&mut self, idx: usize) {
        self.states.clear(idx);
    }

    pub fn gen_all(&mut self) {
        self.states.set_all();
    }

    #[must_use]
    pub fn is_true_at(&self, idx: usize) -> bool {
        self.states.get(idx)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.states.len()
    }
}

impl AbstractDomain for GenKillDomain {
    fn join(&mut self, other: &Self) -> bool {
        if other.kind == ReachableKind::Unreachable {
            return false;
        }
        if self.kind == ReachableKind::Unreachable {
            *self = other.clone();
            return true;
        }
        match self.mode {
            GenKillKind::Maybe => self.states.union_with(&other.states),
            GenKillKind::Must => self.states.intersect_with(&other.states),
        }
    }

    fn describe(&self) -> String {
        if self.kind == ReachableKind::Unreachable {
            return "unreachable".to_string();
        }
        let mut s = String::with_capacity(self.states.len());
        for i in 0..self.states.len() {
            let _ = write!(s, "{}", u8::from(self.states.get(i)));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_set_get_clear() {
        let mut bits = BitSet::new(130);
        bits.set(0);
        bits.set(64);
        bits.set(129);
        assert!(bits.get(0) && bits.get(64) && bits.get(129));
        assert!(!bits.get(1));
        bits.clear(64);
        assert!(!bits.get(64));
        assert_eq!(bits.count_ones(), 2);
    }

    #[test]
    fn test_set_all_respects_length() {
        let mut bits = BitSet::new(70);
        bits.set_all();
        assert_eq!(bits.count_ones(), 70);
    }

    #[test]
    fn test_maybe_join_is_union() {
        let mut a = GenKillDomain::new(8, GenKillKind::Maybe);
        a.kind = ReachableKind::Reachable;
        a.gen_fact(1);
        let mut b = GenKillDomain::new(8, GenKillKind::Maybe);
        b.kind = ReachableKind::Reachable;
        b.gen_fact(2);
        assert!(a.join(&b));
        assert!(a.is_true_at(1) && a.is_true_at(2));
        assert!(!a.join(&b));
    }

    #[test]
    fn test_must_join_is_intersection() {
        let mut a = GenKillDomain::new(8, GenKillKind::Must);
        a.kind = ReachableKind::Reachable;
        a.gen_fact(1);
        a.gen_fact(2);
        let mut b = GenKillDomain::new(8, GenKillKind::Must);
        b.kind = ReachableKind::Reachable;
        b.gen_fact(2);
        assert!(a.join(&b));
        assert!(!a.is_true_at(1) && a.is_true_at(2));
    }

    #[test]
    fn test_join_from_unreachable_copies() {
        let mut a = GenKillDomain::new(4, GenKillKind::Maybe);
        let mut b = GenKillDomain::new(4, GenKillKind::Maybe);
        b.kind = ReachableKind::Reachable;
        b.gen_fact(3);
        assert!(a.join(&b));
        assert_eq!(a.kind, ReachableKind::Reachable);
        assert!(a.is_true_at(3));
        // joining an unreachable rhs is a no-op
        let unreachable = GenKillDomain::new(4, GenKillKind::Maybe);
        assert!(!a.join(&unreachable));
    }
}

//! A compact ordered set of positive integers (message UIDs, sequence numbers).
//!
//! Storage is a sparse map from the floor-to-[`BLOCK_SIZE`] start of each
//! block to a fixed-size bitmap plus a cached popcount, so that adding a
//! large contiguous range (as FETCH/STORE/SEARCH sequence sets routinely do,
//! e.g. `1:50000`) costs O(range / word size + blocks touched) rather than
//! one insertion per value.

use std::collections::BTreeMap;

/// Block size in bits; must be a multiple of 32. Chosen so that a block's
/// bitmap (1024 bytes) is a convenient unit of amortization for the ranges
/// IMAP clients typically ask about.
const BLOCK_BITS: u32 = 8192;
const BLOCK_WORDS: usize = (BLOCK_BITS / 32) as usize;

#[derive(Clone, Debug)]
struct Block {
    words: [u32; BLOCK_WORDS],
    count: u32,
}

impl Block {
    fn empty() -> Self {
        Block {
            words: [0; BLOCK_WORDS],
            count: 0,
        }
    }

    #[inline]
    fn word_and_bit(offset: u32) -> (usize, u32) {
        ((offset / 32) as usize, offset % 32)
    }

    fn get(&self, offset: u32) -> bool {
        let (w, b) = Self::word_and_bit(offset);
        self.words[w] & (1 << b) != 0
    }

    /// Returns true if the bit changed (i.e. it was not already set).
    fn set(&mut self, offset: u32) -> bool {
        let (w, b) = Self::word_and_bit(offset);
        let mask = 1u32 << b;
        if self.words[w] & mask != 0 {
            false
        } else {
            self.words[w] |= mask;
            self.count += 1;
            true
        }
    }

    /// Returns true if the bit changed (i.e. it was set before).
    fn unset(&mut self, offset: u32) -> bool {
        let (w, b) = Self::word_and_bit(offset);
        let mask = 1u32 << b;
        if self.words[w] & mask == 0 {
            false
        } else {
            self.words[w] &= !mask;
            self.count -= 1;
            true
        }
    }

    /// Sets every bit in `[from, to)` (offsets within the block), returning
    /// the number of bits newly set.
    fn set_range(&mut self, from: u32, to: u32) -> u32 {
        if from >= to {
            return 0;
        }
        let (first_word, first_bit) = Self::word_and_bit(from);
        let (last_word, last_bit) = Self::word_and_bit(to - 1);
        let mut added = 0u32;
        if first_word == last_word {
            let mask = word_mask(first_bit, last_bit + 1);
            added += (mask & !self.words[first_word]).count_ones();
            self.words[first_word] |= mask;
        } else {
            let head_mask = word_mask(first_bit, 32);
            added += (head_mask & !self.words[first_word]).count_ones();
            self.words[first_word] |= head_mask;

            for w in &mut self.words[(first_word + 1)..last_word] {
                added += (!*w).count_ones();
                *w = u32::MAX;
            }

            let tail_mask = word_mask(0, last_bit + 1);
            added += (tail_mask & !self.words[last_word]).count_ones();
            self.words[last_word] |= tail_mask;
        }
        self.count += added;
        added
    }

    fn unset_range(&mut self, from: u32, to: u32) -> u32 {
        if from >= to {
            return 0;
        }
        let (first_word, first_bit) = Self::word_and_bit(from);
        let (last_word, last_bit) = Self::word_and_bit(to - 1);
        let mut removed = 0u32;
        if first_word == last_word {
            let mask = word_mask(first_bit, last_bit + 1);
            removed += (mask & self.words[first_word]).count_ones();
            self.words[first_word] &= !mask;
        } else {
            let head_mask = word_mask(first_bit, 32);
            removed += (head_mask & self.words[first_word]).count_ones();
            self.words[first_word] &= !head_mask;

            for w in &mut self.words[(first_word + 1)..last_word] {
                removed += w.count_ones();
                *w = 0;
            }

            let tail_mask = word_mask(0, last_bit + 1);
            removed += (tail_mask & self.words[last_word]).count_ones();
            self.words[last_word] &= !tail_mask;
        }
        self.count -= removed;
        removed
    }
}

/// Bitmask covering bits `[lo, hi)` of a 32-bit word.
#[inline]
fn word_mask(lo: u32, hi: u32) -> u32 {
    debug_assert!(lo <= hi && hi <= 32);
    if hi == 32 {
        u32::MAX << lo
    } else {
        (u32::MAX << lo) & !(u32::MAX << hi)
    }
}

/// An ordered set of positive `u32`s, supporting IMAP-style rank/select and
/// range operations. See module docs for the storage rationale.
#[derive(Clone, Debug, Default)]
pub struct MessageSet {
    blocks: BTreeMap<u32, Block>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }

    #[inline]
    fn block_start(v: u32) -> u32 {
        v - (v % BLOCK_BITS)
    }

    pub fn add(&mut self, v: u32) {
        let start = Self::block_start(v);
        let block = self.blocks.entry(start).or_insert_with(Block::empty);
        block.set(v - start);
    }

    /// Adds every value in `[v1, v2]` inclusive. O((v2-v1)/wordsize + blocks).
    pub fn add_range(&mut self, v1: u32, v2: u32) {
        if v1 > v2 || v1 == 0 {
            return;
        }
        let mut start = Self::block_start(v1);
        loop {
            let block_end = start.saturating_add(BLOCK_BITS);
            let lo = v1.max(start) - start;
            let hi = (v2.min(block_end - 1) + 1) - start;
            let block = self.blocks.entry(start).or_insert_with(Block::empty);
            block.set_range(lo, hi);
            if block_end > v2 {
                break;
            }
            start = block_end;
        }
        self.blocks.retain(|_, b| b.count > 0);
    }

    pub fn add_set(&mut self, other: &MessageSet) {
        for v in other.iter() {
            self.add(v);
        }
    }

    pub fn remove(&mut self, v: u32) {
        let start = Self::block_start(v);
        let mut drop_block = false;
        if let Some(block) = self.blocks.get_mut(&start) {
            block.unset(v - start);
            if block.count == 0 {
                drop_block = true;
            }
        }
        if drop_block {
            self.blocks.remove(&start);
        }
    }

    pub fn remove_range(&mut self, v1: u32, v2: u32) {
        if v1 > v2 || v1 == 0 {
            return;
        }
        let mut start = Self::block_start(v1);
        loop {
            let block_end = start.saturating_add(BLOCK_BITS);
            if let Some(block) = self.blocks.get_mut(&start) {
                let lo = v1.max(start) - start;
                let hi = (v2.min(block_end - 1) + 1) - start;
                block.unset_range(lo, hi);
            }
            if block_end > v2 {
                break;
            }
            start = block_end;
        }
        self.blocks.retain(|_, b| b.count > 0);
    }

    pub fn remove_set(&mut self, other: &MessageSet) {
        for v in other.iter() {
            self.remove(v);
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn contains(&self, v: u32) -> bool {
        if v == 0 {
            return false;
        }
        let start = Self::block_start(v);
        self.blocks
            .get(&start)
            .map(|b| b.get(v - start))
            .unwrap_or(false)
    }

    pub fn count(&self) -> u64 {
        self.blocks.values().map(|b| b.count as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn smallest(&self) -> Option<u32> {
        self.iter().next()
    }

    pub fn largest(&self) -> Option<u32> {
        self.iter().last()
    }

    /// The `rank`-th smallest value (1-based). Returns 0 for `rank == 0` or
    /// `rank` beyond `count()`, matching the original's "total" operations.
    pub fn value(&self, rank: u64) -> u32 {
        if rank == 0 {
            return 0;
        }
        let mut remaining = rank;
        for (&start, block) in self.blocks.iter() {
            if remaining as u64 <= block.count as u64 {
                for word_idx in 0..BLOCK_WORDS {
                    let word = block.words[word_idx];
                    let ones = word.count_ones() as u64;
                    if remaining <= ones {
                        // Find the `remaining`-th set bit in this word.
                        let mut w = word;
                        let mut seen = 0u64;
                        for bit in 0..32u32 {
                            if w & 1 != 0 {
                                seen += 1;
                                if seen == remaining {
                                    return start + (word_idx as u32) * 32 + bit;
                                }
                            }
                            w >>= 1;
                        }
                        unreachable!("popcount accounting is inconsistent");
                    }
                    remaining -= ones;
                }
            } else {
                remaining -= block.count as u64;
            }
        }
        0
    }

    /// The 1-based rank of `v`, or 0 if `v` is absent.
    pub fn index(&self, v: u32) -> u64 {
        if v == 0 || !self.contains(v) {
            return 0;
        }
        let start = Self::block_start(v);
        let mut rank: u64 = 0;
        for (&bstart, block) in self.blocks.range(..start) {
            let _ = bstart;
            rank += block.count as u64;
        }
        let block = &self.blocks[&start];
        let offset = v - start;
        let (word_idx, bit) = Block::word_and_bit(offset);
        for w in &block.words[..word_idx] {
            rank += w.count_ones() as u64;
        }
        let mask = word_mask(0, bit);
        rank += (block.words[word_idx] & mask).count_ones() as u64;
        rank + 1
    }

    pub fn intersection(&self, other: &MessageSet) -> MessageSet {
        let mut out = MessageSet::new();
        for (&start, block) in self.blocks.iter() {
            if let Some(other_block) = other.blocks.get(&start) {
                let mut nb = Block::empty();
                for i in 0..BLOCK_WORDS {
                    nb.words[i] = block.words[i] & other_block.words[i];
                }
                nb.count = nb.words.iter().map(|w| w.count_ones()).sum();
                if nb.count > 0 {
                    out.blocks.insert(start, nb);
                }
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().flat_map(|(&start, block)| {
            (0..BLOCK_WORDS).flat_map(move |word_idx| {
                let word = block.words[word_idx];
                (0..32u32).filter_map(move |bit| {
                    if word & (1 << bit) != 0 {
                        Some(start + (word_idx as u32) * 32 + bit)
                    } else {
                        None
                    }
                })
            })
        })
    }

    /// Renders the IMAP sequence-set text form: ascending, comma separated,
    /// consecutive runs collapsed to `a:b`. Empty set renders as `""`.
    pub fn set(&self) -> String {
        let mut out = String::new();
        let mut run_start: Option<u32> = None;
        let mut run_end: Option<u32> = None;
        for v in self.iter() {
            match (run_start, run_end) {
                (Some(_), Some(end)) if v == end + 1 => {
                    run_end = Some(v);
                }
                (None, None) => {
                    run_start = Some(v);
                    run_end = Some(v);
                }
                _ => {
                    push_run(&mut out, run_start.unwrap(), run_end.unwrap());
                    run_start = Some(v);
                    run_end = Some(v);
                }
            }
        }
        if let (Some(s), Some(e)) = (run_start, run_end) {
            push_run(&mut out, s, e);
        }
        out
    }

    /// Renders a fully expanded comma-separated list, one value per entry.
    pub fn csl(&self) -> String {
        self.iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn push_run(out: &mut String, start: u32, end: u32) {
    if !out.is_empty() {
        out.push(',');
    }
    if start == end {
        out.push_str(&start.to_string());
    } else {
        out.push_str(&format!("{}:{}", start, end));
    }
}

impl FromIterator<u32> for MessageSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut s = MessageSet::new();
        for v in iter {
            s.add(v);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_select_roundtrip() {
        let mut s = MessageSet::new();
        for v in [1, 2, 3, 7, 10, 11, 12] {
            s.add(v);
        }
        assert_eq!(s.count(), 7);
        for (i, v) in [1, 2, 3, 7, 10, 11, 12].into_iter().enumerate() {
            assert_eq!(s.value((i + 1) as u64), v);
            assert_eq!(s.index(v), (i + 1) as u64);
        }
        assert_eq!(s.value(0), 0);
        assert_eq!(s.value(8), 0);
        assert_eq!(s.index(99), 0);
    }

    #[test]
    fn contains_index_invariant() {
        let mut s = MessageSet::new();
        for v in [5u32, 9000, 16400, 1] {
            s.add(v);
        }
        for v in 0..20000u32 {
            let present = s.contains(v);
            let idx = s.index(v);
            assert_eq!(present, idx > 0);
            if present {
                assert_eq!(s.value(idx), v);
            }
        }
    }

    #[test]
    fn add_remove_noop() {
        let mut s = MessageSet::new();
        s.add(42);
        let before = s.set();
        s.add(100);
        s.remove(100);
        assert_eq!(s.set(), before);
    }

    #[test]
    fn add_range_across_blocks() {
        let mut s = MessageSet::new();
        s.add_range(8000, 8300);
        assert_eq!(s.count(), 301);
        assert!(s.contains(8000));
        assert!(s.contains(8300));
        assert!(!s.contains(7999));
        assert!(!s.contains(8301));
    }

    #[test]
    fn set_text_roundtrip() {
        let mut s = MessageSet::new();
        for v in [1, 2, 3, 7, 10, 11, 12] {
            s.add(v);
        }
        assert_eq!(s.set(), "1:3,7,10:12");

        let parsed: MessageSet = parse_set_text(&s.set());
        assert_eq!(parsed.set(), s.set());
    }

    #[test]
    fn csl_roundtrip() {
        let mut s = MessageSet::new();
        for v in [1, 2, 3, 7] {
            s.add(v);
        }
        assert_eq!(s.csl(), "1,2,3,7");
    }

    #[test]
    fn empty_set_renders_empty() {
        let s = MessageSet::new();
        assert_eq!(s.set(), "");
        assert_eq!(s.csl(), "");
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn intersection_basic() {
        let mut a = MessageSet::new();
        let mut b = MessageSet::new();
        for v in [1, 2, 3, 9000] {
            a.add(v);
        }
        for v in [2, 3, 4, 9000] {
            b.add(v);
        }
        let i = a.intersection(&b);
        assert_eq!(i.csl(), "2,3,9000");
    }

    /// Test-only parser for the `set()` text form; the real sequence-set
    /// grammar (with `*` and `$`) is the command parser's job, not this
    /// type's, per the component design.
    fn parse_set_text(text: &str) -> MessageSet {
        let mut s = MessageSet::new();
        if text.is_empty() {
            return s;
        }
        for part in text.split(',') {
            if let Some((a, b)) = part.split_once(':') {
                s.add_range(a.parse().unwrap(), b.parse().unwrap());
            } else {
                s.add(part.parse().unwrap());
            }
        }
        s
    }
}

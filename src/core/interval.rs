//! Coalescing set of byte intervals
//!
//! Used for the released ranges of a write-ahead transaction. Inserting a
//! range that overlaps or touches existing ranges merges them, so the set
//! always holds disjoint, non-adjacent intervals in offset order.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    /// Interval length indexed by start offset
    intervals: BTreeMap<u64, u64>,
}

impl IntervalSet {
    pub fn new() -> Self {
        IntervalSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Number of disjoint intervals
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Total bytes covered
    pub fn size(&self) -> u64 {
        self.intervals.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.intervals.iter().map(|(&start, &len)| (start, len))
    }

    /// Check if the whole range is covered
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        match self.intervals.range(..=offset).next_back() {
            Some((&start, &len)) => offset + length <= start + len,
            None => false,
        }
    }

    /// Add a range, merging it with every overlapping or adjacent interval
    pub fn insert(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        let mut start = offset;
        let mut end = offset + length;

        // Previous interval reaching the new start
        if let Some((&prev_start, &prev_len)) = self.intervals.range(..=start).next_back() {
            if prev_start + prev_len >= start {
                start = prev_start;
                end = end.max(prev_start + prev_len);
                self.intervals.remove(&prev_start);
            }
        }

        // Following intervals starting inside or right at the new end
        let swallowed: Vec<(u64, u64)> = self
            .intervals
            .range(start..=end)
            .map(|(&s, &l)| (s, l))
            .collect();
        for (s, l) in swallowed {
            end = end.max(s + l);
            self.intervals.remove(&s);
        }

        self.intervals.insert(start, end - start);
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }
}

impl Dump for IntervalSet {
    /// `[{"offset", "length"}]`
    fn dump(&self) -> Value {
        Value::Array(
            self.iter()
                .map(|(offset, length)| json!({ "offset": offset, "length": length }))
                .collect(),
        )
    }
}

impl Encode for IntervalSet {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u32(self.intervals.len() as u32);
        for (start, len) in self.iter() {
            enc.put_u64(start);
            enc.put_u64(len);
        }
    }
}

impl Decode for IntervalSet {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let count = dec.get_count(16)?;
        let mut set = IntervalSet::new();
        let mut prev_end = None;
        for _ in 0..count {
            let start = dec.get_u64()?;
            let len = dec.get_u64()?;
            let end = start.checked_add(len).filter(|_| len > 0);
            match (prev_end, end) {
                (_, None) => {
                    return Err(MetaError::InvalidData(format!(
                        "bad interval {:#x}~{:x}",
                        start, len
                    )))
                }
                (Some(p), Some(_)) if start <= p => {
                    return Err(MetaError::InvalidData(format!(
                        "interval {:#x}~{:x} overlaps or touches its predecessor",
                        start, len
                    )))
                }
                _ => {}
            }
            set.intervals.insert(start, len);
            prev_end = end;
        }
        Ok(set)
    }
}

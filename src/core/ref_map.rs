//! Reference-counted interval map over a physical address space
//!
//! Tracks how many logical owners reference each byte of a shared physical
//! region. The map is run-length encoded: each record covers a range with a
//! uniform reference count, so cost scales with the number of distinct
//! reference boundaries rather than with the size of the region.
//!
//! Invariants (checked by [`ExtentRefMap::check`]):
//! - records are sorted by offset and never overlap
//! - every record has a non-zero length and a non-zero reference count
//! - two contiguous records never carry the same reference count, unless
//!   their combined length would not fit a record
//!
//! Bytes without a record have an implicit reference count of zero.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use crate::extent::{PExtentVector, PhysicalExtent};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};
use tracing::{debug, error};

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

/// A run of bytes sharing one reference count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefRecord {
    pub length: u32,
    pub refs: u32,
}

impl RefRecord {
    pub fn new(length: u32, refs: u32) -> Self {
        RefRecord { length, refs }
    }
}

/// Ref-counted interval map keyed by starting offset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentRefMap {
    ref_map: BTreeMap<u64, RefRecord>,
}

impl ExtentRefMap {
    pub fn new() -> Self {
        ExtentRefMap {
            ref_map: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ref_map.is_empty()
    }

    /// Number of records (distinct reference runs)
    pub fn len(&self) -> usize {
        self.ref_map.len()
    }

    pub fn clear(&mut self) {
        self.ref_map.clear();
    }

    /// Records in offset order
    pub fn iter(&self) -> impl Iterator<Item = (u64, RefRecord)> + '_ {
        self.ref_map.iter().map(|(&offset, &record)| (offset, record))
    }

    fn end_of(offset: u64, record: &RefRecord) -> u64 {
        offset + record.length as u64
    }

    /// Key of the first record after `key`
    fn next_key(&self, key: u64) -> Option<u64> {
        self.ref_map
            .range((Excluded(key), Unbounded))
            .next()
            .map(|(&k, _)| k)
    }

    /// Key of the record covering `offset`, else of the first record after it
    fn first_touching(&self, offset: u64) -> Option<u64> {
        if let Some((&k, r)) = self.ref_map.range(..offset).next_back() {
            if Self::end_of(k, r) > offset {
                return Some(k);
            }
        }
        self.ref_map.range(offset..).next().map(|(&k, _)| k)
    }

    /// Split the record at `key` so that a new record starts at `at`.
    fn split_at(&mut self, key: u64, at: u64) {
        let record = self.ref_map[&key];
        debug_assert!(key < at && at < Self::end_of(key, &record));
        let right = (Self::end_of(key, &record) - at) as u32;
        if let Some(left) = self.ref_map.get_mut(&key) {
            left.length = (at - key) as u32;
        }
        self.ref_map.insert(at, RefRecord::new(right, record.refs));
    }

    /// Coalesce the record at `key` into its predecessor when they are
    /// contiguous with equal refs and the sum still fits a `u32` length.
    /// Returns the key of the surviving record.
    fn merge_left(&mut self, key: u64) -> u64 {
        let Some(&record) = self.ref_map.get(&key) else {
            return key;
        };
        let prev = self.ref_map.range(..key).next_back().map(|(&k, &r)| (k, r));
        if let Some((prev_key, prev)) = prev {
            if prev.refs == record.refs && prev_key + prev.length as u64 == key {
                if let Some(length) = prev.length.checked_add(record.length) {
                    if let Some(merged) = self.ref_map.get_mut(&prev_key) {
                        merged.length = length;
                    }
                    self.ref_map.remove(&key);
                    return prev_key;
                }
            }
        }
        key
    }

    /// Add one reference to every byte of `[offset, offset + length)`.
    pub fn get(&mut self, offset: u64, length: u32) {
        let mut offset = offset;
        let mut length = length as u64;
        let mut cursor = self.first_touching(offset);

        while length > 0 {
            let Some(mut key) = cursor else {
                // nothing at or after offset: add the whole remainder
                self.ref_map
                    .insert(offset, RefRecord::new(length as u32, 1));
                cursor = Some(offset);
                break;
            };

            if key > offset {
                // unreferenced gap before the next record
                let gap = (key - offset).min(length);
                self.ref_map.insert(offset, RefRecord::new(gap as u32, 1));
                self.merge_left(offset);
                offset += gap;
                length -= gap;
                cursor = Some(key);
                continue;
            }

            if key < offset {
                self.split_at(key, offset);
                key = offset;
            }

            let record = self.ref_map[&key];
            if length < record.length as u64 {
                self.split_at(key, offset + length);
                if let Some(r) = self.ref_map.get_mut(&key) {
                    r.refs += 1;
                }
                cursor = Some(key);
                break;
            }

            if let Some(r) = self.ref_map.get_mut(&key) {
                r.refs += 1;
            }
            offset += record.length as u64;
            length -= record.length as u64;
            let kept = self.merge_left(key);
            cursor = self.next_key(kept);
        }

        if let Some(key) = cursor {
            self.merge_left(key);
        }

        #[cfg(debug_assertions)]
        self.check();
    }

    fn missing_extent(&self, what: &str, offset: u64, length: u64) -> ! {
        error!(
            "put on missing extent ({}) at {:#x}~{:x}: {}",
            what, offset, length, self
        );
        panic!("put on missing extent ({})", what);
    }

    /// Drop one reference from every byte of `[offset, offset + length)`.
    ///
    /// Ranges whose count falls to zero are removed and appended to
    /// `release`; entries already in `release` are left untouched.
    ///
    /// # Panics
    ///
    /// If any byte of the range is unreferenced.
    pub fn put(&mut self, offset: u64, length: u32, release: &mut PExtentVector) {
        let mut offset = offset;
        let mut length = length as u64;

        let key = match self.ref_map.range(offset..).next() {
            Some((&k, _)) if k == offset => k,
            _ => match self.ref_map.range(..offset).next_back() {
                None => self.missing_extent("nothing before", offset, length),
                Some((&k, r)) if Self::end_of(k, r) <= offset => {
                    self.missing_extent("gap", offset, length)
                }
                Some((&k, _)) => k,
            },
        };
        if key < offset {
            self.split_at(key, offset);
        }

        let mut cursor = Some(offset);
        while length > 0 {
            let key = match cursor {
                Some(k) if k == offset => k,
                _ => self.missing_extent("gap", offset, length),
            };
            let record = self.ref_map[&key];

            if length < record.length as u64 {
                self.split_at(key, offset + length);
                if record.refs > 1 {
                    if let Some(r) = self.ref_map.get_mut(&key) {
                        r.refs -= 1;
                    }
                    self.merge_left(key);
                } else {
                    debug!("ref_map releasing {:#x}~{:x}", key, length);
                    release.push(PhysicalExtent::new(key, length as u32));
                    self.ref_map.remove(&key);
                }
                #[cfg(debug_assertions)]
                self.check();
                return;
            }

            offset += record.length as u64;
            length -= record.length as u64;
            if record.refs > 1 {
                if let Some(r) = self.ref_map.get_mut(&key) {
                    r.refs -= 1;
                }
                let kept = self.merge_left(key);
                cursor = self.next_key(kept);
            } else {
                debug!("ref_map releasing {:#x}~{:x}", key, record.length);
                release.push(PhysicalExtent::new(key, record.length));
                self.ref_map.remove(&key);
                cursor = self.next_key(key);
            }
        }

        if let Some(key) = cursor {
            self.merge_left(key);
        }

        #[cfg(debug_assertions)]
        self.check();
    }

    /// True if every byte of the range is referenced at least once
    pub fn contains(&self, offset: u64, length: u32) -> bool {
        let mut offset = offset;
        let mut length = length as u64;

        let start = match self.ref_map.range(offset..).next() {
            Some((&k, _)) if k == offset => k,
            _ => match self.ref_map.range(..offset).next_back() {
                Some((&k, r)) if Self::end_of(k, r) > offset => k,
                _ => return false,
            },
        };

        let mut records = self.ref_map.range(start..);
        while length > 0 {
            let Some((&k, r)) = records.next() else {
                return false;
            };
            if k > offset {
                return false;
            }
            let end = Self::end_of(k, r);
            if end >= offset + length {
                return true;
            }
            let overlap = end - offset;
            offset += overlap;
            length -= overlap;
        }
        true
    }

    /// True if any byte of the range is referenced
    pub fn intersects(&self, offset: u64, length: u32) -> bool {
        match self.first_touching(offset) {
            None => false,
            Some(k) => k < offset + length as u64,
        }
    }

    /// Describe the first violated invariant, if any
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut pos = 0u64;
        let mut prev = RefRecord::new(0, 0);
        for (&offset, record) in &self.ref_map {
            if record.length == 0 || record.refs == 0 {
                return Err(format!("empty record at {:#x}", offset));
            }
            if offset < pos {
                return Err(format!("overlap at {:#x}", offset));
            }
            if offset == pos
                && record.refs == prev.refs
                && prev.length.checked_add(record.length).is_some()
            {
                return Err(format!("unmerged record at {:#x}", offset));
            }
            pos = offset
                .checked_add(record.length as u64)
                .ok_or_else(|| format!("record at {:#x} overflows", offset))?;
            prev = *record;
        }
        Ok(())
    }

    /// Verify ordering, non-overlap and coalescing.
    ///
    /// # Panics
    ///
    /// On any violated invariant.
    pub fn check(&self) {
        if let Err(reason) = self.validate() {
            error!("ref_map invariant violated ({}): {}", reason, self);
            panic!("ref_map invariant violated: {}", reason);
        }
    }

    /// Representative instances used by encoding and dump tests
    pub fn sample_instances() -> Vec<ExtentRefMap> {
        let mut populated = ExtentRefMap::new();
        populated.get(10, 10);
        populated.get(18, 22);
        populated.get(20, 20);
        populated.get(10, 25);
        populated.get(15, 20);
        vec![ExtentRefMap::new(), populated]
    }
}

impl fmt::Display for ExtentRefMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref_map(")?;
        for (i, (offset, record)) in self.ref_map.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{:#x}~{:x}={}", offset, record.length, record.refs)?;
        }
        write!(f, ")")
    }
}

impl Dump for ExtentRefMap {
    fn dump(&self) -> Value {
        let refs: Vec<Value> = self
            .ref_map
            .iter()
            .map(|(offset, record)| {
                json!({
                    "offset": offset,
                    "length": record.length,
                    "refs": record.refs,
                })
            })
            .collect();
        json!({ "ref_map": refs })
    }
}

impl Encode for ExtentRefMap {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_u32(self.ref_map.len() as u32);
            for (&offset, record) in &self.ref_map {
                enc.put_u64(offset);
                enc.put_u32(record.length);
                enc.put_u32(record.refs);
            }
        });
    }
}

impl Decode for ExtentRefMap {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            let count = dec.get_count(16)?;
            let mut map = ExtentRefMap::new();
            for _ in 0..count {
                let offset = dec.get_u64()?;
                let length = dec.get_u32()?;
                let refs = dec.get_u32()?;
                if map.ref_map.insert(offset, RefRecord::new(length, refs)).is_some() {
                    return Err(MetaError::InvalidData(format!(
                        "duplicate record at {:#x}",
                        offset
                    )));
                }
            }
            map.validate().map_err(MetaError::InvalidData)?;
            Ok(map)
        })
    }
}

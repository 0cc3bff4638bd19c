//! Per-allocation-unit live byte accounting for a single blob
//!
//! A blob spanning one allocation unit (AU) keeps a single byte counter.
//! A blob spanning several AUs keeps one counter per AU so that an AU can be
//! released as soon as its last live byte goes away, even when the blob is
//! only partially dead.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use crate::extent::{PExtentVector, PhysicalExtent};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, error};

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuUsage {
    /// Blob fits in a single AU
    Compact { total_bytes: u32 },
    /// One live byte counter per AU, always more than one AU
    PerAu(Vec<u32>),
}

/// Live byte tracker for the AUs backing one blob
#[derive(Debug, Clone)]
pub struct BlobUseTracker {
    au_size: u32,
    usage: AuUsage,
}

impl Default for BlobUseTracker {
    fn default() -> Self {
        BlobUseTracker {
            au_size: 0,
            usage: AuUsage::Compact { total_bytes: 0 },
        }
    }
}

impl BlobUseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker for a blob of `full_length` bytes over `au_size` AUs
    pub fn with_length(full_length: u32, au_size: u32) -> Self {
        let mut tracker = Self::default();
        tracker.init(full_length, au_size);
        tracker
    }

    pub fn au_size(&self) -> u32 {
        self.au_size
    }

    /// Number of per-AU counters; 0 in compact form
    pub fn num_au(&self) -> u32 {
        match &self.usage {
            AuUsage::Compact { .. } => 0,
            AuUsage::PerAu(bytes) => bytes.len() as u32,
        }
    }

    /// Per-AU live bytes; empty in compact form
    pub fn bytes_per_au(&self) -> &[u32] {
        match &self.usage {
            AuUsage::Compact { .. } => &[],
            AuUsage::PerAu(bytes) => bytes,
        }
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self.usage, AuUsage::PerAu(_))
    }

    /// Total live bytes across all AUs
    pub fn referenced_bytes(&self) -> u64 {
        match &self.usage {
            AuUsage::Compact { total_bytes } => *total_bytes as u64,
            AuUsage::PerAu(bytes) => bytes.iter().map(|&b| b as u64).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.usage {
            AuUsage::Compact { total_bytes } => *total_bytes == 0,
            AuUsage::PerAu(bytes) => bytes.iter().all(|&b| b == 0),
        }
    }

    /// Forget all state, including the AU size
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Prepare to track a blob of `full_length` bytes.
    ///
    /// # Panics
    ///
    /// If either argument is zero, or the tracker still holds live bytes.
    pub fn init(&mut self, full_length: u32, au_size: u32) {
        assert!(
            self.au_size == 0 || self.is_empty(),
            "use tracker re-initialised while holding live bytes: {}",
            self
        );
        assert!(au_size > 0, "use tracker AU size must be non-zero");
        assert!(full_length > 0, "use tracker length must be non-zero");

        let num_au = (full_length as u64).div_ceil(au_size as u64) as usize;
        self.au_size = au_size;
        self.usage = if num_au > 1 {
            AuUsage::PerAu(vec![0; num_au])
        } else {
            AuUsage::Compact { total_bytes: 0 }
        };
    }

    fn assert_initialised(&self) {
        assert!(self.au_size > 0, "use tracker used before init");
    }

    /// Record `length` live bytes at blob offset `offset`
    pub fn get(&mut self, offset: u32, length: u32) {
        self.assert_initialised();
        let au_size = self.au_size as u64;

        match &mut self.usage {
            AuUsage::Compact { total_bytes } => *total_bytes += length,
            AuUsage::PerAu(bytes) => {
                let mut offset = offset as u64;
                let end = offset + length as u64;
                assert!(
                    end <= bytes.len() as u64 * au_size,
                    "use tracker get {:#x}~{:x} past tracked range",
                    offset,
                    length
                );
                while offset < end {
                    let phase = offset % au_size;
                    let diff = (au_size - phase).min(end - offset);
                    bytes[(offset / au_size) as usize] += diff as u32;
                    offset += au_size - phase;
                }
            }
        }
    }

    /// Drop `length` live bytes at blob offset `offset`.
    ///
    /// `release_units` is cleared, then filled with the AU-sized extents
    /// (blob-relative, contiguous runs coalesced) whose live count dropped to
    /// zero. Returns true when the whole tracker is now empty; in that case
    /// `release_units` is cleared again since the entire blob is released.
    ///
    /// # Panics
    ///
    /// If any AU would go below zero live bytes.
    pub fn put(&mut self, offset: u32, length: u32, release_units: &mut PExtentVector) -> bool {
        self.assert_initialised();
        release_units.clear();
        let au_size = self.au_size as u64;
        let mut maybe_empty = true;

        match &mut self.usage {
            AuUsage::Compact { total_bytes } => {
                if *total_bytes < length {
                    error!(
                        "use tracker underflow: put {:#x} bytes of {:#x}",
                        length, total_bytes
                    );
                    panic!("use tracker underflow");
                }
                *total_bytes -= length;
            }
            AuUsage::PerAu(bytes) => {
                let mut offset = offset as u64;
                let end = offset + length as u64;
                let mut next_offset: Option<u64> = None;

                while offset < end {
                    let phase = offset % au_size;
                    let pos = (offset / au_size) as usize;
                    let diff = (au_size - phase).min(end - offset) as u32;
                    let Some(live) = bytes.get_mut(pos) else {
                        panic!("use tracker put {:#x} past tracked range", offset);
                    };
                    if diff > *live {
                        error!(
                            "use tracker underflow in AU {}: put {:#x} bytes of {:#x}",
                            pos, diff, live
                        );
                        panic!("use tracker underflow");
                    }
                    *live -= diff;
                    offset += au_size - phase;

                    if *live == 0 {
                        let au_offset = pos as u64 * au_size;
                        match release_units.last_mut() {
                            Some(last) if next_offset == Some(au_offset) => {
                                last.length += self.au_size;
                            }
                            _ => release_units.push(PhysicalExtent::new(au_offset, self.au_size)),
                        }
                        next_offset = Some(au_offset + au_size);
                    } else {
                        // touched AU still live, so the blob cannot be empty
                        maybe_empty = false;
                    }
                }
            }
        }

        let empty = maybe_empty && self.is_empty();
        if empty {
            release_units.clear();
        } else if !release_units.is_empty() {
            debug!("use tracker releasing AUs {:?}", release_units);
        }
        empty
    }

    /// Only multi-AU trackers can be split
    pub fn can_split(&self) -> bool {
        self.is_expanded()
    }

    /// True if `blob_offset` is AU-aligned and inside the tracked range
    pub fn can_split_at(&self, blob_offset: u32) -> bool {
        self.assert_initialised();
        blob_offset % self.au_size == 0 && (blob_offset as u64) < self.tracked_length()
    }

    fn tracked_length(&self) -> u64 {
        self.num_au() as u64 * self.au_size as u64
    }

    /// Move every AU at or after `blob_offset` into `right`.
    ///
    /// # Panics
    ///
    /// Unless the tracker can be split at `blob_offset` and `right` is empty.
    pub fn split(&mut self, blob_offset: u32, right: &mut BlobUseTracker) {
        self.assert_initialised();
        assert!(self.can_split(), "use tracker cannot be split: {}", self);
        assert!(
            self.can_split_at(blob_offset),
            "use tracker cannot be split at {:#x}: {}",
            blob_offset,
            self
        );
        assert!(right.is_empty(), "split target is not empty: {}", right);

        let au_size = self.au_size;
        let AuUsage::PerAu(bytes) = &mut self.usage else {
            unreachable!("can_split holds only for per-AU trackers");
        };

        let keep = (blob_offset / au_size) as usize;
        let moved = bytes.split_off(keep);
        right.init(moved.len() as u32 * au_size, au_size);
        for (i, live) in moved.into_iter().enumerate() {
            right.get(i as u32 * au_size, live);
        }

        match keep {
            0 => self.clear(),
            1 => {
                let total_bytes = bytes[0];
                self.usage = AuUsage::Compact { total_bytes };
            }
            _ => {}
        }
        debug!("use tracker split at {:#x}: {} | {}", blob_offset, self, right);
    }

    /// Value equality that tolerates differing representations.
    ///
    /// A compact and an expanded tracker are equal when the expanded
    /// tracker's live bytes add up to the compact counter.
    pub fn equal(&self, other: &BlobUseTracker) -> bool {
        match (&self.usage, &other.usage) {
            (AuUsage::Compact { total_bytes: a }, AuUsage::Compact { total_bytes: b }) => {
                a == b && self.au_size == other.au_size
            }
            (AuUsage::PerAu(a), AuUsage::PerAu(b)) => self.au_size == other.au_size && a == b,
            (AuUsage::Compact { total_bytes }, AuUsage::PerAu(bytes))
            | (AuUsage::PerAu(bytes), AuUsage::Compact { total_bytes }) => {
                let referenced = *total_bytes as u64;
                let mut seen = 0u64;
                for &live in bytes {
                    seen += live as u64;
                    if seen > referenced {
                        return false;
                    }
                }
                seen == referenced
            }
        }
    }

    /// Representative instances used by encoding and dump tests
    pub fn sample_instances() -> Vec<BlobUseTracker> {
        let mut single = BlobUseTracker::with_length(16, 16);
        single.get(10, 10);
        single.get(10, 5);

        let mut multi = BlobUseTracker::with_length(60, 16);
        multi.get(18, 22);
        multi.get(20, 20);
        multi.get(15, 20);

        vec![BlobUseTracker::new(), single, multi]
    }
}

impl fmt::Display for BlobUseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "use_tracker(")?;
        match &self.usage {
            AuUsage::Compact { total_bytes } => {
                write!(f, "{:#x} :{:#x}", self.au_size, total_bytes)?;
            }
            AuUsage::PerAu(bytes) => {
                write!(f, "{:#x}*{:#x} :", bytes.len(), self.au_size)?;
                for (i, live) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{:#x}", live)?;
                }
            }
        }
        write!(f, ")")
    }
}

impl Dump for BlobUseTracker {
    fn dump(&self) -> Value {
        match &self.usage {
            AuUsage::Compact { total_bytes } => json!({
                "num_au": 0,
                "au_size": self.au_size,
                "total_bytes": total_bytes,
            }),
            AuUsage::PerAu(bytes) => json!({
                "num_au": bytes.len(),
                "au_size": self.au_size,
                "bytes_per_au": bytes,
            }),
        }
    }
}

impl Encode for BlobUseTracker {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_u32(self.au_size);
            match &self.usage {
                AuUsage::Compact { total_bytes } => {
                    enc.put_u32(0);
                    enc.put_u32(*total_bytes);
                }
                AuUsage::PerAu(bytes) => {
                    enc.put_u32(bytes.len() as u32);
                    for &live in bytes {
                        enc.put_u32(live);
                    }
                }
            }
        });
    }
}

impl Decode for BlobUseTracker {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            let au_size = dec.get_u32()?;
            let num_au = dec.get_u32()? as usize;
            let usage = match num_au {
                0 => AuUsage::Compact {
                    total_bytes: dec.get_u32()?,
                },
                1 => {
                    return Err(MetaError::InvalidData(
                        "use tracker with a single per-AU counter".to_string(),
                    ))
                }
                n => {
                    if n.saturating_mul(4) > dec.remaining() {
                        return Err(MetaError::UnexpectedEof {
                            needed: n.saturating_mul(4),
                            remaining: dec.remaining(),
                        });
                    }
                    let mut bytes = Vec::with_capacity(n);
                    for _ in 0..n {
                        bytes.push(dec.get_u32()?);
                    }
                    AuUsage::PerAu(bytes)
                }
            };

            let tracker = BlobUseTracker { au_size, usage };
            if au_size == 0 && !(tracker.is_empty() && num_au == 0) {
                return Err(MetaError::InvalidData(
                    "use tracker state without an AU size".to_string(),
                ));
            }
            Ok(tracker)
        })
    }
}

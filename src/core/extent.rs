//! Physical extents on the raw block device
//!
//! A [`PhysicalExtent`] is an `(offset, length)` byte range on the device.
//! Extents whose offset is [`INVALID_OFFSET`] are holes: they contribute to a
//! blob's size but occupy no physical space.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Offset sentinel marking an unallocated extent
pub const INVALID_OFFSET: u64 = u64::MAX;

/// A contiguous byte range on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalExtent {
    /// Device byte offset, or [`INVALID_OFFSET`] for a hole
    pub offset: u64,
    /// Length in bytes
    pub length: u32,
}

/// Ordered list of physical extents
pub type PExtentVector = Vec<PhysicalExtent>;

impl PhysicalExtent {
    pub fn new(offset: u64, length: u32) -> Self {
        PhysicalExtent { offset, length }
    }

    /// A hole of `length` bytes with no physical backing
    pub fn invalid(length: u32) -> Self {
        PhysicalExtent {
            offset: INVALID_OFFSET,
            length,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.offset != INVALID_OFFSET
    }

    /// First byte past the extent
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    /// Check if this extent covers a device offset
    pub fn contains(&self, offset: u64) -> bool {
        self.is_valid() && offset >= self.offset && offset < self.end()
    }

    /// Check if `next` starts exactly where this extent ends
    pub fn is_followed_by(&self, next: &PhysicalExtent) -> bool {
        self.is_valid() && next.is_valid() && self.end() == next.offset
    }
}

impl Default for PhysicalExtent {
    fn default() -> Self {
        PhysicalExtent::invalid(0)
    }
}

impl fmt::Display for PhysicalExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#x}~{:x}", self.offset, self.length)
        } else {
            write!(f, "!~{:x}", self.length)
        }
    }
}

/// Display adapter for a slice of extents: `[0x10~20,!~1000]`
pub struct ExtentsFmt<'a>(pub &'a [PhysicalExtent]);

impl fmt::Display for ExtentsFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, extent) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", extent)?;
        }
        write!(f, "]")
    }
}

impl Encode for PhysicalExtent {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_u64(self.offset);
        enc.put_u32(self.length);
    }
}

impl Decode for PhysicalExtent {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let offset = dec.get_u64()?;
        let length = dec.get_u32()?;
        Ok(PhysicalExtent { offset, length })
    }
}

impl Dump for PhysicalExtent {
    fn dump(&self) -> Value {
        json!({
            "offset": self.offset,
            "length": self.length,
        })
    }
}

/// Builds a byte-granular extent list from block-granular allocations.
///
/// Contiguous allocations extend the previous extent as long as the merged
/// extent stays within `max_blocks` (0 means unlimited).
#[derive(Debug, Clone)]
pub struct ExtentList {
    extents: PExtentVector,
    block_size: u64,
    max_blocks: u64,
}

impl ExtentList {
    pub fn new(block_size: u64, max_blocks: u64) -> Self {
        assert!(block_size > 0, "extent list block size must be non-zero");
        ExtentList {
            extents: Vec::new(),
            block_size,
            max_blocks,
        }
    }

    /// Append `count` blocks starting at block `start`
    pub fn add_extents(&mut self, start: u64, count: u64) {
        if let Some(last) = self.extents.last_mut() {
            let last_end_block = last.end() / self.block_size;
            let last_blocks = last.length as u64 / self.block_size;
            if last_end_block == start
                && (self.max_blocks == 0 || last_blocks + count <= self.max_blocks)
            {
                last.length = Self::byte_length(last.length as u64 + count * self.block_size);
                return;
            }
        }

        self.extents.push(PhysicalExtent::new(
            start * self.block_size,
            Self::byte_length(count * self.block_size),
        ));
    }

    fn byte_length(bytes: u64) -> u32 {
        u32::try_from(bytes)
            .unwrap_or_else(|_| panic!("extent length {:#x} exceeds u32 range", bytes))
    }

    pub fn extents(&self) -> &[PhysicalExtent] {
        &self.extents
    }

    pub fn into_extents(self) -> PExtentVector {
        self.extents
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_creation() {
        let extent = PhysicalExtent::new(10, 20);
        assert_eq!(extent.offset, 10);
        assert_eq!(extent.length, 20);
        assert!(extent.is_valid());
        assert_eq!(extent.end(), 30);
    }

    #[test]
    fn test_default_is_invalid() {
        let extent = PhysicalExtent::default();
        assert!(!extent.is_valid());
        assert_eq!(extent.length, 0);
    }

    #[test]
    fn test_extent_contains() {
        let extent = PhysicalExtent::new(10, 20);
        assert!(!extent.contains(9));
        assert!(extent.contains(10));
        assert!(extent.contains(29));
        assert!(!extent.contains(30));
        assert!(!PhysicalExtent::invalid(100).contains(5));
    }

    #[test]
    fn test_extent_display() {
        assert_eq!(PhysicalExtent::new(0x1000, 0x200).to_string(), "0x1000~200");
        assert_eq!(PhysicalExtent::invalid(0x1000).to_string(), "!~1000");
        let list = vec![PhysicalExtent::new(1, 2), PhysicalExtent::invalid(3)];
        assert_eq!(ExtentsFmt(&list).to_string(), "[0x1~2,!~3]");
    }

    #[test]
    fn test_extent_dump() {
        let dump = PhysicalExtent::new(111, 222).dump();
        assert_eq!(dump["offset"], 111);
        assert_eq!(dump["length"], 222);
    }

    #[test]
    fn test_extent_encoding() {
        let extent = PhysicalExtent::new(0x4010_0000, 0x10000);
        let bytes = extent.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(PhysicalExtent::from_bytes(&bytes).unwrap(), extent);
    }

    #[test]
    fn test_extent_list_merges_contiguous() {
        let mut list = ExtentList::new(4096, 0);
        list.add_extents(10, 2);
        list.add_extents(12, 3);
        list.add_extents(20, 1);

        assert_eq!(
            list.extents(),
            &[
                PhysicalExtent::new(10 * 4096, 5 * 4096),
                PhysicalExtent::new(20 * 4096, 4096),
            ]
        );
    }

    #[test]
    fn test_extent_list_respects_max_blocks() {
        let mut list = ExtentList::new(4096, 4);
        list.add_extents(0, 3);
        list.add_extents(3, 1); // merged: 4 blocks
        list.add_extents(4, 1); // would exceed 4 blocks

        assert_eq!(list.len(), 2);
        assert_eq!(list.extents()[0], PhysicalExtent::new(0, 4 * 4096));
        assert_eq!(list.extents()[1], PhysicalExtent::new(4 * 4096, 4096));
    }
}

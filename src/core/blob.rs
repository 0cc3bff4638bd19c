//! Blob: a logical unit of data mapped onto physical extents
//!
//! A blob owns its extent list, compression lengths and per-chunk checksum
//! buffer. Blob offsets run from 0 to the blob's logical length; the extent
//! list translates them to device offsets, with holes for unallocated space.

use crate::checksum::{self, ChecksumType};
use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use crate::extent::{ExtentsFmt, PExtentVector, PhysicalExtent};
use serde_json::{json, Value};
use std::fmt;

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

/// Number of regions tracked by the unused bitmap
const UNUSED_BITS: u64 = u16::BITS as u64;

/// Blob can be overwritten in place
pub const FLAG_MUTABLE: u32 = 1;
/// Blob data is compressed
pub const FLAG_COMPRESSED: u32 = 2;
/// Blob carries per-chunk checksums
pub const FLAG_CSUM: u32 = 4;
/// Unused bitmap is meaningful
pub const FLAG_HAS_UNUSED: u32 = 8;
/// Physical extents are shared with other blobs
pub const FLAG_SHARED: u32 = 16;

/// Logical blob and its physical mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Physical extents in blob order
    pub extents: PExtentVector,
    pub flags: u32,
    /// Uncompressed length, when compressed
    pub compressed_length_orig: u32,
    /// Compressed payload length, when compressed
    pub compressed_length: u32,
    /// Raw checksum algorithm code, kept as-is to preserve unknown codes
    pub csum_type: u8,
    /// log2 of the checksum chunk size
    pub csum_chunk_order: u8,
    /// Flat buffer of per-chunk checksum values
    pub csum_data: Vec<u8>,
    /// Bitmap of 1/16th regions holding no live data
    pub unused: u16,
}

impl Default for Blob {
    fn default() -> Self {
        Blob::new(0)
    }
}

impl Blob {
    pub fn new(flags: u32) -> Self {
        Blob {
            extents: Vec::new(),
            flags,
            compressed_length_orig: 0,
            compressed_length: 0,
            csum_type: ChecksumType::None as u8,
            csum_chunk_order: 0,
            csum_data: Vec::new(),
            unused: 0,
        }
    }

    /// Render flag bits as `mutable+compressed+csum+has_unused+shared`
    pub fn flags_string(flags: u32) -> String {
        [
            (FLAG_MUTABLE, "mutable"),
            (FLAG_COMPRESSED, "compressed"),
            (FLAG_CSUM, "csum"),
            (FLAG_HAS_UNUSED, "has_unused"),
            (FLAG_SHARED, "shared"),
        ]
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join("+")
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    pub fn is_mutable(&self) -> bool {
        self.has_flag(FLAG_MUTABLE)
    }

    pub fn is_compressed(&self) -> bool {
        self.has_flag(FLAG_COMPRESSED)
    }

    pub fn has_csum(&self) -> bool {
        self.has_flag(FLAG_CSUM)
    }

    pub fn has_unused(&self) -> bool {
        self.has_flag(FLAG_HAS_UNUSED)
    }

    pub fn is_shared(&self) -> bool {
        self.has_flag(FLAG_SHARED)
    }

    /// Mark the blob compressed from `orig_length` down to `length` bytes
    pub fn set_compressed(&mut self, orig_length: u32, length: u32) {
        self.set_flag(FLAG_COMPRESSED);
        self.compressed_length_orig = orig_length;
        self.compressed_length = length;
    }

    /// Sum of extent lengths, holes included
    pub fn ondisk_length(&self) -> u64 {
        self.extents.iter().map(|e| e.length as u64).sum()
    }

    /// Length of the data the blob represents
    pub fn logical_length(&self) -> u64 {
        if self.is_compressed() {
            self.compressed_length_orig as u64
        } else {
            self.ondisk_length()
        }
    }

    /// Index of the extent containing blob offset `b_off`, and the offset
    /// within that extent.
    fn locate(&self, b_off: u64) -> (usize, u64) {
        let mut b_off = b_off;
        for (i, extent) in self.extents.iter().enumerate() {
            if b_off < extent.length as u64 {
                return (i, b_off);
            }
            b_off -= extent.length as u64;
        }
        panic!("blob offset past end of {}", self);
    }

    /// True if every byte of the blob range is backed by a physical extent
    pub fn is_allocated(&self, b_off: u64, b_len: u64) -> bool {
        let (first, x_off) = self.locate(b_off);
        let mut remaining = b_len + x_off;
        for extent in &self.extents[first..] {
            if !extent.is_valid() {
                return false;
            }
            if extent.length as u64 >= remaining {
                return true;
            }
            remaining -= extent.length as u64;
        }
        panic!("blob range {:#x}~{:x} past end of {}", b_off, b_len, self);
    }

    /// Call `f` with each physical piece of the blob range, in order.
    ///
    /// Holes are passed as invalid extents. Stops at the first error.
    pub fn map<F>(&self, b_off: u64, b_len: u64, mut f: F) -> Result<()>
    where
        F: FnMut(PhysicalExtent) -> Result<()>,
    {
        if b_len == 0 {
            return Ok(());
        }
        let (first, mut x_off) = self.locate(b_off);
        let mut remaining = b_len;
        for extent in &self.extents[first..] {
            let len = (extent.length as u64 - x_off).min(remaining);
            let piece = if extent.is_valid() {
                PhysicalExtent::new(extent.offset + x_off, len as u32)
            } else {
                PhysicalExtent::invalid(len as u32)
            };
            f(piece)?;
            remaining -= len;
            if remaining == 0 {
                return Ok(());
            }
            x_off = 0;
        }
        panic!("blob range {:#x}~{:x} past end of {}", b_off, b_len, self);
    }

    /// Physical pieces of a blob range
    pub fn physical_extents(&self, b_off: u64, b_len: u64) -> PExtentVector {
        let mut pieces = PExtentVector::new();
        // the callback never fails
        let _ = self.map(b_off, b_len, |piece| {
            pieces.push(piece);
            Ok(())
        });
        pieces
    }

    /// Enable checksums and allocate a zeroed value per chunk of `length` bytes
    pub fn init_csum(&mut self, csum_type: ChecksumType, chunk_order: u8, length: u64) {
        self.set_flag(FLAG_CSUM);
        self.csum_type = csum_type as u8;
        self.csum_chunk_order = chunk_order;
        let chunks = length.div_ceil(1u64 << chunk_order) as usize;
        self.csum_data = vec![0; chunks * csum_type.value_size()];
    }

    /// Decoded checksum algorithm
    pub fn checksum_type(&self) -> Result<ChecksumType> {
        ChecksumType::from_u8(self.csum_type)
    }

    pub fn csum_chunk_size(&self) -> usize {
        1usize << self.csum_chunk_order
    }

    /// Bytes per stored value; 0 for none or an unknown algorithm
    pub fn csum_value_size(&self) -> usize {
        self.checksum_type().map_or(0, ChecksumType::value_size)
    }

    /// Number of stored checksum values
    pub fn csum_count(&self) -> usize {
        match self.csum_value_size() {
            0 => 0,
            width => self.csum_data.len() / width,
        }
    }

    /// Stored checksum value for chunk `index`
    pub fn csum_item(&self, index: usize) -> u64 {
        let csum_type = self.checksum_type().unwrap_or(ChecksumType::None);
        assert!(
            index < self.csum_count(),
            "checksum index {} out of range ({} values)",
            index,
            self.csum_count()
        );
        checksum::stored_value(csum_type, &self.csum_data, index)
    }

    /// Compute and store checksums for `data` written at blob offset `b_off`
    pub fn calc_csum(&mut self, b_off: u64, data: &[u8]) -> Result<()> {
        let csum_type = self.checksum_type()?;
        let chunk_size = self.csum_chunk_size();
        checksum::calculate(csum_type, chunk_size, b_off, data, &mut self.csum_data);
        Ok(())
    }

    /// Verify `data` read from blob offset `b_off` against stored checksums
    pub fn verify_csum(&self, b_off: u64, data: &[u8]) -> Result<()> {
        let csum_type = self.checksum_type()?;
        checksum::verify(
            csum_type,
            self.csum_chunk_size(),
            b_off,
            data,
            &self.csum_data,
        )
    }

    fn unused_chunk_size(&self, offset: u64, length: u64) -> u64 {
        let blob_len = self.logical_length();
        assert!(
            blob_len > 0 && blob_len % UNUSED_BITS == 0,
            "blob length {:#x} cannot be divided into unused regions",
            blob_len
        );
        assert!(
            offset + length <= blob_len,
            "unused range {:#x}~{:x} past blob length {:#x}",
            offset,
            length,
            blob_len
        );
        blob_len / UNUSED_BITS
    }

    /// Mark every region fully inside the range as holding no live data
    pub fn add_unused(&mut self, offset: u64, length: u64) {
        let chunk = self.unused_chunk_size(offset, length);
        let start = offset.div_ceil(chunk);
        let end = (offset + length) / chunk;
        for i in start..end {
            self.unused |= 1 << i;
        }
        if start < end {
            self.set_flag(FLAG_HAS_UNUSED);
        }
    }

    /// True if every region touched by the range is marked unused
    pub fn is_unused(&self, offset: u64, length: u64) -> bool {
        if !self.has_unused() {
            return false;
        }
        let chunk = self.unused_chunk_size(offset, length);
        let start = offset / chunk;
        let end = (offset + length).div_ceil(chunk);
        (start..end).all(|i| self.unused & (1 << i) != 0)
    }

    /// Clear the unused mark of every region touched by the range
    pub fn mark_used(&mut self, offset: u64, length: u64) {
        if !self.has_unused() {
            return;
        }
        let chunk = self.unused_chunk_size(offset, length);
        let start = offset / chunk;
        let end = (offset + length).div_ceil(chunk);
        for i in start..end {
            self.unused &= !(1 << i);
        }
        if self.unused == 0 {
            self.clear_flag(FLAG_HAS_UNUSED);
        }
    }

    /// Representative instances used by encoding and dump tests
    pub fn sample_instances() -> Vec<Blob> {
        let mut with_extent = Blob::default();
        with_extent.extents.push(PhysicalExtent::new(111, 222));

        let mut full = Blob::new(FLAG_MUTABLE);
        full.extents.push(PhysicalExtent::new(0x4010_0000, 0x10000));
        full.extents.push(PhysicalExtent::invalid(0x1000));
        full.extents.push(PhysicalExtent::new(0x4012_0000, 0x10000));
        full.init_csum(ChecksumType::Xxhash32, 16, full.ondisk_length());
        full.csum_data.copy_from_slice(b"abcdefghijkl");
        let region = full.logical_length() / UNUSED_BITS;
        full.add_unused(0, 3 * region);
        full.add_unused(8 * region, 8 * region);

        vec![Blob::default(), Blob::new(FLAG_SHARED), with_extent, full]
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob({}", ExtentsFmt(&self.extents))?;
        if self.is_compressed() {
            write!(
                f,
                " clen {:#x} -> {:#x}",
                self.compressed_length_orig, self.compressed_length
            )?;
        }
        if self.flags != 0 {
            write!(f, " {}", Blob::flags_string(self.flags))?;
        }
        if self.csum_type != ChecksumType::None as u8 {
            write!(
                f,
                " {}/{:#x}",
                checksum::type_name(self.csum_type),
                1u64 << self.csum_chunk_order
            )?;
        }
        if self.has_unused() {
            write!(f, " unused={:#x}", self.unused)?;
        }
        write!(f, ")")
    }
}

impl Dump for Blob {
    fn dump(&self) -> Value {
        let csum: Vec<u64> = (0..self.csum_count()).map(|i| self.csum_item(i)).collect();
        json!({
            "extents": self.extents.dump(),
            "compressed_length_original": self.compressed_length_orig,
            "compressed_length": self.compressed_length,
            "flags": self.flags,
            "csum_type": self.csum_type,
            "csum_chunk_order": self.csum_chunk_order,
            "csum_data": csum,
            "unused": self.unused,
        })
    }
}

impl Encode for Blob {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_seq(&self.extents);
            enc.put_u32(self.flags);
            enc.put_u32(self.compressed_length_orig);
            enc.put_u32(self.compressed_length);
            enc.put_u8(self.csum_type);
            enc.put_u8(self.csum_chunk_order);
            enc.put_bytes(&self.csum_data);
            enc.put_u16(self.unused);
        });
    }
}

impl Decode for Blob {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            let blob = Blob {
                extents: dec.get_seq()?,
                flags: dec.get_u32()?,
                compressed_length_orig: dec.get_u32()?,
                compressed_length: dec.get_u32()?,
                csum_type: dec.get_u8()?,
                csum_chunk_order: dec.get_u8()?,
                csum_data: dec.get_bytes()?,
                unused: dec.get_u16()?,
            };

            if blob.csum_chunk_order as u32 >= usize::BITS {
                return Err(MetaError::InvalidData(format!(
                    "checksum chunk order {} out of range",
                    blob.csum_chunk_order
                )));
            }
            let width = blob.csum_value_size();
            if width > 0 && blob.csum_data.len() % width != 0 {
                return Err(MetaError::InvalidData(format!(
                    "checksum buffer of {} bytes is not a multiple of {}",
                    blob.csum_data.len(),
                    width
                )));
            }
            Ok(blob)
        })
    }
}

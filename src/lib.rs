//! # Blockmeta - Space Accounting Metadata for Raw Block Devices
//!
//! `blockmeta` holds the metadata an object store keeps next to data it
//! writes straight to a block device:
//!
//! - **Reference maps** that count how many logical owners hold each byte of
//!   a shared physical range, and report ranges that drop to zero
//! - **Use trackers** that count live bytes per allocation unit (AU) so
//!   whole AUs can be freed as soon as nothing references them
//! - **Per-chunk checksums** (xxhash32/64, crc32c and truncated variants)
//! - **Blobs** mapping logical offsets onto physical extents
//!
//! Every record has a versioned little-endian binary encoding and a JSON dump.
//!
//! ## Quick Start
//!
//! ```rust
//! use blockmeta::{ExtentRefMap, PhysicalExtent};
//!
//! let mut refs = ExtentRefMap::new();
//! refs.get(0x10000, 0x4000);
//! refs.get(0x12000, 0x2000);
//!
//! let mut release = Vec::new();
//! refs.put(0x10000, 0x4000, &mut release);
//! assert_eq!(release, vec![PhysicalExtent::new(0x10000, 0x2000)]);
//! assert_eq!(refs.to_string(), "ref_map(0x12000~2000=1)");
//! ```
//!
//! ## Checksums
//!
//! ```rust
//! use blockmeta::{Blob, ChecksumType, PhysicalExtent};
//!
//! # fn main() -> blockmeta::Result<()> {
//! let mut blob = Blob::default();
//! blob.extents.push(PhysicalExtent::new(0x40000, 0x2000));
//! blob.init_csum(ChecksumType::Crc32c, 12, blob.ondisk_length());
//!
//! let data = vec![7u8; 0x2000];
//! blob.calc_csum(0, &data)?;
//! blob.verify_csum(0, &data)?;
//! # Ok(())
//! # }
//! ```
//!
//! Broken caller contracts (releasing unreferenced bytes, tracker underflow,
//! illegal splits) panic after logging through `tracing`. Malformed encoded
//! input and checksum mismatches are reported as [`MetaError`].

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{
    blob, checksum, compression, config, dump, encoding, error, extent, interval, label, ref_map,
    shared_blob, use_tracker, wal,
};

// Re-export core types that users need
pub use crate::core::{
    BdevLabel, Blob, BlobUseTracker, ChecksumType, CompressionHeader, CompressionMethod, Decode,
    Decoder, Dump, Encode, Encoder, ExtentList, ExtentRefMap, IntervalSet, MetaError,
    PExtentVector, PhysicalExtent, RefRecord, Result, SharedBlob, StoreConfig, WalOp, WalOpType,
    WalTransaction, INVALID_OFFSET,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Metadata building blocks
//!
//! - [`extent`] - physical extents and the block-granular extent list builder
//! - [`ref_map`] - run-length reference counts over device ranges
//! - [`use_tracker`] - per-AU live byte accounting for a single blob
//! - [`checksum`] - chunked checksum computation and verification
//! - [`blob`] - logical blob to physical extent mapping with checksums
//! - [`shared_blob`] - reference counts for extents shared between blobs
//! - [`compression`], [`label`], [`wal`] - plain on-disk records
//! - [`encoding`], [`dump`] - binary encoding and JSON introspection
//! - [`config`] - store-level defaults

pub mod blob;
pub mod checksum;
pub mod compression;
pub mod config;
pub mod dump;
pub mod encoding;
pub mod error;
pub mod extent;
pub mod interval;
pub mod label;
pub mod ref_map;
pub mod shared_blob;
pub mod use_tracker;
pub mod wal;

pub use blob::Blob;
pub use checksum::ChecksumType;
pub use compression::{CompressionHeader, CompressionMethod};
pub use config::StoreConfig;
pub use dump::Dump;
pub use encoding::{Decode, Decoder, Encode, Encoder};
pub use error::{MetaError, Result};
pub use extent::{ExtentList, PExtentVector, PhysicalExtent, INVALID_OFFSET};
pub use interval::IntervalSet;
pub use label::BdevLabel;
pub use ref_map::{ExtentRefMap, RefRecord};
pub use shared_blob::SharedBlob;
pub use use_tracker::BlobUseTracker;
pub use wal::{WalOp, WalOpType, WalTransaction};

//! Store-level defaults for new metadata
//!
//! Loaded from TOML:
//!
//! ```toml
//! checksum = "xxhash64"
//! csum_chunk_order = 13
//! min_alloc_size = 4096
//! compression = "lz4"
//! ```

use crate::blob::{Blob, FLAG_MUTABLE};
use crate::checksum::ChecksumType;
use crate::compression::{CompressionHeader, CompressionMethod};
use crate::error::{MetaError, Result};
use crate::use_tracker::BlobUseTracker;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Smallest and largest accepted checksum chunk orders (512 B to 16 MiB)
pub const MIN_CSUM_CHUNK_ORDER: u8 = 9;
pub const MAX_CSUM_CHUNK_ORDER: u8 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Checksum algorithm for new blobs
    pub checksum: ChecksumType,
    /// log2 of the checksum chunk size
    pub csum_chunk_order: u8,
    /// Allocation unit size in bytes
    pub min_alloc_size: u32,
    /// Codec recorded for newly compressed blobs; `none` disables compression
    pub compression: CompressionMethod,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            checksum: ChecksumType::Crc32c,
            csum_chunk_order: 12,
            min_alloc_size: 64 * 1024,
            compression: CompressionMethod::None,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        debug!("loaded store config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CSUM_CHUNK_ORDER..=MAX_CSUM_CHUNK_ORDER).contains(&self.csum_chunk_order) {
            return Err(MetaError::InvalidConfig(format!(
                "csum_chunk_order {} outside {}..={}",
                self.csum_chunk_order, MIN_CSUM_CHUNK_ORDER, MAX_CSUM_CHUNK_ORDER
            )));
        }
        if !self.min_alloc_size.is_power_of_two() {
            return Err(MetaError::InvalidConfig(format!(
                "min_alloc_size {} is not a power of two",
                self.min_alloc_size
            )));
        }
        Ok(())
    }

    pub fn csum_chunk_size(&self) -> u64 {
        1 << self.csum_chunk_order
    }

    /// Mutable blob of `length` logical bytes with checksum storage sized
    /// for the configured algorithm
    pub fn new_blob(&self, length: u64) -> Blob {
        let mut blob = Blob::new(FLAG_MUTABLE);
        if self.checksum != ChecksumType::None {
            blob.init_csum(self.checksum, self.csum_chunk_order, length);
        }
        blob
    }

    /// Immutable blob holding `orig_length` bytes compressed down to
    /// `compressed_length`, with the header that prefixes its payload.
    /// Checksums cover the compressed bytes. `None` when compression is off.
    pub fn new_compressed_blob(
        &self,
        orig_length: u32,
        compressed_length: u32,
    ) -> Option<(Blob, CompressionHeader)> {
        if self.compression == CompressionMethod::None {
            return None;
        }
        let mut blob = Blob::new(0);
        blob.set_compressed(orig_length, compressed_length);
        if self.checksum != ChecksumType::None {
            blob.init_csum(self.checksum, self.csum_chunk_order, compressed_length as u64);
        }
        Some((blob, CompressionHeader::new(self.compression, compressed_length)))
    }

    /// Tracker for a blob of `length` bytes at the configured AU size
    pub fn new_use_tracker(&self, length: u32) -> BlobUseTracker {
        BlobUseTracker::with_length(length, self.min_alloc_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checksum, ChecksumType::Crc32c);
        assert_eq!(config.csum_chunk_size(), 4096);
        assert_eq!(config.min_alloc_size, 65536);
        assert_eq!(config.compression, CompressionMethod::None);
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            checksum = "xxhash64"
            csum_chunk_order = 13
            compression = "zstd"
            "#,
        )
        .unwrap();
        assert_eq!(config.checksum, ChecksumType::Xxhash64);
        assert_eq!(config.csum_chunk_order, 13);
        assert_eq!(config.min_alloc_size, 65536);
        assert_eq!(config.compression, CompressionMethod::Zstd);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            StoreConfig::from_toml_str("csum_chunk_order = 8"),
            Err(MetaError::InvalidConfig(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("min_alloc_size = 3000"),
            Err(MetaError::InvalidConfig(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str(r#"checksum = "md5""#),
            Err(MetaError::Toml(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("bogus = 1"),
            Err(MetaError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "min_alloc_size = 4096\n").unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap().min_alloc_size, 4096);

        assert!(matches!(
            StoreConfig::load(dir.path().join("missing.toml")),
            Err(MetaError::Io(_))
        ));
    }

    #[test]
    fn test_new_blob_and_tracker() {
        let config = StoreConfig::default();
        let blob = config.new_blob(0x10000);
        assert!(blob.is_mutable());
        assert!(blob.has_csum());
        assert_eq!(blob.csum_count(), 16);

        let plain = StoreConfig {
            checksum: ChecksumType::None,
            ..Default::default()
        };
        assert!(!plain.new_blob(0x10000).has_csum());

        let tracker = config.new_use_tracker(0x30000);
        assert_eq!(tracker.au_size(), 0x10000);
        assert_eq!(tracker.num_au(), 3);
    }

    #[test]
    fn test_new_compressed_blob_uses_codec() {
        assert!(StoreConfig::default().new_compressed_blob(0x10000, 0x3000).is_none());

        let config = StoreConfig::from_toml_str(r#"compression = "lz4""#).unwrap();
        let (blob, header) = config.new_compressed_blob(0x10000, 0x3000).unwrap();
        assert!(blob.is_compressed());
        assert!(!blob.is_mutable());
        assert_eq!(blob.compressed_length_orig, 0x10000);
        assert_eq!(blob.compressed_length, 0x3000);
        assert_eq!(blob.csum_count(), 3);
        assert_eq!(header.compression_method(), Some(CompressionMethod::Lz4));
        assert_eq!(header.length, 0x3000);
    }
}

//! Chunked checksums over physical blob data
//!
//! A blob's data is divided into fixed-size chunks (a power of two). Each
//! chunk gets one checksum value, stored little-endian in a flat buffer at
//! `chunk_index * value_size`.
//!
//! | Algorithm   | Code | Stored width | Value                           |
//! |-------------|------|--------------|---------------------------------|
//! | `none`      | 1    | 0            | -                               |
//! | `xxhash32`  | 2    | 4            | xxh32, seed `0xffff_ffff`        |
//! | `xxhash64`  | 3    | 8            | xxh64, seed `u64::MAX`           |
//! | `crc32c`    | 4    | 4            | crc32c, initial `0xffff_ffff`    |
//! | `crc32c_16` | 5    | 2            | low 16 bits of `crc32c`          |
//! | `crc32c_8`  | 6    | 1            | low 8 bits of `crc32c`           |

use crate::error::{MetaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use xxhash_rust::{xxh32::xxh32, xxh64::xxh64};

/// Checksum algorithm for a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumType {
    #[serde(rename = "none")]
    None = 1,
    #[serde(rename = "xxhash32")]
    Xxhash32 = 2,
    #[serde(rename = "xxhash64")]
    Xxhash64 = 3,
    #[serde(rename = "crc32c")]
    Crc32c = 4,
    #[serde(rename = "crc32c_16")]
    Crc32c16 = 5,
    #[serde(rename = "crc32c_8")]
    Crc32c8 = 6,
}

impl ChecksumType {
    pub const ALL: [ChecksumType; 6] = [
        ChecksumType::None,
        ChecksumType::Xxhash32,
        ChecksumType::Xxhash64,
        ChecksumType::Crc32c,
        ChecksumType::Crc32c16,
        ChecksumType::Crc32c8,
    ];

    /// Convert from the on-disk code
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ChecksumType::None),
            2 => Ok(ChecksumType::Xxhash32),
            3 => Ok(ChecksumType::Xxhash64),
            4 => Ok(ChecksumType::Crc32c),
            5 => Ok(ChecksumType::Crc32c16),
            6 => Ok(ChecksumType::Crc32c8),
            _ => Err(MetaError::UnsupportedChecksum(value)),
        }
    }

    /// Bytes stored per chunk
    pub fn value_size(self) -> usize {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Xxhash32 => 4,
            ChecksumType::Xxhash64 => 8,
            ChecksumType::Crc32c => 4,
            ChecksumType::Crc32c16 => 2,
            ChecksumType::Crc32c8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumType::None => "none",
            ChecksumType::Xxhash32 => "xxhash32",
            ChecksumType::Xxhash64 => "xxhash64",
            ChecksumType::Crc32c => "crc32c",
            ChecksumType::Crc32c16 => "crc32c_16",
            ChecksumType::Crc32c8 => "crc32c_8",
        }
    }

    fn mask(self) -> u64 {
        match self.value_size() {
            8 => u64::MAX,
            n => (1u64 << (n * 8)) - 1,
        }
    }

    /// Full-width checksum of one chunk, before truncation to `value_size`
    fn compute(self, chunk: &[u8]) -> u64 {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Xxhash32 => xxh32(chunk, u32::MAX) as u64,
            ChecksumType::Xxhash64 => xxh64(chunk, u64::MAX),
            ChecksumType::Crc32c | ChecksumType::Crc32c16 | ChecksumType::Crc32c8 => {
                crc32c::crc32c_append(u32::MAX, chunk) as u64
            }
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumType {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self> {
        ChecksumType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| MetaError::InvalidConfig(format!("unknown checksum algorithm '{}'", s)))
    }
}

/// Display name for a raw algorithm code, `unknown` if unrecognized
pub fn type_name(code: u8) -> &'static str {
    ChecksumType::from_u8(code).map_or("unknown", ChecksumType::name)
}

fn check_layout(
    csum_type: ChecksumType,
    chunk_size: usize,
    b_off: u64,
    data: &[u8],
    csum_len: usize,
) -> usize {
    assert!(
        chunk_size.is_power_of_two(),
        "checksum chunk size {:#x} is not a power of two",
        chunk_size
    );
    assert!(
        b_off % chunk_size as u64 == 0,
        "checksum offset {:#x} not aligned to chunk size {:#x}",
        b_off,
        chunk_size
    );
    assert!(
        data.len() % chunk_size == 0,
        "checksum data length {:#x} not a multiple of chunk size {:#x}",
        data.len(),
        chunk_size
    );

    let first = (b_off / chunk_size as u64) as usize;
    let chunks = data.len() / chunk_size;
    assert!(
        (first + chunks) * csum_type.value_size() <= csum_len,
        "chunks {}..{} exceed checksum buffer of {} bytes",
        first,
        first + chunks,
        csum_len
    );
    first
}

/// Compute checksums for every chunk of `data`, which starts at blob offset
/// `b_off`, and store them into `csum_data`.
pub fn calculate(
    csum_type: ChecksumType,
    chunk_size: usize,
    b_off: u64,
    data: &[u8],
    csum_data: &mut [u8],
) {
    let first = check_layout(csum_type, chunk_size, b_off, data, csum_data.len());
    let width = csum_type.value_size();
    if width == 0 {
        return;
    }

    for (i, chunk) in data.chunks_exact(chunk_size).enumerate() {
        let value = csum_type.compute(chunk);
        let at = (first + i) * width;
        csum_data[at..at + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }
}

/// Read the stored value for `index` from a flat checksum buffer
pub fn stored_value(csum_type: ChecksumType, csum_data: &[u8], index: usize) -> u64 {
    let width = csum_type.value_size();
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&csum_data[index * width..(index + 1) * width]);
    u64::from_le_bytes(buf)
}

/// Recompute every chunk of `data` and compare against `csum_data`.
///
/// Returns [`MetaError::ChecksumMismatch`] for the first chunk whose stored
/// value differs, carrying the freshly computed (observed) value.
pub fn verify(
    csum_type: ChecksumType,
    chunk_size: usize,
    b_off: u64,
    data: &[u8],
    csum_data: &[u8],
) -> Result<()> {
    let first = check_layout(csum_type, chunk_size, b_off, data, csum_data.len());
    if csum_type.value_size() == 0 {
        return Ok(());
    }

    for (i, chunk) in data.chunks_exact(chunk_size).enumerate() {
        let index = first + i;
        let observed = csum_type.compute(chunk) & csum_type.mask();
        let expected = stored_value(csum_type, csum_data, index);
        if observed != expected {
            let offset = index as u64 * chunk_size as u64;
            warn!(
                "{} mismatch in chunk {} (offset {:#x}): expected {:#x}, observed {:#x}",
                csum_type, index, offset, expected, observed
            );
            return Err(MetaError::ChecksumMismatch {
                chunk: index,
                offset,
                observed,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_checksum_type_conversion() {
        for t in ChecksumType::ALL {
            assert_eq!(ChecksumType::from_u8(t as u8).unwrap(), t);
            assert_eq!(t.name().parse::<ChecksumType>().unwrap(), t);
        }
        assert!(matches!(
            ChecksumType::from_u8(0),
            Err(MetaError::UnsupportedChecksum(0))
        ));
        assert!(matches!(
            ChecksumType::from_u8(99),
            Err(MetaError::UnsupportedChecksum(99))
        ));
        assert!("sha1".parse::<ChecksumType>().is_err());
        assert_eq!(type_name(4), "crc32c");
        assert_eq!(type_name(42), "unknown");
    }

    #[test]
    fn test_value_sizes() {
        assert_eq!(ChecksumType::None.value_size(), 0);
        assert_eq!(ChecksumType::Xxhash32.value_size(), 4);
        assert_eq!(ChecksumType::Xxhash64.value_size(), 8);
        assert_eq!(ChecksumType::Crc32c.value_size(), 4);
        assert_eq!(ChecksumType::Crc32c16.value_size(), 2);
        assert_eq!(ChecksumType::Crc32c8.value_size(), 1);
    }

    #[test]
    fn test_calc_then_verify_all_algorithms() {
        let chunk = 512;
        let data = pattern(chunk * 8);
        for t in ChecksumType::ALL {
            let mut csum = vec![0u8; 8 * t.value_size()];
            calculate(t, chunk, 0, &data, &mut csum);
            assert!(verify(t, chunk, 0, &data, &csum).is_ok(), "{} failed", t);
        }
    }

    #[test]
    fn test_corruption_reports_containing_chunk() {
        let chunk = 4096;
        let mut data = pattern(chunk * 4);
        let mut csum = vec![0u8; 4 * 4];
        calculate(ChecksumType::Crc32c, chunk, 0, &data, &mut csum);

        data[2 * chunk + 17] ^= 0x01;
        let err = verify(ChecksumType::Crc32c, chunk, 0, &data, &csum).unwrap_err();
        match err {
            MetaError::ChecksumMismatch {
                chunk: index,
                offset,
                observed,
            } => {
                assert_eq!(index, 2);
                assert_eq!(offset, 2 * chunk as u64);
                let expected = crc32c::crc32c_append(u32::MAX, &data[2 * chunk..3 * chunk]);
                assert_eq!(observed, expected as u64);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_partial_range_uses_chunk_index() {
        let chunk = 512;
        let data = pattern(chunk * 2);
        let mut csum = vec![0u8; 6 * 8];

        // Chunks 3 and 4 of a 6-chunk blob
        calculate(ChecksumType::Xxhash64, chunk, 3 * chunk as u64, &data, &mut csum);
        assert!(csum[..24].iter().all(|&b| b == 0));
        assert!(csum[40..].iter().all(|&b| b == 0));
        assert_eq!(
            stored_value(ChecksumType::Xxhash64, &csum, 3),
            xxh64(&data[..chunk], u64::MAX)
        );
        assert!(verify(ChecksumType::Xxhash64, chunk, 3 * chunk as u64, &data, &csum).is_ok());
    }

    #[test]
    fn test_truncated_crc_is_masked() {
        let chunk = 512;
        let data = pattern(chunk);
        let full = crc32c::crc32c_append(u32::MAX, &data);

        let mut csum16 = vec![0u8; 2];
        calculate(ChecksumType::Crc32c16, chunk, 0, &data, &mut csum16);
        assert_eq!(
            stored_value(ChecksumType::Crc32c16, &csum16, 0),
            (full & 0xffff) as u64
        );

        let mut csum8 = vec![0u8; 1];
        calculate(ChecksumType::Crc32c8, chunk, 0, &data, &mut csum8);
        assert_eq!(csum8[0], (full & 0xff) as u8);
        assert!(verify(ChecksumType::Crc32c8, chunk, 0, &data, &csum8).is_ok());
    }

    #[test]
    fn test_none_always_verifies() {
        let data = pattern(1024);
        assert!(verify(ChecksumType::None, 512, 0, &data, &[]).is_ok());
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn test_unaligned_offset_is_fatal() {
        let data = pattern(512);
        let mut csum = vec![0u8; 16];
        calculate(ChecksumType::Crc32c, 512, 100, &data, &mut csum);
    }

    #[test]
    #[should_panic(expected = "exceed checksum buffer")]
    fn test_short_checksum_buffer_is_fatal() {
        let data = pattern(2048);
        let mut csum = vec![0u8; 4];
        calculate(ChecksumType::Crc32c, 512, 0, &data, &mut csum);
    }
}

//! Header describing a compressed blob payload
//!
//! Compressed blobs start with a small header naming the codec and the
//! compressed payload length. The codecs themselves live outside this crate;
//! only their identifiers are recorded here.
//!
//! **Format** (versioned envelope, v1): `[type: u8][length: u32]`

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

/// Codec used for a compressed blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    #[default]
    None = 0,
    /// LZ4 (fast, moderate ratio)
    Lz4 = 1,
    /// Zstd (slower, better ratio)
    Zstd = 2,
    Snappy = 3,
    Zlib = 4,
}

impl CompressionMethod {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Lz4),
            2 => Some(CompressionMethod::Zstd),
            3 => Some(CompressionMethod::Snappy),
            4 => Some(CompressionMethod::Zlib),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Zstd => "zstd",
            CompressionMethod::Snappy => "snappy",
            CompressionMethod::Zlib => "zlib",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMethod {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self> {
        [
            CompressionMethod::None,
            CompressionMethod::Lz4,
            CompressionMethod::Zstd,
            CompressionMethod::Snappy,
            CompressionMethod::Zlib,
        ]
        .into_iter()
        .find(|method| method.name() == s)
        .ok_or_else(|| MetaError::InvalidConfig(format!("unknown compression method '{}'", s)))
    }
}

/// Prefix of a compressed blob payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionHeader {
    /// Raw codec id; unknown ids from newer writers are preserved
    pub method: u8,
    /// Compressed payload length in bytes
    pub length: u32,
}

impl CompressionHeader {
    pub fn new(method: CompressionMethod, length: u32) -> Self {
        CompressionHeader {
            method: method as u8,
            length,
        }
    }

    /// Decoded codec, if this build knows it
    pub fn compression_method(&self) -> Option<CompressionMethod> {
        CompressionMethod::from_u8(self.method)
    }

    pub fn sample_instances() -> Vec<CompressionHeader> {
        vec![
            CompressionHeader::default(),
            CompressionHeader::new(CompressionMethod::Lz4, 1234),
        ]
    }
}

impl Dump for CompressionHeader {
    fn dump(&self) -> Value {
        json!({
            "type": self.method,
            "length": self.length,
        })
    }
}

impl Encode for CompressionHeader {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_u8(self.method);
            enc.put_u32(self.length);
        });
    }
}

impl Decode for CompressionHeader {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            Ok(CompressionHeader {
                method: dec.get_u8()?,
                length: dec.get_u32()?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_u8() {
        assert_eq!(CompressionMethod::from_u8(0), Some(CompressionMethod::None));
        assert_eq!(CompressionMethod::from_u8(2), Some(CompressionMethod::Zstd));
        assert_eq!(CompressionMethod::from_u8(4), Some(CompressionMethod::Zlib));
        assert_eq!(CompressionMethod::from_u8(99), None);
    }

    #[test]
    fn test_method_names() {
        assert_eq!("snappy".parse::<CompressionMethod>().unwrap(), CompressionMethod::Snappy);
        assert_eq!(CompressionMethod::Lz4.to_string(), "lz4");
        assert!(matches!(
            "brotli".parse::<CompressionMethod>(),
            Err(MetaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_header_dump() {
        let header = CompressionHeader::new(CompressionMethod::Lz4, 1234);
        let dump = header.dump();
        assert_eq!(dump["type"], 1);
        assert_eq!(dump["length"], 1234);
    }

    #[test]
    fn test_header_encoding_layout() {
        let header = CompressionHeader::new(CompressionMethod::Zstd, 0x01020304);
        assert_eq!(
            header.to_bytes(),
            vec![1, 1, 5, 0, 0, 0, 2, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_unknown_method_survives_round_trip() {
        let header = CompressionHeader {
            method: 77,
            length: 10,
        };
        let decoded = CompressionHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.compression_method(), None);
    }
}

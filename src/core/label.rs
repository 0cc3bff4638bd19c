//! Block device label
//!
//! The label sits at offset 0 of the device. It opens with a human-readable
//! preamble so that someone dumping the first sector sees what owns the
//! device:
//!
//! ```text
//! blockmeta block device\n      23 bytes
//! <uuid, hyphenated>\n          37 bytes
//! [versioned body]
//! ```
//!
//! The body carries the uuid again in binary along with the device size,
//! creation time and a free-form description.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// First line of the preamble
pub const LABEL_TAG: &[u8] = b"blockmeta block device\n";

/// Tag, hyphenated uuid and newline
pub const PREAMBLE_SIZE: usize = 60;

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdevLabel {
    pub osd_uuid: Uuid,
    /// Device size in bytes
    pub size: u64,
    /// Creation time
    pub btime: DateTime<Utc>,
    pub description: String,
}

impl Default for BdevLabel {
    fn default() -> Self {
        BdevLabel {
            osd_uuid: Uuid::nil(),
            size: 0,
            btime: DateTime::<Utc>::default(),
            description: String::new(),
        }
    }
}

impl BdevLabel {
    /// Fresh label with a random uuid, stamped now
    pub fn new(size: u64, description: impl Into<String>) -> Self {
        BdevLabel {
            osd_uuid: Uuid::new_v4(),
            size,
            btime: Utc::now(),
            description: description.into(),
        }
    }

    fn btime_string(&self) -> String {
        self.btime.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }

    pub fn sample_instances() -> Vec<BdevLabel> {
        let fakey = BdevLabel {
            size: 123,
            btime: DateTime::<Utc>::from_timestamp(4, 5000).unwrap_or_default(),
            description: "fakey".to_string(),
            ..Default::default()
        };
        vec![BdevLabel::default(), fakey]
    }
}

impl fmt::Display for BdevLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bdev(osd_uuid {} size {:#x} btime {} desc {})",
            self.osd_uuid,
            self.size,
            self.btime_string(),
            self.description
        )
    }
}

impl Dump for BdevLabel {
    fn dump(&self) -> Value {
        json!({
            "osd_uuid": self.osd_uuid.to_string(),
            "size": self.size,
            "btime": self.btime_string(),
            "description": self.description,
        })
    }
}

impl Encode for BdevLabel {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_raw(LABEL_TAG);
        enc.put_raw(self.osd_uuid.hyphenated().to_string().as_bytes());
        enc.put_raw(b"\n");
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_raw(self.osd_uuid.as_bytes());
            enc.put_u64(self.size);
            enc.put_i64(self.btime.timestamp());
            enc.put_u32(self.btime.timestamp_subsec_nanos());
            enc.put_str(&self.description);
        });
    }
}

impl Decode for BdevLabel {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        if dec.get_raw(LABEL_TAG.len())? != LABEL_TAG {
            return Err(MetaError::InvalidPreamble);
        }
        dec.skip(PREAMBLE_SIZE - LABEL_TAG.len())?;

        dec.versioned(STRUCT_V, |dec, _| {
            let osd_uuid = Uuid::from_slice(dec.get_raw(16)?)
                .map_err(|e| MetaError::InvalidData(format!("bad label uuid: {}", e)))?;
            let size = dec.get_u64()?;
            let secs = dec.get_i64()?;
            let nanos = dec.get_u32()?;
            let btime = DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| {
                MetaError::InvalidData(format!("bad label btime {}.{:09}", secs, nanos))
            })?;
            Ok(BdevLabel {
                osd_uuid,
                size,
                btime,
                description: dec.get_string()?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_layout() {
        let label = BdevLabel::new(1 << 30, "main");
        let bytes = label.to_bytes();
        assert!(bytes.starts_with(LABEL_TAG));
        let uuid_text = std::str::from_utf8(&bytes[LABEL_TAG.len()..PREAMBLE_SIZE - 1]).unwrap();
        assert_eq!(uuid_text, label.osd_uuid.to_string());
        assert_eq!(bytes[PREAMBLE_SIZE - 1], b'\n');
        // struct_v, compat_v of the body envelope
        assert_eq!(&bytes[PREAMBLE_SIZE..PREAMBLE_SIZE + 2], &[1, 1]);
    }

    #[test]
    fn test_encoding_round_trip() {
        for label in BdevLabel::sample_instances() {
            assert_eq!(BdevLabel::from_bytes(&label.to_bytes()).unwrap(), label);
        }
        let fresh = BdevLabel::new(4096, "fresh");
        assert_eq!(BdevLabel::from_bytes(&fresh.to_bytes()).unwrap(), fresh);
    }

    #[test]
    fn test_decode_rejects_foreign_device() {
        let mut bytes = BdevLabel::default().to_bytes();
        bytes[0] = b'x';
        assert!(matches!(
            BdevLabel::from_bytes(&bytes),
            Err(MetaError::InvalidPreamble)
        ));
        assert!(matches!(
            BdevLabel::from_bytes(&bytes[..10]),
            Err(MetaError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_device_bytes() {
        let label = BdevLabel::sample_instances().remove(1);
        let mut bytes = label.to_bytes();
        bytes.resize(4096, 0);
        assert_eq!(BdevLabel::from_bytes(&bytes).unwrap(), label);
    }

    #[test]
    fn test_display_and_dump() {
        let label = BdevLabel::sample_instances().remove(1);
        assert_eq!(
            label.to_string(),
            "bdev(osd_uuid 00000000-0000-0000-0000-000000000000 size 0x7b \
             btime 1970-01-01 00:00:04.000005 desc fakey)"
        );
        let dump = label.dump();
        assert_eq!(dump["size"], 123);
        assert_eq!(dump["description"], "fakey");
        assert_eq!(dump["btime"], "1970-01-01 00:00:04.000005");
    }
}

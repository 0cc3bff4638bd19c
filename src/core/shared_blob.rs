//! Shared blob: reference counts for extents owned by several blobs
//!
//! When a blob is cloned, its physical extents become shared. The shared
//! blob record keeps an [`ExtentRefMap`] so the last holder can find out
//! which ranges are free to release.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::Result;
use crate::extent::PExtentVector;
use crate::ref_map::ExtentRefMap;
use serde_json::{json, Value};
use std::fmt;

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedBlob {
    pub ref_map: ExtentRefMap,
}

impl SharedBlob {
    pub fn new() -> Self {
        SharedBlob::default()
    }

    /// Take one reference on every byte of the range
    pub fn get_ref(&mut self, offset: u64, length: u32) {
        self.ref_map.get(offset, length);
    }

    /// Drop one reference on every byte of the range, collecting ranges
    /// that are no longer referenced into `release`.
    pub fn put_ref(&mut self, offset: u64, length: u32, release: &mut PExtentVector) {
        self.ref_map.put(offset, length, release);
    }

    /// No extent is referenced any more
    pub fn is_unreferenced(&self) -> bool {
        self.ref_map.is_empty()
    }

    pub fn sample_instances() -> Vec<SharedBlob> {
        ExtentRefMap::sample_instances()
            .into_iter()
            .map(|ref_map| SharedBlob { ref_map })
            .collect()
    }
}

impl fmt::Display for SharedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shared_blob({})", self.ref_map)
    }
}

impl Dump for SharedBlob {
    fn dump(&self) -> Value {
        json!({ "ref_map": self.ref_map.dump() })
    }
}

impl Encode for SharedBlob {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| self.ref_map.encode(enc));
    }
}

impl Decode for SharedBlob {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            Ok(SharedBlob {
                ref_map: ExtentRefMap::decode(dec)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::PhysicalExtent;

    #[test]
    fn test_clone_then_release() {
        let mut shared = SharedBlob::new();
        shared.get_ref(0x10000, 0x4000);
        shared.get_ref(0x12000, 0x2000);

        let mut release = Vec::new();
        shared.put_ref(0x10000, 0x4000, &mut release);
        assert_eq!(release, vec![PhysicalExtent::new(0x10000, 0x2000)]);
        assert!(!shared.is_unreferenced());

        release.clear();
        shared.put_ref(0x12000, 0x2000, &mut release);
        assert_eq!(release, vec![PhysicalExtent::new(0x12000, 0x2000)]);
        assert!(shared.is_unreferenced());
    }

    #[test]
    fn test_display_and_dump() {
        let mut shared = SharedBlob::new();
        shared.get_ref(0x10, 0x10);
        assert_eq!(shared.to_string(), "shared_blob(ref_map(0x10~10=1))");

        let dump = shared.dump();
        assert_eq!(dump["ref_map"]["ref_map"][0]["refs"], 1);
        assert_eq!(dump["ref_map"]["ref_map"][0]["length"], 0x10);
    }

    #[test]
    fn test_encoding_round_trip() {
        for shared in SharedBlob::sample_instances() {
            let decoded = SharedBlob::from_bytes(&shared.to_bytes()).unwrap();
            assert_eq!(decoded, shared);
        }
    }
}

//! Write-ahead log records
//!
//! A [`WalTransaction`] batches deferred device operations together with the
//! ranges they release once applied. Only the record format lives here; the
//! journal and its replay are elsewhere.

use crate::dump::Dump;
use crate::encoding::{Decode, Decoder, Encode, Encoder};
use crate::error::{MetaError, Result};
use crate::extent::{PExtentVector, PhysicalExtent};
use crate::interval::IntervalSet;
use serde_json::{json, Value};

const STRUCT_V: u8 = 1;
const COMPAT_V: u8 = 1;

/// Kind of deferred operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WalOpType {
    /// Write `data` over the extents
    #[default]
    Write = 1,
    /// Copy between extents
    Copy = 2,
    /// Zero the extents
    Zero = 4,
}

impl WalOpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(WalOpType::Write),
            2 => Some(WalOpType::Copy),
            4 => Some(WalOpType::Zero),
            _ => None,
        }
    }
}

/// One deferred device operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalOp {
    pub op: WalOpType,
    pub extents: PExtentVector,
    pub data: Vec<u8>,
}

impl WalOp {
    pub fn write(extents: PExtentVector, data: Vec<u8>) -> Self {
        WalOp {
            op: WalOpType::Write,
            extents,
            data,
        }
    }

    pub fn zero(extents: PExtentVector) -> Self {
        WalOp {
            op: WalOpType::Zero,
            extents,
            data: Vec::new(),
        }
    }

    /// Total device bytes touched by the operation
    pub fn length(&self) -> u64 {
        self.extents.iter().map(|e| e.length as u64).sum()
    }

    pub fn sample_instances() -> Vec<WalOp> {
        vec![
            WalOp::default(),
            WalOp::write(
                vec![PhysicalExtent::new(1, 2), PhysicalExtent::new(100, 5)],
                b"my data".to_vec(),
            ),
        ]
    }
}

impl Dump for WalOp {
    fn dump(&self) -> Value {
        json!({
            "op": self.op as u8,
            "data_len": self.data.len(),
            "extents": self.extents.dump(),
        })
    }
}

impl Encode for WalOp {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_u8(self.op as u8);
            enc.put_seq(&self.extents);
            enc.put_bytes(&self.data);
        });
    }
}

impl Decode for WalOp {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            let code = dec.get_u8()?;
            let op = WalOpType::from_u8(code)
                .ok_or_else(|| MetaError::InvalidData(format!("unknown wal op {}", code)))?;
            Ok(WalOp {
                op,
                extents: dec.get_seq()?,
                data: dec.get_bytes()?,
            })
        })
    }
}

/// Batch of deferred operations applied atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalTransaction {
    pub seq: u64,
    pub ops: Vec<WalOp>,
    /// Device ranges to release after the ops are applied
    pub released: IntervalSet,
}

impl WalTransaction {
    pub fn new(seq: u64) -> Self {
        WalTransaction {
            seq,
            ..Default::default()
        }
    }

    pub fn push(&mut self, op: WalOp) {
        self.ops.push(op);
    }

    /// Release every extent once the transaction is applied
    pub fn release(&mut self, extents: &[PhysicalExtent]) {
        for extent in extents.iter().filter(|e| e.is_valid()) {
            self.released.insert(extent.offset, extent.length as u64);
        }
    }

    pub fn sample_instances() -> Vec<WalTransaction> {
        let mut txn = WalTransaction::new(123);
        txn.push(WalOp::default());
        txn.push(WalOp::write(
            vec![PhysicalExtent::new(1, 7)],
            b"foodata".to_vec(),
        ));
        txn.release(&[PhysicalExtent::new(0x1000, 0x1000)]);
        vec![WalTransaction::default(), txn]
    }
}

impl Dump for WalTransaction {
    fn dump(&self) -> Value {
        json!({
            "seq": self.seq,
            "ops": self.ops.dump(),
            "released extents": self.released.dump(),
        })
    }
}

impl Encode for WalTransaction {
    fn encode(&self, enc: &mut Encoder) {
        enc.versioned(STRUCT_V, COMPAT_V, |enc| {
            enc.put_u64(self.seq);
            enc.put_seq(&self.ops);
            self.released.encode(enc);
        });
    }
}

impl Decode for WalTransaction {
    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.versioned(STRUCT_V, |dec, _| {
            Ok(WalTransaction {
                seq: dec.get_u64()?,
                ops: dec.get_seq()?,
                released: IntervalSet::decode(dec)?,
            })
        })
    }
}

//! Encoding compatibility tests
//!
//! Every record type must round-trip byte-for-byte, decode bodies written by
//! a newer compatible writer, refuse incompatible ones, and report (never
//! panic on) truncated or garbage input.

use blockmeta::core::label::PREAMBLE_SIZE;
use blockmeta::{
    BdevLabel, Blob, BlobUseTracker, CompressionHeader, Decode, Dump, Encode, ExtentRefMap,
    MetaError, SharedBlob, WalOp, WalTransaction,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Helper: encodings of every sample instance of `T`
fn encodings<T: Encode>(samples: Vec<T>) -> Vec<Vec<u8>> {
    samples.iter().map(|s| s.to_bytes()).collect()
}

/// Helper: all sample encodings with the offset of their outer envelope
fn all_samples() -> Vec<(&'static str, usize, Vec<u8>)> {
    let mut out = Vec::new();
    let mut add = |name: &'static str, start: usize, bytes: Vec<Vec<u8>>| {
        out.extend(bytes.into_iter().map(|b| (name, start, b)));
    };
    add("ref_map", 0, encodings(ExtentRefMap::sample_instances()));
    add("use_tracker", 0, encodings(BlobUseTracker::sample_instances()));
    add("blob", 0, encodings(Blob::sample_instances()));
    add("shared_blob", 0, encodings(SharedBlob::sample_instances()));
    add("compression_header", 0, encodings(CompressionHeader::sample_instances()));
    add("wal_op", 0, encodings(WalOp::sample_instances()));
    add("wal_transaction", 0, encodings(WalTransaction::sample_instances()));
    add("bdev_label", PREAMBLE_SIZE, encodings(BdevLabel::sample_instances()));
    out
}

/// Decode with the decoder named `name` and re-encode the result
fn reencode(name: &str, bytes: &[u8]) -> Result<Vec<u8>, MetaError> {
    Ok(match name {
        "ref_map" => ExtentRefMap::from_bytes(bytes)?.to_bytes(),
        "use_tracker" => BlobUseTracker::from_bytes(bytes)?.to_bytes(),
        "blob" => Blob::from_bytes(bytes)?.to_bytes(),
        "shared_blob" => SharedBlob::from_bytes(bytes)?.to_bytes(),
        "compression_header" => CompressionHeader::from_bytes(bytes)?.to_bytes(),
        "wal_op" => WalOp::from_bytes(bytes)?.to_bytes(),
        "wal_transaction" => WalTransaction::from_bytes(bytes)?.to_bytes(),
        "bdev_label" => BdevLabel::from_bytes(bytes)?.to_bytes(),
        other => panic!("no decoder for {}", other),
    })
}

/// Rewrite the outer envelope as a newer writer would: bump struct_v and
/// append fields this build does not know
fn as_newer_writer(bytes: &[u8], start: usize, extra: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out[start] += 1;
    let len_at = start + 2;
    let body_len = u32::from_le_bytes(out[len_at..len_at + 4].try_into().unwrap());
    let body_end = len_at + 4 + body_len as usize;
    out.splice(body_end..body_end, extra.iter().copied());
    out[len_at..len_at + 4].copy_from_slice(&(body_len + extra.len() as u32).to_le_bytes());
    out
}

#[test]
fn test_samples_round_trip_byte_for_byte() {
    for (name, _, bytes) in all_samples() {
        let again = reencode(name, &bytes).unwrap_or_else(|e| panic!("{}: {}", name, e));
        assert_eq!(again, bytes, "{} changed across a round trip", name);
    }
}

#[test]
fn test_newer_compatible_writer_is_readable() {
    for (name, start, bytes) in all_samples() {
        let newer = as_newer_writer(&bytes, start, b"future fields");
        let again = reencode(name, &newer).unwrap_or_else(|e| panic!("{}: {}", name, e));
        assert_eq!(again, bytes, "{} lost data decoding a newer body", name);
    }
}

#[test]
fn test_incompatible_writer_is_rejected() {
    for (name, start, bytes) in all_samples() {
        let mut newer = bytes.clone();
        newer[start] = 9;
        newer[start + 1] = 9;
        assert!(
            matches!(
                reencode(name, &newer),
                Err(MetaError::UnsupportedVersion { compat_v: 9, supported: 1, .. })
            ),
            "{} accepted an incompatible encoding",
            name
        );
    }
}

#[test]
fn test_truncated_input_is_an_error() {
    for (name, _, bytes) in all_samples() {
        for len in 0..bytes.len() {
            assert!(
                reencode(name, &bytes[..len]).is_err(),
                "{} decoded from {} of {} bytes",
                name,
                len,
                bytes.len()
            );
        }
    }
}

#[test]
fn test_garbage_input_never_panics() {
    let names = [
        "ref_map",
        "use_tracker",
        "blob",
        "shared_blob",
        "compression_header",
        "wal_op",
        "wal_transaction",
        "bdev_label",
    ];
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..2000 {
        let len: usize = rng.gen_range(0..128);
        let mut bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        // Usually give it a plausible envelope header
        if len >= 6 && rng.gen_bool(0.8) {
            bytes[0] = 1;
            bytes[1] = 1;
            let body = (len - 6) as u32;
            bytes[2..6].copy_from_slice(&body.to_le_bytes());
        }
        for name in names {
            let _ = reencode(name, &bytes);
        }
    }
}

#[test]
fn test_decoded_records_dump() {
    let blob = Blob::from_bytes(&Blob::sample_instances()[3].to_bytes()).unwrap();
    assert_eq!(blob.dump()["csum_data"].as_array().unwrap().len(), 3);

    let txn = WalTransaction::from_bytes(&WalTransaction::sample_instances()[1].to_bytes()).unwrap();
    assert_eq!(txn.dump()["ops"][1]["data_len"], 7);
}

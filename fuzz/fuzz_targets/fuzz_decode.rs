#![no_main]
use blockmeta::{
    BdevLabel, Blob, BlobUseTracker, CompressionHeader, Decode, Dump, Encode, ExtentRefMap,
    SharedBlob, WalTransaction,
};
use libfuzzer_sys::fuzz_target;

/// Decoding arbitrary bytes must return an error or a value that re-encodes
/// to something that decodes to the same bytes again
fn check<T: Decode + Encode + Dump>(data: &[u8]) {
    if let Ok(value) = T::from_bytes(data) {
        let bytes = value.to_bytes();
        let again = T::from_bytes(&bytes).expect("re-encoded value must decode");
        assert_eq!(again.to_bytes(), bytes);
        let _ = value.dump();
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    match selector % 7 {
        0 => check::<ExtentRefMap>(body),
        1 => check::<BlobUseTracker>(body),
        2 => check::<Blob>(body),
        3 => check::<SharedBlob>(body),
        4 => check::<CompressionHeader>(body),
        5 => check::<WalTransaction>(body),
        _ => check::<BdevLabel>(body),
    }
});

#![no_main]
use arbitrary::Arbitrary;
use blockmeta::BlobUseTracker;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
    au_order: u8,
    num_au: u8,
    ranges: Vec<(u16, u16)>,
    split_au: u8,
}

fuzz_target!(|input: Input| {
    let au_size = 1u32 << (4 + input.au_order % 8);
    let num_au = input.num_au as u32 % 32 + 1;
    let length = au_size * num_au;
    let mut tracker = BlobUseTracker::with_length(length, au_size);

    // Clamp each range into the tracked length
    let mut held = Vec::new();
    for (offset, len) in input.ranges {
        let offset = offset as u32 % length;
        let len = (len as u32 % (length - offset)) + 1;
        let len = len.min(length - offset);
        tracker.get(offset, len);
        held.push((offset, len));
    }
    let total = tracker.referenced_bytes();
    let expected: u64 = held.iter().map(|&(_, l)| l as u64).sum();
    assert_eq!(total, expected);

    if tracker.can_split() {
        let at = (input.split_au as u32 % num_au) * au_size;
        let mut right = BlobUseTracker::new();
        tracker.split(at, &mut right);
        assert_eq!(tracker.referenced_bytes() + right.referenced_bytes(), total);
    } else {
        let mut release = Vec::new();
        for (offset, len) in held {
            tracker.put(offset, len, &mut release);
        }
        assert!(tracker.is_empty());
    }
});

#![no_main]
use arbitrary::Arbitrary;
use blockmeta::ExtentRefMap;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Get { offset: u16, length: u8 },
    Put { index: u8 },
}

fuzz_target!(|ops: Vec<Op>| {
    let mut map = ExtentRefMap::new();
    let mut outstanding: Vec<(u64, u32)> = Vec::new();

    for op in ops {
        match op {
            Op::Get { offset, length } => {
                let length = length as u32 + 1;
                map.get(offset as u64, length);
                outstanding.push((offset as u64, length));
            }
            Op::Put { index } => {
                if outstanding.is_empty() {
                    continue;
                }
                let (offset, length) = outstanding.swap_remove(index as usize % outstanding.len());
                let mut release = Vec::new();
                map.put(offset, length, &mut release);
            }
        }
        map.check();
        for &(offset, length) in &outstanding {
            assert!(map.contains(offset, length));
        }
    }

    assert_eq!(map.is_empty(), outstanding.is_empty());
});

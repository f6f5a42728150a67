#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::engine::{self, EncodeOptions, FormatFlags};
use vcdelta::vcdiff::decode_memory;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // Use first byte as control flags.
    let flags = data[0];
    let payload = &data[1..];

    // Split payload into dictionary and target.
    let split = if flags & 1 != 0 { payload.len() / 2 } else { 0 };
    let (dictionary, target) = payload.split_at(split);

    let mut format = FormatFlags::empty();
    format.set(FormatFlags::INTERLEAVED, flags & 2 != 0);
    format.set(FormatFlags::CHECKSUM, flags & 4 != 0);
    let options = EncodeOptions {
        format,
        look_for_target_matches: flags & 8 != 0,
        ..EncodeOptions::default()
    };

    let delta = engine::encode_with_options(dictionary, target, options).unwrap();
    let decoded = decode_memory(dictionary, &delta).unwrap();
    assert_eq!(decoded, target);
});

#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::vcdiff::decode_memory;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    let _ = decode_memory(&[], data);

    // Also with a non-empty dictionary.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (dictionary, delta) = data.split_at(split);
        let _ = decode_memory(dictionary, delta);
    }

    // And behind a valid SDCH file header, so window parsing is reached.
    let mut delta = vec![0xD6, 0xC3, 0xC4, b'S', 0x00];
    delta.extend_from_slice(data);
    let _ = decode_memory(&[], &delta);
});

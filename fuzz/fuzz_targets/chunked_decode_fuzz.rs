#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::vcdiff::StreamingDecoder;

fn decode(delta: &[u8], chunk: usize) -> Result<Vec<u8>, String> {
    let mut decoder = StreamingDecoder::new();
    let mut out = Vec::new();
    decoder.start_decoding(b"fuzz dictionary").map_err(|e| e.to_string())?;
    for piece in delta.chunks(chunk) {
        decoder.decode_chunk(piece, &mut out).map_err(|e| e.to_string())?;
    }
    decoder.finish_decoding().map_err(|e| e.to_string())?;
    Ok(out)
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let chunk = usize::from(data[0] % 16) + 1;
    let mut delta = vec![0xD6, 0xC3, 0xC4, 0x00, 0x00];
    delta.extend_from_slice(&data[1..]);

    // Successful output must not depend on chunk boundaries.
    if let (Ok(whole), Ok(split)) = (decode(&delta, delta.len()), decode(&delta, chunk)) {
        assert_eq!(whole, split);
    }
});

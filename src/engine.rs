// Delta engine: ties hash/matching to VCDIFF encoding/decoding.
//
// Provides high-level encode/decode APIs that orchestrate:
//   - Block matching (hash module) to find COPY/RUN/ADD instructions
//   - A `DeltaWriter` (VCDIFF or JSON) to produce the delta stream
//   - The streaming decoder to reconstruct the target from dictionary + delta
//
// The encoder is a session: `start_encoding` writes the file header, every
// `encode_chunk` call produces one window, `finish_encoding` closes the
// stream.  The dictionary index is immutable and may be shared by any
// number of sessions.

use std::sync::Arc;

use bitflags::bitflags;
use log::debug;

use crate::hash::{DictionaryIndex, MatchEngine};
use crate::vcdiff::checksum::adler32;
use crate::vcdiff::code_table::CodeTable;
use crate::vcdiff::decoder;
use crate::vcdiff::error::{DecodeError, EncodeError};
use crate::vcdiff::header::Version;
use crate::vcdiff::writer::{CodeTableWriter, DeltaWriter};

// ---------------------------------------------------------------------------
// Encode options
// ---------------------------------------------------------------------------

bitflags! {
    /// Output format switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatFlags: u8 {
        /// One interleaved section per window (SDCH).
        const INTERLEAVED = 1 << 0;
        /// Adler-32 checksum of each target window (SDCH).
        const CHECKSUM = 1 << 1;
        /// JSON array instead of VCDIFF (feature `json`).
        const JSON = 1 << 2;
    }
}

/// A custom code table to embed in the file header.
#[derive(Debug, Clone)]
pub struct CustomCodeTable {
    pub near_cache_size: u8,
    pub same_cache_size: u8,
    pub table: Arc<CodeTable>,
}

/// Configuration for delta encoding.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub format: FormatFlags,
    /// Also look for matches inside the target window being encoded.
    pub look_for_target_matches: bool,
    /// Windows after the first copy from the previous window's target data
    /// (VCD_TARGET) instead of the dictionary.
    pub vcd_target: bool,
    pub code_table: Option<CustomCodeTable>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            format: FormatFlags::empty(),
            look_for_target_matches: true,
            vcd_target: false,
            code_table: None,
        }
    }
}

impl EncodeOptions {
    /// Version byte the options require: `'S'` when any SDCH extension is used.
    pub fn version(&self) -> Version {
        if self
            .format
            .intersects(FormatFlags::INTERLEAVED | FormatFlags::CHECKSUM)
        {
            Version::Sdch
        } else {
            Version::Standard
        }
    }

    fn build_writer(&self) -> Result<Box<dyn DeltaWriter + Send>, EncodeError> {
        if self.format.contains(FormatFlags::JSON) {
            #[cfg(feature = "json")]
            return Ok(Box::new(crate::vcdiff::json::JsonWriter::new()));
            #[cfg(not(feature = "json"))]
            return Err(EncodeError::Usage("JSON output requires the `json` feature"));
        }
        let interleaved = self.format.contains(FormatFlags::INTERLEAVED);
        let writer = match &self.code_table {
            Some(custom) => CodeTableWriter::with_code_table(
                interleaved,
                custom.near_cache_size,
                custom.same_cache_size,
                Arc::clone(&custom.table),
            )?,
            None => CodeTableWriter::new(interleaved),
        };
        Ok(Box::new(writer))
    }
}

// ---------------------------------------------------------------------------
// Streaming encoder
// ---------------------------------------------------------------------------

/// Encoder session over a shared dictionary index.
///
/// ```
/// use std::sync::Arc;
/// use vcdelta::engine::{EncodeOptions, StreamingEncoder};
/// use vcdelta::hash::DictionaryIndex;
///
/// let index = Arc::new(DictionaryIndex::new(b"The quick brown fox jumps over the lazy dog"));
/// let mut encoder = StreamingEncoder::new(index, EncodeOptions::default());
/// let mut delta = Vec::new();
/// encoder.start_encoding(&mut delta).unwrap();
/// encoder.encode_chunk(b"The quick brown fox jumps over the lazy cat", &mut delta).unwrap();
/// encoder.finish_encoding(&mut delta).unwrap();
///
/// let decoded = vcdelta::engine::decode(b"The quick brown fox jumps over the lazy dog", &delta).unwrap();
/// assert_eq!(decoded, b"The quick brown fox jumps over the lazy cat");
/// ```
pub struct StreamingEncoder {
    index: Arc<DictionaryIndex>,
    options: EncodeOptions,
    writer: Option<Box<dyn DeltaWriter + Send>>,
    /// Previous window's target data and its position, for VCD_TARGET.
    previous: Option<(u64, Vec<u8>)>,
    target_bytes: u64,
    windows: u64,
}

impl StreamingEncoder {
    pub fn new(index: Arc<DictionaryIndex>, options: EncodeOptions) -> Self {
        Self {
            index,
            options,
            writer: None,
            previous: None,
            target_bytes: 0,
            windows: 0,
        }
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Target bytes encoded by the current (or last) session.
    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    /// Windows emitted by the current (or last) session.
    pub fn windows(&self) -> u64 {
        self.windows
    }

    /// Begin a session and append the file header to `out`.
    pub fn start_encoding(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.writer.is_some() {
            return Err(EncodeError::Usage("start_encoding called twice without finish_encoding"));
        }
        let mut writer = self.options.build_writer()?;
        writer.write_header(self.options.version(), out)?;
        self.writer = Some(writer);
        self.previous = None;
        self.target_bytes = 0;
        self.windows = 0;
        Ok(())
    }

    /// Encode `data` as one window and append it to `out`.  Empty chunks
    /// produce no output.
    pub fn encode_chunk(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(EncodeError::Usage("encode_chunk called before start_encoding"));
        };
        if data.is_empty() {
            return Ok(());
        }

        let look = self.options.look_for_target_matches;
        match self.previous.take() {
            Some((position, previous)) if self.options.vcd_target => {
                let index = DictionaryIndex::new(&previous);
                writer.init_target_segment(position, previous.len() as u64)?;
                MatchEngine::new(&index, look).encode(data, writer.as_mut())?;
            }
            _ => {
                writer.init(self.index.dictionary().len() as u64)?;
                MatchEngine::new(&self.index, look).encode(data, writer.as_mut())?;
            }
        }
        if self.options.format.contains(FormatFlags::CHECKSUM) {
            writer.add_checksum(adler32(data));
        }
        let before = out.len();
        writer.output(out)?;
        debug!(
            "window {}: {} target bytes -> {} delta bytes",
            self.windows,
            data.len(),
            out.len() - before
        );

        if self.options.vcd_target {
            self.previous = Some((self.target_bytes, data.to_vec()));
        }
        self.target_bytes += data.len() as u64;
        self.windows += 1;
        Ok(())
    }

    /// End the session, appending any trailer to `out`.
    pub fn finish_encoding(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let Some(mut writer) = self.writer.take() else {
            return Err(EncodeError::Usage("finish_encoding called before start_encoding"));
        };
        self.previous = None;
        writer.finish(out)
    }
}

// ---------------------------------------------------------------------------
// High-level encode / decode
// ---------------------------------------------------------------------------

/// Encode `target` against `dictionary` as a single-window VCDIFF delta.
pub fn encode(dictionary: &[u8], target: &[u8]) -> Result<Vec<u8>, EncodeError> {
    encode_with_options(dictionary, target, EncodeOptions::default())
}

/// Encode with custom options.
pub fn encode_with_options(
    dictionary: &[u8],
    target: &[u8],
    options: EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    let index = Arc::new(DictionaryIndex::new(dictionary));
    let mut encoder = StreamingEncoder::new(index, options);
    let mut out = Vec::new();
    encoder.start_encoding(&mut out)?;
    encoder.encode_chunk(target, &mut out)?;
    encoder.finish_encoding(&mut out)?;
    Ok(out)
}

/// Decode a VCDIFF delta, reconstructing the target.
pub fn decode(dictionary: &[u8], delta: &[u8]) -> Result<Vec<u8>, DecodeError> {
    decoder::decode_memory(dictionary, delta)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_with(dictionary: &[u8], target: &[u8], options: EncodeOptions) -> Vec<u8> {
        let delta = encode_with_options(dictionary, target, options).expect("encode failed");
        let reconstructed = decode(dictionary, &delta).expect("decode failed");
        assert_eq!(
            reconstructed,
            target,
            "roundtrip mismatch (dictionary={}, target={}, delta={})",
            dictionary.len(),
            target.len(),
            delta.len()
        );
        delta
    }

    fn roundtrip(dictionary: &[u8], target: &[u8]) -> Vec<u8> {
        roundtrip_with(dictionary, target, EncodeOptions::default())
    }

    fn all_formats() -> Vec<EncodeOptions> {
        [
            FormatFlags::empty(),
            FormatFlags::INTERLEAVED,
            FormatFlags::CHECKSUM,
            FormatFlags::INTERLEAVED | FormatFlags::CHECKSUM,
        ]
        .into_iter()
        .map(|format| EncodeOptions {
            format,
            ..EncodeOptions::default()
        })
        .collect()
    }

    #[test]
    fn roundtrip_identical() {
        let data = b"The quick brown fox jumps over the lazy dog.";
        roundtrip(data, data);
    }

    #[test]
    fn roundtrip_small_edit() {
        let dictionary = b"Hello, world! This is a test of the delta engine.";
        let target = b"Hello, earth! This is a test of the delta engine.";
        roundtrip(dictionary, target);
    }

    #[test]
    fn roundtrip_no_dictionary() {
        roundtrip(b"", b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    }

    #[test]
    fn empty_target_is_header_only() {
        let delta = roundtrip(b"some dictionary", b"");
        assert_eq!(delta, [0xD6, 0xC3, 0xC4, 0x00, 0x00]);
    }

    #[test]
    fn roundtrip_all_formats() {
        let dictionary = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789abcdefghijklmnopqrstuvwxyz";
        let target = b"ABCDEFGHIJKLMNOP--CHANGED--UVWXYZ0123456789abcdefghijklmnopqrstuvwxyz!!!";
        for options in all_formats() {
            let delta = roundtrip_with(dictionary, target, options.clone());
            assert_eq!(delta[3], options.version().byte());
        }
    }

    #[test]
    fn roundtrip_binary_and_runs() {
        let dictionary: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let mut target = dictionary.clone();
        target[100] = 0xFF;
        target[200] = 0x00;
        target.extend_from_slice(&[0u8; 300]);
        target.extend_from_slice("non-ASCII: é ü 字".as_bytes());
        for options in all_formats() {
            roundtrip_with(&dictionary, &target, options);
        }
    }

    #[test]
    fn delta_is_smaller_for_similar_data() {
        let dictionary: Vec<u8> = (0..=255).cycle().take(8192).collect();
        let mut target = dictionary.clone();
        target[4096] ^= 0xFF;
        let delta = roundtrip(&dictionary, &target);
        assert!(
            delta.len() < target.len() / 10,
            "delta ({}) should be much smaller than target ({})",
            delta.len(),
            target.len()
        );
    }

    #[test]
    fn streaming_windows_with_vcd_target() {
        let chunk: Vec<u8> = (0..100u8).collect();
        let options = EncodeOptions {
            vcd_target: true,
            format: FormatFlags::CHECKSUM,
            ..EncodeOptions::default()
        };
        let mut encoder = StreamingEncoder::new(Arc::new(DictionaryIndex::new(b"")), options);
        let mut delta = Vec::new();
        encoder.start_encoding(&mut delta).unwrap();
        for _ in 0..3 {
            encoder.encode_chunk(&chunk, &mut delta).unwrap();
        }
        encoder.finish_encoding(&mut delta).unwrap();
        assert_eq!(encoder.windows(), 3);
        assert_eq!(encoder.target_bytes(), 300);
        // Later windows copy the previous one whole.
        assert!(delta.len() < 100 + 3 * 20, "delta is {} bytes", delta.len());
        assert_eq!(decode(b"", &delta).unwrap(), chunk.repeat(3));
    }

    #[test]
    fn custom_code_table_round_trip() {
        let mut table = (*CodeTable::default_table()).clone();
        let mut bytes = table.to_bytes();
        // Swap the fixed sizes of two ADD opcodes.
        bytes.swap(512 + 2, 512 + 3);
        table = CodeTable::from_bytes(&bytes).unwrap();
        let options = EncodeOptions {
            code_table: Some(CustomCodeTable {
                near_cache_size: 4,
                same_cache_size: 3,
                table: Arc::new(table),
            }),
            ..EncodeOptions::default()
        };
        let dictionary = b"custom tables still copy from the dictionary";
        let target = b"custom tables still copy from the dictionary, then add";
        let delta = roundtrip_with(dictionary, target, options);
        assert_eq!(delta[4], 0x02);
    }

    #[test]
    fn usage_errors() {
        let mut encoder = StreamingEncoder::new(Arc::new(DictionaryIndex::new(b"")), EncodeOptions::default());
        let mut out = Vec::new();
        assert!(matches!(encoder.encode_chunk(b"x", &mut out), Err(EncodeError::Usage(_))));
        assert!(matches!(encoder.finish_encoding(&mut out), Err(EncodeError::Usage(_))));
        encoder.start_encoding(&mut out).unwrap();
        assert!(matches!(encoder.start_encoding(&mut out), Err(EncodeError::Usage(_))));
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_output() {
        let options = EncodeOptions {
            format: FormatFlags::JSON,
            ..EncodeOptions::default()
        };
        let dictionary = b"0123456789abcdefghij";
        let delta = encode_with_options(dictionary, b"0123456789abcdefghij and more", options).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&delta).unwrap();
        assert_eq!(value, serde_json::json!([0, 20, " and more"]));
    }
}

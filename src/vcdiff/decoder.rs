// Streaming VCDIFF decoder.
//
// The caller feeds the delta in chunks of any size.  Bytes that cannot be
// parsed yet stay in a pending buffer; everything already parsed is
// committed and never re-read.  Output is written to the sink one complete
// window at a time, so chunking never changes what the sink receives.
//
// A file header announcing a custom code table is followed by a complete
// nested delta that rebuilds the table from the default table's canonical
// bytes.  That nested delta is decoded by a second session reading from the
// same input, then the validated table replaces the default one.

use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

use log::{debug, trace, warn};

use super::address_cache::AddressCache;
use super::code_table::{CODE_TABLE_BYTES, CodeTable};
use super::cursor::Cursor;
use super::error::{DecodeError, FormatError, ParseError};
use super::header::FileHeader;
use super::window::{WindowDecoder, WindowStatus};

/// Default cap on a single target window.
pub const DEFAULT_MAX_TARGET_WINDOW_SIZE: u64 = 64 << 20;
/// Default cap on the total decoded size.
pub const DEFAULT_MAX_TARGET_FILE_SIZE: u64 = 64 << 20;

/// Decoder limits and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Largest target window accepted.
    pub max_target_window_size: u64,
    /// Largest cumulative target accepted.
    pub max_target_file_size: u64,
    /// Whether windows may copy from previously decoded target data.
    pub allow_vcd_target: bool,
    /// Exact expected target size, when known in advance.
    pub planned_target_file_size: Option<u64>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_target_window_size: DEFAULT_MAX_TARGET_WINDOW_SIZE,
            max_target_file_size: DEFAULT_MAX_TARGET_FILE_SIZE,
            allow_vcd_target: true,
            planned_target_file_size: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

enum Stage {
    FileHeader,
    CodeTable(Box<CustomTable>),
    Windows(WindowDecoder),
}

/// A custom code table being rebuilt from the nested delta.
struct CustomTable {
    near: u8,
    same: u8,
    header: FileHeader,
    session: Session,
}

/// State of one decode, from file header to the last window.
struct Session {
    dictionary: Vec<u8>,
    /// Decoded target reachable by VCD_TARGET windows, followed by the
    /// window in progress.
    history: Vec<u8>,
    total_decoded: u64,
    stage: Stage,
    config: DecoderConfig,
    /// Set for the session decoding a custom code table.
    nested: bool,
}

impl Session {
    fn new(dictionary: Vec<u8>, config: DecoderConfig) -> Self {
        Self {
            dictionary,
            history: Vec::new(),
            total_decoded: 0,
            stage: Stage::FileHeader,
            config,
            nested: false,
        }
    }

    fn code_table(near: u8, same: u8, header: FileHeader) -> CustomTable {
        let config = DecoderConfig {
            planned_target_file_size: Some(CODE_TABLE_BYTES as u64),
            ..DecoderConfig::default()
        };
        let mut session = Session::new(CodeTable::default_table_bytes().to_vec(), config);
        session.nested = true;
        CustomTable {
            near,
            same,
            header,
            session,
        }
    }

    /// Consume as much of `cursor` as possible, writing completed windows to
    /// `sink`.  Returns once the input is exhausted.
    fn run(&mut self, cursor: &mut Cursor<'_>, sink: &mut dyn Write) -> Result<(), DecodeError> {
        loop {
            match &mut self.stage {
                Stage::FileHeader => {
                    let start = cursor.offset();
                    let header = match FileHeader::parse(cursor) {
                        Ok(header) => header,
                        Err(ParseError::NeedMoreData) => return Ok(()),
                        Err(ParseError::Malformed(kind)) => {
                            return Err(DecodeError::at(start + file_header_error_position(&kind), kind));
                        }
                    };
                    debug!(
                        "file header: version {:?}, custom code table {:?}",
                        header.version, header.custom_cache_sizes
                    );
                    self.stage = match header.custom_cache_sizes {
                        None => Stage::Windows(WindowDecoder::new(header.version)),
                        Some(_) if self.nested => {
                            return Err(DecodeError::at(
                                start,
                                FormatError::InvalidCodeTable("nested custom code table".into()),
                            ));
                        }
                        Some((near, same)) => {
                            AddressCache::new(near, same).map_err(|kind| DecodeError::at(start, kind))?;
                            Stage::CodeTable(Box::new(Self::code_table(near, same, header)))
                        }
                    };
                }
                Stage::CodeTable(custom) => {
                    let start = cursor.offset();
                    custom.session.run(cursor, &mut io::sink())?;
                    if custom.session.total_decoded < CODE_TABLE_BYTES as u64 {
                        return Ok(());
                    }
                    let windows = custom.install().map_err(|kind| DecodeError::at(start, kind))?;
                    debug!("custom code table installed at offset {}", cursor.offset());
                    self.stage = Stage::Windows(windows);
                }
                Stage::Windows(windows) => {
                    if self.nested && Some(self.total_decoded) == self.config.planned_target_file_size {
                        return Ok(());
                    }
                    if cursor.is_empty() {
                        return Ok(());
                    }
                    let status = windows.decode(
                        cursor,
                        &self.dictionary,
                        &mut self.history,
                        self.total_decoded,
                        &self.config,
                    )?;
                    let WindowStatus::Complete(range) = status else {
                        return Ok(());
                    };
                    trace!("emitting {} decoded bytes", range.len());
                    sink.write_all(&self.history[range.clone()])?;
                    self.total_decoded += range.len() as u64;
                    if !self.config.allow_vcd_target {
                        self.history.clear();
                    }
                }
            }
        }
    }

    /// True while an interleaved window body still expects bytes.
    fn awaiting_interleaved_data(&self) -> bool {
        matches!(&self.stage, Stage::Windows(windows) if windows.more_data_expected())
    }

    /// True when the session stopped at a clean boundary.
    fn is_complete(&self) -> bool {
        match &self.stage {
            Stage::FileHeader => true,
            Stage::CodeTable(_) => false,
            Stage::Windows(windows) => !windows.in_window(),
        }
    }
}

impl CustomTable {
    /// Validate the rebuilt table and produce a window decoder using it.
    fn install(&self) -> Result<WindowDecoder, FormatError> {
        let table = CodeTable::from_bytes(&self.session.history)?;
        let cache = AddressCache::new(self.near, self.same)?;
        table.validate(cache.max_mode())?;
        let mut windows = WindowDecoder::new(self.header.version);
        windows.set_code_table(Arc::new(table), cache);
        Ok(windows)
    }
}

/// Position within the file header of the byte a header error refers to.
fn file_header_error_position(kind: &FormatError) -> u64 {
    match kind {
        FormatError::BadMagic { index, .. } => *index as u64,
        FormatError::UnsupportedVersion(_) => 3,
        _ => 4,
    }
}

// ---------------------------------------------------------------------------
// StreamingDecoder
// ---------------------------------------------------------------------------

/// Incremental decoder: `start_decoding`, any number of `decode_chunk`
/// calls, then `finish_decoding`.
///
/// ```
/// use vcdelta::vcdiff::StreamingDecoder;
///
/// // Header, then one window that ADDs "hi".
/// let delta = [0xD6, 0xC3, 0xC4, 0x00, 0x00, 0x00, 0x08, 0x02, 0x00, 0x02, 0x01, 0x00, b'h', b'i', 0x03];
/// let mut decoder = StreamingDecoder::new();
/// decoder.start_decoding(b"").unwrap();
/// let mut out = Vec::new();
/// for byte in delta.chunks(1) {
///     decoder.decode_chunk(byte, &mut out).unwrap();
/// }
/// decoder.finish_decoding().unwrap();
/// assert_eq!(out, b"hi");
/// ```
#[derive(Default)]
pub struct StreamingDecoder {
    config: DecoderConfig,
    session: Option<Session>,
    pending: Vec<u8>,
    /// Absolute stream offset of `pending[0]`.
    offset: u64,
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn configure(&mut self, update: impl FnOnce(&mut DecoderConfig)) -> Result<(), DecodeError> {
        if self.session.is_some() {
            return Err(DecodeError::Usage("decoder settings cannot change while decoding"));
        }
        update(&mut self.config);
        Ok(())
    }

    pub fn set_max_target_window_size(&mut self, size: u64) -> Result<(), DecodeError> {
        self.configure(|c| c.max_target_window_size = size)
    }

    pub fn set_max_target_file_size(&mut self, size: u64) -> Result<(), DecodeError> {
        self.configure(|c| c.max_target_file_size = size)
    }

    pub fn set_allow_vcd_target(&mut self, allow: bool) -> Result<(), DecodeError> {
        self.configure(|c| c.allow_vcd_target = allow)
    }

    pub fn set_planned_target_file_size(&mut self, size: Option<u64>) -> Result<(), DecodeError> {
        self.configure(|c| c.planned_target_file_size = size)
    }

    /// Begin a new decode against `dictionary`, which is copied.
    pub fn start_decoding(&mut self, dictionary: &[u8]) -> Result<(), DecodeError> {
        if self.session.is_some() {
            return Err(DecodeError::Usage("start_decoding called twice without finish_decoding"));
        }
        self.session = Some(Session::new(dictionary.to_vec(), self.config));
        self.pending.clear();
        self.offset = 0;
        Ok(())
    }

    /// Whether a session is in progress.
    pub fn is_decoding(&self) -> bool {
        self.session.is_some()
    }

    /// Feed the next piece of the delta.  Every window completed by this
    /// chunk is written to `sink`.  Any error ends the session.
    pub fn decode_chunk<W: Write>(&mut self, data: &[u8], sink: &mut W) -> Result<(), DecodeError> {
        let Some(session) = self.session.as_mut() else {
            return Err(DecodeError::Usage("decode_chunk called before start_decoding"));
        };

        let result = if self.pending.is_empty() {
            let mut cursor = Cursor::with_base(data, self.offset);
            let result = session.run(&mut cursor, sink);
            self.offset = cursor.offset();
            self.pending.extend_from_slice(cursor.remaining());
            result
        } else {
            self.pending.extend_from_slice(data);
            let mut cursor = Cursor::with_base(&self.pending, self.offset);
            let result = session.run(&mut cursor, sink);
            let consumed = cursor.position();
            self.offset = cursor.offset();
            self.pending.drain(..consumed);
            result
        };

        if let Err(e) = &result {
            warn!("delta decoding failed, session reset: {e}");
            self.reset();
        }
        result
    }

    /// End the session.  Fails if the stream stopped inside a window, a
    /// file header or a custom code table.
    pub fn finish_decoding(&mut self) -> Result<(), DecodeError> {
        let Some(session) = self.session.take() else {
            return Err(DecodeError::Usage("finish_decoding called before start_decoding"));
        };
        let pending = mem::take(&mut self.pending);
        let end = self.offset + pending.len() as u64;
        self.offset = 0;
        if !pending.is_empty() || !session.is_complete() {
            if session.awaiting_interleaved_data() {
                warn!("delta stream truncated inside an interleaved window at offset {end}");
            } else {
                warn!("delta stream truncated at offset {end}");
            }
            return Err(DecodeError::at(end, FormatError::Truncated));
        }
        debug!("decoding finished: {} bytes", session.total_decoded);
        Ok(())
    }

    fn reset(&mut self) {
        self.session = None;
        self.pending.clear();
        self.offset = 0;
    }
}

/// Decode a complete in-memory delta.
pub fn decode_memory(dictionary: &[u8], delta: &[u8]) -> Result<Vec<u8>, DecodeError> {
    decode_memory_with_config(dictionary, delta, DecoderConfig::default())
}

/// Decode a complete in-memory delta with explicit limits.
pub fn decode_memory_with_config(
    dictionary: &[u8],
    delta: &[u8],
    config: DecoderConfig,
) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = StreamingDecoder::with_config(config);
    let mut out = Vec::new();
    decoder.start_decoding(dictionary)?;
    decoder.decode_chunk(delta, &mut out)?;
    decoder.finish_decoding()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::error::Limit;

    const HEADER: [u8; 5] = [0xD6, 0xC3, 0xC4, 0x00, 0x00];

    /// File header plus one window that ADDs `text` (≤ 17 bytes).
    fn add_delta(text: &[u8]) -> Vec<u8> {
        let n = text.len() as u8;
        let mut delta = HEADER.to_vec();
        delta.extend_from_slice(&[0x00, 6 + n, n, 0x00, n, 1, 0]);
        delta.extend_from_slice(text);
        delta.push(1 + n);
        delta
    }

    #[test]
    fn decodes_in_one_call() {
        assert_eq!(decode_memory(b"", &add_delta(b"hello")).unwrap(), b"hello");
    }

    #[test]
    fn output_only_for_complete_windows() {
        let delta = add_delta(b"hello");
        let mut decoder = StreamingDecoder::new();
        decoder.start_decoding(b"").unwrap();
        let mut out = Vec::new();
        decoder.decode_chunk(&delta[..delta.len() - 1], &mut out).unwrap();
        assert!(out.is_empty());
        decoder.decode_chunk(&delta[delta.len() - 1..], &mut out).unwrap();
        assert_eq!(out, b"hello");
        decoder.finish_decoding().unwrap();
    }

    #[test]
    fn usage_errors() {
        let mut decoder = StreamingDecoder::new();
        let mut out = Vec::new();
        assert!(matches!(
            decoder.decode_chunk(b"x", &mut out),
            Err(DecodeError::Usage(_))
        ));
        assert!(matches!(decoder.finish_decoding(), Err(DecodeError::Usage(_))));
        decoder.start_decoding(b"").unwrap();
        assert!(matches!(decoder.start_decoding(b""), Err(DecodeError::Usage(_))));
        assert!(matches!(
            decoder.set_max_target_window_size(10),
            Err(DecodeError::Usage(_))
        ));
        decoder.finish_decoding().unwrap();
        decoder.set_max_target_window_size(10).unwrap();
        assert_eq!(decoder.config().max_target_window_size, 10);
    }

    #[test]
    fn error_resets_session() {
        let mut decoder = StreamingDecoder::new();
        decoder.start_decoding(b"").unwrap();
        let mut out = Vec::new();
        let err = decoder.decode_chunk(b"\xD6\xC3X", &mut out).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Format {
                offset: 2,
                kind: FormatError::BadMagic { index: 2, found: b'X' }
            }
        ));
        assert!(!decoder.is_decoding());
        assert!(matches!(
            decoder.decode_chunk(b"", &mut out),
            Err(DecodeError::Usage(_))
        ));
    }

    #[test]
    fn truncated_stream_fails_on_finish() {
        let delta = add_delta(b"abc");
        for cut in (1..delta.len()).filter(|&cut| cut != HEADER.len()) {
            let mut decoder = StreamingDecoder::new();
            decoder.start_decoding(b"").unwrap();
            let mut out = Vec::new();
            decoder.decode_chunk(&delta[..cut], &mut out).unwrap();
            let err = decoder.finish_decoding().unwrap_err();
            assert_eq!(err.format_error(), Some(&FormatError::Truncated), "cut {cut}");
        }
    }

    #[test]
    fn empty_stream_finishes_cleanly() {
        let mut decoder = StreamingDecoder::new();
        decoder.start_decoding(b"dict").unwrap();
        decoder.finish_decoding().unwrap();
        assert_eq!(decode_memory(b"dict", &HEADER).unwrap(), b"");
    }

    #[test]
    fn file_limit_is_cumulative() {
        let mut delta = add_delta(b"abcd");
        delta.extend_from_slice(&add_delta(b"efgh")[HEADER.len()..]);
        let config = DecoderConfig {
            max_target_file_size: 6,
            ..DecoderConfig::default()
        };
        let mut decoder = StreamingDecoder::with_config(config);
        decoder.start_decoding(b"").unwrap();
        let mut out = Vec::new();
        let err = decoder.decode_chunk(&delta, &mut out).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LimitExceeded {
                limit: Limit::TargetFile,
                size: 8,
                max: 6,
                ..
            }
        ));
        // The first window was complete and already emitted.
        assert_eq!(out, b"abcd");
    }

    #[test]
    fn history_is_dropped_without_vcd_target() {
        let mut delta = add_delta(b"abcd");
        delta.extend_from_slice(&add_delta(b"efgh")[HEADER.len()..]);
        let config = DecoderConfig {
            allow_vcd_target: false,
            ..DecoderConfig::default()
        };
        assert_eq!(decode_memory_with_config(b"", &delta, config).unwrap(), b"abcdefgh");
    }
}

// Delta window decoder.
//
// One window at a time, as an explicit state machine:
//
//   AwaitingHeader ──header parsed──▶ Body ──target complete──▶ AwaitingHeader
//
// The header is parsed atomically: until every header field (and, for the
// standard layout, the whole body) is available the call reports
// `NeedMoreData` and the header is parsed again next time.  Entering `Body`
// resets the address cache.  Only interleaved windows can stay in `Body`
// across calls; their progress is the remaining interleaved byte budget
// plus the reader's pending half-opcode.

use std::ops::Range;
use std::sync::Arc;

use log::{debug, trace};

use super::address_cache::AddressCache;
use super::checksum::adler32;
use super::code_table::{CodeTable, Instruction};
use super::cursor::Cursor;
use super::decoder::DecoderConfig;
use super::error::{DecodeError, FormatError, Limit, ParseError, ParseResult, Section};
use super::header::{HeaderParser, SectionLengths, SourceSegment, Version, WinIndicator};
use super::reader::CodeTableReader;

/// Outcome of a `WindowDecoder::decode` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowStatus {
    /// The window is complete; its bytes are this range of the target buffer.
    Complete(Range<usize>),
    /// More input is needed before the window can make progress.
    NeedMoreData,
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// Three separate sections, all present in the input.
    Standard(SectionLengths),
    /// One combined stream with `remaining` bytes not yet consumed.
    Interleaved { remaining: usize },
}

#[derive(Debug, Clone, Copy)]
struct WindowBody {
    segment: SourceSegment,
    target_length: usize,
    /// Index in the target buffer of this window's first byte.
    window_start: usize,
    checksum: Option<u32>,
    layout: Layout,
}

#[derive(Debug, Clone, Copy)]
enum WindowState {
    AwaitingHeader,
    Body(WindowBody),
}

/// Section cursors for the instruction loop.  In the interleaved layout the
/// data and address sections are the instruction stream itself.
struct Sections<'a> {
    inst: Cursor<'a>,
    data: Option<Cursor<'a>>,
    addr: Option<Cursor<'a>>,
}

impl<'a> Sections<'a> {
    fn data(&mut self) -> &mut Cursor<'a> {
        match &mut self.data {
            Some(data) => data,
            None => &mut self.inst,
        }
    }

    fn addr(&mut self) -> &mut Cursor<'a> {
        match &mut self.addr {
            Some(addr) => addr,
            None => &mut self.inst,
        }
    }

    fn is_interleaved(&self) -> bool {
        self.data.is_none()
    }
}

/// Decodes a sequence of delta windows.
#[derive(Debug, Clone)]
pub struct WindowDecoder {
    state: WindowState,
    reader: CodeTableReader,
    cache: AddressCache,
    version: Version,
}

impl WindowDecoder {
    pub fn new(version: Version) -> Self {
        Self {
            state: WindowState::AwaitingHeader,
            reader: CodeTableReader::new(CodeTable::default_table()),
            cache: AddressCache::default(),
            version,
        }
    }

    /// Switch to a custom code table and cache configuration.
    pub fn set_code_table(&mut self, table: Arc<CodeTable>, cache: AddressCache) {
        self.reader.set_table(table);
        self.cache = cache;
    }

    /// True once a window header has been parsed and its body is incomplete.
    pub fn in_window(&self) -> bool {
        matches!(self.state, WindowState::Body(_))
    }

    /// True only while an interleaved window still has undelivered bytes.
    pub fn more_data_expected(&self) -> bool {
        matches!(
            self.state,
            WindowState::Body(WindowBody {
                layout: Layout::Interleaved { remaining },
                ..
            }) if remaining > 0
        )
    }

    /// Decode as much of the current window as `cursor` allows.
    ///
    /// `target` holds previously decoded data reachable by VCD_TARGET windows
    /// followed by the bytes of the window in progress.  `decoded_before` is
    /// the total number of bytes produced by earlier windows.
    pub fn decode(
        &mut self,
        cursor: &mut Cursor<'_>,
        dictionary: &[u8],
        target: &mut Vec<u8>,
        decoded_before: u64,
        config: &DecoderConfig,
    ) -> Result<WindowStatus, DecodeError> {
        if let WindowState::AwaitingHeader = self.state {
            let mut parser = HeaderParser::new(*cursor);
            match self.parse_header(&mut parser, dictionary.len() as u64, decoded_before, config) {
                Ok((segment, target_length, sections)) => {
                    *cursor = parser.cursor();
                    let layout = if self.version.has_extensions()
                        && sections.data == 0
                        && sections.addresses == 0
                    {
                        Layout::Interleaved {
                            remaining: sections.instructions as usize,
                        }
                    } else {
                        Layout::Standard(sections)
                    };
                    debug!(
                        "window at {}: {target_length} target bytes, source {segment:?}, {layout:?}",
                        cursor.offset()
                    );
                    self.cache.init();
                    self.reader.init();
                    self.state = WindowState::Body(WindowBody {
                        segment,
                        target_length,
                        window_start: target.len(),
                        checksum: sections.checksum,
                        layout,
                    });
                }
                Err(ParseError::NeedMoreData) => return Ok(WindowStatus::NeedMoreData),
                Err(ParseError::Malformed(kind)) => {
                    return Err(DecodeError::at(parser.offset(), kind));
                }
            }
        }

        let WindowState::Body(mut body) = self.state else {
            return Ok(WindowStatus::NeedMoreData);
        };

        let (mut sections, more_available) = match body.layout {
            Layout::Standard(lengths) => {
                let data = cursor.take(lengths.data as usize);
                let inst = cursor.take(lengths.instructions as usize);
                let addr = cursor.take(lengths.addresses as usize);
                let sections = Sections {
                    inst,
                    data: Some(data),
                    addr: Some(addr),
                };
                (sections, false)
            }
            Layout::Interleaved { remaining } => {
                let stream = cursor.window(remaining);
                let more_available = stream.remaining_len() < remaining;
                let sections = Sections {
                    inst: stream,
                    data: None,
                    addr: None,
                };
                (sections, more_available)
            }
        };

        let mut fault = cursor.offset();
        let result = self.run_instructions(
            &body,
            &mut sections,
            more_available,
            dictionary,
            target,
            &mut fault,
        );

        if let Layout::Interleaved { remaining } = &mut body.layout {
            let consumed = sections.inst.position();
            cursor.advance(consumed);
            *remaining -= consumed;
        }
        self.state = WindowState::Body(body);

        match result {
            Ok(()) => {}
            Err(ParseError::NeedMoreData) => return Ok(WindowStatus::NeedMoreData),
            Err(ParseError::Malformed(kind)) => return Err(DecodeError::at(fault, kind)),
        }

        self.finish_window(&body, &sections, target, cursor.offset())
            .map_err(|kind| DecodeError::at(cursor.offset(), kind))?;
        self.state = WindowState::AwaitingHeader;
        Ok(WindowStatus::Complete(body.window_start..target.len()))
    }

    fn parse_header(
        &self,
        parser: &mut HeaderParser<'_>,
        dictionary_size: u64,
        decoded_before: u64,
        config: &DecoderConfig,
    ) -> ParseResult<(SourceSegment, usize, SectionLengths)> {
        let (win, segment) = parser.parse_win_indicator_and_source_segment(
            dictionary_size,
            decoded_before,
            config.allow_vcd_target,
        )?;
        let target_length = u64::from(parser.parse_window_lengths()?);
        check_limits(target_length, decoded_before, config)?;
        parser.parse_delta_indicator()?;
        let has_checksum = self.version.has_extensions() && win.contains(WinIndicator::CHECKSUM);
        let sections = parser.parse_section_lengths(has_checksum)?;
        let interleaved =
            self.version.has_extensions() && sections.data == 0 && sections.addresses == 0;
        if !interleaved && parser.cursor().remaining_len() < sections.total() {
            return Err(ParseError::NeedMoreData);
        }
        Ok((segment, target_length as usize, sections))
    }

    fn run_instructions(
        &mut self,
        body: &WindowBody,
        sections: &mut Sections<'_>,
        more_available: bool,
        dictionary: &[u8],
        target: &mut Vec<u8>,
        fault: &mut u64,
    ) -> ParseResult<()> {
        let interleaved = sections.is_interleaved();
        // Out of input: wait for more if the window has undelivered bytes,
        // otherwise the section is too short.
        let stall = |section: Section| -> ParseResult<()> {
            if more_available {
                Err(ParseError::NeedMoreData)
            } else if interleaved {
                Err(FormatError::SectionExhausted {
                    section: Section::Interleaved,
                }
                .into())
            } else {
                Err(FormatError::SectionExhausted { section }.into())
            }
        };
        let segment_length = body.segment.length();

        loop {
            let produced = target.len() - body.window_start;
            if produced == body.target_length {
                return Ok(());
            }
            *fault = sections.inst.offset();
            let inst = match self.reader.next_instruction(&mut sections.inst) {
                Ok(Some(inst)) => inst,
                Ok(None) if more_available => return Err(ParseError::NeedMoreData),
                Ok(None) => {
                    return Err(FormatError::TargetLengthMismatch {
                        expected: body.target_length as u64,
                        actual: produced as u64,
                    }
                    .into());
                }
                Err(ParseError::NeedMoreData) => return stall(Section::Instructions),
                Err(e) => return Err(e),
            };

            let size = inst.size() as usize;
            let remaining = body.target_length - produced;
            if size > remaining {
                return Err(FormatError::TargetWindowOverflow {
                    size: size as u64,
                    remaining: remaining as u64,
                }
                .into());
            }

            match inst {
                Instruction::Add { .. } => match sections.data().read_bytes(size) {
                    Ok(bytes) => target.extend_from_slice(bytes),
                    Err(_) => {
                        self.reader.unget_instruction(&mut sections.inst);
                        return stall(Section::Data);
                    }
                },
                Instruction::Run { .. } => match sections.data().read_byte() {
                    Ok(byte) => target.resize(target.len() + size, byte),
                    Err(_) => {
                        self.reader.unget_instruction(&mut sections.inst);
                        return stall(Section::Data);
                    }
                },
                Instruction::Copy { mode, .. } => {
                    let here = segment_length + produced as u64;
                    let address = match self.cache.decode(here, mode, sections.addr()) {
                        Ok(address) => address,
                        Err(ParseError::NeedMoreData) => {
                            self.reader.unget_instruction(&mut sections.inst);
                            return stall(Section::Addresses);
                        }
                        Err(e) => return Err(e),
                    };
                    copy_bytes(body, dictionary, target, address as usize, size);
                }
            }
        }
    }

    fn finish_window(
        &self,
        body: &WindowBody,
        sections: &Sections<'_>,
        target: &[u8],
        offset: u64,
    ) -> Result<(), FormatError> {
        let excess = |section, count: usize| {
            if count > 0 {
                Err(FormatError::ExcessData { section, count })
            } else {
                Ok(())
            }
        };
        match body.layout {
            Layout::Standard(_) => {
                excess(Section::Instructions, sections.inst.remaining_len())?;
                if let Some(data) = &sections.data {
                    excess(Section::Data, data.remaining_len())?;
                }
                if let Some(addr) = &sections.addr {
                    excess(Section::Addresses, addr.remaining_len())?;
                }
            }
            Layout::Interleaved { remaining } => excess(Section::Interleaved, remaining)?,
        }

        let output = &target[body.window_start..];
        if let Some(expected) = body.checksum {
            let actual = adler32(output);
            if actual != expected {
                return Err(FormatError::ChecksumMismatch { expected, actual });
            }
        }
        trace!("window complete at {offset}: {} bytes", output.len());
        Ok(())
    }
}

/// Execute a COPY of `size` bytes from `address`, where the address space is
/// the source segment followed by this window's output.  Copies that reach
/// into bytes produced by the same instruction repeat the overlapped pattern.
fn copy_bytes(body: &WindowBody, dictionary: &[u8], target: &mut Vec<u8>, address: usize, size: usize) {
    let segment_length = body.segment.length() as usize;
    let mut address = address;
    let mut left = size;

    if address < segment_length {
        let n = left.min(segment_length - address);
        match body.segment {
            SourceSegment::Dictionary { position, .. } => {
                let start = position as usize + address;
                target.extend_from_slice(&dictionary[start..start + n]);
            }
            SourceSegment::Target { position, .. } => {
                let start = position as usize + address;
                target.extend_from_within(start..start + n);
            }
            SourceSegment::None => {}
        }
        address += n;
        left -= n;
    }
    if left == 0 {
        return;
    }

    let mut from = body.window_start + (address - segment_length);
    while left > 0 {
        let n = left.min(target.len() - from);
        target.extend_from_within(from..from + n);
        from += n;
        left -= n;
    }
}

fn check_limits(target_length: u64, decoded_before: u64, config: &DecoderConfig) -> Result<(), FormatError> {
    if target_length > config.max_target_window_size {
        return Err(FormatError::LimitExceeded {
            limit: Limit::TargetWindow,
            size: target_length,
            max: config.max_target_window_size,
        });
    }
    let total = decoded_before + target_length;
    if total > config.max_target_file_size {
        return Err(FormatError::LimitExceeded {
            limit: Limit::TargetFile,
            size: total,
            max: config.max_target_file_size,
        });
    }
    if let Some(planned) = config.planned_target_file_size
        && total > planned
    {
        return Err(FormatError::LimitExceeded {
            limit: Limit::PlannedTargetFile,
            size: total,
            max: planned,
        });
    }
    Ok(())
}

// Code table writer: the encoder-facing half of the VCDIFF format.
//
// A match finder drives the writer through `InstructionSink` (add, copy,
// run in target order).  Each instruction is paired with the previous one
// into a combined opcode when the code table has one, and `output`
// serializes the window in the standard three-section layout or the
// interleaved single-stream layout.

use std::sync::Arc;

use super::address_cache::AddressCache;
use super::code_table::{CODE_TABLE_BYTES, CodeTable, InstructionMap, VCD_ADD, VCD_COPY, VCD_RUN};
use super::error::EncodeError;
use super::header::{FileHeader, SectionLengths, SourceSegment, Version, WindowHeaderSpec};
use super::varint;

/// Largest value a VCDIFF int32 field can hold.
const MAX_FIELD: u64 = i32::MAX as u64;

/// Receives instructions from a match finder, in target order.
pub trait InstructionSink {
    /// Literal bytes.
    fn add(&mut self, data: &[u8]) -> Result<(), EncodeError>;
    /// `size` bytes from `address` in the source-segment-then-target address space.
    fn copy(&mut self, address: u64, size: u32) -> Result<(), EncodeError>;
    /// `size` repetitions of `byte`.
    fn run(&mut self, size: u32, byte: u8) -> Result<(), EncodeError>;
}

/// A complete delta output format: header, per-window framing and trailer.
pub trait DeltaWriter: InstructionSink {
    fn write_header(&mut self, version: Version, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// Open a window whose source segment is the first `dictionary_size`
    /// bytes of the dictionary.
    fn init(&mut self, dictionary_size: u64) -> Result<(), EncodeError>;

    /// Open a window whose source segment is previously encoded target data.
    fn init_target_segment(&mut self, position: u64, length: u64) -> Result<(), EncodeError>;

    fn add_checksum(&mut self, checksum: u32);

    /// Close the current window and append it to `out`.
    fn output(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Open,
    Finished,
}

/// Binary VCDIFF writer.
pub struct CodeTableWriter {
    interleaved: bool,
    table: Arc<CodeTable>,
    custom_table: bool,
    map: InstructionMap,
    cache: AddressCache,
    state: WriterState,
    segment: SourceSegment,
    target_length: u64,
    data: Vec<u8>,
    instructions: Vec<u8>,
    addresses: Vec<u8>,
    /// Index of the last single-instruction opcode that may still be
    /// upgraded to a combined opcode.
    last_opcode_index: Option<usize>,
    checksum: Option<u32>,
}

impl CodeTableWriter {
    /// Writer using the default code table.
    pub fn new(interleaved: bool) -> Self {
        let table = CodeTable::default_table();
        let cache = AddressCache::default();
        Self::build(interleaved, table, false, cache)
    }

    /// Writer using a custom code table, which is embedded in the file header.
    pub fn with_code_table(
        interleaved: bool,
        near_size: u8,
        same_size: u8,
        table: Arc<CodeTable>,
    ) -> Result<Self, EncodeError> {
        let cache = AddressCache::new(near_size, same_size)?;
        table.validate(cache.max_mode())?;
        Ok(Self::build(interleaved, table, true, cache))
    }

    fn build(interleaved: bool, table: Arc<CodeTable>, custom_table: bool, cache: AddressCache) -> Self {
        let map = InstructionMap::new(&table, cache.max_mode());
        Self {
            interleaved,
            table,
            custom_table,
            map,
            cache,
            state: WriterState::Idle,
            segment: SourceSegment::None,
            target_length: 0,
            data: Vec::new(),
            instructions: Vec::new(),
            addresses: Vec::new(),
            last_opcode_index: None,
            checksum: None,
        }
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    /// Bytes of target data produced by the current window so far.
    pub fn target_length(&self) -> u64 {
        self.target_length
    }

    fn open(&mut self, segment: SourceSegment) -> Result<(), EncodeError> {
        match self.state {
            WriterState::Idle => {}
            WriterState::Open => return Err(EncodeError::Usage("window already open")),
            WriterState::Finished => return Err(EncodeError::Usage("writer already finished")),
        }
        let length = segment.length();
        if length > MAX_FIELD {
            return Err(EncodeError::TooLarge {
                what: "source segment length",
                value: length,
            });
        }
        self.segment = segment;
        self.target_length = 0;
        self.data.clear();
        self.instructions.clear();
        self.addresses.clear();
        self.last_opcode_index = None;
        self.checksum = None;
        self.cache.init();
        self.state = WriterState::Open;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EncodeError> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Idle => Err(EncodeError::Usage("instruction before init")),
            WriterState::Finished => Err(EncodeError::Usage("instruction after finish")),
        }
    }

    fn grow_target(&mut self, size: u32) -> Result<(), EncodeError> {
        let length = self.target_length + u64::from(size);
        if length > MAX_FIELD {
            return Err(EncodeError::TooLarge {
                what: "target window length",
                value: length,
            });
        }
        self.target_length = length;
        Ok(())
    }

    /// Section receiving ADD/RUN bytes.
    fn data_section(&mut self) -> &mut Vec<u8> {
        if self.interleaved {
            &mut self.instructions
        } else {
            &mut self.data
        }
    }

    /// Section receiving COPY addresses.
    fn address_section(&mut self) -> &mut Vec<u8> {
        if self.interleaved {
            &mut self.instructions
        } else {
            &mut self.addresses
        }
    }

    fn encode_instruction(&mut self, inst: u8, size: u32, mode: u8) -> Result<(), EncodeError> {
        let fixed_size = u8::try_from(size).ok();

        if let Some(index) = self.last_opcode_index.take() {
            let last = self.instructions[index];
            if let Some(opcode) =
                fixed_size.and_then(|s| self.map.lookup_second_opcode(last, inst, s, mode))
            {
                self.instructions[index] = opcode;
                return Ok(());
            }
            if let Some(opcode) = self.map.lookup_second_opcode(last, inst, 0, mode) {
                self.instructions[index] = opcode;
                varint::append_u32(&mut self.instructions, size);
                return Ok(());
            }
        }

        let index = self.instructions.len();
        if let Some(opcode) = fixed_size.and_then(|s| self.map.lookup_first_opcode(inst, s, mode)) {
            self.instructions.push(opcode);
        } else if let Some(opcode) = self.map.lookup_first_opcode(inst, 0, mode) {
            self.instructions.push(opcode);
            varint::append_u32(&mut self.instructions, size);
        } else {
            return Err(EncodeError::NoOpcode(format!(
                "instruction {inst} with mode {mode}"
            )));
        }
        self.last_opcode_index = Some(index);
        Ok(())
    }
}

impl InstructionSink for CodeTableWriter {
    fn add(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(());
        }
        let size = u32::try_from(data.len())
            .ok()
            .filter(|&s| u64::from(s) <= MAX_FIELD)
            .ok_or(EncodeError::TooLarge {
                what: "ADD size",
                value: data.len() as u64,
            })?;
        self.encode_instruction(VCD_ADD, size, 0)?;
        self.data_section().extend_from_slice(data);
        self.grow_target(size)
    }

    fn copy(&mut self, address: u64, size: u32) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if size == 0 {
            return Ok(());
        }
        if address > MAX_FIELD {
            return Err(EncodeError::TooLarge {
                what: "copy address",
                value: address,
            });
        }
        let here = self.segment.length() + self.target_length;
        if address >= here {
            return Err(EncodeError::Usage("copy address beyond current position"));
        }
        let (mode, encoded) = self.cache.encode(address, here);
        self.encode_instruction(VCD_COPY, size, mode)?;
        encoded.append_to(self.address_section());
        self.grow_target(size)
    }

    fn run(&mut self, size: u32, byte: u8) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if size == 0 {
            return Ok(());
        }
        self.encode_instruction(VCD_RUN, size, 0)?;
        self.data_section().push(byte);
        self.grow_target(size)
    }
}

impl DeltaWriter for CodeTableWriter {
    fn write_header(&mut self, version: Version, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.state == WriterState::Finished {
            return Err(EncodeError::Usage("writer already finished"));
        }
        let custom_cache_sizes = self
            .custom_table
            .then(|| (self.cache.near_size(), self.cache.same_size()));
        FileHeader {
            version,
            custom_cache_sizes,
        }
        .append_to(out);
        if self.custom_table {
            out.extend_from_slice(&encode_code_table(&self.table)?);
        }
        Ok(())
    }

    fn init(&mut self, dictionary_size: u64) -> Result<(), EncodeError> {
        let segment = if dictionary_size > 0 {
            SourceSegment::Dictionary {
                position: 0,
                length: dictionary_size,
            }
        } else {
            SourceSegment::None
        };
        self.open(segment)
    }

    fn init_target_segment(&mut self, position: u64, length: u64) -> Result<(), EncodeError> {
        if position > MAX_FIELD {
            return Err(EncodeError::TooLarge {
                what: "target segment position",
                value: position,
            });
        }
        let segment = if length > 0 {
            SourceSegment::Target { position, length }
        } else {
            SourceSegment::None
        };
        self.open(segment)
    }

    fn add_checksum(&mut self, checksum: u32) {
        self.checksum = Some(checksum);
    }

    fn output(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.ensure_open()?;
        self.state = WriterState::Idle;
        if self.instructions.is_empty() && self.checksum.is_none() {
            return Ok(());
        }
        let field = |what, len: usize| {
            u32::try_from(len)
                .ok()
                .filter(|&v| u64::from(v) <= MAX_FIELD)
                .ok_or(EncodeError::TooLarge {
                    what,
                    value: len as u64,
                })
        };
        let sections = SectionLengths {
            data: field("data section length", self.data.len())?,
            instructions: field("instruction section length", self.instructions.len())?,
            addresses: field("address section length", self.addresses.len())?,
            checksum: self.checksum,
        };
        WindowHeaderSpec {
            segment: self.segment,
            target_window_length: self.target_length as u32,
            sections,
        }
        .append_to(out);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.instructions);
        out.extend_from_slice(&self.addresses);
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.state == WriterState::Open {
            return Err(EncodeError::Usage("finish with an open window"));
        }
        self.state = WriterState::Finished;
        Ok(())
    }
}

/// Encode a code table as a complete VCDIFF delta against the default
/// table's canonical bytes, as carried in a file header.
pub fn encode_code_table(table: &CodeTable) -> Result<Vec<u8>, EncodeError> {
    const MIN_COPY: usize = 4;

    let dictionary = CodeTable::default_table_bytes();
    let target = table.to_bytes();
    debug_assert_eq!(target.len(), CODE_TABLE_BYTES);

    let mut writer = CodeTableWriter::new(false);
    let mut out = Vec::new();
    writer.write_header(Version::Standard, &mut out)?;
    writer.init(dictionary.len() as u64)?;

    let mut literal_start = 0;
    let mut pos = 0;
    while pos < target.len() {
        let same = target[pos..]
            .iter()
            .zip(&dictionary[pos..])
            .take_while(|(a, b)| a == b)
            .count();
        if same >= MIN_COPY {
            writer.add(&target[literal_start..pos])?;
            writer.copy(pos as u64, same as u32)?;
            pos += same;
            literal_start = pos;
        } else {
            pos += same.max(1);
        }
    }
    writer.add(&target[literal_start..])?;
    writer.output(&mut out)?;
    writer.finish(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_before_init_are_usage_errors() {
        let mut w = CodeTableWriter::new(false);
        assert!(matches!(w.add(b"x"), Err(EncodeError::Usage(_))));
        assert!(matches!(w.copy(0, 4), Err(EncodeError::Usage(_))));
        assert!(matches!(w.run(3, 0), Err(EncodeError::Usage(_))));

        let mut out = Vec::new();
        w.init(0).unwrap();
        w.add(b"x").unwrap();
        w.output(&mut out).unwrap();
        // A flushed window needs a new init.
        assert!(matches!(w.add(b"y"), Err(EncodeError::Usage(_))));
        w.finish(&mut out).unwrap();
        assert!(matches!(w.init(0), Err(EncodeError::Usage(_))));
    }

    #[test]
    fn standard_window_layout() {
        let mut w = CodeTableWriter::new(false);
        let mut out = Vec::new();
        w.init(0).unwrap();
        w.add(b"abc").unwrap();
        w.run(5, b'x').unwrap();
        w.output(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                0x00, // win indicator
                12,   // delta encoding length
                8,    // target window length
                0x00, // delta indicator
                4,    // data length
                3,    // instructions length
                0,    // addresses length
                b'a', b'b', b'c', b'x', // data
                4, 0, 5, // ADD(3), RUN explicit size 5
            ]
        );
    }

    #[test]
    fn add_then_copy_uses_combined_opcode() {
        let mut w = CodeTableWriter::new(false);
        let mut out = Vec::new();
        w.init(100).unwrap();
        w.add(b"a").unwrap();
        w.copy(10, 4).unwrap();
        w.output(&mut out).unwrap();
        // SOURCE window: length 100, position 0.
        assert_eq!(&out[..3], &[0x01, 100, 0]);
        // data "a", instruction 163, address 10
        assert!(out.ends_with(&[b'a', 163, 10]));
    }

    #[test]
    fn interleaved_stream_layout() {
        let mut w = CodeTableWriter::new(true);
        let mut out = Vec::new();
        w.init(10).unwrap();
        w.add(b"ab").unwrap();
        w.copy(0, 4).unwrap();
        w.output(&mut out).unwrap();
        // Address 0 hits the zeroed SAME cache: ADD(2)+COPY(4, mode 6) = 236,
        // followed inline by the data and the SAME byte.
        assert!(out.ends_with(&[0, 4, 0, 236, b'a', b'b', 0]));
    }

    #[test]
    fn large_sizes_get_explicit_varints() {
        let mut w = CodeTableWriter::new(false);
        let mut out = Vec::new();
        w.init(1000).unwrap();
        w.copy(5, 300).unwrap();
        w.add(&[7u8; 20]).unwrap();
        w.output(&mut out).unwrap();
        // COPY size 0 mode SELF (19) + varint 300, then ADD size 0 (1) + 20.
        let inst = [19, 0x82, 0x2C, 1, 20];
        assert!(out.windows(inst.len()).any(|w| w == inst));
    }

    #[test]
    fn empty_window_emits_nothing() {
        let mut w = CodeTableWriter::new(false);
        let mut out = Vec::new();
        w.init(10).unwrap();
        w.add(&[]).unwrap();
        w.output(&mut out).unwrap();
        assert!(out.is_empty());

        w.init(10).unwrap();
        w.add_checksum(1);
        w.output(&mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn copy_beyond_here_is_rejected() {
        let mut w = CodeTableWriter::new(false);
        w.init(4).unwrap();
        assert!(matches!(w.copy(4, 1), Err(EncodeError::Usage(_))));
        assert!(matches!(
            w.copy(u64::from(u32::MAX), 1),
            Err(EncodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn oversized_dictionary_is_rejected() {
        let mut w = CodeTableWriter::new(false);
        assert!(matches!(
            w.init(MAX_FIELD + 1),
            Err(EncodeError::TooLarge { .. })
        ));
    }

    #[test]
    fn default_table_encodes_as_single_copy() {
        let delta = encode_code_table(&CodeTable::default_table()).unwrap();
        // Header, then a window copying all 1536 bytes.
        assert_eq!(&delta[..5], &[0xD6, 0xC3, 0xC4, 0x00, 0x00]);
        assert!(delta.len() < 32);
    }
}

// VCDIFF file header and per-window header parsing (RFC 3284, Section 4).
//
// Every primitive read goes through a private copy of the caller's cursor,
// so `NeedMoreData` and `Malformed` both leave the caller's position
// unchanged.  A window header that is not yet complete is re-parsed from
// its first byte once more input arrives.

use bitflags::bitflags;

use super::cursor::Cursor;
use super::error::{FormatError, ParseResult};
use super::varint;

// ---------------------------------------------------------------------------
// Magic and version
// ---------------------------------------------------------------------------

pub const VCDIFF_MAGIC: [u8; 3] = [0xD6, 0xC3, 0xC4];

/// RFC 3284 draft-standard version byte.
pub const VCDIFF_VERSION: u8 = 0x00;
/// Version byte enabling the SDCH checksum and interleaving extensions.
pub const VCDIFF_VERSION_SDCH: u8 = b'S';

/// Length of the file header without a custom code table.
pub const FILE_HEADER_LEN: usize = 5;

// ---------------------------------------------------------------------------
// Indicator bytes
// ---------------------------------------------------------------------------

bitflags! {
    /// File header indicator (`Hdr_Indicator`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HdrIndicator: u8 {
        /// Secondary compression (unsupported).
        const DECOMPRESS = 1 << 0;
        /// A custom code table follows.
        const CODETABLE = 1 << 1;
    }
}

bitflags! {
    /// Window indicator (`Win_Indicator`).  Reserved bits are ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WinIndicator: u8 {
        const SOURCE = 1 << 0;
        const TARGET = 1 << 1;
        /// SDCH extension: an Adler-32 checksum follows the section lengths.
        const CHECKSUM = 1 << 2;
    }
}

bitflags! {
    /// Delta indicator (`Delta_Indicator`): secondary compression per section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeltaIndicator: u8 {
        const DATACOMP = 1 << 0;
        const INSTCOMP = 1 << 1;
        const ADDRCOMP = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Format variant announced by the version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Plain RFC 3284.
    Standard,
    /// SDCH: per-window checksums and interleaved sections are honored.
    Sdch,
}

impl Version {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            VCDIFF_VERSION => Some(Version::Standard),
            VCDIFF_VERSION_SDCH => Some(Version::Sdch),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Version::Standard => VCDIFF_VERSION,
            Version::Sdch => VCDIFF_VERSION_SDCH,
        }
    }

    #[inline]
    pub fn has_extensions(self) -> bool {
        self == Version::Sdch
    }
}

/// Parsed VCDIFF file header.  A custom code table, if announced, follows
/// as a nested delta and is handled by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: Version,
    /// Near and same cache sizes of a custom code table.
    pub custom_cache_sizes: Option<(u8, u8)>,
}

impl FileHeader {
    /// Parse the file header.  Magic bytes are checked as they arrive, so a
    /// stream that is not VCDIFF fails on its first wrong byte.
    pub fn parse(cursor: &mut Cursor<'_>) -> ParseResult<Self> {
        let mut c = *cursor;
        for (index, &expected) in VCDIFF_MAGIC.iter().enumerate() {
            let found = c.read_byte()?;
            if found != expected {
                return Err(FormatError::BadMagic { index, found }.into());
            }
        }
        let version_byte = c.read_byte()?;
        let version =
            Version::from_byte(version_byte).ok_or(FormatError::UnsupportedVersion(version_byte))?;
        let hdr = HdrIndicator::from_bits_truncate(c.read_byte()?);
        if hdr.contains(HdrIndicator::DECOMPRESS) {
            return Err(FormatError::SecondaryCompression.into());
        }
        let custom_cache_sizes = if hdr.contains(HdrIndicator::CODETABLE) {
            let near = c.read_byte()?;
            let same = c.read_byte()?;
            Some((near, same))
        } else {
            None
        };
        *cursor = c;
        Ok(Self {
            version,
            custom_cache_sizes,
        })
    }

    /// Append the header bytes (not including any nested code table delta).
    pub fn append_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&VCDIFF_MAGIC);
        out.push(self.version.byte());
        match self.custom_cache_sizes {
            Some((near, same)) => {
                out.push(HdrIndicator::CODETABLE.bits());
                out.push(near);
                out.push(same);
            }
            None => out.push(HdrIndicator::empty().bits()),
        }
    }
}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

/// Where the COPY source segment of a window lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSegment {
    #[default]
    None,
    /// A range of the dictionary.
    Dictionary { position: u64, length: u64 },
    /// A range of previously decoded target data (VCD_TARGET).
    Target { position: u64, length: u64 },
}

impl SourceSegment {
    #[inline]
    pub fn length(&self) -> u64 {
        match *self {
            SourceSegment::None => 0,
            SourceSegment::Dictionary { length, .. } | SourceSegment::Target { length, .. } => {
                length
            }
        }
    }
}

/// Lengths of the three window sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionLengths {
    pub data: u32,
    pub instructions: u32,
    pub addresses: u32,
    pub checksum: Option<u32>,
}

impl SectionLengths {
    #[inline]
    pub fn total(&self) -> usize {
        self.data as usize + self.instructions as usize + self.addresses as usize
    }
}

/// Incremental window header parser over a private cursor copy.
pub struct HeaderParser<'a> {
    cursor: Cursor<'a>,
    delta_encoding_length: u32,
    delta_encoding_start: usize,
}

impl<'a> HeaderParser<'a> {
    pub fn new(cursor: Cursor<'a>) -> Self {
        Self {
            cursor,
            delta_encoding_length: 0,
            delta_encoding_start: 0,
        }
    }

    /// Cursor positioned after everything parsed so far.
    pub fn cursor(&self) -> Cursor<'a> {
        self.cursor
    }

    /// Absolute stream offset of the next unparsed byte.
    pub fn offset(&self) -> u64 {
        self.cursor.offset()
    }

    pub fn parse_byte(&mut self) -> ParseResult<u8> {
        self.cursor.read_byte()
    }

    pub fn parse_int32(&mut self) -> ParseResult<u32> {
        varint::parse_int32(&mut self.cursor)
    }

    pub fn parse_uint32(&mut self) -> ParseResult<u32> {
        varint::parse_uint32(&mut self.cursor)
    }

    /// The checksum is written as an int64 varint but must fit in 32 bits.
    pub fn parse_checksum(&mut self) -> ParseResult<u32> {
        varint::parse_uint32(&mut self.cursor)
    }

    /// Parse `Win_Indicator` and, if present, the source segment.
    ///
    /// `dictionary_size` bounds VCD_SOURCE segments and
    /// `decoded_target_size` bounds VCD_TARGET segments.
    pub fn parse_win_indicator_and_source_segment(
        &mut self,
        dictionary_size: u64,
        decoded_target_size: u64,
        allow_target: bool,
    ) -> ParseResult<(WinIndicator, SourceSegment)> {
        let win = WinIndicator::from_bits_truncate(self.parse_byte()?);
        let segment = match (
            win.contains(WinIndicator::SOURCE),
            win.contains(WinIndicator::TARGET),
        ) {
            (true, true) => return Err(FormatError::SourceAndTarget.into()),
            (false, false) => SourceSegment::None,
            (true, false) => {
                let (position, length) = self.parse_source_segment(dictionary_size)?;
                SourceSegment::Dictionary { position, length }
            }
            (false, true) => {
                if !allow_target {
                    return Err(FormatError::TargetNotAllowed.into());
                }
                let (position, length) = self.parse_source_segment(decoded_target_size)?;
                SourceSegment::Target { position, length }
            }
        };
        Ok((win, segment))
    }

    fn parse_source_segment(&mut self, bound: u64) -> ParseResult<(u64, u64)> {
        let length = u64::from(self.parse_int32()?);
        let out_of_range = |position| FormatError::SourceSegmentOutOfRange {
            position,
            length,
            bound,
        };
        if length > bound {
            return Err(out_of_range(0).into());
        }
        let position = u64::from(self.parse_int32()?);
        if (position >= bound && length > 0) || position + length > bound {
            return Err(out_of_range(position).into());
        }
        Ok((position, length))
    }

    /// Parse the delta encoding length and the target window length.
    pub fn parse_window_lengths(&mut self) -> ParseResult<u32> {
        self.delta_encoding_length = self.parse_int32()?;
        self.delta_encoding_start = self.cursor.position();
        self.parse_int32()
    }

    /// The delta indicator must not request any secondary compression.
    pub fn parse_delta_indicator(&mut self) -> ParseResult<()> {
        let byte = self.parse_byte()?;
        let delta = DeltaIndicator::from_bits_truncate(byte);
        if !delta.is_empty() {
            return Err(FormatError::UnsupportedCompression(byte).into());
        }
        Ok(())
    }

    /// Parse the section lengths and optional checksum, and check them
    /// against the declared delta encoding length.
    pub fn parse_section_lengths(&mut self, has_checksum: bool) -> ParseResult<SectionLengths> {
        let data = self.parse_int32()?;
        let instructions = self.parse_int32()?;
        let addresses = self.parse_int32()?;
        let checksum = if has_checksum {
            Some(self.parse_checksum()?)
        } else {
            None
        };
        let lengths = SectionLengths {
            data,
            instructions,
            addresses,
            checksum,
        };
        let actual =
            (self.cursor.position() - self.delta_encoding_start) as u64 + lengths.total() as u64;
        if actual != u64::from(self.delta_encoding_length) {
            return Err(FormatError::EncodingLengthMismatch {
                declared: u64::from(self.delta_encoding_length),
                actual,
            }
            .into());
        }
        Ok(lengths)
    }
}

// ---------------------------------------------------------------------------
// Window header writing
// ---------------------------------------------------------------------------

/// Everything needed to emit a window header.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowHeaderSpec {
    pub segment: SourceSegment,
    pub target_window_length: u32,
    pub sections: SectionLengths,
}

impl WindowHeaderSpec {
    /// Append the window header (everything before the sections).
    pub fn append_to(&self, out: &mut Vec<u8>) {
        let mut win = WinIndicator::empty();
        match self.segment {
            SourceSegment::Dictionary { .. } => win |= WinIndicator::SOURCE,
            SourceSegment::Target { .. } => win |= WinIndicator::TARGET,
            SourceSegment::None => {}
        }
        if self.sections.checksum.is_some() {
            win |= WinIndicator::CHECKSUM;
        }
        out.push(win.bits());
        if let SourceSegment::Dictionary { position, length }
        | SourceSegment::Target { position, length } = self.segment
        {
            varint::append_u64(out, length);
            varint::append_u64(out, position);
        }

        let sections = &self.sections;
        let delta_length = varint::encoded_len(u64::from(self.target_window_length))
            + 1
            + varint::encoded_len(u64::from(sections.data))
            + varint::encoded_len(u64::from(sections.instructions))
            + varint::encoded_len(u64::from(sections.addresses))
            + sections.checksum.map_or(0, |c| varint::encoded_len(u64::from(c)))
            + sections.total();
        varint::append_u64(out, delta_length as u64);
        varint::append_u32(out, self.target_window_length);
        out.push(0); // delta indicator: no compression
        varint::append_u32(out, sections.data);
        varint::append_u32(out, sections.instructions);
        varint::append_u32(out, sections.addresses);
        if let Some(checksum) = sections.checksum {
            varint::append_u32(out, checksum);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::error::ParseError;

    fn malformed(kind: FormatError) -> ParseError {
        ParseError::Malformed(kind)
    }

    #[test]
    fn file_header_roundtrip() {
        for header in [
            FileHeader {
                version: Version::Standard,
                custom_cache_sizes: None,
            },
            FileHeader {
                version: Version::Sdch,
                custom_cache_sizes: Some((2, 1)),
            },
        ] {
            let mut bytes = Vec::new();
            header.append_to(&mut bytes);
            let mut c = Cursor::new(&bytes);
            assert_eq!(FileHeader::parse(&mut c), Ok(header));
            assert!(c.is_empty());
        }
    }

    #[test]
    fn bad_magic_detected_early() {
        let mut c = Cursor::new(&[0xD6, 0x00]);
        assert_eq!(
            FileHeader::parse(&mut c),
            Err(malformed(FormatError::BadMagic {
                index: 1,
                found: 0x00
            }))
        );
        let mut c = Cursor::new(&[0xD6, 0xC3]);
        assert_eq!(FileHeader::parse(&mut c), Err(ParseError::NeedMoreData));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn version_and_indicator_checks() {
        let mut c = Cursor::new(&[0xD6, 0xC3, 0xC4, 0x01, 0x00]);
        assert_eq!(
            FileHeader::parse(&mut c),
            Err(malformed(FormatError::UnsupportedVersion(1)))
        );
        let mut c = Cursor::new(&[0xD6, 0xC3, 0xC4, b'S', 0x01]);
        assert_eq!(
            FileHeader::parse(&mut c),
            Err(malformed(FormatError::SecondaryCompression))
        );
        // Custom code table announced but cache sizes missing.
        let mut c = Cursor::new(&[0xD6, 0xC3, 0xC4, 0x00, 0x02, 0x04]);
        assert_eq!(FileHeader::parse(&mut c), Err(ParseError::NeedMoreData));
        // Unknown indicator bits are ignored.
        let mut c = Cursor::new(&[0xD6, 0xC3, 0xC4, 0x00, 0x04]);
        assert!(FileHeader::parse(&mut c).is_ok());
    }

    #[test]
    fn source_and_target_both_set() {
        let mut p = HeaderParser::new(Cursor::new(&[0x03, 0x00, 0x00]));
        assert_eq!(
            p.parse_win_indicator_and_source_segment(10, 10, true),
            Err(malformed(FormatError::SourceAndTarget))
        );
    }

    #[test]
    fn target_segment_rejected_when_disallowed() {
        let mut p = HeaderParser::new(Cursor::new(&[0x02, 0x01, 0x00]));
        assert_eq!(
            p.parse_win_indicator_and_source_segment(10, 10, false),
            Err(malformed(FormatError::TargetNotAllowed))
        );
        let mut p = HeaderParser::new(Cursor::new(&[0x02, 0x01, 0x00]));
        assert_eq!(
            p.parse_win_indicator_and_source_segment(10, 10, true),
            Ok((
                WinIndicator::TARGET,
                SourceSegment::Target {
                    position: 0,
                    length: 1
                }
            ))
        );
    }

    #[test]
    fn source_segment_bounds() {
        // length 4 at position 6 of a 10-byte dictionary is fine.
        let mut p = HeaderParser::new(Cursor::new(&[0x01, 4, 6]));
        assert!(p.parse_win_indicator_and_source_segment(10, 0, true).is_ok());
        // length 4 at position 7 overruns.
        let mut p = HeaderParser::new(Cursor::new(&[0x01, 4, 7]));
        assert!(matches!(
            p.parse_win_indicator_and_source_segment(10, 0, true),
            Err(ParseError::Malformed(FormatError::SourceSegmentOutOfRange { .. }))
        ));
        // Zero length at the end is fine, nonzero length at the end is not.
        let mut p = HeaderParser::new(Cursor::new(&[0x01, 0, 10]));
        assert!(p.parse_win_indicator_and_source_segment(10, 0, true).is_ok());
        let mut p = HeaderParser::new(Cursor::new(&[0x01, 11, 0]));
        assert!(p.parse_win_indicator_and_source_segment(10, 0, true).is_err());
        // Missing position byte.
        let mut p = HeaderParser::new(Cursor::new(&[0x01, 4]));
        assert_eq!(
            p.parse_win_indicator_and_source_segment(10, 0, true),
            Err(ParseError::NeedMoreData)
        );
    }

    #[test]
    fn delta_indicator_rejects_compression() {
        for byte in [0x01u8, 0x02, 0x04, 0x07] {
            let bytes = [byte];
            let mut p = HeaderParser::new(Cursor::new(&bytes));
            assert_eq!(
                p.parse_delta_indicator(),
                Err(malformed(FormatError::UnsupportedCompression(byte)))
            );
        }
        let mut p = HeaderParser::new(Cursor::new(&[0x00]));
        assert_eq!(p.parse_delta_indicator(), Ok(()));
    }

    #[test]
    fn window_header_roundtrip() {
        let spec = WindowHeaderSpec {
            segment: SourceSegment::Dictionary {
                position: 3,
                length: 200,
            },
            target_window_length: 300,
            sections: SectionLengths {
                data: 5,
                instructions: 7,
                addresses: 2,
                checksum: Some(0xDEAD_BEEF),
            },
        };
        let mut bytes = Vec::new();
        spec.append_to(&mut bytes);
        bytes.extend_from_slice(&[0u8; 14]);

        let mut p = HeaderParser::new(Cursor::new(&bytes));
        let (win, segment) = p
            .parse_win_indicator_and_source_segment(1000, 0, true)
            .unwrap();
        assert_eq!(win, WinIndicator::SOURCE | WinIndicator::CHECKSUM);
        assert_eq!(segment, spec.segment);
        assert_eq!(p.parse_window_lengths(), Ok(300));
        assert_eq!(p.parse_delta_indicator(), Ok(()));
        assert_eq!(p.parse_section_lengths(true), Ok(spec.sections));
        assert_eq!(p.cursor().remaining_len(), 14);
    }

    #[test]
    fn delta_encoding_length_must_match() {
        let spec = WindowHeaderSpec {
            target_window_length: 3,
            sections: SectionLengths {
                data: 1,
                instructions: 1,
                addresses: 0,
                checksum: None,
            },
            ..Default::default()
        };
        let mut bytes = Vec::new();
        spec.append_to(&mut bytes);
        // Bump the declared delta encoding length.
        bytes[1] += 1;
        let mut p = HeaderParser::new(Cursor::new(&bytes));
        p.parse_win_indicator_and_source_segment(0, 0, true).unwrap();
        p.parse_window_lengths().unwrap();
        p.parse_delta_indicator().unwrap();
        assert!(matches!(
            p.parse_section_lengths(false),
            Err(ParseError::Malformed(FormatError::EncodingLengthMismatch { .. }))
        ));
    }
}

// Error types shared by the VCDIFF parser, decoder and writer.
//
// Parsing functions return a three-way outcome: a value, `NeedMoreData`
// (not an error; the caller supplies more bytes and retries), or
// `Malformed` carrying a structured `FormatError`.  Session-level APIs
// turn `Malformed` into `DecodeError::Format` annotated with the absolute
// stream offset at which the problem was detected.

use std::fmt;

use thiserror::Error;

/// Result of a resumable parse step.
pub type ParseResult<T> = Result<T, ParseError>;

/// Non-success outcome of a resumable parse step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input ended before the item was complete.  Nothing was consumed.
    NeedMoreData,
    /// The input can never become valid.
    Malformed(FormatError),
}

impl From<FormatError> for ParseError {
    fn from(kind: FormatError) -> Self {
        ParseError::Malformed(kind)
    }
}

/// The three logical sections of a delta window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Data,
    Instructions,
    Addresses,
    Interleaved,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Data => "data",
            Section::Instructions => "instructions",
            Section::Addresses => "addresses",
            Section::Interleaved => "interleaved",
        })
    }
}

/// Which size cap a window violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    TargetWindow,
    TargetFile,
    PlannedTargetFile,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Limit::TargetWindow => "target window size",
            Limit::TargetFile => "target file size",
            Limit::PlannedTargetFile => "planned target file size",
        })
    }
}

/// Why a delta stream is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("bad magic byte {found:#04x} at header position {index}")]
    BadMagic { index: usize, found: u8 },

    #[error("unsupported VCDIFF version byte {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("secondary compression is not supported")]
    SecondaryCompression,

    #[error("unsupported compression in delta indicator {0:#04x}")]
    UnsupportedCompression(u8),

    #[error("invalid variable-length integer")]
    InvalidVarint,

    #[error("window sets both VCD_SOURCE and VCD_TARGET")]
    SourceAndTarget,

    #[error("VCD_TARGET window found but target references are disabled")]
    TargetNotAllowed,

    #[error("source segment of {length} bytes at {position} exceeds the {bound} bytes available")]
    SourceSegmentOutOfRange {
        position: u64,
        length: u64,
        bound: u64,
    },

    #[error("{limit} {size} exceeds the maximum of {max}")]
    LimitExceeded { limit: Limit, size: u64, max: u64 },

    #[error("delta encoding length {declared} does not match computed length {actual}")]
    EncodingLengthMismatch { declared: u64, actual: u64 },

    #[error("invalid address mode {0}")]
    InvalidMode(u8),

    #[error("invalid copy address {address} at here address {here}")]
    InvalidAddress { address: i64, here: u64 },

    #[error("copy address {address} is beyond current position {here}")]
    AddressBeyondHere { address: u64, here: u64 },

    #[error("instruction of size {size} exceeds the {remaining} bytes left in the target window")]
    TargetWindowOverflow { size: u64, remaining: u64 },

    #[error("target window length mismatch: declared {expected}, decoded {actual}")]
    TargetLengthMismatch { expected: u64, actual: u64 },

    #[error("{section} section ended before the target window was complete")]
    SectionExhausted { section: Section },

    #[error("{count} unconsumed bytes left in the {section} section")]
    ExcessData { section: Section, count: usize },

    #[error(
        "checksum mismatch: expected {expected:#010x}, computed {actual:#010x} (possibly wrong dictionary)"
    )]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unexpected end of delta stream")]
    Truncated,

    #[error("invalid cache sizes: near {near} + same {same} exceeds 254")]
    InvalidCacheSizes { near: u8, same: u8 },

    #[error("invalid code table: {0}")]
    InvalidCodeTable(String),
}

/// Error returned by the streaming decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed delta at offset {offset}: {kind}")]
    Format { offset: u64, kind: FormatError },

    #[error("limit exceeded at offset {offset}: {limit} {size} exceeds the maximum of {max}")]
    LimitExceeded {
        offset: u64,
        limit: Limit,
        size: u64,
        max: u64,
    },

    #[error("usage error: {0}")]
    Usage(&'static str),

    #[error("I/O error writing decoded output: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Build from a format error, splitting out size-limit violations.
    pub(crate) fn at(offset: u64, kind: FormatError) -> Self {
        match kind {
            FormatError::LimitExceeded { limit, size, max } => DecodeError::LimitExceeded {
                offset,
                limit,
                size,
                max,
            },
            kind => DecodeError::Format { offset, kind },
        }
    }

    /// The format problem behind this error, if any.
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            DecodeError::Format { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Absolute delta stream offset at which the error was detected.
    pub fn offset(&self) -> Option<u64> {
        match self {
            DecodeError::Format { offset, .. } | DecodeError::LimitExceeded { offset, .. } => {
                Some(*offset)
            }
            _ => None,
        }
    }
}

/// Error returned by the code table writer and the encoder.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("usage error: {0}")]
    Usage(&'static str),

    #[error("{what} {value} does not fit in a VCDIFF 32-bit field")]
    TooLarge { what: &'static str, value: u64 },

    #[error("code table has no opcode for {0}")]
    NoOpcode(String),

    #[error(transparent)]
    CodeTable(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

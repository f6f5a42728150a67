// VCDIFF format implementation (RFC 3284 plus the SDCH extensions).
//
// # Modules
//
// - `varint`          Variable-length integer encoding (base-128, big-endian)
// - `cursor`          Non-consuming-on-failure input view with stream offsets
// - `code_table`      Default and custom 256-entry opcode tables
// - `address_cache`   NEAR/SAME address cache for COPY instruction addresses
// - `header`          File header and per-window header parsing/writing
// - `reader`          Opcode stream to instructions (decoder side)
// - `writer`          Instructions to opcode stream (encoder side)
// - `window`          Delta window decoder state machine
// - `decoder`         Streaming decoder session
// - `checksum`        Adler-32 window checksums
// - `json`            JSON rendering of a delta (feature `json`)

pub mod address_cache;
pub mod checksum;
pub mod code_table;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod header;
#[cfg(feature = "json")]
pub mod json;
pub mod reader;
pub mod varint;
pub mod window;
pub mod writer;

// Re-export key types for convenience.
pub use address_cache::AddressCache;
pub use code_table::{CodeTable, CodeTableEntry, Instruction, InstructionMap};
pub use decoder::{DecoderConfig, StreamingDecoder, decode_memory, decode_memory_with_config};
pub use error::{DecodeError, EncodeError, FormatError, Limit, Section};
pub use header::{FileHeader, VCDIFF_MAGIC, Version};
#[cfg(feature = "json")]
pub use json::JsonWriter;
pub use writer::{CodeTableWriter, DeltaWriter, InstructionSink, encode_code_table};

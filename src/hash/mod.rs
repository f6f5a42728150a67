// Match finding for the encoder.
//
// This module provides:
// - A Rabin-Karp rolling hash and byte comparison helpers
// - A block index over the dictionary, shareable between sessions
// - A greedy matcher that emits ADD/COPY/RUN through `InstructionSink`

pub mod index;
pub mod matching;
pub mod rolling;

pub use index::DictionaryIndex;
pub use matching::MatchEngine;

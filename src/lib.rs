//! vcdelta: streaming VCDIFF (RFC 3284) delta encoding and decoding.
//!
//! The crate provides:
//! - The VCDIFF wire format and a resumable streaming decoder (`vcdiff`),
//!   including the SDCH extensions (per-window Adler-32 checksums and
//!   interleaved sections) and custom code tables
//! - A dictionary match finder (`hash`)
//! - Encoder sessions and one-shot helpers (`engine`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use vcdelta::engine;
//!
//! let dictionary = b"hello old world, hello old friend";
//! let target = b"hello new world, hello old friend";
//!
//! let delta = engine::encode(dictionary, target).unwrap();
//! let decoded = engine::decode(dictionary, &delta).unwrap();
//! assert_eq!(decoded, target);
//! ```
//!
//! Deltas can also be decoded incrementally, in chunks of any size:
//!
//! ```
//! use vcdelta::vcdiff::StreamingDecoder;
//!
//! # let dictionary = b"hello old world, hello old friend";
//! # let delta = vcdelta::engine::encode(dictionary, b"hello new world").unwrap();
//! let mut decoder = StreamingDecoder::new();
//! let mut output = Vec::new();
//! decoder.start_decoding(dictionary).unwrap();
//! for chunk in delta.chunks(3) {
//!     decoder.decode_chunk(chunk, &mut output).unwrap();
//! }
//! decoder.finish_decoding().unwrap();
//! assert_eq!(output, b"hello new world");
//! ```

pub mod engine;
pub mod hash;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;

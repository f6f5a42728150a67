// JSON rendering of a delta, for inspection and debugging.
//
// The output is a single JSON array spanning all windows.  ADD and RUN
// become strings holding the bytes they produce; COPY becomes two numbers,
// address then length.  Valid UTF-8 passes through; any other byte,
// including half of a character split between two instructions, is
// written as `\u00XX`:
//
//   ["The quick brown ",0,10,"jumps",...]

use std::fmt::Write as _;

use serde_json::Value;

use super::error::EncodeError;
use super::header::Version;
use super::writer::{DeltaWriter, InstructionSink};

/// `DeltaWriter` producing a JSON array instead of VCDIFF.
#[derive(Debug, Default)]
pub struct JsonWriter {
    window: String,
    open: bool,
    finished: bool,
    wrote_item: bool,
}

impl JsonWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), EncodeError> {
        if self.open {
            Ok(())
        } else {
            Err(EncodeError::Usage("instruction outside an open window"))
        }
    }

    fn push_item(&mut self, item: &str) {
        if self.wrote_item {
            self.window.push(',');
        }
        self.window.push_str(item);
        self.wrote_item = true;
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        let mut quoted = String::with_capacity(bytes.len() + 2);
        quoted.push('"');
        for chunk in bytes.utf8_chunks() {
            let escaped = Value::from(chunk.valid()).to_string();
            quoted.push_str(&escaped[1..escaped.len() - 1]);
            for byte in chunk.invalid() {
                let _ = write!(quoted, "\\u{byte:04x}");
            }
        }
        quoted.push('"');
        self.push_item(&quoted);
    }

    fn open(&mut self) -> Result<(), EncodeError> {
        if self.finished {
            return Err(EncodeError::Usage("writer already finished"));
        }
        if self.open {
            return Err(EncodeError::Usage("window already open"));
        }
        self.open = true;
        Ok(())
    }
}

impl InstructionSink for JsonWriter {
    fn add(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(());
        }
        self.push_bytes(data);
        Ok(())
    }

    fn copy(&mut self, address: u64, size: u32) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if size == 0 {
            return Ok(());
        }
        self.push_item(&format!("{address},{size}"));
        Ok(())
    }

    fn run(&mut self, size: u32, byte: u8) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if size == 0 {
            return Ok(());
        }
        self.push_bytes(&vec![byte; size as usize]);
        Ok(())
    }
}

impl DeltaWriter for JsonWriter {
    fn write_header(&mut self, _version: Version, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.push(b'[');
        Ok(())
    }

    fn init(&mut self, _dictionary_size: u64) -> Result<(), EncodeError> {
        self.open()
    }

    fn init_target_segment(&mut self, _position: u64, _length: u64) -> Result<(), EncodeError> {
        self.open()
    }

    fn add_checksum(&mut self, _checksum: u32) {}

    fn output(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.ensure_open()?;
        out.extend_from_slice(self.window.as_bytes());
        self.window.clear();
        self.open = false;
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.open {
            return Err(EncodeError::Usage("finish with an open window"));
        }
        self.finished = true;
        out.push(b']');
        Ok(())
    }
}

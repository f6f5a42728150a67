// Code table reader: turns an opcode stream back into instructions.
//
// Resumable: an instruction whose explicit size is cut off by the end of
// the available input is not consumed at all, and the most recently
// returned instruction can be pushed back with `unget_instruction` when its
// payload turns out to be incomplete.

use std::sync::Arc;

use super::code_table::{CodeTable, Instruction, Slot};
use super::cursor::Cursor;
use super::error::{ParseError, ParseResult};
use super::varint;

/// Decoder-side view of a code table.
#[derive(Debug, Clone)]
pub struct CodeTableReader {
    table: Arc<CodeTable>,
    /// Second slot of the last opcode, not yet returned.
    pending_second: Option<Slot>,
    /// Cursor position and pending state before the last `next_instruction`.
    last_start: usize,
    last_pending_second: Option<Slot>,
}

impl CodeTableReader {
    pub fn new(table: Arc<CodeTable>) -> Self {
        Self {
            table,
            pending_second: None,
            last_start: 0,
            last_pending_second: None,
        }
    }

    /// Swap in a different (already validated) table.
    pub fn set_table(&mut self, table: Arc<CodeTable>) {
        self.table = table;
        self.init();
    }

    /// Forget any half-returned opcode.  Called at the start of each window.
    pub fn init(&mut self) {
        self.pending_second = None;
        self.last_pending_second = None;
        self.last_start = 0;
    }

    /// Fetch the next instruction, or `None` when the stream holds no more
    /// opcodes.  NOOP slots are skipped.
    pub fn next_instruction(&mut self, cursor: &mut Cursor<'_>) -> ParseResult<Option<Instruction>> {
        self.last_start = cursor.position();
        self.last_pending_second = self.pending_second;
        loop {
            let slot = match self.pending_second.take() {
                Some(second) => second,
                None => {
                    if cursor.is_empty() {
                        return Ok(None);
                    }
                    let entry = *self.table.entry(cursor.read_byte()?);
                    if !entry.second.is_noop() {
                        self.pending_second = Some(entry.second);
                    }
                    entry.first
                }
            };
            if slot.is_noop() {
                continue;
            }
            let size = if slot.size == 0 {
                match varint::parse_int32(cursor) {
                    Ok(size) => size,
                    Err(ParseError::NeedMoreData) => {
                        self.unget_instruction(cursor);
                        return Err(ParseError::NeedMoreData);
                    }
                    Err(e) => return Err(e),
                }
            } else {
                u32::from(slot.size)
            };
            // Validated tables only contain ADD, RUN and COPY in non-NOOP slots.
            if let Some(inst) = Instruction::from_slot(slot, size) {
                return Ok(Some(inst));
            }
        }
    }

    /// Push back the instruction returned by the last `next_instruction`
    /// call.  Only valid immediately after that call, on the same cursor.
    pub fn unget_instruction(&mut self, cursor: &mut Cursor<'_>) {
        cursor.set_position(self.last_start);
        self.pending_second = self.last_pending_second;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> CodeTableReader {
        CodeTableReader::new(CodeTable::default_table())
    }

    #[test]
    fn single_and_explicit_sizes() {
        // ADD(3), ADD explicit 100, RUN explicit 5, COPY(4, mode 0)
        let bytes = [4, 1, 100, 0, 5, 20];
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 3 })));
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 100 })));
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Run { size: 5 })));
        assert_eq!(
            r.next_instruction(&mut c),
            Ok(Some(Instruction::Copy { size: 4, mode: 0 }))
        );
        assert_eq!(r.next_instruction(&mut c), Ok(None));
    }

    #[test]
    fn double_opcode_returns_two_instructions() {
        // 163 = ADD(1) + COPY(4, mode 0)
        let bytes = [163];
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 1 })));
        assert!(c.is_empty());
        assert_eq!(
            r.next_instruction(&mut c),
            Ok(Some(Instruction::Copy { size: 4, mode: 0 }))
        );
        assert_eq!(r.next_instruction(&mut c), Ok(None));
    }

    #[test]
    fn incomplete_size_consumes_nothing() {
        let bytes = [1, 0x81];
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        assert_eq!(r.next_instruction(&mut c), Err(ParseError::NeedMoreData));
        assert_eq!(c.position(), 0);

        let full = [1, 0x81, 0x00];
        let mut c = Cursor::new(&full);
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 128 })));
    }

    #[test]
    fn unget_restores_pending_second() {
        let bytes = [163, 5];
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 1 })));
        let copy = r.next_instruction(&mut c);
        assert_eq!(copy, Ok(Some(Instruction::Copy { size: 4, mode: 0 })));
        r.unget_instruction(&mut c);
        assert_eq!(c.position(), 1);
        assert_eq!(r.next_instruction(&mut c), copy);

        // Ungetting the first half rewinds over the opcode byte.
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        r.next_instruction(&mut c).unwrap();
        r.unget_instruction(&mut c);
        assert_eq!(c.position(), 0);
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 1 })));
    }

    #[test]
    fn oversized_explicit_size_is_malformed() {
        let bytes = [1, 0x88, 0x80, 0x80, 0x80, 0x00];
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        assert!(matches!(
            r.next_instruction(&mut c),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn zero_explicit_size_is_returned() {
        let bytes = [1, 0];
        let mut r = reader();
        let mut c = Cursor::new(&bytes);
        assert_eq!(r.next_instruction(&mut c), Ok(Some(Instruction::Add { size: 0 })));
    }
}

// Parse cursor over the currently available, not-yet-consumed input.
//
// A cursor is a cheap `Copy` view: a parse that might run out of bytes
// works on a copy and writes it back only on success, so a failed parse
// leaves the caller's cursor where it was.

use super::error::{ParseError, ParseResult};

#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute stream offset of `data[0]`, used for error reporting.
    base: u64,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Rewind or advance to a position previously obtained from `position`.
    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        debug_assert!(pos <= self.data.len());
        self.pos = pos;
    }

    /// Absolute stream offset of the next unread byte.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    #[inline]
    pub fn read_byte(&mut self) -> ParseResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(ParseError::NeedMoreData)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> ParseResult<&'a [u8]> {
        if self.remaining_len() < len {
            return Err(ParseError::NeedMoreData);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Split off the next `len` bytes as an independent cursor and skip them.
    /// The caller must have checked that `len` bytes are available.
    pub fn take(&mut self, len: usize) -> Cursor<'a> {
        let sub = Cursor {
            data: &self.data[self.pos..self.pos + len],
            pos: 0,
            base: self.offset(),
        };
        self.pos += len;
        sub
    }

    /// A cursor over at most the next `len` bytes, without advancing `self`.
    pub fn window(&self, len: usize) -> Cursor<'a> {
        let end = self.pos + len.min(self.remaining_len());
        Cursor {
            data: &self.data[self.pos..end],
            pos: 0,
            base: self.offset(),
        }
    }

    #[inline]
    pub fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.remaining_len());
        self.pos += len;
    }
}

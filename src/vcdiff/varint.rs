// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first.
// Each byte has bit 7 set except the final byte.
//
// Decoding is resumable: running out of input yields `NeedMoreData` and
// leaves the cursor untouched, while an over-long or out-of-range value is
// `Malformed(InvalidVarint)`.

use super::cursor::Cursor;
use super::error::{FormatError, ParseError, ParseResult};

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
const MAX_VARINT_LEN: usize = 10;

/// Longest legal encoding of a 31-bit (int32) value.
pub const MAX_INT32_LEN: usize = 5;

/// Longest legal encoding of a 63-bit (int64) value.
pub const MAX_INT64_LEN: usize = 9;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `num` into the tail of `buf`, returning the number of bytes used.
///
/// Fills the scratch buffer from the end with the continuation bit set on
/// every byte, then clears it on the final byte.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = MAX_VARINT_LEN;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    buf[MAX_VARINT_LEN - 1] &= 0x7F; // clear MSB on last byte
    MAX_VARINT_LEN - i
}

/// Append the encoding of `num` to `out`.
#[inline]
pub fn append_u64(out: &mut Vec<u8>, num: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    out.extend_from_slice(&buf[MAX_VARINT_LEN - len..]);
}

#[inline]
pub fn append_u32(out: &mut Vec<u8>, num: u32) {
    append_u64(out, u64::from(num));
}

/// Encoded byte-length of a value.
#[inline]
pub fn encoded_len(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn parse_bounded(cursor: &mut Cursor<'_>, max_len: usize, max_value: u64) -> ParseResult<u64> {
    let mut c = *cursor;
    let mut val: u64 = 0;
    for _ in 0..max_len {
        let byte = c.read_byte()?;
        val = (val << 7) | u64::from(byte & 0x7F);
        if val > max_value {
            return Err(ParseError::Malformed(FormatError::InvalidVarint));
        }
        if byte & 0x80 == 0 {
            *cursor = c;
            return Ok(val);
        }
    }
    Err(ParseError::Malformed(FormatError::InvalidVarint))
}

/// Parse a non-negative 32-bit signed integer (at most 5 bytes, `<= i32::MAX`).
pub fn parse_int32(cursor: &mut Cursor<'_>) -> ParseResult<u32> {
    parse_bounded(cursor, MAX_INT32_LEN, i32::MAX as u64).map(|v| v as u32)
}

/// Parse a non-negative 64-bit signed integer (at most 9 bytes, `<= i64::MAX`).
pub fn parse_int64(cursor: &mut Cursor<'_>) -> ParseResult<u64> {
    parse_bounded(cursor, MAX_INT64_LEN, i64::MAX as u64)
}

/// Parse an unsigned 32-bit integer.  The encoding may use the wider int64
/// form, but the value must fit in 32 bits.
pub fn parse_uint32(cursor: &mut Cursor<'_>) -> ParseResult<u32> {
    let mut c = *cursor;
    let val = parse_int64(&mut c)?;
    let val = u32::try_from(val).map_err(|_| ParseError::Malformed(FormatError::InvalidVarint))?;
    *cursor = c;
    Ok(val)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(val: u64) -> Vec<u8> {
        let mut out = Vec::new();
        append_u64(&mut out, val);
        out
    }

    #[test]
    fn roundtrip_int32() {
        let cases: &[u32] = &[0, 1, 127, 128, 16383, 16384, i32::MAX as u32];
        for &val in cases {
            let bytes = encoded(u64::from(val));
            assert_eq!(bytes.len(), encoded_len(u64::from(val)));
            let mut c = Cursor::new(&bytes);
            assert_eq!(parse_int32(&mut c), Ok(val), "roundtrip failed for {val}");
            assert!(c.is_empty());
        }
    }

    #[test]
    fn encoding_is_big_endian() {
        // 300 = 0b100101100 = two groups: (10) (0101100) = 0x82 0x2C
        assert_eq!(encoded(300), vec![0x82, 0x2C]);
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(127), vec![0x7F]);
        assert_eq!(encoded(128), vec![0x81, 0x00]);
    }

    #[test]
    fn int32_rejects_values_above_i32_max() {
        let bytes = encoded(i32::MAX as u64 + 1);
        let mut c = Cursor::new(&bytes);
        assert_eq!(
            parse_int32(&mut c),
            Err(ParseError::Malformed(FormatError::InvalidVarint))
        );
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn int32_rejects_too_many_bytes() {
        // Six bytes of leading zero groups: value fits but encoding is too long.
        let bytes = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        let mut c = Cursor::new(&bytes);
        assert_eq!(
            parse_int32(&mut c),
            Err(ParseError::Malformed(FormatError::InvalidVarint))
        );
    }

    #[test]
    fn truncated_varint_needs_more_data() {
        let bytes = [0x81, 0x80];
        let mut c = Cursor::new(&bytes);
        assert_eq!(parse_int32(&mut c), Err(ParseError::NeedMoreData));
        assert_eq!(c.position(), 0);
        let mut empty = Cursor::new(&[]);
        assert_eq!(parse_int64(&mut empty), Err(ParseError::NeedMoreData));
    }

    #[test]
    fn uint32_accepts_full_range() {
        let bytes = encoded(u64::from(u32::MAX));
        assert_eq!(bytes.len(), 5);
        assert_eq!(parse_uint32(&mut Cursor::new(&bytes)), Ok(u32::MAX));
        // Padded wide form is still a valid uint32.
        let wide = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(parse_uint32(&mut Cursor::new(&wide)), Ok(1));
        let too_big = encoded(u64::from(u32::MAX) + 1);
        assert_eq!(
            parse_uint32(&mut Cursor::new(&too_big)),
            Err(ParseError::Malformed(FormatError::InvalidVarint))
        );
    }

    #[test]
    fn int64_roundtrip_and_overflow() {
        let bytes = encoded(i64::MAX as u64);
        assert_eq!(bytes.len(), MAX_INT64_LEN);
        assert_eq!(parse_int64(&mut Cursor::new(&bytes)), Ok(i64::MAX as u64));
        let bytes = encoded(u64::MAX);
        assert_eq!(
            parse_int64(&mut Cursor::new(&bytes)),
            Err(ParseError::Malformed(FormatError::InvalidVarint))
        );
    }

    #[test]
    fn stops_at_terminator() {
        let bytes = [0x82, 0x2C, 0x05];
        let mut c = Cursor::new(&bytes);
        assert_eq!(parse_int32(&mut c), Ok(300));
        assert_eq!(parse_int32(&mut c), Ok(5));
        assert!(c.is_empty());
    }
}

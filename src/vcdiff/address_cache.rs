// VCDIFF address cache (RFC 3284, Section 5.3).
//
// Implements the NEAR and SAME address caches used to compactly encode
// COPY instruction addresses.  Encoder and decoder run the same update
// rule after every address, and both reset the cache at the start of
// every window.

use super::cursor::Cursor;
use super::error::{FormatError, ParseResult};
use super::varint;

// ---------------------------------------------------------------------------
// Address modes (RFC 3284 Section 5.3)
// ---------------------------------------------------------------------------

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// Address relative to "here" (current position in address space).
pub const VCD_HERE: u8 = 1;
/// First NEAR mode.
pub const VCD_FIRST_NEAR_MODE: u8 = 2;

/// Modes must fit in a byte: `2 + near + same <= 256`.
const MAX_CACHE_SIZES: u16 = 254;

// ---------------------------------------------------------------------------
// Address cache
// ---------------------------------------------------------------------------

/// NEAR/SAME address cache.
///
/// Default configuration (near=4, same=3) gives 9 address modes:
///   0      VCD_SELF  : absolute
///   1      VCD_HERE  : here - value
///   2..5   NEAR      : near\[mode-2\] + value
///   6..8   SAME      : same\[(mode-6)*256 + byte\]
#[derive(Clone, Debug)]
pub struct AddressCache {
    near_size: u8,
    same_size: u8,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    /// Create a cache, rejecting sizes whose modes would not fit in a byte.
    pub fn new(near_size: u8, same_size: u8) -> Result<Self, FormatError> {
        if u16::from(near_size) + u16::from(same_size) > MAX_CACHE_SIZES {
            return Err(FormatError::InvalidCacheSizes {
                near: near_size,
                same: same_size,
            });
        }
        Ok(Self {
            near_size,
            same_size,
            near: vec![0; usize::from(near_size)],
            same: vec![0; usize::from(same_size) * 256],
            next_slot: 0,
        })
    }

    /// Reset cache state to all zeros.  Called at the start of each window.
    pub fn init(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    #[inline]
    pub fn near_size(&self) -> u8 {
        self.near_size
    }

    #[inline]
    pub fn same_size(&self) -> u8 {
        self.same_size
    }

    /// The first SAME mode (2 + near).
    #[inline]
    pub fn first_same_mode(&self) -> u8 {
        VCD_FIRST_NEAR_MODE + self.near_size
    }

    /// Largest valid mode (1 + near + same).
    #[inline]
    pub fn max_mode(&self) -> u8 {
        VCD_HERE + self.near_size + self.same_size
    }

    /// Record an encoded or decoded address.
    #[inline]
    fn update(&mut self, addr: u64) {
        if self.near_size > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % usize::from(self.near_size);
        }
        if self.same_size > 0 {
            let idx = (addr % (u64::from(self.same_size) * 256)) as usize;
            self.same[idx] = addr;
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encode an address, selecting the cheapest mode, and update the cache.
    ///
    /// `here` is the current position in the address space (source segment
    /// length plus target bytes produced so far in this window).
    pub fn encode(&mut self, addr: u64, here: u64) -> (u8, EncodedAddr) {
        debug_assert!(addr < here);

        if self.same_size > 0 {
            let idx = (addr % (u64::from(self.same_size) * 256)) as usize;
            if self.same[idx] == addr {
                self.update(addr);
                let mode = self.first_same_mode() + (idx / 256) as u8;
                return (mode, EncodedAddr::SameByte((idx % 256) as u8));
            }
        }

        let mut best_d = addr;
        let mut best_m = VCD_SELF;

        let d = here - addr;
        if d < best_d {
            best_d = d;
            best_m = VCD_HERE;
        }

        for (i, &near) in self.near.iter().enumerate() {
            if addr >= near && addr - near < best_d {
                best_d = addr - near;
                best_m = VCD_FIRST_NEAR_MODE + i as u8;
            }
        }

        self.update(addr);
        (best_m, EncodedAddr::VarInt(best_d))
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Decode the address of a COPY instruction with the given mode.
    ///
    /// The cache is only updated once the address is complete and valid, so
    /// a `NeedMoreData` result can be retried after more input arrives.
    pub fn decode(&mut self, here: u64, mode: u8, cursor: &mut Cursor<'_>) -> ParseResult<u64> {
        if mode > self.max_mode() {
            return Err(FormatError::InvalidMode(mode).into());
        }
        let mut c = *cursor;
        let addr = if mode < self.first_same_mode() {
            let raw = u64::from(varint::parse_int32(&mut c)?);
            let addr = match mode {
                VCD_SELF => Some(raw),
                VCD_HERE => here.checked_sub(raw),
                _ => self.near[usize::from(mode - VCD_FIRST_NEAR_MODE)].checked_add(raw),
            };
            addr.ok_or(FormatError::InvalidAddress {
                address: here as i64 - raw as i64,
                here,
            })?
        } else {
            let slot = usize::from(mode - self.first_same_mode());
            let byte = usize::from(c.read_byte()?);
            self.same[slot * 256 + byte]
        };

        if addr >= here {
            return Err(FormatError::AddressBeyondHere {
                address: addr,
                here,
            }
            .into());
        }

        *cursor = c;
        self.update(addr);
        Ok(addr)
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self {
            near_size: 4,
            same_size: 3,
            near: vec![0; 4],
            same: vec![0; 3 * 256],
            next_slot: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoded address representation
// ---------------------------------------------------------------------------

/// The encoded form of an address produced by `AddressCache::encode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedAddr {
    /// A variable-length integer (SELF, HERE, NEAR modes).
    VarInt(u64),
    /// A single raw byte (SAME mode).
    SameByte(u8),
}

impl EncodedAddr {
    pub fn append_to(&self, out: &mut Vec<u8>) {
        match *self {
            EncodedAddr::VarInt(v) => varint::append_u64(out, v),
            EncodedAddr::SameByte(b) => out.push(b),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

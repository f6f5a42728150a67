// Rolling hash and byte comparison helpers for the match finder.
//
// The hash is a Rabin-Karp polynomial over a fixed window, computed modulo
// a power of two so that wrapping arithmetic followed by a mask is exact.
// Sliding the window by one byte is O(1).

/// Window width, in bytes, of every hash the match finder computes.
pub const BLOCK_SIZE: usize = 16;

/// Polynomial base.
const HASH_BASE: u32 = 257;

/// Hashes are kept modulo 2^HASH_BITS.
pub const HASH_BITS: u32 = 23;
const HASH_MASK: u32 = (1 << HASH_BITS) - 1;

/// Rabin-Karp hash over a window of `window` bytes.
#[derive(Debug, Clone, Copy)]
pub struct RollingHash {
    window: usize,
    /// `HASH_BASE^(window - 1)`, the weight of the oldest byte.
    remove_factor: u32,
}

impl RollingHash {
    pub fn new(window: usize) -> Self {
        debug_assert!(window > 0);
        let mut remove_factor: u32 = 1;
        for _ in 1..window {
            remove_factor = remove_factor.wrapping_mul(HASH_BASE) & HASH_MASK;
        }
        Self {
            window,
            remove_factor,
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Full hash of `bytes[..window]`.
    #[inline]
    pub fn hash(&self, bytes: &[u8]) -> u32 {
        debug_assert!(bytes.len() >= self.window);
        bytes[..self.window].iter().fold(0u32, |h, &b| {
            h.wrapping_mul(HASH_BASE).wrapping_add(u32::from(b)) & HASH_MASK
        })
    }

    /// Slide the window one byte: drop `oldest`, append `newest`.
    #[inline(always)]
    pub fn update(&self, old: u32, oldest: u8, newest: u8) -> u32 {
        let without = old.wrapping_sub(u32::from(oldest).wrapping_mul(self.remove_factor));
        without
            .wrapping_mul(HASH_BASE)
            .wrapping_add(u32::from(newest))
            & HASH_MASK
    }
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new(BLOCK_SIZE)
    }
}

/// Fold a hash into a table of `mask + 1` buckets.
#[inline(always)]
pub fn bucket(hash: u32, mask: usize) -> usize {
    ((hash ^ (hash >> 11)) as usize) & mask
}

// ---------------------------------------------------------------------------
// Byte comparison
// ---------------------------------------------------------------------------

/// Number of equal leading bytes of `s1` and `s2`, at most `n`.
///
/// Compares eight bytes at a time.
#[inline]
pub fn forward_match(s1: &[u8], s2: &[u8], n: usize) -> usize {
    let n = n.min(s1.len()).min(s2.len());
    let mut i = 0;
    while i + 8 <= n {
        let a = u64::from_le_bytes(s1[i..i + 8].try_into().unwrap_or([0; 8]));
        let b = u64::from_le_bytes(s2[i..i + 8].try_into().unwrap_or([0; 8]));
        let xor = a ^ b;
        if xor != 0 {
            return i + (xor.trailing_zeros() / 8) as usize;
        }
        i += 8;
    }
    while i < n && s1[i] == s2[i] {
        i += 1;
    }
    i
}

/// Number of equal trailing bytes of `s1` and `s2`, at most `n`.
#[inline]
pub fn backward_match(s1: &[u8], s2: &[u8], n: usize) -> usize {
    let n = n.min(s1.len()).min(s2.len());
    s1.iter()
        .rev()
        .zip(s2.iter().rev())
        .take(n)
        .take_while(|(a, b)| a == b)
        .count()
}

/// Length of the run of `byte` at the start of `data`, at most `max`.
#[inline]
pub fn find_run_length(data: &[u8], byte: u8, max: usize) -> usize {
    data.iter().take(max).take_while(|&&b| b == byte).count()
}

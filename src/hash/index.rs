// Block index over a dictionary.
//
// Every BLOCK_SIZE-aligned block of the dictionary is hashed once.  Blocks
// with the same bucket are chained newest-first, so a lookup walks from
// the latest occurrence backwards.  The index is immutable after
// construction and can be shared between encoder sessions behind an `Arc`.

use log::debug;

use super::rolling::{BLOCK_SIZE, RollingHash, bucket};

/// Offset added to stored block numbers so 0 means "empty".
const HASH_CKOFFSET: u32 = 1;

/// Upper bound on candidates examined per lookup.
pub const MAX_CHAIN: usize = 32;

/// Hash index of a dictionary's blocks.
#[derive(Debug, Clone)]
pub struct DictionaryIndex {
    dictionary: Vec<u8>,
    hasher: RollingHash,
    /// Bucket -> last block number + HASH_CKOFFSET.
    buckets: Vec<u32>,
    /// Block number -> previous block number in the same bucket + HASH_CKOFFSET.
    chain: Vec<u32>,
    mask: usize,
}

impl DictionaryIndex {
    /// Copy `dictionary` and index its blocks.
    pub fn new(dictionary: &[u8]) -> Self {
        let hasher = RollingHash::new(BLOCK_SIZE);
        // Block numbers must fit in u32 after the offset.
        let blocks = (dictionary.len() / BLOCK_SIZE).min((u32::MAX - HASH_CKOFFSET) as usize);
        let size = blocks.max(1).next_power_of_two();
        let mask = size - 1;
        let mut buckets = vec![0u32; size];
        let mut chain = vec![0u32; blocks];

        for (block, slot) in chain.iter_mut().enumerate() {
            let start = block * BLOCK_SIZE;
            let b = bucket(hasher.hash(&dictionary[start..]), mask);
            *slot = buckets[b];
            buckets[b] = block as u32 + HASH_CKOFFSET;
        }
        debug!("indexed {blocks} blocks of a {} byte dictionary", dictionary.len());

        Self {
            dictionary: dictionary.to_vec(),
            hasher,
            buckets,
            chain,
            mask,
        }
    }

    pub fn dictionary(&self) -> &[u8] {
        &self.dictionary
    }

    pub fn hasher(&self) -> &RollingHash {
        &self.hasher
    }

    /// Number of indexed blocks.
    pub fn block_count(&self) -> usize {
        self.chain.len()
    }

    /// Start offsets of dictionary blocks whose hash shares a bucket with
    /// `hash`, newest first, at most `MAX_CHAIN`.  Callers verify bytes.
    pub fn candidates(&self, hash: u32) -> Candidates<'_> {
        Candidates {
            chain: &self.chain,
            next: self.buckets[bucket(hash, self.mask)],
            left: MAX_CHAIN,
        }
    }
}

/// Iterator over candidate block offsets.
pub struct Candidates<'a> {
    chain: &'a [u32],
    next: u32,
    left: usize,
}

impl Iterator for Candidates<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next == 0 || self.left == 0 {
            return None;
        }
        let block = (self.next - HASH_CKOFFSET) as usize;
        self.next = self.chain[block];
        self.left -= 1;
        Some(block * BLOCK_SIZE)
    }
}

/// Index of positions already passed in the current target window.  One
/// entry per bucket: a newer position replaces the older one.
#[derive(Debug, Clone)]
pub struct TargetIndex {
    buckets: Vec<u32>,
    mask: usize,
}

impl TargetIndex {
    pub fn new(target_len: usize) -> Self {
        let size = target_len.clamp(16, 1 << 20).next_power_of_two();
        Self {
            buckets: vec![0; size],
            mask: size - 1,
        }
    }

    pub fn insert(&mut self, hash: u32, position: usize) {
        if let Ok(position) = u32::try_from(position)
            && position < u32::MAX - HASH_CKOFFSET
        {
            self.buckets[bucket(hash, self.mask)] = position + HASH_CKOFFSET;
        }
    }

    pub fn lookup(&self, hash: u32) -> Option<usize> {
        match self.buckets[bucket(hash, self.mask)] {
            0 => None,
            stored => Some((stored - HASH_CKOFFSET) as usize),
        }
    }
}

// Greedy block matching for delta compression.
//
// The target is scanned one byte at a time with a rolling hash:
//   1. Runs of at least MIN_RUN identical bytes become RUN.
//   2. The hash selects candidate source blocks (and, optionally, earlier
//      positions of the same target window); each candidate is verified,
//      extended forward, then backward into the pending literal bytes.
//   3. The longest verified match becomes COPY; bytes between matches
//      become ADD.
// Instructions are handed to an `InstructionSink` in target order.

use super::index::{DictionaryIndex, TargetIndex};
use super::rolling::{BLOCK_SIZE, backward_match, find_run_length, forward_match};
use crate::vcdiff::error::EncodeError;
use crate::vcdiff::writer::InstructionSink;

/// Shortest COPY the engine emits.
pub const MIN_MATCH: usize = BLOCK_SIZE;

/// Shortest run of one byte value encoded as RUN.
pub const MIN_RUN: usize = 8;

/// Largest size of a single instruction.
const MAX_INSTRUCTION: usize = i32::MAX as usize;

/// A verified match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Position in the target where the match starts.
    pub target_pos: usize,
    pub length: usize,
    /// COPY address: source segment offset, or source segment length plus
    /// target offset for a match inside the target window.
    pub address: u64,
}

/// Finds matches for one target window against a source segment.
pub struct MatchEngine<'a> {
    source: &'a DictionaryIndex,
    look_for_target_matches: bool,
}

impl<'a> MatchEngine<'a> {
    /// `source` indexes the window's source segment.
    pub fn new(source: &'a DictionaryIndex, look_for_target_matches: bool) -> Self {
        Self {
            source,
            look_for_target_matches,
        }
    }

    /// Emit instructions that rebuild `target` into `sink`.
    pub fn encode<S: InstructionSink + ?Sized>(&self, target: &[u8], sink: &mut S) -> Result<(), EncodeError> {
        let hasher = *self.source.hasher();
        let mut target_index = self
            .look_for_target_matches
            .then(|| TargetIndex::new(target.len()));
        let mut pos = 0;
        let mut literal_start = 0;
        let mut hash: Option<u32> = None;

        while pos < target.len() {
            let byte = target[pos];
            let run = find_run_length(&target[pos..], byte, MAX_INSTRUCTION);
            if run >= MIN_RUN {
                sink.add(&target[literal_start..pos])?;
                sink.run(instruction_size("run length", run)?, byte)?;
                pos += run;
                literal_start = pos;
                hash = None;
                continue;
            }

            if pos + BLOCK_SIZE > target.len() {
                pos += 1;
                continue;
            }

            let h = hash.unwrap_or_else(|| hasher.hash(&target[pos..]));
            if let Some(m) = self.best_match(target, pos, literal_start, h, target_index.as_ref()) {
                sink.add(&target[literal_start..m.target_pos])?;
                sink.copy(m.address, instruction_size("copy length", m.length)?)?;
                pos = m.target_pos + m.length;
                literal_start = pos;
                hash = None;
                continue;
            }

            if let Some(index) = target_index.as_mut() {
                index.insert(h, pos);
            }
            hash = (pos + BLOCK_SIZE < target.len())
                .then(|| hasher.update(h, target[pos], target[pos + BLOCK_SIZE]));
            pos += 1;
        }

        sink.add(&target[literal_start..])
    }

    /// Longest verified match covering `pos`, extended backwards no further
    /// than `literal_start`.
    fn best_match(
        &self,
        target: &[u8],
        pos: usize,
        literal_start: usize,
        hash: u32,
        target_index: Option<&TargetIndex>,
    ) -> Option<Match> {
        let source = self.source.dictionary();
        let max_back = pos - literal_start;
        let pending = &target[literal_start..pos];
        let mut best: Option<Match> = None;
        let mut consider = |m: Match| {
            if best.is_none_or(|b| m.length > b.length) {
                best = Some(m);
            }
        };

        for candidate in self.source.candidates(hash) {
            let forward = forward_match(&source[candidate..], &target[pos..], MAX_INSTRUCTION);
            if forward < MIN_MATCH {
                continue;
            }
            let back = backward_match(&source[..candidate], pending, max_back);
            consider(Match {
                target_pos: pos - back,
                length: (back + forward).min(MAX_INSTRUCTION),
                address: (candidate - back) as u64,
            });
        }

        if let Some(candidate) = target_index.and_then(|index| index.lookup(hash)) {
            let forward = forward_match(&target[candidate..], &target[pos..], MAX_INSTRUCTION);
            if forward >= MIN_MATCH {
                let back = backward_match(&target[..candidate], pending, max_back);
                consider(Match {
                    target_pos: pos - back,
                    length: (back + forward).min(MAX_INSTRUCTION),
                    address: (source.len() + candidate - back) as u64,
                });
            }
        }

        best
    }
}

fn instruction_size(what: &'static str, size: usize) -> Result<u32, EncodeError> {
    u32::try_from(size).map_err(|_| EncodeError::TooLarge {
        what,
        value: size as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Add(Vec<u8>),
        Copy(u64, u32),
        Run(u32, u8),
    }

    #[derive(Default)]
    struct Recorder(Vec<Op>);

    impl InstructionSink for Recorder {
        fn add(&mut self, data: &[u8]) -> Result<(), EncodeError> {
            if !data.is_empty() {
                self.0.push(Op::Add(data.to_vec()));
            }
            Ok(())
        }
        fn copy(&mut self, address: u64, size: u32) -> Result<(), EncodeError> {
            self.0.push(Op::Copy(address, size));
            Ok(())
        }
        fn run(&mut self, size: u32, byte: u8) -> Result<(), EncodeError> {
            self.0.push(Op::Run(size, byte));
            Ok(())
        }
    }

    /// Rebuild the target the way a decoder would.
    fn replay(source: &[u8], ops: &[Op]) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            match op {
                Op::Add(data) => out.extend_from_slice(data),
                Op::Run(size, byte) => out.resize(out.len() + *size as usize, *byte),
                Op::Copy(address, size) => {
                    for i in 0..*size as usize {
                        let a = *address as usize + i;
                        let b = if a < source.len() {
                            source[a]
                        } else {
                            out[a - source.len()]
                        };
                        out.push(b);
                    }
                }
            }
        }
        out
    }

    fn encode(source: &[u8], target: &[u8], target_matches: bool) -> Vec<Op> {
        let index = DictionaryIndex::new(source);
        let mut recorder = Recorder::default();
        MatchEngine::new(&index, target_matches)
            .encode(target, &mut recorder)
            .unwrap();
        assert_eq!(replay(source, &recorder.0), target);
        recorder.0
    }

    #[test]
    fn no_source_is_one_add() {
        let ops = encode(b"", b"Hello, world!", false);
        assert_eq!(ops, vec![Op::Add(b"Hello, world!".to_vec())]);
    }

    #[test]
    fn identical_target_is_one_copy() {
        let source: Vec<u8> = (0..200u8).collect();
        let ops = encode(&source, &source, false);
        assert_eq!(ops, vec![Op::Copy(0, 200)]);
    }

    #[test]
    fn unaligned_match_is_extended_backwards() {
        let source: Vec<u8> = (0..128u8).collect();
        // Starts 5 bytes into a source block.
        let mut target = b"prefix".to_vec();
        target.extend_from_slice(&source[5..90]);
        let ops = encode(&source, &target, false);
        assert_eq!(ops, vec![Op::Add(b"prefix".to_vec()), Op::Copy(5, 85)]);
    }

    #[test]
    fn runs_are_detected() {
        let mut target = b"ab".to_vec();
        target.extend_from_slice(&[0xAA; 100]);
        target.push(b'c');
        let ops = encode(b"", &target, false);
        assert_eq!(
            ops,
            vec![Op::Add(b"ab".to_vec()), Op::Run(100, 0xAA), Op::Add(b"c".to_vec())]
        );
    }

    #[test]
    fn short_runs_stay_literal() {
        let ops = encode(b"", b"xaaaaaaay", false);
        assert_eq!(ops, vec![Op::Add(b"xaaaaaaay".to_vec())]);
    }

    #[test]
    fn target_matches_only_when_enabled() {
        let block: Vec<u8> = (0..40u8).collect();
        let target = [block.as_slice(), b"--", block.as_slice()].concat();
        let without = encode(b"", &target, false);
        assert!(without.iter().all(|op| matches!(op, Op::Add(_))));

        let with = encode(b"", &target, true);
        assert!(with.contains(&Op::Copy(0, 40)), "{with:?}");
    }

    #[test]
    fn mixed_content_round_trips() {
        let source = b"The quick brown fox jumps over the lazy dog. ".repeat(8);
        let mut target = source.clone();
        target.splice(100..110, b"0123456789abcdef".iter().copied());
        target.extend_from_slice(&[0u8; 30]);
        target.extend_from_slice(&source[..50]);
        for target_matches in [false, true] {
            let ops = encode(&source, &target, target_matches);
            assert!(ops.iter().any(|op| matches!(op, Op::Copy(..))));
        }
    }

    #[test]
    fn small_and_empty_targets() {
        for len in 0..BLOCK_SIZE {
            let target = vec![0x42; len];
            encode(b"0123456789abcdef0123", &target, true);
        }
    }
}

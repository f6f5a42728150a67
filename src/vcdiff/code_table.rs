// VCDIFF code tables (RFC 3284, Section 5.4 and 5.6).
//
// A code table maps each of the 256 opcodes to one or two instructions.
// The default table is built once per process; custom tables arrive in
// their canonical 1536-byte form (six 256-byte arrays) and are validated
// before use.  `InstructionMap` is the reverse index the writer uses to
// pick opcodes.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use super::error::FormatError;

/// Instruction types as stored in a code table.
pub const VCD_NOOP: u8 = 0;
pub const VCD_ADD: u8 = 1;
pub const VCD_RUN: u8 = 2;
pub const VCD_COPY: u8 = 3;

/// Default cache sizes (RFC 3284, Section 5.1).
pub const DEFAULT_NEAR_CACHE_SIZE: u8 = 4;
pub const DEFAULT_SAME_CACHE_SIZE: u8 = 3;

/// Largest address mode of the default table: SELF, HERE, 4 NEAR, 3 SAME.
pub const DEFAULT_MAX_MODE: u8 = 1 + DEFAULT_NEAR_CACHE_SIZE + DEFAULT_SAME_CACHE_SIZE;

/// Size of the canonical serialized form of a code table.
pub const CODE_TABLE_BYTES: usize = 6 * 256;

/// Minimum COPY size with a fixed-size opcode in the default table.
const MIN_MATCH: u8 = 4;

/// One instruction slot of an opcode.  `size == 0` means the size follows
/// as an explicit varint in the instruction stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    pub inst: u8,
    pub size: u8,
    pub mode: u8,
}

impl Slot {
    const fn new(inst: u8, size: u8, mode: u8) -> Self {
        Self { inst, size, mode }
    }

    const NOOP: Slot = Slot::new(VCD_NOOP, 0, 0);

    #[inline]
    pub fn is_noop(&self) -> bool {
        self.inst == VCD_NOOP
    }
}

/// A single entry in the 256-element code table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub first: Slot,
    pub second: Slot,
}

impl CodeTableEntry {
    const fn single(slot: Slot) -> Self {
        Self {
            first: slot,
            second: Slot::NOOP,
        }
    }
}

/// A complete 256-entry VCDIFF code table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeTable {
    entries: [CodeTableEntry; 256],
}

static DEFAULT_TABLE: LazyLock<Arc<CodeTable>> =
    LazyLock::new(|| Arc::new(build_default_code_table()));

static DEFAULT_TABLE_BYTES: LazyLock<Vec<u8>> = LazyLock::new(|| DEFAULT_TABLE.to_bytes());

/// Build the default RFC 3284 code table.
fn build_default_code_table() -> CodeTable {
    let mut tbl = [CodeTableEntry::default(); 256];
    let mut idx: usize = 0;

    const ADD_SIZES: u8 = 17;
    const NEAR_MODES: u8 = DEFAULT_NEAR_CACHE_SIZE;
    const CPY_SIZES: u8 = 15;
    const ADDCOPY_ADD_MAX: u8 = 4;
    const ADDCOPY_NEAR_CPY_MAX: u8 = 6;
    const ADDCOPY_SAME_CPY_MAX: u8 = 4;
    const COPYADD_NEAR_CPY_MAX: u8 = 4;
    const COPYADD_SAME_CPY_MAX: u8 = 4;

    // --- Index 0: RUN size=0, index 1: ADD size=0 ---
    tbl[idx] = CodeTableEntry::single(Slot::new(VCD_RUN, 0, 0));
    idx += 1;
    tbl[idx] = CodeTableEntry::single(Slot::new(VCD_ADD, 0, 0));
    idx += 1;

    // --- Indices 2..18: ADD size=1..17 ---
    for size in 1..=ADD_SIZES {
        tbl[idx] = CodeTableEntry::single(Slot::new(VCD_ADD, size, 0));
        idx += 1;
    }

    // --- COPY: for each mode, size=0 then sizes 4..18 ---
    for mode in 0..=DEFAULT_MAX_MODE {
        tbl[idx] = CodeTableEntry::single(Slot::new(VCD_COPY, 0, mode));
        idx += 1;
        for size in MIN_MATCH..MIN_MATCH + CPY_SIZES {
            tbl[idx] = CodeTableEntry::single(Slot::new(VCD_COPY, size, mode));
            idx += 1;
        }
    }

    // --- ADD+COPY double instructions ---
    for mode in 0..=DEFAULT_MAX_MODE {
        let cpy_max = if mode < 2 + NEAR_MODES {
            ADDCOPY_NEAR_CPY_MAX
        } else {
            ADDCOPY_SAME_CPY_MAX
        };
        for add_size in 1..=ADDCOPY_ADD_MAX {
            for cpy_size in MIN_MATCH..=cpy_max {
                tbl[idx] = CodeTableEntry {
                    first: Slot::new(VCD_ADD, add_size, 0),
                    second: Slot::new(VCD_COPY, cpy_size, mode),
                };
                idx += 1;
            }
        }
    }

    // --- COPY+ADD double instructions ---
    for mode in 0..=DEFAULT_MAX_MODE {
        let cpy_max = if mode < 2 + NEAR_MODES {
            COPYADD_NEAR_CPY_MAX
        } else {
            COPYADD_SAME_CPY_MAX
        };
        for cpy_size in MIN_MATCH..=cpy_max {
            tbl[idx] = CodeTableEntry {
                first: Slot::new(VCD_COPY, cpy_size, mode),
                second: Slot::new(VCD_ADD, 1, 0),
            };
            idx += 1;
        }
    }

    debug_assert_eq!(idx, 256, "code table must have exactly 256 entries");
    CodeTable { entries: tbl }
}

impl CodeTable {
    /// The process-wide default table.
    pub fn default_table() -> Arc<CodeTable> {
        Arc::clone(&DEFAULT_TABLE)
    }

    /// Canonical bytes of the default table: the dictionary against which
    /// custom tables are delta-encoded.
    pub fn default_table_bytes() -> &'static [u8] {
        &DEFAULT_TABLE_BYTES
    }

    /// Build a table from explicit entries.  The result is not validated.
    pub fn from_entries(entries: [CodeTableEntry; 256]) -> Self {
        Self { entries }
    }

    #[inline]
    pub fn entry(&self, opcode: u8) -> &CodeTableEntry {
        &self.entries[opcode as usize]
    }

    pub fn entries(&self) -> &[CodeTableEntry; 256] {
        &self.entries
    }

    /// Parse the canonical form: `inst1, inst2, size1, size2, mode1, mode2`,
    /// 256 bytes each.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() != CODE_TABLE_BYTES {
            return Err(FormatError::InvalidCodeTable(format!(
                "expected {CODE_TABLE_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let col = |n: usize, i: usize| bytes[n * 256 + i];
        let mut entries = [CodeTableEntry::default(); 256];
        for (i, e) in entries.iter_mut().enumerate() {
            e.first = Slot::new(col(0, i), col(2, i), col(4, i));
            e.second = Slot::new(col(1, i), col(3, i), col(5, i));
        }
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; CODE_TABLE_BYTES];
        for (i, e) in self.entries.iter().enumerate() {
            out[i] = e.first.inst;
            out[256 + i] = e.second.inst;
            out[512 + i] = e.first.size;
            out[768 + i] = e.second.size;
            out[1024 + i] = e.first.mode;
            out[1280 + i] = e.second.mode;
        }
        out
    }

    /// Check that every opcode is well formed for caches whose largest mode
    /// is `max_mode`, and that every instruction/mode pair can be expressed
    /// with an explicit size.
    pub fn validate(&self, max_mode: u8) -> Result<(), FormatError> {
        let invalid = |msg: String| Err(FormatError::InvalidCodeTable(msg));
        let modes = usize::from(max_mode) + 1;
        // Indexed by `inst + mode`: ADD, RUN, COPY+0 ..= COPY+max_mode.
        let mut has_explicit_size = vec![false; usize::from(VCD_COPY) + modes];

        for (opcode, entry) in self.entries.iter().enumerate() {
            for slot in [entry.first, entry.second] {
                if slot.inst > VCD_COPY {
                    return invalid(format!("opcode {opcode} has instruction type {}", slot.inst));
                }
                if slot.mode > max_mode {
                    return invalid(format!(
                        "opcode {opcode} uses mode {} above maximum {max_mode}",
                        slot.mode
                    ));
                }
                if slot.is_noop() && slot.size != 0 {
                    return invalid(format!("opcode {opcode} has a NOOP with nonzero size"));
                }
                if slot.inst != VCD_COPY && slot.mode != 0 {
                    return invalid(format!("opcode {opcode} has a mode on a non-COPY instruction"));
                }
            }
            let single = match (entry.first.is_noop(), entry.second.is_noop()) {
                (false, true) => Some(entry.first),
                (true, false) => Some(entry.second),
                _ => None,
            };
            if let Some(slot) = single
                && slot.size == 0
            {
                has_explicit_size[usize::from(slot.inst) + usize::from(slot.mode)] = true;
            }
        }

        for (index, ok) in has_explicit_size.iter().enumerate().skip(1) {
            if !ok {
                let what = match index {
                    1 => "ADD".to_string(),
                    2 => "RUN".to_string(),
                    m => format!("COPY mode {}", m - usize::from(VCD_COPY)),
                };
                return invalid(format!("no opcode encodes {what} with an explicit size"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Instruction map (encoder side reverse lookup)
// ---------------------------------------------------------------------------

/// Reverse index from instructions to opcodes.
///
/// When several opcodes encode the same instruction the lowest one wins.
#[derive(Debug, Clone)]
pub struct InstructionMap {
    /// `first[inst + mode][size]` for single-instruction opcodes.
    first: Vec<[Option<u8>; 256]>,
    /// `(first_opcode, inst + mode, size)` to the combined opcode.
    second: HashMap<(u8, u16, u8), u8>,
}

impl InstructionMap {
    pub fn new(table: &CodeTable, max_mode: u8) -> Self {
        let kinds = usize::from(VCD_COPY) + usize::from(max_mode) + 1;
        let mut first = vec![[None; 256]; kinds];
        let key = |slot: &Slot| usize::from(slot.inst) + usize::from(slot.mode);

        for opcode in (0..=255u8).rev() {
            let entry = table.entry(opcode);
            let single = match (entry.first.is_noop(), entry.second.is_noop()) {
                (false, true) => entry.first,
                (true, false) => entry.second,
                _ => continue,
            };
            if let Some(row) = first.get_mut(key(&single)) {
                row[usize::from(single.size)] = Some(opcode);
            }
        }

        let mut map = Self {
            first,
            second: HashMap::new(),
        };
        for opcode in (0..=255u8).rev() {
            let entry = table.entry(opcode);
            if entry.first.is_noop() || entry.second.is_noop() {
                continue;
            }
            let Some(first_opcode) =
                map.lookup_first_opcode(entry.first.inst, entry.first.size, entry.first.mode)
            else {
                continue;
            };
            map.second.insert(
                (
                    first_opcode,
                    u16::from(entry.second.inst) + u16::from(entry.second.mode),
                    entry.second.size,
                ),
                opcode,
            );
        }
        map
    }

    /// Opcode encoding `inst` alone.  `size == 0` asks for the explicit-size form.
    pub fn lookup_first_opcode(&self, inst: u8, size: u8, mode: u8) -> Option<u8> {
        self.first
            .get(usize::from(inst) + usize::from(mode))
            .and_then(|row| row[usize::from(size)])
    }

    /// Opcode encoding the instruction of `first_opcode` followed by `inst`.
    pub fn lookup_second_opcode(&self, first_opcode: u8, inst: u8, size: u8, mode: u8) -> Option<u8> {
        self.second
            .get(&(first_opcode, u16::from(inst) + u16::from(mode), size))
            .copied()
    }
}

// ---------------------------------------------------------------------------
// Decoded instructions
// ---------------------------------------------------------------------------

/// An instruction as returned by the code table reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Append `size` literal bytes from the data section.
    Add { size: u32 },
    /// Append one data byte `size` times.
    Run { size: u32 },
    /// Copy `size` bytes from an address decoded with `mode`.
    Copy { size: u32, mode: u8 },
}

impl Instruction {
    pub(crate) fn from_slot(slot: Slot, size: u32) -> Option<Self> {
        match slot.inst {
            VCD_ADD => Some(Instruction::Add { size }),
            VCD_RUN => Some(Instruction::Run { size }),
            VCD_COPY => Some(Instruction::Copy {
                size,
                mode: slot.mode,
            }),
            _ => None,
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        match *self {
            Instruction::Add { size } | Instruction::Run { size } | Instruction::Copy { size, .. } => {
                size
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

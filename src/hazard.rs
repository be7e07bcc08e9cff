//! Stall insertion for writes into second-order PHY registers
//!
//! A posted write into a hazard window must have landed before a dependent
//! access is issued. Rather than stalling on every such write, a run of
//! consecutive hazardous `Store`s is kept posted and only its last member is
//! turned into a `StallingWrite`, at the point where the run ends.
//!
//! The inserter is a two-slot lookahead: the incoming instruction and at most
//! one held (uncommitted) hazardous `Store`. Committed instructions are never
//! revisited.

use std::ops::Range;

use crate::program::Instruction;
use crate::regs::PHY_HAZARD_WINDOWS;

/// Set of address windows that need a completed write before a dependent access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HazardMap {
    windows: Vec<Range<u32>>,
}

impl Default for HazardMap {
    fn default() -> Self {
        HazardMap {
            windows: PHY_HAZARD_WINDOWS
                .iter()
                .map(|&(start, end)| start..end)
                .collect(),
        }
    }
}

impl HazardMap {
    pub fn new(windows: Vec<Range<u32>>) -> Self {
        HazardMap { windows }
    }

    /// A map with no windows; nothing is ever stalled
    pub fn empty() -> Self {
        HazardMap { windows: Vec::new() }
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.windows.iter().any(|window| window.contains(&addr))
    }

    pub fn windows(&self) -> &[Range<u32>] {
        &self.windows
    }
}

/// Instructions released by the inserter, in program order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Committed {
    slots: [Option<Instruction>; 2],
}

impl Committed {
    fn push(&mut self, instruction: Instruction) {
        if self.slots[0].is_none() {
            self.slots[0] = Some(instruction);
        } else {
            debug_assert!(self.slots[1].is_none());
            self.slots[1] = Some(instruction);
        }
    }

    /// Total number of words released
    pub fn word_count(&self) -> usize {
        (*self).into_iter().map(|instruction| instruction.word_count()).sum()
    }
}

impl IntoIterator for Committed {
    type Item = Instruction;
    type IntoIter = std::iter::Flatten<std::array::IntoIter<Option<Instruction>, 2>>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter().flatten()
    }
}

/// Lookahead state of the stall heuristic
#[derive(Debug, Clone, Default)]
pub struct StallInserter {
    map: HazardMap,
    held: Option<Instruction>,
    stalls_inserted: usize,
}

impl StallInserter {
    pub fn new(map: HazardMap) -> Self {
        StallInserter {
            map,
            held: None,
            stalls_inserted: 0,
        }
    }

    pub fn map(&self) -> &HazardMap {
        &self.map
    }

    /// The hazardous `Store` waiting to learn whether it ends its run
    pub fn held(&self) -> Option<&Instruction> {
        self.held.as_ref()
    }

    /// Number of `Store`s upgraded so far
    pub fn stalls_inserted(&self) -> usize {
        self.stalls_inserted
    }

    fn is_hazardous_store(&self, instruction: &Instruction) -> bool {
        matches!(instruction, Instruction::Store { addr, .. } if self.map.contains(*addr))
    }

    /// Classify the next instruction and release whatever is now final
    pub fn admit(&mut self, next: Instruction) -> Committed {
        let mut out = Committed::default();
        let continues_run = self.is_hazardous_store(&next);

        if let Some(prev) = self.held.take() {
            if continues_run {
                out.push(prev);
            } else {
                out.push(self.upgrade(prev));
            }
        }

        if continues_run {
            self.held = Some(next);
        } else {
            out.push(next);
        }
        out
    }

    /// Close any pending run; called before the program is sealed
    pub fn flush(&mut self) -> Option<Instruction> {
        let held = self.held.take()?;
        Some(self.upgrade(held))
    }

    fn upgrade(&mut self, instruction: Instruction) -> Instruction {
        self.stalls_inserted += 1;
        instruction.into_stalling()
    }
}

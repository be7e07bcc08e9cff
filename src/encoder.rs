//! Instruction encoder
//!
//! Training code describes register sequences through `Encoder::emit_*`. The
//! backend chosen at construction decides what happens to each operation:
//! `DirectBackend` performs it on the calling core right away, while
//! `RecordingBackend` appends it to a program for the satellite core.
//! Callers cannot tell the two apart.

use tracing::{debug, error, warn};

use crate::config::{SequencerConfig, PROGRAM_CAPACITY_WORDS};
use crate::crc::crc32_words;
use crate::error::{Result, SequencerError};
use crate::hazard::{HazardMap, StallInserter};
use crate::opcodes::{FIELD_MASK, MAX_WAIT_TICKS};
use crate::ops::RegisterOps;
use crate::platform::Platform;
use crate::program::{self, Instruction, Program, BODY_START, CRC_INDEX, HEADER_INDEX};
use crate::topology::PartitionInfo;

/// Destination of encoded register operations
pub trait SequencerBackend {
    /// Perform or record one instruction
    fn submit(&mut self, instruction: Instruction) -> Result<()>;
}

/// Register-operation front end used by training code
pub struct Encoder<B: SequencerBackend> {
    backend: B,
    config: SequencerConfig,
}

impl<B: SequencerBackend> Encoder<B> {
    pub fn new(backend: B, config: SequencerConfig) -> Self {
        Encoder { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn emit_store(&mut self, addr: u32, value: u32) -> Result<()> {
        self.backend.submit(Instruction::Store {
            addr: reg(addr),
            value,
        })
    }

    pub fn emit_rmw(&mut self, addr: u32, value: u32, mask: u32) -> Result<()> {
        self.backend.submit(Instruction::ReadModifyWrite {
            addr: reg(addr),
            value,
            mask,
        })
    }

    /// Read-modify-write that only applies where the lower sub-partition exists
    pub fn emit_rmw_lower(&mut self, addr: u32, value: u32, mask: u32) -> Result<()> {
        self.backend.submit(Instruction::ReadModifyWriteLower {
            addr: reg(addr),
            value,
            mask,
        })
    }

    pub fn emit_poll(&mut self, addr: u32, value: u32, mask: u32) -> Result<()> {
        self.backend.submit(Instruction::Poll {
            addr: reg(addr),
            value,
            mask,
        })
    }

    /// Busy-wait for at least `ns`, rounded up to whole ticks
    ///
    /// A single wait saturates at `MAX_WAIT_TICKS`; longer delays must be
    /// split by the caller.
    pub fn emit_wait_ns(&mut self, ns: u64) -> Result<()> {
        let ticks = self.config.ticks_for_ns(ns);
        if ticks == MAX_WAIT_TICKS && self.config.ns_for_ticks(ticks) < ns {
            warn!(ns, ticks, "wait clamped to the largest immediate");
        }
        self.backend.submit(Instruction::Wait { ticks })
    }

    pub fn emit_training_check(&mut self, addr: u32) -> Result<()> {
        self.backend.submit(Instruction::TrainingCheck { addr: reg(addr) })
    }

    pub fn emit_stalling_store(&mut self, addr: u32, value: u32) -> Result<()> {
        self.backend.submit(Instruction::StallingWrite {
            addr: reg(addr),
            value,
        })
    }
}

impl Encoder<RecordingBackend> {
    /// Encoder that records into a full-size program buffer
    pub fn recording(config: SequencerConfig) -> Self {
        Encoder::new(RecordingBackend::new(), config)
    }

    /// Close the program with `End`, header and CRC
    pub fn finish(self) -> Result<Program> {
        self.backend.finish()
    }
}

impl<'a, P: Platform> Encoder<DirectBackend<'a, P>> {
    /// Encoder that performs every operation immediately on `platform`
    pub fn direct(platform: &'a mut P, partition: PartitionInfo, config: SequencerConfig) -> Self {
        Encoder::new(DirectBackend::new(platform, partition, config), config)
    }
}

fn reg(addr: u32) -> u32 {
    debug_assert!(addr <= FIELD_MASK, "register address {addr:#x} wider than 24 bits");
    addr & FIELD_MASK
}

/// Performs operations synchronously on the caller's core
pub struct DirectBackend<'a, P: Platform> {
    platform: &'a mut P,
    partition: PartitionInfo,
    config: SequencerConfig,
}

impl<'a, P: Platform> DirectBackend<'a, P> {
    pub fn new(platform: &'a mut P, partition: PartitionInfo, config: SequencerConfig) -> Self {
        DirectBackend {
            platform,
            partition,
            config,
        }
    }
}

impl<P: Platform> SequencerBackend for DirectBackend<'_, P> {
    fn submit(&mut self, instruction: Instruction) -> Result<()> {
        let mut ops = RegisterOps {
            platform: &mut *self.platform,
            config: &self.config,
            cancel: None,
        };
        match instruction {
            Instruction::Store { addr, value } => ops.store(addr, value),
            Instruction::ReadModifyWrite { addr, value, mask } => {
                ops.read_modify_write(addr, value, mask);
            }
            Instruction::ReadModifyWriteLower { addr, value, mask } => {
                if self.partition.has_lower_subpartition() {
                    ops.read_modify_write(addr, value, mask);
                }
            }
            Instruction::StallingWrite { addr, value } => ops.stalling_write(addr, value),
            Instruction::Poll { addr, value, mask } => {
                ops.poll(addr, value, mask)?;
            }
            Instruction::Wait { ticks } => ops.wait_ticks(ticks),
            Instruction::TrainingCheck { addr } => {
                ops.training_check(addr)?;
            }
            Instruction::End => {}
        }
        Ok(())
    }
}

/// Appends instructions to a fixed-capacity program buffer
///
/// Words 0 and 1 are reserved for the header and CRC, filled in by `finish`.
/// Hazardous stores pass through the stall inserter before they are written.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    words: Vec<u32>,
    capacity: usize,
    stalls: StallInserter,
    overflowed: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_capacity(PROGRAM_CAPACITY_WORDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut words = Vec::with_capacity(capacity);
        words.extend_from_slice(&[0; BODY_START]);
        RecordingBackend {
            words,
            capacity,
            stalls: StallInserter::new(HazardMap::default()),
            overflowed: false,
        }
    }

    pub fn with_hazard_map(mut self, map: HazardMap) -> Self {
        self.stalls = StallInserter::new(map);
        self
    }

    /// Words committed so far, header slots included
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.len() == BODY_START && self.stalls.held().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stalls_inserted(&self) -> usize {
        self.stalls.stalls_inserted()
    }

    fn append(&mut self, instruction: Instruction) -> Result<()> {
        let encoded = instruction.encode();
        if self.overflowed || self.words.len() + encoded.len() > self.capacity {
            self.overflowed = true;
            error!(
                capacity = self.capacity,
                used = self.words.len(),
                "sequencer overflow"
            );
            return Err(SequencerError::EncoderOverflow {
                capacity: self.capacity,
            });
        }
        self.words.extend_from_slice(encoded.as_slice());
        Ok(())
    }

    /// Flush the stall inserter, append `End`, and seal header and CRC
    pub fn finish(mut self) -> Result<Program> {
        if let Some(held) = self.stalls.flush() {
            self.append(held)?;
        }
        self.append(Instruction::End)?;

        let length = self.words.len();
        self.words[HEADER_INDEX] = program::header(length);
        self.words[CRC_INDEX] = crc32_words(&self.words[BODY_START..]);
        debug!(
            length,
            stalls = self.stalls.stalls_inserted(),
            "program sealed"
        );
        Ok(Program::from_sealed(self.words))
    }
}

impl SequencerBackend for RecordingBackend {
    fn submit(&mut self, instruction: Instruction) -> Result<()> {
        for committed in self.stalls.admit(instruction) {
            self.append(committed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;

    const HAZ: u32 = 0x0090_0040;
    const SAFE: u32 = 0x0000_0200;

    fn recorded(program: &Program) -> Vec<Instruction> {
        program
            .instructions()
            .map(|item| item.map(|(_, instruction)| instruction).unwrap())
            .collect()
    }

    #[test]
    fn test_record_store_program() {
        let mut encoder = Encoder::recording(SequencerConfig::default());
        encoder.emit_store(0x100, 0xAAAA).unwrap();
        let program = encoder.finish().unwrap();

        assert_eq!(program.length(), 5);
        assert_eq!(program.words()[2..], [0x0100_0100, 0x0000_AAAA, 0x0F00_0000]);
        assert_eq!(
            recorded(&program),
            vec![
                Instruction::Store { addr: 0x100, value: 0xAAAA },
                Instruction::End,
            ]
        );
    }

    #[test]
    fn test_every_emit_records_its_opcode() {
        let mut encoder = Encoder::recording(SequencerConfig::default().with_tick_ns(10));
        encoder.emit_store(SAFE, 1).unwrap();
        encoder.emit_rmw(SAFE, 2, 3).unwrap();
        encoder.emit_rmw_lower(SAFE, 4, 5).unwrap();
        encoder.emit_poll(SAFE, 6, 7).unwrap();
        encoder.emit_wait_ns(25).unwrap();
        encoder.emit_training_check(SAFE).unwrap();
        encoder.emit_stalling_store(SAFE, 8).unwrap();
        let program = encoder.finish().unwrap();

        assert_eq!(
            recorded(&program),
            vec![
                Instruction::Store { addr: SAFE, value: 1 },
                Instruction::ReadModifyWrite { addr: SAFE, value: 2, mask: 3 },
                Instruction::ReadModifyWriteLower { addr: SAFE, value: 4, mask: 5 },
                Instruction::Poll { addr: SAFE, value: 6, mask: 7 },
                Instruction::Wait { ticks: 3 },
                Instruction::TrainingCheck { addr: SAFE },
                Instruction::StallingWrite { addr: SAFE, value: 8 },
                Instruction::End,
            ]
        );
    }

    #[test]
    fn test_hazard_run_stalls_last_store() {
        let mut encoder = Encoder::recording(SequencerConfig::default());
        encoder.emit_store(HAZ, 1).unwrap();
        encoder.emit_store(HAZ + 4, 2).unwrap();
        encoder.emit_store(SAFE, 3).unwrap();
        let program = encoder.finish().unwrap();

        assert_eq!(
            recorded(&program),
            vec![
                Instruction::Store { addr: HAZ, value: 1 },
                Instruction::StallingWrite { addr: HAZ + 4, value: 2 },
                Instruction::Store { addr: SAFE, value: 3 },
                Instruction::End,
            ]
        );
    }

    #[test]
    fn test_trailing_hazard_run_closed_by_finish() {
        let mut encoder = Encoder::recording(SequencerConfig::default());
        encoder.emit_store(HAZ, 1).unwrap();
        encoder.emit_store(HAZ, 2).unwrap();
        assert_eq!(encoder.backend().stalls_inserted(), 0);
        let program = encoder.finish().unwrap();

        assert_eq!(
            recorded(&program),
            vec![
                Instruction::Store { addr: HAZ, value: 1 },
                Instruction::StallingWrite { addr: HAZ, value: 2 },
                Instruction::End,
            ]
        );
    }

    #[test]
    fn test_wait_clamps_to_immediate() {
        let mut encoder = Encoder::recording(SequencerConfig::default().with_tick_ns(1));
        encoder.emit_wait_ns(u64::MAX).unwrap();
        let program = encoder.finish().unwrap();
        assert_eq!(recorded(&program)[0], Instruction::Wait { ticks: MAX_WAIT_TICKS });
    }

    #[test]
    fn test_overflow_is_sticky() {
        // Two stores fill a 6-word buffer; neither a third store nor END fits
        let backend = RecordingBackend::with_capacity(6);
        let mut encoder = Encoder::new(backend, SequencerConfig::default());
        encoder.emit_store(SAFE, 1).unwrap();
        encoder.emit_store(SAFE, 2).unwrap();
        assert_eq!(
            encoder.emit_store(SAFE, 3),
            Err(SequencerError::EncoderOverflow { capacity: 6 })
        );
        assert_eq!(
            encoder.finish(),
            Err(SequencerError::EncoderOverflow { capacity: 6 })
        );
    }

    #[test]
    fn test_overflow_on_end() {
        let backend = RecordingBackend::with_capacity(4);
        let mut encoder = Encoder::new(backend, SequencerConfig::default());
        encoder.emit_store(SAFE, 1).unwrap();
        assert!(matches!(
            encoder.finish(),
            Err(SequencerError::EncoderOverflow { .. })
        ));
    }

    #[test]
    fn test_direct_mode_writes_immediately() {
        let mut sim = SimPlatform::new();
        sim.preset(0x10, 0x0F);
        {
            let mut encoder =
                Encoder::direct(&mut sim, PartitionInfo::full(0), SequencerConfig::default());
            encoder.emit_store(0x100, 0xAAAA).unwrap();
            encoder.emit_rmw(0x10, 0xF0, 0xFF).unwrap();
            encoder.emit_wait_ns(64).unwrap();
        }
        assert_eq!(sim.peek(0x100), 0xAAAA);
        assert_eq!(sim.peek(0x10), 0xF0);
        assert_eq!(sim.writes().len(), 2);
    }

    #[test]
    fn test_direct_mode_never_stalls_on_its_own() {
        let mut sim = SimPlatform::new();
        {
            let mut encoder =
                Encoder::direct(&mut sim, PartitionInfo::full(0), SequencerConfig::default());
            encoder.emit_store(HAZ, 1).unwrap();
            encoder.emit_store(HAZ + 4, 2).unwrap();
        }
        assert!(sim.writes().iter().all(|w| !w.blocking));
    }

    #[test]
    fn test_direct_mode_skips_lower_on_half_partition() {
        let mut sim = SimPlatform::new();
        {
            let mut encoder =
                Encoder::direct(&mut sim, PartitionInfo::half(1), SequencerConfig::default());
            encoder.emit_rmw_lower(0x10, 1, 1).unwrap();
        }
        assert!(sim.writes().is_empty());
        assert_eq!(sim.read_count(), 0);
    }

    #[test]
    fn test_direct_mode_poll_timeout_is_returned() {
        let mut sim = SimPlatform::new();
        let config = SequencerConfig::default().with_poll_timeout_ns(500);
        let mut encoder = Encoder::direct(&mut sim, PartitionInfo::full(0), config);
        assert!(matches!(
            encoder.emit_poll(0x10, 1, 1),
            Err(SequencerError::PollTimeout { addr: 0x10, .. })
        ));
    }
}

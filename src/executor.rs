//! Decode and dispatch loop, resumable between scheduling slices

use tracing::{debug, trace, warn};

use crate::config::SequencerConfig;
use crate::error::{Fault, SequencerError};
use crate::mailbox::Mailbox;
use crate::ops::{RegisterOps, Spin};
use crate::platform::Platform;
use crate::program::{Instruction, Program, BODY_START};
use crate::topology::PartitionInfo;

/// Counters reported after a program reaches `End`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Instructions dispatched, `End` included
    pub instructions: u32,
    /// `ReadModifyWriteLower` instructions skipped on a half partition
    pub skipped: u32,
    /// Words consumed from the stream
    pub words: u32,
    pub elapsed_ns: u64,
}

/// Bytecode interpreter for the satellite core
///
/// Instructions run strictly in program order, each to completion (or to its
/// own timeout) before the next is decoded. The interpreter is generic over a
/// `Platform`, which performs the actual bus accesses.
///
/// The interpreter expects an already validated program; header and CRC
/// checks belong to the handshake (see `satellite`).
pub struct Interpreter<'a, P: Platform> {
    /// Hardware the program runs against
    platform: &'a mut P,

    /// Handshake registers, checked for cancel requests while spinning
    mailbox: &'a Mailbox,

    /// Partition served by this core
    partition: PartitionInfo,

    config: &'a SequencerConfig,
}

impl<'a, P: Platform> Interpreter<'a, P> {
    /// Create a new interpreter
    ///
    /// # Arguments
    /// * `platform` - Bus the program's register operations go to
    /// * `mailbox` - Handshake registers polled for cancellation
    /// * `partition` - Topology record of the partition this core serves
    /// * `config` - Timeouts and tick granularity
    pub fn new(
        platform: &'a mut P,
        mailbox: &'a Mailbox,
        partition: PartitionInfo,
        config: &'a SequencerConfig,
    ) -> Self {
        Interpreter {
            platform,
            mailbox,
            partition,
            config,
        }
    }

    /// Execute a sealed program
    pub fn run_program(&mut self, program: &Program) -> Result<RunSummary, Fault> {
        self.execute(program.words(), program.length())
    }

    /// Execute `words[2..length]` until `End`
    ///
    /// Returns Err on the first failing instruction; nothing after it runs.
    /// A stream that runs out before `End` is a size fault.
    pub fn execute(&mut self, words: &[u32], length: usize) -> Result<RunSummary, Fault> {
        let mut cursor = self.begin(length);
        loop {
            if let Some(summary) = self.resume(words, length, &mut cursor)? {
                return Ok(summary);
            }
        }
    }

    /// Position a cursor at the first instruction
    pub fn begin(&mut self, length: usize) -> Cursor {
        debug!(
            length,
            partition = self.partition.partition_index,
            half = self.partition.half_subpartition,
            "program start"
        );
        Cursor {
            index: BODY_START,
            started_ns: self.platform.now_ns(),
            summary: RunSummary::default(),
            spin: None,
        }
    }

    /// Run one slice of the program from `cursor`
    ///
    /// Returns `Ok(None)` once `slice_ns` of platform time or `slice_reads`
    /// spin reads are used up; the cursor then points at the instruction to
    /// continue with, mid-spin if a poll was interrupted. At least one
    /// instruction or spin iteration runs per call. A cancel request pending
    /// at the start of the slice aborts at the cursor.
    pub fn resume(
        &mut self,
        words: &[u32],
        length: usize,
        cursor: &mut Cursor,
    ) -> Result<Option<RunSummary>, Fault> {
        let stream = &words[..length.min(words.len())];
        if let Some(request) = self.mailbox.cancel_request() {
            let word = stream.get(cursor.index).copied().unwrap_or(0);
            warn!(request, index = cursor.index, "cancel observed between slices");
            let error = SequencerError::RequesterAbort { request };
            return Err(Fault::new(error, cursor.index as u32, word));
        }

        let slice_started = self.platform.now_ns();
        let mut reads = 0u32;

        loop {
            let i = cursor.index;
            let word = stream.get(i).copied().unwrap_or(0);
            let instruction =
                Instruction::decode(stream, i).map_err(|e| Fault::new(e, i as u32, word))?;
            if cursor.spin.is_none() {
                trace!(index = i, %instruction, "dispatch");
            }

            let mut ops = RegisterOps {
                platform: &mut *self.platform,
                config: self.config,
                cancel: Some(self.mailbox),
            };

            let outcome = match instruction {
                Instruction::Store { addr, value } => {
                    ops.store(addr, value);
                    Ok(true)
                }

                Instruction::ReadModifyWrite { addr, value, mask } => {
                    ops.read_modify_write(addr, value, mask);
                    Ok(true)
                }

                Instruction::ReadModifyWriteLower { addr, value, mask } => {
                    if self.partition.has_lower_subpartition() {
                        ops.read_modify_write(addr, value, mask);
                    } else {
                        trace!(index = i, addr, "no lower sub-partition, skipped");
                        cursor.summary.skipped += 1;
                    }
                    Ok(true)
                }

                Instruction::StallingWrite { addr, value } => {
                    ops.stalling_write(addr, value);
                    Ok(true)
                }

                Instruction::Poll { addr, value, mask } => {
                    let spin = cursor.spin.get_or_insert_with(|| ops.begin_spin());
                    ops.poll_once(spin, addr, value, mask).map(|done| done.is_some())
                }

                Instruction::Wait { ticks } => {
                    ops.wait_ticks(ticks);
                    Ok(true)
                }

                Instruction::TrainingCheck { addr } => {
                    let spin = cursor.spin.get_or_insert_with(|| ops.begin_spin());
                    ops.training_check_once(spin, addr).map(|done| done.is_some())
                }

                Instruction::End => {
                    let mut summary = cursor.summary;
                    summary.instructions += 1;
                    summary.words = (i + 1 - BODY_START) as u32;
                    summary.elapsed_ns = self.platform.now_ns().saturating_sub(cursor.started_ns);
                    debug!(
                        instructions = summary.instructions,
                        skipped = summary.skipped,
                        elapsed_ns = summary.elapsed_ns,
                        "program complete"
                    );
                    return Ok(Some(summary));
                }
            };

            let finished = outcome.map_err(|e| Fault::new(e, i as u32, word))?;
            if finished {
                cursor.spin = None;
                cursor.summary.instructions += 1;
                cursor.index += instruction.word_count();
            } else {
                reads += 1;
            }

            let used = self.platform.now_ns().saturating_sub(slice_started);
            if used >= self.config.slice_ns || reads >= self.config.slice_reads {
                trace!(index = cursor.index, used, reads, "slice used up");
                return Ok(None);
            }
        }
    }
}

/// Resume point of a program that yielded between slices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    index: usize,
    started_ns: u64,
    summary: RunSummary,
    spin: Option<Spin>,
}

impl Cursor {
    /// Word index of the instruction to run next
    pub fn index(&self) -> usize {
        self.index
    }

    /// Platform time at which the program started
    pub fn started_ns(&self) -> u64 {
        self.started_ns
    }

    /// The next instruction is a poll or training check already in progress
    pub fn is_spinning(&self) -> bool {
        self.spin.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::ControlWord;
    use crate::opcodes::{self, Opcode};
    use crate::regs::LEGACY_FB_STOP_ADDR;
    use crate::sim::SimPlatform;
    use std::rc::Rc;

    fn seal(instructions: &[Instruction]) -> Program {
        let mut stream = Vec::new();
        for instruction in instructions {
            stream.extend_from_slice(instruction.encode().as_slice());
        }
        Program::seal(&stream)
    }

    fn run(
        sim: &mut SimPlatform,
        partition: PartitionInfo,
        program: &Program,
    ) -> Result<RunSummary, Fault> {
        let mailbox = Mailbox::with_capacity(64);
        let config = SequencerConfig::default();
        Interpreter::new(sim, &mailbox, partition, &config).run_program(program)
    }

    #[test]
    fn test_store_then_end() {
        let program = seal(&[
            Instruction::Store { addr: 0x100, value: 0xAAAA },
            Instruction::End,
        ]);
        let mut sim = SimPlatform::new();
        let summary = run(&mut sim, PartitionInfo::full(0), &program).unwrap();

        assert_eq!(summary.instructions, 2);
        assert_eq!(summary.words, 3);
        assert_eq!(sim.writes().len(), 1);
        assert_eq!(sim.writes()[0].addr, 0x100);
        assert_eq!(sim.writes()[0].value, 0xAAAA);
        assert!(!sim.writes()[0].blocking);
    }

    #[test]
    fn test_rmw_and_stalling_write_block() {
        let program = seal(&[
            Instruction::ReadModifyWrite { addr: 0x10, value: 0xF0, mask: 0xFF },
            Instruction::StallingWrite { addr: 0x14, value: 1 },
            Instruction::End,
        ]);
        let mut sim = SimPlatform::new();
        sim.preset(0x10, 0xAB0F);
        run(&mut sim, PartitionInfo::full(0), &program).unwrap();

        assert_eq!(sim.peek(0x10), 0xABF0);
        assert!(sim.writes().iter().all(|w| w.blocking));
    }

    #[test]
    fn test_rmw_lower_applies_on_full_partition() {
        let program = seal(&[
            Instruction::ReadModifyWriteLower { addr: 0x20, value: 0x1, mask: 0x1 },
            Instruction::End,
        ]);
        let mut sim = SimPlatform::new();
        let summary = run(&mut sim, PartitionInfo::full(2), &program).unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(sim.peek(0x20), 0x1);
    }

    #[test]
    fn test_rmw_lower_skipped_on_half_partition() {
        let program = seal(&[
            Instruction::ReadModifyWriteLower { addr: 0x20, value: 0x1, mask: 0x1 },
            Instruction::Store { addr: 0x24, value: 0x55 },
            Instruction::End,
        ]);
        let mut sim = SimPlatform::new();
        let summary = run(&mut sim, PartitionInfo::half(2), &program).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(sim.read_count(), 0);
        assert_eq!(sim.writes().len(), 1);
        assert_eq!(sim.writes()[0].addr, 0x24);
        assert_eq!(sim.writes()[0].value, 0x55);
    }

    #[test]
    fn test_invalid_opcode_stops_execution() {
        let stream = [
            opcodes::pack(Opcode::Store, 0x30),
            1,
            0x4200_0000,
            opcodes::pack(Opcode::Store, 0x34),
            2,
            opcodes::pack(Opcode::End, 0),
        ];
        let program = Program::seal(&stream);
        let mut sim = SimPlatform::new();
        let fault = run(&mut sim, PartitionInfo::full(0), &program).unwrap_err();

        assert_eq!(fault.error, SequencerError::InvalidOpcode { opcode: 0x42 });
        assert_eq!(fault.index, 4);
        assert_eq!(fault.word, 0x4200_0000);
        assert_eq!(sim.writes().len(), 1);
    }

    #[test]
    fn test_missing_end_is_size_fault() {
        let program = seal(&[Instruction::Store { addr: 0x30, value: 1 }]);
        let mut sim = SimPlatform::new();
        let fault = run(&mut sim, PartitionInfo::full(0), &program).unwrap_err();
        assert!(matches!(fault.error, SequencerError::SizeFault { .. }));
        assert_eq!(fault.index, 4);
    }

    #[test]
    fn test_poll_timeout_reports_location() {
        let program = seal(&[
            Instruction::Wait { ticks: 1 },
            Instruction::Poll { addr: 0x40, value: 1, mask: 1 },
            Instruction::End,
        ]);
        let mut sim = SimPlatform::new();
        let fault = run(&mut sim, PartitionInfo::full(0), &program).unwrap_err();
        assert_eq!(fault.index, 3);
        assert_eq!(
            fault.error,
            SequencerError::PollTimeout { addr: 0x40, value: 1, mask: 1, last: 0 }
        );
    }

    #[test]
    fn test_wait_advances_clock() {
        let program = seal(&[Instruction::Wait { ticks: 100 }, Instruction::End]);
        let mut sim = SimPlatform::new();
        let summary = run(&mut sim, PartitionInfo::full(0), &program).unwrap();
        assert_eq!(summary.elapsed_ns, 100 * crate::config::DEFAULT_TICK_NS as u64);
    }

    #[test]
    fn test_legacy_stop_poll_only_ends_on_cancel() {
        let program = seal(&[
            Instruction::Poll { addr: LEGACY_FB_STOP_ADDR, value: 1, mask: 1 },
            Instruction::End,
        ]);
        let mailbox = Rc::new(Mailbox::with_capacity(64));
        let config = SequencerConfig::default().with_poll_timeout_ns(1_000);
        let mut sim = SimPlatform::new().with_read_latency_ns(100);

        // Far past the poll budget, the requester asks the core to stop
        let requester = mailbox.clone();
        sim.on_read(move |_, count| {
            if count == 500 {
                requester.write_control(ControlWord::default().with_cancel(1));
            }
        });

        let fault = Interpreter::new(&mut sim, &mailbox, PartitionInfo::full(0), &config)
            .run_program(&program)
            .unwrap_err();
        assert_eq!(fault.error, SequencerError::RequesterAbort { request: 1 });
        assert_eq!(sim.read_count(), 500);
        assert!(sim.now() > 1_000);
    }

    #[test]
    fn test_resume_yields_mid_poll_and_continues() {
        let program = seal(&[
            Instruction::Store { addr: 0x50, value: 1 },
            Instruction::Poll { addr: 0x54, value: 1, mask: 1 },
            Instruction::Store { addr: 0x58, value: 2 },
            Instruction::End,
        ]);
        let mailbox = Mailbox::with_capacity(64);
        let config = SequencerConfig::default().with_slice_reads(4);
        let mut sim = SimPlatform::new();
        sim.script_reads(0x54, [0, 0, 0, 0, 0, 0, 1]);

        let mut interpreter = Interpreter::new(&mut sim, &mailbox, PartitionInfo::full(0), &config);
        let mut cursor = interpreter.begin(program.length());
        let words = program.words();

        assert_eq!(interpreter.resume(words, program.length(), &mut cursor), Ok(None));
        assert_eq!(cursor.index(), 4);
        assert!(cursor.is_spinning());

        let summary = interpreter
            .resume(words, program.length(), &mut cursor)
            .unwrap()
            .unwrap();
        assert_eq!(summary.instructions, 4);
        assert_eq!(sim.read_count(), 7);
        assert_eq!(sim.peek(0x58), 2);
    }

    #[test]
    fn test_cancel_between_slices_stops_at_cursor() {
        let program = seal(&[
            Instruction::Wait { ticks: 100 },
            Instruction::Wait { ticks: 100 },
            Instruction::Store { addr: 0x70, value: 1 },
            Instruction::End,
        ]);
        let mailbox = Mailbox::with_capacity(64);
        let config = SequencerConfig::default().with_slice_ns(1);
        let mut sim = SimPlatform::new();

        let mut interpreter = Interpreter::new(&mut sim, &mailbox, PartitionInfo::full(0), &config);
        let mut cursor = interpreter.begin(program.length());
        assert_eq!(interpreter.resume(program.words(), program.length(), &mut cursor), Ok(None));
        assert_eq!(cursor.index(), 3);

        mailbox.write_control(ControlWord::default().with_cancel(0x0005));
        let fault = interpreter
            .resume(program.words(), program.length(), &mut cursor)
            .unwrap_err();
        assert_eq!(fault.error, SequencerError::RequesterAbort { request: 0x0005 });
        assert_eq!(fault.index, 3);
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_poll_timeout_spans_slices() {
        let program = seal(&[Instruction::Poll { addr: 0x60, value: 1, mask: 1 }, Instruction::End]);
        let mailbox = Mailbox::with_capacity(64);
        let config = SequencerConfig::default()
            .with_poll_timeout_ns(10_000)
            .with_slice_ns(1_000);
        let mut sim = SimPlatform::new().with_read_latency_ns(100);

        let mut interpreter = Interpreter::new(&mut sim, &mailbox, PartitionInfo::full(0), &config);
        let mut cursor = interpreter.begin(program.length());
        let mut slices = 0;
        let fault = loop {
            match interpreter.resume(program.words(), program.length(), &mut cursor) {
                Ok(None) => slices += 1,
                Ok(Some(summary)) => panic!("poll should not complete: {summary:?}"),
                Err(fault) => break fault,
            }
        };
        assert!(matches!(fault.error, SequencerError::PollTimeout { addr: 0x60, .. }));
        assert!(slices >= 9, "only {slices} slices");
        assert_eq!(sim.read_count(), 100);
    }

    #[test]
    fn test_legacy_stop_poll_completes_when_satisfied() {
        let program = seal(&[
            Instruction::Poll { addr: LEGACY_FB_STOP_ADDR, value: 1, mask: 1 },
            Instruction::End,
        ]);
        let mut sim = SimPlatform::new();
        sim.script_reads(LEGACY_FB_STOP_ADDR, [0, 0, 0, 1]);
        run(&mut sim, PartitionInfo::full(0), &program).unwrap();
        assert_eq!(sim.read_count(), 4);
    }
}

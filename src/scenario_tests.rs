//! End-to-end scenarios across encoder, handshake and interpreter

use std::rc::Rc;

use proptest::prelude::*;

use crate::config::SequencerConfig;
use crate::crc::{crc32_words, Crc32};
use crate::encoder::Encoder;
use crate::error::{code, SequencerError};
use crate::executor::Interpreter;
use crate::mailbox::{ControlWord, Mailbox};
use crate::opcodes::{self, Opcode};
use crate::program::{self, Instruction, Program};
use crate::regs::{TRAINING_STATE_RUNNING, TRAINING_SUBP1_SHIFT};
use crate::session::{Outcome, Session};
use crate::sim::SimPlatform;
use crate::topology::PartitionInfo;

const BUDGET: usize = 64;

fn session_with(sim: SimPlatform, config: SequencerConfig) -> Session<SimPlatform> {
    Session::with_mailbox(
        Rc::new(Mailbox::with_capacity(256)),
        sim,
        PartitionInfo::full(0),
        config,
    )
}

fn session() -> Session<SimPlatform> {
    session_with(SimPlatform::new(), SequencerConfig::default())
}

#[test]
fn test_single_store_completes() {
    let mut encoder = Encoder::recording(SequencerConfig::default());
    encoder.emit_store(0x100, 0xAAAA).unwrap();
    let program = encoder.finish().unwrap();

    let mut session = session();
    let outcome = session.execute(&program, BUDGET).unwrap();

    assert!(outcome.is_completed(), "{outcome:?}");
    let writes = session.platform().writes();
    assert_eq!(writes.len(), 1);
    assert_eq!((writes[0].addr, writes[0].value), (0x100, 0xAAAA));
    assert!(!writes[0].blocking);
    assert_eq!(session.satellite().completed(), 1);
}

#[test]
fn test_bad_crc_runs_nothing() {
    let words = [
        program::header(5),
        0xDEAD_BEEF,
        opcodes::pack(Opcode::Store, 0x100),
        0xAAAA,
        opcodes::pack(Opcode::End, 0),
    ];
    let mut session = session();
    let outcome = session.execute_words(&words, BUDGET).unwrap();

    assert_eq!(outcome.error_code(), Some(code::BAD_CRC));
    assert!(session.platform().writes().is_empty());
    let diag = session.satellite().diagnostics().unwrap();
    assert_eq!(diag.operand_a, 0xDEAD_BEEF);
    assert_eq!(diag.operand_b, crc32_words(&words[2..]));
}

#[test]
fn test_rmw_sets_masked_bits() {
    let mut encoder = Encoder::recording(SequencerConfig::default());
    encoder.emit_rmw(0x240, 0xF0, 0xFF).unwrap();
    let program = encoder.finish().unwrap();

    let mut sim = SimPlatform::new();
    sim.preset(0x240, 0x0F);
    let mut session = session_with(sim, SequencerConfig::default());
    assert!(session.execute(&program, BUDGET).unwrap().is_completed());
    assert_eq!(session.platform().peek(0x240), 0xF0);
}

#[test]
fn test_unsatisfied_poll_times_out_on_budget() {
    let config = SequencerConfig::default().with_poll_timeout_ns(5_000);
    let mut encoder = Encoder::recording(config);
    encoder.emit_poll(0x300, 1, 1).unwrap();
    let program = encoder.finish().unwrap();

    let sim = SimPlatform::new().with_read_latency_ns(100);
    let mut session = session_with(sim, config);
    let outcome = session.execute(&program, BUDGET).unwrap();

    let Outcome::Failed { code, diagnostics: Some(diag) } = outcome else {
        panic!("Expected failure, got {outcome:?}");
    };
    assert_eq!(code, code::POLL_TIMEOUT);
    let elapsed = diag.elapsed.unwrap().as_nanos() as u64;
    assert!((5_000..=5_100).contains(&elapsed), "elapsed {elapsed}");
    assert!(session.satellite().is_halted());
}

#[test]
fn test_hazard_pair_stalls_second_store() {
    let mut encoder = Encoder::recording(SequencerConfig::default());
    encoder.emit_store(0x900100, 1).unwrap();
    encoder.emit_store(0x900104, 2).unwrap();
    encoder.emit_store(0x000200, 3).unwrap();
    let program = encoder.finish().unwrap();

    let decoded: Vec<Instruction> = program
        .instructions()
        .map(|item| item.map(|(_, instruction)| instruction).unwrap())
        .collect();
    assert_eq!(
        decoded,
        vec![
            Instruction::Store { addr: 0x900100, value: 1 },
            Instruction::StallingWrite { addr: 0x900104, value: 2 },
            Instruction::Store { addr: 0x000200, value: 3 },
            Instruction::End,
        ]
    );
}

#[test]
fn test_training_check_cancelled_mid_spin() {
    let mut encoder = Encoder::recording(SequencerConfig::default());
    encoder.emit_training_check(0x400).unwrap();
    let program = encoder.finish().unwrap();

    let mailbox = Rc::new(Mailbox::with_capacity(64));
    let mut sim = SimPlatform::new();
    sim.preset(0x400, TRAINING_STATE_RUNNING << TRAINING_SUBP1_SHIFT);
    let requester = mailbox.clone();
    sim.on_read(move |_, count| {
        if count == 3 {
            requester.write_control(requester.control().with_cancel(0x0099));
        }
    });

    let mut session = Session::with_mailbox(
        mailbox,
        sim,
        PartitionInfo::full(0),
        SequencerConfig::default(),
    );
    let outcome = session.execute(&program, BUDGET).unwrap();
    assert_eq!(outcome.error_code(), Some(code::REQUESTER_ABORT));
    assert_eq!(session.platform().read_count(), 3);
}

#[test]
fn test_corrupted_slot_detected_after_submit() {
    let mut encoder = Encoder::recording(SequencerConfig::default());
    encoder.emit_store(0x100, 1).unwrap();
    encoder.emit_store(0x104, 2).unwrap();
    let program = encoder.finish().unwrap();

    let mut session = session();
    session.requester().submit(&program).unwrap();
    session.mailbox().poke_program(3, 0xFFFF_FFFF);

    // Drive the satellite by hand: boot, pick up start, validate
    for _ in 0..3 {
        session.satellite_mut().step();
    }
    assert!(session.satellite().is_halted());
    assert_eq!(session.mailbox().mirror().error_code(), Some(code::BAD_CRC));
    assert!(session.platform().writes().is_empty());
}

#[test]
fn test_oversized_header_is_size_fault() {
    let mut words = Program::seal(Instruction::End.encode().as_slice())
        .words()
        .to_vec();
    words[0] = program::header(10_000);
    let mut session = session();
    let outcome = session.execute_words(&words, BUDGET).unwrap();
    assert_eq!(outcome.error_code(), Some(code::SIZE_FAULT));
}

fn hazard_addr() -> impl Strategy<Value = u32> {
    (0x900000u32..0x900400).prop_map(|addr| addr & !0x3)
}

fn plain_addr() -> impl Strategy<Value = u32> {
    (0x1000u32..0x2000).prop_map(|addr| addr & !0x3)
}

proptest! {
    #[test]
    fn test_crc_sees_single_word_corruption(
        body in prop::collection::vec(any::<u32>(), 1..64),
        index in any::<prop::sample::Index>(),
        flip in 1u32..,
    ) {
        let mut crc = Crc32::new();
        let original = crc.checksum_words(&body);
        prop_assert_eq!(original, crc.checksum_words(&body));

        let mut corrupted = body.clone();
        let at = index.index(corrupted.len());
        corrupted[at] ^= flip;
        prop_assert_ne!(original, crc.checksum_words(&corrupted));
    }

    #[test]
    fn test_hazard_run_stalls_only_last(
        run in prop::collection::vec((hazard_addr(), any::<u32>()), 2..20),
        tail in plain_addr(),
    ) {
        let mut encoder = Encoder::recording(SequencerConfig::default());
        for &(addr, value) in &run {
            encoder.emit_store(addr, value).unwrap();
        }
        encoder.emit_store(tail, 0).unwrap();
        prop_assert_eq!(encoder.backend().stalls_inserted(), 1);
        let program = encoder.finish().unwrap();

        let opcodes: Vec<Opcode> = program
            .instructions()
            .map(|item| item.map(|(_, instruction)| instruction.opcode()).unwrap())
            .collect();
        let stalls: Vec<usize> = opcodes
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == Opcode::StallingWrite)
            .map(|(i, _)| i)
            .collect();
        prop_assert_eq!(stalls, vec![run.len() - 1]);
        prop_assert_eq!(opcodes.len(), run.len() + 2);
    }

    #[test]
    fn test_lower_rmw_skip_keeps_stream_aligned(
        prefix in prop::collection::vec((plain_addr(), any::<u32>()), 0..8),
        lower in (plain_addr(), any::<u32>(), any::<u32>()),
        next in (plain_addr(), any::<u32>()),
    ) {
        let mut stream = Vec::new();
        for &(addr, value) in &prefix {
            stream.extend_from_slice(Instruction::Store { addr, value }.encode().as_slice());
        }
        let (addr, value, mask) = lower;
        stream.extend_from_slice(
            Instruction::ReadModifyWriteLower { addr, value, mask }.encode().as_slice(),
        );
        stream.extend_from_slice(Instruction::Store { addr: next.0, value: next.1 }.encode().as_slice());
        stream.extend_from_slice(Instruction::End.encode().as_slice());
        let program = Program::seal(&stream);

        let mailbox = Mailbox::with_capacity(8);
        let config = SequencerConfig::default();
        let mut sim = SimPlatform::new();
        let summary = Interpreter::new(&mut sim, &mailbox, PartitionInfo::half(0), &config)
            .run_program(&program)
            .unwrap();

        prop_assert_eq!(summary.skipped, 1);
        prop_assert_eq!(sim.read_count(), 0);
        let writes: Vec<(u32, u32)> = sim.writes().iter().map(|w| (w.addr, w.value)).collect();
        let mut expected = prefix.clone();
        expected.push(next);
        prop_assert_eq!(writes, expected);
    }

    #[test]
    fn test_poll_timeout_is_bounded(timeout in 1_000u64..100_000, latency in 1u64..500) {
        let config = SequencerConfig::default().with_poll_timeout_ns(timeout);
        let mut sim = SimPlatform::new().with_read_latency_ns(latency);
        let result = Encoder::direct(&mut sim, PartitionInfo::full(0), config).emit_poll(0x80, 1, 1);

        let is_timeout = matches!(result, Err(SequencerError::PollTimeout { .. }));
        prop_assert!(is_timeout);
        prop_assert!(sim.now() >= timeout);
        prop_assert!(sim.now() < timeout + latency);
    }

    #[test]
    fn test_cancel_ends_poll_within_one_read(at_read in 1usize..200, request in 1u16..) {
        let program = Program::seal(
            &[
                Instruction::Poll { addr: 0x80, value: 1, mask: 1 }.encode().as_slice(),
                Instruction::End.encode().as_slice(),
            ]
            .concat(),
        );
        let mailbox = Rc::new(Mailbox::with_capacity(8));
        let requester = mailbox.clone();
        let mut sim = SimPlatform::new();
        sim.on_read(move |_, count| {
            if count == at_read {
                requester.write_control(ControlWord::default().with_cancel(request));
            }
        });

        let config = SequencerConfig::default();
        let fault = Interpreter::new(&mut sim, &mailbox, PartitionInfo::full(0), &config)
            .run_program(&program)
            .unwrap_err();
        prop_assert_eq!(fault.error, SequencerError::RequesterAbort { request });
        prop_assert_eq!(sim.read_count(), at_read);
    }
}

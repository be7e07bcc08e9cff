#![no_main]

use libfuzzer_sys::fuzz_target;
use physeq::{Mailbox, Outcome, PartitionInfo, RequestState, SequencerConfig, Session, SimPlatform};
use std::rc::Rc;

fuzz_target!(|data: &[u8]| {
    // Skip very large inputs to avoid timeouts
    if data.len() > 4 * 256 {
        return;
    }

    let mut words: Vec<u32> = data
        .chunks(4)
        .map(|chunk| {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(bytes)
        })
        .collect();

    // Half the inputs get a correct header and CRC so execution is reached
    if words.len() > 2 && words[0] & 1 == 0 {
        let body = words.split_off(2);
        words = physeq::Program::seal(&body).words().to_vec();
    }

    // Keep polls short so hangs show up as real bugs
    let config = SequencerConfig::default()
        .with_poll_timeout_ns(10_000)
        .with_training_timeout_ns(10_000);
    let mut session = Session::with_mailbox(
        Rc::new(Mailbox::with_capacity(256)),
        SimPlatform::new(),
        PartitionInfo::half(0),
        config,
    );

    let Ok(mut outcome) = session.execute_words(&words, 16) else {
        return;
    };

    // Long waits and the legacy stop poll outlast the budget; give up on them
    if let Outcome::Unresponsive { last_seen } = outcome {
        assert_eq!(last_seen, RequestState::Running);
        outcome = session.cancel(0xFFFF, 1);
        assert_eq!(outcome.error_code(), Some(physeq::error::code::REQUESTER_ABORT));
    }

    match outcome {
        Outcome::Completed(summary) => {
            // Property: a completed program ended on END within its length
            assert!(summary.words as usize + 2 <= words.len());
            assert!(!session.satellite().is_halted());
        }
        Outcome::Failed { code, diagnostics } => {
            // Property: every failure halts and leaves a matching record
            assert!(session.satellite().is_halted());
            let diagnostics = diagnostics.expect("halted core has diagnostics");
            assert_eq!(diagnostics.code, code);
            assert_ne!(physeq::error::code_name(code), "UNKNOWN");
        }
        Outcome::Unresponsive { .. } => {
            panic!("satellite stopped answering without halting");
        }
    }
});

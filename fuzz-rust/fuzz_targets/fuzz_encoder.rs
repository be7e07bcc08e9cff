#![no_main]

use libfuzzer_sys::fuzz_target;
use physeq::{Encoder, Instruction, Opcode, Program, SequencerConfig};

fuzz_target!(|data: &[u8]| {
    // Skip very large inputs to avoid timeouts
    if data.len() > 4096 {
        return;
    }

    let mut encoder = Encoder::recording(SequencerConfig::default());
    let mut emitted = 0usize;

    for chunk in data.chunks_exact(9) {
        let addr = u32::from_le_bytes([chunk[1], chunk[2], chunk[3], 0]);
        let value = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let mask = u32::from(chunk[8]) * 0x0101_0101;
        let result = match chunk[0] % 7 {
            0 => encoder.emit_store(addr, value),
            1 => encoder.emit_stalling_store(addr, value),
            2 => encoder.emit_rmw(addr, value, mask),
            3 => encoder.emit_rmw_lower(addr, value, mask),
            4 => encoder.emit_poll(addr, value, mask),
            5 => encoder.emit_wait_ns(u64::from(value)),
            _ => encoder.emit_training_check(addr),
        };
        if result.is_err() {
            return;
        }
        emitted += 1;
    }

    let Ok(program) = encoder.finish() else {
        return;
    };

    // Property: the recorded program validates on its own
    let reparsed = Program::from_words(program.words().to_vec()).expect("recorded program validates");
    assert_eq!(reparsed, program);

    // Property: every emitted operation decodes, in order, followed by END
    let decoded: Vec<Instruction> = program
        .instructions()
        .map(|item| item.expect("recorded program decodes").1)
        .collect();
    assert_eq!(decoded.len(), emitted + 1);
    assert_eq!(decoded.last().map(Instruction::opcode), Some(Opcode::End));

    // Property: protobuf round-trip should work
    let decoded = Program::from_proto_bytes(&program.to_proto_bytes());
    assert_eq!(decoded.as_ref(), Ok(&program));
});

use physeq::diagnostics::Diagnostics;
use physeq::regs::LEGACY_FB_STOP_ADDR;
use physeq::{
    Encoder, Outcome, PartitionInfo, PartitionTable, Program, RecordingBackend, SequencerConfig,
    Session, SimPlatform,
};

fn print_separator() {
    println!("\n{}", "=".repeat(80));
}

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!("  {}", title);
    println!("{}", "=".repeat(80));
}

fn hex_dump(words: &[u32]) -> String {
    words
        .iter()
        .map(|w| format!("{:08x}", w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A short DRAM bring-up style sequence, recorded for the satellite core
fn record_training_step(config: SequencerConfig) -> Option<Program> {
    let mut encoder = Encoder::recording(config);
    let result = (|| -> physeq::error::Result<()> {
        // Two PHY writes back to back: only the second must stall
        encoder.emit_store(0x900010, 0x0000_0001)?;
        encoder.emit_store(0x900014, 0x0000_00C3)?;
        encoder.emit_rmw(0x000200, 0x0000_00F0, 0x0000_00FF)?;
        encoder.emit_rmw_lower(0x000204, 0x1, 0x1)?;
        encoder.emit_wait_ns(1_000)?;
        encoder.emit_poll(0x000208, 0x1, 0x1)?;
        encoder.emit_training_check(0x00020C)
    })();

    if let Err(e) = result {
        println!("  ✗ Recording failed: {}", e);
        return None;
    }

    println!("  Stalls inserted: {}", encoder.backend().stalls_inserted());
    match encoder.finish() {
        Ok(program) => Some(program),
        Err(e) => {
            println!("  ✗ Finishing failed: {}", e);
            None
        }
    }
}

fn training_platform() -> SimPlatform {
    let mut sim = SimPlatform::new();
    sim.preset(0x000200, 0x0000_000F);
    sim.script_reads(0x000208, [0, 0, 1]);
    // sub-partition 0 finishes, sub-partition 1 idle
    sim.script_reads(0x00020C, [0b0001, 0b0010]);
    sim
}

fn example_record_and_disassemble() {
    print_header("Example 1: Record Mode and Disassembly");

    let config = SequencerConfig::default();
    let Some(program) = record_training_step(config) else {
        return;
    };

    println!("\nProgram ({} words):", program.length());
    println!("  {}", hex_dump(program.words()));
    println!("\nDisassembly:");
    println!("{}", indent(&program.to_string()));

    let bytes = program.to_proto_bytes();
    println!("\nProtobuf envelope: {} bytes", bytes.len());
    match Program::from_proto_bytes(&bytes) {
        Ok(decoded) if decoded == program => println!("  ✓ Envelope decodes to the same program"),
        Ok(_) => println!("  ✗ Envelope decoded to a different program"),
        Err(e) => println!("  ✗ Envelope rejected: {}", e),
    }
}

fn example_end_to_end() {
    print_header("Example 2: Handshake and Execution");

    let config = SequencerConfig::default();
    let Some(program) = record_training_step(config) else {
        return;
    };

    let mut table = PartitionTable::new();
    table.install(PartitionInfo::full(0));
    table.install(PartitionInfo::half(1));

    for index in [0, 1, 2] {
        let mut session = match Session::from_table(training_platform(), &table, index, config) {
            Ok(session) => session,
            Err(e) => {
                println!("\nPartition {}:\n  ✗ {}", index, e);
                continue;
            }
        };
        let partition = session.satellite().partition();
        println!(
            "\nPartition {} ({}):",
            partition.partition_index,
            if partition.half_subpartition { "half" } else { "full" }
        );
        match session.execute(&program, 64) {
            Ok(Outcome::Completed(summary)) => {
                println!(
                    "  ✓ Completed: {} instructions, {} skipped, {} ns",
                    summary.instructions, summary.skipped, summary.elapsed_ns
                );
                for write in session.platform().writes() {
                    println!(
                        "    {:>6} ns  {:#08x} <- {:#010x}{}",
                        write.at_ns,
                        write.addr,
                        write.value,
                        if write.blocking { "  (stalled)" } else { "" }
                    );
                }
            }
            Ok(other) => println!("  ✗ {:?}", other),
            Err(e) => println!("  ✗ Handshake error: {}", e),
        }
    }
}

fn print_post_mortem(diagnostics: &Diagnostics) {
    println!("  Post-mortem:");
    println!("    error:    {} ({})", diagnostics.code_name(), diagnostics.code);
    println!("    index:    {}", diagnostics.index);
    println!("    word:     {:#010x}", diagnostics.word);
    println!(
        "    operands: {:#010x} {:#010x}",
        diagnostics.operand_a, diagnostics.operand_b
    );
    println!("    message:  {}", diagnostics.message);
}

fn record_words(
    config: SequencerConfig,
    emit: impl FnOnce(&mut Encoder<RecordingBackend>) -> physeq::error::Result<()>,
) -> physeq::error::Result<Vec<u32>> {
    let mut encoder = Encoder::recording(config);
    emit(&mut encoder)?;
    Ok(encoder.finish()?.words().to_vec())
}

fn example_failures() {
    print_header("Example 3: Failures and Post-Mortem");

    let config = SequencerConfig::default().with_poll_timeout_ns(20_000);

    let corrupted = record_words(config, |encoder| encoder.emit_store(0x100, 0xAAAA)).map(|mut words| {
        if let Some(value) = words.get_mut(3) {
            *value ^= 0x0000_0100;
        }
        words
    });
    let stuck = record_words(config, |encoder| encoder.emit_poll(0x300, 0x1, 0x1));

    let cases = [
        ("Corrupted store value", corrupted),
        ("Poll that never completes", stuck),
        ("Missing START header", Ok(vec![0x0100_0100, 0xAAAA])),
    ];

    for (title, words) in cases {
        println!("\n{}:", title);
        let words = match words {
            Ok(words) => words,
            Err(e) => {
                println!("  ✗ Recording failed: {}", e);
                continue;
            }
        };
        let mut session = Session::new(SimPlatform::new(), PartitionInfo::full(0), config);
        match session.execute_words(&words, 64) {
            Ok(Outcome::Failed { code, diagnostics }) => {
                println!("  ✓ Satellite halted with {}", physeq::error::code_name(code));
                println!("  Writes performed: {}", session.platform().writes().len());
                if let Some(diagnostics) = diagnostics {
                    print_post_mortem(&diagnostics);
                }
            }
            Ok(other) => println!("  ✗ Unexpected outcome: {:?}", other),
            Err(e) => println!("  ✗ Handshake error: {}", e),
        }
    }
}

fn example_cancel() {
    print_header("Example 4: Watchdog and Cancel");

    let config = SequencerConfig::default();
    let words = match record_words(config, |encoder| encoder.emit_poll(LEGACY_FB_STOP_ADDR, 0x1, 0x1)) {
        Ok(words) => words,
        Err(e) => {
            println!("  ✗ Recording failed: {}", e);
            return;
        }
    };

    let mut session = Session::new(SimPlatform::new(), PartitionInfo::full(0), config);
    match session.execute_words(&words, 8) {
        Ok(Outcome::Unresponsive { last_seen }) => {
            println!("\n  Legacy stop poll still spinning after 8 steps ({:?})", last_seen);
        }
        Ok(other) => {
            println!("\n  ✗ Unexpected outcome: {:?}", other);
            return;
        }
        Err(e) => {
            println!("\n  ✗ Handshake error: {}", e);
            return;
        }
    }

    match session.cancel(0x00C0, 8) {
        Outcome::Failed { code, diagnostics } => {
            println!("  ✓ Cancel accepted, satellite halted with {}", physeq::error::code_name(code));
            if let Some(diagnostics) = diagnostics {
                print_post_mortem(&diagnostics);
            }
        }
        other => println!("  ✗ Cancel ignored: {:?}", other),
    }
}

fn example_direct_mode() {
    print_header("Example 5: Direct Mode");

    let config = SequencerConfig::default();
    let mut sim = SimPlatform::new();
    sim.preset(0x000200, 0x0000_000F);
    sim.script_reads(0x000208, [0, 1]);

    let mut encoder = Encoder::direct(&mut sim, PartitionInfo::full(0), config);
    let result = (|| -> physeq::error::Result<()> {
        encoder.emit_store(0x900010, 0x1)?;
        encoder.emit_rmw(0x000200, 0xF0, 0xFF)?;
        encoder.emit_poll(0x000208, 0x1, 0x1)
    })();
    drop(encoder);

    match result {
        Ok(()) => println!("\n  ✓ Performed {} writes on the calling core", sim.writes().len()),
        Err(e) => println!("\n  ✗ Error: {}", e),
    }
    println!("  0x000200 = {:#010x}", sim.peek(0x000200));
    println!(
        "  Note: direct mode has no stall insertion and no requester to cancel it;\n  \
         a poll of the legacy stop register ({:#08x}) would spin forever here.",
        LEGACY_FB_STOP_ADDR
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("physeq=info")),
        )
        .init();

    println!("{}", "━".repeat(80));
    println!("  PHY Register Sequencer - Walkthrough");
    println!("{}", "━".repeat(80));

    example_record_and_disassemble();
    example_end_to_end();
    example_failures();
    example_cancel();
    example_direct_mode();

    print_separator();
    println!("\n✨ All examples completed!");
    println!("\nKey Features Demonstrated:");
    println!("  ✓ Record mode with automatic stall insertion");
    println!("  ✓ CRC-protected program image and disassembly");
    println!("  ✓ Protobuf program envelope");
    println!("  ✓ Requester/satellite handshake");
    println!("  ✓ Lower sub-partition skipping");
    println!("  ✓ Fatal errors with post-mortem diagnostics");
    println!("  ✓ Step-budget watchdog and requester cancel");
    println!("  ✓ Direct mode on the calling core");
    println!("\n{}", "━".repeat(80));
}

//! PHY register sequencer
//!
//! Memory training on the main core describes register sequences (stores,
//! read-modify-writes, polls, waits) through an `Encoder`. The sequences are
//! either performed right away or recorded into a CRC-protected bytecode
//! program that a satellite core executes with tight timing, handed over
//! through a small control/status mailbox.
//!
//! # Architecture
//!
//! - **Bytecode**: 32-bit words, `opcode << 24 | field`, with a `START` header
//!   word and a CRC-32 word in front of the instruction stream
//! - **Encoder**: one front end, a `DirectBackend` or a `RecordingBackend`
//!   chosen at construction; recording inserts stalls after PHY hazard writes
//! - **Handshake**: `Requester` and `SatelliteCore` share a `Mailbox`; every
//!   failure halts the satellite with a typed code in the status register
//! - **Platform trait**: all bus access and timing goes through `Platform`,
//!   with `SimPlatform` as the in-memory implementation
//!
//! # Example Usage
//!
//! ```
//! use physeq::{Encoder, Outcome, PartitionInfo, SequencerConfig, Session, SimPlatform};
//!
//! let config = SequencerConfig::default();
//! let mut encoder = Encoder::recording(config);
//! encoder.emit_store(0x100, 0xAAAA).unwrap();
//! encoder.emit_wait_ns(1_000).unwrap();
//! let program = encoder.finish().unwrap();
//!
//! let mut session = Session::new(SimPlatform::new(), PartitionInfo::full(0), config);
//! let outcome = session.execute(&program, 64).unwrap();
//! assert!(matches!(outcome, Outcome::Completed(_)));
//! assert_eq!(session.platform().peek(0x100), 0xAAAA);
//! ```

// Wire format
pub mod crc;
pub mod opcodes;
pub mod program;
pub mod proto;

// Contracts and configuration
pub mod config;
pub mod error;
pub mod platform;
pub mod regs;
pub mod topology;

// Encoding
pub mod encoder;
pub mod hazard;

// Execution
pub mod diagnostics;
pub mod executor;
pub mod mailbox;
pub(crate) mod ops;
pub mod requester;
pub mod satellite;
pub mod session;
pub mod sim;

#[cfg(feature = "python")]
mod python_bindings;

#[cfg(test)]
mod scenario_tests;

// Re-export main types for convenience
pub use config::SequencerConfig;
pub use crc::Crc32;
pub use diagnostics::Diagnostics;
pub use encoder::{DirectBackend, Encoder, RecordingBackend, SequencerBackend};
pub use error::{Fault, HandshakeError, SequencerError};
pub use executor::{Cursor, Interpreter, RunSummary};
pub use hazard::{HazardMap, StallInserter};
pub use mailbox::{ControlWord, Mailbox, StatusWord};
pub use opcodes::Opcode;
pub use platform::Platform;
pub use program::{Instruction, Program};
pub use requester::{RequestState, Requester};
pub use satellite::{ExecutorState, SatelliteCore};
pub use session::{Outcome, Session};
pub use sim::SimPlatform;
pub use topology::{PartitionInfo, PartitionTable};

/// Current bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

//! Error types for the sequencer
//!
//! Every `SequencerError` is terminal for the program that raised it. The
//! numeric code of each variant is what the satellite core packs into the
//! upper half of the status register.

use thiserror::Error;

/// Result type for sequencer operations
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Status-register codes, one per error kind
pub mod code {
    pub const SIZE_FAULT: u16 = 0x0001;
    pub const BAD_CRC: u16 = 0x0002;
    pub const NO_START: u16 = 0x0003;
    pub const INVALID_OPCODE: u16 = 0x0004;
    pub const POLL_TIMEOUT: u16 = 0x0005;
    pub const TRAINING_FAILURE: u16 = 0x0006;
    pub const REQUESTER_ABORT: u16 = 0x0007;
    pub const ENCODER_OVERFLOW: u16 = 0x0008;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("program of {length} words does not fit a {capacity}-word buffer")]
    SizeFault { length: u32, capacity: u32 },

    #[error("program crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BadCrc { stored: u32, computed: u32 },

    #[error("program does not begin with a START header (found {word:#010x})")]
    NoStart { word: u32 },

    #[error("invalid opcode {opcode:#04x}")]
    InvalidOpcode { opcode: u8 },

    #[error(
        "poll of {addr:#08x} timed out waiting for {value:#010x} under mask {mask:#010x} (last read {last:#010x})"
    )]
    PollTimeout {
        addr: u32,
        value: u32,
        mask: u32,
        last: u32,
    },

    #[error("training reported an error at {addr:#08x} (status {status:#010x})")]
    TrainingFailure { addr: u32, status: u32 },

    #[error("requester aborted execution (cancel request {request:#06x})")]
    RequesterAbort { request: u16 },

    #[error("sequencer overflow: program needs more than {capacity} words")]
    EncoderOverflow { capacity: usize },
}

impl SequencerError {
    /// Code packed into status bits 16..31
    pub fn code(&self) -> u16 {
        match self {
            SequencerError::SizeFault { .. } => code::SIZE_FAULT,
            SequencerError::BadCrc { .. } => code::BAD_CRC,
            SequencerError::NoStart { .. } => code::NO_START,
            SequencerError::InvalidOpcode { .. } => code::INVALID_OPCODE,
            SequencerError::PollTimeout { .. } => code::POLL_TIMEOUT,
            SequencerError::TrainingFailure { .. } => code::TRAINING_FAILURE,
            SequencerError::RequesterAbort { .. } => code::REQUESTER_ABORT,
            SequencerError::EncoderOverflow { .. } => code::ENCODER_OVERFLOW,
        }
    }

    /// Short upper-case name of the error kind
    pub fn name(&self) -> &'static str {
        code_name(self.code())
    }

    /// The two values in play when the error was raised, for the diagnostic bank
    pub fn operands(&self) -> (u32, u32) {
        match *self {
            SequencerError::SizeFault { length, capacity } => (length, capacity),
            SequencerError::BadCrc { stored, computed } => (stored, computed),
            SequencerError::NoStart { word } => (word, 0),
            SequencerError::InvalidOpcode { opcode } => (opcode as u32, 0),
            SequencerError::PollTimeout { value, last, .. } => (value, last),
            SequencerError::TrainingFailure { addr, status } => (addr, status),
            SequencerError::RequesterAbort { request } => (request as u32, 0),
            SequencerError::EncoderOverflow { capacity } => (capacity as u32, 0),
        }
    }
}

/// Name of a status-register error code
pub fn code_name(code: u16) -> &'static str {
    match code {
        code::SIZE_FAULT => "SIZE_FAULT",
        code::BAD_CRC => "BAD_CRC",
        code::NO_START => "NO_START",
        code::INVALID_OPCODE => "INVALID_OPCODE",
        code::POLL_TIMEOUT => "POLL_TIMEOUT",
        code::TRAINING_FAILURE => "TRAINING_FAILURE",
        code::REQUESTER_ABORT => "REQUESTER_ABORT",
        code::ENCODER_OVERFLOW => "ENCODER_OVERFLOW",
        _ => "UNKNOWN",
    }
}

/// A `SequencerError` together with where in the program it happened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (word {index}, {word:#010x})")]
pub struct Fault {
    pub error: SequencerError,
    /// Word index of the instruction being executed (0 for header faults)
    pub index: u32,
    /// First word of that instruction
    pub word: u32,
}

impl Fault {
    pub fn new(error: SequencerError, index: u32, word: u32) -> Self {
        Fault { error, index, word }
    }

    pub fn code(&self) -> u16 {
        self.error.code()
    }
}

/// Misuse of the handshake from the requesting side
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("satellite core is busy (status {status:#010x}, control {control:#010x})")]
    Busy { status: u32, control: u32 },

    #[error("program of {length} words does not fit the {capacity}-word program slot")]
    ProgramTooLarge { length: usize, capacity: usize },

    #[error("partition {index} is not in the partition table")]
    UnknownPartition { index: u8 },
}

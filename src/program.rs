//! Program image: instruction decoding, validation and the sealed `Program`

use std::fmt;

use crate::config::PROGRAM_CAPACITY_WORDS;
use crate::crc::Crc32;
use crate::error::SequencerError;
use crate::opcodes::{self, Opcode};
use crate::proto;

/// Index of the header word
pub const HEADER_INDEX: usize = 0;

/// Index of the CRC word
pub const CRC_INDEX: usize = 1;

/// Index of the first instruction
pub const BODY_START: usize = 2;

/// A decoded sequencer instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Store { addr: u32, value: u32 },
    ReadModifyWrite { addr: u32, value: u32, mask: u32 },
    ReadModifyWriteLower { addr: u32, value: u32, mask: u32 },
    StallingWrite { addr: u32, value: u32 },
    Poll { addr: u32, value: u32, mask: u32 },
    Wait { ticks: u32 },
    TrainingCheck { addr: u32 },
    End,
}

/// Encoded form of one instruction, at most three words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedInstruction {
    words: [u32; 3],
    len: usize,
}

impl EncodedInstruction {
    pub fn as_slice(&self) -> &[u32] {
        &self.words[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Store { .. } => Opcode::Store,
            Instruction::ReadModifyWrite { .. } => Opcode::ReadModifyWrite,
            Instruction::ReadModifyWriteLower { .. } => Opcode::ReadModifyWriteLower,
            Instruction::StallingWrite { .. } => Opcode::StallingWrite,
            Instruction::Poll { .. } => Opcode::Poll,
            Instruction::Wait { .. } => Opcode::Wait,
            Instruction::TrainingCheck { .. } => Opcode::TrainingCheck,
            Instruction::End => Opcode::End,
        }
    }

    /// Register address targeted by this instruction, if any
    pub fn addr(&self) -> Option<u32> {
        match *self {
            Instruction::Store { addr, .. }
            | Instruction::ReadModifyWrite { addr, .. }
            | Instruction::ReadModifyWriteLower { addr, .. }
            | Instruction::StallingWrite { addr, .. }
            | Instruction::Poll { addr, .. }
            | Instruction::TrainingCheck { addr } => Some(addr),
            Instruction::Wait { .. } | Instruction::End => None,
        }
    }

    pub fn word_count(&self) -> usize {
        self.opcode().word_count()
    }

    /// Stalling counterpart of a posted write; other instructions are returned unchanged
    pub fn into_stalling(self) -> Self {
        match self {
            Instruction::Store { addr, value } => Instruction::StallingWrite { addr, value },
            other => other,
        }
    }

    /// Encode into program words
    pub fn encode(&self) -> EncodedInstruction {
        let op = self.opcode();
        let (words, len) = match *self {
            Instruction::Store { addr, value } | Instruction::StallingWrite { addr, value } => {
                ([opcodes::pack(op, addr), value, 0], 2)
            }
            Instruction::ReadModifyWrite { addr, value, mask }
            | Instruction::ReadModifyWriteLower { addr, value, mask }
            | Instruction::Poll { addr, value, mask } => {
                ([opcodes::pack(op, addr), value, mask], 3)
            }
            Instruction::Wait { ticks } => ([opcodes::pack(op, ticks), 0, 0], 1),
            Instruction::TrainingCheck { addr } => ([opcodes::pack(op, addr), 0, 0], 1),
            Instruction::End => ([opcodes::pack(op, 0), 0, 0], 1),
        };
        EncodedInstruction { words, len }
    }

    /// Decode the instruction starting at `stream[at]`
    ///
    /// A `Start` inside the stream is not an instruction and is rejected as an
    /// invalid opcode. Operand words past the end of `stream` are a size fault.
    pub fn decode(stream: &[u32], at: usize) -> Result<Self, SequencerError> {
        let word = *stream.get(at).ok_or(SequencerError::SizeFault {
            length: (at + 1) as u32,
            capacity: stream.len() as u32,
        })?;
        let byte = opcodes::opcode_byte(word);
        let opcode = Opcode::from_u8(byte).ok_or(SequencerError::InvalidOpcode { opcode: byte })?;

        let end = at + opcode.word_count();
        if end > stream.len() {
            return Err(SequencerError::SizeFault {
                length: end as u32,
                capacity: stream.len() as u32,
            });
        }

        let addr = opcodes::field(word);
        let operand = |n: usize| stream[at + n];
        Ok(match opcode {
            Opcode::Store => Instruction::Store { addr, value: operand(1) },
            Opcode::ReadModifyWrite => Instruction::ReadModifyWrite {
                addr,
                value: operand(1),
                mask: operand(2),
            },
            Opcode::ReadModifyWriteLower => Instruction::ReadModifyWriteLower {
                addr,
                value: operand(1),
                mask: operand(2),
            },
            Opcode::StallingWrite => Instruction::StallingWrite { addr, value: operand(1) },
            Opcode::Poll => Instruction::Poll {
                addr,
                value: operand(1),
                mask: operand(2),
            },
            Opcode::Wait => Instruction::Wait { ticks: addr },
            Opcode::TrainingCheck => Instruction::TrainingCheck { addr },
            Opcode::End => Instruction::End,
            Opcode::Start => return Err(SequencerError::InvalidOpcode { opcode: byte }),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().mnemonic();
        match *self {
            Instruction::Store { addr, value } | Instruction::StallingWrite { addr, value } => {
                write!(f, "{name} {addr:#08x} <- {value:#010x}")
            }
            Instruction::ReadModifyWrite { addr, value, mask }
            | Instruction::ReadModifyWriteLower { addr, value, mask } => {
                write!(f, "{name} {addr:#08x} <- {value:#010x} & {mask:#010x}")
            }
            Instruction::Poll { addr, value, mask } => {
                write!(f, "{name} {addr:#08x} == {value:#010x} & {mask:#010x}")
            }
            Instruction::Wait { ticks } => write!(f, "{name} {ticks}"),
            Instruction::TrainingCheck { addr } => write!(f, "{name} {addr:#08x}"),
            Instruction::End => write!(f, "{name}"),
        }
    }
}

/// Header word for a program of `length` words
#[inline]
pub fn header(length: usize) -> u32 {
    opcodes::pack(Opcode::Start, length as u32)
}

/// Check the header and CRC of a program held in a buffer of `capacity` words
///
/// Returns the declared program length in words.
pub fn validate(words: &[u32], capacity: usize, crc: &mut Crc32) -> Result<usize, SequencerError> {
    let head = words.get(HEADER_INDEX).copied().unwrap_or(0);
    if Opcode::from_u8(opcodes::opcode_byte(head)) != Some(Opcode::Start) {
        return Err(SequencerError::NoStart { word: head });
    }

    let length = opcodes::field(head) as usize;
    let limit = capacity.min(words.len());
    if length < BODY_START || length > limit {
        return Err(SequencerError::SizeFault {
            length: length as u32,
            capacity: limit as u32,
        });
    }

    let stored = words[CRC_INDEX];
    let computed = crc.checksum_words(&words[BODY_START..length]);
    if stored != computed {
        return Err(SequencerError::BadCrc { stored, computed });
    }

    Ok(length)
}

/// A finished, CRC-protected program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    words: Vec<u32>,
}

impl Program {
    /// Validate raw words; anything past the declared length is dropped
    pub fn from_words(mut words: Vec<u32>) -> Result<Self, SequencerError> {
        let length = validate(&words, PROGRAM_CAPACITY_WORDS, &mut Crc32::new())?;
        words.truncate(length);
        Ok(Program { words })
    }

    /// Wrap words already sealed by the encoder
    pub(crate) fn from_sealed(words: Vec<u32>) -> Self {
        debug_assert_eq!(opcodes::field(words[HEADER_INDEX]) as usize, words.len());
        Program { words }
    }

    /// Seal a stream (instructions only) with header and CRC
    pub fn seal(stream: &[u32]) -> Self {
        let length = BODY_START + stream.len();
        let mut words = Vec::with_capacity(length);
        words.push(header(length));
        words.push(crate::crc::crc32_words(stream));
        words.extend_from_slice(stream);
        Program { words }
    }

    /// Every word, header and CRC included
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Declared length in words
    pub fn length(&self) -> usize {
        self.words.len()
    }

    pub fn stored_crc(&self) -> u32 {
        self.words[CRC_INDEX]
    }

    /// Instruction stream covered by the CRC
    pub fn body(&self) -> &[u32] {
        &self.words[BODY_START..]
    }

    /// Decoded instructions with their word index
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            words: &self.words,
            at: BODY_START,
            done: false,
        }
    }

    /// Deserialize a Program from protobuf bytes
    pub fn from_proto_bytes(bytes: &[u8]) -> Result<Self, String> {
        use prost::Message;

        let image = proto::ProgramImage::decode(bytes)
            .map_err(|e| format!("Failed to decode protobuf: {}", e))?;

        Self::from_proto(image)
    }

    /// Convert from protobuf ProgramImage message
    pub fn from_proto(image: proto::ProgramImage) -> Result<Self, String> {
        if image.version != crate::BYTECODE_VERSION {
            return Err(format!(
                "Unsupported bytecode version {} (expected {})",
                image.version,
                crate::BYTECODE_VERSION
            ));
        }
        let program = Program::from_words(image.words).map_err(|e| e.to_string())?;
        if program.stored_crc() != image.crc {
            return Err(format!(
                "Envelope crc {:#010x} does not match program crc {:#010x}",
                image.crc,
                program.stored_crc()
            ));
        }
        Ok(program)
    }

    /// Serialize this Program to protobuf bytes
    pub fn to_proto_bytes(&self) -> Vec<u8> {
        use prost::Message;

        self.to_proto().encode_to_vec()
    }

    /// Convert to protobuf ProgramImage message
    pub fn to_proto(&self) -> proto::ProgramImage {
        proto::ProgramImage {
            version: crate::BYTECODE_VERSION,
            words: self.words.clone(),
            crc: self.stored_crc(),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:04}: START length={} crc={:#010x}",
            HEADER_INDEX,
            self.length(),
            self.stored_crc()
        )?;
        for item in self.instructions() {
            match item {
                Ok((index, instruction)) => writeln!(f, "{index:04}: {instruction}")?,
                Err((index, error)) => writeln!(f, "{index:04}: <{error}>")?,
            }
        }
        Ok(())
    }
}

/// Iterator over the instructions of a program
///
/// Stops after `End` or after the first undecodable word.
pub struct Instructions<'a> {
    words: &'a [u32],
    at: usize,
    done: bool,
}

impl Iterator for Instructions<'_> {
    type Item = Result<(usize, Instruction), (usize, SequencerError)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.at >= self.words.len() {
            return None;
        }
        let index = self.at;
        match Instruction::decode(self.words, index) {
            Ok(instruction) => {
                self.at += instruction.word_count();
                if instruction == Instruction::End {
                    self.done = true;
                }
                Some(Ok((index, instruction)))
            }
            Err(error) => {
                self.done = true;
                Some(Err((index, error)))
            }
        }
    }
}

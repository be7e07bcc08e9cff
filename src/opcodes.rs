//! Instruction set for the PHY register sequencer
//!
//! Every instruction starts with a 32-bit word whose top byte is the opcode.
//! The low 24 bits carry a register address (address-bearing opcodes), a tick
//! count (`Wait`) or the program length (`Start`). Operand words follow the
//! first word; the total width of an instruction is fixed per opcode.

/// Mask of the 24-bit field in the low bits of an instruction word
pub const FIELD_MASK: u32 = 0x00FF_FFFF;

/// Bit position of the opcode byte
pub const OPCODE_SHIFT: u32 = 24;

/// Largest immediate a single `Wait` can carry
pub const MAX_WAIT_TICKS: u32 = FIELD_MASK;

/// Opcodes are single bytes in the top of the first instruction word
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Posted write
    /// Operands: value
    Store = 0x01,

    /// Read, merge under mask, blocking write back
    /// Operands: value, mask
    ReadModifyWrite = 0x02,

    /// Like `ReadModifyWrite`, skipped on partitions without a lower sub-partition
    /// Operands: value, mask
    ReadModifyWriteLower = 0x03,

    /// Write that blocks until the bus acknowledges it
    /// Operands: value
    StallingWrite = 0x04,

    /// Spin until `read(addr) & mask == value & mask`
    /// Operands: value, mask
    Poll = 0x05,

    /// Busy-wait; field holds the tick count
    Wait = 0x06,

    /// Spin on a training status register until both sub-partitions settle
    TrainingCheck = 0x07,

    /// Program header; field holds the program length in words
    Start = 0x0E,

    /// Terminal marker
    End = 0x0F,
}

impl Opcode {
    /// Try to parse a u8 into an Opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::Store),
            0x02 => Some(Opcode::ReadModifyWrite),
            0x03 => Some(Opcode::ReadModifyWriteLower),
            0x04 => Some(Opcode::StallingWrite),
            0x05 => Some(Opcode::Poll),
            0x06 => Some(Opcode::Wait),
            0x07 => Some(Opcode::TrainingCheck),
            0x0E => Some(Opcode::Start),
            0x0F => Some(Opcode::End),
            _ => None,
        }
    }

    /// Total number of words this instruction occupies, including the opcode word
    pub fn word_count(&self) -> usize {
        match self {
            Opcode::ReadModifyWrite | Opcode::ReadModifyWriteLower | Opcode::Poll => 3,
            Opcode::Store | Opcode::StallingWrite => 2,
            Opcode::Wait | Opcode::TrainingCheck | Opcode::Start | Opcode::End => 1,
        }
    }

    /// Mnemonic used by the disassembler
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Store => "STORE",
            Opcode::ReadModifyWrite => "RMW",
            Opcode::ReadModifyWriteLower => "RMW_LOWER",
            Opcode::StallingWrite => "STALLING_WRITE",
            Opcode::Poll => "POLL",
            Opcode::Wait => "WAIT",
            Opcode::TrainingCheck => "TRAINING_CHECK",
            Opcode::Start => "START",
            Opcode::End => "END",
        }
    }
}

/// Pack an opcode and a 24-bit field into an instruction word
#[inline]
pub fn pack(opcode: Opcode, field: u32) -> u32 {
    debug_assert!(field <= FIELD_MASK, "field {field:#x} does not fit in 24 bits");
    ((opcode as u32) << OPCODE_SHIFT) | (field & FIELD_MASK)
}

/// Opcode byte of an instruction word (not validated)
#[inline]
pub fn opcode_byte(word: u32) -> u8 {
    (word >> OPCODE_SHIFT) as u8
}

/// Low 24-bit field of an instruction word
#[inline]
pub fn field(word: u32) -> u32 {
    word & FIELD_MASK
}

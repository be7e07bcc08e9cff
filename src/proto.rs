//! Protobuf messages exchanged with host-side tooling
//!
//! Field numbers are part of the host contract; never renumber.

/// A finished program as handed to host tools
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProgramImage {
    /// Bytecode format version
    #[prost(uint32, tag = "1")]
    pub version: u32,

    /// Every program word, header and CRC included
    #[prost(uint32, repeated, tag = "2")]
    pub words: Vec<u32>,

    /// Copy of the CRC word, checked against `words[1]` on decode
    #[prost(uint32, tag = "3")]
    pub crc: u32,
}

/// Contents of the diagnostic bank after a satellite-core halt
#[derive(Clone, PartialEq, prost::Message)]
pub struct PostMortem {
    #[prost(uint32, tag = "1")]
    pub error_code: u32,

    /// First word of the faulting instruction
    #[prost(uint32, tag = "2")]
    pub word: u32,

    /// Word index of the faulting instruction
    #[prost(uint32, tag = "3")]
    pub index: u32,

    #[prost(uint32, tag = "4")]
    pub operand_a: u32,

    #[prost(uint32, tag = "5")]
    pub operand_b: u32,

    /// Human readable rendering of the error
    #[prost(string, tag = "6")]
    pub message: String,

    /// Time from program start to halt, when known
    #[prost(message, optional, tag = "7")]
    pub halted_after: Option<prost_types::Duration>,
}

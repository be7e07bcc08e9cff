//! Post-mortem record of a satellite-core halt
//!
//! On a fatal error the executor fills a small scratch bank with the faulting
//! word, its index and the two values in play, then the error code. Host tools
//! read the same record back as a `PostMortem` protobuf message.

use std::time::Duration;

use crate::error::{code_name, Fault};
use crate::platform::Platform;
use crate::proto;
use crate::regs::{DIAG_ERROR, DIAG_INDEX, DIAG_OPERAND_A, DIAG_OPERAND_B, DIAG_WORD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub word: u32,
    pub index: u32,
    pub operand_a: u32,
    pub operand_b: u32,
    pub code: u16,
    pub message: String,
    /// Time from program start to the halt
    pub elapsed: Option<Duration>,
}

impl Diagnostics {
    pub fn from_fault(fault: &Fault, elapsed: Option<Duration>) -> Self {
        let (operand_a, operand_b) = fault.error.operands();
        Diagnostics {
            word: fault.word,
            index: fault.index,
            operand_a,
            operand_b,
            code: fault.code(),
            message: fault.to_string(),
            elapsed,
        }
    }

    pub fn code_name(&self) -> &'static str {
        code_name(self.code)
    }

    /// Fill the platform's scratch bank; the error code goes last
    pub fn write_to<P: Platform>(&self, platform: &mut P) {
        platform.write_scratch(DIAG_WORD, self.word);
        platform.write_scratch(DIAG_INDEX, self.index);
        platform.write_scratch(DIAG_OPERAND_A, self.operand_a);
        platform.write_scratch(DIAG_OPERAND_B, self.operand_b);
        platform.write_scratch(DIAG_ERROR, self.code as u32);
    }

    /// Serialize to protobuf bytes
    pub fn to_proto_bytes(&self) -> Vec<u8> {
        use prost::Message;

        self.to_proto().encode_to_vec()
    }

    /// Deserialize from protobuf bytes
    pub fn from_proto_bytes(bytes: &[u8]) -> Result<Self, String> {
        use prost::Message;

        let message = proto::PostMortem::decode(bytes)
            .map_err(|e| format!("Failed to decode protobuf: {}", e))?;

        Self::from_proto(message)
    }

    pub fn to_proto(&self) -> proto::PostMortem {
        proto::PostMortem {
            error_code: self.code as u32,
            word: self.word,
            index: self.index,
            operand_a: self.operand_a,
            operand_b: self.operand_b,
            message: self.message.clone(),
            halted_after: self.elapsed.map(|elapsed| prost_types::Duration {
                seconds: elapsed.as_secs() as i64,
                nanos: elapsed.subsec_nanos() as i32,
            }),
        }
    }

    pub fn from_proto(message: proto::PostMortem) -> Result<Self, String> {
        let code = u16::try_from(message.error_code)
            .map_err(|_| format!("Error code {} out of range", message.error_code))?;
        let elapsed = match message.halted_after {
            Some(d) => {
                if d.seconds < 0 || d.nanos < 0 {
                    return Err(format!("Negative halt time {}s {}ns", d.seconds, d.nanos));
                }
                Some(Duration::new(d.seconds as u64, d.nanos as u32))
            }
            None => None,
        };
        Ok(Diagnostics {
            word: message.word,
            index: message.index,
            operand_a: message.operand_a,
            operand_b: message.operand_b,
            code,
            message: message.message,
            elapsed,
        })
    }
}

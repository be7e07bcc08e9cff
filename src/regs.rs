//! Register contract shared by the main core, the satellite core and the PHY
//!
//! Handshake bit layout, training status fields, the PHY windows that need a
//! completed write before a dependent access, and the diagnostic scratch bank.

// ── Handshake control (requester → executor) ────────────────────────────────

/// Start request
pub const CONTROL_START: u32 = 1 << 0;
/// Cancel/unload request occupies bits 16..31
pub const CONTROL_CANCEL_SHIFT: u32 = 16;
pub const CONTROL_CANCEL_MASK: u32 = 0xFFFF_0000;

// ── Handshake status (executor → requester, mirrored) ───────────────────────

pub const STATUS_DONE: u32 = 1 << 0;
pub const STATUS_RUNNING: u32 = 1 << 1;
/// Error code occupies bits 16..31
pub const STATUS_ERROR_SHIFT: u32 = 16;
pub const STATUS_ERROR_MASK: u32 = 0xFFFF_0000;

// ── Training status ─────────────────────────────────────────────────────────
//
// Two sub-partitions, a 2-bit state each.

pub const TRAINING_SUBP0_SHIFT: u32 = 0;
pub const TRAINING_SUBP1_SHIFT: u32 = 2;
pub const TRAINING_STATE_MASK: u32 = 0x3;

pub const TRAINING_STATE_IDLE: u32 = 0;
pub const TRAINING_STATE_RUNNING: u32 = 1;
pub const TRAINING_STATE_FINISHED: u32 = 2;
pub const TRAINING_STATE_ERROR: u32 = 3;

/// Per sub-partition training states packed in a status value
#[inline]
pub fn training_states(status: u32) -> [u32; 2] {
    [
        (status >> TRAINING_SUBP0_SHIFT) & TRAINING_STATE_MASK,
        (status >> TRAINING_SUBP1_SHIFT) & TRAINING_STATE_MASK,
    ]
}

// ── PHY hazard windows ──────────────────────────────────────────────────────

/// Half-open address ranges of second-order PHY registers
pub const PHY_HAZARD_WINDOWS: [(u32, u32); 3] = [
    // FBIO broadcast pad config
    (0x0090_0000, 0x0090_0400),
    // DDLL calibration
    (0x0090_0800, 0x0090_0C00),
    // per-byte VREF/DQ trim
    (0x009A_0000, 0x009A_1000),
];

// ── Legacy stop signal ──────────────────────────────────────────────────────

/// Legacy FB stop request register.
///
/// A `Poll` on this address runs without a timeout (cancel still applies).
/// Older sequences park the satellite core here while the host finishes a
/// frame-buffer request of unbounded length; whether the exception is still
/// needed is unresolved, so it stays narrow and explicit.
pub const LEGACY_FB_STOP_ADDR: u32 = 0x0010_0A2C;

// ── Diagnostic scratch bank ─────────────────────────────────────────────────

pub const DIAG_WORD: usize = 0;
pub const DIAG_INDEX: usize = 1;
pub const DIAG_OPERAND_A: usize = 2;
pub const DIAG_OPERAND_B: usize = 3;
pub const DIAG_ERROR: usize = 4;
pub const DIAG_SCRATCH_COUNT: usize = 5;

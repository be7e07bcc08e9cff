//! Shared handshake registers and program slot
//!
//! The mailbox is the whole protocol surface between the main core and the
//! satellite core: a control word written by the requester, a status word
//! (plus a mirrored copy) written by the executor, and the program buffer.
//! Each register access is a single whole-word read or write; both sides run
//! on one cooperative thread, so plain `Cell`s stand in for the hardware.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;

use crate::config::PROGRAM_CAPACITY_WORDS;
use crate::error::HandshakeError;
use crate::regs::{
    CONTROL_CANCEL_MASK, CONTROL_CANCEL_SHIFT, CONTROL_START, STATUS_DONE, STATUS_ERROR_MASK,
    STATUS_ERROR_SHIFT, STATUS_RUNNING,
};

/// Requester → executor control register
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlWord(pub u32);

impl ControlWord {
    pub fn start(self) -> bool {
        self.0 & CONTROL_START != 0
    }

    /// Cancel/unload request, if any bit of it is set
    pub fn cancel(self) -> Option<u16> {
        let request = ((self.0 & CONTROL_CANCEL_MASK) >> CONTROL_CANCEL_SHIFT) as u16;
        (request != 0).then_some(request)
    }

    pub fn with_start(self, start: bool) -> Self {
        if start {
            ControlWord(self.0 | CONTROL_START)
        } else {
            ControlWord(self.0 & !CONTROL_START)
        }
    }

    pub fn with_cancel(self, request: u16) -> Self {
        ControlWord((self.0 & !CONTROL_CANCEL_MASK) | ((request as u32) << CONTROL_CANCEL_SHIFT))
    }
}

impl fmt::Debug for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlWord")
            .field("start", &self.start())
            .field("cancel", &self.cancel())
            .finish()
    }
}

/// Executor → requester status register
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusWord(pub u32);

impl StatusWord {
    pub const IDLE: StatusWord = StatusWord(0);
    pub const RUNNING: StatusWord = StatusWord(STATUS_RUNNING);
    pub const DONE: StatusWord = StatusWord(STATUS_DONE);

    /// Done with an error code in bits 16..31
    pub fn failed(code: u16) -> Self {
        StatusWord(STATUS_DONE | ((code as u32) << STATUS_ERROR_SHIFT))
    }

    pub fn done(self) -> bool {
        self.0 & STATUS_DONE != 0
    }

    pub fn running(self) -> bool {
        self.0 & STATUS_RUNNING != 0
    }

    pub fn error_code(self) -> Option<u16> {
        let code = ((self.0 & STATUS_ERROR_MASK) >> STATUS_ERROR_SHIFT) as u16;
        (code != 0).then_some(code)
    }

    pub fn is_idle(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusWord")
            .field("done", &self.done())
            .field("running", &self.running())
            .field("error", &self.error_code().map(crate::error::code_name))
            .finish()
    }
}

/// Control/status registers and the program buffer, shared by both cores
pub struct Mailbox {
    control: Cell<u32>,
    status: Cell<u32>,
    mirror: Cell<u32>,
    program: RefCell<Box<[u32]>>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("control", &self.control())
            .field("status", &self.status())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::with_capacity(PROGRAM_CAPACITY_WORDS)
    }

    pub fn with_capacity(words: usize) -> Self {
        Mailbox {
            control: Cell::new(0),
            status: Cell::new(0),
            mirror: Cell::new(0),
            program: RefCell::new(vec![0; words].into_boxed_slice()),
        }
    }

    /// Size of the program slot in words
    pub fn capacity(&self) -> usize {
        self.program.borrow().len()
    }

    pub fn control(&self) -> ControlWord {
        ControlWord(self.control.get())
    }

    pub fn write_control(&self, control: ControlWord) {
        self.control.set(control.0);
    }

    /// Executor-owned status register
    pub fn status(&self) -> StatusWord {
        StatusWord(self.status.get())
    }

    /// Requester-visible copy of the status register
    pub fn mirror(&self) -> StatusWord {
        StatusWord(self.mirror.get())
    }

    /// Write the status register, then its mirror
    pub fn publish_status(&self, status: StatusWord) {
        self.status.set(status.0);
        self.mirror.set(status.0);
    }

    /// Cancel request currently posted by the requester
    pub fn cancel_request(&self) -> Option<u16> {
        self.control().cancel()
    }

    /// Copy a program into the slot, zeroing the remainder
    pub fn load_program(&self, words: &[u32]) -> Result<(), HandshakeError> {
        let mut slot = self.program.borrow_mut();
        if words.len() > slot.len() {
            return Err(HandshakeError::ProgramTooLarge {
                length: words.len(),
                capacity: slot.len(),
            });
        }
        slot[..words.len()].copy_from_slice(words);
        slot[words.len()..].fill(0);
        Ok(())
    }

    /// Read access to the program slot
    pub fn program(&self) -> Ref<'_, [u32]> {
        Ref::map(self.program.borrow(), |slot| &**slot)
    }

    /// Direct write into the program slot (fault injection, tooling)
    pub fn poke_program(&self, index: usize, value: u32) -> bool {
        match self.program.borrow_mut().get_mut(index) {
            Some(word) => {
                *word = value;
                true
            }
            None => false,
        }
    }
}

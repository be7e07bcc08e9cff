//! Main-core side of the handshake

use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::HandshakeError;
use crate::mailbox::{ControlWord, Mailbox, StatusWord};
use crate::program::Program;

/// What the requester can tell about its last submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Nothing submitted, or the last result was acknowledged
    Idle,
    /// Start raised, executor has not picked it up yet
    Pending,
    Running,
    Completed,
    /// Finished with the given status-register error code
    Failed(u16),
}

impl RequestState {
    /// Completed or failed, waiting for `acknowledge`
    pub fn is_finished(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed(_))
    }
}

/// Hands programs to the satellite core and observes their result
#[derive(Debug, Clone)]
pub struct Requester {
    mailbox: Rc<Mailbox>,
}

impl Requester {
    pub fn new(mailbox: Rc<Mailbox>) -> Self {
        Requester { mailbox }
    }

    pub fn mailbox(&self) -> &Rc<Mailbox> {
        &self.mailbox
    }

    pub fn submit(&self, program: &Program) -> Result<(), HandshakeError> {
        self.submit_words(program.words())
    }

    /// Load raw words into the program slot and raise start
    ///
    /// The words are not validated here; the executor does that and reports
    /// through the status register.
    pub fn submit_words(&self, words: &[u32]) -> Result<(), HandshakeError> {
        let status = self.mailbox.mirror();
        let control = self.mailbox.control();
        if !status.is_idle() || control.start() {
            return Err(HandshakeError::Busy {
                status: status.0,
                control: control.0,
            });
        }

        self.mailbox.load_program(words)?;
        self.mailbox.write_control(control.with_start(true));
        debug!(words = words.len(), "program submitted");
        Ok(())
    }

    /// Decode the requester-visible status copy
    pub fn poll(&self) -> RequestState {
        let status = self.mailbox.mirror();
        if status.done() {
            return match status.error_code() {
                Some(code) => RequestState::Failed(code),
                None => RequestState::Completed,
            };
        }
        if status.running() {
            return RequestState::Running;
        }
        if self.mailbox.control().start() {
            RequestState::Pending
        } else {
            RequestState::Idle
        }
    }

    /// Consume a finished result so the executor can take the next program
    pub fn acknowledge(&self) {
        let control = self.mailbox.control().with_start(false);
        self.mailbox.write_control(control);
        self.mailbox.publish_status(StatusWord::IDLE);
    }

    /// Ask the executor to stop; a nonzero request is required
    pub fn cancel(&self, request: u16) {
        if request == 0 {
            warn!("cancel request 0 is indistinguishable from no request, ignored");
            return;
        }
        let control = self.mailbox.control().with_cancel(request);
        self.mailbox.write_control(control);
        debug!(request, "cancel requested");
    }

    /// Withdraw a cancel request
    pub fn clear_cancel(&self) {
        let control = self.mailbox.control().with_cancel(0);
        self.mailbox.write_control(control);
    }

    /// Raw control word, mostly for diagnostics
    pub fn control(&self) -> ControlWord {
        self.mailbox.control()
    }
}

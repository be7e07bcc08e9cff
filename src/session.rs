//! Both handshake parties on one thread
//!
//! A `Session` owns a requester and a satellite core sharing one mailbox and
//! alternates between them: the satellite takes a step, then the requester
//! looks at the status mirror. A running program yields after every slice, so
//! the step budget plays the part of the requester's watchdog even while a
//! poll spins, and a cancel posted between steps reaches the executor. A core
//! that has halted simply never answers again.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::SequencerConfig;
use crate::diagnostics::Diagnostics;
use crate::error::HandshakeError;
use crate::executor::RunSummary;
use crate::mailbox::Mailbox;
use crate::platform::Platform;
use crate::program::Program;
use crate::requester::{RequestState, Requester};
use crate::satellite::SatelliteCore;
use crate::topology::{PartitionInfo, PartitionTable};

/// Default number of satellite steps before a request is declared lost
pub const DEFAULT_STEP_BUDGET: usize = 64;

/// How a submitted program ended, from the requester's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(RunSummary),
    Failed {
        code: u16,
        /// Scratch-bank record, when the halted core could be inspected
        diagnostics: Option<Diagnostics>,
    },
    /// No result within the step budget
    Unresponsive { last_seen: RequestState },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn error_code(&self) -> Option<u16> {
        match self {
            Outcome::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub struct Session<P: Platform> {
    requester: Requester,
    satellite: SatelliteCore<P>,
}

impl<P: Platform> Session<P> {
    pub fn new(platform: P, partition: PartitionInfo, config: SequencerConfig) -> Self {
        Self::with_mailbox(Rc::new(Mailbox::new()), platform, partition, config)
    }

    pub fn with_mailbox(
        mailbox: Rc<Mailbox>,
        platform: P,
        partition: PartitionInfo,
        config: SequencerConfig,
    ) -> Self {
        Session {
            requester: Requester::new(mailbox.clone()),
            satellite: SatelliteCore::new(platform, mailbox, partition, config),
        }
    }

    /// Session for the partition the loader installed at `partition_index`
    pub fn from_table(
        platform: P,
        table: &PartitionTable,
        partition_index: u8,
        config: SequencerConfig,
    ) -> Result<Self, HandshakeError> {
        let mailbox = Rc::new(Mailbox::new());
        let satellite =
            SatelliteCore::from_table(platform, mailbox.clone(), table, partition_index, config)?;
        Ok(Session {
            requester: Requester::new(mailbox),
            satellite,
        })
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn satellite(&self) -> &SatelliteCore<P> {
        &self.satellite
    }

    pub fn satellite_mut(&mut self) -> &mut SatelliteCore<P> {
        &mut self.satellite
    }

    pub fn platform(&self) -> &P {
        self.satellite.platform()
    }

    pub fn platform_mut(&mut self) -> &mut P {
        self.satellite.platform_mut()
    }

    pub fn mailbox(&self) -> &Rc<Mailbox> {
        self.requester.mailbox()
    }

    pub fn execute(&mut self, program: &Program, max_steps: usize) -> Result<Outcome, HandshakeError> {
        self.execute_words(program.words(), max_steps)
    }

    /// Submit raw words and drive both sides until a result or the budget
    ///
    /// Results are acknowledged before returning, so the session is ready
    /// for the next submission unless the satellite halted.
    pub fn execute_words(&mut self, words: &[u32], max_steps: usize) -> Result<Outcome, HandshakeError> {
        self.requester.submit_words(words)?;
        Ok(self.drive(max_steps))
    }

    /// Keep stepping the outstanding request for up to `max_steps`
    ///
    /// After `Unresponsive` the request is still in flight; calling `drive`
    /// again keeps waiting on it.
    pub fn drive(&mut self, max_steps: usize) -> Outcome {
        let mut last_seen = self.requester.poll();
        for steps in 1..=max_steps {
            self.satellite.step();
            last_seen = self.requester.poll();
            match last_seen {
                RequestState::Completed => {
                    self.requester.acknowledge();
                    // Let the satellite observe the acknowledgement
                    self.satellite.step();
                    debug!(steps, "request completed");
                    let summary = self.satellite.last_summary().unwrap_or_default();
                    return Outcome::Completed(summary);
                }
                RequestState::Failed(code) => {
                    self.requester.acknowledge();
                    debug!(steps, code, "request failed");
                    return Outcome::Failed {
                        code,
                        diagnostics: self.satellite.diagnostics().cloned(),
                    };
                }
                RequestState::Idle | RequestState::Pending | RequestState::Running => {}
            }
        }

        warn!(max_steps, state = ?last_seen, "satellite unresponsive");
        Outcome::Unresponsive { last_seen }
    }

    /// Post a cancel for the outstanding request and wait for the executor
    pub fn cancel(&mut self, request: u16, max_steps: usize) -> Outcome {
        self.requester.cancel(request);
        self.drive(max_steps)
    }
}

//! Executor side of the handshake
//!
//! `SatelliteCore` walks the state machine
//! `Idle -> AwaitStart -> Validating -> Running -> Done | Halted` one
//! transition per `step`. A running program gets one slice of platform time
//! per `step` and keeps its place in between, so the requester can watch the
//! status or post a cancel while a poll spins. Errors from validation and
//! execution come back to `step` as a `Fault`, and `step` performs the halt:
//! diagnostics to the scratch bank, the error code to the status register,
//! then no further register activity until the core is rebuilt.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::SequencerConfig;
use crate::crc::Crc32;
use crate::diagnostics::Diagnostics;
use crate::error::{Fault, HandshakeError, SequencerError};
use crate::executor::{Cursor, Interpreter, RunSummary};
use crate::mailbox::{Mailbox, StatusWord};
use crate::platform::Platform;
use crate::program::{self, HEADER_INDEX};
use crate::topology::{PartitionInfo, PartitionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Freshly booted, status not yet published
    Idle,
    AwaitStart,
    Validating,
    Running,
    /// Result published, waiting for the requester to acknowledge
    Done,
    /// Terminal; the core must be re-initialized
    Halted,
}

/// Program copied out of the slot and where it stopped
struct ActiveRun {
    words: Vec<u32>,
    cursor: Cursor,
}

pub struct SatelliteCore<P: Platform> {
    platform: P,
    mailbox: Rc<Mailbox>,
    partition: PartitionInfo,
    config: SequencerConfig,
    crc: Crc32,
    state: ExecutorState,
    length: usize,
    active: Option<ActiveRun>,
    /// `control.start` has read low since the last result was published
    start_released: bool,
    completed: u32,
    last_summary: Option<RunSummary>,
    diagnostics: Option<Diagnostics>,
}

impl<P: Platform> SatelliteCore<P> {
    pub fn new(
        platform: P,
        mailbox: Rc<Mailbox>,
        partition: PartitionInfo,
        config: SequencerConfig,
    ) -> Self {
        SatelliteCore {
            platform,
            mailbox,
            partition,
            config,
            crc: Crc32::new(),
            state: ExecutorState::Idle,
            length: 0,
            active: None,
            start_released: false,
            completed: 0,
            last_summary: None,
            diagnostics: None,
        }
    }

    /// Build the core serving `partition_index`, as installed by the loader
    pub fn from_table(
        platform: P,
        mailbox: Rc<Mailbox>,
        table: &PartitionTable,
        partition_index: u8,
        config: SequencerConfig,
    ) -> Result<Self, HandshakeError> {
        let partition = table
            .get(partition_index)
            .ok_or(HandshakeError::UnknownPartition { index: partition_index })?;
        Ok(Self::new(platform, mailbox, partition, config))
    }

    pub fn partition(&self) -> PartitionInfo {
        self.partition
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == ExecutorState::Halted
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn into_platform(self) -> P {
        self.platform
    }

    pub fn mailbox(&self) -> &Rc<Mailbox> {
        &self.mailbox
    }

    /// Programs run to `End` since boot
    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary
    }

    /// Record written at the halt, if the core has halted
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_ref()
    }

    /// Advance by at most one state transition
    ///
    /// A `Running` step executes at most one slice (`slice_ns` of platform
    /// time or `slice_reads` spin reads) and may stay in `Running`.
    pub fn step(&mut self) -> ExecutorState {
        if self.state == ExecutorState::Halted {
            return self.state;
        }
        match self.advance() {
            Ok(next) => {
                if next != self.state {
                    debug!(from = ?self.state, to = ?next, "executor transition");
                }
                self.state = next;
            }
            Err((fault, elapsed)) => self.halt(fault, elapsed),
        }
        self.state
    }

    fn advance(&mut self) -> Result<ExecutorState, (Fault, Option<Duration>)> {
        match self.state {
            ExecutorState::Idle => {
                self.mailbox.publish_status(StatusWord::IDLE);
                info!(partition = self.partition.partition_index, "satellite ready");
                Ok(ExecutorState::AwaitStart)
            }

            ExecutorState::AwaitStart => {
                let control = self.mailbox.control();
                if let Some(request) = control.cancel() {
                    let error = SequencerError::RequesterAbort { request };
                    return Err((Fault::new(error, 0, 0), None));
                }
                if control.start() {
                    Ok(ExecutorState::Validating)
                } else {
                    Ok(ExecutorState::AwaitStart)
                }
            }

            ExecutorState::Validating => {
                let words = self.mailbox.program();
                let capacity = self.mailbox.capacity();
                match program::validate(&words, capacity, &mut self.crc) {
                    Ok(length) => {
                        debug!(length, crc = words[program::CRC_INDEX], "program valid");
                        self.length = length;
                        Ok(ExecutorState::Running)
                    }
                    Err(e) => {
                        let header = words.get(HEADER_INDEX).copied().unwrap_or(0);
                        Err((Fault::new(e, HEADER_INDEX as u32, header), None))
                    }
                }
            }

            ExecutorState::Running => {
                let run = self.active.get_or_insert_with(|| {
                    self.mailbox.publish_status(StatusWord::RUNNING);
                    let words = self.mailbox.program()[..self.length].to_vec();
                    let cursor = Interpreter::new(
                        &mut self.platform,
                        &self.mailbox,
                        self.partition,
                        &self.config,
                    )
                    .begin(self.length);
                    ActiveRun { words, cursor }
                });

                let result = Interpreter::new(
                    &mut self.platform,
                    &self.mailbox,
                    self.partition,
                    &self.config,
                )
                .resume(&run.words, self.length, &mut run.cursor);
                let started = run.cursor.started_ns();

                match result {
                    Ok(None) => Ok(ExecutorState::Running),
                    Ok(Some(summary)) => {
                        self.active = None;
                        self.mailbox.publish_status(StatusWord::DONE);
                        self.last_summary = Some(summary);
                        self.completed += 1;
                        self.start_released = false;
                        Ok(ExecutorState::Done)
                    }
                    Err(fault) => {
                        self.active = None;
                        let elapsed = self.platform.now_ns().saturating_sub(started);
                        Err((fault, Some(Duration::from_nanos(elapsed))))
                    }
                }
            }

            ExecutorState::Done => {
                if !self.mailbox.control().start() {
                    self.start_released = true;
                }
                if self.mailbox.status().done() || !self.start_released {
                    Ok(ExecutorState::Done)
                } else {
                    Ok(ExecutorState::AwaitStart)
                }
            }

            ExecutorState::Halted => Ok(ExecutorState::Halted),
        }
    }

    fn halt(&mut self, fault: Fault, elapsed: Option<Duration>) {
        let diagnostics = Diagnostics::from_fault(&fault, elapsed);
        diagnostics.write_to(&mut self.platform);
        self.mailbox.publish_status(StatusWord::failed(fault.code()));
        error!(
            code = fault.code(),
            index = fault.index,
            word = fault.word,
            state = ?self.state,
            "satellite halted: {}",
            fault.error
        );
        self.diagnostics = Some(diagnostics);
        self.state = ExecutorState::Halted;
    }
}

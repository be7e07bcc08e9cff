//! Simulated register bus
//!
//! `SimPlatform` backs the `Platform` trait with an in-memory register file,
//! a deterministic clock that only advances when the sequencer touches the
//! bus or waits, and a log of every write. Reads can be scripted per address
//! and observed through a hook, which is how tests stand in for hardware that
//! changes underneath a spinning core.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::platform::Platform;
use crate::regs::DIAG_SCRATCH_COUNT;

/// Default cost of one register read
pub const DEFAULT_READ_LATENCY_NS: u64 = 50;

/// Default extra cost of waiting for a write acknowledgement
pub const DEFAULT_ACK_LATENCY_NS: u64 = 20;

/// One write observed on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub addr: u32,
    pub value: u32,
    /// Issued as a blocking write
    pub blocking: bool,
    pub at_ns: u64,
}

type ReadHook = Box<dyn FnMut(u32, usize)>;

pub struct SimPlatform {
    regs: HashMap<u32, u32>,
    scripted: HashMap<u32, VecDeque<u32>>,
    writes: Vec<WriteRecord>,
    scratch: [u32; DIAG_SCRATCH_COUNT],
    clock_ns: u64,
    read_latency_ns: u64,
    ack_latency_ns: u64,
    reads: usize,
    read_hook: Option<ReadHook>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimPlatform")
            .field("clock_ns", &self.clock_ns)
            .field("reads", &self.reads)
            .field("writes", &self.writes.len())
            .finish()
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            regs: HashMap::new(),
            scripted: HashMap::new(),
            writes: Vec::new(),
            scratch: [0; DIAG_SCRATCH_COUNT],
            clock_ns: 0,
            read_latency_ns: DEFAULT_READ_LATENCY_NS,
            ack_latency_ns: DEFAULT_ACK_LATENCY_NS,
            reads: 0,
            read_hook: None,
        }
    }

    pub fn with_read_latency_ns(mut self, ns: u64) -> Self {
        self.read_latency_ns = ns;
        self
    }

    pub fn with_ack_latency_ns(mut self, ns: u64) -> Self {
        self.ack_latency_ns = ns;
        self
    }

    /// Set a register without logging a write
    pub fn preset(&mut self, addr: u32, value: u32) {
        self.regs.insert(addr, value);
    }

    /// Current register value without advancing the clock
    pub fn peek(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Queue values returned by successive reads of `addr`
    ///
    /// The last scripted value sticks once the queue drains.
    pub fn script_reads(&mut self, addr: u32, values: impl IntoIterator<Item = u32>) {
        self.scripted.entry(addr).or_default().extend(values);
    }

    /// Called after every read with the address and the running read count
    pub fn on_read(&mut self, hook: impl FnMut(u32, usize) + 'static) {
        self.read_hook = Some(Box::new(hook));
    }

    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.writes)
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn now(&self) -> u64 {
        self.clock_ns
    }

    /// Contents of the diagnostic scratch bank
    pub fn scratch(&self) -> [u32; DIAG_SCRATCH_COUNT] {
        self.scratch
    }
}

impl Platform for SimPlatform {
    fn read(&mut self, addr: u32) -> u32 {
        self.clock_ns += self.read_latency_ns;
        self.reads += 1;
        let value = match self.scripted.get_mut(&addr).and_then(VecDeque::pop_front) {
            Some(value) => {
                self.regs.insert(addr, value);
                value
            }
            None => self.peek(addr),
        };
        if let Some(hook) = self.read_hook.as_mut() {
            hook(addr, self.reads);
        }
        value
    }

    fn write(&mut self, addr: u32, value: u32) {
        self.regs.insert(addr, value);
        self.writes.push(WriteRecord {
            addr,
            value,
            blocking: false,
            at_ns: self.clock_ns,
        });
    }

    fn write_blocking(&mut self, addr: u32, value: u32) {
        self.regs.insert(addr, value);
        self.writes.push(WriteRecord {
            addr,
            value,
            blocking: true,
            at_ns: self.clock_ns,
        });
        self.clock_ns += self.ack_latency_ns;
    }

    fn now_ns(&mut self) -> u64 {
        self.clock_ns
    }

    fn delay_ns(&mut self, ns: u64) {
        self.clock_ns += ns;
    }

    fn write_scratch(&mut self, index: usize, value: u32) {
        if let Some(slot) = self.scratch.get_mut(index) {
            *slot = value;
        }
    }
}

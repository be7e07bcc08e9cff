//! Runtime timing parameters for the sequencer

/// Capacity of the shared program buffer, sized to the largest known program
pub const PROGRAM_CAPACITY_WORDS: usize = 4096;

/// Hardware tick granularity of `Wait`
pub const DEFAULT_TICK_NS: u32 = 32;

/// Budget for a single `Poll` before it fails
pub const DEFAULT_POLL_TIMEOUT_NS: u64 = 10_000_000;

/// Budget for a single `TrainingCheck` before it fails
pub const DEFAULT_TRAINING_TIMEOUT_NS: u64 = 10_000_000;

/// Platform time the satellite core runs before yielding to the requester
pub const DEFAULT_SLICE_NS: u64 = 1_000_000;

/// Spin reads per slice, for platforms whose reads take no time
pub const DEFAULT_SLICE_READS: u32 = 65_536;

/// Timing parameters shared by the encoder and the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    pub tick_ns: u32,
    pub poll_timeout_ns: u64,
    pub training_timeout_ns: u64,
    /// Length of one `SatelliteCore::step` while a program runs
    pub slice_ns: u64,
    pub slice_reads: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            tick_ns: DEFAULT_TICK_NS,
            poll_timeout_ns: DEFAULT_POLL_TIMEOUT_NS,
            training_timeout_ns: DEFAULT_TRAINING_TIMEOUT_NS,
            slice_ns: DEFAULT_SLICE_NS,
            slice_reads: DEFAULT_SLICE_READS,
        }
    }
}

impl SequencerConfig {
    pub fn with_tick_ns(mut self, tick_ns: u32) -> Self {
        self.tick_ns = tick_ns.max(1);
        self
    }

    pub fn with_poll_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.poll_timeout_ns = timeout_ns;
        self
    }

    pub fn with_training_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.training_timeout_ns = timeout_ns;
        self
    }

    pub fn with_slice_ns(mut self, slice_ns: u64) -> Self {
        self.slice_ns = slice_ns.max(1);
        self
    }

    pub fn with_slice_reads(mut self, slice_reads: u32) -> Self {
        self.slice_reads = slice_reads.max(1);
        self
    }

    /// Convert nanoseconds to `Wait` ticks, rounding up and saturating at 24 bits
    pub fn ticks_for_ns(&self, ns: u64) -> u32 {
        let tick = self.tick_ns.max(1) as u64;
        let ticks = ns.div_ceil(tick);
        ticks.min(crate::opcodes::MAX_WAIT_TICKS as u64) as u32
    }

    /// Duration of a `Wait` of `ticks`
    pub fn ns_for_ticks(&self, ticks: u32) -> u64 {
        ticks as u64 * self.tick_ns.max(1) as u64
    }
}

//! Register-operation semantics shared by direct mode and the interpreter

use tracing::{trace, warn};

use crate::config::SequencerConfig;
use crate::error::{Result, SequencerError};
use crate::mailbox::Mailbox;
use crate::platform::Platform;
use crate::regs::{
    training_states, LEGACY_FB_STOP_ADDR, TRAINING_STATE_ERROR, TRAINING_STATE_MASK,
    TRAINING_STATE_RUNNING, TRAINING_SUBP0_SHIFT, TRAINING_SUBP1_SHIFT,
};

/// Mask of both sub-partition state fields of a training status value
const TRAINING_FIELDS_MASK: u32 =
    (TRAINING_STATE_MASK << TRAINING_SUBP0_SHIFT) | (TRAINING_STATE_MASK << TRAINING_SUBP1_SHIFT);

/// A spin loop in progress; its timeout runs from `started_ns`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Spin {
    pub started_ns: u64,
    pub reads: u64,
}

/// Executes single register operations against a platform
///
/// `cancel` is the handshake mailbox when running on the satellite core; the
/// spin loops check it on every iteration. Direct mode has no requester to
/// cancel it and passes `None`.
pub(crate) struct RegisterOps<'a, P: Platform> {
    pub platform: &'a mut P,
    pub config: &'a SequencerConfig,
    pub cancel: Option<&'a Mailbox>,
}

impl<P: Platform> RegisterOps<'_, P> {
    pub fn store(&mut self, addr: u32, value: u32) {
        self.platform.write(addr, value);
    }

    pub fn stalling_write(&mut self, addr: u32, value: u32) {
        self.platform.write_blocking(addr, value);
    }

    /// `(value & mask) | (old & !mask)`, written back with a blocking write
    pub fn read_modify_write(&mut self, addr: u32, value: u32, mask: u32) -> u32 {
        let old = self.platform.read(addr);
        let new = (value & mask) | (old & !mask);
        self.platform.write_blocking(addr, new);
        new
    }

    pub fn wait_ticks(&mut self, ticks: u32) {
        self.platform.delay_ns(self.config.ns_for_ticks(ticks));
    }

    /// Spin until `read(addr) & mask == value & mask`
    ///
    /// The legacy stop register is polled without a timeout.
    pub fn poll(&mut self, addr: u32, value: u32, mask: u32) -> Result<u32> {
        let mut spin = self.begin_spin();
        loop {
            if let Some(current) = self.poll_once(&mut spin, addr, value, mask)? {
                return Ok(current);
            }
        }
    }

    /// Spin until no sub-partition reports training as running
    pub fn training_check(&mut self, addr: u32) -> Result<u32> {
        let mut spin = self.begin_spin();
        loop {
            if let Some(status) = self.training_check_once(&mut spin, addr)? {
                return Ok(status);
            }
        }
    }

    pub fn begin_spin(&mut self) -> Spin {
        Spin {
            started_ns: self.platform.now_ns(),
            reads: 0,
        }
    }

    /// One iteration of `poll`: `Some` once satisfied, `None` to keep spinning
    pub fn poll_once(&mut self, spin: &mut Spin, addr: u32, value: u32, mask: u32) -> Result<Option<u32>> {
        let current = self.platform.read(addr);
        spin.reads += 1;
        if current & mask == value & mask {
            trace!(addr, current, reads = spin.reads, "poll satisfied");
            return Ok(Some(current));
        }
        self.check_cancel()?;
        if addr != LEGACY_FB_STOP_ADDR
            && self.elapsed_since(spin.started_ns) >= self.config.poll_timeout_ns
        {
            return Err(SequencerError::PollTimeout {
                addr,
                value,
                mask,
                last: current,
            });
        }
        Ok(None)
    }

    /// One iteration of `training_check`
    pub fn training_check_once(&mut self, spin: &mut Spin, addr: u32) -> Result<Option<u32>> {
        let status = self.platform.read(addr);
        spin.reads += 1;
        let states = training_states(status);
        if !states.contains(&TRAINING_STATE_RUNNING) {
            if states.contains(&TRAINING_STATE_ERROR) {
                return Err(SequencerError::TrainingFailure { addr, status });
            }
            trace!(addr, status, "training settled");
            return Ok(Some(status));
        }
        self.check_cancel()?;
        if self.elapsed_since(spin.started_ns) >= self.config.training_timeout_ns {
            return Err(SequencerError::PollTimeout {
                addr,
                value: 0,
                mask: TRAINING_FIELDS_MASK,
                last: status,
            });
        }
        Ok(None)
    }

    fn elapsed_since(&mut self, start: u64) -> u64 {
        self.platform.now_ns().saturating_sub(start)
    }

    fn check_cancel(&self) -> Result<()> {
        if let Some(request) = self.cancel.and_then(Mailbox::cancel_request) {
            warn!(request, "cancel observed while spinning");
            return Err(SequencerError::RequesterAbort { request });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::ControlWord;
    use crate::regs::{TRAINING_STATE_FINISHED, TRAINING_STATE_IDLE};
    use crate::sim::SimPlatform;

    fn ops<'a>(
        platform: &'a mut SimPlatform,
        config: &'a SequencerConfig,
        cancel: Option<&'a Mailbox>,
    ) -> RegisterOps<'a, SimPlatform> {
        RegisterOps { platform, config, cancel }
    }

    #[test]
    fn test_rmw_merges_under_mask() {
        let mut sim = SimPlatform::new();
        sim.preset(0x40, 0x1234_560F);
        let config = SequencerConfig::default();
        let new = ops(&mut sim, &config, None).read_modify_write(0x40, 0xF0, 0xFF);
        assert_eq!(new, 0x1234_56F0);
        assert_eq!(sim.peek(0x40), 0x1234_56F0);
        assert!(sim.writes()[0].blocking);
    }

    #[test]
    fn test_poll_satisfied_immediately() {
        let mut sim = SimPlatform::new();
        sim.preset(0x80, 0x3);
        let config = SequencerConfig::default();
        assert_eq!(ops(&mut sim, &config, None).poll(0x80, 0x1, 0x1), Ok(0x3));
    }

    #[test]
    fn test_poll_times_out_within_budget() {
        let mut sim = SimPlatform::new().with_read_latency_ns(100);
        let config = SequencerConfig::default().with_poll_timeout_ns(5_000);
        let err = ops(&mut sim, &config, None).poll(0x80, 1, 1).unwrap_err();
        assert_eq!(
            err,
            SequencerError::PollTimeout { addr: 0x80, value: 1, mask: 1, last: 0 }
        );
        let elapsed = sim.now();
        assert!(elapsed >= 5_000, "gave up early at {elapsed}");
        assert!(elapsed <= 5_000 + 100, "overran budget: {elapsed}");
    }

    #[test]
    fn test_poll_observes_cancel() {
        let mut sim = SimPlatform::new();
        let mailbox = Mailbox::with_capacity(4);
        mailbox.write_control(ControlWord::default().with_cancel(0x00AB));
        let config = SequencerConfig::default();
        assert_eq!(
            ops(&mut sim, &config, Some(&mailbox)).poll(0x80, 1, 1),
            Err(SequencerError::RequesterAbort { request: 0x00AB })
        );
        assert_eq!(sim.read_count(), 1);
    }

    #[test]
    fn test_spin_timeout_counts_from_first_read() {
        let mut sim = SimPlatform::new().with_read_latency_ns(100);
        let config = SequencerConfig::default().with_poll_timeout_ns(1_000);
        let mut ops = ops(&mut sim, &config, None);
        let mut spin = ops.begin_spin();
        for _ in 0..5 {
            assert_eq!(ops.poll_once(&mut spin, 0x80, 1, 1), Ok(None));
        }
        // A pause between iterations still counts against the budget
        ops.platform.delay_ns(2_000);
        assert!(matches!(
            ops.poll_once(&mut spin, 0x80, 1, 1),
            Err(SequencerError::PollTimeout { .. })
        ));
        assert_eq!(spin.reads, 6);
    }

    #[test]
    fn test_training_check_waits_for_settle() {
        let mut sim = SimPlatform::new();
        let running = TRAINING_STATE_RUNNING | (TRAINING_STATE_RUNNING << TRAINING_SUBP1_SHIFT);
        let settled = TRAINING_STATE_FINISHED | (TRAINING_STATE_IDLE << TRAINING_SUBP1_SHIFT);
        sim.script_reads(0x300, [running, running, settled]);
        let config = SequencerConfig::default();
        assert_eq!(ops(&mut sim, &config, None).training_check(0x300), Ok(settled));
        assert_eq!(sim.read_count(), 3);
    }

    #[test]
    fn test_training_check_reports_error() {
        let mut sim = SimPlatform::new();
        let status = TRAINING_STATE_FINISHED | (TRAINING_STATE_ERROR << TRAINING_SUBP1_SHIFT);
        sim.preset(0x300, status);
        let config = SequencerConfig::default();
        assert_eq!(
            ops(&mut sim, &config, None).training_check(0x300),
            Err(SequencerError::TrainingFailure { addr: 0x300, status })
        );
    }

    #[test]
    fn test_training_check_times_out() {
        let mut sim = SimPlatform::new().with_read_latency_ns(1_000);
        sim.preset(0x300, TRAINING_STATE_RUNNING);
        let config = SequencerConfig::default().with_training_timeout_ns(10_000);
        assert!(matches!(
            ops(&mut sim, &config, None).training_check(0x300),
            Err(SequencerError::PollTimeout { addr: 0x300, .. })
        ));
    }

    #[test]
    fn test_wait_uses_tick_granularity() {
        let mut sim = SimPlatform::new();
        let config = SequencerConfig::default().with_tick_ns(32);
        ops(&mut sim, &config, None).wait_ticks(10);
        assert_eq!(sim.now(), 320);
    }
}

/// Hardware seam for the sequencer
///
/// This trait abstracts everything the sequencer touches on the core it runs
/// on, so the same register-operation code drives real hardware, the
/// simulator, and test mocks. Implementations handle:
/// - Register reads and posted writes on the memory-controller bus
/// - Writes that block until the bus acknowledges them
/// - The free-running timer used for timeouts
/// - Busy-wait delays
/// - The diagnostic scratch bank written before a halt
pub trait Platform {
    /// Read a 32-bit register
    fn read(&mut self, addr: u32) -> u32;

    /// Posted write; may still be in flight when this returns
    fn write(&mut self, addr: u32, value: u32);

    /// Write and block until the bus reports completion
    fn write_blocking(&mut self, addr: u32, value: u32);

    /// Free-running timer in nanoseconds
    fn now_ns(&mut self) -> u64;

    /// Busy-wait for at least `ns` nanoseconds
    fn delay_ns(&mut self, ns: u64);

    /// Write one slot of the diagnostic scratch bank
    ///
    /// Best effort; the default implementation drops the value.
    fn write_scratch(&mut self, _index: usize, _value: u32) {}
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn read(&mut self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&mut self, addr: u32, value: u32) {
        (**self).write(addr, value)
    }

    fn write_blocking(&mut self, addr: u32, value: u32) {
        (**self).write_blocking(addr, value)
    }

    fn now_ns(&mut self) -> u64 {
        (**self).now_ns()
    }

    fn delay_ns(&mut self, ns: u64) {
        (**self).delay_ns(ns)
    }

    fn write_scratch(&mut self, index: usize, value: u32) {
        (**self).write_scratch(index, value)
    }
}

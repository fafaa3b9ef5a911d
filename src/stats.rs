//! Outstanding-memory instrumentation.
//!
//! The engine reports every decision that changes the amount of memory owned
//! by callers through a [`StatsHook`]. The plain allocator uses `()`, which
//! compiles the calls away; [`Stats`] keeps the counters an external
//! benchmark reads.

/// Callback invoked whenever callers gain or lose ownership of bytes.
///
/// `bytes` is the capacity of the block involved, so every `on_release`
/// subtracts exactly what the matching `on_allocate` added.
pub trait StatsHook {
    fn on_allocate(&mut self, bytes: usize);
    fn on_release(&mut self, bytes: usize);
}

impl StatsHook for () {
    #[inline(always)]
    fn on_allocate(&mut self, _bytes: usize) {}

    #[inline(always)]
    fn on_release(&mut self, _bytes: usize) {}
}

/// Running counters of outstanding memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    current: usize,
    peak: usize,
    events: u64,
    /// Sum of `current` sampled after each allocation event.
    sampled: u128,
}

/// Read-only copy of [`Stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    /// Bytes currently owned by callers.
    pub current: usize,
    /// Highest value `current` ever reached.
    pub peak: usize,
    /// Number of allocation events.
    pub events: u64,
    /// Mean outstanding bytes over all allocation events.
    pub average: f64,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            current: 0,
            peak: 0,
            events: 0,
            sampled: 0,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let average = match self.events {
            0 => 0.0,
            events => self.sampled as f64 / events as f64,
        };

        StatsSnapshot {
            current: self.current,
            peak: self.peak,
            events: self.events,
            average,
        }
    }
}

impl StatsHook for Stats {
    fn on_allocate(&mut self, bytes: usize) {
        self.current += bytes;
        self.peak = self.peak.max(self.current);
        self.events += 1;
        self.sampled += self.current as u128;
    }

    fn on_release(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.current, "released more than was outstanding");
        self.current = self.current.saturating_sub(bytes);
    }
}

//! # Recurring Callback
//!
//! Software timer driving the evaluation cycle. The callback carries two
//! periods: the normal one and a longer one used while the firmware runs in
//! relaxed (low-power) timing.
//!
//! Missed deadlines are skipped, not queued: a poll that finds several whole
//! periods elapsed fires once and moves the deadline past `now`.
//!
//! ```text
//!   deadline        deadline+P       deadline+2P      deadline+3P
//!      │                │                │                │
//!      ▼                ▼                ▼                ▼
//!  ────┼────────────────┼────────────────┼──────●─────────┼────▶ t
//!                                              poll
//!                          fires once, 2 dropped, next = deadline+3P
//! ```

const NANOS_PER_MS: u64 = 1_000_000;

/// Firmware timing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    /// Normal sampling period
    #[default]
    Normal,
    /// Low-power period (`period * multiplier`)
    Relaxed,
}

/// Lifecycle state of the controller subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// `init` not called yet
    #[default]
    Uninitialized,
    /// Group installed, no callback yet
    Initialized,
    /// Callback armed
    Scheduled,
    /// Inside one evaluation cycle
    Evaluating,
}

/// Periodic callback with skip-missed semantics
#[derive(Debug, Clone)]
pub struct RecurringCallback {
    normal_ns: u64,
    low_power_ns: u64,
    deadline_ns: u64,
    fired: u32,
    dropped: u32,
}

impl RecurringCallback {
    /// Arm a callback whose first deadline is one period after `now_ns`
    pub fn new(normal_ms: u32, low_power_ms: u32, now_ns: u64, mode: TimingMode) -> Self {
        let mut cb = Self {
            normal_ns: 0,
            low_power_ns: 0,
            deadline_ns: 0,
            fired: 0,
            dropped: 0,
        };
        cb.set_periods(normal_ms, low_power_ms);
        cb.deadline_ns = now_ns.saturating_add(cb.period_ns(mode));
        cb
    }

    /// Replace both periods; the pending deadline is kept
    pub fn set_periods(&mut self, normal_ms: u32, low_power_ms: u32) {
        self.normal_ns = (normal_ms as u64 * NANOS_PER_MS).max(1);
        self.low_power_ns = (low_power_ms as u64 * NANOS_PER_MS).max(1);
    }

    /// Period selected by a timing mode, ns
    #[inline]
    pub fn period_ns(&self, mode: TimingMode) -> u64 {
        match mode {
            TimingMode::Normal => self.normal_ns,
            TimingMode::Relaxed => self.low_power_ns,
        }
    }

    /// Normal period, ms
    #[inline]
    pub fn normal_period_ms(&self) -> u32 {
        (self.normal_ns / NANOS_PER_MS) as u32
    }

    /// Low-power period, ms
    #[inline]
    pub fn low_power_period_ms(&self) -> u32 {
        (self.low_power_ns / NANOS_PER_MS) as u32
    }

    /// Next deadline, ns since boot
    #[inline]
    pub fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }

    /// Times the callback fired
    #[inline]
    pub fn fired(&self) -> u32 {
        self.fired
    }

    /// Deadlines dropped because they were missed
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Whether the callback is due at `now_ns`
    ///
    /// Advances the deadline when it fires.
    pub fn poll(&mut self, now_ns: u64, mode: TimingMode) -> bool {
        if now_ns < self.deadline_ns {
            return false;
        }

        let period = self.period_ns(mode);
        let missed = (now_ns - self.deadline_ns) / period;
        if missed > 0 {
            log::debug!("clvc: callback missed {} deadline(s)", missed);
        }
        self.dropped = self.dropped.saturating_add(missed as u32);
        self.fired = self.fired.wrapping_add(1);
        self.deadline_ns = self
            .deadline_ns
            .saturating_add(period.saturating_mul(missed + 1));
        true
    }
}

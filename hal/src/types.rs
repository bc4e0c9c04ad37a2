//! # PMU Core Types
//!
//! Identifiers and measurement records shared by every PMU subsystem.
//!
//! Identifiers are thin newtypes over the raw indices the host driver uses in
//! its descriptor tables, so a rail index can never be passed where a clock
//! device index is expected.

use core::fmt;

use static_assertions::const_assert;

// =============================================================================
// CLOCK DOMAINS
// =============================================================================

/// Number of clock domains known to the PMU
pub const CLOCK_DOMAIN_COUNT: usize = 8;

const_assert!(CLOCK_DOMAIN_COUNT <= 32);

/// Programmable clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ClockDomain {
    /// Graphics processing cluster clock
    Gpc = 0,
    /// Crossbar clock
    Xbar = 1,
    /// System clock
    Sys = 2,
    /// L2 / LTC clock
    Ltc = 3,
    /// Video decoder clock
    Nvd = 4,
    /// Host interface clock
    Host = 5,
    /// Memory clock
    Mclk = 6,
    /// Utility clock
    Util = 7,
}

impl ClockDomain {
    /// All domains in index order
    pub const ALL: [ClockDomain; CLOCK_DOMAIN_COUNT] = [
        Self::Gpc,
        Self::Xbar,
        Self::Sys,
        Self::Ltc,
        Self::Nvd,
        Self::Host,
        Self::Mclk,
        Self::Util,
    ];

    /// Look up a domain by its descriptor index
    pub const fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < CLOCK_DOMAIN_COUNT {
            Some(Self::ALL[index as usize])
        } else {
            None
        }
    }

    /// Descriptor index of this domain
    #[inline]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Single-bit mask naming this domain
    #[inline]
    pub const fn mask(self) -> ClockDomainMask {
        ClockDomainMask::from_bits_truncate(1 << self as u32)
    }
}

bitflags::bitflags! {
    /// Set of clock domains
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClockDomainMask: u32 {
        /// Graphics processing cluster clock
        const GPC  = 1 << 0;
        /// Crossbar clock
        const XBAR = 1 << 1;
        /// System clock
        const SYS  = 1 << 2;
        /// L2 / LTC clock
        const LTC  = 1 << 3;
        /// Video decoder clock
        const NVD  = 1 << 4;
        /// Host interface clock
        const HOST = 1 << 5;
        /// Memory clock
        const MCLK = 1 << 6;
        /// Utility clock
        const UTIL = 1 << 7;
    }
}

impl From<ClockDomain> for ClockDomainMask {
    fn from(domain: ClockDomain) -> Self {
        domain.mask()
    }
}

// =============================================================================
// INDICES
// =============================================================================

/// Voltage rail index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VoltRail(pub u8);

/// Index of a voltage-rail policy entry owned by the voltage-policy module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RailPolicyIndex(pub u8);

/// Clock generator (NAFLL) device index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ClockDevice(pub u8);

/// Thermal monitor index
///
/// [`MonitorIndex::INVALID`] marks a poisoning source as not configured.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MonitorIndex(pub u8);

impl MonitorIndex {
    /// Sentinel for "no monitor"
    pub const INVALID: MonitorIndex = MonitorIndex(0xFF);

    /// Whether this index names a real monitor
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for MonitorIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for MonitorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "MonitorIndex({})", self.0)
        } else {
            write!(f, "MonitorIndex(INVALID)")
        }
    }
}

/// Maximum number of partitions a clock domain may be split into
pub const MAX_PARTITIONS: usize = 8;

/// Counter partition inside a clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterSource {
    /// Broadcast counter covering the whole domain
    Broadcast,
    /// Counter of one partition
    Partition(u8),
}

// =============================================================================
// POWER GATING
// =============================================================================

/// Power-gating feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatingFeature {
    /// Memory-subsystem gating (stops clocks of the memory-side domains)
    MemorySubsystem,
    /// Graphics-engine gating
    Graphics,
    /// Display-idle gating
    DisplayIdle,
}

// =============================================================================
// MEASUREMENTS
// =============================================================================

/// One read of a free-running clock counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrequencySample {
    /// Timestamp of the read, nanoseconds since boot
    pub timestamp_ns: u64,
    /// Clock cycles counted since boot (wraps)
    pub count: u64,
}

impl FrequencySample {
    /// Create a sample
    #[inline]
    pub const fn new(timestamp_ns: u64, count: u64) -> Self {
        Self {
            timestamp_ns,
            count,
        }
    }
}

/// Monotonic engage/evaluation time pair read from a thermal monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngageCounters {
    /// Total time the monitored mechanism was engaged since boot, ns
    pub engaged_ns: u64,
    /// Total time the monitor evaluated since boot, ns
    pub eval_ns: u64,
}

impl EngageCounters {
    /// Create a counter pair
    #[inline]
    pub const fn new(engaged_ns: u64, eval_ns: u64) -> Self {
        Self { engaged_ns, eval_ns }
    }
}

/// Offset request handed to the perf change sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoltOffsetRequest {
    /// Rail policy receiving the offset
    pub rail_policy: RailPolicyIndex,
    /// Offset in microvolts
    pub offset_uv: i32,
}

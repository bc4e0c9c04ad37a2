//! # Collaborator Traits
//!
//! Each trait is one external module the PMU subsystems talk to. Firmware
//! images implement them over real registers and task queues; host tests
//! implement them with scripted values.
//!
//! ## Trait Map
//!
//! ```text
//! Platform
//!    ├── VoltagePolicy     rail voltage, noise-unaware floor, synchronous offset
//!    ├── ChangeSequencer   queued offset requests (async request/ack path)
//!    ├── ClockCounter      free-running per-domain / per-partition counters
//!    ├── ClockGenerator    NAFLL frequency offset register
//!    ├── PerfTarget        currently requested target frequency
//!    ├── ThermalMonitor    failsafe / BA / droopy engage-time counters
//!    ├── PowerGating       gating entry statistics, allow / disallow votes
//!    ├── Timebase          global nanosecond timestamp
//!    └── InterruptControl  critical sections
//! ```

use crate::error::Result;
use crate::types::*;

// =============================================================================
// VOLTAGE
// =============================================================================

/// Voltage-policy module
pub trait VoltagePolicy {
    /// Current voltage of a rail, microvolts
    fn voltage_uv(&self, rail: VoltRail) -> Result<u32>;

    /// Noise-unaware voltage floor of a rail, microvolts
    fn noise_unaware_floor_uv(&self, rail: VoltRail) -> Result<u32>;

    /// Program a voltage offset through a rail policy, synchronously
    fn set_offset_uv(&mut self, policy: RailPolicyIndex, offset_uv: i32) -> Result<()>;
}

/// Perf change sequencer
pub trait ChangeSequencer {
    /// Queue an offset request; completion is acknowledged asynchronously
    fn queue_offset(&mut self, request: VoltOffsetRequest) -> Result<()>;
}

// =============================================================================
// CLOCKS
// =============================================================================

/// Clock counter block
pub trait ClockCounter {
    /// Read the counter of a domain (or one of its partitions)
    fn sample(&self, domain: ClockDomain, source: CounterSource) -> Result<FrequencySample>;
}

/// Clock generator (NAFLL) device
pub trait ClockGenerator {
    /// Current frequency offset of a device, MHz
    fn frequency_offset_mhz(&self, device: ClockDevice) -> Result<i16>;

    /// Program the frequency offset of a device, MHz
    fn set_frequency_offset_mhz(&mut self, device: ClockDevice, offset_mhz: i16) -> Result<()>;
}

/// Perf module view of requested clocks
pub trait PerfTarget {
    /// Currently requested target frequency of a domain, kHz
    fn target_frequency_khz(&self, domain: ClockDomain) -> Result<u32>;
}

// =============================================================================
// MONITORS
// =============================================================================

/// Thermal-monitor module
pub trait ThermalMonitor {
    /// Engage/eval counters of a BA or droopy monitor
    fn counters(&self, index: MonitorIndex) -> Result<EngageCounters>;

    /// Total time the hardware failsafe slowdown has been engaged, ns
    fn failsafe_engaged_ns(&self) -> Result<u64>;
}

/// Power-gating module
pub trait PowerGating {
    /// Number of times a feature has entered gating since boot
    fn entry_count(&self, feature: GatingFeature) -> u32;

    /// Clock domains whose clocks stop while the feature is engaged
    fn gated_domains(&self, feature: GatingFeature) -> ClockDomainMask;

    /// Forbid the feature from engaging until [`PowerGating::allow`]
    fn disallow(&mut self, feature: GatingFeature) -> Result<()>;

    /// Release a previous [`PowerGating::disallow`]
    fn allow(&mut self, feature: GatingFeature) -> Result<()>;
}

// =============================================================================
// TIME AND INTERRUPTS
// =============================================================================

/// Global timebase
pub trait Timebase {
    /// Nanoseconds since boot
    fn now_ns(&self) -> u64;
}

/// Opaque interrupt state saved by [`InterruptControl::disable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(pub bool);

/// Interrupt / preemption control
pub trait InterruptControl {
    /// Disable interrupts and preemption, returning the previous state
    fn disable(&mut self) -> IrqState;

    /// Restore a state returned by [`InterruptControl::disable`]
    fn restore(&mut self, state: IrqState);
}

// =============================================================================
// PLATFORM
// =============================================================================

/// Every collaborator a PMU subsystem may need during one call
pub trait Platform:
    VoltagePolicy
    + ChangeSequencer
    + ClockCounter
    + ClockGenerator
    + PerfTarget
    + ThermalMonitor
    + PowerGating
    + Timebase
    + InterruptControl
{
}

impl<T> Platform for T where
    T: VoltagePolicy
        + ChangeSequencer
        + ClockCounter
        + ClockGenerator
        + PerfTarget
        + ThermalMonitor
        + PowerGating
        + Timebase
        + InterruptControl
{
}

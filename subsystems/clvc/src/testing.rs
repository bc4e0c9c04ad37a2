//! # Scripted Platform
//!
//! [`MockPlatform`] implements every collaborator trait over plain fields.
//! Tests set frequencies, voltages and counters, advance time, and then
//! inspect what the subsystem wrote back.
//!
//! Each clock domain runs at `actual_khz[domain]`; [`MockPlatform::advance_ms`]
//! accumulates the matching cycle counts so counted averages come out exact.

use core::cell::Cell;

use helix_pmu_hal::{
    ChangeSequencer, ClockCounter, ClockDevice, ClockDomain, ClockDomainMask, ClockGenerator,
    CounterSource, EngageCounters, FrequencySample, GatingFeature, HalError, InterruptControl,
    IrqState, MonitorIndex, PerfTarget, PowerGating, RailPolicyIndex, Result, ThermalMonitor,
    Timebase, VoltOffsetRequest, VoltRail, VoltagePolicy, CLOCK_DOMAIN_COUNT,
};

const NANOS_PER_MS: u64 = 1_000_000;

/// Number of rails, clock devices and monitors the mock models
pub const MOCK_SLOTS: usize = 4;

/// Scripted implementation of every collaborator
#[derive(Debug, Clone)]
pub struct MockPlatform {
    /// Nanoseconds since boot
    pub now_ns: u64,

    /// Requested frequency per domain, kHz
    pub target_khz: [u32; CLOCK_DOMAIN_COUNT],
    /// Achieved frequency per domain, kHz
    pub actual_khz: [u32; CLOCK_DOMAIN_COUNT],
    /// Accumulated cycles per domain
    pub cycles: [u64; CLOCK_DOMAIN_COUNT],
    /// Fail target lookups
    pub fail_target: bool,
    /// Fail counter reads
    pub fail_counter: bool,

    /// Rail voltage, µV
    pub voltage_uv: [u32; MOCK_SLOTS],
    /// Rail noise-unaware floor, µV
    pub floor_uv: [u32; MOCK_SLOTS],
    /// Synchronous offsets written
    pub offset_writes: u32,
    /// Last synchronous offset written
    pub last_offset: Option<(RailPolicyIndex, i32)>,
    /// Fail synchronous offset writes
    pub fail_offset: bool,
    /// Requests queued to the change sequencer
    pub queued: u32,
    /// Last queued request
    pub last_request: Option<VoltOffsetRequest>,

    /// Frequency offset per clock device, MHz
    pub clock_offsets_mhz: [i16; MOCK_SLOTS],
    /// Frequency offset writes
    pub cap_writes: u32,
    /// Cap writes made outside a critical section or while gating was allowed
    pub unguarded_cap_writes: u32,

    /// Total failsafe engagement, ns
    pub failsafe_engaged_ns: u64,
    /// Engage counters per thermal monitor
    pub monitors: [EngageCounters; MOCK_SLOTS],

    /// Gating entry count
    pub gating_entries: u32,
    /// Domains stopped by gating
    pub gated_domains: ClockDomainMask,
    /// Outstanding disallow votes
    pub gating_disallowed: u32,
    /// Disallow calls
    pub disallow_calls: u32,
    /// Allow calls
    pub allow_calls: u32,
    /// Gating state reads made outside a critical section
    pub unguarded_gating_reads: Cell<u32>,

    /// Interrupts enabled
    pub irq_enabled: bool,
    /// Critical-section depth
    pub cs_depth: u32,
    /// Deepest nesting seen
    pub cs_max_depth: u32,
    /// Critical sections entered
    pub cs_entries: u32,
}

impl MockPlatform {
    /// Platform at boot: every domain at 1 GHz on target, 1 V rails with an 800 mV floor
    pub fn new() -> Self {
        Self {
            now_ns: 1_000 * NANOS_PER_MS,
            target_khz: [1_000_000; CLOCK_DOMAIN_COUNT],
            actual_khz: [1_000_000; CLOCK_DOMAIN_COUNT],
            cycles: [0; CLOCK_DOMAIN_COUNT],
            fail_target: false,
            fail_counter: false,
            voltage_uv: [1_000_000; MOCK_SLOTS],
            floor_uv: [800_000; MOCK_SLOTS],
            offset_writes: 0,
            last_offset: None,
            fail_offset: false,
            queued: 0,
            last_request: None,
            clock_offsets_mhz: [0; MOCK_SLOTS],
            cap_writes: 0,
            unguarded_cap_writes: 0,
            failsafe_engaged_ns: 0,
            monitors: [EngageCounters::default(); MOCK_SLOTS],
            gating_entries: 0,
            gated_domains: ClockDomainMask::empty(),
            gating_disallowed: 0,
            disallow_calls: 0,
            allow_calls: 0,
            unguarded_gating_reads: Cell::new(0),
            irq_enabled: true,
            cs_depth: 0,
            cs_max_depth: 0,
            cs_entries: 0,
        }
    }

    /// Let time pass at the current frequencies
    pub fn advance_ms(&mut self, ms: u64) {
        let ns = ms * NANOS_PER_MS;
        for (cycles, khz) in self.cycles.iter_mut().zip(self.actual_khz.iter()) {
            *cycles = cycles.wrapping_add(*khz as u64 * ns / NANOS_PER_MS);
        }
        self.now_ns += ns;
    }

    /// Engage the failsafe for `ns` of the time already elapsed
    pub fn engage_failsafe(&mut self, ns: u64) {
        self.failsafe_engaged_ns += ns;
    }

    /// Record one gating entry
    pub fn enter_gating(&mut self) {
        self.gating_entries = self.gating_entries.wrapping_add(1);
    }

    fn note_gating_read(&self) {
        if self.cs_depth == 0 {
            self.unguarded_gating_reads.set(self.unguarded_gating_reads.get() + 1);
        }
    }

    fn slot(index: u8) -> Result<usize> {
        let index = index as usize;
        if index < MOCK_SLOTS {
            Ok(index)
        } else {
            Err(HalError::UnknownIndex)
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl VoltagePolicy for MockPlatform {
    fn voltage_uv(&self, rail: VoltRail) -> Result<u32> {
        Ok(self.voltage_uv[Self::slot(rail.0)?])
    }

    fn noise_unaware_floor_uv(&self, rail: VoltRail) -> Result<u32> {
        Ok(self.floor_uv[Self::slot(rail.0)?])
    }

    fn set_offset_uv(&mut self, policy: RailPolicyIndex, offset_uv: i32) -> Result<()> {
        if self.fail_offset {
            return Err(HalError::Rejected);
        }
        self.offset_writes += 1;
        self.last_offset = Some((policy, offset_uv));
        Ok(())
    }
}

impl ChangeSequencer for MockPlatform {
    fn queue_offset(&mut self, request: VoltOffsetRequest) -> Result<()> {
        if self.fail_offset {
            return Err(HalError::QueueFull);
        }
        self.queued += 1;
        self.last_request = Some(request);
        Ok(())
    }
}

impl ClockCounter for MockPlatform {
    fn sample(&self, domain: ClockDomain, _source: CounterSource) -> Result<FrequencySample> {
        if self.fail_counter {
            return Err(HalError::NotReady);
        }
        Ok(FrequencySample::new(
            self.now_ns,
            self.cycles[domain.index() as usize],
        ))
    }
}

impl ClockGenerator for MockPlatform {
    fn frequency_offset_mhz(&self, device: ClockDevice) -> Result<i16> {
        Ok(self.clock_offsets_mhz[Self::slot(device.0)?])
    }

    fn set_frequency_offset_mhz(&mut self, device: ClockDevice, offset_mhz: i16) -> Result<()> {
        let slot = Self::slot(device.0)?;
        if self.cs_depth == 0 || self.gating_disallowed == 0 {
            self.unguarded_cap_writes += 1;
        }
        self.clock_offsets_mhz[slot] = offset_mhz;
        self.cap_writes += 1;
        Ok(())
    }
}

impl PerfTarget for MockPlatform {
    fn target_frequency_khz(&self, domain: ClockDomain) -> Result<u32> {
        if self.fail_target {
            return Err(HalError::NotReady);
        }
        Ok(self.target_khz[domain.index() as usize])
    }
}

impl ThermalMonitor for MockPlatform {
    fn counters(&self, index: MonitorIndex) -> Result<EngageCounters> {
        Ok(self.monitors[Self::slot(index.0)?])
    }

    fn failsafe_engaged_ns(&self) -> Result<u64> {
        Ok(self.failsafe_engaged_ns)
    }
}

impl PowerGating for MockPlatform {
    fn entry_count(&self, _feature: GatingFeature) -> u32 {
        self.note_gating_read();
        self.gating_entries
    }

    fn gated_domains(&self, _feature: GatingFeature) -> ClockDomainMask {
        self.note_gating_read();
        self.gated_domains
    }

    fn disallow(&mut self, _feature: GatingFeature) -> Result<()> {
        self.disallow_calls += 1;
        self.gating_disallowed += 1;
        Ok(())
    }

    fn allow(&mut self, _feature: GatingFeature) -> Result<()> {
        self.allow_calls += 1;
        self.gating_disallowed = self.gating_disallowed.saturating_sub(1);
        Ok(())
    }
}

impl Timebase for MockPlatform {
    fn now_ns(&self) -> u64 {
        self.now_ns
    }
}

impl InterruptControl for MockPlatform {
    fn disable(&mut self) -> IrqState {
        let was = self.irq_enabled;
        self.irq_enabled = false;
        self.cs_depth += 1;
        self.cs_entries += 1;
        self.cs_max_depth = self.cs_max_depth.max(self.cs_depth);
        IrqState(was)
    }

    fn restore(&mut self, state: IrqState) {
        self.cs_depth = self.cs_depth.saturating_sub(1);
        self.irq_enabled = state.0;
    }
}

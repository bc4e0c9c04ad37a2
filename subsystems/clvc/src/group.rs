//! # Controller Group
//!
//! Owns every controller of one version and turns their outputs into one
//! rail-wide voltage offset per cycle.
//!
//! ## Cycle
//!
//! ```text
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │ 1. headroom  │──▶│ 2. freq caps │──▶│ 3. gating    │──▶│ 4. evaluate  │
//!  │ V - last vs  │   │ [CS + gating │   │    skew      │   │ enabled,     │
//!  │ floor, rails │   │  disallowed] │   │ [CS]         │   │ not skewed   │
//!  └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                  │
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐          │
//!  │ 7. apply and │◀──│ 6. + last,   │◀──│ 5. max of    │◀─────────┘
//!  │    cache     │   │ ≥ max neg    │   │    outputs   │
//!  └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Any controller failure aborts the cycle before step 7; the cached offset
//! stays in effect. Version 2.0 groups queue the offset to the change
//! sequencer and drop a request whose offset is exactly zero.

use heapless::Vec;
use helix_pmu_hal::{
    with_critical_section, ClockDomainMask, CriticalSection, GatingFeature, Platform,
    RailPolicyIndex, VoltOffsetRequest, VoltRail,
};
use static_assertions::const_assert;

use crate::caps::Capabilities;
use crate::controller::{ClientId, Controller, ControllerDescriptor, GroupVersion};
use crate::diag::{Diagnostics, FaultSite};
use crate::error::{Error, Result};

/// Controller table capacity
pub const MAX_CONTROLLERS: usize = 32;

/// Rails checked for headroom
pub const MAX_RAILS: usize = 4;

const_assert!(MAX_CONTROLLERS <= 32);
const_assert!(MAX_CONTROLLERS <= u8::MAX as usize);

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Settings that may change after init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSettings {
    /// Normal sampling period, ms
    pub sampling_period_ms: u32,
    /// Low-power period = normal period times this
    pub low_sampling_multiplier: u8,
    /// Keep integrator state across VF switches (1.0 only)
    pub continuous_mode: bool,
}

impl GroupSettings {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.sampling_period_ms == 0 || self.low_sampling_multiplier == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Low-power sampling period, ms
    #[inline]
    pub fn low_power_period_ms(&self) -> u32 {
        self.sampling_period_ms
            .saturating_mul(self.low_sampling_multiplier as u32)
    }
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            sampling_period_ms: 10,
            low_sampling_multiplier: 1,
            continuous_mode: false,
        }
    }
}

/// Host-supplied group table
#[derive(Debug, Clone)]
pub struct GroupDescriptor {
    /// Group version
    pub version: GroupVersion,
    /// Periods and modes
    pub settings: GroupSettings,
    /// Rail policy receiving the offset
    pub rail_policy: RailPolicyIndex,
    /// Rails checked for headroom
    pub rails: Vec<VoltRail, MAX_RAILS>,
    /// Gating feature that stops the controlled clocks
    pub gating_feature: GatingFeature,
    /// Requested capabilities, narrowed to the build
    pub capabilities: Capabilities,
    /// Controllers in index order
    pub controllers: Vec<ControllerDescriptor, MAX_CONTROLLERS>,
}

impl GroupDescriptor {
    /// Start an empty descriptor
    pub fn new(version: GroupVersion) -> Self {
        Self {
            version,
            settings: GroupSettings::default(),
            rail_policy: RailPolicyIndex(0),
            rails: Vec::new(),
            gating_feature: GatingFeature::MemorySubsystem,
            capabilities: Capabilities::BUILD,
            controllers: Vec::new(),
        }
    }

    /// Set sampling period
    pub fn sampling_period_ms(mut self, ms: u32) -> Self {
        self.settings.sampling_period_ms = ms;
        self
    }

    /// Set low-power multiplier
    pub fn low_sampling_multiplier(mut self, multiplier: u8) -> Self {
        self.settings.low_sampling_multiplier = multiplier;
        self
    }

    /// Set continuous mode
    pub fn continuous_mode(mut self, enabled: bool) -> Self {
        self.settings.continuous_mode = enabled;
        self
    }

    /// Set rail policy
    pub fn rail_policy(mut self, policy: RailPolicyIndex) -> Self {
        self.rail_policy = policy;
        self
    }

    /// Set gating feature
    pub fn gating_feature(mut self, feature: GatingFeature) -> Self {
        self.gating_feature = feature;
        self
    }

    /// Request capabilities
    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Add a headroom rail
    pub fn add_rail(&mut self, rail: VoltRail) -> Result<()> {
        self.rails.push(rail).map_err(|_| Error::InvalidArgument)
    }

    /// Append a controller
    pub fn add_controller(&mut self, desc: ControllerDescriptor) -> Result<()> {
        self.controllers.push(desc).map_err(|_| Error::InvalidArgument)
    }

    /// Check the whole table
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.rails.is_empty() {
            return Err(Error::InvalidArgument);
        }
        for (i, desc) in self.controllers.iter().enumerate() {
            if desc.controller_type.version() != self.version {
                return Err(Error::InvalidArgument);
            }
            if self.controllers[..i].iter().any(|d| d.id == desc.id) {
                return Err(Error::InvalidArgument);
            }
            desc.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// CYCLE BOOKKEEPING
// =============================================================================

/// Cycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounters {
    /// Cycles that reached the apply step
    pub completed: u32,
    /// Cycles aborted by a failure
    pub aborted: u32,
    /// Callback bodies skipped while the VF switch held a vote
    pub vf_skipped: u32,
    /// Controller evaluations skipped for gating skew
    pub gating_skipped: u32,
    /// Zero-offset requests not queued (2.0)
    pub dropped_zero: u32,
}

/// Rail position found by the headroom check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headroom {
    /// Some rail sits at or below its floor
    pub at_or_below_floor: bool,
    /// Most negative final offset allowed, µV (`<= 0`)
    pub max_negative_uv: i32,
}

/// Outcome of one completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Headroom used for this cycle
    pub headroom: Headroom,
    /// Controllers evaluated
    pub evaluated: u8,
    /// Controllers skipped for gating skew
    pub gating_skipped: u8,
    /// Offset computed for the rail, µV
    pub final_uv: i32,
    /// Whether the offset was handed to the voltage path
    pub applied: bool,
}

// =============================================================================
// GROUP
// =============================================================================

/// Controllers of one version sharing a rail
#[derive(Debug)]
pub struct ControllerGroup {
    version: GroupVersion,
    settings: GroupSettings,
    rail_policy: RailPolicyIndex,
    rails: Vec<VoltRail, MAX_RAILS>,
    gating_feature: GatingFeature,
    capabilities: Capabilities,
    controllers: Vec<Controller, MAX_CONTROLLERS>,
    last_applied_uv: i32,
    callback_skipped: bool,
    gating_count: u32,
    counters: CycleCounters,
    diag: Diagnostics,
}

impl ControllerGroup {
    /// Build a group from a host table
    pub fn new(desc: &GroupDescriptor) -> Result<Self> {
        desc.validate()?;

        let mut controllers = Vec::new();
        for ctrl in desc.controllers.iter() {
            controllers
                .push(Controller::new(ctrl)?)
                .map_err(|_| Error::InvalidArgument)?;
        }

        Ok(Self {
            version: desc.version,
            settings: desc.settings,
            rail_policy: desc.rail_policy,
            rails: desc.rails.clone(),
            gating_feature: desc.gating_feature,
            capabilities: Capabilities::supported(desc.capabilities),
            controllers,
            last_applied_uv: 0,
            callback_skipped: false,
            gating_count: 0,
            counters: CycleCounters::default(),
            diag: Diagnostics::new(),
        })
    }

    /// Group version
    #[inline]
    pub fn version(&self) -> GroupVersion {
        self.version
    }

    /// Current settings
    #[inline]
    pub fn settings(&self) -> &GroupSettings {
        &self.settings
    }

    /// Replace settings
    pub fn set_settings(&mut self, settings: GroupSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Effective capabilities
    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether VF switches keep integrator state
    pub fn continuous_active(&self) -> bool {
        self.version == GroupVersion::V10
            && self.capabilities.contains(Capabilities::CONTINUOUS_MODE)
            && self.settings.continuous_mode
    }

    /// Controllers in index order
    #[inline]
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub(crate) fn controllers_mut(&mut self) -> &mut [Controller] {
        &mut self.controllers
    }

    /// Controller by index
    pub fn controller(&self, index: u8) -> Result<&Controller> {
        self.controllers
            .get(index as usize)
            .ok_or(Error::InvalidArgument)
    }

    /// Mutable controller by index
    pub fn controller_mut(&mut self, index: u8) -> Result<&mut Controller> {
        self.controllers
            .get_mut(index as usize)
            .ok_or(Error::InvalidArgument)
    }

    /// Offset most recently handed to the voltage path, µV
    #[inline]
    pub fn last_applied_uv(&self) -> i32 {
        self.last_applied_uv
    }

    /// Whether a callback body was skipped for the VF switch
    #[inline]
    pub fn callback_skipped(&self) -> bool {
        self.callback_skipped
    }

    /// Mark the callback body as skipped or caught up
    #[inline]
    pub fn set_callback_skipped(&mut self, skipped: bool) {
        self.callback_skipped = skipped;
    }

    /// Gating entry count seen last
    #[inline]
    pub fn gating_count(&self) -> u32 {
        self.gating_count
    }

    /// Cycle counters
    #[inline]
    pub fn counters(&self) -> &CycleCounters {
        &self.counters
    }

    /// Fault record
    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    /// Whether every controller is disabled
    pub fn all_disabled(&self) -> bool {
        self.controllers.iter().all(|c| !c.is_enabled())
    }

    /// Whether any controller is held by `client`
    pub fn any_disabled_by(&self, client: ClientId) -> bool {
        self.controllers.iter().any(|c| c.is_disabled_by(client))
    }

    /// Count a callback body skipped for the VF switch
    pub fn note_vf_skip(&mut self) {
        self.callback_skipped = true;
        self.counters.vf_skipped = self.counters.vf_skipped.wrapping_add(1);
    }

    /// Take a fresh gating baseline
    pub fn cache_gating_count<P>(&mut self, platform: &mut P)
    where
        P: Platform + ?Sized,
    {
        let mut cs = CriticalSection::enter(platform);
        self.gating_count = cs.platform().entry_count(self.gating_feature);
    }

    /// Run one full cycle
    pub fn run_cycle<P>(&mut self, platform: &mut P) -> Result<CycleReport>
    where
        P: Platform + ?Sized,
    {
        match self.cycle(platform) {
            Ok(report) => {
                self.counters.completed = self.counters.completed.wrapping_add(1);
                Ok(report)
            },
            Err(e) => {
                self.counters.aborted = self.counters.aborted.wrapping_add(1);
                log::warn!(
                    "clvc: cycle aborted ({}), keeping {} uV",
                    e,
                    self.last_applied_uv
                );
                Err(e)
            },
        }
    }

    fn cycle<P>(&mut self, platform: &mut P) -> Result<CycleReport>
    where
        P: Platform + ?Sized,
    {
        let headroom = self.headroom(&*platform)?;
        self.apply_caps(platform, headroom.at_or_below_floor)?;
        let skewed = self.gating_skew(platform);

        let mut cycle_uv: Option<i32> = None;
        let mut evaluated = 0u8;
        let mut gating_skipped = 0u8;
        for (index, ctrl) in self.controllers.iter_mut().enumerate() {
            if !ctrl.is_enabled() {
                continue;
            }
            if skewed.intersects(ctrl.domain().mask()) {
                log::debug!("clvc: ctrl {} skipped, domain was gated", ctrl.id());
                ctrl.rebaseline(&*platform, self.capabilities).map_err(|e| {
                    self.diag.breakpoint(FaultSite::Eval, e, Some(index as u8));
                    e
                })?;
                gating_skipped += 1;
                continue;
            }
            let output = ctrl
                .eval(&*platform, self.capabilities, &mut self.diag, index as u8)
                .map_err(|e| {
                    self.diag.breakpoint(FaultSite::Eval, e, Some(index as u8));
                    e
                })?;
            cycle_uv = Some(cycle_uv.map_or(output, |acc| acc.max(output)));
            evaluated += 1;
        }
        self.counters.gating_skipped = self
            .counters
            .gating_skipped
            .wrapping_add(gating_skipped as u32);

        let final_uv = cycle_uv
            .map_or(0, |delta| delta.saturating_add(self.last_applied_uv))
            .max(headroom.max_negative_uv);
        let applied = self.apply(platform, final_uv)?;

        Ok(CycleReport {
            headroom,
            evaluated,
            gating_skipped,
            final_uv,
            applied,
        })
    }

    /// Compare every rail, minus our own offset, with its floor
    pub fn headroom<P>(&self, platform: &P) -> Result<Headroom>
    where
        P: Platform + ?Sized,
    {
        let mut at_or_below_floor = false;
        let mut max_negative_uv = i32::MIN as i64;
        for &rail in self.rails.iter() {
            let current = platform.voltage_uv(rail)? as i64 - self.last_applied_uv as i64;
            let floor = platform.noise_unaware_floor_uv(rail)? as i64;
            if current <= floor {
                at_or_below_floor = true;
                continue;
            }
            max_negative_uv = max_negative_uv.max(floor - current);
        }

        let max_negative_uv = if at_or_below_floor {
            0
        } else {
            max_negative_uv.clamp(i32::MIN as i64, 0) as i32
        };
        Ok(Headroom {
            at_or_below_floor,
            max_negative_uv,
        })
    }

    /// Program frequency caps with the gating feature held off
    fn apply_caps<P>(&mut self, platform: &mut P, at_or_below_floor: bool) -> Result<()>
    where
        P: Platform + ?Sized,
    {
        let feature = self.gating_feature;
        let controllers = &mut self.controllers;
        let diag = &mut self.diag;

        with_critical_section(platform, |p| {
            if let Err(e) = p.disallow(feature) {
                diag.breakpoint(FaultSite::GatingVote, e.into(), None);
                return Err(Error::from(e));
            }

            let mut written = Ok(());
            for (index, ctrl) in controllers.iter_mut().enumerate() {
                if !ctrl.is_enabled() {
                    continue;
                }
                if let Err(e) = ctrl.apply_cap(p, at_or_below_floor) {
                    diag.breakpoint(FaultSite::FrequencyCap, e, Some(index as u8));
                    written = Err(e);
                    break;
                }
            }

            let released = p.allow(feature).map_err(|e| {
                diag.breakpoint(FaultSite::GatingVote, e.into(), None);
                Error::from(e)
            });
            written.and(released)
        })
    }

    /// Domains whose samples are skewed by a gating entry since last cycle
    fn gating_skew<P>(&mut self, platform: &mut P) -> ClockDomainMask
    where
        P: Platform + ?Sized,
    {
        let feature = self.gating_feature;
        let cached = &mut self.gating_count;
        with_critical_section(platform, |p| {
            let count = p.entry_count(feature);
            if count == *cached {
                return ClockDomainMask::empty();
            }
            *cached = count;
            p.gated_domains(feature)
        })
    }

    /// Hand the final offset to the voltage path and cache it
    ///
    /// Returns `false` for a dropped 2.0 zero request.
    fn apply<P>(&mut self, platform: &mut P, final_uv: i32) -> Result<bool>
    where
        P: Platform + ?Sized,
    {
        let result = match self.version {
            GroupVersion::V10 => platform.set_offset_uv(self.rail_policy, final_uv),
            GroupVersion::V20 => {
                if final_uv == 0 {
                    self.counters.dropped_zero = self.counters.dropped_zero.wrapping_add(1);
                    log::debug!("clvc: zero offset, request dropped");
                    return Ok(false);
                }
                platform.queue_offset(VoltOffsetRequest {
                    rail_policy: self.rail_policy,
                    offset_uv: final_uv,
                })
            },
        };

        if let Err(e) = result {
            self.diag.breakpoint(FaultSite::Apply, e.into(), None);
            return Err(e.into());
        }
        log::debug!("clvc: applied {} uV", final_uv);
        self.last_applied_uv = final_uv;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerType, PiGains};
    use crate::fixed::Sfxp20p12;
    use crate::testing::MockPlatform;
    use helix_pmu_hal::{ClockDevice, ClockDomain, HalError};

    fn unity(ty: ControllerType, id: u8, domain: ClockDomain) -> ControllerDescriptor {
        ControllerDescriptor::new(ty, id, domain, ClockDevice(id))
            .gains(PiGains {
                prop: Sfxp20p12::ONE,
                integ: Sfxp20p12::ZERO,
                decay: Sfxp20p12::ONE,
            })
            .clamp(-200_000, 200_000)
            .caps(0, -50)
    }

    fn group(version: GroupVersion, domains: &[ClockDomain]) -> ControllerGroup {
        let ty = match version {
            GroupVersion::V10 => ControllerType::Pi10,
            GroupVersion::V20 => ControllerType::Pi20,
        };
        let mut desc = GroupDescriptor::new(version);
        desc.add_rail(VoltRail(0)).unwrap();
        for (i, &domain) in domains.iter().enumerate() {
            desc.add_controller(unity(ty, i as u8, domain)).unwrap();
        }
        ControllerGroup::new(&desc).unwrap()
    }

    fn khz(p: &mut MockPlatform, domain: ClockDomain, target: u32, actual: u32) {
        p.target_khz[domain.index() as usize] = target;
        p.actual_khz[domain.index() as usize] = actual;
    }

    /// First cycle only baselines the counters
    fn prime(group: &mut ControllerGroup, p: &mut MockPlatform) {
        group.run_cycle(p).unwrap();
        p.advance_ms(10);
    }

    #[test]
    fn test_descriptor_validation() {
        let mut desc = GroupDescriptor::new(GroupVersion::V10);
        assert_eq!(desc.validate(), Err(Error::InvalidArgument));
        desc.add_rail(VoltRail(0)).unwrap();
        assert!(desc.validate().is_ok());

        desc.add_controller(unity(ControllerType::Pi20, 0, ClockDomain::Gpc))
            .unwrap();
        assert_eq!(desc.validate(), Err(Error::InvalidArgument));

        let mut desc = GroupDescriptor::new(GroupVersion::V10).sampling_period_ms(0);
        desc.add_rail(VoltRail(0)).unwrap();
        assert_eq!(desc.validate(), Err(Error::InvalidArgument));

        let mut desc = GroupDescriptor::new(GroupVersion::V10);
        desc.add_rail(VoltRail(0)).unwrap();
        desc.add_controller(unity(ControllerType::Pi10, 3, ClockDomain::Gpc))
            .unwrap();
        desc.add_controller(unity(ControllerType::Pi10, 3, ClockDomain::Xbar))
            .unwrap();
        assert_eq!(desc.validate(), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_descriptor_capacity() {
        let mut desc = GroupDescriptor::new(GroupVersion::V10);
        for i in 0..MAX_RAILS as u8 {
            desc.add_rail(VoltRail(i)).unwrap();
        }
        assert_eq!(desc.add_rail(VoltRail(9)), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_capabilities_narrowed() {
        let mut desc = GroupDescriptor::new(GroupVersion::V10).capabilities(Capabilities::all());
        desc.add_rail(VoltRail(0)).unwrap();
        let group = ControllerGroup::new(&desc).unwrap();
        assert_eq!(group.capabilities(), Capabilities::BUILD);
    }

    #[test]
    fn test_max_aggregation_ignores_disabled() {
        let (a, b, c) = (ClockDomain::Gpc, ClockDomain::Xbar, ClockDomain::Sys);
        let mut g = group(GroupVersion::V10, &[a, b, c]);
        let mut p = MockPlatform::new();
        khz(&mut p, a, 1_050_000, 1_000_000);
        khz(&mut p, b, 1_020_000, 1_000_000);
        khz(&mut p, c, 1_090_000, 1_000_000);
        prime(&mut g, &mut p);

        g.controller_mut(2).unwrap().vote(ClientId::Host, true);
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.final_uv, 50);
        assert_eq!(p.last_offset, Some((RailPolicyIndex(0), 50)));
        assert_eq!(g.last_applied_uv(), 50);
    }

    #[test]
    fn test_all_disabled_yields_zero() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc, ClockDomain::Xbar]);
        let mut p = MockPlatform::new();
        khz(&mut p, ClockDomain::Gpc, 1_050_000, 1_000_000);
        prime(&mut g, &mut p);
        g.run_cycle(&mut p).unwrap();
        assert_eq!(g.last_applied_uv(), 50);
        assert_eq!(g.controller(0).unwrap().output_uv(), 50);

        for i in 0..2 {
            g.controller_mut(i).unwrap().vote(ClientId::Perf, true);
        }
        assert!(g.all_disabled());
        p.advance_ms(10);
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.final_uv, 0);
        assert_eq!(p.last_offset, Some((RailPolicyIndex(0), 0)));
        // Gating bookkeeping still ran
        assert_eq!(p.disallow_calls, 3);
    }

    #[test]
    fn test_offset_accumulates_over_history() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        khz(&mut p, ClockDomain::Gpc, 1_010_000, 1_000_000);
        prime(&mut g, &mut p);
        assert_eq!(g.run_cycle(&mut p).unwrap().final_uv, 10);
        p.advance_ms(10);
        assert_eq!(g.run_cycle(&mut p).unwrap().final_uv, 20);
    }

    #[test]
    fn test_headroom_at_floor() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        p.voltage_uv[0] = 800_000;
        p.floor_uv[0] = 800_000;
        let headroom = g.headroom(&p).unwrap();
        assert!(headroom.at_or_below_floor);
        assert_eq!(headroom.max_negative_uv, 0);

        khz(&mut p, ClockDomain::Gpc, 1_000_000, 1_030_000);
        prime(&mut g, &mut p);
        let report = g.run_cycle(&mut p).unwrap();
        assert!(report.final_uv >= 0);
        assert_eq!(report.final_uv, 0);
        // Below-floor caps selected
        assert_eq!(p.clock_offsets_mhz[0], -50);
    }

    #[test]
    fn test_headroom_limits_negative_offset() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        p.voltage_uv[0] = 800_020;
        p.floor_uv[0] = 800_000;
        khz(&mut p, ClockDomain::Gpc, 1_000_000, 1_100_000);
        prime(&mut g, &mut p);

        let report = g.run_cycle(&mut p).unwrap();
        assert!(!report.headroom.at_or_below_floor);
        assert_eq!(report.headroom.max_negative_uv, -20);
        assert_eq!(report.final_uv, -20);
    }

    #[test]
    fn test_headroom_excludes_own_offset() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        g.last_applied_uv = 30;
        p.voltage_uv[0] = 800_030;
        p.floor_uv[0] = 800_000;
        assert!(g.headroom(&p).unwrap().at_or_below_floor);
    }

    #[test]
    fn test_caps_written_under_gating_vote() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc, ClockDomain::Xbar]);
        let mut p = MockPlatform::new();
        p.clock_offsets_mhz[0] = 5;
        p.clock_offsets_mhz[1] = 5;
        g.run_cycle(&mut p).unwrap();
        assert_eq!(p.cap_writes, 2);
        assert_eq!(p.unguarded_cap_writes, 0);
        assert_eq!(p.disallow_calls, p.allow_calls);
        assert_eq!(p.gating_disallowed, 0);

        // Unchanged caps are not rewritten
        p.advance_ms(10);
        g.run_cycle(&mut p).unwrap();
        assert_eq!(p.cap_writes, 2);
    }

    #[test]
    fn test_gating_skew_skips_one_cycle() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc, ClockDomain::Mclk]);
        let mut p = MockPlatform::new();
        p.gated_domains = ClockDomainMask::MCLK;
        khz(&mut p, ClockDomain::Mclk, 1_040_000, 1_000_000);
        prime(&mut g, &mut p);

        // Cycle N: stable
        assert_eq!(g.run_cycle(&mut p).unwrap().evaluated, 2);
        p.advance_ms(10);

        // Cycle N+1: gating entered in between
        p.enter_gating();
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.gating_skipped, 1);
        assert_eq!(report.evaluated, 1);
        assert_eq!(g.controller(1).unwrap().evaluations(), 2);
        p.advance_ms(10);

        // Cycle N+2: count stable again
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.gating_skipped, 0);
        assert_eq!(g.controller(1).unwrap().evaluations(), 3);
        assert_eq!(g.counters().gating_skipped, 1);
    }

    #[test]
    fn test_gating_skip_drops_stopped_window() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        p.gated_domains = ClockDomainMask::GPC;
        prime(&mut g, &mut p);

        // Cycle N: on target
        assert_eq!(g.run_cycle(&mut p).unwrap().final_uv, 0);

        // Cycle N+1: clock stopped under gating for the whole window
        khz(&mut p, ClockDomain::Gpc, 1_000_000, 0);
        p.advance_ms(10);
        p.enter_gating();
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.gating_skipped, 1);
        assert_eq!(report.final_uv, 0);

        // Cycle N+2: running on target again, the stopped interval is gone
        khz(&mut p, ClockDomain::Gpc, 1_000_000, 1_000_000);
        p.advance_ms(10);
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.gating_skipped, 0);
        assert_eq!(report.evaluated, 1);
        let ctrl = g.controller(0).unwrap();
        assert_eq!(ctrl.pi().error_khz(), 0);
        assert_eq!(ctrl.output_uv(), 0);
        assert_eq!(report.final_uv, 0);
    }

    #[test]
    fn test_gating_state_read_under_critical_section() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc, ClockDomain::Mclk]);
        let mut p = MockPlatform::new();
        p.gated_domains = ClockDomainMask::MCLK;
        g.cache_gating_count(&mut p);
        prime(&mut g, &mut p);
        p.enter_gating();
        g.run_cycle(&mut p).unwrap();

        assert_eq!(p.unguarded_gating_reads.get(), 0);
        assert_eq!(g.gating_count(), 1);
        // Cap writes and the skew check each take one section, never nested
        assert_eq!(p.cs_entries, 5);
        assert_eq!(p.cs_max_depth, 1);
        assert_eq!(p.cs_depth, 0);
        assert!(p.irq_enabled);
    }

    #[test]
    fn test_counter_failure_aborts_cycle() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        khz(&mut p, ClockDomain::Gpc, 1_010_000, 1_000_000);
        prime(&mut g, &mut p);
        g.run_cycle(&mut p).unwrap();
        let writes = p.offset_writes;

        p.fail_counter = true;
        p.advance_ms(10);
        assert_eq!(g.run_cycle(&mut p), Err(Error::Hal(HalError::NotReady)));
        assert_eq!(p.offset_writes, writes);
        assert_eq!(g.last_applied_uv(), 10);
        assert_eq!(g.counters().aborted, 1);
        assert_eq!(g.counters().completed, 2);
        assert_eq!(
            g.diagnostics().last_fault.map(|f| f.site),
            Some(FaultSite::Eval)
        );
        // Gating vote released before the failure
        assert_eq!(p.gating_disallowed, 0);
        assert_eq!(p.cs_depth, 0);
    }

    #[test]
    fn test_failed_eval_keeps_cache() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        khz(&mut p, ClockDomain::Gpc, 1_010_000, 1_000_000);
        prime(&mut g, &mut p);
        g.run_cycle(&mut p).unwrap();
        let writes = p.offset_writes;

        p.fail_target = true;
        p.advance_ms(10);
        assert_eq!(g.run_cycle(&mut p), Err(Error::InvalidState));
        assert_eq!(p.offset_writes, writes);
        assert_eq!(g.last_applied_uv(), 10);
        assert_eq!(g.counters().aborted, 1);
        assert_eq!(
            g.diagnostics().last_fault.map(|f| f.site),
            Some(FaultSite::Eval)
        );
    }

    #[test]
    fn test_failed_apply_keeps_cache() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        khz(&mut p, ClockDomain::Gpc, 1_010_000, 1_000_000);
        prime(&mut g, &mut p);
        g.run_cycle(&mut p).unwrap();

        p.fail_offset = true;
        p.advance_ms(10);
        assert!(g.run_cycle(&mut p).is_err());
        assert_eq!(g.last_applied_uv(), 10);
    }

    #[test]
    fn test_v20_queues_and_drops_zero() {
        let mut g = group(GroupVersion::V20, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        khz(&mut p, ClockDomain::Gpc, 1_025_000, 1_000_000);
        let report = g.run_cycle(&mut p).unwrap();
        assert_eq!(report.final_uv, 0);
        assert!(!report.applied);
        assert_eq!(p.queued, 0);
        assert_eq!(p.offset_writes, 0);
        assert_eq!(g.counters().dropped_zero, 1);

        p.advance_ms(10);
        let report = g.run_cycle(&mut p).unwrap();
        assert!(report.applied);
        assert_eq!(
            p.last_request,
            Some(VoltOffsetRequest {
                rail_policy: RailPolicyIndex(0),
                offset_uv: 25,
            })
        );
        assert_eq!(g.last_applied_uv(), 25);
    }

    #[test]
    fn test_poisoned_window_holds_output() {
        let mut g = group(GroupVersion::V10, &[ClockDomain::Gpc]);
        let mut p = MockPlatform::new();
        let mut tuned = unity(ControllerType::Pi10, 0, ClockDomain::Gpc);
        tuned.config.poison.hw_failsafe_threshold_pct = 10;
        g.controller_mut(0).unwrap().reconfigure(&tuned).unwrap();

        khz(&mut p, ClockDomain::Gpc, 1_010_000, 1_000_000);
        prime(&mut g, &mut p);
        g.run_cycle(&mut p).unwrap();
        let prev = g.controller(0).unwrap().pi().prev_error_mhz();
        let integral = g.controller(0).unwrap().pi().integral();

        // 15% failsafe engagement while the domain runs far below target
        khz(&mut p, ClockDomain::Gpc, 1_010_000, 900_000);
        p.advance_ms(10);
        p.engage_failsafe(1_500_000);
        g.run_cycle(&mut p).unwrap();
        let ctrl = g.controller(0).unwrap();
        assert_eq!(ctrl.pi().prev_error_mhz(), prev);
        assert_eq!(ctrl.pi().integral(), integral);
        assert_eq!(ctrl.output_uv(), 10);
        assert!(!ctrl.last_poison().is_empty());
    }
}

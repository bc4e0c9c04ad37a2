//! # Sample Poisoning
//!
//! Decides whether the current sampling window was contaminated by hardware
//! throttling. A frequency shortfall caused by failsafe slowdown, BA power
//! limiting or droopy VR engagement is not a voltage margin problem, so such
//! windows must not feed the integrator.
//!
//! ```text
//!  per source:   Δengaged = engaged(now) - engaged(prev)
//!                Δeval    = eval(now)    - eval(prev)
//!
//!  HW failsafe:  pct   = round(Δengaged * 100 / Δeval)      > threshold_pct ?
//!  BA / droopy:  ratio = (Δengaged << 12) / Δeval  (U20.12)  > threshold     ?
//!
//!  poisoned = failsafe ∨ BA ∨ droopy
//! ```
//!
//! A window with `Δengaged > Δeval` (`Overflow`) or `Δeval == 0`
//! (`NotQueried`) is a fault for that source only: the source counts as
//! poisoned and the fault goes to diagnostics. Counters are cached for the
//! next window whatever the outcome.

use helix_pmu_hal::{EngageCounters, MonitorIndex, ThermalMonitor, Timebase};

use crate::caps::Capabilities;
use crate::diag::{Diagnostics, FaultSite};
use crate::error::{Error, Result};
use crate::fixed::Ufxp20p12;

bitflags::bitflags! {
    /// Sources that poisoned a window
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PoisonSources: u8 {
        /// Hardware failsafe slowdown
        const HW_FAILSAFE = 1 << 0;
        /// Bus-agent power limiting
        const BA          = 1 << 1;
        /// Droopy VR engagement
        const DROOPY      = 1 << 2;
    }
}

/// Poisoning thresholds and monitor assignment of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonConfig {
    /// Failsafe engagement above this percentage poisons the window
    pub hw_failsafe_threshold_pct: u8,
    /// Thermal monitor tracking BA engagement, or `INVALID`
    pub ba_monitor: MonitorIndex,
    /// BA engagement fraction above which the window is poisoned
    pub ba_threshold: Ufxp20p12,
    /// Thermal monitor tracking droopy engagement, or `INVALID`
    pub droopy_monitor: MonitorIndex,
    /// Droopy engagement fraction above which the window is poisoned
    pub droopy_threshold: Ufxp20p12,
}

impl Default for PoisonConfig {
    fn default() -> Self {
        Self {
            hw_failsafe_threshold_pct: 100,
            ba_monitor: MonitorIndex::INVALID,
            ba_threshold: Ufxp20p12::ONE,
            droopy_monitor: MonitorIndex::INVALID,
            droopy_threshold: Ufxp20p12::ONE,
        }
    }
}

/// Engage-time window of one source
#[derive(Debug, Clone, Copy, Default)]
struct SourceWindow {
    prev: Option<EngageCounters>,
}

impl SourceWindow {
    /// Advance to `cur` and return `(Δengaged, Δeval)`
    ///
    /// `Ok(None)` on the first window after a reset.
    fn advance(&mut self, cur: EngageCounters) -> Result<Option<(u64, u64)>> {
        let Some(prev) = self.prev.replace(cur) else {
            return Ok(None);
        };
        let engaged = cur.engaged_ns.wrapping_sub(prev.engaged_ns);
        let eval = cur.eval_ns.wrapping_sub(prev.eval_ns);
        if eval == 0 {
            return Err(Error::NotQueried);
        }
        if engaged > eval {
            return Err(Error::Overflow);
        }
        Ok(Some((engaged, eval)))
    }

    fn restart(&mut self, cur: EngageCounters) {
        self.prev = Some(cur);
    }
}

/// Per-controller poison detector
#[derive(Debug, Clone)]
pub struct PoisonDetector {
    config: PoisonConfig,
    hw_failsafe: SourceWindow,
    ba: SourceWindow,
    droopy: SourceWindow,
    poison_count: u32,
    last: PoisonSources,
}

impl PoisonDetector {
    /// Create a detector
    pub const fn new(config: PoisonConfig) -> Self {
        Self {
            config,
            hw_failsafe: SourceWindow { prev: None },
            ba: SourceWindow { prev: None },
            droopy: SourceWindow { prev: None },
            poison_count: 0,
            last: PoisonSources::empty(),
        }
    }

    /// Thresholds in use
    #[inline]
    pub fn config(&self) -> &PoisonConfig {
        &self.config
    }

    /// Replace thresholds, keeping the running windows
    pub fn set_config(&mut self, config: PoisonConfig) {
        if config.ba_monitor != self.config.ba_monitor {
            self.ba = SourceWindow::default();
        }
        if config.droopy_monitor != self.config.droopy_monitor {
            self.droopy = SourceWindow::default();
        }
        self.config = config;
    }

    /// Windows judged poisoned since the last reset
    #[inline]
    pub fn poison_count(&self) -> u32 {
        self.poison_count
    }

    /// Sources that poisoned the most recent window
    #[inline]
    pub fn last_sources(&self) -> PoisonSources {
        self.last
    }

    /// Evaluate the window that ends now
    ///
    /// Collaborator read failures abort the evaluation; counter
    /// inconsistencies only poison the affected source.
    pub fn check<P>(
        &mut self,
        platform: &P,
        caps: Capabilities,
        diag: &mut Diagnostics,
        controller: u8,
    ) -> Result<PoisonSources>
    where
        P: ThermalMonitor + Timebase + ?Sized,
    {
        let mut sources = PoisonSources::empty();

        let failsafe = EngageCounters::new(platform.failsafe_engaged_ns()?, platform.now_ns());
        match self.hw_failsafe.advance(failsafe) {
            Ok(Some((engaged, eval))) => {
                if percent_rounded(engaged, eval) > self.config.hw_failsafe_threshold_pct as u64 {
                    sources |= PoisonSources::HW_FAILSAFE;
                }
            },
            Ok(None) => {},
            Err(e) => {
                diag.breakpoint(FaultSite::PoisonHwFailsafe, e, Some(controller));
                sources |= PoisonSources::HW_FAILSAFE;
            },
        }

        if caps.contains(Capabilities::BA_POISONING) && self.config.ba_monitor.is_valid() {
            let counters = platform.counters(self.config.ba_monitor)?;
            if fraction_poisoned(
                &mut self.ba,
                counters,
                self.config.ba_threshold,
                diag,
                FaultSite::PoisonBa,
                controller,
            ) {
                sources |= PoisonSources::BA;
            }
        }

        if caps.contains(Capabilities::DROOPY_POISONING) && self.config.droopy_monitor.is_valid() {
            let counters = platform.counters(self.config.droopy_monitor)?;
            if fraction_poisoned(
                &mut self.droopy,
                counters,
                self.config.droopy_threshold,
                diag,
                FaultSite::PoisonDroopy,
                controller,
            ) {
                sources |= PoisonSources::DROOPY;
            }
        }

        if !sources.is_empty() {
            self.poison_count = self.poison_count.wrapping_add(1);
        }
        self.last = sources;
        Ok(sources)
    }

    /// Start new windows at the current counters without judging the old ones
    pub fn restart<P>(&mut self, platform: &P, caps: Capabilities) -> Result<()>
    where
        P: ThermalMonitor + Timebase + ?Sized,
    {
        let failsafe = EngageCounters::new(platform.failsafe_engaged_ns()?, platform.now_ns());
        self.hw_failsafe.restart(failsafe);
        if caps.contains(Capabilities::BA_POISONING) && self.config.ba_monitor.is_valid() {
            self.ba.restart(platform.counters(self.config.ba_monitor)?);
        }
        if caps.contains(Capabilities::DROOPY_POISONING) && self.config.droopy_monitor.is_valid() {
            self.droopy.restart(platform.counters(self.config.droopy_monitor)?);
        }
        Ok(())
    }

    /// Forget all windows and the poison count
    pub fn reset(&mut self) {
        self.hw_failsafe = SourceWindow::default();
        self.ba = SourceWindow::default();
        self.droopy = SourceWindow::default();
        self.poison_count = 0;
        self.last = PoisonSources::empty();
    }
}

/// `engaged * 100 / eval`, rounded to nearest
#[inline]
fn percent_rounded(engaged: u64, eval: u64) -> u64 {
    ((engaged as u128 * 100 + eval as u128 / 2) / eval as u128) as u64
}

fn fraction_poisoned(
    window: &mut SourceWindow,
    counters: EngageCounters,
    threshold: Ufxp20p12,
    diag: &mut Diagnostics,
    site: FaultSite,
    controller: u8,
) -> bool {
    match window.advance(counters) {
        Ok(Some((engaged, eval))) => {
            Ufxp20p12::from_ratio(engaged, eval).map_or(true, |ratio| ratio > threshold)
        },
        Ok(None) => false,
        Err(e) => {
            diag.breakpoint(site, e, Some(controller));
            true
        },
    }
}

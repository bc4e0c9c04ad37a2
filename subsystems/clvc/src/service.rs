//! # Controller Service
//!
//! Inbound operations of the subsystem and the scheduler state machine.
//!
//! ```text
//!   Uninitialized ──init()──▶ Initialized ──load(enable)──▶ Scheduled ◀──┐
//!                                                              │         │
//!                                                       callback due     │
//!                                                              ▼         │
//!                                                         Evaluating ────┘
//! ```
//!
//! ## Continuous mode
//!
//! In a 1.0 group with continuous mode on, the VF switch client is special:
//! releasing its vote does not reset the controllers, and while it holds a
//! vote on any controller the callback body is skipped. When the vote is
//! released with a skipped callback pending, the cycle runs once right away.

use helix_pmu_hal::{ClockDomain, Platform};
use spin::{Mutex, MutexGuard};

use crate::controller::{ClientId, ControllerDescriptor};
use crate::error::{Error, Result};
use crate::group::{ControllerGroup, CycleReport, GroupDescriptor, GroupSettings};
use crate::sched::{RecurringCallback, SchedulerState, TimingMode};
use crate::status::{ControllerStatus, GroupStatus};

/// The controller subsystem
#[derive(Debug)]
pub struct ClvcService {
    group: Option<ControllerGroup>,
    callback: Option<RecurringCallback>,
    state: SchedulerState,
    timing: TimingMode,
}

impl ClvcService {
    /// Create an uninitialized service
    pub const fn new() -> Self {
        Self {
            group: None,
            callback: None,
            state: SchedulerState::Uninitialized,
            timing: TimingMode::Normal,
        }
    }

    /// Install the controller group (once per boot)
    pub fn init(&mut self, desc: &GroupDescriptor) -> Result<()> {
        if self.group.is_some() {
            return Err(Error::IllegalOperation);
        }
        let group = ControllerGroup::new(desc)?;
        log::info!(
            "clvc: {:?} group with {} controller(s), caps {:?}",
            group.version(),
            group.controllers().len(),
            group.capabilities()
        );
        self.group = Some(group);
        self.state = SchedulerState::Initialized;
        Ok(())
    }

    /// Scheduler state
    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Installed group
    pub fn group(&self) -> Result<&ControllerGroup> {
        self.group.as_ref().ok_or(Error::InvalidState)
    }

    /// Select normal or low-power sampling
    pub fn set_timing_mode(&mut self, mode: TimingMode) {
        self.timing = mode;
    }

    /// Enable or disable every controller for one client
    ///
    /// The first enabling load arms the callback; later loads refresh its
    /// periods.
    pub fn load<P>(&mut self, platform: &mut P, enable: bool, client: ClientId) -> Result<()>
    where
        P: Platform + ?Sized,
    {
        let group = self.group.as_mut().ok_or(Error::InvalidState)?;
        let keep_state = client == ClientId::VfSwitch && group.continuous_active();

        for ctrl in group.controllers_mut() {
            if ctrl.vote(client, !enable) && !keep_state {
                ctrl.reset();
            }
        }

        if enable {
            let settings = *group.settings();
            match self.callback.as_mut() {
                Some(cb) => {
                    cb.set_periods(settings.sampling_period_ms, settings.low_power_period_ms());
                },
                None => {
                    self.callback = Some(RecurringCallback::new(
                        settings.sampling_period_ms,
                        settings.low_power_period_ms(),
                        platform.now_ns(),
                        self.timing,
                    ));
                    self.state = SchedulerState::Scheduled;
                    log::info!(
                        "clvc: callback scheduled, {} ms / {} ms",
                        settings.sampling_period_ms,
                        settings.low_power_period_ms()
                    );
                },
            }
        }

        group.cache_gating_count(platform);

        if enable {
            self.catch_up(platform, client);
        }
        Ok(())
    }

    /// Cast or release one client's vote on one controller
    pub fn disable<P>(
        &mut self,
        platform: &mut P,
        index: u8,
        client: ClientId,
        disable: bool,
    ) -> Result<()>
    where
        P: Platform + ?Sized,
    {
        let group = self.group.as_mut().ok_or(Error::InvalidState)?;
        let keep_state = client == ClientId::VfSwitch && group.continuous_active();
        let ctrl = group.controller_mut(index)?;
        if ctrl.vote(client, disable) && !keep_state {
            ctrl.reset();
        }

        if !disable {
            self.catch_up(platform, client);
        }
        Ok(())
    }

    /// Run a callback body skipped for the VF switch, once it lets go
    fn catch_up<P>(&mut self, platform: &mut P, client: ClientId)
    where
        P: Platform + ?Sized,
    {
        if client != ClientId::VfSwitch || self.callback.is_none() {
            return;
        }
        let Some(group) = self.group.as_mut() else {
            return;
        };
        if !group.callback_skipped() || group.any_disabled_by(ClientId::VfSwitch) {
            return;
        }

        group.set_callback_skipped(false);
        log::debug!("clvc: running callback skipped during VF switch");
        if let Err(e) = self.run_callback(platform) {
            log::debug!("clvc: catch-up cycle failed: {}", e);
        }
    }

    /// Fire the callback if its deadline has passed
    pub fn poll<P>(&mut self, platform: &mut P) -> Result<Option<CycleReport>>
    where
        P: Platform + ?Sized,
    {
        let now_ns = platform.now_ns();
        let due = match self.callback.as_mut() {
            Some(cb) => cb.poll(now_ns, self.timing),
            None => false,
        };
        if !due {
            return Ok(None);
        }
        self.run_callback(platform)
    }

    /// Callback body
    ///
    /// Returns `None` when the body was skipped for the VF switch.
    pub fn run_callback<P>(&mut self, platform: &mut P) -> Result<Option<CycleReport>>
    where
        P: Platform + ?Sized,
    {
        if self.state != SchedulerState::Scheduled {
            return Err(Error::InvalidState);
        }
        let group = self.group.as_mut().ok_or(Error::InvalidState)?;

        if group.continuous_active() && group.any_disabled_by(ClientId::VfSwitch) {
            group.note_vf_skip();
            log::debug!("clvc: callback skipped, VF switch in progress");
            return Ok(None);
        }

        self.state = SchedulerState::Evaluating;
        let result = group.run_cycle(platform);
        self.state = SchedulerState::Scheduled;
        result.map(Some)
    }

    /// Restart the averaging windows of every controller on a domain
    pub fn update_target<P>(
        &mut self,
        platform: &P,
        domain: ClockDomain,
        target_khz: u32,
    ) -> Result<()>
    where
        P: Platform + ?Sized,
    {
        let group = self.group.as_mut().ok_or(Error::InvalidState)?;
        for ctrl in group.controllers_mut() {
            if ctrl.domain() == domain {
                ctrl.retarget(platform, target_khz)?;
            }
        }
        Ok(())
    }

    /// Replace one controller's tunables
    pub fn set_controller_config(&mut self, index: u8, desc: &ControllerDescriptor) -> Result<()> {
        let group = self.group.as_mut().ok_or(Error::InvalidState)?;
        group.controller_mut(index)?.reconfigure(desc)
    }

    /// Replace the group settings; an armed callback picks up the new periods
    pub fn set_group_settings(&mut self, settings: GroupSettings) -> Result<()> {
        let group = self.group.as_mut().ok_or(Error::InvalidState)?;
        group.set_settings(settings)?;
        if let Some(cb) = self.callback.as_mut() {
            cb.set_periods(settings.sampling_period_ms, settings.low_power_period_ms());
        }
        log::info!(
            "clvc: period {} ms x{}, continuous {}",
            settings.sampling_period_ms,
            settings.low_sampling_multiplier,
            settings.continuous_mode
        );
        Ok(())
    }

    /// Snapshot of one controller
    pub fn controller_status(&self, index: u8) -> Result<ControllerStatus> {
        let group = self.group()?;
        Ok(ControllerStatus::capture(index, group.controller(index)?))
    }

    /// Snapshot of the group
    pub fn group_status(&self) -> Result<GroupStatus> {
        let group = self.group()?;
        Ok(GroupStatus::capture(group, self.callback.as_ref(), self.state))
    }
}

impl Default for ClvcService {
    fn default() -> Self {
        Self::new()
    }
}

/// Service shared between the command task and the timer task
#[derive(Debug)]
pub struct SharedClvc {
    inner: Mutex<ClvcService>,
}

impl SharedClvc {
    /// Create an uninitialized shared service
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(ClvcService::new()),
        }
    }

    /// Lock the service
    pub fn lock(&self) -> MutexGuard<'_, ClvcService> {
        self.inner.lock()
    }

    /// Run `f` with the service locked
    pub fn with<R>(&self, f: impl FnOnce(&mut ClvcService) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl Default for SharedClvc {
    fn default() -> Self {
        Self::new()
    }
}

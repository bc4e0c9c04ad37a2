//! # Status Snapshots
//!
//! Read-only copies of controller and group state for the host query path.

use helix_pmu_hal::{ClockDevice, ClockDomain};

use crate::controller::{ClientMask, Controller, ControllerType, GroupVersion};
use crate::diag::Diagnostics;
use crate::fixed::Sfxp20p12;
use crate::group::{ControllerGroup, CycleCounters};
use crate::poison::PoisonSources;
use crate::sched::{RecurringCallback, SchedulerState};

/// Snapshot of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Table index
    pub index: u8,
    /// Host-visible id
    pub id: u8,
    /// Variant
    pub controller_type: ControllerType,
    /// Regulated domain
    pub domain: ClockDomain,
    /// Clock generator device
    pub device: ClockDevice,
    /// Clients holding a disable vote
    pub disable_mask: ClientMask,
    /// Last output, µV
    pub output_uv: i32,
    /// Last raw error, kHz
    pub error_khz: i32,
    /// Error carried into the next cycle, MHz
    pub prev_error_mhz: Sfxp20p12,
    /// Integral accumulator
    pub integral: Sfxp20p12,
    /// Poisoned windows since reset
    pub poison_count: u32,
    /// Sources that poisoned the last window
    pub last_poison: PoisonSources,
    /// Frequency cap last written or confirmed, MHz
    pub applied_cap_mhz: Option<i16>,
    /// Completed evaluations
    pub evaluations: u32,
    /// Resets since init
    pub resets: u32,
}

impl ControllerStatus {
    pub(crate) fn capture(index: u8, ctrl: &Controller) -> Self {
        Self {
            index,
            id: ctrl.id(),
            controller_type: ctrl.controller_type(),
            domain: ctrl.domain(),
            device: ctrl.device(),
            disable_mask: ctrl.disable_mask(),
            output_uv: ctrl.output_uv(),
            error_khz: ctrl.pi().error_khz(),
            prev_error_mhz: ctrl.pi().prev_error_mhz(),
            integral: ctrl.pi().integral(),
            poison_count: ctrl.poison().poison_count(),
            last_poison: ctrl.last_poison(),
            applied_cap_mhz: ctrl.applied_cap_mhz(),
            evaluations: ctrl.evaluations(),
            resets: ctrl.resets(),
        }
    }
}

/// Snapshot of the group and its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStatus {
    /// Group version
    pub version: GroupVersion,
    /// Controllers in the table
    pub controller_count: u8,
    /// Normal sampling period, ms
    pub sampling_period_ms: u32,
    /// Low-power sampling period, ms
    pub low_power_period_ms: u32,
    /// Offset most recently handed to the voltage path, µV
    pub last_applied_uv: i32,
    /// Continuous mode requested
    pub continuous_mode: bool,
    /// A callback body was skipped for the VF switch and not yet caught up
    pub callback_skipped: bool,
    /// Gating entry count seen last
    pub gating_count: u32,
    /// Scheduler state
    pub state: SchedulerState,
    /// Callback firings
    pub callbacks_fired: u32,
    /// Missed callback deadlines
    pub callbacks_dropped: u32,
    /// Cycle counters
    pub counters: CycleCounters,
    /// Fault record
    pub diagnostics: Diagnostics,
}

impl GroupStatus {
    pub(crate) fn capture(
        group: &ControllerGroup,
        callback: Option<&RecurringCallback>,
        state: SchedulerState,
    ) -> Self {
        let settings = group.settings();
        Self {
            version: group.version(),
            controller_count: group.controllers().len() as u8,
            sampling_period_ms: settings.sampling_period_ms,
            low_power_period_ms: settings.low_power_period_ms(),
            last_applied_uv: group.last_applied_uv(),
            continuous_mode: settings.continuous_mode,
            callback_skipped: group.callback_skipped(),
            gating_count: group.gating_count(),
            state,
            callbacks_fired: callback.map_or(0, |cb| cb.fired()),
            callbacks_dropped: callback.map_or(0, |cb| cb.dropped()),
            counters: *group.counters(),
            diagnostics: *group.diagnostics(),
        }
    }
}

//! # Helix Closed-Loop Voltage Controller
//!
//! Keeps a shared voltage rail just high enough for the frequencies the clock
//! domains on it actually reach. Every sampling period each domain's
//! measured frequency is compared against its target, a PI controller turns
//! the error into a voltage offset, and the group applies the most demanding
//! offset to the rail without ever pushing it below its noise-unaware floor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ClvcService                              │
//! │   init · load · disable · poll · update_target · status         │
//! │                  SchedulerState + RecurringCallback             │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                │
//! ┌──────────────────────────────▼──────────────────────────────────┐
//! │                      ControllerGroup                            │
//! │   headroom → freq caps → gating skew → eval → max → apply       │
//! └──────┬──────────────────────┬───────────────────────┬───────────┘
//!        │                      │                       │
//! ┌──────▼──────┐        ┌──────▼──────┐         ┌──────▼──────┐
//! │ Controller  │        │ Controller  │   ...   │ Controller  │
//! │ ┌─────────┐ │        │             │         │             │
//! │ │ Meter   │ │        │             │         │             │
//! │ │ Poison  │ │        │             │         │             │
//! │ │ PI      │ │        │             │         │             │
//! │ └─────────┘ │        │             │         │             │
//! └─────────────┘        └─────────────┘         └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut desc = GroupDescriptor::new(GroupVersion::V10).sampling_period_ms(10);
//! desc.add_rail(VoltRail(0))?;
//! desc.add_controller(
//!     ControllerDescriptor::new(ControllerType::Pi10, 0, ClockDomain::Gpc, ClockDevice(0))
//!         .gains(gains)
//!         .clamp(-25_000, 50_000),
//! )?;
//!
//! let mut clvc = ClvcService::new();
//! clvc.init(&desc)?;
//! clvc.load(&mut platform, true, ClientId::Host)?;
//!
//! // From the timer task
//! clvc.poll(&mut platform)?;
//! ```
//!
//! Nothing here allocates. Every collaborator is reached through
//! [`helix_pmu_hal::Platform`].

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::new_without_default)]

#[cfg(test)]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod caps;
pub mod controller;
pub mod diag;
pub mod error;
pub mod fixed;
pub mod freq;
pub mod group;
pub mod poison;
pub mod sched;
pub mod service;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use caps::Capabilities;
pub use controller::{
    ClientId, ClientMask, Controller, ControllerConfig, ControllerDescriptor, ControllerType,
    FrequencyCaps, GroupVersion, Hysteresis, OutputClamp, PiConfig, PiGains,
};
pub use diag::{Diagnostics, Fault, FaultSite};
pub use error::{Error, Result};
pub use fixed::{Sfxp20p12, Ufxp20p12};
pub use freq::{CountedAverage, FrequencyMeter, PartitionMode, FREQ_SENTINEL_KHZ};
pub use group::{
    ControllerGroup, CycleCounters, CycleReport, GroupDescriptor, GroupSettings, Headroom,
    MAX_CONTROLLERS, MAX_RAILS,
};
pub use poison::{PoisonConfig, PoisonDetector, PoisonSources};
pub use sched::{RecurringCallback, SchedulerState, TimingMode};
pub use service::{ClvcService, SharedClvc};
pub use status::{ControllerStatus, GroupStatus};

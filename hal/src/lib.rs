//! # Helix PMU Hardware Collaborator Layer
//!
//! Types and traits through which firmware subsystems on the power-management
//! microcontroller talk to the rest of the chip.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      PMU subsystems                             │
//! │            (frequency controllers, perf, thermal)               │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                │  Platform (trait bundle)
//! ┌──────────────────────────────▼──────────────────────────────────┐
//! │                     helix-pmu-hal                               │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐ ┌───────────┐  │
//! │  │ Voltage     │ │ Clock       │ │ Thermal     │ │ Power     │  │
//! │  │ policy /    │ │ counters /  │ │ monitors    │ │ gating    │  │
//! │  │ change seq  │ │ generators  │ │             │ │           │  │
//! │  └─────────────┘ └─────────────┘ └─────────────┘ └───────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator call is bounded-time. Nothing in this crate blocks or
//! allocates.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::new_without_default)]

#[cfg(test)]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod critical;
pub mod error;
pub mod platform;
pub mod types;

pub use critical::{with_critical_section, CriticalSection};
pub use error::{HalError, Result};
pub use platform::*;
pub use types::*;

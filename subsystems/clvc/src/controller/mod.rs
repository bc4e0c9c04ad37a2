//! # Frequency Controllers
//!
//! One controller per clock domain. Each controller owns its frequency meter,
//! its poison detector and its PI state; nothing outside the controller
//! mutates them except through [`Controller::eval`] and [`Controller::reset`].
//!
//! ## Variants
//!
//! | Variant | Group version | Poison sources |
//! |---------|---------------|----------------|
//! | `PI_1_0` | 1.0 | HW failsafe, BA |
//! | `PI_2_0` | 2.0 | HW failsafe, BA, droopy |
//!
//! ## Disable votes
//!
//! Each client holds one bit of the disable mask. A controller participates
//! in evaluation only while the mask is empty.

pub mod pi;

use helix_pmu_hal::{ClockDevice, ClockDomain, ClockGenerator, Platform};

use crate::caps::Capabilities;
use crate::diag::Diagnostics;
use crate::error::{Error, Result};
use crate::freq::{FrequencyMeter, PartitionMode};
use crate::poison::{PoisonConfig, PoisonDetector, PoisonSources};

pub use pi::{Hysteresis, OutputClamp, PiConfig, PiController, PiGains};

// =============================================================================
// TYPE TAGS
// =============================================================================

/// Controller type tag as found in the host descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControllerType {
    /// PI controller, version 1.0
    Pi10 = 0x00,
    /// PI controller, version 2.0
    Pi20 = 0x01,
}

impl TryFrom<u8> for ControllerType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0x00 => Ok(Self::Pi10),
            0x01 => Ok(Self::Pi20),
            other => Err(Error::UnsupportedType(other)),
        }
    }
}

/// Version of a controller group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupVersion {
    /// Synchronous voltage-policy offsets, caps written directly
    V10,
    /// Offsets queued to the change sequencer
    V20,
}

impl ControllerType {
    /// Group version this variant belongs to
    #[inline]
    pub fn version(self) -> GroupVersion {
        match self {
            Self::Pi10 => GroupVersion::V10,
            Self::Pi20 => GroupVersion::V20,
        }
    }

    /// Poison sources this variant honors
    #[inline]
    pub fn poison_capabilities(self) -> Capabilities {
        match self {
            Self::Pi10 => Capabilities::BA_POISONING,
            Self::Pi20 => Capabilities::BA_POISONING | Capabilities::DROOPY_POISONING,
        }
    }
}

// =============================================================================
// CLIENTS
// =============================================================================

/// Party casting a disable vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientId {
    /// Host driver
    Host = 0,
    /// Voltage/frequency switch in the perf change sequencer
    VfSwitch = 1,
    /// Perf policy
    Perf = 2,
    /// Thermal policy
    Thermal = 3,
}

bitflags::bitflags! {
    /// Set of clients currently disabling a controller
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientMask: u8 {
        /// Host driver
        const HOST      = 1 << 0;
        /// VF switch
        const VF_SWITCH = 1 << 1;
        /// Perf policy
        const PERF      = 1 << 2;
        /// Thermal policy
        const THERMAL   = 1 << 3;
    }
}

impl From<ClientId> for ClientMask {
    fn from(client: ClientId) -> Self {
        Self::from_bits_truncate(1 << client as u8)
    }
}

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Static clock-generator offsets written before evaluation, MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrequencyCaps {
    /// Offset while the rail sits above its noise-unaware floor
    pub above_floor_mhz: i16,
    /// Offset while the rail sits at or below its noise-unaware floor
    pub below_floor_mhz: i16,
}

impl FrequencyCaps {
    /// Offset for the current rail position
    #[inline]
    pub fn select(self, at_or_below_floor: bool) -> i16 {
        if at_or_below_floor {
            self.below_floor_mhz
        } else {
            self.above_floor_mhz
        }
    }
}

/// Reconfigurable part of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    /// Frequency caps
    pub caps: FrequencyCaps,
    /// PI tunables
    pub pi: PiConfig,
    /// Poison thresholds
    pub poison: PoisonConfig,
}

/// Host-supplied controller entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerDescriptor {
    /// Variant
    pub controller_type: ControllerType,
    /// Host-visible controller id
    pub id: u8,
    /// Clock domain regulated
    pub domain: ClockDomain,
    /// Clock generator receiving the frequency caps
    pub device: ClockDevice,
    /// Counter selection
    pub partition_mode: PartitionMode,
    /// Tunables
    pub config: ControllerConfig,
}

impl ControllerDescriptor {
    /// Start a descriptor with default tunables
    pub fn new(
        controller_type: ControllerType,
        id: u8,
        domain: ClockDomain,
        device: ClockDevice,
    ) -> Self {
        Self {
            controller_type,
            id,
            domain,
            device,
            partition_mode: PartitionMode::Broadcast,
            config: ControllerConfig::default(),
        }
    }

    /// Start a descriptor from a raw type tag
    pub fn from_raw(tag: u8, id: u8, domain: ClockDomain, device: ClockDevice) -> Result<Self> {
        Ok(Self::new(ControllerType::try_from(tag)?, id, domain, device))
    }

    /// Set partition mode
    pub fn partition_mode(mut self, mode: PartitionMode) -> Self {
        self.partition_mode = mode;
        self
    }

    /// Set frequency caps
    pub fn caps(mut self, above_floor_mhz: i16, below_floor_mhz: i16) -> Self {
        self.config.caps = FrequencyCaps {
            above_floor_mhz,
            below_floor_mhz,
        };
        self
    }

    /// Set gains and decay
    pub fn gains(mut self, gains: PiGains) -> Self {
        self.config.pi.gains = gains;
        self
    }

    /// Set hysteresis band
    pub fn hysteresis(mut self, pos_mhz: i16, neg_mhz: i16) -> Self {
        self.config.pi.hysteresis = Hysteresis { pos_mhz, neg_mhz };
        self
    }

    /// Set output clamp
    pub fn clamp(mut self, min_uv: i32, max_uv: i32) -> Self {
        self.config.pi.clamp = OutputClamp { min_uv, max_uv };
        self
    }

    /// Set poison thresholds
    pub fn poison(mut self, poison: PoisonConfig) -> Self {
        self.config.poison = poison;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !self.partition_mode.is_valid() {
            return Err(Error::InvalidArgument);
        }
        self.config.pi.validate()
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// State shared by every controller variant
#[derive(Debug, Clone)]
pub struct ControllerCore {
    id: u8,
    domain: ClockDomain,
    device: ClockDevice,
    caps: FrequencyCaps,
    meter: FrequencyMeter,
    pi: PiController,
    poison: PoisonDetector,
    disable_mask: ClientMask,
    applied_cap_mhz: Option<i16>,
    evaluations: u32,
    resets: u32,
}

impl ControllerCore {
    fn new(desc: &ControllerDescriptor) -> Self {
        Self {
            id: desc.id,
            domain: desc.domain,
            device: desc.device,
            caps: desc.config.caps,
            meter: FrequencyMeter::new(desc.domain, desc.partition_mode),
            pi: PiController::new(desc.config.pi),
            poison: PoisonDetector::new(desc.config.poison),
            disable_mask: ClientMask::empty(),
            applied_cap_mhz: None,
            evaluations: 0,
            resets: 0,
        }
    }
}

/// Frequency controller
#[derive(Debug, Clone)]
pub enum Controller {
    /// `PI_1_0`
    Pi10(ControllerCore),
    /// `PI_2_0`
    Pi20(ControllerCore),
}

impl Controller {
    /// Build a controller from a validated descriptor
    pub fn new(desc: &ControllerDescriptor) -> Result<Self> {
        desc.validate()?;
        let core = ControllerCore::new(desc);
        Ok(match desc.controller_type {
            ControllerType::Pi10 => Self::Pi10(core),
            ControllerType::Pi20 => Self::Pi20(core),
        })
    }

    #[inline]
    fn core(&self) -> &ControllerCore {
        match self {
            Self::Pi10(core) | Self::Pi20(core) => core,
        }
    }

    #[inline]
    fn core_mut(&mut self) -> &mut ControllerCore {
        match self {
            Self::Pi10(core) | Self::Pi20(core) => core,
        }
    }

    /// Variant tag
    pub fn controller_type(&self) -> ControllerType {
        match self {
            Self::Pi10(_) => ControllerType::Pi10,
            Self::Pi20(_) => ControllerType::Pi20,
        }
    }

    /// Host-visible id
    #[inline]
    pub fn id(&self) -> u8 {
        self.core().id
    }

    /// Regulated clock domain
    #[inline]
    pub fn domain(&self) -> ClockDomain {
        self.core().domain
    }

    /// Clock generator device
    #[inline]
    pub fn device(&self) -> ClockDevice {
        self.core().device
    }

    /// Counter selection
    #[inline]
    pub fn partition_mode(&self) -> PartitionMode {
        self.core().meter.mode()
    }

    /// Clients currently disabling this controller
    #[inline]
    pub fn disable_mask(&self) -> ClientMask {
        self.core().disable_mask
    }

    /// Whether the controller takes part in evaluation
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.core().disable_mask.is_empty()
    }

    /// Whether `client` holds a disable vote
    #[inline]
    pub fn is_disabled_by(&self, client: ClientId) -> bool {
        self.core().disable_mask.contains(client.into())
    }

    /// Last output, µV
    #[inline]
    pub fn output_uv(&self) -> i32 {
        self.core().pi.output_uv()
    }

    /// PI state
    #[inline]
    pub fn pi(&self) -> &PiController {
        &self.core().pi
    }

    /// Poison detector state
    #[inline]
    pub fn poison(&self) -> &PoisonDetector {
        &self.core().poison
    }

    /// Cap most recently written or confirmed, MHz
    #[inline]
    pub fn applied_cap_mhz(&self) -> Option<i16> {
        self.core().applied_cap_mhz
    }

    /// Completed evaluations
    #[inline]
    pub fn evaluations(&self) -> u32 {
        self.core().evaluations
    }

    /// Resets since init
    #[inline]
    pub fn resets(&self) -> u32 {
        self.core().resets
    }

    /// Current tunables
    pub fn config(&self) -> ControllerConfig {
        let core = self.core();
        ControllerConfig {
            caps: core.caps,
            pi: *core.pi.config(),
            poison: *core.poison.config(),
        }
    }

    /// Replace tunables
    ///
    /// Identity fields (variant, id, domain, device, partition mode) are
    /// fixed at init.
    pub fn reconfigure(&mut self, desc: &ControllerDescriptor) -> Result<()> {
        if desc.controller_type != self.controller_type()
            || desc.id != self.id()
            || desc.domain != self.domain()
            || desc.device != self.device()
            || desc.partition_mode != self.partition_mode()
        {
            return Err(Error::InvalidArgument);
        }
        desc.validate()?;

        let core = self.core_mut();
        core.caps = desc.config.caps;
        core.pi.set_config(desc.config.pi);
        core.poison.set_config(desc.config.poison);
        Ok(())
    }

    /// Cast or release a disable vote
    ///
    /// Returns `true` when the mask went from non-empty to empty.
    pub fn vote(&mut self, client: ClientId, disable: bool) -> bool {
        let core = self.core_mut();
        let was_blocked = !core.disable_mask.is_empty();
        core.disable_mask.set(client.into(), disable);
        was_blocked && core.disable_mask.is_empty()
    }

    /// Write this controller's frequency cap if it differs from the device
    ///
    /// Returns `true` when the register was written.
    pub fn apply_cap<G>(&mut self, generator: &mut G, at_or_below_floor: bool) -> Result<bool>
    where
        G: ClockGenerator + ?Sized,
    {
        let core = self.core_mut();
        let cap = core.caps.select(at_or_below_floor);
        let current = generator.frequency_offset_mhz(core.device)?;
        let written = current != cap;
        if written {
            generator.set_frequency_offset_mhz(core.device, cap)?;
            log::debug!("clvc: ctrl {} cap {} -> {} MHz", core.id, current, cap);
        }
        core.applied_cap_mhz = Some(cap);
        Ok(written)
    }

    /// Measure, check poisoning and run the control law
    ///
    /// Returns the output to aggregate. `index` names the controller in
    /// diagnostics.
    pub fn eval<P>(
        &mut self,
        platform: &P,
        caps: Capabilities,
        diag: &mut Diagnostics,
        index: u8,
    ) -> Result<i32>
    where
        P: Platform + ?Sized,
    {
        let poison_caps = caps & self.controller_type().poison_capabilities();
        let core = self.core_mut();

        let target_khz = platform
            .target_frequency_khz(core.domain)
            .map_err(|_| Error::InvalidState)?;
        let measured_khz = core.meter.measure(platform, target_khz)?;
        let sources = core.poison.check(platform, poison_caps, diag, index)?;

        let output = core.pi.update(target_khz, measured_khz, !sources.is_empty());
        core.evaluations = core.evaluations.wrapping_add(1);

        log::debug!(
            "clvc: ctrl {} target {} kHz measured {:?} kHz poison {:?} -> {} uV",
            core.id,
            target_khz,
            measured_khz,
            sources,
            output
        );
        Ok(output)
    }

    /// Throw away the window that ends now, leaving the control law untouched
    ///
    /// Frequency and poison windows both restart at the current counters, so
    /// the next evaluation only sees time after this call.
    pub fn rebaseline<P>(&mut self, platform: &P, caps: Capabilities) -> Result<()>
    where
        P: Platform + ?Sized,
    {
        let poison_caps = caps & self.controller_type().poison_capabilities();
        let core = self.core_mut();

        let target_khz = platform
            .target_frequency_khz(core.domain)
            .map_err(|_| Error::InvalidState)?;
        core.meter.restart(platform, target_khz)?;
        core.poison.restart(platform, poison_caps)?;
        log::debug!("clvc: ctrl {} window dropped", core.id);
        Ok(())
    }

    /// Restart the averaging window at a new target
    pub fn retarget<P>(&mut self, platform: &P, target_khz: u32) -> Result<()>
    where
        P: Platform + ?Sized,
    {
        let core = self.core_mut();
        core.meter.retarget(platform, target_khz)
    }

    /// Zero PI and poison state and forget cached samples
    pub fn reset(&mut self) {
        let core = self.core_mut();
        core.pi.reset();
        core.poison.reset();
        core.meter.clear();
        core.resets = core.resets.wrapping_add(1);
        log::debug!("clvc: ctrl {} reset", core.id);
    }

    /// Sources that poisoned the last evaluation
    #[inline]
    pub fn last_poison(&self) -> PoisonSources {
        self.core().poison.last_sources()
    }
}

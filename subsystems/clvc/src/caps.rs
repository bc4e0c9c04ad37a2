//! # Build Capabilities
//!
//! Optional behaviors selected when the firmware image is built. A group
//! descriptor can narrow them at init; it can never switch on something the
//! image was built without.

bitflags::bitflags! {
    /// Optional controller behaviors
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Bus-agent (BA) engagement may poison samples
        const BA_POISONING     = 1 << 0;
        /// Droopy VR engagement may poison samples
        const DROOPY_POISONING = 1 << 1;
        /// Integrator continuity across VF switches
        const CONTINUOUS_MODE  = 1 << 2;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "ba-poisoning")] {
        const BUILD_BA: u32 = Capabilities::BA_POISONING.bits();
    } else {
        const BUILD_BA: u32 = 0;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "droopy-poisoning")] {
        const BUILD_DROOPY: u32 = Capabilities::DROOPY_POISONING.bits();
    } else {
        const BUILD_DROOPY: u32 = 0;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "continuous-mode")] {
        const BUILD_CONTINUOUS: u32 = Capabilities::CONTINUOUS_MODE.bits();
    } else {
        const BUILD_CONTINUOUS: u32 = 0;
    }
}

impl Capabilities {
    /// Capabilities compiled into this image
    pub const BUILD: Capabilities =
        Capabilities::from_bits_truncate(BUILD_BA | BUILD_DROOPY | BUILD_CONTINUOUS);

    /// Narrow a requested set to what the image supports
    #[inline]
    pub fn supported(requested: Capabilities) -> Capabilities {
        requested & Self::BUILD
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::BUILD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_narrowed() {
        let narrowed = Capabilities::supported(Capabilities::all());
        assert_eq!(narrowed, Capabilities::BUILD);
        assert!(Capabilities::supported(Capabilities::empty()).is_empty());
    }

    #[cfg(all(feature = "ba-poisoning", feature = "droopy-poisoning", feature = "continuous-mode"))]
    #[test]
    fn test_default_build_has_everything() {
        assert_eq!(Capabilities::BUILD, Capabilities::all());
    }
}

//! # PI Control Law
//!
//! ```text
//!   e      = (target - measured) / 1000                 MHz, S20.12
//!   e      = prev           if hysteresis freezes it
//!   I      = I * decay + e                              decay then add
//!   ΔV     = Kp * e + Ki * I                            µV
//!   out    = clamp(floor(ΔV), min, max)
//!   prev   = e
//! ```
//!
//! A poisoned window keeps `I`, `prev` and `out` untouched. A window without
//! a measurement (sentinel) changes nothing at all.

use crate::error::{Error, Result};
use crate::fixed::Sfxp20p12;

/// Proportional / integral gains and integral decay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiGains {
    /// Proportional gain, µV per MHz
    pub prop: Sfxp20p12,
    /// Integral gain, µV per MHz
    pub integ: Sfxp20p12,
    /// Integral decay applied before each accumulation
    pub decay: Sfxp20p12,
}

impl Default for PiGains {
    fn default() -> Self {
        Self {
            prop: Sfxp20p12::ZERO,
            integ: Sfxp20p12::ZERO,
            decay: Sfxp20p12::ONE,
        }
    }
}

/// Error hysteresis band, MHz
///
/// Both bounds zero disables the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hysteresis {
    /// Largest upward error change that is ignored (`>= 0`)
    pub pos_mhz: i16,
    /// Largest downward error change that is ignored (`<= 0`)
    pub neg_mhz: i16,
}

impl Hysteresis {
    /// Whether the bounds have the right signs
    #[inline]
    pub fn is_valid(self) -> bool {
        self.pos_mhz >= 0 && self.neg_mhz <= 0
    }

    #[inline]
    fn is_disabled(self) -> bool {
        self.pos_mhz == 0 && self.neg_mhz == 0
    }

    /// Whether a change of `diff` lies inside the band
    fn contains(self, diff: Sfxp20p12) -> bool {
        if diff.raw() >= 0 {
            diff <= Sfxp20p12::from_int(self.pos_mhz as i32)
        } else {
            diff >= Sfxp20p12::from_int(self.neg_mhz as i32)
        }
    }
}

/// Output clamp range, µV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputClamp {
    /// Lowest output
    pub min_uv: i32,
    /// Highest output
    pub max_uv: i32,
}

impl OutputClamp {
    /// Whether `min <= max`
    #[inline]
    pub fn is_valid(self) -> bool {
        self.min_uv <= self.max_uv
    }

    #[inline]
    fn apply(self, v: i32) -> i32 {
        v.clamp(self.min_uv, self.max_uv)
    }
}

/// Tunables of one PI controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PiConfig {
    /// Gains and decay
    pub gains: PiGains,
    /// Error hysteresis
    pub hysteresis: Hysteresis,
    /// Output range
    pub clamp: OutputClamp,
}

impl PiConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !self.hysteresis.is_valid() || !self.clamp.is_valid() {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// PI controller state
#[derive(Debug, Clone)]
pub struct PiController {
    config: PiConfig,
    integral: Sfxp20p12,
    prev_error_mhz: Sfxp20p12,
    error_khz: i32,
    output_uv: i32,
}

impl PiController {
    /// Create a controller at rest
    pub fn new(config: PiConfig) -> Self {
        Self {
            config,
            integral: Sfxp20p12::ZERO,
            prev_error_mhz: Sfxp20p12::ZERO,
            error_khz: 0,
            output_uv: 0,
        }
    }

    /// Tunables in use
    #[inline]
    pub fn config(&self) -> &PiConfig {
        &self.config
    }

    /// Replace tunables; the output is pulled into the new clamp range
    pub fn set_config(&mut self, config: PiConfig) {
        self.config = config;
        self.output_uv = config.clamp.apply(self.output_uv);
    }

    /// Last output, µV
    #[inline]
    pub fn output_uv(&self) -> i32 {
        self.output_uv
    }

    /// Last raw error, kHz
    #[inline]
    pub fn error_khz(&self) -> i32 {
        self.error_khz
    }

    /// Error carried into the next cycle, MHz
    #[inline]
    pub fn prev_error_mhz(&self) -> Sfxp20p12 {
        self.prev_error_mhz
    }

    /// Integral accumulator
    #[inline]
    pub fn integral(&self) -> Sfxp20p12 {
        self.integral
    }

    /// Run one control step
    ///
    /// `measured_khz` is `None` when no averaging window exists. Returns the
    /// output to aggregate.
    pub fn update(&mut self, target_khz: u32, measured_khz: Option<u32>, poisoned: bool) -> i32 {
        let Some(measured_khz) = measured_khz else {
            return self.output_uv;
        };

        let diff_khz = target_khz as i64 - measured_khz as i64;
        self.error_khz = diff_khz.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        if poisoned {
            return self.output_uv;
        }

        let error_mhz = self.filter(Sfxp20p12::from_ratio(diff_khz, 1000).unwrap_or_default());

        let gains = self.config.gains;
        self.integral = self.integral.mul(gains.decay).saturating_add(error_mhz);
        let candidate = gains
            .prop
            .mul(error_mhz)
            .saturating_add(gains.integ.mul(self.integral));
        self.output_uv = self.config.clamp.apply(candidate.to_int());
        self.prev_error_mhz = error_mhz;
        self.output_uv
    }

    /// Apply hysteresis against the previous error
    fn filter(&self, error_mhz: Sfxp20p12) -> Sfxp20p12 {
        let band = self.config.hysteresis;
        if band.is_disabled() {
            return error_mhz;
        }
        let prev = self.prev_error_mhz;
        let same_sign = error_mhz.signum() != 0 && error_mhz.signum() == prev.signum();
        if same_sign && band.contains(error_mhz.saturating_sub(prev)) {
            prev
        } else {
            error_mhz
        }
    }

    /// Zero all dynamic state
    pub fn reset(&mut self) {
        self.integral = Sfxp20p12::ZERO;
        self.prev_error_mhz = Sfxp20p12::ZERO;
        self.error_khz = 0;
        self.output_uv = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unity(band: i16) -> PiController {
        PiController::new(PiConfig {
            gains: PiGains {
                prop: Sfxp20p12::ONE,
                integ: Sfxp20p12::ZERO,
                decay: Sfxp20p12::ONE,
            },
            hysteresis: Hysteresis {
                pos_mhz: band,
                neg_mhz: -band,
            },
            clamp: OutputClamp {
                min_uv: -1000,
                max_uv: 1000,
            },
        })
    }

    #[test]
    fn test_hysteresis_freezes_small_change() {
        let mut pi = unity(1);
        pi.update(1_003_000, Some(1_000_000), false);
        assert_eq!(pi.prev_error_mhz(), Sfxp20p12::from_int(3));

        pi.update(1_003_400, Some(1_000_000), false);
        assert_eq!(pi.prev_error_mhz(), Sfxp20p12::from_int(3));
        assert_eq!(pi.output_uv(), 3);
        assert_eq!(pi.error_khz(), 3400);
    }

    #[test]
    fn test_hysteresis_passes_large_change() {
        let mut pi = unity(1);
        pi.update(1_003_000, Some(1_000_000), false);
        pi.update(1_005_000, Some(1_000_000), false);
        assert_eq!(pi.prev_error_mhz(), Sfxp20p12::from_int(5));
    }

    #[test]
    fn test_hysteresis_ignores_sign_change() {
        let mut pi = unity(10);
        pi.update(1_003_000, Some(1_000_000), false);
        pi.update(1_000_000, Some(1_002_000), false);
        assert_eq!(pi.prev_error_mhz(), Sfxp20p12::from_int(-2));
    }

    #[test]
    fn test_disabled_band() {
        let mut pi = unity(0);
        pi.update(1_003_000, Some(1_000_000), false);
        pi.update(1_003_400, Some(1_000_000), false);
        assert_ne!(pi.prev_error_mhz(), Sfxp20p12::from_int(3));
    }

    #[test]
    fn test_integral_decay_then_add() {
        let mut pi = PiController::new(PiConfig {
            gains: PiGains {
                prop: Sfxp20p12::ZERO,
                integ: Sfxp20p12::from_int(10),
                decay: Sfxp20p12::from_raw(2048), // 0.5
            },
            hysteresis: Hysteresis::default(),
            clamp: OutputClamp {
                min_uv: -10_000,
                max_uv: 10_000,
            },
        });
        // I = 0 * 0.5 + 4 = 4 -> 40 µV
        assert_eq!(pi.update(1_004_000, Some(1_000_000), false), 40);
        // I = 4 * 0.5 + 4 = 6 -> 60 µV
        assert_eq!(pi.update(1_004_000, Some(1_000_000), false), 60);
        assert_eq!(pi.integral(), Sfxp20p12::from_int(6));
    }

    #[test]
    fn test_output_clamped() {
        let mut pi = unity(0);
        assert_eq!(pi.update(3_000_000, Some(1_000_000), false), 1000);
        assert_eq!(pi.update(1_000_000, Some(3_000_000), false), -1000);
    }

    #[test]
    fn test_poisoned_window_freezes() {
        let mut pi = PiController::new(PiConfig {
            gains: PiGains {
                prop: Sfxp20p12::ONE,
                integ: Sfxp20p12::ONE,
                decay: Sfxp20p12::ONE,
            },
            hysteresis: Hysteresis::default(),
            clamp: OutputClamp {
                min_uv: -1000,
                max_uv: 1000,
            },
        });
        let first = pi.update(1_002_000, Some(1_000_000), false);
        let integral = pi.integral();
        let prev = pi.prev_error_mhz();

        assert_eq!(pi.update(1_050_000, Some(1_000_000), true), first);
        assert_eq!(pi.integral(), integral);
        assert_eq!(pi.prev_error_mhz(), prev);
        assert_eq!(pi.error_khz(), 50_000);
    }

    #[test]
    fn test_sentinel_is_noop() {
        let mut pi = unity(0);
        pi.update(1_002_000, Some(1_000_000), false);
        assert_eq!(pi.update(1_900_000, None, false), 2);
        assert_eq!(pi.error_khz(), 2000);
    }

    #[test]
    fn test_reset_and_reconfigure() {
        let mut pi = unity(0);
        pi.update(1_500_000, Some(1_000_000), false);
        assert_eq!(pi.output_uv(), 500);

        let mut cfg = *pi.config();
        cfg.clamp.max_uv = 100;
        pi.set_config(cfg);
        assert_eq!(pi.output_uv(), 100);

        pi.reset();
        assert_eq!(pi.output_uv(), 0);
        assert_eq!(pi.integral(), Sfxp20p12::ZERO);
        assert_eq!(pi.prev_error_mhz(), Sfxp20p12::ZERO);
        assert_eq!(pi.config().clamp.max_uv, 100);
    }

    #[test]
    fn test_config_validation() {
        let mut cfg = PiConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.hysteresis.pos_mhz = -1;
        assert_eq!(cfg.validate(), Err(Error::InvalidArgument));
        cfg.hysteresis.pos_mhz = 1;
        cfg.clamp = OutputClamp {
            min_uv: 10,
            max_uv: -10,
        };
        assert_eq!(cfg.validate(), Err(Error::InvalidArgument));
    }
}

//! # Fixed-Point Arithmetic
//!
//! Radix-12 fixed-point types used by the control law and the poison ratios.
//!
//! ```text
//!   Sfxp20p12:  s iiiiiiiiiiiiiiiiiii ffffffffffff    (i32, 19 int + sign, 12 frac)
//!   Ufxp20p12:    iiiiiiiiiiiiiiiiiiii ffffffffffff   (u32, 20 int, 12 frac)
//! ```
//!
//! All operations saturate instead of wrapping. Multiplication widens to 64
//! bits and shifts right arithmetically, so products round toward negative
//! infinity. Division truncates toward zero. Loop stability depends on these
//! exact rules.

use core::fmt;

use static_assertions::const_assert;

/// Fractional bits of every fixed-point value in this crate
pub const FRAC_BITS: u32 = 12;

const_assert!(FRAC_BITS == 12);

const ONE_RAW: i32 = 1 << FRAC_BITS;

#[inline]
const fn saturate_i32(v: i64) -> i32 {
    if v > i32::MAX as i64 {
        i32::MAX
    } else if v < i32::MIN as i64 {
        i32::MIN
    } else {
        v as i32
    }
}

#[inline]
const fn saturate_u32(v: u64) -> u32 {
    if v > u32::MAX as u64 {
        u32::MAX
    } else {
        v as u32
    }
}

// =============================================================================
// SIGNED 20.12
// =============================================================================

/// Signed fixed-point value with 12 fractional bits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Sfxp20p12(i32);

impl Sfxp20p12 {
    /// 0.0
    pub const ZERO: Self = Self(0);
    /// 1.0
    pub const ONE: Self = Self(ONE_RAW);
    /// Largest representable value
    pub const MAX: Self = Self(i32::MAX);
    /// Smallest representable value
    pub const MIN: Self = Self(i32::MIN);

    /// Wrap a raw register value
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw register value
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert an integer, saturating
    #[inline]
    pub const fn from_int(v: i32) -> Self {
        Self(saturate_i32((v as i64) << FRAC_BITS))
    }

    /// `num / den` as fixed point, truncating toward zero
    ///
    /// Returns `None` for a zero denominator.
    pub const fn from_ratio(num: i64, den: i64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let q = ((num as i128) << FRAC_BITS) / den as i128;
        let clamped = if q > i32::MAX as i128 {
            i32::MAX
        } else if q < i32::MIN as i128 {
            i32::MIN
        } else {
            q as i32
        };
        Some(Self(clamped))
    }

    /// Fixed-point product, saturating
    #[inline]
    pub const fn mul(self, rhs: Self) -> Self {
        Self(saturate_i32(((self.0 as i64) * (rhs.0 as i64)) >> FRAC_BITS))
    }

    /// Saturating sum
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating difference
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Absolute value, saturating at `MAX`
    #[inline]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// -1, 0 or +1
    #[inline]
    pub const fn signum(self) -> i32 {
        self.0.signum()
    }

    /// Integer part, rounding toward negative infinity
    #[inline]
    pub const fn to_int(self) -> i32 {
        self.0 >> FRAC_BITS
    }
}

impl fmt::Debug for Sfxp20p12 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let milli = ((self.0 as i64) * 1000) >> FRAC_BITS;
        let sign = if milli < 0 { "-" } else { "" };
        let milli = milli.unsigned_abs();
        write!(f, "Sfxp20p12({}{}.{:03})", sign, milli / 1000, milli % 1000)
    }
}

// =============================================================================
// UNSIGNED 20.12
// =============================================================================

/// Unsigned fixed-point value with 12 fractional bits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Ufxp20p12(u32);

impl Ufxp20p12 {
    /// 0.0
    pub const ZERO: Self = Self(0);
    /// 1.0
    pub const ONE: Self = Self(ONE_RAW as u32);

    /// Wrap a raw register value
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw register value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// `num / den` as fixed point, truncating
    ///
    /// Returns `None` for a zero denominator.
    pub const fn from_ratio(num: u64, den: u64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let q = ((num as u128) << FRAC_BITS) / den as u128;
        let clamped = if q > u32::MAX as u128 { u32::MAX } else { q as u32 };
        Some(Self(clamped))
    }

    /// Fraction equal to `pct` percent, truncating
    #[inline]
    pub const fn from_percent(pct: u32) -> Self {
        Self(saturate_u32(((pct as u64) << FRAC_BITS) / 100))
    }
}

impl fmt::Debug for Ufxp20p12 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let milli = ((self.0 as u64) * 1000) >> FRAC_BITS;
        write!(f, "Ufxp20p12({}.{:03})", milli / 1000, milli % 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_int_and_back() {
        assert_eq!(Sfxp20p12::from_int(3).raw(), 3 << 12);
        assert_eq!(Sfxp20p12::from_int(-7).to_int(), -7);
        assert_eq!(Sfxp20p12::from_int(i32::MAX), Sfxp20p12::MAX);
    }

    #[test]
    fn test_ratio_truncates_toward_zero() {
        // 3.4 MHz expressed from kHz
        let v = Sfxp20p12::from_ratio(3400, 1000).unwrap();
        assert_eq!(v.raw(), (3400i64 * 4096 / 1000) as i32);
        let n = Sfxp20p12::from_ratio(-3400, 1000).unwrap();
        assert_eq!(n.raw(), -v.raw());
        assert!(Sfxp20p12::from_ratio(1, 0).is_none());
    }

    #[test]
    fn test_mul_rounds_toward_negative_infinity() {
        let half = Sfxp20p12::from_raw(ONE_RAW / 2);
        let tiny = Sfxp20p12::from_raw(1);
        assert_eq!(tiny.mul(half).raw(), 0);
        assert_eq!(Sfxp20p12::from_raw(-1).mul(half).raw(), -1);
        assert_eq!(Sfxp20p12::from_int(6).mul(half), Sfxp20p12::from_int(3));
    }

    #[test]
    fn test_saturation() {
        assert_eq!(
            Sfxp20p12::MAX.saturating_add(Sfxp20p12::ONE),
            Sfxp20p12::MAX
        );
        assert_eq!(
            Sfxp20p12::MIN.saturating_sub(Sfxp20p12::ONE),
            Sfxp20p12::MIN
        );
        assert_eq!(Sfxp20p12::MAX.mul(Sfxp20p12::from_int(2)), Sfxp20p12::MAX);
        assert_eq!(Sfxp20p12::MIN.abs(), Sfxp20p12::MAX);
    }

    #[test]
    fn test_unsigned_ratio() {
        let r = Ufxp20p12::from_ratio(15, 100).unwrap();
        assert_eq!(r.raw(), (15u64 << 12) as u32 / 100);
        assert!(r > Ufxp20p12::from_percent(10));
        assert!(Ufxp20p12::from_ratio(1, 0).is_none());
        assert_eq!(Ufxp20p12::from_ratio(1, 1).unwrap(), Ufxp20p12::ONE);
    }

    #[test]
    fn test_to_int_floors() {
        assert_eq!(Sfxp20p12::from_raw(-1).to_int(), -1);
        assert_eq!(Sfxp20p12::from_raw(ONE_RAW - 1).to_int(), 0);
    }
}

//! Fixed-point helpers shared by the echo canceller.
//!
//! Normalization counts, saturating arithmetic and the divisions used by the
//! Q-domain bookkeeping. Division by zero returns the type maximum instead
//! of panicking, which the callers rely on.

/// Left shifts needed to normalize an unsigned 32-bit value (0 for 0).
#[inline]
pub(crate) fn norm_u32(a: u32) -> i16 {
    if a == 0 { 0 } else { a.leading_zeros() as i16 }
}

/// Left shifts needed to normalize a signed 32-bit value (0 for 0).
#[inline]
pub(crate) fn norm_w32(a: i32) -> i16 {
    if a == 0 {
        return 0;
    }
    let a = if a < 0 { !a } else { a };
    a.leading_zeros() as i16 - 1
}

/// Left shifts needed to normalize a signed 16-bit value (0 for 0).
#[inline]
pub(crate) fn norm_w16(a: i16) -> i16 {
    if a == 0 {
        return 0;
    }
    let a = if a < 0 { !a } else { a };
    (a as u16 as u32).leading_zeros() as i16 - 17
}

/// Shifts left for positive `shift`, arithmetic right for negative.
#[inline]
pub(crate) fn shift_w32(value: i32, shift: i16) -> i32 {
    if shift >= 0 {
        value.wrapping_shl(shift as u32)
    } else {
        value >> (-shift).min(31)
    }
}

/// Unsigned counterpart of [`shift_w32`].
#[inline]
pub(crate) fn shift_u32(value: u32, shift: i16) -> u32 {
    if shift >= 0 {
        value.wrapping_shl(shift as u32)
    } else {
        value >> (-shift).min(31)
    }
}

/// `num / den`, or `i32::MAX` when `den` is zero.
#[inline]
pub(crate) fn div_w32_w16(num: i32, den: i16) -> i32 {
    if den == 0 { i32::MAX } else { num / i32::from(den) }
}

/// `num / den`, or `u32::MAX` when `den` is zero.
#[inline]
pub(crate) fn div_u32_u16(num: u32, den: u16) -> u32 {
    if den == 0 { u32::MAX } else { num / u32::from(den) }
}

/// Largest `r` with `r * r <= value` (0 for non-positive input).
#[inline]
pub(crate) fn sqrt_floor(value: i32) -> i32 {
    if value <= 0 { 0 } else { (value as u32).isqrt() as i32 }
}

/// `(a * b + 2^(shift - 1)) >> shift`.
#[inline]
pub(crate) fn mul_16_16_rshift_round(a: i16, b: i16, shift: u32) -> i32 {
    (i32::from(a) * i32::from(b) + (1 << (shift - 1))) >> shift
}

#[inline]
pub(crate) fn add_sat_w32(a: i32, b: i32) -> i32 {
    a.saturating_add(b)
}

/// Saturates a 32-bit value into the 16-bit range.
#[inline]
pub(crate) fn sat_w16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Largest absolute value in `x`, saturated to `i16::MAX`.
pub(crate) fn max_abs_w16(x: &[i16]) -> i16 {
    x.iter()
        .map(|&v| v.unsigned_abs())
        .max()
        .map_or(0, |m| m.min(i16::MAX as u16) as i16)
}

/// Uniform pseudo-random generator on `[0, 2^15)`.
///
/// A 31-bit linear congruential generator; the seed is owned by the caller
/// so that every echo canceller instance has its own sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lcg {
    seed: u32,
}

impl Lcg {
    pub(crate) const fn new(seed: u32) -> Self {
        Self { seed }
    }

    #[inline]
    pub(crate) fn next_u15(&mut self) -> i16 {
        self.seed = self.seed.wrapping_mul(69069).wrapping_add(1) & 0x7FFF_FFFF;
        (self.seed >> 16) as i16
    }

    /// Fills `out` with consecutive draws.
    pub(crate) fn fill(&mut self, out: &mut [i16]) {
        for v in out {
            *v = self.next_u15();
        }
    }
}

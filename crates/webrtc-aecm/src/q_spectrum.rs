//! Magnitude spectra tagged with their fixed-point exponent.

use crate::common::PART_LEN1;

/// A block magnitude spectrum in Q(`q`).
///
/// The exponent changes per block with the signal level, so the magnitudes
/// are only meaningful together with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QSpectrum {
    pub(crate) magnitude: [u16; PART_LEN1],
    pub(crate) q: i16,
}

impl Default for QSpectrum {
    fn default() -> Self {
        Self {
            magnitude: [0; PART_LEN1],
            q: 0,
        }
    }
}

impl QSpectrum {
    /// Sum of all bin magnitudes, wrapping at 32 bits.
    pub(crate) fn sum(&self) -> u32 {
        self.magnitude
            .iter()
            .fold(0u32, |acc, &m| acc.wrapping_add(u32::from(m)))
    }
}

/// Log2 of `energy` (given in Q(`q`)) in Q8.
///
/// Zero energy maps to the floor `7 << 7`.
pub(crate) fn log_energy_q8(energy: u32, q: i16) -> i16 {
    const LOG_LOW_VALUE: i16 = crate::common::PART_LEN_SHIFT << 7;
    if energy == 0 {
        return LOG_LOW_VALUE;
    }
    let zeros = crate::fixed_math::norm_u32(energy);
    let frac = ((energy.wrapping_shl(zeros as u32) & 0x7FFF_FFFF) >> 23) as i16;
    LOG_LOW_VALUE
        .wrapping_add((31 - zeros) << 8)
        .wrapping_add(frac)
        .wrapping_sub(q << 8)
}

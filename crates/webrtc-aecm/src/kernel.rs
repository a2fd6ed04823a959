//! Per-bin inner loops over the channel estimates.
//!
//! These are the hot loops of every block. They are expressed in terms of the
//! [`SimdBackend`] operations so that the vectorized variants are selected
//! once and produce bit-identical results to the scalar reference.

use webrtc_simd::SimdBackend;

use crate::{channel::EchoChannels, common::PART_LEN1};

/// Linear (not log) energies of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LinearEnergies {
    /// Sum of the aligned far-end magnitudes.
    pub(crate) far: u32,
    /// Echo magnitude sum predicted by the adaptive channel.
    pub(crate) echo_adapt: u32,
    /// Echo magnitude sum predicted by the stored channel.
    pub(crate) echo_stored: u32,
}

/// Computes the per-bin echo estimate through the stored channel and the
/// block energies needed for the log-energy trackers.
pub(crate) fn calc_linear_energies(
    backend: SimdBackend,
    channels: &EchoChannels,
    far: &[u16; PART_LEN1],
    echo_est: &mut [i32; PART_LEN1],
) -> LinearEnergies {
    backend.multiply_i16_u16(&channels.stored, far, echo_est);
    LinearEnergies {
        far: backend.sum_u16(far),
        echo_adapt: backend.dot_i16_u16(&channels.adapt16, far),
        echo_stored: backend.sum_i32_wrapping(echo_est),
    }
}

/// Copies the adaptive channel into the stored one and recomputes the
/// echo estimate with it.
pub(crate) fn store_adaptive_channel(
    backend: SimdBackend,
    channels: &mut EchoChannels,
    far: &[u16; PART_LEN1],
    echo_est: &mut [i32; PART_LEN1],
) {
    channels.stored = channels.adapt16;
    backend.multiply_i16_u16(&channels.stored, far, echo_est);
}

/// Restores both adaptive channels from the stored one.
pub(crate) fn reset_adaptive_channel(backend: SimdBackend, channels: &mut EchoChannels) {
    channels.adapt16 = channels.stored;
    backend.widen_shl16(&channels.stored, &mut channels.adapt32);
}

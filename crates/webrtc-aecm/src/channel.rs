//! Echo path estimation.
//!
//! Two estimates of the per-bin echo path are kept. The adaptive channel is
//! updated every active block with a variable-step NLMS rule; the stored
//! channel is the one used for suppression. They are compared on how well
//! their predicted echo energy matches the near end, and the better one
//! replaces the other once the difference is clear for two validation
//! windows in a row.

use tracing::trace;
use webrtc_simd::SimdBackend;

use crate::{
    common::{
        CHANNEL_VAD, MIN_MSE_COUNT, MIN_MSE_DIFF, MSE_RESOLUTION, PART_LEN1, RESOLUTION_CHANNEL32,
    },
    energy::{EnergyTracker, StartupPhase},
    fixed_math::{add_sat_w32, div_w32_w16, norm_u32, norm_w32, shift_u32, shift_w32},
    kernel,
    q_spectrum::QSpectrum,
};

/// Stored and adaptive echo path estimates, Q12 per bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EchoChannels {
    pub(crate) stored: [i16; PART_LEN1],
    /// 16-bit mirror of `adapt32`, used for the echo energy estimate.
    pub(crate) adapt16: [i16; PART_LEN1],
    /// Adaptive channel master copy in Q28.
    pub(crate) adapt32: [i32; PART_LEN1],
}

impl Default for EchoChannels {
    fn default() -> Self {
        Self {
            stored: [0; PART_LEN1],
            adapt16: [0; PART_LEN1],
            adapt32: [0; PART_LEN1],
        }
    }
}

impl EchoChannels {
    pub(crate) fn from_echo_path(path: &[i16; PART_LEN1]) -> Self {
        Self {
            stored: *path,
            adapt16: *path,
            adapt32: path.map(|c| i32::from(c) << 16),
        }
    }
}

/// Validation window bookkeeping for channel promotion.
#[derive(Debug, Clone)]
struct MseTracker {
    count: usize,
    stored_old: i32,
    adapt_old: i32,
    threshold: i32,
}

impl Default for MseTracker {
    fn default() -> Self {
        Self {
            count: 0,
            stored_old: 1000,
            adapt_old: 1000,
            threshold: i32::MAX,
        }
    }
}

/// Both channels plus the state deciding when to store or reset.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelEstimator {
    pub(crate) channels: EchoChannels,
    mse: MseTracker,
}

impl ChannelEstimator {
    pub(crate) fn new(echo_path: &[i16; PART_LEN1]) -> Self {
        Self {
            channels: EchoChannels::from_echo_path(echo_path),
            mse: MseTracker::default(),
        }
    }

    /// Replaces both channels and restarts validation.
    pub(crate) fn init_echo_path(&mut self, echo_path: &[i16; PART_LEN1]) {
        *self = Self::new(echo_path);
    }

    /// Runs the NLMS update and the store/reset decision for one block.
    ///
    /// `far` is the delay-aligned far-end spectrum, `near` the noisy near-end
    /// magnitudes in Q(`near_q`) and `mu` the step size from
    /// [`EnergyTracker::step_size`]. `echo_est` is refreshed when the stored
    /// channel changes.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update(
        &mut self,
        backend: SimdBackend,
        energy: &EnergyTracker,
        phase: StartupPhase,
        far: &QSpectrum,
        near: &[u16; PART_LEN1],
        near_q: i16,
        mu: i16,
        echo_est: &mut [i32; PART_LEN1],
    ) {
        if mu != 0 {
            self.adapt(far, near, near_q, mu);
        }

        if phase == StartupPhase::Initial && energy.vad {
            kernel::store_adaptive_channel(backend, &mut self.channels, &far.magnitude, echo_est);
            return;
        }

        if energy.far_log < energy.far_mse {
            self.mse.count = 0;
        } else {
            self.mse.count += 1;
        }
        if self.mse.count < MIN_MSE_COUNT + 10 {
            return;
        }

        // Mean absolute log-energy error of each channel over the newest
        // MIN_MSE_COUNT blocks.
        let mut mse_stored = 0i32;
        let mut mse_adapt = 0i32;
        for i in 0..MIN_MSE_COUNT {
            let near_log = i32::from(energy.near_log[i]);
            mse_stored += (i32::from(energy.echo_stored_log[i]) - near_log).abs();
            mse_adapt += (i32::from(energy.echo_adapt_log[i]) - near_log).abs();
        }

        let stored_clearly_better = (mse_stored << MSE_RESOLUTION) < MIN_MSE_DIFF * mse_adapt
            && (self.mse.stored_old << MSE_RESOLUTION) < MIN_MSE_DIFF * self.mse.adapt_old;
        let adapt_clearly_better = MIN_MSE_DIFF * mse_stored > (mse_adapt << MSE_RESOLUTION)
            && mse_adapt < self.mse.threshold
            && self.mse.adapt_old < self.mse.threshold;

        if stored_clearly_better {
            trace!(mse_stored, mse_adapt, "reset adaptive channel");
            kernel::reset_adaptive_channel(backend, &mut self.channels);
        } else if adapt_clearly_better {
            trace!(mse_stored, mse_adapt, "store adaptive channel");
            kernel::store_adaptive_channel(backend, &mut self.channels, &far.magnitude, echo_est);
            if self.mse.threshold == i32::MAX {
                self.mse.threshold = mse_adapt + self.mse.adapt_old;
            } else {
                let scaled = self.mse.threshold * 5 / 8;
                self.mse.threshold += ((mse_adapt - scaled) * 205) >> 8;
            }
        }

        self.mse.count = 0;
        self.mse.stored_old = mse_stored;
        self.mse.adapt_old = mse_adapt;
    }

    /// Stored-channel error of the latest validation window.
    #[cfg(test)]
    pub(crate) fn stored_mse(&self) -> i32 {
        self.mse.stored_old
    }

    /// Variable-step NLMS on the Q28 adaptive channel.
    ///
    /// Every product is pre-shifted by leading-zero counts so that nothing
    /// overflows 32 bits; the Q-domains are reconciled before the error is
    /// formed.
    fn adapt(&mut self, far: &QSpectrum, near: &[u16; PART_LEN1], near_q: i16, mu: i16) {
        let far_q = far.q;
        let channels = &mut self.channels;

        for i in 0..PART_LEN1 {
            let far_bin = far.magnitude[i];
            let adapt32 = channels.adapt32[i];

            let zeros_ch = norm_u32(adapt32 as u32);
            let zeros_far = norm_u32(u32::from(far_bin));
            let (predicted, shift_ch_far) = if zeros_ch + zeros_far > 31 {
                ((adapt32 as u32).wrapping_mul(u32::from(far_bin)), 0)
            } else {
                let shift = 32 - zeros_ch - zeros_far;
                (
                    ((adapt32 >> shift) as u32).wrapping_mul(u32::from(far_bin)),
                    shift,
                )
            };

            let zeros_num = norm_u32(predicted);
            let zeros_near = if near[i] != 0 {
                norm_u32(u32::from(near[i]))
            } else {
                32
            };
            let headroom = zeros_near - 2 + near_q - RESOLUTION_CHANNEL32 - far_q + shift_ch_far;
            let (predicted_q, near_shift) = if zeros_num > headroom + 1 {
                (headroom, zeros_near - 2)
            } else {
                let predicted_q = zeros_num - 2;
                (
                    predicted_q,
                    RESOLUTION_CHANNEL32 + far_q - near_q - shift_ch_far + predicted_q,
                )
            };

            let error = (shift_u32(u32::from(near[i]), near_shift) as i32)
                .wrapping_sub(shift_u32(predicted, predicted_q) as i32);
            if error == 0 || u32::from(far_bin) <= (u32::from(CHANNEL_VAD) << far_q) {
                continue;
            }

            let zeros_err = norm_w32(error);
            let (mut step, shift_num) = if zeros_err + zeros_far > 31 {
                let magnitude = error.unsigned_abs().wrapping_mul(u32::from(far_bin)) as i32;
                (if error > 0 { magnitude } else { magnitude.wrapping_neg() }, 0)
            } else {
                let shift = 32 - (zeros_err + zeros_far);
                let magnitude = (error.wrapping_abs() >> shift).wrapping_mul(i32::from(far_bin));
                (if error > 0 { magnitude } else { magnitude.wrapping_neg() }, shift)
            };

            // Normalize by bin index.
            step = div_w32_w16(step, (i + 1) as i16);
            let to_q28 = shift_num + shift_ch_far - predicted_q - mu - ((30 - zeros_far) << 1);
            step = if norm_w32(step) < to_q28 {
                i32::MAX
            } else {
                shift_w32(step, to_q28)
            };

            let updated = add_sat_w32(adapt32, step).max(0);
            channels.adapt32[i] = updated;
            channels.adapt16[i] = (updated >> 16) as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CHANNEL_STORED_8KHZ;

    fn spectrum(level: u16, q: i16) -> QSpectrum {
        let mut s = QSpectrum::default();
        s.magnitude.fill(level);
        s.q = q;
        s
    }

    #[test]
    fn echo_path_init_resets_validation() {
        let mut est = ChannelEstimator::new(&CHANNEL_STORED_8KHZ);
        est.mse.count = 12;
        est.mse.threshold = 5;
        est.channels.adapt16[3] = 0;
        est.init_echo_path(&[100; PART_LEN1]);
        assert_eq!(est.channels.stored, [100; PART_LEN1]);
        assert_eq!(est.channels.adapt16, [100; PART_LEN1]);
        assert_eq!(est.channels.adapt32, [100 << 16; PART_LEN1]);
        assert_eq!(est.mse.count, 0);
        assert_eq!(est.mse.threshold, i32::MAX);
        assert_eq!(est.mse.adapt_old, 1000);
        assert_eq!(est.mse.stored_old, 1000);
    }

    #[test]
    fn nlms_moves_toward_true_gain() {
        // Near = 2 * far, channel starts at 1.0 (Q12 mirror 4096).
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        let far = spectrum(1000, 0);
        let near = [2000u16; PART_LEN1];
        let before = est.channels.adapt32;
        for _ in 0..200 {
            est.adapt(&far, &near, 0, 4);
        }
        for i in 0..PART_LEN1 {
            assert!(est.channels.adapt32[i] > before[i], "bin {i} did not grow");
            // Settles at the true gain of 2.0 (Q28 = 2 << 28) without a
            // large overshoot.
            assert!(est.channels.adapt32[i] <= (2 << 28) + (1 << 24), "bin {i} overshoots");
            assert_eq!(est.channels.adapt16[i], (est.channels.adapt32[i] >> 16) as i16);
        }
        // Low bins adapt fastest.
        assert!(est.channels.adapt32[0] >= est.channels.adapt32[64]);
    }

    #[test]
    fn nlms_skips_quiet_far_bins() {
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        let far = spectrum(u16::from(CHANNEL_VAD), 0);
        let near = [20_000u16; PART_LEN1];
        est.adapt(&far, &near, 0, 1);
        assert_eq!(est.channels.adapt32, [4096 << 16; PART_LEN1]);
    }

    #[test]
    fn channel_never_goes_negative() {
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        let far = spectrum(30_000, 0);
        let near = [0u16; PART_LEN1];
        for _ in 0..100 {
            est.adapt(&far, &near, 0, 1);
        }
        assert!(est.channels.adapt32.iter().all(|&c| c >= 0));
        assert!(est.channels.adapt16.iter().all(|&c| c >= 0));
    }

    #[test]
    fn startup_activity_stores_every_block() {
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        est.channels.adapt16 = [1234; PART_LEN1];
        let mut energy = EnergyTracker::default();
        energy.vad = true;
        let far = spectrum(10, 0);
        let mut echo = [0; PART_LEN1];
        est.update(
            SimdBackend::Scalar,
            &energy,
            StartupPhase::Initial,
            &far,
            &[0; PART_LEN1],
            0,
            0,
            &mut echo,
        );
        assert_eq!(est.channels.stored, [1234; PART_LEN1]);
        assert_eq!(echo, [12340; PART_LEN1]);
    }

    /// Runs validation windows where the logged echo energies put one
    /// channel `err_*` Q8 units away from the near end.
    fn run_windows(est: &mut ChannelEstimator, err_stored: i16, err_adapt: i16, windows: usize) {
        let mut energy = EnergyTracker::default();
        energy.far_log = 3000;
        energy.far_mse = 2000;
        energy.near_log = [4000; crate::common::MAX_BUF_LEN];
        energy.echo_stored_log = [4000 + err_stored; crate::common::MAX_BUF_LEN];
        energy.echo_adapt_log = [4000 + err_adapt; crate::common::MAX_BUF_LEN];
        let far = spectrum(0, 0);
        let mut echo = [0; PART_LEN1];
        for _ in 0..windows * (MIN_MSE_COUNT + 10) {
            est.update(
                SimdBackend::Scalar,
                &energy,
                StartupPhase::Steady,
                &far,
                &[0; PART_LEN1],
                0,
                0,
                &mut echo,
            );
        }
    }

    #[test]
    fn better_adaptive_channel_is_stored() {
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        est.channels.adapt16 = [2000; PART_LEN1];
        run_windows(&mut est, 300, 10, 1);
        assert_eq!(est.channels.stored, [2000; PART_LEN1]);
        // First promotion seeds the threshold from both windows.
        assert_eq!(est.mse.threshold, 20 * 10 + 1000);
    }

    #[test]
    fn better_stored_channel_resets_adaptive() {
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        est.channels.adapt16 = [2000; PART_LEN1];
        est.channels.adapt32 = [2000 << 16; PART_LEN1];
        // One window only updates the previous values from their defaults.
        run_windows(&mut est, 10, 300, 1);
        assert_eq!(est.channels.adapt16, [2000; PART_LEN1]);
        run_windows(&mut est, 10, 300, 1);
        assert_eq!(est.channels.adapt16, [4096; PART_LEN1]);
        assert_eq!(est.channels.adapt32, [4096 << 16; PART_LEN1]);
    }

    #[test]
    fn quiet_blocks_restart_validation() {
        let mut est = ChannelEstimator::new(&[4096; PART_LEN1]);
        let mut energy = EnergyTracker::default();
        energy.far_log = 1000;
        energy.far_mse = 2000;
        let mut echo = [0; PART_LEN1];
        for _ in 0..100 {
            est.update(
                SimdBackend::Scalar,
                &energy,
                StartupPhase::Steady,
                &spectrum(0, 0),
                &[0; PART_LEN1],
                0,
                0,
                &mut echo,
            );
            assert_eq!(est.mse.count, 0);
        }
    }
}

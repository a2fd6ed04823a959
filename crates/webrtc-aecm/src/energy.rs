//! Log-energy tracking, far-end voice activity and NLMS step size.

use webrtc_simd::SimdBackend;

use crate::{
    channel::EchoChannels,
    common::{
        CONV_LEN, CONV_LEN2, FAR_ENERGY_DIFF, FAR_ENERGY_MIN, FAR_ENERGY_VAD_REGION, MAX_BUF_LEN,
        MU_DIFF, MU_MAX, MU_MIN, PART_LEN1, RESOLUTION_CHANNEL16,
    },
    fixed_math::div_w32_w16,
    kernel,
    q_spectrum::{QSpectrum, log_energy_q8},
};

/// Convergence phase, derived from the number of processed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub(crate) enum StartupPhase {
    /// Fast tracking; the stored channel follows the adaptive one.
    #[default]
    Initial,
    Converging,
    Steady,
}

impl StartupPhase {
    pub(crate) fn from_block_count(total_blocks: u32) -> Self {
        if total_blocks >= CONV_LEN2 {
            Self::Steady
        } else if total_blocks >= CONV_LEN {
            Self::Converging
        } else {
            Self::Initial
        }
    }
}

/// Asymmetric first-order tracker on Q8 log energies.
///
/// Rises by `(input - old) >> step_up` and falls by `(old - input) >>
/// step_down`. A tracker at either `i16` sentinel snaps to the input.
fn asym_filt(old: i16, input: i16, step_up: u32, step_down: u32) -> i16 {
    if old == i16::MAX || old == i16::MIN {
        return input;
    }
    let old32 = i32::from(old);
    let in32 = i32::from(input);
    if old > input {
        (old32 - ((old32 - in32) >> step_down)) as i16
    } else {
        (old32 + ((in32 - old32) >> step_up)) as i16
    }
}

/// Pushes `value` at the front of a history, dropping the oldest entry.
fn push_front(history: &mut [i16; MAX_BUF_LEN], value: i16) {
    history.copy_within(..MAX_BUF_LEN - 1, 1);
    history[0] = value;
}

/// Near-end, far-end and echo log energies with the far-end envelopes.
///
/// Histories are newest first, in Q8 log2.
#[derive(Debug, Clone)]
pub(crate) struct EnergyTracker {
    pub(crate) near_log: [i16; MAX_BUF_LEN],
    pub(crate) echo_adapt_log: [i16; MAX_BUF_LEN],
    pub(crate) echo_stored_log: [i16; MAX_BUF_LEN],
    pub(crate) far_log: i16,
    far_min: i16,
    far_max: i16,
    far_max_min: i16,
    far_vad: i16,
    /// Far-end level above which a block counts toward channel validation.
    pub(crate) far_mse: i16,
    vad_update_count: u32,
    /// Far-end voice activity of the current block.
    pub(crate) vad: bool,
    first_vad: bool,
}

impl Default for EnergyTracker {
    fn default() -> Self {
        Self {
            near_log: [0; MAX_BUF_LEN],
            echo_adapt_log: [0; MAX_BUF_LEN],
            echo_stored_log: [0; MAX_BUF_LEN],
            far_log: 0,
            far_min: i16::MAX,
            far_max: i16::MIN,
            far_max_min: 0,
            // Starting at the floor avoids false activity on the first blocks.
            far_vad: FAR_ENERGY_MIN,
            far_mse: 0,
            vad_update_count: 0,
            vad: false,
            first_vad: true,
        }
    }
}

impl EnergyTracker {
    /// Updates all energies for one block.
    ///
    /// `far` is the delay-aligned far-end spectrum, `near_sum` the noisy
    /// near-end magnitude sum in Q(`near_q`). Writes the stored-channel echo
    /// estimate per bin to `echo_est`, in Q(`far.q + 12`).
    pub(crate) fn update(
        &mut self,
        backend: SimdBackend,
        channels: &mut EchoChannels,
        far: &QSpectrum,
        near_sum: u32,
        near_q: i16,
        phase: StartupPhase,
        echo_est: &mut [i32; PART_LEN1],
    ) {
        push_front(&mut self.near_log, log_energy_q8(near_sum, near_q));

        let linear = kernel::calc_linear_energies(backend, channels, &far.magnitude, echo_est);
        let echo_q = RESOLUTION_CHANNEL16 + far.q;
        self.far_log = log_energy_q8(linear.far, far.q);
        push_front(&mut self.echo_adapt_log, log_energy_q8(linear.echo_adapt, echo_q));
        push_front(&mut self.echo_stored_log, log_energy_q8(linear.echo_stored, echo_q));

        if self.far_log > FAR_ENERGY_MIN {
            self.update_envelopes(phase);
        }

        if self.far_log > self.far_vad {
            if phase == StartupPhase::Initial || self.far_max_min > FAR_ENERGY_DIFF {
                self.vad = true;
            }
        } else {
            self.vad = false;
        }

        if self.vad && self.first_vad {
            self.first_vad = false;
            if self.echo_adapt_log[0] > self.near_log[0] {
                // The default echo path overshoots this device; start lower.
                for coefficient in &mut channels.adapt16 {
                    *coefficient >>= 3;
                }
                self.echo_adapt_log[0] -= 3 << 8;
                self.first_vad = true;
            }
        }
    }

    fn update_envelopes(&mut self, phase: StartupPhase) {
        let (max_up, max_down, min_up, min_down) = if phase == StartupPhase::Initial {
            (2, 11, 8, 2)
        } else {
            (4, 11, 11, 3)
        };
        self.far_min = asym_filt(self.far_min, self.far_log, min_up, min_down);
        self.far_max = asym_filt(self.far_max, self.far_log, max_up, max_down);
        self.far_max_min = self.far_max.wrapping_sub(self.far_min);

        let headroom = 2560 - i32::from(self.far_min);
        let region = if headroom > 0 {
            ((headroom * i32::from(FAR_ENERGY_VAD_REGION)) >> 9) as i16
        } else {
            0
        } + FAR_ENERGY_VAD_REGION;

        if phase == StartupPhase::Initial || self.vad_update_count > 1024 {
            self.far_vad = self.far_min.wrapping_add(region);
        } else if self.far_vad > self.far_log {
            let step = (i32::from(self.far_log) + i32::from(region) - i32::from(self.far_vad)) >> 6;
            self.far_vad = (i32::from(self.far_vad) + step) as i16;
            self.vad_update_count = 0;
        } else {
            self.vad_update_count += 1;
        }
        self.far_mse = self.far_vad.wrapping_add(1 << 8);
    }

    /// NLMS step size as a right shift; 0 disables adaptation.
    pub(crate) fn step_size(&self, phase: StartupPhase) -> i16 {
        if !self.vad {
            return 0;
        }
        if phase == StartupPhase::Initial {
            return MU_MAX;
        }
        let mu = if self.far_min >= self.far_max {
            MU_MIN
        } else {
            let above_min = i32::from(self.far_log.wrapping_sub(self.far_min)) * i32::from(MU_DIFF);
            MU_MIN - 1 - div_w32_w16(above_min, self.far_max_min) as i16
        };
        mu.max(MU_MAX)
    }
}

//! Suppression gain and per-bin Wiener gains.
//!
//! A global gain (Q8) is derived from how well the stored channel predicts
//! the near-end energy: a good prediction allows strong suppression, a poor
//! one (likely double talk) falls back to the default. Per bin, the gained
//! echo estimate is compared against a smoothed near-end magnitude to form
//! `hnl = 1 - echo / near` in Q14.

use crate::{
    common::{
        ENERGY_DEV_OFFSET, ENERGY_DEV_TOL, NLP_COMP_HIGH, NLP_COMP_LOW, ONE_Q14, PART_LEN1,
        RESOLUTION_CHANNEL16, RESOLUTION_SUPGAIN, SUPGAIN_DEFAULT, SUPGAIN_EPC_DT,
        SUPGAIN_ERROR_PARAM_A, SUPGAIN_ERROR_PARAM_B, SUPGAIN_ERROR_PARAM_D,
    },
    config::EchoMode,
    energy::EnergyTracker,
    fixed_math::{div_u32_u16, div_w32_w16, norm_w16, norm_w32, shift_w32},
};

/// Wideband gains above this bin are capped at the low-band average.
const PREF_BAND_MIN: usize = 4;
const PREF_BAND_MAX: usize = 24;

/// Points of the error-response curve, scaled by the echo mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GainCurve {
    a: i16,
    d: i16,
    diff_ab: i16,
    diff_bd: i16,
}

impl GainCurve {
    fn for_mode(mode: EchoMode) -> Self {
        Self {
            a: mode.scale(SUPGAIN_ERROR_PARAM_A),
            d: mode.scale(SUPGAIN_ERROR_PARAM_D),
            diff_ab: mode.scale(SUPGAIN_ERROR_PARAM_A - SUPGAIN_ERROR_PARAM_B),
            diff_bd: mode.scale(SUPGAIN_ERROR_PARAM_B - SUPGAIN_ERROR_PARAM_D),
        }
    }
}

/// Smoothed global suppression gain in Q8.
#[derive(Debug, Clone)]
pub(crate) struct SuppressionGain {
    gain: i16,
    gain_old: i16,
    curve: GainCurve,
}

impl Default for SuppressionGain {
    fn default() -> Self {
        Self::new(EchoMode::default())
    }
}

impl SuppressionGain {
    pub(crate) fn new(mode: EchoMode) -> Self {
        let default = mode.scale(SUPGAIN_DEFAULT);
        Self {
            gain: default,
            gain_old: default,
            curve: GainCurve::for_mode(mode),
        }
    }

    /// Current smoothed gain.
    pub(crate) fn gain(&self) -> i16 {
        self.gain
    }

    /// Computes this block's target gain and moves the smoothed gain 1/16
    /// of the way toward the larger of it and the previous target.
    pub(crate) fn update(&mut self, energy: &EnergyTracker) -> i16 {
        let target = if !energy.vad {
            0
        } else {
            let deviation = energy.near_log[0]
                .wrapping_sub(energy.echo_stored_log[0])
                .wrapping_sub(ENERGY_DEV_OFFSET)
                .wrapping_abs();
            if deviation < ENERGY_DEV_TOL {
                if deviation < SUPGAIN_EPC_DT {
                    let num = i32::from(self.curve.diff_ab) * i32::from(deviation)
                        + i32::from(SUPGAIN_EPC_DT >> 1);
                    self.curve.a - div_w32_w16(num, SUPGAIN_EPC_DT) as i16
                } else {
                    let span = ENERGY_DEV_TOL - SUPGAIN_EPC_DT;
                    let num = i32::from(self.curve.diff_bd) * i32::from(ENERGY_DEV_TOL - deviation)
                        + i32::from(span >> 1);
                    self.curve.d + div_w32_w16(num, span) as i16
                }
            } else {
                // Probably double talk.
                self.curve.d
            }
        };

        let candidate = target.max(self.gain_old);
        self.gain_old = target;
        self.gain += (candidate - self.gain) >> 4;
        self.gain
    }
}

/// Per-bin smoothing state for the Wiener gains.
#[derive(Debug, Clone)]
pub(crate) struct WienerFilter {
    echo_filt: [i32; PART_LEN1],
    near_filt: [i16; PART_LEN1],
}

impl Default for WienerFilter {
    fn default() -> Self {
        Self {
            echo_filt: [0; PART_LEN1],
            near_filt: [0; PART_LEN1],
        }
    }
}

/// Q-domains of the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockDomains {
    /// Aligned far-end spectrum.
    pub(crate) far_q: i16,
    /// Clean near-end spectrum, this block and the previous one.
    pub(crate) near_q: i16,
    pub(crate) near_q_old: i16,
}

impl WienerFilter {
    /// Fills `hnl` (Q14) and returns the number of non-zero gains.
    pub(crate) fn gains(
        &mut self,
        echo_est: &[i32; PART_LEN1],
        sup_gain: i16,
        near: &[u16; PART_LEN1],
        domains: BlockDomains,
        hnl: &mut [i16; PART_LEN1],
    ) -> usize {
        let mut num_positive = 0;
        for i in 0..PART_LEN1 {
            // Echo through the channel, smoothed, then gained (Q8).
            let echo = &mut self.echo_filt[i];
            *echo = echo.wrapping_add(echo_est[i].wrapping_sub(*echo).wrapping_mul(50) >> 8);
            let echo = *echo;

            let zeros32 = norm_w32(echo) + 1;
            let zeros16 = norm_w16(sup_gain) + 1;
            let base_diff = 14 - RESOLUTION_CHANNEL16 - RESOLUTION_SUPGAIN
                + (domains.near_q - domains.far_q);
            let (mut gained, resolution_diff) = if zeros32 + zeros16 > 16 {
                ((echo as u32).wrapping_mul(u32::from(sup_gain as u16)), base_diff)
            } else {
                let t = 17 - zeros32 - zeros16;
                let gained = if zeros32 > t {
                    (echo as u32).wrapping_mul(u32::from((sup_gain >> t) as u16))
                } else {
                    (echo >> t).wrapping_mul(i32::from(sup_gain)) as u32
                };
                (gained, base_diff + t)
            };

            self.track_near(i, near[i], domains);

            hnl[i] = if gained == 0 {
                ONE_Q14
            } else if self.near_filt[i] == 0 {
                0
            } else {
                let near_filt = self.near_filt[i];
                gained = gained.wrapping_add((near_filt >> 1) as u32);
                let ratio = div_u32_u16(gained, near_filt as u16);
                let ratio = shift_w32(ratio as i32, resolution_diff);
                if ratio > i32::from(ONE_Q14) {
                    0
                } else if ratio < 0 {
                    ONE_Q14
                } else {
                    (ONE_Q14 - ratio as i16).max(0)
                }
            };
            if hnl[i] != 0 {
                num_positive += 1;
            }
        }
        num_positive
    }

    /// Tracks the near-end magnitude by 1/16 per block, re-aligning the
    /// filter state when the near-end Q-domain changes.
    fn track_near(&mut self, i: usize, near: u16, domains: BlockDomains) {
        let filt = self.near_filt[i];
        let zeros = norm_w16(filt);
        let q_change = domains.near_q - domains.near_q_old;

        let (old, q_diff, new) = if zeros < q_change && filt != 0 {
            let q_diff = zeros - q_change;
            (
                (i32::from(filt) << zeros) as i16,
                q_diff,
                (near >> (-q_diff).min(15)) as i16,
            )
        } else {
            let old = if q_change < 0 {
                filt >> (-q_change).min(15)
            } else {
                (i32::from(filt) << q_change) as i16
            };
            (old, 0, near as i16)
        };

        let smoothed = (((i32::from(new) - i32::from(old)) >> 4) as i16).wrapping_add(old);
        let headroom = norm_w16(smoothed);
        self.near_filt[i] = if smoothed != 0 && -q_diff > headroom {
            i16::MAX
        } else if q_diff < 0 {
            (i32::from(smoothed) << -q_diff) as i16
        } else {
            smoothed >> q_diff
        };
    }
}

/// Wideband only: squares the gains and caps the upper band at the
/// average gain of bins `PREF_BAND_MIN..=PREF_BAND_MAX`.
pub(crate) fn limit_upper_band(hnl: &mut [i16; PART_LEN1]) {
    for h in hnl.iter_mut() {
        *h = ((i32::from(*h) * i32::from(*h)) >> 14) as i16;
    }
    let sum: i32 = hnl[PREF_BAND_MIN..=PREF_BAND_MAX]
        .iter()
        .map(|&h| i32::from(h))
        .sum();
    let avg = (sum / (PREF_BAND_MAX - PREF_BAND_MIN + 1) as i32) as i16;
    for h in &mut hnl[PREF_BAND_MAX..] {
        *h = (*h).min(avg);
    }
}

/// Snaps gains near 0 and 1, and zeroes everything when fewer than three
/// bins pass.
pub(crate) fn apply_nlp(hnl: &mut [i16; PART_LEN1], num_positive: usize) {
    let nlp_gain = if num_positive < 3 { 0 } else { ONE_Q14 };
    for h in hnl.iter_mut() {
        if *h > NLP_COMP_HIGH {
            *h = ONE_Q14;
        } else if *h < NLP_COMP_LOW {
            *h = 0;
        }
        if !(*h == ONE_Q14 && nlp_gain == ONE_Q14) {
            *h = ((i32::from(*h) * i32::from(nlp_gain)) >> 14) as i16;
        }
    }
}

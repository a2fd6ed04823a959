//! Comfort noise for suppressed bins.
//!
//! The near-end noise floor is tracked per bin with minimum statistics in
//! Q15. Each block, random-phase noise scaled by `1 - hnl` is added to the
//! output spectrum so that heavily suppressed bins do not drop to silence.

use crate::{
    common::{ONE_Q14, PART_LEN, PART_LEN1},
    fixed_math::Lcg,
    transform::Complex16,
};

const NOISE_EST_Q: i16 = 15;
/// Consecutive blocks a bin must sit at the floor before it is nudged.
const NOISE_EST_INC_COUNT: u8 = 5;
/// Blocks tracked with the faster minimum follower after a reset.
const FAST_TRACKING_BLOCKS: u32 = 100;
const RAND_SEED: u32 = 666;

#[derive(Debug, Clone)]
pub(crate) struct ComfortNoise {
    noise_est: [i32; PART_LEN1],
    too_high: [u8; PART_LEN1],
    too_low: [u8; PART_LEN1],
    blocks: u32,
    rng: Lcg,
}

impl Default for ComfortNoise {
    fn default() -> Self {
        // Roughly pink: the level falls quadratically over the lower half.
        let mut noise_est = [0; PART_LEN1];
        let mut level = (PART_LEN1 * PART_LEN1) as i32;
        let mut step = PART_LEN1 as i32;
        for (i, est) in noise_est.iter_mut().enumerate() {
            *est = level << 8;
            if i < (PART_LEN1 >> 1) - 1 {
                step -= 1;
                level -= (step << 1) + 1;
            }
        }
        Self {
            noise_est,
            too_high: [0; PART_LEN1],
            too_low: [0; PART_LEN1],
            blocks: 0,
            rng: Lcg::new(RAND_SEED),
        }
    }
}

impl ComfortNoise {
    /// Updates the noise floor from `near` (in Q(`near_q`)) and adds noise
    /// shaped by `hnl` to `out`.
    pub(crate) fn apply(
        &mut self,
        near: &[u16; PART_LEN1],
        near_q: i16,
        hnl: &[i16; PART_LEN1],
        out: &mut [Complex16; PART_LEN1],
    ) {
        let shift = NOISE_EST_Q - near_q;
        self.track_floor(near, shift);

        let mut level = [0i16; PART_LEN1];
        for ((est, l), &h) in self.noise_est.iter_mut().zip(&mut level).zip(hnl) {
            let mut noise = *est >> shift;
            if noise > i32::from(i16::MAX) {
                noise = i32::from(i16::MAX);
                *est = noise << shift;
            }
            *l = ((i32::from(ONE_Q14 - h) * noise) >> 14) as i16;
        }

        let mut phases = [0i16; PART_LEN];
        self.rng.fill(&mut phases);

        for i in 1..PART_LEN1 {
            let angle = ((359 * i32::from(phases[i - 1])) >> 15) as usize;
            let n = i32::from(level[i]);
            let re = ((n * i32::from(COS_TABLE_Q13[angle])) >> 13) as i16;
            let im = if i == PART_LEN {
                0
            } else {
                ((-n * i32::from(SIN_TABLE_Q13[angle])) >> 13) as i16
            };
            out[i].re = out[i].re.saturating_add(re);
            out[i].im = out[i].im.saturating_add(im);
        }
    }

    fn track_floor(&mut self, near: &[u16; PART_LEN1], shift: i16) {
        let min_track_shift = if self.blocks < FAST_TRACKING_BLOCKS {
            self.blocks += 1;
            6
        } else {
            9
        };

        for i in 0..PART_LEN1 {
            let input = i32::from(near[i]).wrapping_shl(shift as u32);
            let est = &mut self.noise_est[i];
            if input < *est {
                // Track the minimum downward.
                self.too_low[i] = 0;
                if *est < 1 << min_track_shift {
                    self.too_high[i] += 1;
                    if self.too_high[i] >= NOISE_EST_INC_COUNT {
                        *est -= 1;
                        self.too_high[i] = 0;
                    }
                } else {
                    *est -= (*est - input) >> min_track_shift;
                }
            } else {
                self.too_high[i] = 0;
                if *est >> 19 > 0 {
                    *est = (*est >> 11) * 2049;
                } else if *est >> 11 > 0 {
                    *est = (*est * 2049) >> 11;
                } else {
                    self.too_low[i] += 1;
                    if self.too_low[i] >= NOISE_EST_INC_COUNT {
                        *est += (*est >> 9) + 1;
                        self.too_low[i] = 0;
                    }
                }
            }
        }
    }
}

const COS_TABLE_Q13: [i16; 360] = [
    8192, 8190, 8187, 8180, 8172, 8160, 8147, 8130, 8112, 8091, 8067, 8041,
    8012, 7982, 7948, 7912, 7874, 7834, 7791, 7745, 7697, 7647, 7595, 7540,
    7483, 7424, 7362, 7299, 7233, 7164, 7094, 7021, 6947, 6870, 6791, 6710,
    6627, 6542, 6455, 6366, 6275, 6182, 6087, 5991, 5892, 5792, 5690, 5586,
    5481, 5374, 5265, 5155, 5043, 4930, 4815, 4698, 4580, 4461, 4341, 4219,
    4096, 3971, 3845, 3719, 3591, 3462, 3331, 3200, 3068, 2935, 2801, 2667,
    2531, 2395, 2258, 2120, 1981, 1842, 1703, 1563, 1422, 1281, 1140, 998,
    856, 713, 571, 428, 285, 142, 0, -142, -285, -428, -571, -713,
    -856, -998, -1140, -1281, -1422, -1563, -1703, -1842, -1981, -2120, -2258, -2395,
    -2531, -2667, -2801, -2935, -3068, -3200, -3331, -3462, -3591, -3719, -3845, -3971,
    -4095, -4219, -4341, -4461, -4580, -4698, -4815, -4930, -5043, -5155, -5265, -5374,
    -5481, -5586, -5690, -5792, -5892, -5991, -6087, -6182, -6275, -6366, -6455, -6542,
    -6627, -6710, -6791, -6870, -6947, -7021, -7094, -7164, -7233, -7299, -7362, -7424,
    -7483, -7540, -7595, -7647, -7697, -7745, -7791, -7834, -7874, -7912, -7948, -7982,
    -8012, -8041, -8067, -8091, -8112, -8130, -8147, -8160, -8172, -8180, -8187, -8190,
    -8191, -8190, -8187, -8180, -8172, -8160, -8147, -8130, -8112, -8091, -8067, -8041,
    -8012, -7982, -7948, -7912, -7874, -7834, -7791, -7745, -7697, -7647, -7595, -7540,
    -7483, -7424, -7362, -7299, -7233, -7164, -7094, -7021, -6947, -6870, -6791, -6710,
    -6627, -6542, -6455, -6366, -6275, -6182, -6087, -5991, -5892, -5792, -5690, -5586,
    -5481, -5374, -5265, -5155, -5043, -4930, -4815, -4698, -4580, -4461, -4341, -4219,
    -4096, -3971, -3845, -3719, -3591, -3462, -3331, -3200, -3068, -2935, -2801, -2667,
    -2531, -2395, -2258, -2120, -1981, -1842, -1703, -1563, -1422, -1281, -1140, -998,
    -856, -713, -571, -428, -285, -142, 0, 142, 285, 428, 571, 713,
    856, 998, 1140, 1281, 1422, 1563, 1703, 1842, 1981, 2120, 2258, 2395,
    2531, 2667, 2801, 2935, 3068, 3200, 3331, 3462, 3591, 3719, 3845, 3971,
    4095, 4219, 4341, 4461, 4580, 4698, 4815, 4930, 5043, 5155, 5265, 5374,
    5481, 5586, 5690, 5792, 5892, 5991, 6087, 6182, 6275, 6366, 6455, 6542,
    6627, 6710, 6791, 6870, 6947, 7021, 7094, 7164, 7233, 7299, 7362, 7424,
    7483, 7540, 7595, 7647, 7697, 7745, 7791, 7834, 7874, 7912, 7948, 7982,
    8012, 8041, 8067, 8091, 8112, 8130, 8147, 8160, 8172, 8180, 8187, 8190,
];

const SIN_TABLE_Q13: [i16; 360] = [
    0, 142, 285, 428, 571, 713, 856, 998, 1140, 1281, 1422, 1563,
    1703, 1842, 1981, 2120, 2258, 2395, 2531, 2667, 2801, 2935, 3068, 3200,
    3331, 3462, 3591, 3719, 3845, 3971, 4095, 4219, 4341, 4461, 4580, 4698,
    4815, 4930, 5043, 5155, 5265, 5374, 5481, 5586, 5690, 5792, 5892, 5991,
    6087, 6182, 6275, 6366, 6455, 6542, 6627, 6710, 6791, 6870, 6947, 7021,
    7094, 7164, 7233, 7299, 7362, 7424, 7483, 7540, 7595, 7647, 7697, 7745,
    7791, 7834, 7874, 7912, 7948, 7982, 8012, 8041, 8067, 8091, 8112, 8130,
    8147, 8160, 8172, 8180, 8187, 8190, 8191, 8190, 8187, 8180, 8172, 8160,
    8147, 8130, 8112, 8091, 8067, 8041, 8012, 7982, 7948, 7912, 7874, 7834,
    7791, 7745, 7697, 7647, 7595, 7540, 7483, 7424, 7362, 7299, 7233, 7164,
    7094, 7021, 6947, 6870, 6791, 6710, 6627, 6542, 6455, 6366, 6275, 6182,
    6087, 5991, 5892, 5792, 5690, 5586, 5481, 5374, 5265, 5155, 5043, 4930,
    4815, 4698, 4580, 4461, 4341, 4219, 4096, 3971, 3845, 3719, 3591, 3462,
    3331, 3200, 3068, 2935, 2801, 2667, 2531, 2395, 2258, 2120, 1981, 1842,
    1703, 1563, 1422, 1281, 1140, 998, 856, 713, 571, 428, 285, 142,
    0, -142, -285, -428, -571, -713, -856, -998, -1140, -1281, -1422, -1563,
    -1703, -1842, -1981, -2120, -2258, -2395, -2531, -2667, -2801, -2935, -3068, -3200,
    -3331, -3462, -3591, -3719, -3845, -3971, -4095, -4219, -4341, -4461, -4580, -4698,
    -4815, -4930, -5043, -5155, -5265, -5374, -5481, -5586, -5690, -5792, -5892, -5991,
    -6087, -6182, -6275, -6366, -6455, -6542, -6627, -6710, -6791, -6870, -6947, -7021,
    -7094, -7164, -7233, -7299, -7362, -7424, -7483, -7540, -7595, -7647, -7697, -7745,
    -7791, -7834, -7874, -7912, -7948, -7982, -8012, -8041, -8067, -8091, -8112, -8130,
    -8147, -8160, -8172, -8180, -8187, -8190, -8191, -8190, -8187, -8180, -8172, -8160,
    -8147, -8130, -8112, -8091, -8067, -8041, -8012, -7982, -7948, -7912, -7874, -7834,
    -7791, -7745, -7697, -7647, -7595, -7540, -7483, -7424, -7362, -7299, -7233, -7164,
    -7094, -7021, -6947, -6870, -6791, -6710, -6627, -6542, -6455, -6366, -6275, -6182,
    -6087, -5991, -5892, -5792, -5690, -5586, -5481, -5374, -5265, -5155, -5043, -4930,
    -4815, -4698, -4580, -4461, -4341, -4219, -4096, -3971, -3845, -3719, -3591, -3462,
    -3331, -3200, -3068, -2935, -2801, -2667, -2531, -2395, -2258, -2120, -1981, -1842,
    -1703, -1563, -1422, -1281, -1140, -998, -856, -713, -571, -428, -285, -142,
];

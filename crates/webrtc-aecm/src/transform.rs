//! Windowed block transforms between time samples and half spectra.

use webrtc_fft::RealFft;

use crate::{
    common::{PART_LEN, PART_LEN1, PART_LEN2, PART_LEN_ORDER},
    config::MagnitudeMode,
    fixed_math::{
        add_sat_w32, max_abs_w16, mul_16_16_rshift_round, norm_w16, sat_w16, shift_w32, sqrt_floor,
    },
    q_spectrum::QSpectrum,
};

/// Square-root Hann window in Q14, first half including the center.
const SQRT_HANNING_Q14: [i16; PART_LEN1] = [
    0, 399, 798, 1196, 1594, 1990, 2386, 2780, 3172, 3562, 3951, 4337, 4720, 5101, 5478, 5853,
    6224, 6591, 6954, 7313, 7668, 8019, 8364, 8705, 9040, 9370, 9695, 10013, 10326, 10633, 10933,
    11227, 11514, 11795, 12068, 12335, 12594, 12845, 13089, 13325, 13553, 13773, 13985, 14189,
    14384, 14571, 14749, 14918, 15079, 15231, 15373, 15506, 15631, 15746, 15851, 15947, 16034,
    16111, 16179, 16237, 16286, 16325, 16354, 16373, 16384,
];

// `alpha * max + beta * min` coefficients (Q15) for the magnitude estimate,
// by ratio of the larger to the smaller component.
const ALPHA_BETA_ABOVE_4: (i32, i32) = (32584, 4249);
const ALPHA_BETA_ABOVE_2: (i32, i32) = (30879, 11072);
const ALPHA_BETA_BELOW_2: (i32, i32) = (26951, 18927);

/// One bin of a 16-bit half spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Complex16 {
    pub(crate) re: i16,
    pub(crate) im: i16,
}

/// Analysis and synthesis around a 128-point fixed-point FFT.
///
/// Analysis normalizes each block to full scale before windowing and
/// reports the normalization as the spectrum's Q-domain. Synthesis windows
/// again and overlap-adds with the tail of the previous block.
#[derive(Debug, Clone)]
pub(crate) struct BlockTransform {
    fft: RealFft,
    time: [i16; PART_LEN2],
    freq: [i16; PART_LEN2 + 2],
    overlap: [i16; PART_LEN],
}

impl Default for BlockTransform {
    fn default() -> Self {
        Self {
            fft: RealFft::new(PART_LEN_ORDER),
            time: [0; PART_LEN2],
            freq: [0; PART_LEN2 + 2],
            overlap: [0; PART_LEN],
        }
    }
}

impl BlockTransform {
    /// Transforms two blocks of `signal` into `spectrum` and returns the
    /// bin magnitudes.
    pub(crate) fn forward(
        &mut self,
        signal: &[i16; PART_LEN2],
        mode: MagnitudeMode,
        spectrum: &mut [Complex16; PART_LEN1],
    ) -> QSpectrum {
        let scaling = norm_w16(max_abs_w16(signal));
        for i in 0..PART_LEN {
            let head = (i32::from(signal[i]) << scaling) as i16;
            let tail = (i32::from(signal[PART_LEN + i]) << scaling) as i16;
            self.time[i] = ((i32::from(head) * i32::from(SQRT_HANNING_Q14[i])) >> 14) as i16;
            self.time[PART_LEN + i] =
                ((i32::from(tail) * i32::from(SQRT_HANNING_Q14[PART_LEN - i])) >> 14) as i16;
        }
        self.fft.forward(&self.time, &mut self.freq);

        for (bin, pair) in spectrum.iter_mut().zip(self.freq.chunks_exact(2)) {
            bin.re = pair[0];
            bin.im = pair[1].wrapping_neg();
        }
        spectrum[0].im = 0;
        spectrum[PART_LEN].im = 0;

        let mut magnitude = [0u16; PART_LEN1];
        magnitude[0] = spectrum[0].re.unsigned_abs();
        magnitude[PART_LEN] = spectrum[PART_LEN].re.unsigned_abs();
        for i in 1..PART_LEN {
            magnitude[i] = bin_magnitude(spectrum[i], mode);
        }

        QSpectrum {
            magnitude,
            q: scaling,
        }
    }

    /// Transforms `spectrum` (in Q(`q`)) back to time, overlap-adding the
    /// first half into `out` and keeping the second half for the next call.
    pub(crate) fn inverse(
        &mut self,
        spectrum: &[Complex16; PART_LEN1],
        q: i16,
        out: &mut [i16; PART_LEN],
    ) {
        for (pair, bin) in self.freq.chunks_exact_mut(2).zip(spectrum) {
            pair[0] = bin.re;
            pair[1] = bin.im.wrapping_neg();
        }
        let fft_scale = self.fft.inverse(&self.freq, &mut self.time);
        let shift = (fft_scale - i32::from(q)) as i16;

        for i in 0..PART_LEN {
            let head = mul_16_16_rshift_round(self.time[i], SQRT_HANNING_Q14[i], 14) as i16;
            let head = shift_w32(i32::from(head), shift);
            out[i] = sat_w16(head.saturating_add(i32::from(self.overlap[i])));

            let tail = (i32::from(self.time[PART_LEN + i])
                * i32::from(SQRT_HANNING_Q14[PART_LEN - i]))
                >> 14;
            self.overlap[i] = sat_w16(shift_w32(tail, shift));
        }
    }
}

fn bin_magnitude(bin: Complex16, mode: MagnitudeMode) -> u16 {
    if bin.re == 0 {
        return bin.im.unsigned_abs();
    }
    if bin.im == 0 {
        return bin.re.unsigned_abs();
    }
    match mode {
        MagnitudeMode::Exact => {
            let re = i32::from(bin.re);
            let im = i32::from(bin.im);
            sqrt_floor(add_sat_w32(re * re, im * im)) as u16
        }
        MagnitudeMode::Approximate => {
            let re = i32::from(bin.re.unsigned_abs());
            let im = i32::from(bin.im.unsigned_abs());
            let (max, min) = if re > im { (re, im) } else { (im, re) };
            let (alpha, beta) = if max >> 2 > min {
                ALPHA_BETA_ABOVE_4
            } else if max >> 1 > min {
                ALPHA_BETA_ABOVE_2
            } else {
                ALPHA_BETA_BELOW_2
            };
            let major = ((max * alpha) >> 15) as u16;
            let minor = ((min * beta) >> 15) as u16;
            major.wrapping_add(minor)
        }
    }
}

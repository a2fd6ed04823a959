//! Fixed-point real FFT in 16-bit arithmetic.
//!
//! A real transform built on in-place radix-2 complex butterflies with
//! rounded Q14 twiddles.
//!
//! # Data format
//!
//! Forward transform:
//! - Input: `n = 2^order` real samples.
//! - Output: `n + 2` values, `out[2k] = Re X[k]`, `out[2k + 1] = Im X[k]`
//!   for `0 <= k <= n/2`. Every butterfly stage halves its output, so the
//!   spectrum is scaled by `1/n`.
//!
//! Inverse transform:
//! - Input: `n + 2` values in the forward output layout. The upper half of
//!   the spectrum is rebuilt from conjugate symmetry.
//! - Output: `n` real samples, right-shifted by the returned scale. Each
//!   stage picks its own shift (0, 1 or 2) from the block maximum so that the
//!   16-bit working buffer never overflows.

use std::f64::consts::PI;

/// Largest supported transform order (`n = 1024`).
pub const MAX_ORDER: usize = 10;

/// Length of the shared quarter-wave-indexed sine table.
const SIN_TABLE_LEN: usize = 1 << MAX_ORDER;

/// Fractional bits kept for the butterfly products.
const CFFT_SHIFT: i32 = 14;
/// Rounding added to the twiddle products before the first shift.
const CFFT_ROUND: i32 = 1;
/// Rounding added before the final shift of the forward butterflies.
const CFFT_ROUND2: i32 = 1 << CFFT_SHIFT;

/// Block maximum above which an inverse stage shifts down by one.
const IFFT_SCALE_THRESHOLD_1: i32 = 13573;
/// Block maximum above which an inverse stage shifts down by two.
const IFFT_SCALE_THRESHOLD_2: i32 = 27146;

/// Fixed-point real FFT of size `2^order`.
///
/// The sine table and bit-reversal swaps are computed once at construction;
/// the complex working buffer is owned by the instance so transforms never
/// allocate.
#[derive(Debug, Clone)]
pub struct RealFft {
    order: usize,
    /// `sin(2 * pi * i / 1024)` in Q15.
    sin_table: Vec<i16>,
    /// Complex index pairs exchanged by the bit-reversal permutation.
    swaps: Vec<(usize, usize)>,
    /// Interleaved complex working buffer (`2n` values).
    work: Vec<i16>,
}

impl RealFft {
    /// Creates a transform of size `2^order`.
    ///
    /// # Panics
    ///
    /// Panics if `order` is 0 or larger than [`MAX_ORDER`].
    pub fn new(order: usize) -> Self {
        assert!(order >= 1, "FFT order must be >= 1, got {order}");
        assert!(
            order <= MAX_ORDER,
            "FFT order must be <= {MAX_ORDER}, got {order}"
        );

        let sin_table = (0..SIN_TABLE_LEN)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / SIN_TABLE_LEN as f64;
                (32767.0 * angle.sin()).round() as i16
            })
            .collect();

        let n = 1 << order;
        let swaps = (0..n)
            .filter_map(|i: usize| {
                let j = i.reverse_bits() >> (usize::BITS as usize - order);
                (i < j).then_some((i, j))
            })
            .collect();

        Self {
            order,
            sin_table,
            swaps,
            work: vec![0; 2 * n],
        }
    }

    /// Transform order (`log2` of the length).
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of real time-domain samples.
    pub fn len(&self) -> usize {
        1 << self.order
    }

    /// Always `false`; a transform has at least two points.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Forward transform of `input` (`n` samples) into `output` (`n + 2`
    /// values, interleaved real/imaginary for bins `0..=n/2`).
    pub fn forward(&mut self, input: &[i16], output: &mut [i16]) {
        let n = self.len();
        assert_eq!(input.len(), n, "forward input must hold {n} samples");
        assert_eq!(output.len(), n + 2, "forward output must hold {} values", n + 2);

        for (pair, &x) in self.work.chunks_exact_mut(2).zip(input) {
            pair[0] = x;
            pair[1] = 0;
        }
        self.bit_reverse();
        complex_fft(&mut self.work, self.order, &self.sin_table);
        output.copy_from_slice(&self.work[..n + 2]);
    }

    /// Inverse transform of the half spectrum `input` (`n + 2` values) into
    /// `output` (`n` samples).
    ///
    /// Returns the number of right shifts applied to the output, i.e. the
    /// true time signal is `output[i] << scale`.
    pub fn inverse(&mut self, input: &[i16], output: &mut [i16]) -> i32 {
        let n = self.len();
        assert_eq!(input.len(), n + 2, "inverse input must hold {} values", n + 2);
        assert_eq!(output.len(), n, "inverse output must hold {n} samples");

        self.work[..n + 2].copy_from_slice(input);
        for i in (n + 2..2 * n).step_by(2) {
            self.work[i] = input[2 * n - i];
            self.work[i + 1] = input[2 * n - i + 1].wrapping_neg();
        }
        self.bit_reverse();
        let scale = complex_ifft(&mut self.work, self.order, &self.sin_table);
        for (out, pair) in output.iter_mut().zip(self.work.chunks_exact(2)) {
            *out = pair[0];
        }
        scale
    }

    fn bit_reverse(&mut self) {
        for &(i, j) in &self.swaps {
            self.work.swap(2 * i, 2 * j);
            self.work.swap(2 * i + 1, 2 * j + 1);
        }
    }
}

/// In-place decimation-in-time complex FFT on bit-reversed input.
///
/// Every stage divides by two with rounding, so the result is scaled by
/// `1 / 2^stages`.
fn complex_fft(frfi: &mut [i16], stages: usize, sin_table: &[i16]) {
    let n = 1usize << stages;
    let mut l = 1usize;
    let mut k = MAX_ORDER - 1;

    while l < n {
        let istep = l << 1;
        for m in 0..l {
            let w = m << k;
            let wr = i32::from(sin_table[w + SIN_TABLE_LEN / 4]);
            let wi = -i32::from(sin_table[w]);

            for i in (m..n).step_by(istep) {
                let j = i + l;
                let (tr, ti) = twiddle(frfi, j, wr, wi);
                let qr = i32::from(frfi[2 * i]) << CFFT_SHIFT;
                let qi = i32::from(frfi[2 * i + 1]) << CFFT_SHIFT;

                frfi[2 * j] = ((qr - tr + CFFT_ROUND2) >> (1 + CFFT_SHIFT)) as i16;
                frfi[2 * j + 1] = ((qi - ti + CFFT_ROUND2) >> (1 + CFFT_SHIFT)) as i16;
                frfi[2 * i] = ((qr + tr + CFFT_ROUND2) >> (1 + CFFT_SHIFT)) as i16;
                frfi[2 * i + 1] = ((qi + ti + CFFT_ROUND2) >> (1 + CFFT_SHIFT)) as i16;
            }
        }
        k -= 1;
        l = istep;
    }
}

/// In-place inverse complex FFT on bit-reversed input with per-stage
/// dynamic scaling. Returns the accumulated right-shift.
fn complex_ifft(frfi: &mut [i16], stages: usize, sin_table: &[i16]) -> i32 {
    let n = 1usize << stages;
    let mut scale = 0;
    let mut l = 1usize;
    let mut k = MAX_ORDER - 1;

    while l < n {
        let peak = frfi[..2 * n]
            .iter()
            .map(|&v| i32::from(v).abs())
            .max()
            .unwrap_or(0);

        let mut shift = 0;
        let mut round2 = 1 << (CFFT_SHIFT - 1);
        if peak > IFFT_SCALE_THRESHOLD_1 {
            shift += 1;
            scale += 1;
            round2 <<= 1;
        }
        if peak > IFFT_SCALE_THRESHOLD_2 {
            shift += 1;
            scale += 1;
            round2 <<= 1;
        }

        let istep = l << 1;
        for m in 0..l {
            let w = m << k;
            let wr = i32::from(sin_table[w + SIN_TABLE_LEN / 4]);
            let wi = i32::from(sin_table[w]);

            for i in (m..n).step_by(istep) {
                let j = i + l;
                let (tr, ti) = twiddle(frfi, j, wr, wi);
                let qr = i32::from(frfi[2 * i]) << CFFT_SHIFT;
                let qi = i32::from(frfi[2 * i + 1]) << CFFT_SHIFT;

                let s = shift + CFFT_SHIFT;
                frfi[2 * j] = ((qr - tr + round2) >> s) as i16;
                frfi[2 * j + 1] = ((qi - ti + round2) >> s) as i16;
                frfi[2 * i] = ((qr + tr + round2) >> s) as i16;
                frfi[2 * i + 1] = ((qi + ti + round2) >> s) as i16;
            }
        }
        k -= 1;
        l = istep;
    }

    scale
}

/// Multiplies element `j` by the twiddle `(wr, wi)`, keeping
/// [`CFFT_SHIFT`] fractional bits.
#[inline]
fn twiddle(frfi: &[i16], j: usize, wr: i32, wi: i32) -> (i32, i32) {
    let re = i32::from(frfi[2 * j]);
    let im = i32::from(frfi[2 * j + 1]);
    let tr = (wr * re - wi * im + CFFT_ROUND) >> (15 - CFFT_SHIFT);
    let ti = (wr * im + wi * re + CFFT_ROUND) >> (15 - CFFT_SHIFT);
    (tr, ti)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;

    fn roundtrip(fft: &mut RealFft, signal: &[i16]) -> Vec<i32> {
        let n = fft.len();
        let mut spectrum = vec![0i16; n + 2];
        let mut restored = vec![0i16; n];
        fft.forward(signal, &mut spectrum);
        let scale = fft.inverse(&spectrum, &mut restored);
        restored.iter().map(|&v| i32::from(v) << scale).collect()
    }

    #[test]
    fn impulse_gives_flat_spectrum() {
        let mut fft = RealFft::new(7);
        let mut signal = [0i16; 128];
        signal[0] = 12800;
        let mut spectrum = [0i16; 130];
        fft.forward(&signal, &mut spectrum);

        for k in 0..=64 {
            assert_eq!(spectrum[2 * k], 100, "bin {k} real");
            assert_eq!(spectrum[2 * k + 1], 0, "bin {k} imag");
        }
    }

    #[test]
    fn zero_input() {
        let mut fft = RealFft::new(7);
        let mut spectrum = [1i16; 130];
        fft.forward(&[0; 128], &mut spectrum);
        assert!(spectrum.iter().all(|&v| v == 0));

        let mut restored = [1i16; 128];
        let scale = fft.inverse(&spectrum, &mut restored);
        assert_eq!(scale, 0);
        assert!(restored.iter().all(|&v| v == 0));
    }

    #[test]
    fn tone_lands_in_its_bin() {
        let mut fft = RealFft::new(7);
        let signal: Vec<i16> = (0..128)
            .map(|i| (8000.0 * (2.0 * PI * 5.0 * i as f64 / 128.0).cos()).round() as i16)
            .collect();
        let mut spectrum = [0i16; 130];
        fft.forward(&signal, &mut spectrum);

        // A cosine of amplitude A splits into A/2 at bins +-k; scaled by 1/n.
        let peak = i32::from(spectrum[10]);
        assert!((peak - 4000).abs() <= 4, "bin 5 real = {peak}");
        for k in (0..=64).filter(|&k| k != 5) {
            let re = i32::from(spectrum[2 * k]).abs();
            let im = i32::from(spectrum[2 * k + 1]).abs();
            assert!(re <= 4 && im <= 4, "leakage at bin {k}: ({re}, {im})");
        }
    }

    #[test]
    fn roundtrip_tone() {
        let mut fft = RealFft::new(7);
        let signal: Vec<i16> = (0..128)
            .map(|i| (10000.0 * (2.0 * PI * 3.0 * i as f64 / 128.0).sin()).round() as i16)
            .collect();
        let restored = roundtrip(&mut fft, &signal);
        for (i, (&o, &r)) in signal.iter().zip(&restored).enumerate() {
            assert!(
                (i32::from(o) - r).abs() <= 64,
                "mismatch at {i}: input={o}, restored={r}"
            );
        }
    }

    #[test]
    fn inverse_scale_grows_with_level() {
        let mut fft = RealFft::new(7);
        let mut quiet = [0i16; 130];
        let mut loud = [0i16; 130];
        quiet[2] = 100;
        loud[2] = 16000;
        let mut out = [0i16; 128];
        let quiet_scale = fft.inverse(&quiet, &mut out);
        let loud_scale = fft.inverse(&loud, &mut out);
        assert_eq!(quiet_scale, 0);
        assert!(loud_scale > quiet_scale, "loud scale {loud_scale}");
    }

    #[test]
    #[should_panic(expected = "<= 10")]
    fn rejects_large_order() {
        let _ = RealFft::new(11);
    }

    #[test]
    #[should_panic(expected = ">= 1")]
    fn rejects_order_zero() {
        let _ = RealFft::new(0);
    }

    #[proptest]
    fn roundtrip_error_is_bounded(
        #[strategy(3..=8usize)] order: usize,
        #[strategy(prop::collection::vec(-12000i16..=12000, 1usize << #order))] signal: Vec<i16>,
    ) {
        let mut fft = RealFft::new(order);
        let restored = roundtrip(&mut fft, &signal);

        let n = signal.len() as f64;
        let signal_rms =
            (signal.iter().map(|&v| f64::from(v).powi(2)).sum::<f64>() / n).sqrt();
        let error_rms = (signal
            .iter()
            .zip(&restored)
            .map(|(&o, &r)| (f64::from(o) - f64::from(r)).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        prop_assert!(
            error_rms <= 0.02 * signal_rms + 24.0,
            "order {order}: error rms {error_rms}, signal rms {signal_rms}"
        );
    }

    #[proptest]
    fn hermitian_edges_are_real(
        #[strategy(prop::collection::vec(any::<i16>(), 128))] signal: Vec<i16>,
    ) {
        let mut fft = RealFft::new(7);
        let mut spectrum = [0i16; 130];
        fft.forward(&signal, &mut spectrum);
        // DC and Nyquist of a real signal carry no imaginary part.
        prop_assert!(spectrum[1].abs() <= 1, "DC imag {}", spectrum[1]);
        prop_assert!(spectrum[129].abs() <= 1, "Nyquist imag {}", spectrum[129]);
    }
}

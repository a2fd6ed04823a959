//! Far-end to near-end delay estimation on binary spectra.
//!
//! Each magnitude spectrum is reduced to a 32-bit word: one bit per band in
//! `BAND_FIRST..=BAND_LAST`, set where the band exceeds its slowly tracked
//! mean. The near-end word is compared against every word in the far-end
//! history by counting differing bits; the history offset with the lowest
//! smoothed bit count is the delay candidate.

use std::fmt;

use crate::common::{MAX_DELAY, PART_LEN1};

const BAND_FIRST: usize = 12;
const BAND_LAST: usize = 43;

/// Right shifts of the bit-count smoothing when the far-end word is empty.
const SHIFTS_AT_ZERO: i32 = 13;
const SHIFTS_LINEAR_SLOPE: i32 = 3;

// Probabilities are bit counts in Q9.
const MAX_BIT_COUNTS_Q9: i32 = 32 << 9;
const PROBABILITY_OFFSET: i32 = 1024;
const PROBABILITY_LOWER_LIMIT: i32 = 8704;
const PROBABILITY_MIN_SPREAD: i32 = 2816;

const THRESHOLD_SMOOTHING_SHIFTS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DelayEstimatorError {
    /// The spectrum does not have `PART_LEN1` bins.
    SpectrumLength(usize),
    /// The spectrum's Q-domain is above 15.
    QDomain(i16),
}

impl fmt::Display for DelayEstimatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpectrumLength(len) => write!(f, "expected {PART_LEN1} bins, got {len}"),
            Self::QDomain(q) => write!(f, "Q-domain {q} exceeds 15"),
        }
    }
}

impl std::error::Error for DelayEstimatorError {}

/// `mean += (value - mean) >> shifts`, rounding toward zero.
fn mean_estimator(value: i32, shifts: i32, mean: &mut i32) {
    let diff = value.wrapping_sub(*mean);
    let step = if diff < 0 {
        -((-diff) >> shifts)
    } else {
        diff >> shifts
    };
    *mean = mean.wrapping_add(step);
}

/// Adaptive per-band threshold that turns a spectrum into a bit word.
#[derive(Debug, Clone)]
struct BinarySpectrum {
    threshold: [i32; PART_LEN1],
    initialized: bool,
}

impl Default for BinarySpectrum {
    fn default() -> Self {
        Self {
            threshold: [0; PART_LEN1],
            initialized: false,
        }
    }
}

impl BinarySpectrum {
    fn binarize(&mut self, spectrum: &[u16], q: i16) -> Result<u32, DelayEstimatorError> {
        if spectrum.len() != PART_LEN1 {
            return Err(DelayEstimatorError::SpectrumLength(spectrum.len()));
        }
        if !(0..=15).contains(&q) {
            return Err(DelayEstimatorError::QDomain(q));
        }
        let to_q15 = |v: u16| i32::from(v).wrapping_shl((15 - q) as u32);

        if !self.initialized {
            for band in BAND_FIRST..=BAND_LAST {
                if spectrum[band] > 0 {
                    self.threshold[band] = to_q15(spectrum[band]) >> 1;
                    self.initialized = true;
                }
            }
        }

        let mut word = 0u32;
        for band in BAND_FIRST..=BAND_LAST {
            let value = to_q15(spectrum[band]);
            mean_estimator(value, THRESHOLD_SMOOTHING_SHIFTS, &mut self.threshold[band]);
            if value > self.threshold[band] {
                word |= 1 << (band - BAND_FIRST);
            }
        }
        Ok(word)
    }
}

/// Block delay estimator over a `MAX_DELAY`-deep far-end history.
#[derive(Debug, Clone)]
pub(crate) struct BinaryDelayEstimator {
    far: BinarySpectrum,
    near: BinarySpectrum,
    /// Newest first.
    far_history: [u32; MAX_DELAY],
    far_bit_counts: [i32; MAX_DELAY],
    mean_bit_counts: [i32; MAX_DELAY],
    minimum_probability: i32,
    last_delay_probability: i32,
    last_delay: Option<usize>,
}

impl Default for BinaryDelayEstimator {
    fn default() -> Self {
        Self {
            far: BinarySpectrum::default(),
            near: BinarySpectrum::default(),
            far_history: [0; MAX_DELAY],
            far_bit_counts: [0; MAX_DELAY],
            mean_bit_counts: [20 << 9; MAX_DELAY],
            minimum_probability: MAX_BIT_COUNTS_Q9,
            last_delay_probability: MAX_BIT_COUNTS_Q9,
            last_delay: None,
        }
    }
}

impl BinaryDelayEstimator {
    /// Pushes the newest far-end spectrum into the history.
    pub(crate) fn add_far_spectrum(
        &mut self,
        spectrum: &[u16],
        q: i16,
    ) -> Result<(), DelayEstimatorError> {
        let word = self.far.binarize(spectrum, q)?;
        self.far_history.copy_within(..MAX_DELAY - 1, 1);
        self.far_history[0] = word;
        self.far_bit_counts.copy_within(..MAX_DELAY - 1, 1);
        self.far_bit_counts[0] = word.count_ones() as i32;
        Ok(())
    }

    /// Matches a near-end spectrum against the far-end history.
    ///
    /// Returns the last committed delay in blocks, or `None` while no
    /// reliable estimate has been made.
    pub(crate) fn process_near_spectrum(
        &mut self,
        spectrum: &[u16],
        q: i16,
    ) -> Result<Option<usize>, DelayEstimatorError> {
        let near = self.near.binarize(spectrum, q)?;

        for ((mean, &far), &far_bits) in self
            .mean_bit_counts
            .iter_mut()
            .zip(&self.far_history)
            .zip(&self.far_bit_counts)
        {
            // A silent far-end word carries no information about the echo.
            if far_bits > 0 {
                let bit_count = ((near ^ far).count_ones() as i32) << 9;
                let shifts = SHIFTS_AT_ZERO - ((SHIFTS_LINEAR_SLOPE * far_bits) >> 4);
                mean_estimator(bit_count, shifts, mean);
            }
        }

        let mut candidate = None;
        let mut best = MAX_BIT_COUNTS_Q9;
        let mut worst = 0;
        for (i, &mean) in self.mean_bit_counts.iter().enumerate() {
            if mean < best {
                best = mean;
                candidate = Some(i);
            }
            if mean > worst {
                worst = mean;
            }
        }
        let valley_depth = worst - best;

        if self.minimum_probability > PROBABILITY_LOWER_LIMIT
            && valley_depth > PROBABILITY_MIN_SPREAD
        {
            let threshold = (best + PROBABILITY_OFFSET).max(PROBABILITY_LOWER_LIMIT);
            self.minimum_probability = self.minimum_probability.min(threshold);
        }
        self.last_delay_probability += 1;

        let valid = valley_depth > PROBABILITY_OFFSET
            && (best < self.minimum_probability || best < self.last_delay_probability);
        let non_stationary = self.far_bit_counts.iter().any(|&bits| bits > 0);

        if non_stationary && valid {
            self.last_delay = candidate;
            if best < self.last_delay_probability {
                self.last_delay_probability = best;
            }
        }
        Ok(self.last_delay)
    }

    #[cfg(test)]
    pub(crate) fn last_delay(&self) -> Option<usize> {
        self.last_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_math::Lcg;

    /// Spectrum with a random on/off pattern over the estimator bands.
    fn random_spectrum(rng: &mut Lcg) -> [u16; PART_LEN1] {
        let mut s = [0u16; PART_LEN1];
        for v in &mut s {
            *v = if rng.next_u15() > 16384 { 2000 } else { 100 };
        }
        s
    }

    #[test]
    fn unknown_before_any_input() {
        let mut est = BinaryDelayEstimator::default();
        let near = [0u16; PART_LEN1];
        assert_eq!(est.process_near_spectrum(&near, 0), Ok(None));
    }

    #[test]
    fn silent_far_end_never_commits() {
        let mut est = BinaryDelayEstimator::default();
        let mut rng = Lcg::new(7);
        let silence = [0u16; PART_LEN1];
        for _ in 0..500 {
            est.add_far_spectrum(&silence, 0).unwrap();
            let near = random_spectrum(&mut rng);
            assert_eq!(est.process_near_spectrum(&near, 0), Ok(None));
        }
    }

    #[test]
    fn finds_known_delay() {
        const DELAY: usize = 9;
        let mut est = BinaryDelayEstimator::default();
        let mut rng = Lcg::new(12345);
        let mut past: Vec<[u16; PART_LEN1]> = Vec::new();
        for _ in 0..800 {
            let far = random_spectrum(&mut rng);
            past.push(far);
            est.add_far_spectrum(&far, 0).unwrap();
            let near = if past.len() > DELAY {
                past[past.len() - 1 - DELAY]
            } else {
                [0; PART_LEN1]
            };
            est.process_near_spectrum(&near, 0).unwrap();
        }
        assert_eq!(est.last_delay(), Some(DELAY));
    }

    #[test]
    fn rejects_bad_input() {
        let mut est = BinaryDelayEstimator::default();
        assert_eq!(
            est.add_far_spectrum(&[0; 10], 0),
            Err(DelayEstimatorError::SpectrumLength(10))
        );
        assert_eq!(
            est.process_near_spectrum(&[0; PART_LEN1], 16),
            Err(DelayEstimatorError::QDomain(16))
        );
    }

    #[test]
    fn mean_estimator_rounds_toward_zero() {
        let mut mean = 0;
        mean_estimator(100, 3, &mut mean);
        assert_eq!(mean, 12);
        let mut mean = 0;
        mean_estimator(-100, 3, &mut mean);
        assert_eq!(mean, -12);
    }
}

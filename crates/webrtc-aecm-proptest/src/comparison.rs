//! Integer frame comparison and level utilities.

use std::fmt;

/// Result of comparing two sample buffers.
#[derive(Debug)]
pub struct ComparisonResult {
    pub max_abs_diff: i32,
    pub max_abs_diff_index: usize,
    pub mean_abs_diff: f64,
    pub mismatches: usize,
    pub total: usize,
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_abs_diff={} (at index {}), mean_abs_diff={:.2}, mismatches={}/{}",
            self.max_abs_diff,
            self.max_abs_diff_index,
            self.mean_abs_diff,
            self.mismatches,
            self.total,
        )
    }
}

/// Compare two i16 slices, returning detailed statistics.
pub fn compare_i16(actual: &[i16], expected: &[i16], tolerance: i32) -> ComparisonResult {
    assert_eq!(actual.len(), expected.len(), "Length mismatch");
    let total = actual.len();
    let mut max_abs_diff = 0;
    let mut max_abs_diff_index = 0;
    let mut sum_abs_diff = 0i64;
    let mut mismatches = 0;

    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let diff = (i32::from(a) - i32::from(e)).abs();
        sum_abs_diff += i64::from(diff);
        if diff > max_abs_diff {
            max_abs_diff = diff;
            max_abs_diff_index = i;
        }
        if diff > tolerance {
            mismatches += 1;
        }
    }

    ComparisonResult {
        max_abs_diff,
        max_abs_diff_index,
        mean_abs_diff: if total > 0 {
            sum_abs_diff as f64 / total as f64
        } else {
            0.0
        },
        mismatches,
        total,
    }
}

/// Assert two i16 slices are bit-exact.
pub fn assert_i16_exact(actual: &[i16], expected: &[i16]) {
    assert_eq!(actual.len(), expected.len(), "Length mismatch");
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(a, e, "Mismatch at index {i}: actual={a}, expected={e}");
    }
}

/// Assert two i16 slices agree within an absolute tolerance.
pub fn assert_i16_near(actual: &[i16], expected: &[i16], tolerance: i32) {
    let result = compare_i16(actual, expected, tolerance);
    assert!(
        result.mismatches == 0,
        "i16 comparison failed: {result}\n  actual[{}]={}, expected[{}]={}",
        result.max_abs_diff_index,
        actual[result.max_abs_diff_index],
        result.max_abs_diff_index,
        expected[result.max_abs_diff_index],
    );
}

/// Sum of squared samples.
pub fn energy(samples: &[i16]) -> f64 {
    samples.iter().map(|&s| f64::from(s).powi(2)).sum()
}

/// Attenuation from `input` to `output` in dB.
///
/// Silent output against any input is reported as infinite attenuation.
pub fn attenuation_db(input: &[i16], output: &[i16]) -> f64 {
    let out = energy(output);
    if out == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (energy(input) / out).log10()
}

//! Frame generators for property-based testing.
//!
//! Provides both strategy functions (for use with `#[strategy(...)]`) and
//! `Arbitrary`-deriving structs for the canceller's call shapes.

use proptest::prelude::*;
use test_strategy::Arbitrary;

/// Number of coefficients in an echo path.
pub const ECHO_PATH_LEN: usize = 65;

/// A sample rate accepted by the canceller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum SampleRate {
    #[weight(1)]
    Hz8000,
    #[weight(1)]
    Hz16000,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            Self::Hz8000 => 8000,
            Self::Hz16000 => 16000,
        }
    }

    /// Number of samples in a 10 ms frame at this rate.
    pub fn frame_size(self) -> usize {
        (self.hz() / 100) as usize
    }
}

/// A frame length accepted by the canceller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum FrameLen {
    #[weight(1)]
    Short,
    #[weight(1)]
    Long,
}

impl FrameLen {
    pub fn samples(self) -> usize {
        match self {
            Self::Short => 80,
            Self::Long => 160,
        }
    }
}

/// One far-end buffer call followed by one near-end process call.
#[derive(Debug, Clone, Arbitrary)]
pub struct FarNearCall {
    pub sample_rate: SampleRate,
    pub frame_len: FrameLen,
    #[strategy(audio_frame_i16(#frame_len.samples()))]
    pub far: Vec<i16>,
    #[strategy(audio_frame_i16(#frame_len.samples()))]
    pub near: Vec<i16>,
    #[strategy(latency_ms())]
    pub latency_ms: i16,
}

/// A run of consecutive far/near frame pairs sharing one call shape.
#[derive(Debug, Clone, Arbitrary)]
pub struct CallSequence {
    pub sample_rate: SampleRate,
    pub frame_len: FrameLen,
    #[strategy(frame_pairs(#frame_len.samples(), 8000, 1..=24))]
    pub frames: Vec<(Vec<i16>, Vec<i16>)>,
    #[strategy(0i16..=200)]
    pub latency_ms: i16,
}

/// Generate a full-scale frame of `len` samples.
pub fn audio_frame_i16(len: usize) -> impl Strategy<Value = Vec<i16>> {
    proptest::collection::vec(i16::MIN..=i16::MAX, len..=len)
}

/// Generate a frame of `len` samples bounded by `amplitude`.
pub fn quiet_frame_i16(len: usize, amplitude: i16) -> impl Strategy<Value = Vec<i16>> {
    let amplitude = amplitude.max(0);
    proptest::collection::vec(-amplitude..=amplitude, len..=len)
}

/// Generate `count` far/near pairs of `len` samples bounded by `amplitude`.
pub fn frame_pairs(
    len: usize,
    amplitude: i16,
    count: impl Into<proptest::collection::SizeRange>,
) -> impl Strategy<Value = Vec<(Vec<i16>, Vec<i16>)>> {
    proptest::collection::vec(
        (quiet_frame_i16(len, amplitude), quiet_frame_i16(len, amplitude)),
        count,
    )
}

/// Generate a reported device latency, including out-of-range values.
pub fn latency_ms() -> impl Strategy<Value = i16> {
    prop_oneof![
        4 => 0i16..=500,
        1 => i16::MIN..0,
        1 => 501i16..=i16::MAX,
    ]
}

/// Generate a legal echo path.
pub fn echo_path() -> impl Strategy<Value = Vec<i16>> {
    proptest::collection::vec(0i16..=i16::MAX, ECHO_PATH_LEN..=ECHO_PATH_LEN)
}

/// Serialize echo path coefficients as little-endian bytes.
pub fn echo_path_bytes(path: &[i16]) -> Vec<u8> {
    path.iter().flat_map(|c| c.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[proptest]
    fn frame_i16_correct_length(#[strategy(audio_frame_i16(160))] frame: Vec<i16>) {
        assert_eq!(frame.len(), 160);
    }

    #[proptest]
    fn quiet_frame_bounded(#[strategy(quiet_frame_i16(80, 300))] frame: Vec<i16>) {
        assert_eq!(frame.len(), 80);
        assert!(frame.iter().all(|s| s.unsigned_abs() <= 300));
    }

    #[proptest]
    fn call_struct_consistent(call: FarNearCall) {
        assert_eq!(call.far.len(), call.frame_len.samples());
        assert_eq!(call.near.len(), call.frame_len.samples());
    }

    #[proptest]
    fn sequence_struct_consistent(seq: CallSequence) {
        assert!(!seq.frames.is_empty() && seq.frames.len() <= 24);
        for (far, near) in &seq.frames {
            assert_eq!(far.len(), seq.frame_len.samples());
            assert_eq!(near.len(), seq.frame_len.samples());
            assert!(far.iter().chain(near).all(|s| s.unsigned_abs() <= 8000));
        }
        assert!((0..=200).contains(&seq.latency_ms));
    }

    #[proptest]
    fn sample_rate_valid_values(sr: SampleRate) {
        assert!([8000, 16000].contains(&sr.hz()));
        assert_eq!(sr.frame_size() * 100, sr.hz() as usize);
    }

    #[proptest]
    fn echo_path_is_legal(#[strategy(echo_path())] path: Vec<i16>) {
        assert_eq!(path.len(), ECHO_PATH_LEN);
        assert!(path.iter().all(|&c| c >= 0));
        assert_eq!(echo_path_bytes(&path).len(), 2 * ECHO_PATH_LEN);
    }

    #[test]
    fn echo_path_bytes_little_endian() {
        assert_eq!(echo_path_bytes(&[0x0102, 0x7f00]), [0x02, 0x01, 0x00, 0x7f]);
    }
}

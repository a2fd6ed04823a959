//! Public echo control API.
//!
//! [`EchoControlMobile`] owns the far-end synchronizer and the block core
//! for one audio stream. The caller feeds played-out audio through
//! [`buffer_far_end`](EchoControlMobile::buffer_far_end) and captured audio
//! through [`process`](EchoControlMobile::process), one 10 ms frame at a
//! time, from a single thread.

use derive_more::Debug;
use tracing::{debug, warn};
use webrtc_simd::{SimdBackend, detect_backend};

use crate::{
    aecm_core::AecmCore,
    common::{FRAME_LEN, PART_LEN1, SampleRate, valid_frame_len},
    config::AecmConfig,
    delay_estimator::DelayEstimatorError,
    synchronizer::Synchronizer,
};

// ─── Error ───────────────────────────────────────────────────────────

/// Errors returned by the echo canceller.
///
/// A call that fails leaves the instance unchanged, except for
/// [`Error::Unspecified`] which is raised mid-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Called before [`EchoControlMobile::init`].
    Uninitialized,
    /// Unsupported rate, frame length, config value or echo path size.
    InvalidArgument,
    /// An internal stage failed.
    Unspecified,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "echo control not initialized"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Unspecified => write!(f, "unspecified processing error"),
        }
    }
}

impl std::error::Error for Error {}

impl From<DelayEstimatorError> for Error {
    fn from(err: DelayEstimatorError) -> Self {
        debug!(%err, "delay estimation failed");
        Self::Unspecified
    }
}

/// Recoverable conditions reported by [`EchoControlMobile::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    /// The reported latency was negative or above 500 ms and was clamped.
    DelayClamped,
}

// ─── Engine ──────────────────────────────────────────────────────────

const MAX_REPORTED_DELAY_MS: i16 = 500;
/// Processing adds one frame on top of the reported device latency.
const PROCESSING_DELAY_MS: i32 = 10;
/// Clamped latencies are logged this many times per instance.
const MAX_CLAMP_WARNINGS: u32 = 5;

#[derive(Debug)]
struct Engine {
    rate: SampleRate,
    sync: Synchronizer,
    core: AecmCore,
}

/// Mobile acoustic echo canceller for one stream.
#[derive(Debug)]
pub struct EchoControlMobile {
    backend: SimdBackend,
    #[debug(skip)]
    engine: Option<Engine>,
    clamp_warnings: u32,
}

impl Default for EchoControlMobile {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoControlMobile {
    /// Creates an uninitialized instance using the best kernel backend for
    /// this CPU.
    pub fn new() -> Self {
        Self::with_backend(detect_backend())
    }

    /// Creates an uninitialized instance with an explicit kernel backend.
    pub fn with_backend(backend: SimdBackend) -> Self {
        debug!(backend = backend.name(), "echo control backend selected");
        Self {
            backend,
            engine: None,
            clamp_warnings: 0,
        }
    }

    /// (Re)initializes for `sample_rate_hz` (8000 or 16000), dropping all
    /// state and restoring the default configuration.
    pub fn init(&mut self, sample_rate_hz: u32) -> Result<(), Error> {
        let rate = SampleRate::from_hz(sample_rate_hz).ok_or(Error::InvalidArgument)?;
        self.engine = Some(Engine {
            rate,
            sync: Synchronizer::new(rate),
            core: AecmCore::new(self.backend, rate),
        });
        debug!(sample_rate_hz, "echo control initialized");
        Ok(())
    }

    fn engine(&self) -> Result<&Engine, Error> {
        self.engine.as_ref().ok_or(Error::Uninitialized)
    }

    fn engine_mut(&mut self) -> Result<&mut Engine, Error> {
        self.engine.as_mut().ok_or(Error::Uninitialized)
    }

    /// Applies `config` from the next processed block.
    pub fn set_config(&mut self, config: AecmConfig) -> Result<(), Error> {
        let engine = self.engine_mut()?;
        config.validate()?;
        engine.core.set_config(config);
        debug!(?config, "echo control config updated");
        Ok(())
    }

    /// The active configuration.
    pub fn config(&self) -> Result<AecmConfig, Error> {
        Ok(*self.engine()?.core.config())
    }

    /// Size of a serialized echo path.
    pub const fn echo_path_size_bytes() -> usize {
        PART_LEN1 * std::mem::size_of::<i16>()
    }

    /// Writes the stored echo path as little-endian Q12 coefficients.
    pub fn get_echo_path(&self, echo_path: &mut [u8]) -> Result<(), Error> {
        let engine = self.engine()?;
        if echo_path.len() != Self::echo_path_size_bytes() {
            return Err(Error::InvalidArgument);
        }
        for (bytes, coefficient) in echo_path.chunks_exact_mut(2).zip(engine.core.echo_path()) {
            bytes.copy_from_slice(&coefficient.to_le_bytes());
        }
        Ok(())
    }

    /// Replaces both channel estimates with a path from
    /// [`get_echo_path`](Self::get_echo_path).
    pub fn init_echo_path(&mut self, echo_path: &[u8]) -> Result<(), Error> {
        let engine = self.engine_mut()?;
        if echo_path.len() != Self::echo_path_size_bytes() {
            return Err(Error::InvalidArgument);
        }
        let mut path = [0i16; PART_LEN1];
        for (coefficient, bytes) in path.iter_mut().zip(echo_path.chunks_exact(2)) {
            *coefficient = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        engine.core.init_echo_path(&path);
        Ok(())
    }

    /// Queues one far-end frame of 80 or 160 samples.
    pub fn buffer_far_end(&mut self, far_end: &[i16]) -> Result<(), Error> {
        let engine = self.engine_mut()?;
        if !valid_frame_len(far_end.len()) {
            return Err(Error::InvalidArgument);
        }
        let written = engine.sync.buffer_far_end(far_end);
        if written < far_end.len() {
            debug!(dropped = far_end.len() - written, "far-end buffer full");
        }
        Ok(())
    }

    /// Removes echo from one near-end frame.
    ///
    /// `near_clean` is the near end after noise suppression, if any; it is
    /// the signal that gets filtered while `near_noisy` drives adaptation.
    /// `reported_delay_ms` is the current playout-to-capture latency.
    /// While the far-end buffer is still settling the output is a copy of
    /// the near end.
    pub fn process(
        &mut self,
        near_noisy: &[i16],
        near_clean: Option<&[i16]>,
        out: &mut [i16],
        reported_delay_ms: i16,
    ) -> Result<Option<Warning>, Error> {
        if self.engine.is_none() {
            return Err(Error::Uninitialized);
        }
        let len = near_noisy.len();
        if !valid_frame_len(len)
            || out.len() != len
            || near_clean.is_some_and(|clean| clean.len() != len)
        {
            return Err(Error::InvalidArgument);
        }

        let clamped = reported_delay_ms.clamp(0, MAX_REPORTED_DELAY_MS);
        let warning = if clamped != reported_delay_ms {
            if self.clamp_warnings < MAX_CLAMP_WARNINGS {
                self.clamp_warnings += 1;
                warn!(reported_delay_ms, clamped, "reported delay out of range");
            }
            Some(Warning::DelayClamped)
        } else {
            None
        };

        let engine = self.engine_mut()?;
        engine
            .sync
            .set_latency_ms(i32::from(clamped) + PROCESSING_DELAY_MS);

        let (noisy_frames, _) = near_noisy.as_chunks::<FRAME_LEN>();
        let frames = noisy_frames.len();

        if engine.sync.in_startup() {
            out.copy_from_slice(near_clean.unwrap_or(near_noisy));
            engine.sync.estimate_buffer_size(frames);
            return Ok(warning);
        }

        let clean_frames = near_clean.map(|clean| clean.as_chunks::<FRAME_LEN>().0);
        let (out_frames, _) = out.as_chunks_mut::<FRAME_LEN>();
        // The delay estimate runs once all far-end frames of the call are read.
        let estimate_at = (engine.rate.mult() - 1).min(frames - 1);
        let mut far = [0i16; FRAME_LEN];
        for (i, (noisy, out)) in noisy_frames.iter().zip(out_frames).enumerate() {
            engine.sync.read_far_frame(i, &mut far);
            if i == estimate_at {
                engine.sync.estimate_known_delay();
            }
            let clean = clean_frames.map(|frames| &frames[i]);
            engine
                .core
                .process_frame(&far, noisy, clean, engine.sync.known_delay(), out)?;
        }
        Ok(warning)
    }

    /// The kernel backend chosen at construction.
    pub fn kernel_backend(&self) -> SimdBackend {
        self.backend
    }

    /// The rate given to the last successful [`init`](Self::init).
    pub fn sample_rate(&self) -> Option<SampleRate> {
        self.engine.as_ref().map(|engine| engine.rate)
    }

    /// Far-end samples waiting to be processed.
    pub fn far_end_buffered_samples(&self) -> Result<usize, Error> {
        Ok(self.engine()?.sync.buffered_samples())
    }

    /// The committed far-end delay, in samples.
    pub fn known_delay_samples(&self) -> Result<usize, Error> {
        Ok(self.engine()?.sync.known_delay())
    }

    /// Whether cancellation is still waiting for the far-end buffer.
    pub fn is_in_startup(&self) -> Result<bool, Error> {
        Ok(self.engine()?.sync.in_startup())
    }
}

#[cfg(test)]
mod tests {
    use std::{f64::consts::PI, fmt::Debug};

    use test_strategy::proptest;
    use webrtc_aecm_proptest::{
        comparison::{assert_i16_exact, energy},
        generators::{CallSequence, FarNearCall, echo_path, echo_path_bytes},
    };

    use super::*;
    use crate::{config::EchoMode, fixed_math::Lcg};

    fn initialized(rate: u32) -> EchoControlMobile {
        let mut aecm = EchoControlMobile::new();
        aecm.init(rate).unwrap();
        aecm
    }

    /// Feeds silence at a steady 50 ms latency until startup ends.
    fn settle(aecm: &mut EchoControlMobile, len: usize) {
        let mut out = vec![0i16; len];
        for _ in 0..200 {
            aecm.buffer_far_end(&vec![0; len]).unwrap();
            aecm.process(&vec![0; len], None, &mut out, 50).unwrap();
            if !aecm.is_in_startup().unwrap() {
                return;
            }
        }
        panic!("startup did not end");
    }

    #[test]
    fn calls_before_init_fail() {
        let mut aecm = EchoControlMobile::new();
        let mut out = [0i16; 80];
        let mut path = [0u8; 130];
        assert_eq!(aecm.buffer_far_end(&[0; 80]), Err(Error::Uninitialized));
        assert_eq!(aecm.process(&[0; 80], None, &mut out, 0), Err(Error::Uninitialized));
        assert_eq!(aecm.set_config(AecmConfig::default()), Err(Error::Uninitialized));
        assert_eq!(aecm.config(), Err(Error::Uninitialized));
        assert_eq!(aecm.get_echo_path(&mut path), Err(Error::Uninitialized));
        assert_eq!(aecm.init_echo_path(&path), Err(Error::Uninitialized));
        assert_eq!(aecm.far_end_buffered_samples(), Err(Error::Uninitialized));
        assert_eq!(aecm.sample_rate(), None);
    }

    #[test]
    fn init_validates_rate() {
        let mut aecm = EchoControlMobile::new();
        assert_eq!(aecm.init(44100), Err(Error::InvalidArgument));
        assert_eq!(aecm.init(32000), Err(Error::InvalidArgument));
        assert_eq!(aecm.init(16000), Ok(()));
        assert_eq!(aecm.sample_rate(), Some(SampleRate::Hz16000));
    }

    #[test]
    fn bad_lengths_leave_state_unchanged() {
        let mut aecm = initialized(8000);
        aecm.buffer_far_end(&[1; 80]).unwrap();
        assert_eq!(aecm.buffer_far_end(&[1; 100]), Err(Error::InvalidArgument));
        assert_eq!(aecm.buffer_far_end(&[]), Err(Error::InvalidArgument));
        assert_eq!(aecm.far_end_buffered_samples(), Ok(80));

        let mut out80 = [0i16; 80];
        let mut out160 = [0i16; 160];
        assert_eq!(
            aecm.process(&[0; 80], None, &mut out160, 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            aecm.process(&[0; 80], Some(&[0i16; 160][..]), &mut out80, 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            aecm.process(&[0; 240], None, &mut [0; 240], 0),
            Err(Error::InvalidArgument)
        );
        assert_eq!(aecm.far_end_buffered_samples(), Ok(80));
        assert_eq!(aecm.is_in_startup(), Ok(true));
    }

    #[test]
    fn buffering_grows_by_frame_length() {
        for (rate, len) in [(8000, 80), (8000, 160), (16000, 80), (16000, 160)] {
            let mut aecm = initialized(rate);
            for k in 1..=10 {
                aecm.buffer_far_end(&vec![100; len]).unwrap();
                assert_eq!(aecm.far_end_buffered_samples(), Ok(k * len));
            }
        }
    }

    #[test]
    fn buffer_saturates_at_capacity() {
        let mut aecm = initialized(8000);
        for _ in 0..60 {
            aecm.buffer_far_end(&[1; 80]).unwrap();
        }
        assert_eq!(
            aecm.far_end_buffered_samples(),
            Ok(crate::common::BUF_SIZE_FRAMES * FRAME_LEN)
        );
    }

    #[test]
    fn startup_copies_near_end() {
        let mut aecm = initialized(8000);
        let near: Vec<i16> = (0..80).map(|i| i * 10).collect();
        let clean: Vec<i16> = (0..80).map(|i| -i).collect();
        let mut out = [0i16; 80];
        aecm.process(&near, None, &mut out, 50).unwrap();
        assert_eq!(&out[..], &near[..]);
        aecm.process(&near, Some(clean.as_slice()), &mut out, 50).unwrap();
        assert_eq!(&out[..], &clean[..]);
    }

    #[test]
    fn silence_in_silence_out() {
        for (rate, len) in [(8000, 80), (8000, 160), (16000, 80), (16000, 160)] {
            let mut aecm = initialized(rate);
            settle(&mut aecm, len);
            let mut out = vec![1i16; len];
            for _ in 0..100 {
                aecm.buffer_far_end(&vec![0; len]).unwrap();
                aecm.process(&vec![0; len], None, &mut out, 50).unwrap();
                assert!(out.iter().all(|&s| s == 0), "rate {rate} len {len}");
            }
        }
    }

    fn steady_occupancy(rate: u32, len: usize) -> (usize, Vec<usize>) {
        let mut aecm = initialized(rate);
        settle(&mut aecm, len);
        let target = aecm.far_end_buffered_samples().unwrap();
        let mut out = vec![0i16; len];
        let occupancy = (0..500)
            .map(|k| {
                let far: Vec<i16> = (0..len).map(|i| ((i + k) % 50) as i16 * 40).collect();
                aecm.buffer_far_end(&far).unwrap();
                aecm.process(&far, None, &mut out, 50).unwrap();
                aecm.far_end_buffered_samples().unwrap()
            })
            .collect();
        (target, occupancy)
    }

    #[test]
    fn occupancy_stays_at_target() {
        for (rate, len) in [(8000, 80), (8000, 160)] {
            let (target, occupancy) = steady_occupancy(rate, len);
            for (k, buffered) in occupancy.into_iter().enumerate() {
                assert!(buffered.abs_diff(target) <= 64, "frame {k}: {buffered} vs {target}");
            }
        }
    }

    #[test]
    fn wideband_occupancy_settles_after_stuffing() {
        // The wideband drift margin is tighter than the startup target, so
        // the buffer is stuffed up once before it holds steady.
        for len in [80, 160] {
            let (target, occupancy) = steady_occupancy(16000, len);
            let settled = occupancy[10];
            assert!(settled.abs_diff(target) <= 4 * FRAME_LEN, "{settled} vs {target}");
            for (k, &buffered) in occupancy.iter().enumerate().skip(10) {
                assert!(buffered.abs_diff(settled) <= 64, "frame {k}: {buffered} vs {settled}");
            }
        }
    }

    #[test]
    fn delay_is_clamped_with_warning() {
        let mut aecm = initialized(8000);
        let mut out = [0i16; 80];
        assert_eq!(aecm.process(&[0; 80], None, &mut out, -5), Ok(Some(Warning::DelayClamped)));
        assert_eq!(aecm.process(&[0; 80], None, &mut out, 501), Ok(Some(Warning::DelayClamped)));
        assert_eq!(aecm.process(&[0; 80], None, &mut out, 500), Ok(None));
        assert_eq!(aecm.process(&[0; 80], None, &mut out, 0), Ok(None));
        for _ in 0..10 {
            aecm.process(&[0; 80], None, &mut out, i16::MAX).unwrap();
        }
        assert_eq!(aecm.clamp_warnings, MAX_CLAMP_WARNINGS);
    }

    #[test]
    fn config_roundtrip_and_reset_on_init() {
        let mut aecm = initialized(16000);
        let config = AecmConfig {
            comfort_noise: false,
            echo_mode: EchoMode::try_from(1).unwrap(),
            nlp_enabled: false,
            fixed_delay_blocks: Some(3),
            ..Default::default()
        };
        aecm.set_config(config).unwrap();
        assert_eq!(aecm.config(), Ok(config));

        let invalid = AecmConfig {
            fixed_delay_blocks: Some(crate::common::MAX_DELAY),
            ..config
        };
        assert_eq!(aecm.set_config(invalid), Err(Error::InvalidArgument));
        assert_eq!(aecm.config(), Ok(config));

        aecm.init(8000).unwrap();
        assert_eq!(aecm.config(), Ok(AecmConfig::default()));
    }

    #[test]
    fn echo_path_size_is_checked() {
        let mut aecm = initialized(8000);
        assert_eq!(EchoControlMobile::echo_path_size_bytes(), 130);
        let mut short = [0u8; 64];
        assert_eq!(aecm.get_echo_path(&mut short), Err(Error::InvalidArgument));
        assert_eq!(aecm.init_echo_path(&short), Err(Error::InvalidArgument));
    }

    #[test]
    fn default_echo_path_serializes_little_endian() {
        let aecm = initialized(8000);
        let mut path = [0u8; 130];
        aecm.get_echo_path(&mut path).unwrap();
        // First coefficient 2040 = 0x07F8.
        assert_eq!(&path[..2], &[0xF8, 0x07]);
    }

    /// A beating tone echoed at twice its level, plus uncorrelated near-end
    /// noise of `noise` peak amplitude, at 16 kHz with a 40 ms latency.
    ///
    /// Returns near end and output of the loud calls made after startup.
    fn loud_echo(aecm: &mut EchoControlMobile, frames: usize, noise: i32) -> (Vec<i16>, Vec<i16>) {
        let mut rng = Lcg::new(2024);
        let mut near_kept = Vec::new();
        let mut out_kept = Vec::new();
        let mut out = [0i16; 160];
        for k in 0..frames {
            let loud = (k / 40) % 2 == 0;
            let envelope = if loud { 4000.0 } else { 200.0 };
            let far: Vec<i16> = (0..160)
                .map(|i| {
                    let t = (k * 160 + i) as f64;
                    (envelope * (2.0 * PI * t / 23.0).sin() * (2.0 * PI * t / 3100.0).cos())
                        as i16
                })
                .collect();
            let near: Vec<i16> = far
                .iter()
                .map(|&s| {
                    let local = (i32::from(rng.next_u15()) - 16384) * noise / 16384;
                    (2 * i32::from(s) + local) as i16
                })
                .collect();
            let settling = aecm.is_in_startup().unwrap();
            aecm.buffer_far_end(&far).unwrap();
            aecm.process(&near, None, &mut out, 40).unwrap();
            if loud && !settling {
                near_kept.extend_from_slice(&near);
                out_kept.extend_from_slice(&out);
            }
        }
        (near_kept, out_kept)
    }

    #[test]
    fn echo_path_carries_over_to_fresh_engines() {
        let mut trained = initialized(16000);
        loud_echo(&mut trained, 300, 0);
        let mut path = [0u8; 130];
        trained.get_echo_path(&mut path).unwrap();

        let mut loaded = initialized(16000);
        let mut twin = initialized(16000);
        loaded.init_echo_path(&path).unwrap();
        twin.init_echo_path(&path).unwrap();
        let mut restored = [0u8; 130];
        loaded.get_echo_path(&mut restored).unwrap();
        assert_eq!(path, restored);

        let (near, loaded_out) = loud_echo(&mut loaded, 120, 300);
        let (_, twin_out) = loud_echo(&mut twin, 120, 300);
        assert_i16_exact(&loaded_out, &twin_out);

        // An untrained engine starts from the default path, well below the
        // echo level, and needs some blocks to catch up.
        let mut untrained = initialized(16000);
        let (_, untrained_out) = loud_echo(&mut untrained, 120, 300);
        let early = 10 * 160;
        assert!(near.len() >= early, "too few loud calls after startup");
        let loaded_residual = energy(&loaded_out[..early]);
        let untrained_residual = energy(&untrained_out[..early]);
        assert!(
            loaded_residual < untrained_residual,
            "loaded {loaded_residual} vs untrained {untrained_residual}"
        );
        assert!(loaded_residual < energy(&near[..early]));
    }

    #[test]
    fn explicit_backend_is_used() {
        let aecm = EchoControlMobile::with_backend(SimdBackend::Scalar);
        assert_eq!(aecm.kernel_backend(), SimdBackend::Scalar);
    }

    #[test]
    fn instances_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<EchoControlMobile>();
    }

    #[test]
    fn errors_display() {
        assert_eq!(Error::Uninitialized.to_string(), "echo control not initialized");
        assert_eq!(
            Error::from(DelayEstimatorError::QDomain(16)),
            Error::Unspecified
        );
    }

    #[proptest]
    fn first_call_copies_near_end(call: FarNearCall) {
        let mut aecm = initialized(call.sample_rate.hz());
        aecm.buffer_far_end(&call.far).unwrap();
        let mut out = vec![0i16; call.near.len()];
        let warning = aecm.process(&call.near, None, &mut out, call.latency_ms).unwrap();
        assert_i16_exact(&out, &call.near);
        let in_range = (0..=MAX_REPORTED_DELAY_MS).contains(&call.latency_ms);
        assert_eq!(warning.is_none(), in_range);
    }

    #[proptest]
    fn call_sequences_are_accepted(seq: CallSequence) {
        let mut aecm = initialized(seq.sample_rate.hz());
        let mut out = vec![0i16; seq.frame_len.samples()];
        for (far, near) in &seq.frames {
            aecm.buffer_far_end(far).unwrap();
            assert_eq!(aecm.process(near, None, &mut out, seq.latency_ms), Ok(None));
            assert!(aecm.far_end_buffered_samples().unwrap() <= 4000);
        }
    }

    #[proptest]
    fn echo_path_bytes_roundtrip(#[strategy(echo_path())] path: Vec<i16>) {
        let mut aecm = initialized(8000);
        aecm.init_echo_path(&echo_path_bytes(&path)).unwrap();
        let mut restored = vec![0u8; EchoControlMobile::echo_path_size_bytes()];
        aecm.get_echo_path(&mut restored).unwrap();
        assert_eq!(restored, echo_path_bytes(&path));
    }
}

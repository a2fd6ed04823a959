//! The block pipeline of the mobile echo canceller.
//!
//! [`AecmCore`] consumes synchronized 80-sample frames. It re-blocks them
//! into 64-sample blocks and runs, per block: analysis transforms, delay
//! alignment, energy tracking, channel estimation, suppression and comfort
//! noise, then synthesis with overlap-add.

use std::num::NonZero;

use derive_more::Debug;
use webrtc_ring_buffer::RingBuffer;
use webrtc_simd::SimdBackend;

use crate::{
    channel::ChannelEstimator,
    comfort_noise::ComfortNoise,
    common::{FAR_BUF_LEN, FRAME_LEN, PART_LEN, PART_LEN1, PART_LEN2, SampleRate},
    config::AecmConfig,
    delay_estimator::{BinaryDelayEstimator, DelayEstimatorError},
    energy::{EnergyTracker, StartupPhase},
    far_history::FarHistory,
    fixed_math::mul_16_16_rshift_round,
    suppression::{BlockDomains, SuppressionGain, WienerFilter, apply_nlp, limit_upper_band},
    transform::{BlockTransform, Complex16},
};

/// Frame FIFOs hold one frame plus a partial block.
const FRAME_FIFO_LEN: NonZero<usize> = NonZero::new(FRAME_LEN + PART_LEN).expect("non-zero");

/// Largest known delay the core far-end delay line can honor.
pub(crate) const MAX_KNOWN_DELAY: usize = FAR_BUF_LEN - FRAME_LEN;

/// Delays far-end frames by the synchronizer's known delay.
#[derive(Debug, Clone)]
struct FarDelayLine {
    #[debug(skip)]
    buf: [i16; FAR_BUF_LEN],
    write_pos: usize,
    read_pos: usize,
    last_known_delay: usize,
}

impl Default for FarDelayLine {
    fn default() -> Self {
        Self {
            buf: [0; FAR_BUF_LEN],
            write_pos: 0,
            read_pos: 0,
            last_known_delay: 0,
        }
    }
}

impl FarDelayLine {
    fn write(&mut self, frame: &[i16; FRAME_LEN]) {
        for &sample in frame {
            self.buf[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % FAR_BUF_LEN;
        }
    }

    /// Reads the next frame, first moving the read cursor back by the
    /// change in known delay.
    fn fetch(&mut self, known_delay: usize, frame: &mut [i16; FRAME_LEN]) {
        let known_delay = known_delay.min(MAX_KNOWN_DELAY);
        let change = known_delay as isize - self.last_known_delay as isize;
        self.read_pos = (self.read_pos as isize - change).rem_euclid(FAR_BUF_LEN as isize) as usize;
        self.last_known_delay = known_delay;
        for sample in frame {
            *sample = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % FAR_BUF_LEN;
        }
    }
}

/// Block-domain state of one echo canceller.
#[derive(Debug)]
pub(crate) struct AecmCore {
    backend: SimdBackend,
    rate: SampleRate,
    config: AecmConfig,
    far_line: FarDelayLine,
    #[debug(skip)]
    far_frames: RingBuffer,
    #[debug(skip)]
    noisy_frames: RingBuffer,
    #[debug(skip)]
    clean_frames: RingBuffer,
    #[debug(skip)]
    out_frames: RingBuffer,
    #[debug(skip)]
    x_buf: [i16; PART_LEN2],
    #[debug(skip)]
    d_buf_noisy: [i16; PART_LEN2],
    #[debug(skip)]
    d_buf_clean: [i16; PART_LEN2],
    #[debug(skip)]
    transform: BlockTransform,
    #[debug(skip)]
    far_history: FarHistory,
    #[debug(skip)]
    delay_estimator: BinaryDelayEstimator,
    #[debug(skip)]
    energy: EnergyTracker,
    #[debug(skip)]
    channel: ChannelEstimator,
    suppression: SuppressionGain,
    #[debug(skip)]
    wiener: WienerFilter,
    #[debug(skip)]
    comfort_noise: ComfortNoise,
    noisy_q: i16,
    noisy_q_old: i16,
    clean_q: i16,
    clean_q_old: i16,
    total_blocks: u32,
    delay_blocks: usize,
}

impl AecmCore {
    pub(crate) fn new(backend: SimdBackend, rate: SampleRate) -> Self {
        Self {
            backend,
            rate,
            config: AecmConfig::default(),
            far_line: FarDelayLine::default(),
            far_frames: RingBuffer::new(FRAME_FIFO_LEN),
            noisy_frames: RingBuffer::new(FRAME_FIFO_LEN),
            clean_frames: RingBuffer::new(FRAME_FIFO_LEN),
            out_frames: RingBuffer::new(FRAME_FIFO_LEN),
            x_buf: [0; PART_LEN2],
            d_buf_noisy: [0; PART_LEN2],
            d_buf_clean: [0; PART_LEN2],
            transform: BlockTransform::default(),
            far_history: FarHistory::default(),
            delay_estimator: BinaryDelayEstimator::default(),
            energy: EnergyTracker::default(),
            channel: ChannelEstimator::new(rate.default_echo_path()),
            suppression: SuppressionGain::default(),
            wiener: WienerFilter::default(),
            comfort_noise: ComfortNoise::default(),
            noisy_q: 0,
            noisy_q_old: 0,
            clean_q: 0,
            clean_q_old: 0,
            total_blocks: 0,
            delay_blocks: 0,
        }
    }

    pub(crate) fn config(&self) -> &AecmConfig {
        &self.config
    }

    /// Applies a validated configuration. A new echo mode restarts the
    /// suppression gain at the mode's default.
    pub(crate) fn set_config(&mut self, config: AecmConfig) {
        if config.echo_mode != self.config.echo_mode {
            self.suppression = SuppressionGain::new(config.echo_mode);
        }
        self.config = config;
    }

    /// The stored echo path, Q12 per bin.
    pub(crate) fn echo_path(&self) -> &[i16; PART_LEN1] {
        &self.channel.channels.stored
    }

    /// Replaces both channel estimates with `echo_path`.
    pub(crate) fn init_echo_path(&mut self, echo_path: &[i16; PART_LEN1]) {
        self.channel.init_echo_path(echo_path);
    }

    /// Far-end alignment used by the latest block.
    pub(crate) fn delay_blocks(&self) -> usize {
        self.delay_blocks
    }

    /// Processes one synchronized frame.
    ///
    /// `far` is written into the core delay line and the frame `known_delay`
    /// samples older is used as the reference.
    pub(crate) fn process_frame(
        &mut self,
        far: &[i16; FRAME_LEN],
        near_noisy: &[i16; FRAME_LEN],
        near_clean: Option<&[i16; FRAME_LEN]>,
        known_delay: usize,
        out: &mut [i16; FRAME_LEN],
    ) -> Result<(), DelayEstimatorError> {
        let mut far_frame = [0i16; FRAME_LEN];
        self.far_line.write(far);
        self.far_line.fetch(known_delay, &mut far_frame);

        self.far_frames.write(&far_frame);
        self.noisy_frames.write(near_noisy);
        if let Some(clean) = near_clean {
            self.clean_frames.write(clean);
        }

        let mut far_block = [0i16; PART_LEN];
        let mut noisy_block = [0i16; PART_LEN];
        let mut clean_block = [0i16; PART_LEN];
        let mut out_block = [0i16; PART_LEN];
        while self.far_frames.available_read() >= PART_LEN {
            self.far_frames.read(&mut far_block);
            self.noisy_frames.read(&mut noisy_block);
            let clean = if near_clean.is_some() {
                self.clean_frames.read(&mut clean_block);
                Some(&clean_block)
            } else {
                None
            };
            self.process_block(&far_block, &noisy_block, clean, &mut out_block)?;
            self.out_frames.write(&out_block);
        }

        // Only the first frame yields less than a frame of output.
        let available = self.out_frames.available_read();
        if available < FRAME_LEN {
            self.out_frames.move_read_ptr(available as isize - FRAME_LEN as isize);
        }
        self.out_frames.read(out);
        Ok(())
    }

    fn process_block(
        &mut self,
        far: &[i16; PART_LEN],
        noisy: &[i16; PART_LEN],
        clean: Option<&[i16; PART_LEN]>,
        out: &mut [i16; PART_LEN],
    ) -> Result<(), DelayEstimatorError> {
        let phase = StartupPhase::from_block_count(self.total_blocks);

        self.x_buf[PART_LEN..].copy_from_slice(far);
        self.d_buf_noisy[PART_LEN..].copy_from_slice(noisy);
        if let Some(clean) = clean {
            self.d_buf_clean[PART_LEN..].copy_from_slice(clean);
        }

        // `dfw` ends up holding the spectrum that gets suppressed: clean if
        // given, noisy otherwise.
        let mode = self.config.magnitude;
        let mut dfw = [Complex16::default(); PART_LEN1];
        let far_spectrum = self.transform.forward(&self.x_buf, mode, &mut dfw);
        let noisy = self.transform.forward(&self.d_buf_noisy, mode, &mut dfw);
        self.noisy_q_old = self.noisy_q;
        self.noisy_q = noisy.q;
        let near = if clean.is_some() {
            let spectrum = self.transform.forward(&self.d_buf_clean, mode, &mut dfw);
            self.clean_q_old = self.clean_q;
            self.clean_q = spectrum.q;
            spectrum
        } else {
            self.clean_q_old = self.noisy_q_old;
            self.clean_q = self.noisy_q;
            noisy
        };

        self.far_history.push(&far_spectrum);
        self.delay_estimator.add_far_spectrum(&far_spectrum.magnitude, far_spectrum.q)?;
        let estimated = self.delay_estimator.process_near_spectrum(&noisy.magnitude, noisy.q)?;
        // No lookahead while the delay is unknown.
        self.delay_blocks = self.config.fixed_delay_blocks.or(estimated).unwrap_or(0);
        let aligned = *self.far_history.aligned(self.delay_blocks);

        let mut echo_est = [0i32; PART_LEN1];
        self.energy.update(
            self.backend,
            &mut self.channel.channels,
            &aligned,
            noisy.sum(),
            noisy.q,
            phase,
            &mut echo_est,
        );
        let mu = self.energy.step_size(phase);
        self.total_blocks = self.total_blocks.saturating_add(1);
        self.channel.update(
            self.backend,
            &self.energy,
            phase,
            &aligned,
            &noisy.magnitude,
            noisy.q,
            mu,
            &mut echo_est,
        );
        let sup_gain = self.suppression.update(&self.energy);

        let mut hnl = [0i16; PART_LEN1];
        let domains = BlockDomains {
            far_q: aligned.q,
            near_q: self.clean_q,
            near_q_old: self.clean_q_old,
        };
        let num_positive =
            self.wiener.gains(&echo_est, sup_gain, &near.magnitude, domains, &mut hnl);
        if self.rate == SampleRate::Hz16000 {
            limit_upper_band(&mut hnl);
        }
        if self.config.nlp_enabled {
            apply_nlp(&mut hnl, num_positive);
        }

        let mut efw = [Complex16::default(); PART_LEN1];
        for ((e, d), &h) in efw.iter_mut().zip(&dfw).zip(&hnl) {
            e.re = mul_16_16_rshift_round(d.re, h, 14) as i16;
            e.im = mul_16_16_rshift_round(d.im, h, 14) as i16;
        }
        if self.config.comfort_noise {
            self.comfort_noise.apply(&near.magnitude, self.clean_q, &hnl, &mut efw);
        }
        self.transform.inverse(&efw, self.clean_q, out);

        self.x_buf.copy_within(PART_LEN.., 0);
        self.d_buf_noisy.copy_within(PART_LEN.., 0);
        if clean.is_some() {
            self.d_buf_clean.copy_within(PART_LEN.., 0);
        }
        Ok(())
    }
}

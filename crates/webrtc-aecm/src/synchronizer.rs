//! Far-end buffering and delay synchronization.
//!
//! Far-end frames arrive from the playout callback, near-end frames from the
//! capture callback, and the two are only loosely coupled through the
//! device latency the caller reports with every capture frame. The
//! synchronizer keeps roughly that latency worth of far-end audio buffered:
//!
//! 1. During startup it waits for the reported latency to settle, derives a
//!    target buffer size from it and fills (or trims) the buffer to that
//!    size. Cancellation is off until then.
//! 2. Afterwards it stuffs the buffer when it runs far behind the reported
//!    latency, and keeps a filtered delay estimate from which a "known
//!    delay" is committed with hysteresis.

use std::num::NonZero;

use tracing::debug;
use webrtc_ring_buffer::RingBuffer;

use crate::{
    aecm_core::MAX_KNOWN_DELAY,
    common::{BUF_SIZE_FRAMES, FAR_BUF_LEN, FRAME_LEN, SAMPLES_PER_MS_NB, SampleRate},
};

const FAR_BUF_CAPACITY: NonZero<usize> =
    NonZero::new(BUF_SIZE_FRAMES * FRAME_LEN).expect("non-zero");

/// Startup ends after this many stable latency reports (in 10 ms units).
const STABLE_REPORTS: usize = 6;
/// Startup stops waiting for a stable latency after 0.5 s.
const MAX_STARTUP_REPORTS: usize = 50;

// Known-delay hysteresis, in samples.
const DELAY_DIFF_HIGH: i32 = 224;
const DELAY_DIFF_LOW: i32 = 96;
const DELAY_CHANGE_BLOCKS: u32 = 25;
const KNOWN_DELAY_MARGIN: i32 = 160;

/// Decides how much far-end audio to buffer before cancelling.
#[derive(Debug, Clone, Default)]
struct BufferSizeEstimator {
    /// Target in frames once decided.
    target: Option<usize>,
    reports: usize,
    stable: usize,
    first_ms: i32,
    sum_ms: i32,
}

impl BufferSizeEstimator {
    /// Feeds one latency report; `blocks_per_10ms` weighs each report.
    fn observe(&mut self, ms: i32, mult: usize, blocks_per_10ms: usize) {
        if self.target.is_some() {
            return;
        }
        self.reports += 1;

        if self.stable == 0 {
            self.first_ms = ms;
            self.sum_ms = 0;
        }
        let tolerance = (ms / 5).max(SAMPLES_PER_MS_NB);
        if (self.first_ms - ms).abs() < tolerance {
            self.sum_ms += ms;
            self.stable += 1;
        } else {
            self.stable = 0;
        }

        let mult = mult as i32;
        if self.stable * blocks_per_10ms >= STABLE_REPORTS {
            // Three quarters of the average latency, in frames.
            let frames = 3 * self.sum_ms * mult / (self.stable as i32 * 40);
            self.target = Some((frames.max(0) as usize).min(BUF_SIZE_FRAMES));
        }
        if self.reports * blocks_per_10ms > MAX_STARTUP_REPORTS {
            let frames = 3 * ms * mult / 40;
            self.target = Some((frames.max(0) as usize).min(BUF_SIZE_FRAMES));
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Synchronizer {
    mult: usize,
    far_buf: RingBuffer,
    /// Last frame read per sub-frame index, replayed on underrun.
    far_old: [[i16; FRAME_LEN]; 2],
    startup: Option<BufferSizeEstimator>,
    /// Reported latency plus the fixed 10 ms of processing.
    ms_in_snd_card: i32,
    filt_delay: i32,
    known_delay: i32,
    last_delay_diff: i32,
    delay_change_blocks: u32,
    delay_changed: bool,
}

impl Synchronizer {
    pub(crate) fn new(rate: SampleRate) -> Self {
        Self {
            mult: rate.mult(),
            far_buf: RingBuffer::new(FAR_BUF_CAPACITY),
            far_old: [[0; FRAME_LEN]; 2],
            startup: Some(BufferSizeEstimator::default()),
            ms_in_snd_card: 0,
            filt_delay: 0,
            known_delay: 0,
            last_delay_diff: 0,
            delay_change_blocks: 0,
            delay_changed: true,
        }
    }

    pub(crate) fn in_startup(&self) -> bool {
        self.startup.is_some()
    }

    pub(crate) fn buffered_samples(&self) -> usize {
        self.far_buf.available_read()
    }

    /// Delay of the far end relative to the buffer, in samples.
    pub(crate) fn known_delay(&self) -> usize {
        self.known_delay as usize
    }

    /// Records the latency reported with the current capture frame.
    pub(crate) fn set_latency_ms(&mut self, ms: i32) {
        self.ms_in_snd_card = ms;
    }

    fn snd_card_samples(&self) -> i32 {
        self.ms_in_snd_card * SAMPLES_PER_MS_NB * self.mult as i32
    }

    /// Appends far-end samples; returns how many fit.
    pub(crate) fn buffer_far_end(&mut self, samples: &[i16]) -> usize {
        if !self.in_startup() {
            self.compensate_drift();
        }
        self.far_buf.write(samples)
    }

    /// Runs the startup estimator for one capture call of `frames` core
    /// frames. Ends startup once the buffer holds the target amount.
    pub(crate) fn estimate_buffer_size(&mut self, frames: usize) {
        let Some(estimator) = self.startup.as_mut() else {
            return;
        };
        let blocks_per_10ms = (frames / self.mult).max(1);
        estimator.observe(self.ms_in_snd_card, self.mult, blocks_per_10ms);

        let Some(target) = estimator.target else {
            return;
        };
        let filled = self.far_buf.available_read() / FRAME_LEN;
        if filled < target {
            return;
        }
        if filled > target {
            let excess = self.far_buf.available_read() - target * FRAME_LEN;
            self.far_buf.move_read_ptr(excess as isize);
        }
        self.startup = None;
        debug!(
            target_frames = target,
            buffered = self.far_buf.available_read(),
            "far-end buffer settled, echo cancellation enabled"
        );
    }

    /// Reads the far-end frame for sub-frame `index`, replaying the last
    /// one read at that index when the buffer runs dry.
    pub(crate) fn read_far_frame(&mut self, index: usize, frame: &mut [i16; FRAME_LEN]) {
        let slot = &mut self.far_old[index.min(1)];
        if self.far_buf.available_read() >= FRAME_LEN {
            self.far_buf.read(frame);
            *slot = *frame;
        } else {
            *frame = *slot;
        }
    }

    /// Stuffs the buffer when it holds much less than the reported latency.
    fn compensate_drift(&mut self) {
        const MAX_STUFF: i32 = 10 * FRAME_LEN as i32;

        let buffered = self.far_buf.available_read() as i32;
        let snd_card = self.snd_card_samples();
        let gap = snd_card - buffered;
        if gap > (FAR_BUF_LEN - FRAME_LEN * self.mult) as i32 {
            let stuff = ((snd_card >> 1) - buffered)
                .max(FRAME_LEN as i32)
                .min(MAX_STUFF);
            let moved = self.far_buf.move_read_ptr(-(stuff as isize));
            self.delay_changed = true;
            debug!(gap, stuffed = -moved, "far-end buffer stuffed");
        }
    }

    /// Updates the filtered delay and commits a new known delay once it
    /// has stayed outside the dead zone long enough.
    pub(crate) fn estimate_known_delay(&mut self) {
        if self.delay_changed {
            // The buffer jumped; restart the hysteresis window.
            self.delay_changed = false;
            self.delay_change_blocks = 0;
        }

        let mut raw = self.snd_card_samples() - self.far_buf.available_read() as i32;
        if raw < FRAME_LEN as i32 {
            self.far_buf.move_read_ptr(FRAME_LEN as isize);
            raw += FRAME_LEN as i32;
        }
        self.filt_delay = ((8 * self.filt_delay + 2 * raw) / 10).max(0);

        let diff = self.filt_delay - self.known_delay;
        if diff > DELAY_DIFF_HIGH {
            if self.last_delay_diff < DELAY_DIFF_LOW {
                self.delay_change_blocks = 0;
            } else {
                self.delay_change_blocks += 1;
            }
        } else if diff < DELAY_DIFF_LOW && self.known_delay > 0 {
            if self.last_delay_diff > DELAY_DIFF_HIGH {
                self.delay_change_blocks = 0;
            } else {
                self.delay_change_blocks += 1;
            }
        } else {
            self.delay_change_blocks = 0;
        }
        self.last_delay_diff = diff;

        if self.delay_change_blocks > DELAY_CHANGE_BLOCKS {
            let known = (self.filt_delay - KNOWN_DELAY_MARGIN).max(0);
            if known != self.known_delay {
                debug!(
                    known_delay = known,
                    clamped = known as usize > MAX_KNOWN_DELAY,
                    "known delay updated"
                );
            }
            self.known_delay = known;
        }
    }
}

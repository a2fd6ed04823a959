//! Circular log of past far-end spectra for delay alignment.

use crate::{common::MAX_DELAY, q_spectrum::QSpectrum};

#[derive(Debug, Clone)]
pub(crate) struct FarHistory {
    slots: Box<[QSpectrum; MAX_DELAY]>,
    /// Slot of the most recent push; starts one past the end so that the
    /// first push lands on slot 0.
    pos: usize,
}

impl Default for FarHistory {
    fn default() -> Self {
        Self {
            slots: Box::new([QSpectrum::default(); MAX_DELAY]),
            pos: MAX_DELAY,
        }
    }
}

impl FarHistory {
    pub(crate) fn push(&mut self, spectrum: &QSpectrum) {
        self.pos += 1;
        if self.pos >= MAX_DELAY {
            self.pos = 0;
        }
        self.slots[self.pos] = *spectrum;
    }

    /// The spectrum pushed `delay` blocks before the latest one.
    ///
    /// `delay` is clamped into `[0, MAX_DELAY)`.
    pub(crate) fn aligned(&self, delay: usize) -> &QSpectrum {
        let delay = delay.min(MAX_DELAY - 1);
        let pos = self.pos.min(MAX_DELAY - 1);
        &self.slots[(pos + MAX_DELAY - delay) % MAX_DELAY]
    }
}

//! Runtime configuration of the mobile echo canceller.

use crate::{common::MAX_DELAY, echo_control_mobile::Error};

/// Suppression aggressiveness, from quietest earpiece to loudspeaker.
///
/// Each step doubles the suppression gain curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoMode {
    QuietEarpieceOrHeadset,
    Earpiece,
    LoudEarpiece,
    #[default]
    Speakerphone,
    LoudSpeakerphone,
}

impl EchoMode {
    /// Applies this mode's scaling to a Q8 gain parameter.
    pub(crate) fn scale(self, value: i16) -> i16 {
        match self {
            Self::QuietEarpieceOrHeadset => value >> 3,
            Self::Earpiece => value >> 2,
            Self::LoudEarpiece => value >> 1,
            Self::Speakerphone => value,
            Self::LoudSpeakerphone => value << 1,
        }
    }
}

impl TryFrom<i32> for EchoMode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::QuietEarpieceOrHeadset),
            1 => Ok(Self::Earpiece),
            2 => Ok(Self::LoudEarpiece),
            3 => Ok(Self::Speakerphone),
            4 => Ok(Self::LoudSpeakerphone),
            _ => Err(Error::InvalidArgument),
        }
    }
}

impl From<EchoMode> for i32 {
    fn from(mode: EchoMode) -> Self {
        match mode {
            EchoMode::QuietEarpieceOrHeadset => 0,
            EchoMode::Earpiece => 1,
            EchoMode::LoudEarpiece => 2,
            EchoMode::Speakerphone => 3,
            EchoMode::LoudSpeakerphone => 4,
        }
    }
}

/// How bin magnitudes are computed from the complex spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MagnitudeMode {
    /// Integer square root of the power.
    #[default]
    Exact,
    /// Piecewise `alpha * max + beta * min` estimate of the modulus.
    Approximate,
}

/// Echo canceller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AecmConfig {
    /// Inject comfort noise where echo was suppressed.
    pub comfort_noise: bool,
    pub echo_mode: EchoMode,
    pub magnitude: MagnitudeMode,
    /// Hard-clamp near-extreme suppression gains.
    pub nlp_enabled: bool,
    /// Use this far-end alignment (in blocks) instead of the estimated one.
    /// Must be below [`MAX_DELAY`].
    pub fixed_delay_blocks: Option<usize>,
}

impl Default for AecmConfig {
    fn default() -> Self {
        Self {
            comfort_noise: true,
            echo_mode: EchoMode::default(),
            magnitude: MagnitudeMode::default(),
            nlp_enabled: true,
            fixed_delay_blocks: None,
        }
    }
}

impl AecmConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        match self.fixed_delay_blocks {
            Some(delay) if delay >= MAX_DELAY => Err(Error::InvalidArgument),
            _ => Ok(()),
        }
    }
}

//! Mobile echo canceller constants.
//!
//! The thresholds are empirically tuned DSP values; they are kept exactly as
//! named constants.

/// Samples per core frame (10 ms at 8 kHz).
pub const FRAME_LEN: usize = 80;
/// Samples per processing block.
pub const PART_LEN: usize = 64;
/// `log2` of the transform length.
pub(crate) const PART_LEN_SHIFT: i16 = 7;
/// Frequency bins per block.
pub const PART_LEN1: usize = PART_LEN + 1;
/// Transform length.
pub(crate) const PART_LEN2: usize = PART_LEN << 1;
/// Transform order for a [`PART_LEN2`]-point FFT.
pub(crate) const PART_LEN_ORDER: usize = 7;

/// Core far-end frame ring length in samples.
pub(crate) const FAR_BUF_LEN: usize = PART_LEN << 2;
/// Depth of the far-end spectrum history in blocks.
pub const MAX_DELAY: usize = 100;
/// Length of the log-energy histories.
pub(crate) const MAX_BUF_LEN: usize = 64;

/// Blocks in startup phase 0.
pub(crate) const CONV_LEN: u32 = 512;
/// Blocks until the startup phases end.
pub(crate) const CONV_LEN2: u32 = CONV_LEN << 1;

// Energy levels are log2 in Q8.

/// Far-end activity floor.
pub(crate) const FAR_ENERGY_MIN: i16 = 1025;
/// Minimum far-end min/max spread for voice activity after startup.
pub(crate) const FAR_ENERGY_DIFF: i16 = 929;
/// Width of the voice activity region above the far-end minimum.
pub(crate) const FAR_ENERGY_VAD_REGION: i16 = 230;
pub(crate) const ENERGY_DEV_OFFSET: i16 = 0;
/// Near/echo deviation above which double-talk is assumed.
pub(crate) const ENERGY_DEV_TOL: i16 = 400;

// NLMS step sizes as right shifts.

pub(crate) const MU_MIN: i16 = 10;
pub(crate) const MU_MAX: i16 = 1;
pub(crate) const MU_DIFF: i16 = 9;

// Channel promotion.

pub(crate) const MIN_MSE_COUNT: usize = 20;
pub(crate) const MIN_MSE_DIFF: i32 = 29;
pub(crate) const MSE_RESOLUTION: i32 = 5;

/// Fractional bits of the 16-bit channel.
pub(crate) const RESOLUTION_CHANNEL16: i16 = 12;
/// Fractional bits of the 32-bit adaptive channel.
pub(crate) const RESOLUTION_CHANNEL32: i16 = 28;
/// Per-bin far-end floor below which a bin is not adapted.
pub(crate) const CHANNEL_VAD: u16 = 16;

/// Fractional bits of the suppression gain.
pub(crate) const RESOLUTION_SUPGAIN: i16 = 8;
pub(crate) const SUPGAIN_DEFAULT: i16 = 1 << RESOLUTION_SUPGAIN;
pub(crate) const SUPGAIN_ERROR_PARAM_A: i16 = 3072;
pub(crate) const SUPGAIN_ERROR_PARAM_B: i16 = 1536;
pub(crate) const SUPGAIN_ERROR_PARAM_D: i16 = SUPGAIN_DEFAULT;
/// Deviation at which the gain curve switches from A..B to B..D.
pub(crate) const SUPGAIN_EPC_DT: i16 = 200;

pub(crate) const ONE_Q14: i16 = 1 << 14;
pub(crate) const NLP_COMP_LOW: i16 = 3277;
pub(crate) const NLP_COMP_HIGH: i16 = ONE_Q14;

/// Far-end buffer capacity of the synchronizer, in core frames.
pub const BUF_SIZE_FRAMES: usize = 50;
/// Samples per millisecond at 8 kHz.
pub(crate) const SAMPLES_PER_MS_NB: i32 = 8;

/// Default stored echo path for 8 kHz, Q12.
pub(crate) const CHANNEL_STORED_8KHZ: [i16; PART_LEN1] = [
    2040, 1815, 1590, 1498, 1405, 1395, 1385, 1418, 1451, 1506, 1562, 1644, 1726, 1804, 1882,
    1918, 1953, 1982, 2010, 2025, 2040, 2034, 2027, 2021, 2014, 1997, 1980, 1925, 1869, 1800,
    1732, 1683, 1635, 1604, 1572, 1545, 1517, 1481, 1444, 1405, 1367, 1331, 1294, 1270, 1245,
    1239, 1233, 1247, 1260, 1282, 1303, 1338, 1373, 1407, 1441, 1470, 1499, 1524, 1549, 1565,
    1582, 1601, 1621, 1649, 1676,
];

/// Default stored echo path for 16 kHz, Q12.
pub(crate) const CHANNEL_STORED_16KHZ: [i16; PART_LEN1] = [
    2040, 1590, 1405, 1385, 1451, 1562, 1726, 1882, 1953, 2010, 2040, 2027, 2014, 1980, 1869,
    1732, 1635, 1572, 1517, 1444, 1367, 1294, 1245, 1233, 1260, 1303, 1373, 1441, 1499, 1549,
    1582, 1621, 1676, 1741, 1802, 1861, 1921, 1983, 2040, 2102, 2170, 2265, 2375, 2515, 2651,
    2781, 2922, 3075, 3253, 3471, 3738, 3976, 4151, 4258, 4308, 4288, 4270, 4253, 4237, 4179,
    4086, 3947, 3757, 3484, 3153,
];

/// Supported sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
}

impl SampleRate {
    /// Validates a rate in Hz.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(Self::Hz8000),
            16000 => Some(Self::Hz16000),
            _ => None,
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            Self::Hz8000 => 8000,
            Self::Hz16000 => 16000,
        }
    }

    /// Rate relative to narrowband (1 or 2).
    pub(crate) fn mult(self) -> usize {
        match self {
            Self::Hz8000 => 1,
            Self::Hz16000 => 2,
        }
    }

    /// Default stored echo path for this rate.
    pub(crate) fn default_echo_path(self) -> &'static [i16; PART_LEN1] {
        match self {
            Self::Hz8000 => &CHANNEL_STORED_8KHZ,
            Self::Hz16000 => &CHANNEL_STORED_16KHZ,
        }
    }
}

/// Returns whether `len` is a supported frame length.
pub(crate) const fn valid_frame_len(len: usize) -> bool {
    len == FRAME_LEN || len == 2 * FRAME_LEN
}

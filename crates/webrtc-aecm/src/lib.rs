//! Mobile acoustic echo canceller.
//!
//! A fixed-point, frequency-domain echo canceller for low-power devices:
//! far-end buffering with device-latency synchronization, an NLMS echo
//! path estimate gated by a stored backup, Wiener-style suppression and
//! comfort noise, all in 16/32-bit integer arithmetic.
//!
//! ```no_run
//! use webrtc_aecm::{AecmConfig, EchoControlMobile};
//!
//! let mut aecm = EchoControlMobile::new();
//! aecm.init(16000)?;
//! aecm.set_config(AecmConfig { comfort_noise: false, ..Default::default() })?;
//!
//! let far = [0i16; 160];
//! let near = [0i16; 160];
//! let mut out = [0i16; 160];
//! aecm.buffer_far_end(&far)?;
//! aecm.process(&near, None, &mut out, 40)?;
//! # Ok::<(), webrtc_aecm::Error>(())
//! ```

mod aecm_core;
mod channel;
mod comfort_noise;
pub mod common;
mod config;
mod delay_estimator;
mod echo_control_mobile;
mod energy;
mod far_history;
mod fixed_math;
mod kernel;
mod q_spectrum;
mod suppression;
mod synchronizer;
mod transform;

pub use common::SampleRate;
pub use config::{AecmConfig, EchoMode, MagnitudeMode};
pub use echo_control_mobile::{EchoControlMobile, Error, Warning};
pub use webrtc_simd::SimdBackend;

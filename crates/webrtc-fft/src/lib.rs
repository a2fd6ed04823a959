//! Fixed-point FFT for WebRTC's mobile echo canceller.
//!
//! - [`RealFft`](real_fft::RealFft): power-of-two real FFT in 16-bit
//!   arithmetic with per-stage dynamic scaling on the inverse path.

#![deny(unsafe_code)]

pub mod real_fft;

pub use real_fft::RealFft;

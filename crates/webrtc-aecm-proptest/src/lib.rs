//! Property-based test support for the mobile echo canceller.
//!
//! Provides 16-bit frame generators shaped like the canceller's call
//! contract and comparison utilities for its integer output.
//!
//! # Usage
//!
//! ```ignore
//! use webrtc_aecm_proptest::generators::*;
//! use test_strategy::proptest;
//!
//! #[proptest]
//! fn my_test(call: FarNearCall) {
//!     assert_eq!(call.far.len(), call.frame_len.samples());
//! }
//! ```

pub mod comparison;
pub mod generators;

pub use proptest;
pub use test_strategy;

//! SIMD abstraction layer for the fixed-point echo canceller.
//!
//! Provides a portable interface over SSE2 and NEON integer intrinsics with
//! runtime CPU feature detection and a scalar fallback.
//!
//! # Design
//!
//! Rather than exposing low-level intrinsics, this crate exposes the
//! **high-level operations** the echo canceller's inner loops need. The
//! scalar backend is the reference; every vectorized backend reproduces it
//! bit for bit, including 32-bit wrap-around of accumulators.
//!
//! The backend is chosen once with [`detect_backend`] and then passed by
//! value to whoever runs the kernels.

mod fallback;

#[cfg(target_arch = "aarch64")]
mod neon;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod sse2;

/// Available SIMD backends, selected at runtime based on CPU features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdBackend {
    /// Scalar fallback, works on all platforms.
    Scalar,
    /// x86/x86_64 SSE2 (128-bit, 8 x i16 lanes).
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    Sse2,
    /// ARM aarch64 NEON (128-bit).
    #[cfg(target_arch = "aarch64")]
    Neon,
}

impl SimdBackend {
    /// Returns the name of this backend.
    pub fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Self::Sse2 => "sse2",
            #[cfg(target_arch = "aarch64")]
            Self::Neon => "neon",
        }
    }

    /// Element-wise widening multiply: `out[i] = a[i] * b[i]`.
    ///
    /// `a`, `b` and `out` must have the same length. The product of an
    /// `i16` and a `u16` always fits in an `i32`.
    pub fn multiply_i16_u16(self, a: &[i16], b: &[u16], out: &mut [i32]) {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(a.len(), out.len());
        match self {
            Self::Scalar => fallback::multiply_i16_u16(a, b, out),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: detect_backend() only returns Sse2 after confirming sse2 support.
            Self::Sse2 => unsafe { sse2::multiply_i16_u16(a, b, out) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: NEON is always available on aarch64.
            Self::Neon => unsafe { neon::multiply_i16_u16(a, b, out) },
        }
    }

    /// Dot product of `a` and `b`, accumulated with 32-bit wrap-around.
    pub fn dot_i16_u16(self, a: &[i16], b: &[u16]) -> u32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Self::Scalar => fallback::dot_i16_u16(a, b),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: detect_backend() only returns Sse2 after confirming sse2 support.
            Self::Sse2 => unsafe { sse2::dot_i16_u16(a, b) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: NEON is always available on aarch64.
            Self::Neon => unsafe { neon::dot_i16_u16(a, b) },
        }
    }

    /// Sum of all elements, accumulated with 32-bit wrap-around.
    pub fn sum_u16(self, x: &[u16]) -> u32 {
        match self {
            Self::Scalar => fallback::sum_u16(x),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: detect_backend() only returns Sse2 after confirming sse2 support.
            Self::Sse2 => unsafe { sse2::sum_u16(x) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: NEON is always available on aarch64.
            Self::Neon => unsafe { neon::sum_u16(x) },
        }
    }

    /// Sum of all elements reinterpreted as `u32`, with wrap-around.
    pub fn sum_i32_wrapping(self, x: &[i32]) -> u32 {
        match self {
            Self::Scalar => fallback::sum_i32_wrapping(x),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: detect_backend() only returns Sse2 after confirming sse2 support.
            Self::Sse2 => unsafe { sse2::sum_i32_wrapping(x) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: NEON is always available on aarch64.
            Self::Neon => unsafe { neon::sum_i32_wrapping(x) },
        }
    }

    /// Widens to 32 bits and moves into the upper half: `out[i] = x[i] << 16`.
    ///
    /// `x` and `out` must have the same length.
    pub fn widen_shl16(self, x: &[i16], out: &mut [i32]) {
        debug_assert_eq!(x.len(), out.len());
        match self {
            Self::Scalar => fallback::widen_shl16(x, out),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            // SAFETY: detect_backend() only returns Sse2 after confirming sse2 support.
            Self::Sse2 => unsafe { sse2::widen_shl16(x, out) },
            #[cfg(target_arch = "aarch64")]
            // SAFETY: NEON is always available on aarch64.
            Self::Neon => unsafe { neon::widen_shl16(x, out) },
        }
    }
}

// Runtime CPU feature detection via cpufeatures (atomic-cached).
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
cpufeatures::new!(has_sse2, "sse2");

/// Detect the best available SIMD backend for the current CPU.
///
/// Uses runtime feature detection on x86/x86_64 (cached atomically after
/// first call via `cpufeatures`). On aarch64, NEON is always available.
/// Falls back to scalar on unknown architectures.
pub fn detect_backend() -> SimdBackend {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if has_sse2::get() {
            return SimdBackend::Sse2;
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        return SimdBackend::Neon;
    }

    #[allow(unreachable_code, reason = "fallback for architectures without SIMD")]
    SimdBackend::Scalar
}

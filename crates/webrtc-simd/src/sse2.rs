//! SSE2 implementations of the integer kernels (x86/x86_64).
//!
//! Lanes are 16-bit on load and widened to 32-bit before accumulation, so
//! the results wrap exactly like the scalar reference.

#[cfg(target_arch = "x86")]
use std::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Signed-by-unsigned 16-bit multiply of eight lanes, widened to two
/// vectors of four 32-bit products.
///
/// `_mm_mulhi_epu16` treats `a` as unsigned; for negative lanes that adds
/// `b << 16` to the product, which is removed from the high half again.
#[inline]
#[target_feature(enable = "sse2")]
fn widening_mul(a: __m128i, b: __m128i) -> (__m128i, __m128i) {
    let lo = _mm_mullo_epi16(a, b);
    let sign = _mm_srai_epi16(a, 15);
    let hi = _mm_sub_epi16(_mm_mulhi_epu16(a, b), _mm_and_si128(sign, b));
    (_mm_unpacklo_epi16(lo, hi), _mm_unpackhi_epi16(lo, hi))
}

#[inline]
#[target_feature(enable = "sse2")]
fn horizontal_sum_epi32(v: __m128i) -> u32 {
    let hi64 = _mm_unpackhi_epi64(v, v);
    let sum64 = _mm_add_epi32(v, hi64);
    let hi32 = _mm_shuffle_epi32(sum64, 0b01_01_01_01);
    _mm_cvtsi128_si32(_mm_add_epi32(sum64, hi32)) as u32
}

/// out[i] = a[i] * b[i], eight lanes at a time.
#[target_feature(enable = "sse2")]
pub(crate) unsafe fn multiply_i16_u16(a: &[i16], b: &[u16], out: &mut [i32]) {
    let len = out.len().min(a.len()).min(b.len());
    let chunks = len / 8;

    for i in 0..chunks {
        let offset = i * 8;
        // SAFETY: offset + 8 <= len for every chunk; loads and stores are unaligned.
        unsafe {
            let va = _mm_loadu_si128(a.as_ptr().add(offset).cast());
            let vb = _mm_loadu_si128(b.as_ptr().add(offset).cast());
            let (p0, p1) = widening_mul(va, vb);
            let dst = out.as_mut_ptr().add(offset);
            _mm_storeu_si128(dst.cast(), p0);
            _mm_storeu_si128(dst.add(4).cast(), p1);
        }
    }

    let tail = chunks * 8;
    for i in tail..len {
        out[i] = i32::from(a[i]) * i32::from(b[i]);
    }
}

/// Wrapping sum of a[i] * b[i].
#[target_feature(enable = "sse2")]
pub(crate) unsafe fn dot_i16_u16(a: &[i16], b: &[u16]) -> u32 {
    let len = a.len().min(b.len());
    let chunks = len / 8;
    let mut acc = _mm_setzero_si128();

    for i in 0..chunks {
        let offset = i * 8;
        // SAFETY: offset + 8 <= len for every chunk.
        unsafe {
            let va = _mm_loadu_si128(a.as_ptr().add(offset).cast());
            let vb = _mm_loadu_si128(b.as_ptr().add(offset).cast());
            let (p0, p1) = widening_mul(va, vb);
            acc = _mm_add_epi32(acc, _mm_add_epi32(p0, p1));
        }
    }

    let mut result = horizontal_sum_epi32(acc);
    for i in chunks * 8..len {
        result = result.wrapping_add((i32::from(a[i]) * i32::from(b[i])) as u32);
    }
    result
}

/// Wrapping sum of unsigned 16-bit values.
#[target_feature(enable = "sse2")]
pub(crate) unsafe fn sum_u16(x: &[u16]) -> u32 {
    let chunks = x.len() / 8;
    let zero = _mm_setzero_si128();
    let mut acc = _mm_setzero_si128();

    for i in 0..chunks {
        // SAFETY: i * 8 + 8 <= x.len().
        unsafe {
            let v = _mm_loadu_si128(x.as_ptr().add(i * 8).cast());
            acc = _mm_add_epi32(acc, _mm_unpacklo_epi16(v, zero));
            acc = _mm_add_epi32(acc, _mm_unpackhi_epi16(v, zero));
        }
    }

    let mut result = horizontal_sum_epi32(acc);
    for &v in &x[chunks * 8..] {
        result = result.wrapping_add(u32::from(v));
    }
    result
}

/// Wrapping sum of 32-bit values, reinterpreted as unsigned.
#[target_feature(enable = "sse2")]
pub(crate) unsafe fn sum_i32_wrapping(x: &[i32]) -> u32 {
    let chunks = x.len() / 4;
    let mut acc = _mm_setzero_si128();

    for i in 0..chunks {
        // SAFETY: i * 4 + 4 <= x.len().
        unsafe {
            acc = _mm_add_epi32(acc, _mm_loadu_si128(x.as_ptr().add(i * 4).cast()));
        }
    }

    let mut result = horizontal_sum_epi32(acc);
    for &v in &x[chunks * 4..] {
        result = result.wrapping_add(v as u32);
    }
    result
}

/// out[i] = x[i] << 16.
///
/// Interleaving zeros below each lane places the sample in the upper half
/// of a 32-bit word.
#[target_feature(enable = "sse2")]
pub(crate) unsafe fn widen_shl16(x: &[i16], out: &mut [i32]) {
    let len = out.len().min(x.len());
    let chunks = len / 8;
    let zero = _mm_setzero_si128();

    for i in 0..chunks {
        let offset = i * 8;
        // SAFETY: offset + 8 <= len for every chunk.
        unsafe {
            let v = _mm_loadu_si128(x.as_ptr().add(offset).cast());
            let dst = out.as_mut_ptr().add(offset);
            _mm_storeu_si128(dst.cast(), _mm_unpacklo_epi16(zero, v));
            _mm_storeu_si128(dst.add(4).cast(), _mm_unpackhi_epi16(zero, v));
        }
    }

    for i in chunks * 8..len {
        out[i] = i32::from(x[i]) << 16;
    }
}

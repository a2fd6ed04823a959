//! NEON implementations of the integer kernels (aarch64).

use std::arch::aarch64::*;

/// out[i] = a[i] * b[i], widening both operands to 32 bits first.
///
/// # Safety
/// Caller must ensure NEON is available (always true on aarch64).
#[inline]
pub(crate) unsafe fn multiply_i16_u16(a: &[i16], b: &[u16], out: &mut [i32]) {
    let len = out.len().min(a.len()).min(b.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let offset = i * 4;
        unsafe {
            let va = vmovl_s16(vld1_s16(a.as_ptr().add(offset)));
            let vb = vreinterpretq_s32_u32(vmovl_u16(vld1_u16(b.as_ptr().add(offset))));
            vst1q_s32(out.as_mut_ptr().add(offset), vmulq_s32(va, vb));
        }
    }

    for i in chunks * 4..len {
        out[i] = i32::from(a[i]) * i32::from(b[i]);
    }
}

/// Wrapping sum of a[i] * b[i].
///
/// # Safety
/// Caller must ensure NEON is available.
#[inline]
pub(crate) unsafe fn dot_i16_u16(a: &[i16], b: &[u16]) -> u32 {
    let len = a.len().min(b.len());
    let chunks = len / 4;
    let mut acc = unsafe { vdupq_n_u32(0) };

    for i in 0..chunks {
        let offset = i * 4;
        unsafe {
            let va = vmovl_s16(vld1_s16(a.as_ptr().add(offset)));
            let vb = vreinterpretq_s32_u32(vmovl_u16(vld1_u16(b.as_ptr().add(offset))));
            acc = vaddq_u32(acc, vreinterpretq_u32_s32(vmulq_s32(va, vb)));
        }
    }

    let mut result = unsafe { vaddvq_u32(acc) };
    for i in chunks * 4..len {
        result = result.wrapping_add((i32::from(a[i]) * i32::from(b[i])) as u32);
    }
    result
}

/// Wrapping sum of unsigned 16-bit values.
///
/// # Safety
/// Caller must ensure NEON is available.
#[inline]
pub(crate) unsafe fn sum_u16(x: &[u16]) -> u32 {
    let chunks = x.len() / 8;
    let mut acc = unsafe { vdupq_n_u32(0) };

    for i in 0..chunks {
        unsafe {
            let v = vld1q_u16(x.as_ptr().add(i * 8));
            acc = vaddq_u32(acc, vpaddlq_u16(v));
        }
    }

    let mut result = unsafe { vaddvq_u32(acc) };
    for &v in &x[chunks * 8..] {
        result = result.wrapping_add(u32::from(v));
    }
    result
}

/// Wrapping sum of 32-bit values, reinterpreted as unsigned.
///
/// # Safety
/// Caller must ensure NEON is available.
#[inline]
pub(crate) unsafe fn sum_i32_wrapping(x: &[i32]) -> u32 {
    let chunks = x.len() / 4;
    let mut acc = unsafe { vdupq_n_u32(0) };

    for i in 0..chunks {
        unsafe {
            let v = vreinterpretq_u32_s32(vld1q_s32(x.as_ptr().add(i * 4)));
            acc = vaddq_u32(acc, v);
        }
    }

    let mut result = unsafe { vaddvq_u32(acc) };
    for &v in &x[chunks * 4..] {
        result = result.wrapping_add(v as u32);
    }
    result
}

/// out[i] = x[i] << 16.
///
/// # Safety
/// Caller must ensure NEON is available.
#[inline]
pub(crate) unsafe fn widen_shl16(x: &[i16], out: &mut [i32]) {
    let len = out.len().min(x.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let offset = i * 4;
        unsafe {
            let v = vmovl_s16(vld1_s16(x.as_ptr().add(offset)));
            vst1q_s32(out.as_mut_ptr().add(offset), vshlq_n_s32::<16>(v));
        }
    }

    for i in chunks * 4..len {
        out[i] = i32::from(x[i]) << 16;
    }
}

//! Scalar reference implementations of the integer kernels.
//!
//! Every vectorized backend must agree with these bit for bit, including
//! 32-bit wrap-around of the accumulators.

pub(crate) fn multiply_i16_u16(a: &[i16], b: &[u16], out: &mut [i32]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = i32::from(x) * i32::from(y);
    }
}

pub(crate) fn dot_i16_u16(a: &[i16], b: &[u16]) -> u32 {
    a.iter().zip(b).fold(0u32, |acc, (&x, &y)| {
        acc.wrapping_add((i32::from(x) * i32::from(y)) as u32)
    })
}

pub(crate) fn sum_u16(x: &[u16]) -> u32 {
    x.iter().fold(0u32, |acc, &v| acc.wrapping_add(u32::from(v)))
}

pub(crate) fn sum_i32_wrapping(x: &[i32]) -> u32 {
    x.iter().fold(0u32, |acc, &v| acc.wrapping_add(v as u32))
}

pub(crate) fn widen_shl16(x: &[i16], out: &mut [i32]) {
    for (o, &v) in out.iter_mut().zip(x) {
        *o = i32::from(v) << 16;
    }
}

//! NEON converters (aarch64).
//!
//! Same shape as the SSE2 tier: 16 samples per iteration, unaligned `vld1`/`vst1`,
//! scalar tail. `vcvtnq_s32_f32` rounds half to even and saturates, which lines up
//! with the scalar rounding once NaN has been zeroed.

use std::arch::aarch64::*;

use super::scalar;

const LANES: usize = 16;

// As with SSE2, these entries are only installed once NEON has been detected.

pub(super) fn s8_to_f32(dst: &mut [f32], src: &[i8]) {
    // SAFETY: NEON availability checked before this table entry was built.
    unsafe { s8_to_f32_neon(dst, src) }
}

pub(super) fn u8_to_f32(dst: &mut [f32], src: &[u8]) {
    // SAFETY: as above.
    unsafe { u8_to_f32_neon(dst, src) }
}

pub(super) fn s16_to_f32(dst: &mut [f32], src: &[i16]) {
    // SAFETY: as above.
    unsafe { s16_to_f32_neon(dst, src) }
}

pub(super) fn s32_to_f32(dst: &mut [f32], src: &[i32]) {
    // SAFETY: as above.
    unsafe { s32_to_f32_neon(dst, src) }
}

pub(super) fn f32_to_s8(dst: &mut [i8], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_s8_neon(dst, src) }
}

pub(super) fn f32_to_u8(dst: &mut [u8], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_u8_neon(dst, src) }
}

pub(super) fn f32_to_s16(dst: &mut [i16], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_s16_neon(dst, src) }
}

pub(super) fn f32_to_s32(dst: &mut [i32], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_s32_neon(dst, src) }
}

#[inline]
#[target_feature(enable = "neon")]
unsafe fn store_scaled16(dst: *mut f32, ints: int16x8_t, scale: float32x4_t) {
    unsafe {
        let lo = vmovl_s16(vget_low_s16(ints));
        let hi = vmovl_s16(vget_high_s16(ints));
        vst1q_f32(dst, vmulq_f32(vcvtq_f32_s32(lo), scale));
        vst1q_f32(dst.add(4), vmulq_f32(vcvtq_f32_s32(hi), scale));
    }
}

#[inline]
#[target_feature(enable = "neon")]
unsafe fn zero_nan(v: float32x4_t) -> float32x4_t {
    unsafe { vreinterpretq_f32_u32(vandq_u32(vreinterpretq_u32_f32(v), vceqq_f32(v, v))) }
}

/// Scale into integer range; values below -1.0 land one step under `-scale`.
#[inline]
#[target_feature(enable = "neon")]
unsafe fn scale_saturating(v: float32x4_t, scale: float32x4_t) -> int32x4_t {
    unsafe {
        let one = vdupq_n_f32(1.0);
        let neg_one = vdupq_n_f32(-1.0);
        let v = zero_nan(v);
        let below = vreinterpretq_f32_u32(vandq_u32(
            vcltq_f32(v, neg_one),
            vreinterpretq_u32_f32(neg_one),
        ));
        let clamped = vminq_f32(vmaxq_f32(v, neg_one), one);
        vcvtnq_s32_f32(vaddq_f32(vmulq_f32(clamped, scale), below))
    }
}

#[inline]
#[target_feature(enable = "neon")]
unsafe fn load_narrow16(src: *const f32, scale: float32x4_t) -> (int16x8_t, int16x8_t) {
    unsafe {
        let a = scale_saturating(vld1q_f32(src), scale);
        let b = scale_saturating(vld1q_f32(src.add(4)), scale);
        let c = scale_saturating(vld1q_f32(src.add(8)), scale);
        let d = scale_saturating(vld1q_f32(src.add(12)), scale);
        (
            vcombine_s16(vqmovn_s32(a), vqmovn_s32(b)),
            vcombine_s16(vqmovn_s32(c), vqmovn_s32(d)),
        )
    }
}

#[target_feature(enable = "neon")]
unsafe fn s8_to_f32_neon(dst: &mut [f32], src: &[i8]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::DIVBY127);
        let mut i = 0;
        while i < bulk {
            let bytes = vld1q_s8(src.as_ptr().add(i));
            let out = dst.as_mut_ptr().add(i);
            store_scaled16(out, vmovl_s8(vget_low_s8(bytes)), scale);
            store_scaled16(out.add(8), vmovl_s8(vget_high_s8(bytes)), scale);
            i += LANES;
        }
    }
    scalar::s8_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn u8_to_f32_neon(dst: &mut [f32], src: &[u8]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::DIVBY127);
        let bias = vdupq_n_s16(128);
        let mut i = 0;
        while i < bulk {
            let bytes = vld1q_u8(src.as_ptr().add(i));
            let lo = vsubq_s16(vreinterpretq_s16_u16(vmovl_u8(vget_low_u8(bytes))), bias);
            let hi = vsubq_s16(vreinterpretq_s16_u16(vmovl_u8(vget_high_u8(bytes))), bias);
            let out = dst.as_mut_ptr().add(i);
            store_scaled16(out, lo, scale);
            store_scaled16(out.add(8), hi, scale);
            i += LANES;
        }
    }
    scalar::u8_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn s16_to_f32_neon(dst: &mut [f32], src: &[i16]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::DIVBY32767);
        let mut i = 0;
        while i < bulk {
            let out = dst.as_mut_ptr().add(i);
            store_scaled16(out, vld1q_s16(src.as_ptr().add(i)), scale);
            store_scaled16(out.add(8), vld1q_s16(src.as_ptr().add(i + 8)), scale);
            i += LANES;
        }
    }
    scalar::s16_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn s32_to_f32_neon(dst: &mut [f32], src: &[i32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::DIVBY2147483648);
        let mut i = 0;
        while i < bulk {
            for k in 0..4 {
                let ints = vld1q_s32(src.as_ptr().add(i + k * 4));
                vst1q_f32(
                    dst.as_mut_ptr().add(i + k * 4),
                    vmulq_f32(vcvtq_f32_s32(ints), scale),
                );
            }
            i += LANES;
        }
    }
    scalar::s32_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn f32_to_s8_neon(dst: &mut [i8], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::S8_SCALE);
        let mut i = 0;
        while i < bulk {
            let (lo, hi) = load_narrow16(src.as_ptr().add(i), scale);
            vst1q_s8(
                dst.as_mut_ptr().add(i),
                vcombine_s8(vqmovn_s16(lo), vqmovn_s16(hi)),
            );
            i += LANES;
        }
    }
    scalar::f32_to_s8(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn f32_to_u8_neon(dst: &mut [u8], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::S8_SCALE);
        let flip = vdupq_n_u8(0x80);
        let mut i = 0;
        while i < bulk {
            let (lo, hi) = load_narrow16(src.as_ptr().add(i), scale);
            let signed = vcombine_s8(vqmovn_s16(lo), vqmovn_s16(hi));
            vst1q_u8(
                dst.as_mut_ptr().add(i),
                veorq_u8(vreinterpretq_u8_s8(signed), flip),
            );
            i += LANES;
        }
    }
    scalar::f32_to_u8(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn f32_to_s16_neon(dst: &mut [i16], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::S16_SCALE);
        let mut i = 0;
        while i < bulk {
            let (lo, hi) = load_narrow16(src.as_ptr().add(i), scale);
            vst1q_s16(dst.as_mut_ptr().add(i), lo);
            vst1q_s16(dst.as_mut_ptr().add(i + 8), hi);
            i += LANES;
        }
    }
    scalar::f32_to_s16(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "neon")]
unsafe fn f32_to_s32_neon(dst: &mut [i32], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = vdupq_n_f32(scalar::S32_SCALE);
        let neg_one = vdupq_n_f32(-1.0);
        let mut i = 0;
        while i < bulk {
            for k in 0..4 {
                let v = zero_nan(vld1q_f32(src.as_ptr().add(i + k * 4)));
                // Saturating conversion takes care of 2^31 and +inf.
                let y = vmulq_f32(vmaxq_f32(v, neg_one), scale);
                vst1q_s32(dst.as_mut_ptr().add(i + k * 4), vcvtnq_s32_f32(y));
            }
            i += LANES;
        }
    }
    scalar::f32_to_s32(&mut dst[bulk..n], &src[bulk..n]);
}

//! SSE2 converters.
//!
//! Bulk work happens 16 samples at a time with unaligned loads and stores, so no
//! alignment prologue is needed; the tail goes through the scalar tier. Results
//! match [`super::scalar`] exactly.

#[cfg(target_arch = "x86")]
use std::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::scalar;

const LANES: usize = 16;

// The safe entry points below are only installed into a `Converter` once SSE2 has
// been detected at runtime.

pub(super) fn s8_to_f32(dst: &mut [f32], src: &[i8]) {
    // SAFETY: SSE2 availability checked before this table entry was built.
    unsafe { s8_to_f32_sse2(dst, src) }
}

pub(super) fn u8_to_f32(dst: &mut [f32], src: &[u8]) {
    // SAFETY: as above.
    unsafe { u8_to_f32_sse2(dst, src) }
}

pub(super) fn s16_to_f32(dst: &mut [f32], src: &[i16]) {
    // SAFETY: as above.
    unsafe { s16_to_f32_sse2(dst, src) }
}

pub(super) fn s32_to_f32(dst: &mut [f32], src: &[i32]) {
    // SAFETY: as above.
    unsafe { s32_to_f32_sse2(dst, src) }
}

pub(super) fn f32_to_s8(dst: &mut [i8], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_s8_sse2(dst, src) }
}

pub(super) fn f32_to_u8(dst: &mut [u8], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_u8_sse2(dst, src) }
}

pub(super) fn f32_to_s16(dst: &mut [i16], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_s16_sse2(dst, src) }
}

pub(super) fn f32_to_s32(dst: &mut [i32], src: &[f32]) {
    // SAFETY: as above.
    unsafe { f32_to_s32_sse2(dst, src) }
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn store_scaled(dst: *mut f32, ints: __m128i, scale: __m128) {
    unsafe { _mm_storeu_ps(dst, _mm_mul_ps(_mm_cvtepi32_ps(ints), scale)) }
}

/// NaN to zero, clamp to [-1, 1], scale, and push anything that started below -1.0
/// one step further down so it lands on the integer minimum.
#[inline]
#[target_feature(enable = "sse2")]
unsafe fn scale_saturating(v: __m128, scale: __m128) -> __m128i {
    unsafe {
        let one = _mm_set1_ps(1.0);
        let neg_one = _mm_set1_ps(-1.0);
        let v = _mm_and_ps(v, _mm_cmpord_ps(v, v));
        let below = _mm_and_ps(_mm_cmplt_ps(v, neg_one), neg_one);
        let clamped = _mm_min_ps(_mm_max_ps(v, neg_one), one);
        _mm_cvtps_epi32(_mm_add_ps(_mm_mul_ps(clamped, scale), below))
    }
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn load_scaled4(src: *const f32, scale: __m128) -> [__m128i; 4] {
    unsafe {
        [
            scale_saturating(_mm_loadu_ps(src), scale),
            scale_saturating(_mm_loadu_ps(src.add(4)), scale),
            scale_saturating(_mm_loadu_ps(src.add(8)), scale),
            scale_saturating(_mm_loadu_ps(src.add(12)), scale),
        ]
    }
}

#[target_feature(enable = "sse2")]
unsafe fn s8_to_f32_sse2(dst: &mut [f32], src: &[i8]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::DIVBY127);
        let mut i = 0;
        while i < bulk {
            let bytes = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
            let lo = _mm_srai_epi16(_mm_unpacklo_epi8(bytes, bytes), 8);
            let hi = _mm_srai_epi16(_mm_unpackhi_epi8(bytes, bytes), 8);
            let out = dst.as_mut_ptr().add(i);
            store_scaled(out, _mm_srai_epi32(_mm_unpacklo_epi16(lo, lo), 16), scale);
            store_scaled(out.add(4), _mm_srai_epi32(_mm_unpackhi_epi16(lo, lo), 16), scale);
            store_scaled(out.add(8), _mm_srai_epi32(_mm_unpacklo_epi16(hi, hi), 16), scale);
            store_scaled(out.add(12), _mm_srai_epi32(_mm_unpackhi_epi16(hi, hi), 16), scale);
            i += LANES;
        }
    }
    scalar::s8_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn u8_to_f32_sse2(dst: &mut [f32], src: &[u8]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::DIVBY127);
        let zero = _mm_setzero_si128();
        let bias = _mm_set1_epi32(128);
        let mut i = 0;
        while i < bulk {
            let bytes = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
            let lo = _mm_unpacklo_epi8(bytes, zero);
            let hi = _mm_unpackhi_epi8(bytes, zero);
            let out = dst.as_mut_ptr().add(i);
            store_scaled(out, _mm_sub_epi32(_mm_unpacklo_epi16(lo, zero), bias), scale);
            store_scaled(out.add(4), _mm_sub_epi32(_mm_unpackhi_epi16(lo, zero), bias), scale);
            store_scaled(out.add(8), _mm_sub_epi32(_mm_unpacklo_epi16(hi, zero), bias), scale);
            store_scaled(out.add(12), _mm_sub_epi32(_mm_unpackhi_epi16(hi, zero), bias), scale);
            i += LANES;
        }
    }
    scalar::u8_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn s16_to_f32_sse2(dst: &mut [f32], src: &[i16]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::DIVBY32767);
        let mut i = 0;
        while i < bulk {
            let a = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
            let b = _mm_loadu_si128(src.as_ptr().add(i + 8) as *const __m128i);
            let out = dst.as_mut_ptr().add(i);
            store_scaled(out, _mm_srai_epi32(_mm_unpacklo_epi16(a, a), 16), scale);
            store_scaled(out.add(4), _mm_srai_epi32(_mm_unpackhi_epi16(a, a), 16), scale);
            store_scaled(out.add(8), _mm_srai_epi32(_mm_unpacklo_epi16(b, b), 16), scale);
            store_scaled(out.add(12), _mm_srai_epi32(_mm_unpackhi_epi16(b, b), 16), scale);
            i += LANES;
        }
    }
    scalar::s16_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn s32_to_f32_sse2(dst: &mut [f32], src: &[i32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::DIVBY2147483648);
        let mut i = 0;
        while i < bulk {
            let from = src.as_ptr().add(i) as *const __m128i;
            let out = dst.as_mut_ptr().add(i);
            for k in 0..4 {
                store_scaled(out.add(k * 4), _mm_loadu_si128(from.add(k)), scale);
            }
            i += LANES;
        }
    }
    scalar::s32_to_f32(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn f32_to_s8_sse2(dst: &mut [i8], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::S8_SCALE);
        let mut i = 0;
        while i < bulk {
            let [a, b, c, d] = load_scaled4(src.as_ptr().add(i), scale);
            let packed = _mm_packs_epi16(_mm_packs_epi32(a, b), _mm_packs_epi32(c, d));
            _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, packed);
            i += LANES;
        }
    }
    scalar::f32_to_s8(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn f32_to_u8_sse2(dst: &mut [u8], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::S8_SCALE);
        let flip = _mm_set1_epi8(0x80u8 as i8);
        let mut i = 0;
        while i < bulk {
            let [a, b, c, d] = load_scaled4(src.as_ptr().add(i), scale);
            let packed = _mm_packs_epi16(_mm_packs_epi32(a, b), _mm_packs_epi32(c, d));
            _mm_storeu_si128(
                dst.as_mut_ptr().add(i) as *mut __m128i,
                _mm_xor_si128(packed, flip),
            );
            i += LANES;
        }
    }
    scalar::f32_to_u8(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn f32_to_s16_sse2(dst: &mut [i16], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::S16_SCALE);
        let mut i = 0;
        while i < bulk {
            let [a, b, c, d] = load_scaled4(src.as_ptr().add(i), scale);
            let out = dst.as_mut_ptr().add(i) as *mut __m128i;
            _mm_storeu_si128(out, _mm_packs_epi32(a, b));
            _mm_storeu_si128(out.add(1), _mm_packs_epi32(c, d));
            i += LANES;
        }
    }
    scalar::f32_to_s16(&mut dst[bulk..n], &src[bulk..n]);
}

#[target_feature(enable = "sse2")]
unsafe fn f32_to_s32_sse2(dst: &mut [i32], src: &[f32]) {
    let n = dst.len().min(src.len());
    let bulk = n - n % LANES;
    unsafe {
        let scale = _mm_set1_ps(scalar::S32_SCALE);
        let neg_one = _mm_set1_ps(-1.0);
        let mut i = 0;
        while i < bulk {
            let from = src.as_ptr().add(i);
            let out = dst.as_mut_ptr().add(i) as *mut __m128i;
            for k in 0..4 {
                let v = _mm_loadu_ps(from.add(k * 4));
                let v = _mm_and_ps(v, _mm_cmpord_ps(v, v));
                let y = _mm_mul_ps(_mm_max_ps(v, neg_one), scale);
                // cvtps gives 0x80000000 for anything >= 2^31; flip those to i32::MAX.
                let overflow = _mm_castps_si128(_mm_cmpge_ps(y, scale));
                _mm_storeu_si128(out.add(k), _mm_xor_si128(_mm_cvtps_epi32(y), overflow));
            }
            i += LANES;
        }
    }
    scalar::f32_to_s32(&mut dst[bulk..n], &src[bulk..n]);
}

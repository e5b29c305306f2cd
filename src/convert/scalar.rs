//! Portable converters. Every SIMD tier must match these bit for bit.
//!
//! Integers scale by their maximum magnitude (127, 32767, 2^31), so `-1.0` maps to
//! `-max` and only the most negative integer lands just below `-1.0`. Going back,
//! anything below `-1.0` saturates to the minimum and anything at or above `1.0`
//! to the maximum; the rest rounds half to even.

pub(crate) const DIVBY127: f32 = 1.0 / 127.0;
pub(crate) const DIVBY32767: f32 = 1.0 / 32767.0;
// 2147483647 is not representable as f32; the S32 scale is 2^31.
pub(crate) const DIVBY2147483648: f32 = 1.0 / 2_147_483_648.0;

pub(crate) const S8_SCALE: f32 = 127.0;
pub(crate) const S16_SCALE: f32 = 32767.0;
pub(crate) const S32_SCALE: f32 = 2_147_483_648.0;

/// 1.5 * 2^23. Any float in (-2^22, 2^22) added to this keeps its rounded integer
/// value in the low mantissa bits.
#[cfg(not(feature = "portable-arithmetic"))]
const MAGIC: f32 = 12_582_912.0;
#[cfg(not(feature = "portable-arithmetic"))]
const MAGIC_BITS: u32 = 0x4B40_0000;

/// Exact float for an integer of at most 22 bits of magnitude.
#[cfg(not(feature = "portable-arithmetic"))]
#[inline(always)]
fn small_int_to_f32(v: i32) -> f32 {
    f32::from_bits(MAGIC_BITS.wrapping_add(v as u32)) - MAGIC
}

#[cfg(feature = "portable-arithmetic")]
#[inline(always)]
fn small_int_to_f32(v: i32) -> f32 {
    v as f32
}

/// Round half to even; `x` must be within (-2^22, 2^22).
#[cfg(not(feature = "portable-arithmetic"))]
#[inline(always)]
fn round_small(x: f32) -> i32 {
    ((x + MAGIC).to_bits() as i32).wrapping_sub(MAGIC_BITS as i32)
}

#[cfg(feature = "portable-arithmetic")]
#[inline(always)]
fn round_small(x: f32) -> i32 {
    x.round_ties_even() as i32
}

#[inline(always)]
pub(crate) fn s8_sample_to_f32(v: i8) -> f32 {
    small_int_to_f32(v as i32) * DIVBY127
}

#[inline(always)]
pub(crate) fn u8_sample_to_f32(v: u8) -> f32 {
    small_int_to_f32(v as i32 - 128) * DIVBY127
}

#[inline(always)]
pub(crate) fn s16_sample_to_f32(v: i16) -> f32 {
    small_int_to_f32(v as i32) * DIVBY32767
}

#[inline(always)]
pub(crate) fn s32_sample_to_f32(v: i32) -> f32 {
    v as f32 * DIVBY2147483648
}

#[inline(always)]
pub(crate) fn f32_sample_to_s8(x: f32) -> i8 {
    if x.is_nan() {
        0
    } else if x >= 1.0 {
        i8::MAX
    } else if x < -1.0 {
        i8::MIN
    } else {
        round_small(x * S8_SCALE) as i8
    }
}

#[inline(always)]
pub(crate) fn f32_sample_to_u8(x: f32) -> u8 {
    (f32_sample_to_s8(x) as u8) ^ 0x80
}

#[inline(always)]
pub(crate) fn f32_sample_to_s16(x: f32) -> i16 {
    if x.is_nan() {
        0
    } else if x >= 1.0 {
        i16::MAX
    } else if x < -1.0 {
        i16::MIN
    } else {
        round_small(x * S16_SCALE) as i16
    }
}

#[inline(always)]
pub(crate) fn f32_sample_to_s32(x: f32) -> i32 {
    if x.is_nan() {
        0
    } else if x >= 1.0 {
        i32::MAX
    } else if x < -1.0 {
        i32::MIN
    } else {
        // x * 2^31 lies in [-2^31, 2^31) and is exact.
        (x * S32_SCALE).round_ties_even() as i32
    }
}

pub(crate) fn s8_to_f32(dst: &mut [f32], src: &[i8]) {
    for (out, &v) in dst.iter_mut().zip(src) {
        *out = s8_sample_to_f32(v);
    }
}

pub(crate) fn u8_to_f32(dst: &mut [f32], src: &[u8]) {
    for (out, &v) in dst.iter_mut().zip(src) {
        *out = u8_sample_to_f32(v);
    }
}

pub(crate) fn s16_to_f32(dst: &mut [f32], src: &[i16]) {
    for (out, &v) in dst.iter_mut().zip(src) {
        *out = s16_sample_to_f32(v);
    }
}

pub(crate) fn s32_to_f32(dst: &mut [f32], src: &[i32]) {
    for (out, &v) in dst.iter_mut().zip(src) {
        *out = s32_sample_to_f32(v);
    }
}

pub(crate) fn f32_to_s8(dst: &mut [i8], src: &[f32]) {
    for (out, &x) in dst.iter_mut().zip(src) {
        *out = f32_sample_to_s8(x);
    }
}

pub(crate) fn f32_to_u8(dst: &mut [u8], src: &[f32]) {
    for (out, &x) in dst.iter_mut().zip(src) {
        *out = f32_sample_to_u8(x);
    }
}

pub(crate) fn f32_to_s16(dst: &mut [i16], src: &[f32]) {
    for (out, &x) in dst.iter_mut().zip(src) {
        *out = f32_sample_to_s16(x);
    }
}

pub(crate) fn f32_to_s32(dst: &mut [i32], src: &[f32]) {
    for (out, &x) in dst.iter_mut().zip(src) {
        *out = f32_sample_to_s32(x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_int_bit_trick_is_exact() {
        for v in i16::MIN as i32..=i16::MAX as i32 {
            assert_eq!(small_int_to_f32(v), v as f32);
        }
    }

    #[test]
    fn test_s32_scale_is_two_to_the_31() {
        assert_eq!(DIVBY2147483648 * S32_SCALE, 1.0);
        assert_eq!(s32_sample_to_f32(i32::MIN), -1.0);
        assert_eq!(s32_sample_to_f32(1 << 30), 0.5);
    }

    #[test]
    fn test_rounding_matches_ties_even() {
        let mut x = -40000.0f32;
        while x < 40000.0 {
            assert_eq!(round_small(x), x.round_ties_even() as i32, "x = {}", x);
            x += 0.25;
        }
        assert_eq!(round_small(0.5), 0);
        assert_eq!(round_small(1.5), 2);
        assert_eq!(round_small(-2.5), -2);
    }

    #[test]
    fn test_s8_round_trip_is_exact() {
        for v in i8::MIN..=i8::MAX {
            assert_eq!(f32_sample_to_s8(s8_sample_to_f32(v)), v);
        }
    }

    #[test]
    fn test_u8_round_trip_is_exact() {
        for v in u8::MIN..=u8::MAX {
            assert_eq!(f32_sample_to_u8(u8_sample_to_f32(v)), v);
        }
        assert_eq!(u8_sample_to_f32(0x80), 0.0);
    }

    #[test]
    fn test_s16_round_trip_is_exact() {
        for v in i16::MIN..=i16::MAX {
            assert_eq!(f32_sample_to_s16(s16_sample_to_f32(v)), v);
        }
    }

    #[test]
    fn test_s32_round_trip_at_boundaries() {
        for v in [i32::MIN, i32::MIN + 1, -1, 0, 1, i32::MAX - 1, i32::MAX] {
            let back = f32_sample_to_s32(s32_sample_to_f32(v));
            if v.unsigned_abs() < (1 << 24) {
                assert_eq!(back, v);
            } else {
                // Large magnitudes only keep 24 bits of precision in f32.
                assert!((back as i64 - v as i64).abs() <= 128, "{} -> {}", v, back);
            }
        }
        assert_eq!(f32_sample_to_s32(s32_sample_to_f32(i32::MAX)), i32::MAX);
        assert_eq!(f32_sample_to_s32(s32_sample_to_f32(i32::MIN)), i32::MIN);
    }

    #[test]
    fn test_integer_to_float_range() {
        assert_eq!(s8_sample_to_f32(-127), -1.0);
        assert_eq!(s16_sample_to_f32(-32767), -1.0);
        assert_eq!(s32_sample_to_f32(i32::MIN), -1.0);
        assert!(s8_sample_to_f32(i8::MIN) < -1.0);
        assert!(s16_sample_to_f32(i16::MIN) < -1.0);
        assert!(u8_sample_to_f32(0) < -1.0);
        assert_eq!(s16_sample_to_f32(i16::MAX), 1.0);
        assert!(s8_sample_to_f32(1) > 0.0);
    }

    #[test]
    fn test_minus_one_is_not_clamped() {
        assert_eq!(f32_sample_to_s8(-1.0), -127);
        assert_eq!(f32_sample_to_s16(-1.0), -32767);
        assert_eq!(f32_sample_to_s32(-1.0), i32::MIN);
        assert_eq!(f32_sample_to_u8(-1.0), 1);
    }

    #[test]
    fn test_saturation() {
        for x in [1.0001f32, 1.5, 2.0, 1e30, f32::INFINITY] {
            assert_eq!(f32_sample_to_s8(x), i8::MAX);
            assert_eq!(f32_sample_to_u8(x), u8::MAX);
            assert_eq!(f32_sample_to_s16(x), i16::MAX);
            assert_eq!(f32_sample_to_s32(x), i32::MAX);
            assert_eq!(f32_sample_to_s8(-x), i8::MIN);
            assert_eq!(f32_sample_to_u8(-x), u8::MIN);
            assert_eq!(f32_sample_to_s16(-x), i16::MIN);
            assert_eq!(f32_sample_to_s32(-x), i32::MIN);
        }
    }

    #[test]
    fn test_nan_becomes_silence() {
        assert_eq!(f32_sample_to_s8(f32::NAN), 0);
        assert_eq!(f32_sample_to_u8(f32::NAN), 0x80);
        assert_eq!(f32_sample_to_s16(-f32::NAN), 0);
        assert_eq!(f32_sample_to_s32(f32::NAN), 0);
    }

    #[test]
    fn test_float_clamp_to_s8() {
        let src = [1.5f32, -2.0, 0.9999, -0.9999];
        let mut dst = [0i8; 4];
        f32_to_s8(&mut dst, &src);
        assert_eq!(
            dst,
            [
                127,
                -128,
                (0.9999f32 * 127.0).round() as i8,
                (-0.9999f32 * 127.0).round() as i8
            ]
        );
        assert_eq!(dst[2], 127);
        assert_eq!(dst[3], -127);
    }
}

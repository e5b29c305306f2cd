//! Sample format conversion between device formats and the engine's native `f32`.
//!
//! Three interchangeable tiers implement the same eight kernels (S8/U8/S16/S32 to and
//! from F32): portable scalar code, SSE2 on x86 and NEON on aarch64. A [`Converter`] is
//! a plain table of function pointers for one tier. [`Converter::detect`] picks the
//! best tier for this CPU exactly once per process; engines keep their own copy of the
//! table.
//!
//! On top of the kernels sit byte-level helpers that deal with byte order and with
//! converting a buffer in place.

#[cfg(target_arch = "aarch64")]
mod neon;
mod scalar;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod sse2;

use crate::error::{Result, SonicPortError};
use crate::format::AudioFormat;
use once_cell::sync::OnceCell;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Samples per step of the byte-level pipeline.
const CHUNK: usize = 256;

/// Implementation family of a [`Converter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterTier {
    Scalar,
    Sse2,
    Neon,
}

impl ConverterTier {
    /// Detection order, best first.
    pub const PRIORITY: [ConverterTier; 3] = [Self::Sse2, Self::Neon, Self::Scalar];

    /// Whether this CPU can run the tier.
    pub fn is_supported(self) -> bool {
        match self {
            Self::Scalar => true,
            Self::Sse2 => sse2_detected(),
            Self::Neon => neon_detected(),
        }
    }

    pub fn best_available() -> Self {
        Self::PRIORITY
            .into_iter()
            .find(|tier| tier.is_supported())
            .unwrap_or(Self::Scalar)
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn sse2_detected() -> bool {
    std::arch::is_x86_feature_detected!("sse2")
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn sse2_detected() -> bool {
    false
}

#[cfg(target_arch = "aarch64")]
fn neon_detected() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(target_arch = "aarch64"))]
fn neon_detected() -> bool {
    false
}

impl fmt::Display for ConverterTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "scalar",
            Self::Sse2 => "sse2",
            Self::Neon => "neon",
        })
    }
}

impl FromStr for ConverterTier {
    type Err = SonicPortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(Self::Scalar),
            "sse2" => Ok(Self::Sse2),
            "neon" => Ok(Self::Neon),
            other => Err(SonicPortError::Configuration(format!(
                "Unknown converter tier: {:?}",
                other
            ))),
        }
    }
}

type ToF32<T> = fn(&mut [f32], &[T]);
type FromF32<T> = fn(&mut [T], &[f32]);

/// Conversion table for one tier.
#[derive(Clone, Copy)]
pub struct Converter {
    tier: ConverterTier,
    s8_to_f32: ToF32<i8>,
    u8_to_f32: ToF32<u8>,
    s16_to_f32: ToF32<i16>,
    s32_to_f32: ToF32<i32>,
    f32_to_s8: FromF32<i8>,
    f32_to_u8: FromF32<u8>,
    f32_to_s16: FromF32<i16>,
    f32_to_s32: FromF32<i32>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

static SELECTED: OnceCell<Converter> = OnceCell::new();
static SELECTION_RUNS: AtomicUsize = AtomicUsize::new(0);

impl Converter {
    /// The best table for this CPU. Selection runs once; later calls return the same table.
    pub fn detect() -> &'static Converter {
        SELECTED.get_or_init(|| {
            SELECTION_RUNS.fetch_add(1, Ordering::SeqCst);
            let tier = ConverterTier::best_available();
            log::info!("Using {} sample converters", tier);
            Self::build(tier)
        })
    }

    /// How many times the selection in [`detect`](Self::detect) has actually run.
    pub fn selection_runs() -> usize {
        SELECTION_RUNS.load(Ordering::SeqCst)
    }

    /// Table for an explicit tier, which must be supported by this CPU.
    pub fn for_tier(tier: ConverterTier) -> Result<Self> {
        if !tier.is_supported() {
            return Err(SonicPortError::Configuration(format!(
                "Converter tier {} is not supported on this CPU",
                tier
            )));
        }
        Ok(Self::build(tier))
    }

    pub fn scalar() -> Self {
        Self {
            tier: ConverterTier::Scalar,
            s8_to_f32: scalar::s8_to_f32,
            u8_to_f32: scalar::u8_to_f32,
            s16_to_f32: scalar::s16_to_f32,
            s32_to_f32: scalar::s32_to_f32,
            f32_to_s8: scalar::f32_to_s8,
            f32_to_u8: scalar::f32_to_u8,
            f32_to_s16: scalar::f32_to_s16,
            f32_to_s32: scalar::f32_to_s32,
        }
    }

    fn build(tier: ConverterTier) -> Self {
        match tier {
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            ConverterTier::Sse2 => Self {
                tier,
                s8_to_f32: sse2::s8_to_f32,
                u8_to_f32: sse2::u8_to_f32,
                s16_to_f32: sse2::s16_to_f32,
                s32_to_f32: sse2::s32_to_f32,
                f32_to_s8: sse2::f32_to_s8,
                f32_to_u8: sse2::f32_to_u8,
                f32_to_s16: sse2::f32_to_s16,
                f32_to_s32: sse2::f32_to_s32,
            },
            #[cfg(target_arch = "aarch64")]
            ConverterTier::Neon => Self {
                tier,
                s8_to_f32: neon::s8_to_f32,
                u8_to_f32: neon::u8_to_f32,
                s16_to_f32: neon::s16_to_f32,
                s32_to_f32: neon::s32_to_f32,
                f32_to_s8: neon::f32_to_s8,
                f32_to_u8: neon::f32_to_u8,
                f32_to_s16: neon::f32_to_s16,
                f32_to_s32: neon::f32_to_s32,
            },
            _ => Self::scalar(),
        }
    }

    pub fn tier(&self) -> ConverterTier {
        self.tier
    }

    pub fn s8_to_f32(&self, dst: &mut [f32], src: &[i8]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.s8_to_f32)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn u8_to_f32(&self, dst: &mut [f32], src: &[u8]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.u8_to_f32)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn s16_to_f32(&self, dst: &mut [f32], src: &[i16]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.s16_to_f32)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn s32_to_f32(&self, dst: &mut [f32], src: &[i32]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.s32_to_f32)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn f32_to_s8(&self, dst: &mut [i8], src: &[f32]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.f32_to_s8)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn f32_to_u8(&self, dst: &mut [u8], src: &[f32]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.f32_to_u8)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn f32_to_s16(&self, dst: &mut [i16], src: &[f32]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.f32_to_s16)(&mut dst[..src.len()], src);
        Ok(())
    }

    pub fn f32_to_s32(&self, dst: &mut [i32], src: &[f32]) -> Result<()> {
        check_len(dst.len(), src.len())?;
        (self.f32_to_s32)(&mut dst[..src.len()], src);
        Ok(())
    }

    /// Decode interleaved `format` bytes into native floats. Returns samples written.
    pub fn bytes_to_f32(&self, format: AudioFormat, src: &[u8], dst: &mut [f32]) -> Result<usize> {
        let samples = whole_samples(format, src.len())?;
        check_len(dst.len(), samples)?;
        let size = format.byte_size();
        for (bytes, out) in src.chunks(CHUNK * size).zip(dst.chunks_mut(CHUNK)) {
            let count = bytes.len() / size;
            self.decode(format, bytes, &mut out[..count]);
        }
        Ok(samples)
    }

    /// Encode native floats as interleaved `format` bytes. Returns samples written.
    pub fn f32_to_bytes(&self, src: &[f32], format: AudioFormat, dst: &mut [u8]) -> Result<usize> {
        let size = format.byte_size();
        check_len(dst.len() / size, src.len())?;
        for (floats, out) in src.chunks(CHUNK).zip(dst.chunks_mut(CHUNK * size)) {
            let len = floats.len() * size;
            self.encode(format, floats, &mut out[..len]);
        }
        Ok(src.len())
    }

    /// Convert between any two formats. Returns the number of samples converted.
    pub fn convert_bytes(
        &self,
        src_format: AudioFormat,
        src: &[u8],
        dst_format: AudioFormat,
        dst: &mut [u8],
    ) -> Result<usize> {
        let samples = whole_samples(src_format, src.len())?;
        let dst_size = dst_format.byte_size();
        check_len(dst.len() / dst_size, samples)?;
        let dst = &mut dst[..samples * dst_size];

        if src_format == dst_format {
            dst.copy_from_slice(src);
        } else if src_format.to_native() == dst_format.to_native() {
            // Same encoding, other byte order.
            for (from, to) in src.chunks_exact(dst_size).zip(dst.chunks_exact_mut(dst_size)) {
                to.copy_from_slice(from);
                to.reverse();
            }
        } else {
            let src_size = src_format.byte_size();
            for (from, to) in src
                .chunks(CHUNK * src_size)
                .zip(dst.chunks_mut(CHUNK * dst_size))
            {
                self.convert_chunk(src_format, from, dst_format, to);
            }
        }
        Ok(samples)
    }

    /// Convert `num_samples` samples inside one buffer.
    ///
    /// `buf` must hold `num_samples` samples of the wider of the two formats. Growing
    /// conversions walk the buffer from the end so no unread source bytes are
    /// overwritten; shrinking ones walk from the start.
    pub fn convert_in_place(
        &self,
        from: AudioFormat,
        to: AudioFormat,
        buf: &mut [u8],
        num_samples: usize,
    ) -> Result<()> {
        let from_size = from.byte_size();
        let to_size = to.byte_size();
        let needed = num_samples * from_size.max(to_size);
        if buf.len() < needed {
            return Err(SonicPortError::AudioFormat(format!(
                "In-place conversion {} -> {} of {} samples needs {} bytes, buffer has {}",
                from,
                to,
                num_samples,
                needed,
                buf.len()
            )));
        }

        if from == to {
            return Ok(());
        }
        if from.to_native() == to.to_native() {
            for sample in buf[..num_samples * from_size].chunks_exact_mut(from_size) {
                sample.reverse();
            }
            return Ok(());
        }

        let chunks = num_samples.div_ceil(CHUNK);
        if to_size > from_size {
            for chunk in (0..chunks).rev() {
                self.convert_chunk_in_place(from, to, buf, chunk, num_samples);
            }
        } else {
            for chunk in 0..chunks {
                self.convert_chunk_in_place(from, to, buf, chunk, num_samples);
            }
        }
        Ok(())
    }

    fn convert_chunk_in_place(
        &self,
        from: AudioFormat,
        to: AudioFormat,
        buf: &mut [u8],
        chunk: usize,
        num_samples: usize,
    ) {
        let start = chunk * CHUNK;
        let count = CHUNK.min(num_samples - start);
        let from_size = from.byte_size();
        let to_size = to.byte_size();

        let mut scratch = [0u8; CHUNK * 4];
        let scratch = &mut scratch[..count * from_size];
        scratch.copy_from_slice(&buf[start * from_size..(start + count) * from_size]);
        self.convert_chunk(from, scratch, to, &mut buf[start * to_size..(start + count) * to_size]);
    }

    /// At most [`CHUNK`] samples, through a native float intermediate.
    fn convert_chunk(&self, from: AudioFormat, src: &[u8], to: AudioFormat, dst: &mut [u8]) {
        let count = src.len() / from.byte_size();
        let mut floats = [0.0f32; CHUNK];
        let floats = &mut floats[..count];
        self.decode(from, src, floats);
        self.encode(to, floats, dst);
    }

    /// `out.len()` samples from `src`; at most [`CHUNK`].
    fn decode(&self, format: AudioFormat, src: &[u8], out: &mut [f32]) {
        let big = format.is_big_endian();
        let count = out.len();
        match format {
            AudioFormat::U8 => (self.u8_to_f32)(out, src),
            AudioFormat::S8 => {
                let mut tmp = [0i8; CHUNK];
                for (t, &b) in tmp.iter_mut().zip(src) {
                    *t = b as i8;
                }
                (self.s8_to_f32)(out, &tmp[..count]);
            }
            AudioFormat::S16LE | AudioFormat::S16BE => {
                let mut tmp = [0i16; CHUNK];
                for (t, b) in tmp.iter_mut().zip(src.chunks_exact(2)) {
                    let b = [b[0], b[1]];
                    *t = if big {
                        i16::from_be_bytes(b)
                    } else {
                        i16::from_le_bytes(b)
                    };
                }
                (self.s16_to_f32)(out, &tmp[..count]);
            }
            AudioFormat::S32LE | AudioFormat::S32BE => {
                let mut tmp = [0i32; CHUNK];
                for (t, b) in tmp.iter_mut().zip(src.chunks_exact(4)) {
                    let b = [b[0], b[1], b[2], b[3]];
                    *t = if big {
                        i32::from_be_bytes(b)
                    } else {
                        i32::from_le_bytes(b)
                    };
                }
                (self.s32_to_f32)(out, &tmp[..count]);
            }
            AudioFormat::F32LE | AudioFormat::F32BE => {
                for (o, b) in out.iter_mut().zip(src.chunks_exact(4)) {
                    let b = [b[0], b[1], b[2], b[3]];
                    *o = if big {
                        f32::from_be_bytes(b)
                    } else {
                        f32::from_le_bytes(b)
                    };
                }
            }
        }
    }

    /// `src.len()` samples into `dst`; at most [`CHUNK`].
    fn encode(&self, format: AudioFormat, src: &[f32], dst: &mut [u8]) {
        let big = format.is_big_endian();
        let count = src.len();
        match format {
            AudioFormat::U8 => (self.f32_to_u8)(dst, src),
            AudioFormat::S8 => {
                let mut tmp = [0i8; CHUNK];
                (self.f32_to_s8)(&mut tmp[..count], src);
                for (d, &t) in dst.iter_mut().zip(&tmp[..count]) {
                    *d = t as u8;
                }
            }
            AudioFormat::S16LE | AudioFormat::S16BE => {
                let mut tmp = [0i16; CHUNK];
                (self.f32_to_s16)(&mut tmp[..count], src);
                for (d, &t) in dst.chunks_exact_mut(2).zip(&tmp[..count]) {
                    d.copy_from_slice(&if big { t.to_be_bytes() } else { t.to_le_bytes() });
                }
            }
            AudioFormat::S32LE | AudioFormat::S32BE => {
                let mut tmp = [0i32; CHUNK];
                (self.f32_to_s32)(&mut tmp[..count], src);
                for (d, &t) in dst.chunks_exact_mut(4).zip(&tmp[..count]) {
                    d.copy_from_slice(&if big { t.to_be_bytes() } else { t.to_le_bytes() });
                }
            }
            AudioFormat::F32LE | AudioFormat::F32BE => {
                for (d, &x) in dst.chunks_exact_mut(4).zip(src) {
                    d.copy_from_slice(&if big { x.to_be_bytes() } else { x.to_le_bytes() });
                }
            }
        }
    }
}

fn check_len(dst_samples: usize, src_samples: usize) -> Result<()> {
    if dst_samples < src_samples {
        return Err(SonicPortError::AudioFormat(format!(
            "Destination holds {} samples, source has {}",
            dst_samples, src_samples
        )));
    }
    Ok(())
}

fn whole_samples(format: AudioFormat, bytes: usize) -> Result<usize> {
    let size = format.byte_size();
    if bytes % size != 0 {
        return Err(SonicPortError::AudioFormat(format!(
            "{} bytes is not a whole number of {} samples",
            bytes, format
        )));
    }
    Ok(bytes / size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LENGTHS: [usize; 6] = [0, 1, 7, 16, 16 * 3 + 5, 16 * 8];

    fn supported() -> Vec<Converter> {
        ConverterTier::PRIORITY
            .into_iter()
            .filter(|tier| tier.is_supported())
            .map(|tier| Converter::for_tier(tier).unwrap())
            .collect()
    }

    fn noise(state: &mut u32) -> u32 {
        *state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *state
    }

    fn float_input(len: usize) -> Vec<f32> {
        let specials = [
            f32::NAN,
            f32::INFINITY,
            f32::NEG_INFINITY,
            1.0,
            -1.0,
            0.0,
            -0.0,
            1.0001,
            -1.0001,
            0.5 / 127.0,
            -1.5 / 32767.0,
            0.9999,
            -0.9999,
            f32::MIN_POSITIVE,
            2.5,
            -7.0,
        ];
        let mut state = 7;
        (0..len)
            .map(|i| {
                if i < specials.len() && i % 2 == 0 {
                    specials[i]
                } else {
                    (noise(&mut state) as f32 / u32::MAX as f32) * 2.6 - 1.3
                }
            })
            .collect()
    }

    fn bits(values: &[f32]) -> Vec<u32> {
        values.iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    fn test_detect_is_idempotent() {
        let first = Converter::detect();
        for _ in 0..10 {
            assert!(std::ptr::eq(Converter::detect(), first));
        }
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| Converter::detect().tier()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), first.tier());
        }
        assert_eq!(Converter::selection_runs(), 1);
        assert_eq!(first.tier(), ConverterTier::best_available());
    }

    #[test]
    fn test_for_tier_checks_cpu_support() {
        for tier in ConverterTier::PRIORITY {
            assert_eq!(Converter::for_tier(tier).is_ok(), tier.is_supported());
        }
        assert!(ConverterTier::Scalar.is_supported());
        assert_eq!(Converter::scalar().tier(), ConverterTier::Scalar);
    }

    #[test]
    fn test_tier_names() {
        assert_eq!("SSE2".parse::<ConverterTier>().unwrap(), ConverterTier::Sse2);
        assert_eq!(ConverterTier::Neon.to_string(), "neon");
        assert!("avx512".parse::<ConverterTier>().is_err());
    }

    #[test]
    fn test_cross_tier_float_to_int() {
        let reference = Converter::scalar();
        for conv in supported() {
            for len in LENGTHS {
                let src = float_input(len);

                let (mut a, mut b) = (vec![0i8; len], vec![0i8; len]);
                reference.f32_to_s8(&mut a, &src).unwrap();
                conv.f32_to_s8(&mut b, &src).unwrap();
                assert_eq!(a, b, "{} f32->s8 len {}", conv.tier(), len);

                let (mut a, mut b) = (vec![0u8; len], vec![0u8; len]);
                reference.f32_to_u8(&mut a, &src).unwrap();
                conv.f32_to_u8(&mut b, &src).unwrap();
                assert_eq!(a, b, "{} f32->u8 len {}", conv.tier(), len);

                let (mut a, mut b) = (vec![0i16; len], vec![0i16; len]);
                reference.f32_to_s16(&mut a, &src).unwrap();
                conv.f32_to_s16(&mut b, &src).unwrap();
                assert_eq!(a, b, "{} f32->s16 len {}", conv.tier(), len);

                let (mut a, mut b) = (vec![0i32; len], vec![0i32; len]);
                reference.f32_to_s32(&mut a, &src).unwrap();
                conv.f32_to_s32(&mut b, &src).unwrap();
                assert_eq!(a, b, "{} f32->s32 len {}", conv.tier(), len);
            }
        }
    }

    #[test]
    fn test_cross_tier_int_to_float() {
        let reference = Converter::scalar();
        for conv in supported() {
            for len in LENGTHS {
                let mut state = len as u32 + 1;
                let raw: Vec<u32> = (0..len).map(|_| noise(&mut state)).collect();
                let mut a = vec![0.0f32; len];
                let mut b = vec![0.0f32; len];

                let s8: Vec<i8> = raw.iter().map(|&r| (r >> 24) as i8).collect();
                reference.s8_to_f32(&mut a, &s8).unwrap();
                conv.s8_to_f32(&mut b, &s8).unwrap();
                assert_eq!(bits(&a), bits(&b), "{} s8 len {}", conv.tier(), len);

                let u8s: Vec<u8> = raw.iter().map(|&r| (r >> 24) as u8).collect();
                reference.u8_to_f32(&mut a, &u8s).unwrap();
                conv.u8_to_f32(&mut b, &u8s).unwrap();
                assert_eq!(bits(&a), bits(&b), "{} u8 len {}", conv.tier(), len);

                let s16: Vec<i16> = raw.iter().map(|&r| (r >> 16) as i16).collect();
                reference.s16_to_f32(&mut a, &s16).unwrap();
                conv.s16_to_f32(&mut b, &s16).unwrap();
                assert_eq!(bits(&a), bits(&b), "{} s16 len {}", conv.tier(), len);

                let mut s32: Vec<i32> = raw.iter().map(|&r| r as i32).collect();
                if let Some(first) = s32.first_mut() {
                    *first = i32::MIN;
                }
                reference.s32_to_f32(&mut a, &s32).unwrap();
                conv.s32_to_f32(&mut b, &s32).unwrap();
                assert_eq!(bits(&a), bits(&b), "{} s32 len {}", conv.tier(), len);
            }
        }
    }

    #[test]
    fn test_s16_round_trip_through_bytes() {
        let samples: [i16; 5] = [0, 1, -1, 32767, -32768];
        let src: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        for conv in supported() {
            let mut floats = vec![0u8; samples.len() * 4];
            let n = conv
                .convert_bytes(AudioFormat::S16LE, &src, AudioFormat::F32LE, &mut floats)
                .unwrap();
            assert_eq!(n, 5);

            let mut back = vec![0u8; src.len()];
            conv.convert_bytes(AudioFormat::F32LE, &floats, AudioFormat::S16LE, &mut back)
                .unwrap();
            assert_eq!(back, src, "tier {}", conv.tier());
        }
    }

    #[test]
    fn test_float_clamp_to_s8_bytes() {
        let src: Vec<u8> = [1.5f32, -2.0, 0.9999, -0.9999]
            .iter()
            .flat_map(|x| x.to_le_bytes())
            .collect();
        for conv in supported() {
            let mut dst = [0u8; 4];
            conv.convert_bytes(AudioFormat::F32LE, &src, AudioFormat::S8, &mut dst)
                .unwrap();
            assert_eq!(dst.map(|b| b as i8), [127, -128, 127, -127]);
        }
    }

    #[test]
    fn test_byte_order_swap() {
        let conv = Converter::detect();
        let src = [0x12, 0x34, 0xAB, 0xCD];
        let mut dst = [0u8; 4];
        conv.convert_bytes(AudioFormat::S16BE, &src, AudioFormat::S16LE, &mut dst)
            .unwrap();
        assert_eq!(dst, [0x34, 0x12, 0xCD, 0xAB]);

        let value = 0.25f32;
        let mut native = [0.0f32; 1];
        conv.bytes_to_f32(AudioFormat::F32BE, &value.to_be_bytes(), &mut native)
            .unwrap();
        assert_eq!(native[0], value);

        let mut be = [0u8; 2];
        conv.f32_to_bytes(&[-1.0], AudioFormat::S16BE, &mut be).unwrap();
        assert_eq!(i16::from_be_bytes(be), -32767);
    }

    #[test]
    fn test_u8_silence_decodes_to_zero() {
        let conv = Converter::detect();
        let mut out = [1.0f32; 40];
        conv.bytes_to_f32(AudioFormat::U8, &[0x80; 40], &mut out).unwrap();
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_in_place_growing_matches_copy() {
        let conv = Converter::detect();
        let samples = CHUNK * 2 + 37;
        let mut state = 3;
        let src: Vec<u8> = (0..samples)
            .flat_map(|_| ((noise(&mut state) >> 16) as i16).to_le_bytes())
            .collect();

        let mut expected = vec![0u8; samples * 4];
        conv.convert_bytes(AudioFormat::S16LE, &src, AudioFormat::F32LE, &mut expected)
            .unwrap();

        let mut buf = vec![0u8; samples * 4];
        buf[..src.len()].copy_from_slice(&src);
        conv.convert_in_place(AudioFormat::S16LE, AudioFormat::F32LE, &mut buf, samples)
            .unwrap();
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_in_place_shrinking_matches_copy() {
        let conv = Converter::detect();
        let samples = CHUNK * 3 + 5;
        let floats = float_input(samples);
        let src: Vec<u8> = floats.iter().flat_map(|x| x.to_le_bytes()).collect();

        let mut expected = vec![0u8; samples];
        conv.convert_bytes(AudioFormat::F32LE, &src, AudioFormat::U8, &mut expected)
            .unwrap();

        let mut buf = src.clone();
        conv.convert_in_place(AudioFormat::F32LE, AudioFormat::U8, &mut buf, samples)
            .unwrap();
        assert_eq!(&buf[..samples], &expected[..]);
    }

    #[test]
    fn test_length_errors() {
        let conv = Converter::scalar();
        let mut small = [0.0f32; 2];
        assert!(conv.s16_to_f32(&mut small, &[1, 2, 3]).is_err());

        let mut dst = [0u8; 3];
        assert!(conv
            .convert_bytes(AudioFormat::S16LE, &[0, 0, 0, 0], AudioFormat::F32LE, &mut dst)
            .is_err());
        assert!(conv
            .convert_bytes(AudioFormat::S16LE, &[0, 0, 0], AudioFormat::U8, &mut dst)
            .is_err());

        let mut buf = [0u8; 4];
        assert!(conv
            .convert_in_place(AudioFormat::S16LE, AudioFormat::F32LE, &mut buf, 2)
            .is_err());
    }
}

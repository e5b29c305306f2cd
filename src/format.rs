//! PCM sample formats and stream specs.
//!
//! Every device-side buffer is interleaved PCM in one of the formats below. The
//! engine itself always works in native-endian `f32`; conversion happens at the
//! device boundary (see [`crate::convert`]).

use crate::error::{Result, SonicPortError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Sample encoding of a PCM buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    U8,
    S8,
    S16LE,
    S16BE,
    S32LE,
    S32BE,
    F32LE,
    F32BE,
}

impl AudioFormat {
    /// Signed 16-bit samples in host byte order.
    #[cfg(target_endian = "little")]
    pub const S16: Self = Self::S16LE;
    #[cfg(target_endian = "big")]
    pub const S16: Self = Self::S16BE;

    /// Signed 32-bit samples in host byte order.
    #[cfg(target_endian = "little")]
    pub const S32: Self = Self::S32LE;
    #[cfg(target_endian = "big")]
    pub const S32: Self = Self::S32BE;

    /// 32-bit float samples in host byte order. This is the engine's internal format.
    #[cfg(target_endian = "little")]
    pub const F32: Self = Self::F32LE;
    #[cfg(target_endian = "big")]
    pub const F32: Self = Self::F32BE;

    pub const ALL: [AudioFormat; 8] = [
        Self::U8,
        Self::S8,
        Self::S16LE,
        Self::S16BE,
        Self::S32LE,
        Self::S32BE,
        Self::F32LE,
        Self::F32BE,
    ];

    pub fn bit_size(self) -> u32 {
        match self {
            Self::U8 | Self::S8 => 8,
            Self::S16LE | Self::S16BE => 16,
            Self::S32LE | Self::S32BE | Self::F32LE | Self::F32BE => 32,
        }
    }

    pub fn byte_size(self) -> usize {
        (self.bit_size() / 8) as usize
    }

    pub fn is_signed(self) -> bool {
        !matches!(self, Self::U8)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32LE | Self::F32BE)
    }

    pub fn is_big_endian(self) -> bool {
        matches!(self, Self::S16BE | Self::S32BE | Self::F32BE)
    }

    /// True when samples of this format must be byte-swapped on this host.
    pub fn needs_swap(self) -> bool {
        self.byte_size() > 1 && self.is_big_endian() != cfg!(target_endian = "big")
    }

    /// Same encoding in host byte order.
    pub fn to_native(self) -> Self {
        match self {
            Self::S16LE | Self::S16BE => Self::S16,
            Self::S32LE | Self::S32BE => Self::S32,
            Self::F32LE | Self::F32BE => Self::F32,
            other => other,
        }
    }

    /// Byte value that represents silence when a buffer is filled with it.
    pub fn silence_value(self) -> u8 {
        match self {
            Self::U8 => 0x80,
            _ => 0x00,
        }
    }

    /// Formats to try, in order, when a device cannot take `self` exactly.
    ///
    /// The first entry is always `self`.
    pub fn closest_formats(self) -> &'static [AudioFormat] {
        use AudioFormat::*;
        match self {
            U8 => &[U8, S8, S16LE, S16BE, S32LE, S32BE, F32LE, F32BE],
            S8 => &[S8, U8, S16LE, S16BE, S32LE, S32BE, F32LE, F32BE],
            S16LE => &[S16LE, S16BE, S32LE, S32BE, F32LE, F32BE, U8, S8],
            S16BE => &[S16BE, S16LE, S32BE, S32LE, F32BE, F32LE, U8, S8],
            S32LE => &[S32LE, S32BE, F32LE, F32BE, S16LE, S16BE, U8, S8],
            S32BE => &[S32BE, S32LE, F32BE, F32LE, S16BE, S16LE, U8, S8],
            F32LE => &[F32LE, F32BE, S32LE, S32BE, S16LE, S16BE, U8, S8],
            F32BE => &[F32BE, F32LE, S32BE, S32LE, S16BE, S16LE, U8, S8],
        }
    }

    /// Pick the first of [`closest_formats`](Self::closest_formats) accepted by `supported`.
    pub fn negotiate(self, supported: impl Fn(AudioFormat) -> bool) -> Result<AudioFormat> {
        self.closest_formats()
            .iter()
            .copied()
            .find(|format| supported(*format))
            .ok_or_else(|| SonicPortError::UnsupportedFormat {
                requested: self,
                reason: "no compatible format offered by the device".into(),
            })
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "U8",
            Self::S8 => "S8",
            Self::S16LE => "S16LE",
            Self::S16BE => "S16BE",
            Self::S32LE => "S32LE",
            Self::S32BE => "S32BE",
            Self::F32LE => "F32LE",
            Self::F32BE => "F32BE",
        };
        f.write_str(name)
    }
}

impl FromStr for AudioFormat {
    type Err = SonicPortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "U8" => Ok(Self::U8),
            "S8" => Ok(Self::S8),
            "S16LE" => Ok(Self::S16LE),
            "S16BE" => Ok(Self::S16BE),
            "S16" => Ok(Self::S16),
            "S32LE" => Ok(Self::S32LE),
            "S32BE" => Ok(Self::S32BE),
            "S32" => Ok(Self::S32),
            "F32LE" => Ok(Self::F32LE),
            "F32BE" => Ok(Self::F32BE),
            "F32" => Ok(Self::F32),
            other => Err(SonicPortError::AudioFormat(format!(
                "Unknown sample format string: {:?}",
                other
            ))),
        }
    }
}

/// Format, channel count and sample rate of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub format: AudioFormat,
    pub channels: u16,
    pub freq: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            format: AudioFormat::F32,
            channels: 2,
            freq: 48000,
        }
    }
}

impl AudioSpec {
    pub const fn new(format: AudioFormat, channels: u16, freq: u32) -> Self {
        Self {
            format,
            channels,
            freq,
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.format.byte_size()
    }

    pub fn silence_value(&self) -> u8 {
        self.format.silence_value()
    }

    /// Bytes in one device buffer of `sample_frames` frames.
    pub fn buffer_size(&self, sample_frames: u32) -> usize {
        sample_frames as usize * self.frame_size()
    }

    /// Scratch space for one buffer: large enough for the device format and for the
    /// same frames as native `f32`.
    pub fn work_buffer_size(&self, sample_frames: u32) -> usize {
        let float_bytes = sample_frames as usize * self.channels as usize * 4;
        self.buffer_size(sample_frames).max(float_bytes)
    }

    /// Playback time of one buffer of `sample_frames` frames.
    pub fn buffer_duration(&self, sample_frames: u32) -> Duration {
        Duration::from_secs_f64(sample_frames as f64 / self.freq.max(1) as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > 8 {
            return Err(SonicPortError::AudioFormat(format!(
                "Channel count must be in 1..=8, got {}",
                self.channels
            )));
        }
        if self.freq == 0 {
            return Err(SonicPortError::AudioFormat(
                "Sample rate must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The "better" of two specs: wider format, higher rate, more channels.
    ///
    /// Used when an already-known device is opened again, so a low quality request
    /// never downgrades a device that supports more.
    pub fn upgraded_with(&self, requested: &AudioSpec) -> AudioSpec {
        let format = if self.format.bit_size() >= requested.format.bit_size() {
            self.format
        } else {
            requested.format
        };
        AudioSpec {
            format,
            channels: self.channels.max(requested.channels),
            freq: self.freq.max(requested.freq),
        }
    }
}

/// Closest power of two to roughly 46ms of audio at `freq`.
pub fn default_sample_frames(freq: u32) -> u32 {
    let target = (freq / 1000).max(1) * 46;
    let upper = target.next_power_of_two();
    let lower = upper / 2;
    if lower > 0 && target - lower < upper - target {
        lower
    } else {
        upper
    }
}

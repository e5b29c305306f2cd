//! Configuration for SonicPort

use crate::convert::ConverterTier;
use crate::error::{Result, SonicPortError};
use crate::format::{AudioFormat, AudioSpec};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_AUDIO_DRIVER: &str = "SONICPORT_AUDIO_DRIVER";
pub const ENV_AUDIO_FREQUENCY: &str = "SONICPORT_AUDIO_FREQUENCY";
pub const ENV_AUDIO_CHANNELS: &str = "SONICPORT_AUDIO_CHANNELS";
pub const ENV_AUDIO_FORMAT: &str = "SONICPORT_AUDIO_FORMAT";
pub const ENV_AUDIO_SAMPLE_FRAMES: &str = "SONICPORT_AUDIO_SAMPLE_FRAMES";
pub const ENV_AUDIO_CONVERTER: &str = "SONICPORT_AUDIO_CONVERTER";

/// Output file of the disk backend.
pub const HINT_DISK_OUTPUT_FILE: &str = "disk.output_file";
/// Input file of the disk backend.
pub const HINT_DISK_INPUT_FILE: &str = "disk.input_file";
/// Speed-up factor for the timed backends (dummy, disk, callback). `2.0` runs twice
/// as fast as real time.
pub const HINT_TIMESCALE: &str = "timescale";
/// Frames the simulated hardware moves per callback in the callback backend.
pub const HINT_CALLBACK_BURST_FRAMES: &str = "callback.burst_frames";
/// Frequency of the test tone the callback backend records, in Hz. Silence if unset.
pub const HINT_CALLBACK_CAPTURE_TONE: &str = "callback.capture_tone";

/// String key/value settings handed to backends. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct Hints {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl Hints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Parsed value, or `None` if missing or unparsable.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring hint {}={:?}: not a valid value", key, raw);
                None
            }
        }
    }

    /// Positive timescale from [`HINT_TIMESCALE`], defaulting to real time.
    pub fn timescale(&self) -> f64 {
        self.get_parsed::<f64>(HINT_TIMESCALE)
            .filter(|scale| scale.is_finite() && *scale > 0.0)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Comma separated backend names; `None` picks the first that works.
    pub driver: Option<String>,
    /// Spec used when a device is opened without one.
    pub default_spec: AudioSpec,
    /// Frames per device buffer; `None` means about 46 ms at the device rate.
    pub sample_frames: Option<u32>,
    /// Logical buffers in a callback backend's ring.
    pub buffer_count: usize,
    /// Longest a worker blocks before checking its shutdown flag again.
    pub wait_timeout: Duration,
    /// Capacity of each stream queue, in frames.
    pub stream_capacity_frames: usize,
    /// Force a converter tier instead of detecting one.
    pub converter_tier: Option<ConverterTier>,
    pub hints: Hints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            driver: None,
            default_spec: AudioSpec::default(),
            sample_frames: None,
            buffer_count: 2,
            wait_timeout: Duration::from_millis(100),
            stream_capacity_frames: 48000,
            converter_tier: None,
            hints: Hints::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the `SONICPORT_AUDIO_*` environment variables applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup that behaves like the environment.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(driver) = lookup(ENV_AUDIO_DRIVER) {
            self.driver = Some(driver);
        }
        if let Some(raw) = lookup(ENV_AUDIO_FREQUENCY) {
            self.default_spec.freq = parse_env(ENV_AUDIO_FREQUENCY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_AUDIO_CHANNELS) {
            self.default_spec.channels = parse_env(ENV_AUDIO_CHANNELS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_AUDIO_FORMAT) {
            self.default_spec.format = raw.parse::<AudioFormat>()?;
        }
        if let Some(raw) = lookup(ENV_AUDIO_SAMPLE_FRAMES) {
            self.sample_frames = Some(parse_env(ENV_AUDIO_SAMPLE_FRAMES, &raw)?);
        }
        if let Some(raw) = lookup(ENV_AUDIO_CONVERTER) {
            self.converter_tier = Some(raw.parse()?);
        }
        Ok(self)
    }

    pub fn driver(mut self, name: impl Into<String>) -> Self {
        self.driver = Some(name.into());
        self
    }

    pub fn default_spec(mut self, spec: AudioSpec) -> Self {
        self.default_spec = spec;
        self
    }

    pub fn sample_frames(mut self, frames: u32) -> Self {
        self.sample_frames = Some(frames);
        self
    }

    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn stream_capacity_frames(mut self, frames: usize) -> Self {
        self.stream_capacity_frames = frames;
        self
    }

    pub fn converter_tier(mut self, tier: ConverterTier) -> Self {
        self.converter_tier = Some(tier);
        self
    }

    pub fn hint(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.set(key, value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.default_spec.validate()?;
        if !(2..=8).contains(&self.buffer_count) {
            return Err(SonicPortError::Configuration(format!(
                "buffer_count must be in 2..=8, got {}",
                self.buffer_count
            )));
        }
        if self.sample_frames == Some(0) {
            return Err(SonicPortError::Configuration(
                "sample_frames must be greater than 0".into(),
            ));
        }
        if self.wait_timeout.is_zero() {
            return Err(SonicPortError::Configuration(
                "wait_timeout must be greater than 0".into(),
            ));
        }
        if self.stream_capacity_frames == 0 {
            return Err(SonicPortError::Configuration(
                "stream_capacity_frames must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        SonicPortError::Configuration(format!("{} has an invalid value: {:?}", key, raw))
    })
}

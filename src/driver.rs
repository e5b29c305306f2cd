//! The driver contract every backend implements.
//!
//! An [`AudioDriver`] is the backend as a whole: it reports endpoints and opens them.
//! Opening yields a [`DeviceIo`], the per-device operation set that the generic worker
//! loop in [`crate::thread`] drives the same way for every backend:
//!
//! ```text
//! playback: wait -> get_device_buf -> (mix) -> play      until shutdown
//! capture:  wait_capture -> record -> (fan out)           until shutdown
//!           wait_capture -> flush_recording               when nobody listens
//! ```
//!
//! Transient problems are handled inside the driver. An `Err` from any `DeviceIo`
//! call is device-fatal: the worker marks the device disconnected and calls nothing
//! but [`DeviceIo::close`] afterwards.

use crate::config::Hints;
use crate::device::{AudioDevice, DefaultDevices, DeviceRegistry};
use crate::error::{Result, SonicPortError};
use crate::format::AudioSpec;
use crate::ring::RingStats;
use std::sync::Arc;
use std::time::Duration;

/// Per-device I/O operations, owned by the device's worker thread.
pub trait DeviceIo: Send {
    /// Runs once on the worker thread before the first iteration.
    fn thread_init(&mut self) {}

    /// Block until a playback buffer may be submitted or the device's shutdown flag is
    /// set. Must return within a bounded poll interval.
    fn wait(&mut self, device: &AudioDevice) -> Result<()>;

    /// Driver-owned buffer for the next chunk of output, or `None` to have the worker
    /// mix into its own work buffer and pass that to [`play`](Self::play).
    fn get_device_buf(&mut self) -> Option<&mut [u8]> {
        None
    }

    /// Commit a filled buffer. `buf` is empty when the chunk was written into the
    /// buffer returned by [`get_device_buf`](Self::get_device_buf).
    fn play(&mut self, buf: &[u8]) -> Result<()>;

    /// Block until recorded data may be available or shutdown is requested.
    fn wait_capture(&mut self, device: &AudioDevice) -> Result<()> {
        self.wait(device)
    }

    /// Copy recorded bytes into `buf`. Fewer bytes than requested is fine.
    fn record(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(SonicPortError::Driver("capture is not supported".into()))
    }

    /// Discard recorded data nobody is going to read.
    fn flush_recording(&mut self) {}

    /// Shortfall counters of the driver's shared buffer, if it has one.
    fn ring_stats(&self) -> Option<RingStats> {
        None
    }

    /// Stop the hardware and release buffers. Called exactly once, also after
    /// failures, and must cope with partially opened state.
    fn close(&mut self);
}

/// What the engine asks of [`AudioDriver::open_device`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenRequest {
    pub spec: AudioSpec,
    pub sample_frames: u32,
    /// Logical buffers for drivers that queue through a [`DeviceRing`](crate::ring::DeviceRing).
    pub buffer_count: usize,
    /// Longest a blocking wait may go without looking at the shutdown flag.
    pub poll_interval: Duration,
}

impl OpenRequest {
    pub fn buffer_size(&self) -> usize {
        self.spec.buffer_size(self.sample_frames)
    }

    /// The same request with a different sample format.
    pub fn with_format(mut self, format: crate::format::AudioFormat) -> Self {
        self.spec.format = format;
        self
    }
}

/// Result of a successful [`AudioDriver::open_device`].
pub struct OpenedDevice {
    pub io: Box<dyn DeviceIo>,
    /// What the hardware actually accepted.
    pub spec: AudioSpec,
    pub sample_frames: u32,
}

/// A backend.
pub trait AudioDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Report every endpoint through [`DeviceRegistry::add_device`].
    fn detect_devices(&self, registry: &DeviceRegistry) -> Result<DefaultDevices>;

    /// Open an endpoint. The requested format may be replaced by one from
    /// [`AudioFormat::closest_formats`](crate::format::AudioFormat::closest_formats);
    /// failure must not leave anything running.
    fn open_device(&self, device: &Arc<AudioDevice>, request: &OpenRequest)
    -> Result<OpenedDevice>;

    fn has_capture_support(&self) -> bool {
        false
    }

    fn deinitialize(&self) {}
}

/// Static description of a compiled-in backend.
#[derive(Clone, Copy)]
pub struct DriverBootstrap {
    pub name: &'static str,
    pub description: &'static str,
    /// Only used when asked for by name.
    pub demand_only: bool,
    /// Returns `None` when the backend cannot run here.
    pub init: fn(&Hints) -> Option<Box<dyn AudioDriver>>,
}

impl std::fmt::Debug for DriverBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverBootstrap")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("demand_only", &self.demand_only)
            .finish()
    }
}

/// Ordered set of backends to choose from.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    bootstraps: Vec<DriverBootstrap>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend compiled into this build, in preference order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for bootstrap in crate::backends::BOOTSTRAPS {
            registry.register(*bootstrap);
        }
        registry
    }

    pub fn register(&mut self, bootstrap: DriverBootstrap) {
        self.bootstraps.push(bootstrap);
    }

    pub fn bootstraps(&self) -> &[DriverBootstrap] {
        &self.bootstraps
    }

    pub fn find(&self, name: &str) -> Option<&DriverBootstrap> {
        self.bootstraps
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Start a backend.
    ///
    /// `requested` is a comma separated list of names tried in order; demand-only
    /// backends are eligible only when named. Without a request the first
    /// non-demand-only backend that initialises wins.
    pub fn select(&self, requested: Option<&str>, hints: &Hints) -> Result<Box<dyn AudioDriver>> {
        let candidates: Vec<&DriverBootstrap> = match requested {
            Some(list) if !list.trim().is_empty() => {
                let mut picked = Vec::new();
                for name in list.split(',').filter(|n| !n.trim().is_empty()) {
                    match self.find(name) {
                        Some(bootstrap) => picked.push(bootstrap),
                        None => log::warn!("Unknown audio driver {:?}", name.trim()),
                    }
                }
                picked
            }
            _ => self.bootstraps.iter().filter(|b| !b.demand_only).collect(),
        };

        for bootstrap in candidates {
            log::debug!("Trying audio driver {}", bootstrap.name);
            if let Some(driver) = (bootstrap.init)(hints) {
                log::info!(
                    "Using audio driver {} ({})",
                    bootstrap.name,
                    bootstrap.description
                );
                return Ok(driver);
            }
        }

        Err(SonicPortError::Driver(match requested {
            Some(list) => format!("No requested audio driver could start: {}", list),
            None => "No available audio driver".into(),
        }))
    }
}

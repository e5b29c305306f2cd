//! Audio engine for SonicPort

use crate::config::EngineConfig;
use crate::convert::Converter;
use crate::device::{AudioDevice, DeviceId, DeviceInfo, DeviceRegistry};
use crate::driver::{AudioDriver, DriverRegistry, OpenRequest};
use crate::error::{Result, SonicPortError};
use crate::events::AudioEvent;
use crate::format::{AudioSpec, default_sample_frames};
use crate::stream::{CaptureStream, PlaybackStream, StreamId, capture_pair, playback_pair};
use crate::thread::DeviceSession;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Owns one backend and every device it reported.
///
/// Devices are opened lazily by the first stream bound to them and stay open, with
/// their worker thread running, until [`close_device`](Self::close_device) or
/// [`shutdown`](Self::shutdown).
pub struct AudioEngine {
    config: EngineConfig,
    driver: Box<dyn AudioDriver>,
    converter: Converter,
    registry: DeviceRegistry,
    events_tx: Sender<AudioEvent>,
    events: Receiver<AudioEvent>,
    is_running: AtomicBool,
    next_stream_id: AtomicU64,
}

impl AudioEngine {
    /// Start the backend named by the config, or the first one that works.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let driver = DriverRegistry::with_defaults().select(config.driver.as_deref(), &config.hints)?;
        Self::with_driver(config, driver)
    }

    /// Run on an already constructed backend.
    pub fn with_driver(config: EngineConfig, driver: Box<dyn AudioDriver>) -> Result<Self> {
        config.validate()?;
        let converter = match config.converter_tier {
            Some(tier) => Converter::for_tier(tier)?,
            None => *Converter::detect(),
        };
        log::info!("Using {} sample converter", converter.tier());

        let (events_tx, events) = unbounded();
        let registry = DeviceRegistry::new(events_tx.clone());
        let defaults = match driver.detect_devices(&registry) {
            Ok(defaults) => defaults,
            Err(e) => {
                driver.deinitialize();
                return Err(e);
            }
        };
        registry.apply_defaults(defaults);
        log::info!(
            "Audio driver {} reported {} devices",
            driver.name(),
            registry.len()
        );

        Ok(Self {
            config,
            driver,
            converter,
            registry,
            events_tx,
            events,
            is_running: AtomicBool::new(true),
            next_stream_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// The device registry, for backends that report hotplug changes.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn devices(&self, is_capture: bool) -> Vec<DeviceInfo> {
        self.registry.list(is_capture)
    }

    pub fn default_device(&self, is_capture: bool) -> Option<DeviceId> {
        self.registry.default_device(is_capture)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    fn device(&self, id: DeviceId) -> Result<Arc<AudioDevice>> {
        if !self.is_running() {
            return Err(SonicPortError::Engine("Audio engine is shut down".into()));
        }
        self.registry
            .find(id)
            .ok_or(SonicPortError::DeviceNotFound(id))
    }

    /// Lock the device's session, opening the device first if it is closed. A freshly
    /// opened device's worker is not running yet; see [`bind`](Self::bind).
    fn open_session<'a>(
        &self,
        device: &'a Arc<AudioDevice>,
        requested: Option<AudioSpec>,
    ) -> Result<MutexGuard<'a, Option<DeviceSession>>> {
        let id = device.id();
        let mut session = device.session();
        if session.is_some() {
            // A dead session stays until closed.
            if device.is_disconnected() {
                return Err(SonicPortError::Disconnected(id));
            }
            return Ok(session);
        }

        let requested = requested.unwrap_or(self.config.default_spec);
        requested.validate()?;
        let spec = device.info().default_spec.upgraded_with(&requested);
        let request = OpenRequest {
            spec,
            sample_frames: self
                .config
                .sample_frames
                .unwrap_or_else(|| default_sample_frames(spec.freq)),
            buffer_count: self.config.buffer_count,
            poll_interval: self.config.wait_timeout,
        };

        device.reset_for_open();
        let mut opened = self.driver.open_device(device, &request).map_err(|e| {
            log::error!("Failed to open audio device {}: {}", id, e);
            e
        })?;
        if let Err(e) = opened.spec.validate() {
            opened.io.close();
            return Err(e);
        }

        let (spec, sample_frames) = (opened.spec, opened.sample_frames);
        *session = Some(DeviceSession::new(device.clone(), opened, self.converter));
        log::info!(
            "Opened audio device {} ({}): {} {} ch {} Hz, {} frames",
            id,
            device.info().name,
            spec.format,
            spec.channels,
            spec.freq,
            sample_frames
        );
        let _ = self.events_tx.send(AudioEvent::DeviceOpened {
            device: id,
            spec,
            sample_frames,
        });
        Ok(session)
    }

    /// Open the device if needed, attach a stream, then make sure the worker runs.
    /// The first stream is attached before the worker starts so it misses nothing.
    fn bind<T>(
        &self,
        device: &Arc<AudioDevice>,
        spec: Option<AudioSpec>,
        attach: impl FnOnce(&DeviceSession) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.open_session(device, spec)?;
        let active = session.as_mut().ok_or_else(|| {
            SonicPortError::Engine(format!("Device {} is not open", device.id()))
        })?;
        let bound = attach(active)?;
        if let Err(e) = active.launch() {
            log::error!("Failed to start device {}: {}", device.id(), e);
            session.take();
            return Err(e);
        }
        Ok(bound)
    }

    fn next_stream_id(&self) -> StreamId {
        StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Bind a new playback stream to a device, opening it if needed.
    ///
    /// `spec` is only a request; the stream reports what the device actually runs at.
    pub fn open_playback(&self, id: DeviceId, spec: Option<AudioSpec>) -> Result<PlaybackStream> {
        let device = self.device(id)?;
        if device.is_capture() {
            return Err(SonicPortError::AudioDevice(format!(
                "Device {} is a capture device",
                id
            )));
        }

        let stream = self.bind(&device, spec, |session| {
            let capacity = self.config.stream_capacity_frames * session.spec.channels as usize;
            let (stream, source) = playback_pair(self.next_stream_id(), id, session.spec, capacity);
            session.add_playback(source)?;
            Ok(stream)
        })?;
        log::debug!("Bound {} to playback device {}", stream.id(), id);
        Ok(stream)
    }

    /// Bind a new capture stream to a device, opening it if needed.
    pub fn open_capture(&self, id: DeviceId, spec: Option<AudioSpec>) -> Result<CaptureStream> {
        let device = self.device(id)?;
        if !device.is_capture() {
            return Err(SonicPortError::AudioDevice(format!(
                "Device {} is a playback device",
                id
            )));
        }
        if !self.driver.has_capture_support() {
            return Err(SonicPortError::Driver(format!(
                "Audio driver {} cannot record",
                self.driver.name()
            )));
        }

        let stream = self.bind(&device, spec, |session| {
            let capacity = self.config.stream_capacity_frames * session.spec.channels as usize;
            let (stream, sink) = capture_pair(self.next_stream_id(), id, session.spec, capacity);
            session.add_capture(sink)?;
            Ok(stream)
        })?;
        log::debug!("Bound {} to capture device {}", stream.id(), id);
        Ok(stream)
    }

    /// Spec and buffer frames of an open device.
    pub fn device_spec(&self, id: DeviceId) -> Option<(AudioSpec, u32)> {
        let device = self.registry.find(id)?;
        let session = device.session();
        session.as_ref().map(|s| (s.spec, s.sample_frames))
    }

    /// Streams currently bound to an open device.
    pub fn stream_count(&self, id: DeviceId) -> usize {
        self.registry
            .find(id)
            .and_then(|device| device.session().as_ref().map(|s| s.stream_count()))
            .unwrap_or(0)
    }

    fn set_paused(&self, id: DeviceId, paused: bool) -> Result<()> {
        let device = self.device(id)?;
        if !device.is_open() {
            return Err(SonicPortError::AudioDevice(format!(
                "Device {} is not open",
                id
            )));
        }
        device.set_paused(paused);
        log::debug!(
            "Device {} {}",
            id,
            if paused { "paused" } else { "resumed" }
        );
        Ok(())
    }

    /// Feed the device silence (or drop what it records) until resumed.
    pub fn pause(&self, id: DeviceId) -> Result<()> {
        self.set_paused(id, true)
    }

    pub fn resume(&self, id: DeviceId) -> Result<()> {
        self.set_paused(id, false)
    }

    pub fn is_paused(&self, id: DeviceId) -> bool {
        self.registry.find(id).is_some_and(|d| d.is_paused())
    }

    /// Stop the worker, close the driver side and detach every bound stream.
    /// Closing a device that is not open does nothing.
    pub fn close_device(&self, id: DeviceId) -> Result<()> {
        let device = self.device(id)?;
        self.stop_device(&device);
        Ok(())
    }

    fn stop_device(&self, device: &AudioDevice) {
        let Some(session) = device.session().take() else {
            return;
        };
        session.stop(device);
        log::info!("Closed audio device {}", device.id());
        let _ = self.events_tx.send(AudioEvent::DeviceClosed {
            device: device.id(),
        });
    }

    /// Report a device as lost. Returns false if unknown or already reported.
    pub fn device_disconnected(&self, id: DeviceId) -> bool {
        self.registry.device_disconnected(id)
    }

    /// Every event queued since the last call.
    pub fn poll_events(&self) -> Vec<AudioEvent> {
        self.events.try_iter().collect()
    }

    /// Block up to `timeout` for the next event.
    pub fn wait_event(&self, timeout: Duration) -> Option<AudioEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Close every device and release the backend. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return;
        }
        for device in self.registry.all() {
            self.stop_device(&device);
        }
        self.driver.deinitialize();
        log::info!("Audio engine on driver {} shut down", self.driver.name());
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::callback::CallbackDriver;
    use crate::config::{HINT_DISK_INPUT_FILE, HINT_DISK_OUTPUT_FILE, HINT_TIMESCALE};
    use crate::format::AudioFormat;
    use std::time::Instant;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sonicport-engine-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_unknown_driver_is_an_error() {
        init_logging();
        let config = EngineConfig::new().driver("nonexistent");
        assert!(AudioEngine::new(config).is_err());
        assert!(AudioEngine::new(EngineConfig::new().buffer_count(0)).is_err());
    }

    #[test]
    fn test_callback_playback_end_to_end() {
        init_logging();
        let config = EngineConfig::new()
            .sample_frames(256)
            .hint(HINT_TIMESCALE, "8");
        let driver = CallbackDriver::new(&config.hints);
        let control = driver.control();
        let (tap_tx, tap_rx) = unbounded();
        control.set_output_tap(tap_tx);
        let engine = AudioEngine::with_driver(config, Box::new(driver)).unwrap();
        assert_eq!(engine.driver_name(), "callback");

        let id = engine.default_device(false).unwrap();
        let requested = AudioSpec::new(AudioFormat::S16, 1, 8000);
        let mut stream = engine.open_playback(id, Some(requested)).unwrap();
        // The simulated device runs F32 stereo at 48 kHz and is never downgraded.
        assert_eq!(stream.spec(), AudioSpec::new(AudioFormat::F32, 2, 48000));
        assert_eq!(engine.device_spec(id), Some((stream.spec(), 256)));
        assert_eq!(stream.write(&[0.5; 1024]), 1024);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut heard = 0;
        while heard < 1024 && Instant::now() < deadline {
            if let Ok(burst) = tap_rx.recv_timeout(Duration::from_millis(100)) {
                heard += burst
                    .chunks_exact(4)
                    .filter(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) == 0.5)
                    .count();
            }
        }
        assert_eq!(heard, 1024);

        engine.close_device(id).unwrap();
        assert!(stream.is_closed());
        assert_eq!(engine.device_spec(id), None);
        let events = engine.poll_events();
        assert!(events.iter().any(|e| matches!(e, AudioEvent::DeviceOpened { .. })));
        assert!(events.contains(&AudioEvent::DeviceClosed { device: id }));
    }

    #[test]
    fn test_injected_error_disconnects_device() {
        init_logging();
        let config = EngineConfig::new()
            .sample_frames(128)
            .hint(HINT_TIMESCALE, "8");
        let driver = CallbackDriver::new(&config.hints);
        let control = driver.control();
        let engine = AudioEngine::with_driver(config, Box::new(driver)).unwrap();

        let id = engine.default_device(false).unwrap();
        let stream = engine.open_playback(id, None).unwrap();
        let handle = engine.registry().find(id).unwrap().handle();
        assert!(control.inject_error(handle));

        wait_until(|| stream.is_closed());
        let disconnects = engine
            .poll_events()
            .into_iter()
            .filter(|e| *e == AudioEvent::DeviceDisconnected { device: id })
            .count();
        assert_eq!(disconnects, 1);
        assert!(matches!(
            engine.open_playback(id, None),
            Err(SonicPortError::Disconnected(_))
        ));
        engine.close_device(id).unwrap();
        assert!(!control.inject_error(handle));

        // Reopened, the endpoint can fail and be reported again.
        let stream = engine.open_playback(id, None).unwrap();
        assert!(control.inject_error(handle));
        wait_until(|| stream.is_closed());
        let disconnects = engine
            .poll_events()
            .into_iter()
            .filter(|e| *e == AudioEvent::DeviceDisconnected { device: id })
            .count();
        assert_eq!(disconnects, 1);
        engine.close_device(id).unwrap();
    }

    #[test]
    fn test_disk_playback_converts_to_device_format() {
        init_logging();
        let path = temp_path("out.raw");
        let config = EngineConfig::new()
            .driver("disk")
            .sample_frames(64)
            .hint(HINT_DISK_OUTPUT_FILE, path.to_string_lossy())
            .hint(HINT_TIMESCALE, "50");
        let engine = AudioEngine::new(config).unwrap();
        assert_eq!(engine.driver_name(), "disk");

        let id = engine.default_device(false).unwrap();
        let spec = AudioSpec::new(AudioFormat::S16LE, 1, 8000);
        let mut first = engine.open_playback(id, Some(spec)).unwrap();
        let mut second = engine.open_playback(id, None).unwrap();
        assert_eq!(first.spec(), spec);
        assert_eq!(second.spec(), spec);
        assert_eq!(engine.stream_count(id), 2);

        engine.pause(id).unwrap();
        first.write(&[0.25; 64]);
        second.write(&[0.25; 64]);
        engine.resume(id).unwrap();
        wait_until(|| first.queued() == 0 && second.queued() == 0);
        engine.close_device(id).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        // Mixed: 0.5 * 32767 rounds half to even, 16384. A stream mixed alone
        // gives 8192; either way the total is the same.
        assert!(samples.iter().all(|&s| s == 0 || s == 8192 || s == 16384));
        assert_eq!(samples.iter().map(|&s| s as i64).sum::<i64>(), 64 * 16384);
    }

    #[test]
    fn test_disk_capture_and_pause() {
        init_logging();
        let path = temp_path("in.raw");
        let recorded: Vec<u8> = [0i16, 16384, -16384, 32767]
            .iter()
            .cycle()
            .take(64)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        std::fs::write(&path, &recorded).unwrap();

        let config = EngineConfig::new()
            .driver("disk")
            .sample_frames(16)
            .hint(HINT_DISK_INPUT_FILE, path.to_string_lossy())
            .hint(HINT_TIMESCALE, "50");
        let engine = AudioEngine::new(config).unwrap();
        let id = engine.default_device(true).unwrap();
        assert!(engine.open_playback(id, None).is_err());

        let spec = AudioSpec::new(AudioFormat::S16LE, 1, 8000);
        let mut stream = engine.open_capture(id, Some(spec)).unwrap();
        wait_until(|| stream.available() >= 64);
        engine.pause(id).unwrap();
        assert!(engine.is_paused(id));

        let mut out = [0.0f32; 64];
        assert_eq!(stream.read(&mut out), 64);
        let expected = [0.0, 16384.0 / 32767.0, -16384.0 / 32767.0, 1.0];
        for (got, want) in out.iter().zip(expected.iter().cycle()) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }

        engine.resume(id).unwrap();
        engine.shutdown();
        let _ = std::fs::remove_file(&path);
        assert!(stream.is_closed());
        assert!(!engine.is_running());
        assert!(engine.open_capture(id, None).is_err());
    }

    #[test]
    fn test_dummy_devices() {
        init_logging();
        let config = EngineConfig::new()
            .driver("dummy")
            .hint(HINT_TIMESCALE, "20");
        let engine = AudioEngine::new(config).unwrap();
        assert_eq!(engine.devices(false).len(), 1);
        assert_eq!(engine.devices(true)[0].name, "Dummy Input");
        assert!(matches!(
            engine.open_playback(DeviceId::new(999), None),
            Err(SonicPortError::DeviceNotFound(_))
        ));

        let id = engine.default_device(true).unwrap();
        assert!(engine.pause(id).is_err());
        let mut stream = engine.open_capture(id, None).unwrap();
        assert_eq!(stream.spec(), AudioSpec::default());
        wait_until(|| stream.available() > 0);
        let mut out = [1.0f32; 16];
        let got = stream.read(&mut out);
        assert!(out[..got].iter().all(|&x| x == 0.0));

        engine.close_device(id).unwrap();
        engine.close_device(id).unwrap();
    }
}

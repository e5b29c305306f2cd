//! Simulated callback-driven hardware.
//!
//! Each open device gets a clock thread standing in for the OS audio thread. It calls
//! the realtime half of the ring every burst, exactly as a real backend's callback
//! would, so the whole ring and semaphore protocol runs without audio hardware.

use super::Pacer;
use super::ring_io::{
    CaptureCallback, ErrorFlag, HardwareStream, PlaybackCallback, capture_ring, playback_ring,
};
use crate::config::{HINT_CALLBACK_BURST_FRAMES, HINT_CALLBACK_CAPTURE_TONE, Hints};
use crate::convert::Converter;
use crate::device::{AudioDevice, DefaultDevices, DeviceHandle, DeviceRegistry};
use crate::driver::{AudioDriver, DeviceIo, DriverBootstrap, OpenRequest, OpenedDevice};
use crate::error::{Result, SonicPortError};
use crate::format::{AudioFormat, AudioSpec};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

pub const BOOTSTRAP: DriverBootstrap = DriverBootstrap {
    name: "callback",
    description: "Simulated callback-driven device",
    demand_only: false,
    init: init_callback,
};

const OUTPUT_HANDLE: DeviceHandle = 0;
const INPUT_HANDLE: DeviceHandle = 1;

const SUPPORTED_FORMATS: [AudioFormat; 4] = [
    AudioFormat::F32,
    AudioFormat::S32,
    AudioFormat::S16,
    AudioFormat::U8,
];

fn init_callback(hints: &Hints) -> Option<Box<dyn AudioDriver>> {
    Some(Box::new(CallbackDriver::new(hints)))
}

/// Hooks into the simulated hardware, shared with the driver.
#[derive(Clone, Default)]
pub struct CallbackControl {
    errors: Arc<Mutex<HashMap<DeviceHandle, ErrorFlag>>>,
    tap: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
}

impl CallbackControl {
    /// Fire the error callback of an open device. Returns false if it is not open.
    pub fn inject_error(&self, handle: DeviceHandle) -> bool {
        match self.errors.lock().get(&handle) {
            Some(flag) => {
                flag.raise();
                true
            }
            None => false,
        }
    }

    /// Receive a copy of every burst the simulated output plays.
    pub fn set_output_tap(&self, tap: Sender<Vec<u8>>) {
        *self.tap.lock() = Some(tap);
    }

    fn register(&self, handle: DeviceHandle, flag: ErrorFlag) -> ErrorRegistration {
        self.errors.lock().insert(handle, flag);
        ErrorRegistration {
            errors: self.errors.clone(),
            handle,
        }
    }
}

/// Keeps a device's error callback reachable while its hardware runs.
struct ErrorRegistration {
    errors: Arc<Mutex<HashMap<DeviceHandle, ErrorFlag>>>,
    handle: DeviceHandle,
}

impl Drop for ErrorRegistration {
    fn drop(&mut self) {
        self.errors.lock().remove(&self.handle);
    }
}

pub struct CallbackDriver {
    hints: Hints,
    control: CallbackControl,
}

impl CallbackDriver {
    pub fn new(hints: &Hints) -> Self {
        Self {
            hints: hints.clone(),
            control: CallbackControl::default(),
        }
    }

    pub fn control(&self) -> CallbackControl {
        self.control.clone()
    }

    fn burst_frames(&self, sample_frames: u32) -> u32 {
        self.hints
            .get_parsed::<u32>(HINT_CALLBACK_BURST_FRAMES)
            .filter(|frames| *frames > 0)
            .unwrap_or((sample_frames / 2).max(1))
    }
}

impl AudioDriver for CallbackDriver {
    fn name(&self) -> &'static str {
        BOOTSTRAP.name
    }

    fn description(&self) -> &'static str {
        BOOTSTRAP.description
    }

    fn detect_devices(&self, registry: &DeviceRegistry) -> Result<DefaultDevices> {
        let spec = AudioSpec::new(AudioFormat::F32, 2, 48000);
        let playback = registry.add_device(false, "Simulated Output", spec, OUTPUT_HANDLE);
        let capture = registry.add_device(true, "Simulated Input", spec, INPUT_HANDLE);
        Ok(DefaultDevices {
            playback: Some(playback),
            capture: Some(capture),
        })
    }

    fn open_device(
        &self,
        device: &Arc<AudioDevice>,
        request: &OpenRequest,
    ) -> Result<OpenedDevice> {
        let format = request
            .spec
            .format
            .negotiate(|f| SUPPORTED_FORMATS.contains(&f))?;
        let request = request.with_format(format);
        let spec = request.spec;
        let burst = self.burst_frames(request.sample_frames);
        let period = Duration::from_secs_f64(burst as f64 / spec.freq as f64);
        let burst_bytes = spec.buffer_size(burst);
        let pacer = Pacer::new(period, self.hints.timescale());

        let io: Box<dyn DeviceIo> = if device.is_capture() {
            let (mut io, callback, errors) = capture_ring(&request)?;
            let tone = self
                .hints
                .get_parsed::<f32>(HINT_CALLBACK_CAPTURE_TONE)
                .filter(|hz| hz.is_finite() && *hz > 0.0);
            let hardware = Hardware::Capture {
                callback,
                tone: ToneSource::new(spec, tone, burst as usize),
            };
            io.attach(Box::new(SimulatedClock::start(
                device,
                pacer,
                hardware,
                burst_bytes,
                self.control.register(device.handle(), errors),
            )?));
            Box::new(io)
        } else {
            let (mut io, callback, errors) = playback_ring(&request)?;
            let hardware = Hardware::Playback {
                callback,
                tap: self.control.tap.clone(),
            };
            io.attach(Box::new(SimulatedClock::start(
                device,
                pacer,
                hardware,
                burst_bytes,
                self.control.register(device.handle(), errors),
            )?));
            Box::new(io)
        };

        log::info!(
            "Simulated {} device {} running {} frame bursts every {:?}",
            if device.is_capture() { "capture" } else { "playback" },
            device.id(),
            burst,
            period
        );
        Ok(OpenedDevice {
            io,
            spec,
            sample_frames: request.sample_frames,
        })
    }

    fn has_capture_support(&self) -> bool {
        true
    }

    fn deinitialize(&self) {
        self.control.errors.lock().clear();
        self.control.tap.lock().take();
    }
}

enum Hardware {
    Playback {
        callback: PlaybackCallback,
        tap: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    },
    Capture {
        callback: CaptureCallback,
        tone: ToneSource,
    },
}

impl Hardware {
    fn tick(&mut self, burst: &mut [u8]) {
        match self {
            Self::Playback { callback, tap } => {
                callback.render(burst);
                if let Some(tap) = &*tap.lock() {
                    let _ = tap.send(burst.to_vec());
                }
            }
            Self::Capture { callback, tone } => {
                tone.fill(burst);
                callback.capture(burst);
            }
        }
    }
}

/// Sine generator feeding the simulated microphone, or silence without a frequency.
struct ToneSource {
    spec: AudioSpec,
    step: Option<f32>,
    phase: f32,
    samples: Vec<f32>,
    converter: Converter,
}

impl ToneSource {
    fn new(spec: AudioSpec, frequency: Option<f32>, frames: usize) -> Self {
        Self {
            spec,
            step: frequency.map(|hz| std::f32::consts::TAU * hz / spec.freq as f32),
            phase: 0.0,
            samples: vec![0.0; frames * spec.channels as usize],
            converter: *Converter::detect(),
        }
    }

    fn fill(&mut self, out: &mut [u8]) {
        let Some(step) = self.step else {
            out.fill(self.spec.silence_value());
            return;
        };
        for frame in self.samples.chunks_exact_mut(self.spec.channels as usize) {
            frame.fill(0.5 * self.phase.sin());
            self.phase = (self.phase + step) % std::f32::consts::TAU;
        }
        if self
            .converter
            .f32_to_bytes(&self.samples, self.spec.format, out)
            .is_err()
        {
            out.fill(self.spec.silence_value());
        }
    }
}

/// Thread standing in for the OS audio callback.
struct SimulatedClock {
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    registration: Option<ErrorRegistration>,
}

impl SimulatedClock {
    fn start(
        device: &AudioDevice,
        mut pacer: Pacer,
        mut hardware: Hardware,
        burst_bytes: usize,
        registration: ErrorRegistration,
    ) -> Result<Self> {
        let stopping = Arc::new(AtomicBool::new(false));
        let flag = stopping.clone();
        let thread = std::thread::Builder::new()
            .name(format!("sonicport-hw{}", device.id().raw()))
            .spawn(move || {
                let mut burst = vec![0u8; burst_bytes];
                loop {
                    pacer.wait(&flag);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    hardware.tick(&mut burst);
                }
            })
            .map_err(|e| {
                SonicPortError::AudioDevice(format!("Failed to start simulated hardware: {}", e))
            })?;
        Ok(Self {
            stopping,
            thread: Some(thread),
            registration: Some(registration),
        })
    }
}

impl HardwareStream for SimulatedClock {
    fn stop(&mut self) {
        self.stopping.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.registration.take();
    }
}

impl Drop for SimulatedClock {
    fn drop(&mut self) {
        self.stop();
    }
}

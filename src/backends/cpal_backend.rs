//! Real hardware through cpal.
//!
//! cpal calls us from the OS audio thread with raw byte buffers, which feed the same
//! ring and semaphore protocol as the simulated callback backend. A cpal `Stream` may
//! not be `Send`, so each one lives on a small holder thread until the device closes.

use super::ring_io::{HardwareStream, capture_ring, playback_ring};
use crate::config::Hints;
use crate::device::{AudioDevice, DefaultDevices, DeviceHandle, DeviceId, DeviceRegistry};
use crate::driver::{AudioDriver, DeviceIo, DriverBootstrap, OpenRequest, OpenedDevice};
use crate::error::{Result, SonicPortError};
use crate::format::{AudioFormat, AudioSpec};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};
use std::sync::Arc;
use std::thread::JoinHandle;

pub const BOOTSTRAP: DriverBootstrap = DriverBootstrap {
    name: "cpal",
    description: "System audio through cpal",
    demand_only: false,
    init: init_cpal,
};

fn init_cpal(_hints: &Hints) -> Option<Box<dyn AudioDriver>> {
    let host = cpal::default_host();
    if host.default_output_device().is_none() && host.default_input_device().is_none() {
        log::debug!("cpal host {:?} has no audio devices", host.id());
        return None;
    }
    Some(Box::new(CpalDriver { host: host.id() }))
}

fn from_cpal(format: cpal::SampleFormat) -> Option<AudioFormat> {
    match format {
        cpal::SampleFormat::I8 => Some(AudioFormat::S8),
        cpal::SampleFormat::U8 => Some(AudioFormat::U8),
        cpal::SampleFormat::I16 => Some(AudioFormat::S16),
        cpal::SampleFormat::I32 => Some(AudioFormat::S32),
        cpal::SampleFormat::F32 => Some(AudioFormat::F32),
        _ => None,
    }
}

fn to_cpal(format: AudioFormat) -> Option<cpal::SampleFormat> {
    [
        cpal::SampleFormat::I8,
        cpal::SampleFormat::U8,
        cpal::SampleFormat::I16,
        cpal::SampleFormat::I32,
        cpal::SampleFormat::F32,
    ]
    .into_iter()
    .find(|candidate| from_cpal(*candidate) == Some(format))
}

pub struct CpalDriver {
    host: cpal::HostId,
}

fn open_host(id: cpal::HostId) -> Result<cpal::Host> {
    cpal::host_from_id(id)
        .map_err(|e| SonicPortError::AudioDevice(format!("Failed to open audio host: {}", e)))
}

/// Look an endpoint up again by name. cpal devices are not kept across threads.
fn find_device(host: cpal::HostId, is_capture: bool, name: &str) -> Result<cpal::Device> {
    let host = open_host(host)?;
    let enumerate_err =
        |e: cpal::DevicesError| SonicPortError::AudioDevice(format!("Failed to list devices: {}", e));
    let found = if is_capture {
        host.input_devices()
            .map_err(enumerate_err)?
            .find(|d| d.name().is_ok_and(|n| n == name))
    } else {
        host.output_devices()
            .map_err(enumerate_err)?
            .find(|d| d.name().is_ok_and(|n| n == name))
    };
    found.ok_or_else(|| SonicPortError::AudioDevice(format!("Audio device {:?} is gone", name)))
}

fn register(
    registry: &DeviceRegistry,
    is_capture: bool,
    devices: impl Iterator<Item = cpal::Device>,
    default_name: Option<String>,
) -> Option<DeviceId> {
    let mut default = None;
    for (index, device) in devices.enumerate() {
        let Ok(name) = device.name() else {
            continue;
        };
        let config = if is_capture {
            device.default_input_config()
        } else {
            device.default_output_config()
        };
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Skipping {}: {}", name, e);
                continue;
            }
        };
        let Some(format) = from_cpal(config.sample_format()) else {
            log::debug!("Skipping {}: sample format {:?}", name, config.sample_format());
            continue;
        };
        let spec = AudioSpec::new(format, config.channels(), config.sample_rate().0);
        let is_default = default_name.as_deref() == Some(name.as_str());
        let id = registry.add_device(is_capture, name, spec, index as DeviceHandle);
        if is_default {
            default = Some(id);
        }
    }
    default
}

fn supported_formats(device: &cpal::Device, is_capture: bool) -> Vec<AudioFormat> {
    let formats: Vec<cpal::SampleFormat> = if is_capture {
        device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.sample_format()).collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.sample_format()).collect())
            .unwrap_or_default()
    };
    formats.into_iter().filter_map(from_cpal).collect()
}

impl AudioDriver for CpalDriver {
    fn name(&self) -> &'static str {
        BOOTSTRAP.name
    }

    fn description(&self) -> &'static str {
        BOOTSTRAP.description
    }

    fn detect_devices(&self, registry: &DeviceRegistry) -> Result<DefaultDevices> {
        let host = open_host(self.host)?;
        let default_output = host.default_output_device().and_then(|d| d.name().ok());
        let default_input = host.default_input_device().and_then(|d| d.name().ok());

        let playback = match host.output_devices() {
            Ok(devices) => register(registry, false, devices, default_output),
            Err(e) => {
                log::warn!("Failed to list output devices: {}", e);
                None
            }
        };
        let capture = match host.input_devices() {
            Ok(devices) => register(registry, true, devices, default_input),
            Err(e) => {
                log::warn!("Failed to list input devices: {}", e);
                None
            }
        };
        Ok(DefaultDevices { playback, capture })
    }

    fn open_device(
        &self,
        device: &Arc<AudioDevice>,
        request: &OpenRequest,
    ) -> Result<OpenedDevice> {
        let is_capture = device.is_capture();
        let name = device.info().name.clone();
        let supported = supported_formats(&find_device(self.host, is_capture, &name)?, is_capture);
        let format = request
            .spec
            .format
            .negotiate(|f| supported.contains(&f))?;
        let request = request.with_format(format);
        let sample_format = to_cpal(format).ok_or_else(|| SonicPortError::UnsupportedFormat {
            requested: format,
            reason: "no cpal equivalent".into(),
        })?;
        let config = cpal::StreamConfig {
            channels: request.spec.channels,
            sample_rate: cpal::SampleRate(request.spec.freq),
            buffer_size: cpal::BufferSize::Fixed(request.sample_frames),
        };
        let host = self.host;
        let thread_name = format!("sonicport-cpal{}", device.id().raw());

        let io: Box<dyn DeviceIo> = if is_capture {
            let (mut io, mut callback, errors) = capture_ring(&request)?;
            let stream = CpalStream::start(thread_name, move || {
                find_device(host, true, &name)?
                    .build_input_stream_raw(
                        &config,
                        sample_format,
                        move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                            callback.capture(data.bytes())
                        },
                        move |_err| errors.raise(),
                        None,
                    )
                    .map_err(|e| {
                        SonicPortError::AudioDevice(format!("Failed to build stream: {}", e))
                    })
            })?;
            io.attach(Box::new(stream));
            Box::new(io)
        } else {
            let (mut io, mut callback, errors) = playback_ring(&request)?;
            let stream = CpalStream::start(thread_name, move || {
                find_device(host, false, &name)?
                    .build_output_stream_raw(
                        &config,
                        sample_format,
                        move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                            callback.render(data.bytes_mut())
                        },
                        move |_err| errors.raise(),
                        None,
                    )
                    .map_err(|e| {
                        SonicPortError::AudioDevice(format!("Failed to build stream: {}", e))
                    })
            })?;
            io.attach(Box::new(stream));
            Box::new(io)
        };

        log::info!(
            "Opened cpal device {} ({}) as {} {} ch {} Hz",
            device.id(),
            device.info().name,
            format,
            request.spec.channels,
            request.spec.freq
        );
        Ok(OpenedDevice {
            io,
            spec: request.spec,
            sample_frames: request.sample_frames,
        })
    }

    fn has_capture_support(&self) -> bool {
        true
    }
}

/// A playing cpal stream parked on its own thread.
struct CpalStream {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn start<F>(thread_name: String, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().map_err(|e| {
                        SonicPortError::AudioDevice(format!("Failed to start stream: {}", e))
                    })?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Returns once the handle is stopped or dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| {
                SonicPortError::AudioDevice(format!("Failed to spawn stream thread: {}", e))
            })?;

        let mut handle = Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(err)) => {
                handle.stop();
                Err(err)
            }
            Err(_) => {
                handle.stop();
                Err(SonicPortError::AudioDevice(
                    "Stream thread exited during setup".into(),
                ))
            }
        }
    }
}

impl HardwareStream for CpalStream {
    fn stop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("cpal stream thread panicked");
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        HardwareStream::stop(self);
    }
}

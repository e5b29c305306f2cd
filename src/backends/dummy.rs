//! Null backend: paced like real hardware, discards output, records silence.

use super::{FLEXIBLE_SPEC, Pacer};
use crate::config::Hints;
use crate::device::{AudioDevice, DefaultDevices, DeviceRegistry};
use crate::driver::{AudioDriver, DeviceIo, DriverBootstrap, OpenRequest, OpenedDevice};
use crate::error::Result;
use std::sync::Arc;

pub const BOOTSTRAP: DriverBootstrap = DriverBootstrap {
    name: "dummy",
    description: "Discards output and records silence",
    demand_only: true,
    init: init_dummy,
};

fn init_dummy(hints: &Hints) -> Option<Box<dyn AudioDriver>> {
    Some(Box::new(DummyDriver {
        timescale: hints.timescale(),
    }))
}

pub struct DummyDriver {
    timescale: f64,
}

impl AudioDriver for DummyDriver {
    fn name(&self) -> &'static str {
        BOOTSTRAP.name
    }

    fn description(&self) -> &'static str {
        BOOTSTRAP.description
    }

    fn detect_devices(&self, registry: &DeviceRegistry) -> Result<DefaultDevices> {
        let spec = FLEXIBLE_SPEC;
        Ok(DefaultDevices {
            playback: Some(registry.add_device(false, "Dummy Output", spec, 0)),
            capture: Some(registry.add_device(true, "Dummy Input", spec, 1)),
        })
    }

    fn open_device(
        &self,
        _device: &Arc<AudioDevice>,
        request: &OpenRequest,
    ) -> Result<OpenedDevice> {
        let spec = request.spec;
        Ok(OpenedDevice {
            io: Box::new(DummyIo {
                pacer: Pacer::new(spec.buffer_duration(request.sample_frames), self.timescale),
                silence: spec.silence_value(),
            }),
            spec,
            sample_frames: request.sample_frames,
        })
    }

    fn has_capture_support(&self) -> bool {
        true
    }
}

struct DummyIo {
    pacer: Pacer,
    silence: u8,
}

impl DeviceIo for DummyIo {
    fn wait(&mut self, device: &AudioDevice) -> Result<()> {
        self.pacer.wait(device.shutdown_flag());
        Ok(())
    }

    fn play(&mut self, _buf: &[u8]) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, buf: &mut [u8]) -> Result<usize> {
        buf.fill(self.silence);
        Ok(buf.len())
    }

    fn close(&mut self) {}
}

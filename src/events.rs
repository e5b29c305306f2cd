//! Event types for SonicPort

use crate::device::DeviceId;
use crate::format::AudioSpec;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    DeviceAdded {
        device: DeviceId,
        is_capture: bool,
    },
    DeviceRemoved {
        device: DeviceId,
        is_capture: bool,
    },
    /// Sent once per device, the first time it is found unusable.
    DeviceDisconnected {
        device: DeviceId,
    },
    DefaultDeviceChanged {
        device: DeviceId,
        is_capture: bool,
    },
    DeviceOpened {
        device: DeviceId,
        spec: AudioSpec,
        sample_frames: u32,
    },
    DeviceClosed {
        device: DeviceId,
    },
    BufferUnderrun {
        device: DeviceId,
        bytes: u64,
    },
    BufferOverrun {
        device: DeviceId,
        bytes: u64,
    },
}

impl AudioEvent {
    pub fn device(&self) -> DeviceId {
        match self {
            Self::DeviceAdded { device, .. }
            | Self::DeviceRemoved { device, .. }
            | Self::DeviceDisconnected { device }
            | Self::DefaultDeviceChanged { device, .. }
            | Self::DeviceOpened { device, .. }
            | Self::DeviceClosed { device }
            | Self::BufferUnderrun { device, .. }
            | Self::BufferOverrun { device, .. } => *device,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceDisconnected { .. }
                | Self::BufferUnderrun { .. }
                | Self::BufferOverrun { .. }
        )
    }

    pub fn is_hotplug_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceAdded { .. }
                | Self::DeviceRemoved { .. }
                | Self::DefaultDeviceChanged { .. }
        )
    }
}

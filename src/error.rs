//! Error types for SonicPort

use crate::device::DeviceId;
use crate::format::AudioFormat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonicPortError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Unsupported format {requested}: {reason}")]
    UnsupportedFormat {
        requested: AudioFormat,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ring buffer error: {0}")]
    RingBuffer(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Device {0} was disconnected")]
    Disconnected(DeviceId),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, SonicPortError>;

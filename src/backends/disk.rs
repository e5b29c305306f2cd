//! Raw PCM file backend.
//!
//! Playback writes every mixed buffer to [`HINT_DISK_OUTPUT_FILE`]; capture reads
//! [`HINT_DISK_INPUT_FILE`] and records silence once the file runs out. Both run at the
//! device's real rate unless sped up with [`HINT_TIMESCALE`](crate::config::HINT_TIMESCALE).

use super::{FLEXIBLE_SPEC, Pacer};
use crate::config::{HINT_DISK_INPUT_FILE, HINT_DISK_OUTPUT_FILE, Hints};
use crate::device::{AudioDevice, DefaultDevices, DeviceRegistry};
use crate::driver::{AudioDriver, DeviceIo, DriverBootstrap, OpenRequest, OpenedDevice};
use crate::error::{Result, SonicPortError};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

pub const BOOTSTRAP: DriverBootstrap = DriverBootstrap {
    name: "disk",
    description: "Raw PCM file input and output",
    demand_only: true,
    init: init_disk,
};

pub const DEFAULT_OUTPUT_FILE: &str = "sonicport.raw";
pub const DEFAULT_INPUT_FILE: &str = "sonicport-in.raw";

fn init_disk(hints: &Hints) -> Option<Box<dyn AudioDriver>> {
    Some(Box::new(DiskDriver {
        hints: hints.clone(),
    }))
}

pub struct DiskDriver {
    hints: Hints,
}

impl DiskDriver {
    fn path(&self, is_capture: bool) -> PathBuf {
        let (key, default) = if is_capture {
            (HINT_DISK_INPUT_FILE, DEFAULT_INPUT_FILE)
        } else {
            (HINT_DISK_OUTPUT_FILE, DEFAULT_OUTPUT_FILE)
        };
        PathBuf::from(self.hints.get(key).unwrap_or_else(|| default.to_string()))
    }
}

impl AudioDriver for DiskDriver {
    fn name(&self) -> &'static str {
        BOOTSTRAP.name
    }

    fn description(&self) -> &'static str {
        BOOTSTRAP.description
    }

    fn detect_devices(&self, registry: &DeviceRegistry) -> Result<DefaultDevices> {
        let spec = FLEXIBLE_SPEC;
        Ok(DefaultDevices {
            playback: Some(registry.add_device(false, "Disk Output", spec, 0)),
            capture: Some(registry.add_device(true, "Disk Input", spec, 1)),
        })
    }

    fn open_device(
        &self,
        device: &Arc<AudioDevice>,
        request: &OpenRequest,
    ) -> Result<OpenedDevice> {
        let spec = request.spec;
        let path = self.path(device.is_capture());
        let file = if device.is_capture() {
            let input = File::open(&path).map_err(|e| {
                SonicPortError::AudioDevice(format!("Failed to open {}: {}", path.display(), e))
            })?;
            DiskFile::Input {
                reader: BufReader::new(input),
                exhausted: false,
            }
        } else {
            let output = File::create(&path).map_err(|e| {
                SonicPortError::AudioDevice(format!("Failed to create {}: {}", path.display(), e))
            })?;
            DiskFile::Output(BufWriter::new(output))
        };

        log::info!(
            "Disk device {} {} {}",
            device.id(),
            if device.is_capture() {
                "reading from"
            } else {
                "writing to"
            },
            path.display()
        );

        let buffer_size = request.buffer_size();
        Ok(OpenedDevice {
            io: Box::new(DiskIo {
                pacer: Pacer::new(
                    spec.buffer_duration(request.sample_frames),
                    self.hints.timescale(),
                ),
                mixbuf: vec![spec.silence_value(); buffer_size],
                silence: spec.silence_value(),
                file,
            }),
            spec,
            sample_frames: request.sample_frames,
        })
    }

    fn has_capture_support(&self) -> bool {
        true
    }
}

enum DiskFile {
    Output(BufWriter<File>),
    Input {
        reader: BufReader<File>,
        exhausted: bool,
    },
}

struct DiskIo {
    pacer: Pacer,
    mixbuf: Vec<u8>,
    silence: u8,
    file: DiskFile,
}

impl DiskIo {
    /// Read up to `len` bytes into the mix buffer, stopping early only at end of file.
    fn read_some(&mut self, len: usize) -> Result<usize> {
        let DiskFile::Input { reader, exhausted } = &mut self.file else {
            return Err(SonicPortError::Driver("Not a capture device".into()));
        };
        let buf = &mut self.mixbuf[..len];
        let mut filled = 0;
        while !*exhausted && filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    log::info!("Disk input reached end of file, recording silence");
                    *exhausted = true;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl DeviceIo for DiskIo {
    fn wait(&mut self, device: &AudioDevice) -> Result<()> {
        self.pacer.wait(device.shutdown_flag());
        Ok(())
    }

    fn get_device_buf(&mut self) -> Option<&mut [u8]> {
        match self.file {
            DiskFile::Output(_) => Some(&mut self.mixbuf),
            DiskFile::Input { .. } => None,
        }
    }

    fn play(&mut self, buf: &[u8]) -> Result<()> {
        let DiskFile::Output(writer) = &mut self.file else {
            return Err(SonicPortError::Driver("Not a playback device".into()));
        };
        let data = if buf.is_empty() { &self.mixbuf[..] } else { buf };
        writer.write_all(data)?;
        Ok(())
    }

    fn record(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len().min(self.mixbuf.len());
        let filled = self.read_some(len)?;
        buf[..filled].copy_from_slice(&self.mixbuf[..filled]);
        buf[filled..len].fill(self.silence);
        Ok(len)
    }

    fn flush_recording(&mut self) {
        // Keep the file moving with the clock even when nobody listens.
        let len = self.mixbuf.len();
        if let Err(err) = self.read_some(len) {
            log::warn!("Disk input read failed while flushing: {}", err);
        }
    }

    fn close(&mut self) {
        if let DiskFile::Output(writer) = &mut self.file {
            if let Err(err) = writer.flush() {
                log::error!("Failed to flush disk output: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HINT_TIMESCALE;
    use crate::format::{AudioFormat, AudioSpec};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sonicport-{}-{}", std::process::id(), name))
    }

    fn open(hints: &Hints, is_capture: bool) -> Result<(Arc<AudioDevice>, OpenedDevice)> {
        let (tx, _rx) = unbounded();
        let registry = DeviceRegistry::new(tx);
        let driver = init_disk(hints).unwrap();
        let defaults = driver.detect_devices(&registry).unwrap();
        let id = if is_capture {
            defaults.capture
        } else {
            defaults.playback
        };
        let device = registry.find(id.unwrap()).unwrap();
        let request = OpenRequest {
            spec: AudioSpec::new(AudioFormat::S16LE, 1, 8000),
            sample_frames: 4,
            buffer_count: 2,
            poll_interval: Duration::from_millis(10),
        };
        let opened = driver.open_device(&device, &request)?;
        Ok((device, opened))
    }

    #[test]
    fn test_playback_writes_device_buffer() {
        let path = temp_path("out.raw");
        let hints = Hints::new()
            .with(HINT_DISK_OUTPUT_FILE, path.to_string_lossy())
            .with(HINT_TIMESCALE, "100");
        let (device, mut opened) = open(&hints, false).unwrap();

        opened.io.wait(&device).unwrap();
        let buf = opened.io.get_device_buf().unwrap();
        assert_eq!(buf.len(), 8);
        buf.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        opened.io.play(&[]).unwrap();
        opened.io.play(&[9; 8]).unwrap();
        opened.io.close();

        let written = std::fs::read(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(&written[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&written[8..], &[9; 8]);
    }

    #[test]
    fn test_capture_pads_with_silence_at_eof() {
        let path = temp_path("in.raw");
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        let hints = Hints::new().with(HINT_DISK_INPUT_FILE, path.to_string_lossy());
        let (_device, mut opened) = open(&hints, true).unwrap();

        assert!(opened.io.get_device_buf().is_none());
        let mut buf = [0xffu8; 8];
        assert_eq!(opened.io.record(&mut buf).unwrap(), 8);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(opened.io.record(&mut buf).unwrap(), 8);
        assert_eq!(buf, [9, 10, 0, 0, 0, 0, 0, 0]);
        opened.io.close();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_flush_skips_input() {
        let path = temp_path("flush.raw");
        std::fs::write(&path, (0u8..16).collect::<Vec<_>>()).unwrap();
        let hints = Hints::new().with(HINT_DISK_INPUT_FILE, path.to_string_lossy());
        let (_device, mut opened) = open(&hints, true).unwrap();

        opened.io.flush_recording();
        let mut buf = [0u8; 8];
        opened.io.record(&mut buf).unwrap();
        assert_eq!(buf, [8, 9, 10, 11, 12, 13, 14, 15]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_input_fails_to_open() {
        let hints = Hints::new().with(HINT_DISK_INPUT_FILE, temp_path("missing.raw").to_string_lossy());
        assert!(open(&hints, true).is_err());
    }
}

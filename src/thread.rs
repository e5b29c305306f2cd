//! The generic device worker.
//!
//! Every open device gets one thread, named `sonicport-P<id>` for playback and
//! `sonicport-C<id>` for capture, that drives the backend's [`DeviceIo`] through the
//! same loop regardless of backend. Playback mixes the bound streams in `f32` and
//! converts once into the device format; capture converts once and fans out to every
//! bound stream.

use crate::convert::Converter;
use crate::device::AudioDevice;
use crate::driver::{DeviceIo, OpenedDevice};
use crate::error::{Result, SonicPortError};
use crate::events::AudioEvent;
use crate::format::AudioSpec;
use crate::ring::RingStats;
use crate::stream::{CaptureSink, PlaybackSource, StreamId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How one playback iteration produces its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixStrategy {
    /// Paused or nothing bound.
    Silence,
    /// A single stream, converted straight into the device buffer.
    CopyOne,
    /// Several streams summed in `f32`, then converted.
    Mix,
}

impl MixStrategy {
    pub fn choose(paused: bool, streams: usize) -> Self {
        match (paused, streams) {
            (true, _) | (false, 0) => Self::Silence,
            (false, 1) => Self::CopyOne,
            _ => Self::Mix,
        }
    }
}

pub(crate) enum StreamSet {
    Playback(Vec<PlaybackSource>),
    Capture(Vec<CaptureSink>),
}

impl StreamSet {
    fn close_all(&mut self) {
        match self {
            Self::Playback(sources) => sources.iter().for_each(PlaybackSource::close),
            Self::Capture(sinks) => sinks.iter().for_each(CaptureSink::close),
        }
    }

    /// Drop streams whose application half is gone; returns how many remain.
    fn prune(&mut self) -> usize {
        fn keep(id: StreamId, finished: bool) -> bool {
            if finished {
                log::debug!("Unbinding finished stream {}", id);
            }
            !finished
        }
        match self {
            Self::Playback(sources) => {
                sources.retain(|s| keep(s.id, s.is_finished()));
                sources.len()
            }
            Self::Capture(sinks) => {
                sinks.retain(|s| keep(s.id, s.is_finished()));
                sinks.len()
            }
        }
    }
}

pub(crate) type SharedStreams = Arc<Mutex<StreamSet>>;

/// State of an open device, kept under the device's own lock.
pub(crate) struct DeviceSession {
    pub(crate) spec: AudioSpec,
    pub(crate) sample_frames: u32,
    pub(crate) buffer_size: usize,
    pub(crate) streams: SharedStreams,
    /// Built but not yet running; launched once the first stream is bound. Dropping it
    /// closes the driver side.
    pending: Option<Worker>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Wrap a freshly opened device. Nothing runs until [`launch`](Self::launch).
    pub(crate) fn new(device: Arc<AudioDevice>, opened: OpenedDevice, converter: Converter) -> Self {
        let OpenedDevice {
            io,
            spec,
            sample_frames,
        } = opened;
        let buffer_size = spec.buffer_size(sample_frames);
        let samples = sample_frames as usize * spec.channels as usize;
        let streams = Arc::new(Mutex::new(if device.is_capture() {
            StreamSet::Capture(Vec::new())
        } else {
            StreamSet::Playback(Vec::new())
        }));

        let worker = Worker {
            device: device.clone(),
            io,
            io_closed: false,
            mixer: Mixer {
                converter,
                spec,
                streams: streams.clone(),
                mix: vec![0.0; samples],
                scratch: vec![0.0; samples],
            },
            work: vec![0; spec.work_buffer_size(sample_frames)],
            buffer_size,
            last_stats: RingStats::default(),
            drain: spec.buffer_duration(sample_frames) * 2,
        };

        Self {
            spec,
            sample_frames,
            buffer_size,
            streams,
            pending: Some(worker),
            worker: None,
        }
    }

    /// Spawn the worker thread. Does nothing if it already runs.
    pub(crate) fn launch(&mut self) -> Result<()> {
        let Some(worker) = self.pending.take() else {
            return Ok(());
        };
        let device = &worker.device;
        let name = format!(
            "sonicport-{}{}",
            if device.is_capture() { 'C' } else { 'P' },
            device.id().raw()
        );
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|e| SonicPortError::Engine(format!("Failed to spawn audio thread: {}", e)))?;
        self.worker = Some(handle);
        Ok(())
    }

    pub(crate) fn add_playback(&self, source: PlaybackSource) -> Result<()> {
        match &mut *self.streams.lock() {
            StreamSet::Playback(sources) => {
                sources.push(source);
                Ok(())
            }
            StreamSet::Capture(_) => Err(SonicPortError::AudioDevice(
                "Cannot bind a playback stream to a capture device".into(),
            )),
        }
    }

    pub(crate) fn add_capture(&self, sink: CaptureSink) -> Result<()> {
        match &mut *self.streams.lock() {
            StreamSet::Capture(sinks) => {
                sinks.push(sink);
                Ok(())
            }
            StreamSet::Playback(_) => Err(SonicPortError::AudioDevice(
                "Cannot bind a capture stream to a playback device".into(),
            )),
        }
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.streams.lock().prune()
    }

    /// Signal shutdown, wait for the worker to close the driver, then detach streams.
    pub(crate) fn stop(mut self, device: &AudioDevice) {
        device.request_shutdown();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Audio thread of device {} panicked", device.id());
            }
        }
        self.streams.lock().close_all();
    }
}


struct Mixer {
    converter: Converter,
    spec: AudioSpec,
    streams: SharedStreams,
    mix: Vec<f32>,
    scratch: Vec<f32>,
}

impl Mixer {
    fn fill_playback(&mut self, paused: bool, dst: &mut [u8]) -> Result<()> {
        let samples = self.mix.len();
        if dst.len() != samples * self.spec.format.byte_size() {
            return Err(SonicPortError::Driver(format!(
                "Device buffer is {} bytes, expected {}",
                dst.len(),
                samples * self.spec.format.byte_size()
            )));
        }

        let mut streams = self.streams.lock();
        streams.prune();
        let StreamSet::Playback(sources) = &mut *streams else {
            dst.fill(self.spec.silence_value());
            return Ok(());
        };

        match MixStrategy::choose(paused, sources.len()) {
            MixStrategy::Silence => {
                dst.fill(self.spec.silence_value());
                return Ok(());
            }
            MixStrategy::CopyOne => {
                sources[0].pull(&mut self.mix);
            }
            MixStrategy::Mix => {
                self.mix.fill(0.0);
                for source in sources.iter_mut() {
                    source.pull(&mut self.scratch);
                    for (m, x) in self.mix.iter_mut().zip(&self.scratch) {
                        *m += *x;
                    }
                }
            }
        }
        drop(streams);

        self.converter
            .f32_to_bytes(&self.mix, self.spec.format, dst)?;
        Ok(())
    }

    fn has_listeners(&self) -> bool {
        self.streams.lock().prune() > 0
    }

    /// Convert recorded bytes and hand them to every capture stream.
    fn deliver_capture(&mut self, bytes: &[u8]) -> Result<usize> {
        let size = self.spec.format.byte_size();
        let samples = (bytes.len() / size).min(self.mix.len());
        let floats = &mut self.mix[..samples];
        self.converter
            .bytes_to_f32(self.spec.format, &bytes[..samples * size], floats)?;

        let mut dropped = 0;
        if let StreamSet::Capture(sinks) = &mut *self.streams.lock() {
            for sink in sinks.iter_mut() {
                dropped += sink.push(floats);
            }
        }
        Ok(dropped)
    }
}

struct Worker {
    device: Arc<AudioDevice>,
    io: Box<dyn DeviceIo>,
    io_closed: bool,
    mixer: Mixer,
    work: Vec<u8>,
    buffer_size: usize,
    last_stats: RingStats,
    drain: Duration,
}

impl Worker {
    fn run(mut self) {
        log::debug!("Audio thread for device {} started", self.device.id());
        self.io.thread_init();
        if self.device.is_capture() {
            self.run_capture();
        } else {
            self.run_playback();
        }
        self.close_io();
        if self.device.is_disconnected() {
            self.mixer.streams.lock().close_all();
        }
        log::debug!("Audio thread for device {} finished", self.device.id());
    }

    fn close_io(&mut self) {
        if !self.io_closed {
            self.io_closed = true;
            self.io.close();
        }
    }

    fn running(&self) -> bool {
        !self.device.is_shutdown() && !self.device.is_disconnected()
    }

    fn run_playback(&mut self) {
        while self.running() {
            if let Err(err) = self.io.wait(&self.device) {
                self.fail(err);
                return;
            }
            if !self.running() {
                break;
            }
            if let Err(err) = self.playback_iteration() {
                self.fail(err);
                return;
            }
            self.report_stats();
        }
        if !self.device.is_disconnected() {
            // Let the hardware play out what is already queued.
            std::thread::sleep(self.drain);
        }
    }

    fn playback_iteration(&mut self) -> Result<()> {
        let paused = self.device.is_paused();
        let Self {
            io,
            mixer,
            work,
            buffer_size,
            ..
        } = self;
        match io.get_device_buf() {
            Some(buf) => {
                mixer.fill_playback(paused, buf)?;
                io.play(&[])
            }
            None => {
                let buf = &mut work[..*buffer_size];
                mixer.fill_playback(paused, buf)?;
                io.play(buf)
            }
        }
    }

    fn run_capture(&mut self) {
        while self.running() {
            if let Err(err) = self.io.wait_capture(&self.device) {
                self.fail(err);
                return;
            }
            if !self.running() {
                break;
            }
            if let Err(err) = self.capture_iteration() {
                self.fail(err);
                return;
            }
            self.report_stats();
        }
        if !self.device.is_disconnected() {
            self.io.flush_recording();
        }
    }

    fn capture_iteration(&mut self) -> Result<()> {
        if self.device.is_paused() || !self.mixer.has_listeners() {
            self.io.flush_recording();
            return Ok(());
        }

        let buf = &mut self.work[..self.buffer_size];
        let got = self.io.record(buf)?;
        if got > self.buffer_size {
            return Err(SonicPortError::Driver(format!(
                "Driver reported {} recorded bytes into a {} byte buffer",
                got, self.buffer_size
            )));
        }
        if got == 0 {
            return Ok(());
        }

        let dropped = self.mixer.deliver_capture(&self.work[..got])?;
        if dropped > 0 {
            log::debug!(
                "Capture streams of device {} dropped {} samples",
                self.device.id(),
                dropped
            );
        }
        Ok(())
    }

    fn fail(&self, err: SonicPortError) {
        log::error!("Audio device {} failed: {}", self.device.id(), err);
        self.device.disconnected();
    }

    fn report_stats(&mut self) {
        let Some(stats) = self.io.ring_stats() else {
            return;
        };
        let id = self.device.id();
        let underrun = stats.underrun_bytes - self.last_stats.underrun_bytes;
        if underrun > 0 {
            log::warn!("Device {} underran by {} bytes", id, underrun);
            let _ = self.device.events().send(AudioEvent::BufferUnderrun {
                device: id,
                bytes: underrun,
            });
        }
        let overrun = stats.overrun_bytes - self.last_stats.overrun_bytes;
        if overrun > 0 {
            log::warn!("Device {} overran by {} bytes", id, overrun);
            let _ = self.device.events().send(AudioEvent::BufferOverrun {
                device: id,
                bytes: overrun,
            });
        }
        self.last_stats = stats;
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Covers a worker that never ran, including one whose thread failed to spawn.
        self.close_io();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRegistry;
    use crate::format::AudioFormat;
    use crate::stream::{capture_pair, playback_pair};
    use crossbeam_channel::{Receiver, unbounded};
    use std::time::Instant;

    #[derive(Default)]
    struct Log {
        played: Vec<Vec<u8>>,
        flushes: usize,
        closed: usize,
        thread_name: Option<String>,
    }

    struct FakeIo {
        log: Arc<Mutex<Log>>,
        fail_after: Option<usize>,
        record_value: u8,
    }

    impl DeviceIo for FakeIo {
        fn thread_init(&mut self) {
            self.log.lock().thread_name = std::thread::current().name().map(String::from);
        }

        fn wait(&mut self, _device: &AudioDevice) -> Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        }

        fn play(&mut self, buf: &[u8]) -> Result<()> {
            let mut log = self.log.lock();
            if self.fail_after.is_some_and(|n| log.played.len() >= n) {
                return Err(SonicPortError::AudioDevice("unplugged".into()));
            }
            log.played.push(buf.to_vec());
            Ok(())
        }

        fn record(&mut self, buf: &mut [u8]) -> Result<usize> {
            buf.fill(self.record_value);
            Ok(buf.len())
        }

        fn flush_recording(&mut self) {
            self.log.lock().flushes += 1;
        }

        fn close(&mut self) {
            self.log.lock().closed += 1;
        }
    }

    fn open(
        is_capture: bool,
        spec: AudioSpec,
        fail_after: Option<usize>,
    ) -> (
        Arc<AudioDevice>,
        DeviceSession,
        Arc<Mutex<Log>>,
        Receiver<AudioEvent>,
    ) {
        let (device, mut session, log, rx) = build(is_capture, spec, fail_after);
        session.launch().unwrap();
        (device, session, log, rx)
    }

    fn build(
        is_capture: bool,
        spec: AudioSpec,
        fail_after: Option<usize>,
    ) -> (
        Arc<AudioDevice>,
        DeviceSession,
        Arc<Mutex<Log>>,
        Receiver<AudioEvent>,
    ) {
        let (tx, rx) = unbounded();
        let registry = DeviceRegistry::new(tx);
        let id = registry.add_device(is_capture, "fake", spec, 0);
        let device = registry.find(id).unwrap();
        let log = Arc::new(Mutex::new(Log::default()));
        let opened = OpenedDevice {
            io: Box::new(FakeIo {
                log: log.clone(),
                fail_after,
                record_value: 0x40,
            }),
            spec,
            sample_frames: 4,
        };
        let session = DeviceSession::new(device.clone(), opened, Converter::scalar());
        (device, session, log, rx)
    }

    fn wait_for(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_strategy_choice() {
        assert_eq!(MixStrategy::choose(true, 3), MixStrategy::Silence);
        assert_eq!(MixStrategy::choose(false, 0), MixStrategy::Silence);
        assert_eq!(MixStrategy::choose(false, 1), MixStrategy::CopyOne);
        assert_eq!(MixStrategy::choose(false, 2), MixStrategy::Mix);
    }

    #[test]
    fn test_playback_without_streams_is_silence() {
        let spec = AudioSpec::new(AudioFormat::U8, 1, 8000);
        let (device, session, log, _events) = open(false, spec, None);
        wait_for(|| log.lock().played.len() >= 2);
        session.stop(&device);

        let log = log.lock();
        assert_eq!(log.thread_name.as_deref(), Some(format!("sonicport-P{}", device.id().raw()).as_str()));
        assert!(log.played.iter().all(|b| b == &vec![0x80; 4]));
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn test_playback_mixes_streams() {
        let spec = AudioSpec::new(AudioFormat::S16LE, 1, 8000);
        let (device, session, log, _events) = open(false, spec, None);
        device.set_paused(true);

        let (mut a, source_a) = playback_pair(StreamId(1), device.id(), spec, 16);
        let (mut b, source_b) = playback_pair(StreamId(2), device.id(), spec, 16);
        a.write(&[0.25, 0.25, 0.25, 0.25]);
        b.write(&[0.5, -0.5, 0.5, 1.0]);
        session.add_playback(source_a).unwrap();
        session.add_playback(source_b).unwrap();
        assert!(session.add_capture(capture_pair(StreamId(3), device.id(), spec, 4).1).is_err());

        let before = log.lock().played.len();
        device.set_paused(false);
        wait_for(|| log.lock().played.len() > before + 1);
        session.stop(&device);

        let log = log.lock();
        let mixed = log
            .played
            .iter()
            .find(|b| b.iter().any(|&x| x != 0))
            .unwrap();
        let samples: Vec<i16> = mixed
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![24575, -8192, 24575, 32767]);
    }

    #[test]
    fn test_fatal_play_disconnects_once() {
        let spec = AudioSpec::new(AudioFormat::F32, 2, 8000);
        let (device, session, log, events) = open(false, spec, Some(2));
        wait_for(|| device.is_disconnected());
        session.stop(&device);

        assert_eq!(log.lock().played.len(), 2);
        assert_eq!(log.lock().closed, 1);
        let disconnects = events
            .try_iter()
            .filter(|e| matches!(e, AudioEvent::DeviceDisconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn test_worker_that_never_runs_closes_driver() {
        let spec = AudioSpec::new(AudioFormat::U8, 1, 8000);

        // Same path as a thread that failed to spawn: the worker is dropped unrun.
        let (_device, mut session, log, _events) = build(false, spec, None);
        drop(session.pending.take());
        assert_eq!(log.lock().closed, 1);
        drop(session);
        assert_eq!(log.lock().closed, 1);

        let (_device, session, log, _events) = build(true, spec, None);
        drop(session);
        assert_eq!(log.lock().closed, 1);
        assert!(log.lock().thread_name.is_none());
    }

    #[test]
    fn test_capture_fans_out_or_flushes() {
        let spec = AudioSpec::new(AudioFormat::U8, 2, 8000);
        let (device, session, log, _events) = open(true, spec, None);
        wait_for(|| log.lock().flushes > 0);

        let (mut first, sink_a) = capture_pair(StreamId(1), device.id(), spec, 64);
        let (mut second, sink_b) = capture_pair(StreamId(2), device.id(), spec, 64);
        session.add_capture(sink_a).unwrap();
        session.add_capture(sink_b).unwrap();
        assert_eq!(session.stream_count(), 2);

        wait_for(|| first.available() >= 8 && second.available() >= 8);
        session.stop(&device);

        let expected = -64.0 / 127.0;
        let mut out = [0.0f32; 8];
        first.read(&mut out);
        assert!(out.iter().all(|&x| (x - expected).abs() < 1e-6));
        second.read(&mut out);
        assert!(out.iter().all(|&x| (x - expected).abs() < 1e-6));
        assert!(first.is_closed());
        assert_eq!(log.lock().closed, 1);
    }
}

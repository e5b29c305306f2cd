//! Worker side and realtime side of a callback-driven device.
//!
//! The hardware callback owns a [`PlaybackCallback`] or [`CaptureCallback`]; the worker
//! owns the matching [`RingPlaybackIo`] or [`RingCaptureIo`]. They share a
//! [`DeviceRing`] and a [`BufferSemaphore`]. The callback posts once per logical buffer
//! it finishes, the worker waits for a token before each buffer it moves.
//!
//! Playback starts with `N - 1` tokens for an `N` buffer ring, so a worker holding a
//! token always finds a whole buffer of free space. Capture starts with none.

use crate::device::AudioDevice;
use crate::driver::{DeviceIo, OpenRequest};
use crate::error::{Result, SonicPortError};
use crate::ring::{DeviceRing, RingConsumer, RingProducer, RingStats};
use crate::semaphore::BufferSemaphore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Something producing or consuming audio on its own clock.
pub trait HardwareStream: Send {
    /// Stop callbacks. No callback runs once this returns.
    fn stop(&mut self);
}

/// Raised from an error callback, reported by the next worker call.
#[derive(Clone)]
pub struct ErrorFlag {
    raised: Arc<AtomicBool>,
    semaphore: BufferSemaphore,
}

impl ErrorFlag {
    /// Flag the device and wake the worker if it is waiting.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.semaphore.post();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

/// Realtime half of a playback device.
pub struct PlaybackCallback {
    consumer: RingConsumer,
    semaphore: BufferSemaphore,
    posted: u64,
}

impl PlaybackCallback {
    /// Fill the hardware buffer. Never blocks; missing data plays as silence.
    pub fn render(&mut self, out: &mut [u8]) {
        self.consumer.read_into(out);
        let done = self.consumer.completed_buffers();
        while self.posted < done {
            self.semaphore.post();
            self.posted += 1;
        }
    }
}

/// Realtime half of a capture device.
pub struct CaptureCallback {
    producer: RingProducer,
    semaphore: BufferSemaphore,
    posted: u64,
}

impl CaptureCallback {
    /// Store recorded bytes. Never blocks; bytes that do not fit are dropped.
    pub fn capture(&mut self, input: &[u8]) {
        self.producer.write(input);
        let done = self.producer.completed_buffers();
        while self.posted < done {
            self.semaphore.post();
            self.posted += 1;
        }
    }
}

fn take_error(raised: &AtomicBool) -> Result<()> {
    if raised.load(Ordering::Acquire) {
        return Err(SonicPortError::AudioDevice(
            "Hardware stream reported an error".into(),
        ));
    }
    Ok(())
}

/// Worker half of a playback device.
pub struct RingPlaybackIo {
    producer: RingProducer,
    semaphore: BufferSemaphore,
    raised: Arc<AtomicBool>,
    poll: Duration,
    stream: Option<Box<dyn HardwareStream>>,
}

impl RingPlaybackIo {
    /// Attach the stream that [`close`](DeviceIo::close) has to stop.
    pub fn attach(&mut self, stream: Box<dyn HardwareStream>) {
        self.stream = Some(stream);
    }
}

impl DeviceIo for RingPlaybackIo {
    fn wait(&mut self, device: &AudioDevice) -> Result<()> {
        self.semaphore.wait_unless(device.shutdown_flag(), self.poll);
        take_error(&self.raised)
    }

    fn play(&mut self, buf: &[u8]) -> Result<()> {
        take_error(&self.raised)?;
        self.producer.write(buf);
        Ok(())
    }

    fn ring_stats(&self) -> Option<RingStats> {
        Some(self.producer.ring().stats())
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

/// Worker half of a capture device.
pub struct RingCaptureIo {
    consumer: RingConsumer,
    semaphore: BufferSemaphore,
    raised: Arc<AtomicBool>,
    poll: Duration,
    stream: Option<Box<dyn HardwareStream>>,
}

impl RingCaptureIo {
    pub fn attach(&mut self, stream: Box<dyn HardwareStream>) {
        self.stream = Some(stream);
    }
}

impl DeviceIo for RingCaptureIo {
    fn wait(&mut self, device: &AudioDevice) -> Result<()> {
        self.semaphore.wait_unless(device.shutdown_flag(), self.poll);
        take_error(&self.raised)
    }

    fn play(&mut self, _buf: &[u8]) -> Result<()> {
        Err(SonicPortError::Driver(
            "Cannot play on a capture device".into(),
        ))
    }

    fn record(&mut self, buf: &mut [u8]) -> Result<usize> {
        take_error(&self.raised)?;
        let count = buf.len().min(self.consumer.available());
        Ok(self.consumer.read_into(&mut buf[..count]))
    }

    fn flush_recording(&mut self) {
        // Tokens first: a buffer completing in between keeps data for its token.
        self.semaphore.drain();
        self.consumer.discard();
    }

    fn ring_stats(&self) -> Option<RingStats> {
        Some(self.consumer.ring().stats())
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

/// Ring, semaphore and error flag for a playback device, split between its two sides.
pub fn playback_ring(
    request: &OpenRequest,
) -> Result<(RingPlaybackIo, PlaybackCallback, ErrorFlag)> {
    let count = request.buffer_count;
    let (producer, consumer) = DeviceRing::new(
        request.buffer_size(),
        count,
        request.spec.silence_value(),
    )?;
    let semaphore = BufferSemaphore::new(count.saturating_sub(1), count);
    let raised = Arc::new(AtomicBool::new(false));
    Ok((
        RingPlaybackIo {
            producer,
            semaphore: semaphore.clone(),
            raised: raised.clone(),
            poll: request.poll_interval,
            stream: None,
        },
        PlaybackCallback {
            consumer,
            semaphore: semaphore.clone(),
            posted: 0,
        },
        ErrorFlag { raised, semaphore },
    ))
}

/// Ring, semaphore and error flag for a capture device.
pub fn capture_ring(request: &OpenRequest) -> Result<(RingCaptureIo, CaptureCallback, ErrorFlag)> {
    let count = request.buffer_count;
    let (producer, consumer) = DeviceRing::new(
        request.buffer_size(),
        count,
        request.spec.silence_value(),
    )?;
    let semaphore = BufferSemaphore::new(0, count);
    let raised = Arc::new(AtomicBool::new(false));
    Ok((
        RingCaptureIo {
            consumer,
            semaphore: semaphore.clone(),
            raised: raised.clone(),
            poll: request.poll_interval,
            stream: None,
        },
        CaptureCallback {
            producer,
            semaphore: semaphore.clone(),
            posted: 0,
        },
        ErrorFlag { raised, semaphore },
    ))
}

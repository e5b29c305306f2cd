//! Application-facing streams bound to an open device.
//!
//! Each stream is a `ringbuf` SPSC queue of native `f32` samples, interleaved at the
//! device's channel count and rate. The application holds one end; the device worker
//! holds the other and mixes or fans out through it.

use crate::device::DeviceId;
use crate::format::AudioSpec;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Queue of samples headed for a playback device.
pub struct PlaybackStream {
    id: StreamId,
    device: DeviceId,
    spec: AudioSpec,
    producer: HeapProd<f32>,
    closed: Arc<AtomicBool>,
}

impl PlaybackStream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Device format. Samples written here are `f32` with this channel count and rate.
    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    /// Queue interleaved samples. Returns how many fit.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.producer.push_slice(samples)
    }

    /// Samples queued and not yet picked up by the device.
    pub fn queued(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn free(&self) -> usize {
        self.producer.vacant_len()
    }

    /// True once the device was closed or disconnected from the engine side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Queue of samples recorded from a capture device.
pub struct CaptureStream {
    id: StreamId,
    device: DeviceId,
    spec: AudioSpec,
    consumer: HeapCons<f32>,
    closed: Arc<AtomicBool>,
}

impl CaptureStream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    /// Pop recorded samples into `out`. Returns how many were read.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }

    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Throw away everything recorded so far.
    pub fn clear(&mut self) -> usize {
        self.consumer.clear()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Worker end of a [`PlaybackStream`].
pub(crate) struct PlaybackSource {
    pub(crate) id: StreamId,
    consumer: HeapCons<f32>,
    closed: Arc<AtomicBool>,
}

impl PlaybackSource {
    /// Fill `out` from the queue, zero-padding whatever is missing. Returns real samples.
    pub(crate) fn pull(&mut self, out: &mut [f32]) -> usize {
        let got = self.consumer.pop_slice(out);
        out[got..].fill(0.0);
        got
    }

    /// Closed by either side and fully drained.
    pub(crate) fn is_finished(&self) -> bool {
        self.closed.load(Ordering::Acquire) && self.consumer.is_empty()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Worker end of a [`CaptureStream`].
pub(crate) struct CaptureSink {
    pub(crate) id: StreamId,
    producer: HeapProd<f32>,
    closed: Arc<AtomicBool>,
}

impl CaptureSink {
    /// Push samples; returns how many had to be dropped because the app fell behind.
    pub(crate) fn push(&mut self, samples: &[f32]) -> usize {
        samples.len() - self.producer.push_slice(samples)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub(crate) fn playback_pair(
    id: StreamId,
    device: DeviceId,
    spec: AudioSpec,
    capacity: usize,
) -> (PlaybackStream, PlaybackSource) {
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
    let closed = Arc::new(AtomicBool::new(false));
    (
        PlaybackStream {
            id,
            device,
            spec,
            producer,
            closed: closed.clone(),
        },
        PlaybackSource {
            id,
            consumer,
            closed,
        },
    )
}

pub(crate) fn capture_pair(
    id: StreamId,
    device: DeviceId,
    spec: AudioSpec,
    capacity: usize,
) -> (CaptureStream, CaptureSink) {
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
    let closed = Arc::new(AtomicBool::new(false));
    (
        CaptureStream {
            id,
            device,
            spec,
            consumer,
            closed: closed.clone(),
        },
        CaptureSink {
            id,
            producer,
            closed,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_pull_pads_with_zero() {
        let (mut stream, mut source) =
            playback_pair(StreamId(1), DeviceId::new(1), AudioSpec::default(), 8);
        assert_eq!(stream.write(&[0.5, -0.5, 0.25]), 3);
        assert_eq!(stream.queued(), 3);

        let mut out = [1.0f32; 5];
        assert_eq!(source.pull(&mut out), 3);
        assert_eq!(out, [0.5, -0.5, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_playback_write_is_bounded() {
        let (mut stream, _source) =
            playback_pair(StreamId(2), DeviceId::new(1), AudioSpec::default(), 4);
        assert_eq!(stream.write(&[0.0; 10]), 4);
        assert_eq!(stream.free(), 0);
    }

    #[test]
    fn test_dropped_stream_finishes_after_drain() {
        let (mut stream, mut source) =
            playback_pair(StreamId(3), DeviceId::new(1), AudioSpec::default(), 4);
        stream.write(&[0.1, 0.2]);
        drop(stream);
        assert!(!source.is_finished());
        let mut out = [0.0f32; 4];
        source.pull(&mut out);
        assert!(source.is_finished());
    }

    #[test]
    fn test_closed_playback_rejects_writes() {
        let (mut stream, source) =
            playback_pair(StreamId(4), DeviceId::new(1), AudioSpec::default(), 4);
        source.close();
        assert!(stream.is_closed());
        assert_eq!(stream.write(&[0.1]), 0);
    }

    #[test]
    fn test_capture_sink_reports_drops() {
        let (mut stream, mut sink) =
            capture_pair(StreamId(5), DeviceId::new(2), AudioSpec::default(), 4);
        assert_eq!(sink.push(&[0.1, 0.2, 0.3]), 0);
        assert_eq!(sink.push(&[0.4, 0.5, 0.6]), 2);

        let mut out = [0.0f32; 8];
        assert_eq!(stream.read(&mut out), 4);
        assert_eq!(&out[..4], &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(stream.available(), 0);
    }
}

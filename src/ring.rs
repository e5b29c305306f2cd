//! Lock-free byte ring shared by a realtime callback and a device worker thread.
//!
//! The ring holds `buffer_count` logical buffers of `buffer_size` bytes. Exactly one
//! [`RingProducer`] and one [`RingConsumer`] exist per ring, and each side owns its
//! position counter:
//!
//! - positions are monotonically increasing byte counts, never wrapped
//! - the producer publishes with `Release` after copying data in; the consumer
//!   observes with `Acquire` before copying data out (and vice versa for free space)
//! - `0 <= produced - consumed <= capacity` always holds
//!
//! For playback the worker produces and the hardware callback consumes; for capture it
//! is the other way around. Neither side blocks, allocates or logs. Shortfalls are
//! recorded in [`RingStats`] for the worker to report.

use crate::error::{Result, SonicPortError};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of recoverable shortfalls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Reads that could not be fully satisfied.
    pub underruns: u64,
    /// Bytes replaced with silence because of underruns.
    pub underrun_bytes: u64,
    /// Writes that did not fit.
    pub overruns: u64,
    /// Bytes dropped because of overruns.
    pub overrun_bytes: u64,
}

pub struct DeviceRing {
    data: Box<[UnsafeCell<u8>]>,
    buffer_size: usize,
    silence: u8,
    produced: AtomicU64,
    consumed: AtomicU64,
    underruns: AtomicU64,
    underrun_bytes: AtomicU64,
    overruns: AtomicU64,
    overrun_bytes: AtomicU64,
}

// SAFETY: the byte arena is only touched through the producer and consumer handles.
// There is one of each, they never copy into overlapping regions, and region ownership
// is handed over through the Release/Acquire pair on the position counters.
unsafe impl Sync for DeviceRing {}

impl DeviceRing {
    /// Allocate a ring and split it into its two halves.
    ///
    /// The ring starts empty; its contents are initialised to `silence`.
    pub fn new(
        buffer_size: usize,
        buffer_count: usize,
        silence: u8,
    ) -> Result<(RingProducer, RingConsumer)> {
        if buffer_size == 0 || buffer_count == 0 {
            return Err(SonicPortError::RingBuffer(format!(
                "Ring needs a non-empty buffer size and count, got {} x {}",
                buffer_count, buffer_size
            )));
        }
        let capacity = buffer_size.checked_mul(buffer_count).ok_or_else(|| {
            SonicPortError::RingBuffer(format!(
                "Ring of {} x {} bytes is too large",
                buffer_count, buffer_size
            ))
        })?;

        let data = (0..capacity).map(|_| UnsafeCell::new(silence)).collect();
        let ring = Arc::new(DeviceRing {
            data,
            buffer_size,
            silence,
            produced: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            underrun_bytes: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            overrun_bytes: AtomicU64::new(0),
        });
        Ok((
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        ))
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn buffer_count(&self) -> usize {
        self.data.len() / self.buffer_size
    }

    pub fn silence(&self) -> u8 {
        self.silence
    }

    /// Bytes written but not yet read.
    pub fn buffered(&self) -> usize {
        let consumed = self.consumed.load(Ordering::Acquire);
        let produced = self.produced.load(Ordering::Acquire);
        produced.saturating_sub(consumed) as usize
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            underrun_bytes: self.underrun_bytes.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            overrun_bytes: self.overrun_bytes.load(Ordering::Relaxed),
        }
    }

    fn base(&self) -> *mut u8 {
        // UnsafeCell<u8> has the same layout as u8.
        self.data.as_ptr() as *mut u8
    }

    /// Copy `src` into the arena starting at byte `pos`, wrapping at the end.
    ///
    /// # Safety
    /// Caller must own `[pos, pos + src.len())` and `src.len() <= capacity`.
    unsafe fn copy_in(&self, pos: u64, src: &[u8]) {
        let capacity = self.capacity();
        let start = (pos % capacity as u64) as usize;
        let first = src.len().min(capacity - start);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base().add(start), first);
            std::ptr::copy_nonoverlapping(src[first..].as_ptr(), self.base(), src.len() - first);
        }
    }

    /// Copy out of the arena starting at byte `pos` into `dst`, wrapping at the end.
    ///
    /// # Safety
    /// Caller must own `[pos, pos + dst.len())` and `dst.len() <= capacity`.
    unsafe fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let capacity = self.capacity();
        let start = (pos % capacity as u64) as usize;
        let first = dst.len().min(capacity - start);
        let rest = dst.len() - first;
        unsafe {
            std::ptr::copy_nonoverlapping(self.base().add(start), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(self.base(), dst[first..].as_mut_ptr(), rest);
        }
    }
}

/// Writing half of a [`DeviceRing`].
pub struct RingProducer {
    ring: Arc<DeviceRing>,
}

impl RingProducer {
    pub fn ring(&self) -> &DeviceRing {
        &self.ring
    }

    /// Total bytes ever written.
    pub fn position(&self) -> u64 {
        self.ring.produced.load(Ordering::Relaxed)
    }

    /// Number of whole logical buffers written so far.
    pub fn completed_buffers(&self) -> u64 {
        self.position() / self.ring.buffer_size as u64
    }

    /// Bytes that can be written without dropping anything.
    pub fn free(&self) -> usize {
        self.ring.capacity() - self.ring.buffered()
    }

    /// Append as much of `data` as fits. Bytes beyond the free space are dropped and
    /// counted as an overrun. Returns the number of bytes stored.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let ring = &*self.ring;
        let head = ring.produced.load(Ordering::Relaxed);
        let tail = ring.consumed.load(Ordering::Acquire);
        let free = ring.capacity() - (head - tail) as usize;
        let count = data.len().min(free);

        if count < data.len() {
            ring.overruns.fetch_add(1, Ordering::Relaxed);
            ring.overrun_bytes
                .fetch_add((data.len() - count) as u64, Ordering::Relaxed);
        }
        if count == 0 {
            return 0;
        }

        // SAFETY: [head, head + count) is free space, which only the producer touches
        // until the Release store below hands it over.
        unsafe { ring.copy_in(head, &data[..count]) };
        ring.produced.store(head + count as u64, Ordering::Release);
        count
    }
}

/// Reading half of a [`DeviceRing`].
pub struct RingConsumer {
    ring: Arc<DeviceRing>,
}

impl RingConsumer {
    pub fn ring(&self) -> &DeviceRing {
        &self.ring
    }

    /// Total bytes ever read.
    pub fn position(&self) -> u64 {
        self.ring.consumed.load(Ordering::Relaxed)
    }

    /// Number of whole logical buffers read so far.
    pub fn completed_buffers(&self) -> u64 {
        self.position() / self.ring.buffer_size as u64
    }

    /// Bytes ready to be read.
    pub fn available(&self) -> usize {
        self.ring.buffered()
    }

    /// Fill `out` from the ring. Whatever the ring cannot supply is set to the silence
    /// value and counted as an underrun. Returns the number of real bytes copied.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let ring = &*self.ring;
        let tail = ring.consumed.load(Ordering::Relaxed);
        let head = ring.produced.load(Ordering::Acquire);
        let available = (head - tail) as usize;
        let count = out.len().min(available);

        if count > 0 {
            // SAFETY: [tail, tail + count) was published by the producer and is not
            // written again until the Release store below frees it.
            unsafe { ring.copy_out(tail, &mut out[..count]) };
            ring.consumed.store(tail + count as u64, Ordering::Release);
        }
        if count < out.len() {
            out[count..].fill(ring.silence);
            ring.underruns.fetch_add(1, Ordering::Relaxed);
            ring.underrun_bytes
                .fetch_add((out.len() - count) as u64, Ordering::Relaxed);
        }
        count
    }

    /// Drop everything currently buffered. Returns the number of bytes discarded.
    pub fn discard(&mut self) -> usize {
        let ring = &*self.ring;
        let tail = ring.consumed.load(Ordering::Relaxed);
        let head = ring.produced.load(Ordering::Acquire);
        ring.consumed.store(head, Ordering::Release);
        (head - tail) as usize
    }
}

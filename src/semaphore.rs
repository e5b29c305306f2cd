//! Counting semaphore used for backpressure between a realtime callback and a worker.
//!
//! Tokens are unit messages in a bounded crossbeam channel. Posting is a `try_send`,
//! so the realtime side never blocks; a post onto a full semaphore is dropped. Waiting
//! always takes a timeout so the worker can keep checking its shutdown flag.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Clone)]
pub struct BufferSemaphore {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl BufferSemaphore {
    /// A semaphore holding at most `max` tokens, starting with `initial` of them.
    pub fn new(initial: usize, max: usize) -> Self {
        let (tx, rx) = bounded(max.max(1));
        for _ in 0..initial.min(max) {
            let _ = tx.try_send(());
        }
        Self { tx, rx }
    }

    /// Add a token. Never blocks; returns false when the semaphore was already full.
    ///
    /// The count is capped at `max`: a post onto a full semaphore is dropped, so a
    /// waiter never sees more tokens than there are buffers in the ring. Callable from
    /// a realtime callback, so a dropped post is only reported through the return value.
    pub fn post(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    /// Take a token, waiting up to `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    pub fn try_wait(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Wait for a token in `poll`-sized steps until one arrives or `shutdown` is set.
    pub fn wait_unless(&self, shutdown: &AtomicBool, poll: Duration) -> bool {
        while !shutdown.load(Ordering::Acquire) {
            if self.wait_timeout(poll) {
                return true;
            }
        }
        false
    }

    /// Tokens currently available.
    pub fn value(&self) -> usize {
        self.rx.len()
    }

    /// Drop every pending token.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_initial_tokens() {
        let playback = BufferSemaphore::new(1, 2);
        assert_eq!(playback.value(), 1);
        assert!(playback.try_wait());
        assert!(!playback.try_wait());

        let capture = BufferSemaphore::new(0, 2);
        assert_eq!(capture.value(), 0);
    }

    #[test]
    fn test_post_never_blocks_when_full() {
        let sem = BufferSemaphore::new(2, 2);
        // Capped at max: the extra post is dropped, not queued.
        assert!(!sem.post());
        assert!(!sem.post());
        assert_eq!(sem.value(), 2);
        assert_eq!(sem.drain(), 2);
        assert!(sem.post());
    }

    #[test]
    fn test_wait_times_out() {
        let sem = BufferSemaphore::new(0, 3);
        let start = Instant::now();
        assert!(!sem.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_post_wakes_waiter() {
        let sem = BufferSemaphore::new(0, 3);
        let poster = sem.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            poster.post();
        });
        assert!(sem.wait_timeout(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_unless_observes_shutdown() {
        let sem = BufferSemaphore::new(0, 1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::Release);
        });
        assert!(!sem.wait_unless(&shutdown, Duration::from_millis(5)));
        handle.join().unwrap();
    }
}

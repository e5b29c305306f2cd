//! Compiled-in backends.
//!
//! `dummy` and `disk` are timed by the worker itself; `callback` and the optional
//! `cpal` backend are driven by a realtime callback and talk to the worker through
//! [`ring_io`].

pub mod callback;
#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod disk;
pub mod dummy;
pub mod ring_io;

use crate::driver::DriverBootstrap;
use crate::format::{AudioFormat, AudioSpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Every backend in preference order.
pub const BOOTSTRAPS: &[DriverBootstrap] = &[
    #[cfg(feature = "cpal")]
    cpal_backend::BOOTSTRAP,
    callback::BOOTSTRAP,
    disk::BOOTSTRAP,
    dummy::BOOTSTRAP,
];

/// Advertised by endpoints that accept any spec. Opening upgrades the device default
/// with the request, so the lowest spec lets the request decide.
pub(crate) const FLEXIBLE_SPEC: AudioSpec = AudioSpec::new(AudioFormat::U8, 1, 8000);

/// Longest single sleep of a [`Pacer`], so shutdown is noticed promptly.
const PACER_SLICE: Duration = Duration::from_millis(10);

/// Fixed-rate clock for backends without hardware timing.
pub(crate) struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    /// Tick every `period` of audio, sped up by `timescale`.
    pub(crate) fn new(period: Duration, timescale: f64) -> Self {
        let period = period.div_f64(timescale);
        Self {
            period,
            next: Instant::now(),
        }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next tick or until `shutdown` is set.
    pub(crate) fn wait(&mut self, shutdown: &AtomicBool) {
        self.next += self.period;
        let now = Instant::now();
        if self.next <= now {
            // Fell behind; restart the schedule instead of bursting to catch up.
            self.next = now;
            return;
        }
        while !shutdown.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= self.next {
                break;
            }
            std::thread::sleep((self.next - now).min(PACER_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_timescale() {
        let pacer = Pacer::new(Duration::from_millis(40), 4.0);
        assert_eq!(pacer.period(), Duration::from_millis(10));
    }

    #[test]
    fn test_pacer_ticks_and_stops() {
        let shutdown = AtomicBool::new(false);
        let mut pacer = Pacer::new(Duration::from_millis(5), 1.0);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait(&shutdown);
        }
        assert!(start.elapsed() >= Duration::from_millis(15));

        let mut slow = Pacer::new(Duration::from_secs(60), 1.0);
        shutdown.store(true, Ordering::Release);
        let start = Instant::now();
        slow.wait(&shutdown);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

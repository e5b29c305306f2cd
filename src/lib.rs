//! SonicPort: a realtime-safe audio device layer.
//!
//! # Architecture
//!
//! ```text
//!  app threads            device worker (one per open device)        OS / backend
//!  ------------           -----------------------------------        ------------
//!  PlaybackStream --f32--> mix (Silence | CopyOne | Mix)
//!                          f32 -> device format (Converter)  --play--> DeviceRing --> callback
//!  CaptureStream <--f32--  device format -> f32 (Converter) <-record-- DeviceRing <-- callback
//! ```
//!
//! - [`convert`] turns PCM between S8/U8/S16/S32 and `f32`, with scalar, SSE2 and
//!   NEON implementations picked once per process.
//! - [`ring`] and [`semaphore`] are the lock-free handoff between a realtime callback
//!   and its worker: the callback never blocks, allocates or logs.
//! - [`driver`] is the contract every backend implements; [`thread`] is the single
//!   worker loop that drives it.
//! - [`engine::AudioEngine`] ties it together: pick a backend, enumerate devices,
//!   bind streams, report [`events::AudioEvent`]s.
//!
//! ```no_run
//! use sonicport::{AudioEngine, EngineConfig};
//!
//! let engine = AudioEngine::new(EngineConfig::from_env()?)?;
//! if let Some(id) = engine.default_device(false) {
//!     let mut stream = engine.open_playback(id, None)?;
//!     stream.write(&vec![0.0; stream.spec().channels as usize * 480]);
//! }
//! # Ok::<(), sonicport::SonicPortError>(())
//! ```

pub mod backends;
pub mod config;
pub mod convert;
pub mod device;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod ring;
pub mod semaphore;
pub mod stream;
pub mod thread;

pub use config::{EngineConfig, Hints};
pub use convert::{Converter, ConverterTier};
pub use device::{AudioDevice, DeviceId, DeviceInfo, DeviceRegistry};
pub use driver::{AudioDriver, DeviceIo, DriverBootstrap, DriverRegistry, OpenRequest, OpenedDevice};
pub use engine::AudioEngine;
pub use error::{Result, SonicPortError};
pub use events::AudioEvent;
pub use format::{AudioFormat, AudioSpec};
pub use ring::{DeviceRing, RingStats};
pub use semaphore::BufferSemaphore;
pub use stream::{CaptureStream, PlaybackStream, StreamId};

//! Audio endpoints and the registry that tracks them.
//!
//! Drivers report endpoints through [`DeviceRegistry::add_device`] while detecting
//! devices or from their own hotplug threads. The registry is owned by the engine
//! and guarded by its own `RwLock`; each [`AudioDevice`] carries a separate lock for
//! its open session so opening one device never blocks enumeration.

use crate::events::AudioEvent;
use crate::format::AudioSpec;
use crate::thread::DeviceSession;
use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Engine-assigned identifier of an endpoint. Never reused within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Driver-private value identifying the endpoint on the driver's side.
pub type DeviceHandle = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub is_capture: bool,
    /// The endpoint's preferred format.
    pub default_spec: AudioSpec,
    pub handle: DeviceHandle,
}

/// One endpoint, opened or not.
pub struct AudioDevice {
    info: DeviceInfo,
    shutdown: AtomicBool,
    disconnected: AtomicBool,
    paused: AtomicBool,
    events: Sender<AudioEvent>,
    session: Mutex<Option<DeviceSession>>,
}

impl AudioDevice {
    fn new(info: DeviceInfo, events: Sender<AudioEvent>) -> Self {
        Self {
            info,
            shutdown: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            events,
            session: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn id(&self) -> DeviceId {
        self.info.id
    }

    pub fn is_capture(&self) -> bool {
        self.info.is_capture
    }

    pub fn handle(&self) -> DeviceHandle {
        self.info.handle
    }

    /// The shutdown flag every blocking wait in a driver must poll.
    pub fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Mark the device as lost. Only the first call reports it; returns whether this
    /// call was the one.
    ///
    /// This is the single way a device becomes disconnected, whether from a worker
    /// thread that hit a fatal error or from a driver's own notification thread.
    pub fn disconnected(&self) -> bool {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::warn!(
            "Audio device {} ({}) disconnected",
            self.info.id,
            self.info.name
        );
        let _ = self.events.send(AudioEvent::DeviceDisconnected {
            device: self.info.id,
        });
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, Option<DeviceSession>> {
        self.session.lock()
    }

    /// Clear per-session flags before a new worker starts. A reopened device can
    /// report a fresh disconnect.
    pub(crate) fn reset_for_open(&self) {
        self.shutdown.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.disconnected.store(false, Ordering::Release);
    }

    pub(crate) fn events(&self) -> &Sender<AudioEvent> {
        &self.events
    }
}

impl fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDevice")
            .field("info", &self.info)
            .field("shutdown", &self.is_shutdown())
            .field("disconnected", &self.is_disconnected())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Default endpoints reported by a driver after detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultDevices {
    pub playback: Option<DeviceId>,
    pub capture: Option<DeviceId>,
}

/// All known endpoints of one engine.
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<DeviceId, Arc<AudioDevice>>>,
    defaults: RwLock<DefaultDevices>,
    next_id: AtomicU32,
    events: Sender<AudioEvent>,
}

impl DeviceRegistry {
    pub fn new(events: Sender<AudioEvent>) -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            defaults: RwLock::new(DefaultDevices::default()),
            next_id: AtomicU32::new(1),
            events,
        }
    }

    /// Register a newly discovered endpoint and announce it.
    pub fn add_device(
        &self,
        is_capture: bool,
        name: impl Into<String>,
        default_spec: AudioSpec,
        handle: DeviceHandle,
    ) -> DeviceId {
        let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = DeviceInfo {
            id,
            name: name.into(),
            is_capture,
            default_spec,
            handle,
        };
        log::info!(
            "Found {} device {}: {} ({} ch, {} Hz, {})",
            if is_capture { "capture" } else { "playback" },
            id,
            info.name,
            default_spec.channels,
            default_spec.freq,
            default_spec.format
        );
        let device = Arc::new(AudioDevice::new(info, self.events.clone()));
        self.devices.write().insert(id, device);
        let _ = self
            .events
            .send(AudioEvent::DeviceAdded { device: id, is_capture });
        id
    }

    /// Forget an endpoint that went away. An open device is marked disconnected first.
    pub fn remove_device(&self, id: DeviceId) -> Option<Arc<AudioDevice>> {
        let device = self.devices.write().remove(&id)?;
        device.disconnected();
        {
            let mut defaults = self.defaults.write();
            if defaults.playback == Some(id) {
                defaults.playback = None;
            }
            if defaults.capture == Some(id) {
                defaults.capture = None;
            }
        }
        let _ = self.events.send(AudioEvent::DeviceRemoved {
            device: id,
            is_capture: device.is_capture(),
        });
        Some(device)
    }

    pub fn find(&self, id: DeviceId) -> Option<Arc<AudioDevice>> {
        self.devices.read().get(&id).cloned()
    }

    pub fn find_by_handle(&self, is_capture: bool, handle: DeviceHandle) -> Option<Arc<AudioDevice>> {
        self.devices
            .read()
            .values()
            .find(|d| d.is_capture() == is_capture && d.handle() == handle)
            .cloned()
    }

    pub fn list(&self, is_capture: bool) -> Vec<DeviceInfo> {
        self.devices
            .read()
            .values()
            .filter(|d| d.is_capture() == is_capture)
            .map(|d| d.info().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<AudioDevice>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_device(&self, is_capture: bool) -> Option<DeviceId> {
        let defaults = self.defaults.read();
        if is_capture {
            defaults.capture
        } else {
            defaults.playback
        }
    }

    /// Point the default at another endpoint; announces the change if there was one.
    pub fn set_default(&self, is_capture: bool, id: DeviceId) -> bool {
        if self.find(id).is_none_or(|d| d.is_capture() != is_capture) {
            return false;
        }
        let changed = {
            let mut defaults = self.defaults.write();
            let slot = if is_capture {
                &mut defaults.capture
            } else {
                &mut defaults.playback
            };
            slot.replace(id) != Some(id)
        };
        if changed {
            log::info!(
                "Default {} device is now {}",
                if is_capture { "capture" } else { "playback" },
                id
            );
            let _ = self.events.send(AudioEvent::DefaultDeviceChanged {
                device: id,
                is_capture,
            });
        }
        changed
    }

    pub(crate) fn apply_defaults(&self, defaults: DefaultDevices) {
        if let Some(id) = defaults.playback {
            self.set_default(false, id);
        }
        if let Some(id) = defaults.capture {
            self.set_default(true, id);
        }
    }

    /// Report a lost device. Returns false if unknown or already reported.
    pub fn device_disconnected(&self, id: DeviceId) -> bool {
        self.find(id).is_some_and(|d| d.disconnected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;
    use crossbeam_channel::unbounded;

    fn registry() -> (DeviceRegistry, crossbeam_channel::Receiver<AudioEvent>) {
        let (tx, rx) = unbounded();
        (DeviceRegistry::new(tx), rx)
    }

    #[test]
    fn test_add_and_find() {
        let (registry, events) = registry();
        let spec = AudioSpec::new(AudioFormat::S16LE, 2, 44100);
        let out = registry.add_device(false, "Speakers", spec, 7);
        let mic = registry.add_device(true, "Mic", spec, 7);
        assert_ne!(out, mic);

        assert_eq!(registry.list(false).len(), 1);
        assert_eq!(registry.list(true)[0].name, "Mic");
        assert_eq!(registry.find_by_handle(true, 7).unwrap().id(), mic);
        assert_eq!(registry.find(out).unwrap().info().default_spec, spec);

        let added: Vec<_> = events.try_iter().collect();
        assert_eq!(added.len(), 2);
        assert!(added.iter().all(|e| e.is_hotplug_event()));
    }

    #[test]
    fn test_disconnect_is_reported_once() {
        let (registry, events) = registry();
        let id = registry.add_device(false, "USB", AudioSpec::default(), 1);
        let _ = events.try_iter().count();

        assert!(registry.device_disconnected(id));
        assert!(!registry.device_disconnected(id));
        assert!(registry.find(id).unwrap().is_disconnected());

        let reported: Vec<_> = events.try_iter().collect();
        assert_eq!(reported, vec![AudioEvent::DeviceDisconnected { device: id }]);
    }

    #[test]
    fn test_remove_clears_default() {
        let (registry, events) = registry();
        let id = registry.add_device(false, "HDMI", AudioSpec::default(), 2);
        assert!(registry.set_default(false, id));
        assert!(!registry.set_default(false, id));
        assert!(!registry.set_default(true, id));
        assert_eq!(registry.default_device(false), Some(id));

        let removed = registry.remove_device(id).unwrap();
        assert!(removed.is_disconnected());
        assert_eq!(registry.default_device(false), None);
        assert!(registry.find(id).is_none());
        assert!(registry.remove_device(id).is_none());

        let kinds: Vec<_> = events.try_iter().collect();
        assert!(kinds.contains(&AudioEvent::DeviceRemoved {
            device: id,
            is_capture: false
        }));
    }

    #[test]
    fn test_device_flags() {
        let (registry, _events) = registry();
        let device = registry
            .find(registry.add_device(false, "Out", AudioSpec::default(), 0))
            .unwrap();
        device.request_shutdown();
        device.set_paused(true);
        assert!(device.disconnected());
        assert!(device.is_shutdown() && device.is_paused());
        device.reset_for_open();
        assert!(!device.is_shutdown() && !device.is_paused());
        assert!(!device.is_disconnected());
        assert!(!device.is_open());

        // The one-shot report is armed again.
        assert!(device.disconnected());
        assert!(!device.disconnected());
    }
}

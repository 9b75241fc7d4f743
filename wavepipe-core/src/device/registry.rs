//! Device registry: shared devices looked up by `transport:target` key
//!
//! Devices are shared hardware; channels are the logical streams on top.
//! The registry owns the mapping between the two with explicit,
//! use-counted lifecycle (no constructor/destructor side effects):
//!
//! - [`DeviceRegistry::attach`] creates the device lazily on first use of
//!   a key and increments its use count.
//! - [`DeviceRegistry::detach`] decrements it and closes + destroys the
//!   device when the last channel leaves.
//!
//! Keys look like `alsa:hw:0` or `udp:239.1.1.1:5004` — the transport
//! type up to the *first* colon selects a registered factory, the rest is
//! the transport's own target syntax.
//!
//! The registry itself is a plain mutex-protected map, so pipelines may
//! be assembled from any thread before the driving loop starts; steady-
//! state device mutation stays on the single driving thread.

use crate::device::channel::{Channel, ChannelCore};
use crate::device::multiplexer::DeviceMux;
use crate::device::transport::{OpenMode, TransportFactory};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use wavepipe_common::params::PARAMS;

/// Parsed `transport:target` device key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKey {
    /// Transport type name (selects the factory)
    pub transport: String,

    /// Transport-specific address, may itself contain colons
    pub target: String,
}

impl DeviceKey {
    /// Split on the first colon
    pub fn parse(key: &str) -> Result<DeviceKey> {
        match key.split_once(':') {
            Some((transport, target)) if !transport.is_empty() && !target.is_empty() => {
                Ok(DeviceKey {
                    transport: transport.to_string(),
                    target: target.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "device key {:?} is not of the form transport:target",
                key
            ))),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.target)
    }
}

struct DeviceEntry {
    device: Arc<Mutex<DeviceMux>>,
    use_count: usize,
}

struct RegistryInner {
    factories: HashMap<String, TransportFactory>,
    devices: HashMap<String, DeviceEntry>,
}

/// Owner of all shared devices in a pipeline
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            inner: Mutex::new(RegistryInner {
                factories: HashMap::new(),
                devices: HashMap::new(),
            }),
        }
    }

    /// Register the factory for a transport type name
    pub fn register_transport(&self, kind: impl Into<String>, factory: TransportFactory) {
        let kind = kind.into();
        debug!(transport = %kind, "transport registered");
        self.inner.lock().unwrap().factories.insert(kind, factory);
    }

    /// Attach a new channel to the device named by `key`
    ///
    /// The device is created and opened on first use; later attaches
    /// widen its open mode if they need the other direction.
    pub fn attach(&self, key: &str, mode: OpenMode) -> Result<Channel> {
        let parsed = DeviceKey::parse(key)?;
        let mut inner = self.inner.lock().unwrap();

        if !inner.devices.contains_key(key) {
            let factory = inner
                .factories
                .get(&parsed.transport)
                .ok_or_else(|| Error::UnknownTransport(parsed.transport.clone()))?;
            let transport = factory(&parsed.target)?;
            let device = Arc::new(Mutex::new(DeviceMux::new(parsed.clone(), transport)));
            inner.devices.insert(key.to_string(), DeviceEntry { device, use_count: 0 });
            debug!(device = %key, "device created");
        }

        let entry = inner.devices.get_mut(key).expect("just inserted");
        let device = Arc::clone(&entry.device);

        let attached = (|| -> Result<(Arc<Mutex<ChannelCore>>, usize)> {
            let mut dev = device.lock().unwrap();
            dev.ensure_open(mode)?;
            let core = Arc::new(Mutex::new(ChannelCore::new(
                *PARAMS.buffer_capacity.read().unwrap(),
                dev.sample_rate(),
                Duration::from_millis(*PARAMS.settle_margin_ms.read().unwrap()),
            )));
            let index = dev.attach_core(Arc::downgrade(&core));
            Ok((core, index))
        })();

        match attached {
            Ok((core, index)) => {
                entry.use_count += 1;
                info!(device = %key, channel = index, users = entry.use_count, "channel attached");
                Ok(Channel {
                    key: key.to_string(),
                    index,
                    core,
                    device,
                })
            }
            Err(e) => {
                // A device that never got a user does not linger.
                if entry.use_count == 0 {
                    inner.devices.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Detach a channel; destroys the device when the last one leaves
    pub fn detach(&self, channel: Channel) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.devices.get_mut(&channel.key) else {
            return;
        };
        entry.device.lock().unwrap().detach_core(channel.index);
        entry.use_count -= 1;
        info!(device = %channel.key, channel = channel.index, users = entry.use_count, "channel detached");

        if entry.use_count == 0 {
            let entry = inner.devices.remove(&channel.key).expect("entry exists");
            entry.device.lock().unwrap().close();
            debug!(device = %channel.key, "device destroyed");
        }
    }

    /// Number of live devices
    pub fn device_count(&self) -> usize {
        self.inner.lock().unwrap().devices.len()
    }

    /// Use count for one key, if that device exists
    pub fn use_count(&self, key: &str) -> Option<usize> {
        self.inner.lock().unwrap().devices.get(key).map(|e| e.use_count)
    }

    /// Handle to one device, if it exists (driver integration)
    pub fn device(&self, key: &str) -> Option<Arc<Mutex<DeviceMux>>> {
        self.inner
            .lock()
            .unwrap()
            .devices
            .get(key)
            .map(|e| Arc::clone(&e.device))
    }

    /// Handles to every live device (driver integration)
    pub fn devices(&self) -> Vec<Arc<Mutex<DeviceMux>>> {
        self.inner
            .lock()
            .unwrap()
            .devices
            .values()
            .map(|e| Arc::clone(&e.device))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::transport::NullTransport;

    fn registry_with_null() -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        registry.register_transport("null", NullTransport::factory());
        registry
    }

    #[test]
    fn test_key_parse_splits_on_first_colon() {
        let key = DeviceKey::parse("alsa:hw:0").unwrap();
        assert_eq!(key.transport, "alsa");
        assert_eq!(key.target, "hw:0");
        assert_eq!(key.to_string(), "alsa:hw:0");

        let key = DeviceKey::parse("udp:239.1.1.1:5004").unwrap();
        assert_eq!(key.transport, "udp");
        assert_eq!(key.target, "239.1.1.1:5004");
    }

    #[test]
    fn test_key_parse_rejects_malformed() {
        assert!(DeviceKey::parse("nocolon").is_err());
        assert!(DeviceKey::parse(":target").is_err());
        assert!(DeviceKey::parse("transport:").is_err());
    }

    #[test]
    fn test_three_channels_share_one_device() {
        let registry = registry_with_null();

        let a = registry.attach("null:out", OpenMode::Write).unwrap();
        let b = registry.attach("null:out", OpenMode::Write).unwrap();
        let c = registry.attach("null:out", OpenMode::Write).unwrap();
        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.use_count("null:out"), Some(3));

        // Distinct channel indices on the shared device.
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(c.index(), 2);

        registry.detach(a);
        registry.detach(b);
        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.use_count("null:out"), Some(1));

        registry.detach(c);
        assert_eq!(registry.device_count(), 0);
        assert_eq!(registry.use_count("null:out"), None);
    }

    #[test]
    fn test_distinct_targets_get_distinct_devices() {
        let registry = registry_with_null();
        let a = registry.attach("null:out", OpenMode::Write).unwrap();
        let b = registry.attach("null:monitor", OpenMode::Write).unwrap();
        assert_eq!(registry.device_count(), 2);
        registry.detach(a);
        registry.detach(b);
        assert_eq!(registry.device_count(), 0);
    }

    #[test]
    fn test_unknown_transport_is_an_error() {
        let registry = registry_with_null();
        let err = registry.attach("oss:/dev/dsp", OpenMode::Write).unwrap_err();
        assert!(matches!(err, Error::UnknownTransport(_)));
        assert_eq!(registry.device_count(), 0);
    }

    #[test]
    fn test_failed_open_does_not_leak_a_device() {
        let registry = DeviceRegistry::new();
        registry.register_transport(
            "flaky",
            Box::new(|_target| Err(Error::Config("no such hardware".into()))),
        );
        assert!(registry.attach("flaky:x", OpenMode::Write).is_err());
        assert_eq!(registry.device_count(), 0);
    }
}

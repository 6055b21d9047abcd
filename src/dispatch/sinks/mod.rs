//! Device sinks and the registry that owns them
//!
//! Every device a game profile can target is opened once, when the registry
//! is built, and reused for the lifetime of the registry. Dispatch only ever
//! borrows a sink through its mutex.

pub mod pacdrive;
pub mod serial;
pub mod wled;

pub use pacdrive::{HidReportWriter, LoggingReportWriter, PacDriveSink, PACDRIVE_CHANNELS};
pub use serial::SerialSink;
pub use wled::{state_body, UreqTransport, WledSink, WledTransport};

use crate::config::profiles::{DeviceConfig, DeviceKind};
use crate::config::DispatchConfig;
use crate::dispatch::wled_rules::EffectCommand;
use crate::error::DispatchError;
use crate::types::{ChannelRef, DeviceType, OutputValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// A write addressed to one sink
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    /// Set a channel (PacDrive: 0-based index and 0/1; Serial: as configured)
    Channel { channel: ChannelRef, value: OutputValue },
    /// Apply an effect on the controller at `ip`
    Wled { ip: String, command: EffectCommand },
}

/// A long-lived output device
#[cfg_attr(test, mockall::automock)]
pub trait DeviceSink: Send {
    fn id(&self) -> &str;

    fn device_type(&self) -> DeviceType;

    fn write(&mut self, command: &SinkCommand) -> Result<(), DispatchError>;
}

/// Segments currently lit on each WLED controller, keyed by IP
#[derive(Debug, Default)]
pub struct SegmentCache {
    lit: Mutex<HashMap<String, BTreeSet<u32>>>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments lit on `ip` that `command` leaves behind
    ///
    /// Stale segments were lit by a previous effect and are not part of the
    /// new one; the caller turns them off. The cache is not changed until
    /// [`commit`](Self::commit).
    pub fn stale(&self, ip: &str, command: &EffectCommand) -> Vec<u32> {
        let EffectCommand::Apply { .. } = command else {
            return Vec::new();
        };
        let Ok(lit) = self.lit.lock() else {
            return Vec::new();
        };
        let segments: BTreeSet<u32> = command.segments().iter().copied().collect();
        lit.get(ip)
            .map(|entry| entry.difference(&segments).copied().collect())
            .unwrap_or_default()
    }

    /// Record `command` as delivered to `ip`
    pub fn commit(&self, ip: &str, command: &EffectCommand) {
        let Ok(mut lit) = self.lit.lock() else {
            return;
        };
        let entry = lit.entry(ip.to_string()).or_default();
        let segments: BTreeSet<u32> = command.segments().iter().copied().collect();

        match command {
            EffectCommand::PowerOff { .. } => entry.retain(|s| !segments.contains(s)),
            EffectCommand::Apply { .. } => *entry = segments,
        }
    }

    pub fn lit(&self, ip: &str) -> Vec<u32> {
        self.lit
            .lock()
            .ok()
            .and_then(|lit| lit.get(ip).map(|s| s.iter().copied().collect()))
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut lit) = self.lit.lock() {
            lit.clear();
        }
    }
}

/// Shared handle to a sink
pub type SharedSink = Arc<Mutex<Box<dyn DeviceSink>>>;

/// Sinks by device id
#[derive(Default)]
pub struct DeviceRegistry {
    sinks: HashMap<String, SharedSink>,
    segments: Arc<SegmentCache>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a sink for every configured device
    pub fn from_devices(devices: &[DeviceConfig], config: &DispatchConfig) -> Self {
        let mut registry = Self::new();
        for device in devices {
            let sink: Box<dyn DeviceSink> = match &device.kind {
                DeviceKind::PacDrive { index } => {
                    Box::new(PacDriveSink::new(&device.id, pacdrive::open_writer(*index)))
                }
                DeviceKind::Serial { port } => Box::new(SerialSink::open(&device.id, port)),
                DeviceKind::Wled => Box::new(WledSink::new(
                    &device.id,
                    Box::new(UreqTransport::new(config.wled_timeout())),
                    registry.segments.clone(),
                )),
            };
            tracing::info!("Registered {} device '{}'", sink.device_type(), device.id);
            registry.register(sink);
        }
        registry
    }

    /// Add a sink, replacing any with the same id
    pub fn register(&mut self, sink: Box<dyn DeviceSink>) {
        let id = sink.id().to_string();
        self.sinks.insert(id, Arc::new(Mutex::new(sink)));
    }

    /// Look up a sink by id, checking it has the expected type
    pub fn get(&self, id: &str, device_type: DeviceType) -> Result<SharedSink, DispatchError> {
        let sink = self
            .sinks
            .get(id)
            .ok_or_else(|| DispatchError::DeviceNotFound(id.to_string()))?;
        let actual = sink
            .lock()
            .map_err(|_| DispatchError::Io(format!("device '{}' lock poisoned", id)))?
            .device_type();
        if actual != device_type {
            return Err(DispatchError::DeviceNotFound(format!(
                "{} (is {}, not {})",
                id, actual, device_type
            )));
        }
        Ok(sink.clone())
    }

    pub fn segments(&self) -> Arc<SegmentCache> {
        self.segments.clone()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }
}

//! Output dispatch
//!
//! [`DispatchEngine`] routes each [`NormalizedOutput`] to the device rows of
//! the active game profile:
//!
//! - rows are matched by output key or label; inactive rows and rows with no
//!   device type are skipped silently
//! - PacDrive rows use 1-based channels and switch values (0/1)
//! - Serial rows pass channel and value through unchanged
//! - WLED rows name a WLED profile whose rules pick the effect
//!
//! With change detection on, a row only writes when its value changed, or
//! when `force_update_interval` evaluations passed since its last write.
//! Writes to the same row are serialized; different rows do not wait on
//! each other beyond sharing a device.
//!
//! A row whose device or WLED profile does not exist is marked failed and
//! not looked up again until [`DispatchEngine::set_mappings`]; its error is
//! still reported on every evaluation.

pub mod sinks;
pub mod wled_rules;

pub use sinks::{DeviceRegistry, DeviceSink, SegmentCache, SinkCommand};
pub use wled_rules::{select_effect, EffectCommand};

use crate::config::profiles::{ProfileStore, WledProfile};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::types::{
    monotonic_ms, ChannelRef, DeviceType, DispatchRecord, NormalizedOutput, OutputMapping,
    OutputValue,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Change-detection state of one mapping row
#[derive(Debug, Default)]
struct RowState {
    last_sent: Option<OutputValue>,
    /// Evaluations since the last successful write
    since_write: u32,
    /// Missing device or profile, kept until the table is replaced
    failed: Option<DispatchError>,
}

impl RowState {
    fn note_failure(&mut self, error: &DispatchError) {
        if error.is_missing_target() {
            self.failed = Some(error.clone());
        }
    }
}

/// Routes normalized outputs to device sinks
pub struct DispatchEngine {
    config: DispatchConfig,
    registry: DeviceRegistry,
    profiles: Arc<dyn ProfileStore>,
    mappings: RwLock<Vec<OutputMapping>>,
    rows: Mutex<HashMap<String, Arc<Mutex<RowState>>>>,
    wled_profiles: RwLock<HashMap<String, Arc<WledProfile>>>,
}

/// The write a row turns into, before change detection is applied
enum Planned {
    Write(SinkCommand, OutputValue),
    /// Nothing to send (no WLED rule matched)
    Nothing(OutputValue),
}

impl DispatchEngine {
    pub fn new(config: DispatchConfig, registry: DeviceRegistry, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            config,
            registry,
            profiles,
            mappings: RwLock::new(Vec::new()),
            rows: Mutex::new(HashMap::new()),
            wled_profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Install a new dispatch table, resetting change detection
    pub fn set_mappings(&self, mappings: Vec<OutputMapping>) {
        let active = mappings.iter().filter(|m| is_routed(m)).count();
        tracing::info!("Dispatch table: {} rows, {} routed", mappings.len(), active);
        if let Ok(mut current) = self.mappings.write() {
            *current = mappings;
        }
        if let Ok(mut rows) = self.rows.lock() {
            rows.clear();
        }
        if let Ok(mut profiles) = self.wled_profiles.write() {
            profiles.clear();
        }
        self.registry.segments().clear();
    }

    pub fn mappings(&self) -> Vec<OutputMapping> {
        self.mappings.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Row keys currently marked failed
    pub fn failed_rows(&self) -> Vec<String> {
        let Ok(rows) = self.rows.lock() else {
            return Vec::new();
        };
        let mut failed: Vec<String> = rows
            .iter()
            .filter(|(_, state)| state.lock().is_ok_and(|s| s.failed.is_some()))
            .map(|(key, _)| key.clone())
            .collect();
        failed.sort();
        failed
    }

    /// Dispatch an output through every matching row of the table
    pub fn dispatch(&self, output: &NormalizedOutput) -> Vec<DispatchRecord> {
        let rows: Vec<OutputMapping> = match self.mappings.read() {
            Ok(mappings) => mappings
                .iter()
                .filter(|m| m.matches(output))
                .cloned()
                .collect(),
            Err(_) => return Vec::new(),
        };
        rows.iter()
            .filter_map(|row| self.dispatch_row(output, row))
            .collect()
    }

    /// Dispatch an output through one row
    ///
    /// Returns `None` when the row is inactive, unrouted, does not match the
    /// output, or change detection suppressed the write.
    pub fn dispatch_row(&self, output: &NormalizedOutput, row: &OutputMapping) -> Option<DispatchRecord> {
        if !row.matches(output) || !is_routed(row) {
            return None;
        }
        self.run(output, row, false)
    }

    /// Out-of-band write bypassing change detection
    pub fn dispatch_test(&self, output: &NormalizedOutput, row: &OutputMapping) -> DispatchRecord {
        if !is_routed(row) {
            return record(
                output,
                output.value.clone(),
                Err(DispatchError::Unsupported(format!(
                    "mapping '{}' is not routed to a device",
                    row.output_key
                ))),
            );
        }
        self.run(output, row, true).unwrap_or_else(|| {
            record(output, output.value.clone(), Ok(()))
        })
    }

    fn row_state(&self, row: &OutputMapping) -> Arc<Mutex<RowState>> {
        let key = format!(
            "{}|{}|{}",
            row.device_type,
            row.target_device.as_deref().unwrap_or_default(),
            row.channel.as_ref().map(ChannelRef::as_profile).unwrap_or_default()
        );
        match self.rows.lock() {
            Ok(mut rows) => rows.entry(key).or_default().clone(),
            Err(_) => Arc::new(Mutex::new(RowState::default())),
        }
    }

    fn run(&self, output: &NormalizedOutput, row: &OutputMapping, force: bool) -> Option<DispatchRecord> {
        let state = self.row_state(row);
        let Ok(mut state) = state.lock() else {
            return Some(record(
                output,
                output.value.clone(),
                Err(DispatchError::Io("row lock poisoned".to_string())),
            ));
        };

        if !force {
            if let Some(error) = &state.failed {
                tracing::trace!("Skipping failed row for '{}'", output.key);
                return Some(record(output, output.value.clone(), Err(error.clone())));
            }
        }

        let planned = match self.plan(output, row) {
            Ok(planned) => planned,
            Err(e) => {
                tracing::warn!("Dispatch of '{}' failed: {}", output.key, e);
                state.note_failure(&e);
                return Some(record(output, output.value.clone(), Err(e)));
            }
        };
        let (Planned::Write(_, value) | Planned::Nothing(value)) = &planned;

        if !force && self.config.send_only_changed {
            state.since_write = state.since_write.saturating_add(1);
            let changed = !state.last_sent.as_ref().is_some_and(|last| last.same_as(value));
            let due = state.since_write >= self.config.force_update_interval.max(1);
            if !changed && !due {
                return None;
            }
        }

        let (result, value) = match planned {
            Planned::Nothing(value) => (Ok(()), value),
            Planned::Write(command, value) => (self.write(row, &command), value),
        };
        match &result {
            Ok(()) => {
                state.last_sent = Some(value.clone());
                state.since_write = 0;
                state.failed = None;
            }
            Err(e) => {
                tracing::warn!("Dispatch of '{}' failed: {}", output.key, e);
                state.note_failure(e);
            }
        }
        Some(record(output, value, result))
    }

    /// Turn an output into the command for `row`
    fn plan(&self, output: &NormalizedOutput, row: &OutputMapping) -> Result<Planned, DispatchError> {
        let channel = row
            .channel
            .clone()
            .ok_or_else(|| DispatchError::Unsupported(format!("'{}' has no channel", row.output_key)))?;

        match row.device_type {
            DeviceType::PacDrive => {
                let index = channel
                    .as_index()
                    .filter(|i| *i >= 1)
                    .ok_or_else(|| DispatchError::Unsupported(format!("PacDrive channel {:?}", channel)))?;
                let value = OutputValue::Integer(sinks::pacdrive::as_switch(&output.value) as i128);
                Ok(Planned::Write(
                    SinkCommand::Channel {
                        channel: ChannelRef::Index(index - 1),
                        value: value.clone(),
                    },
                    value,
                ))
            }
            DeviceType::Serial => Ok(Planned::Write(
                SinkCommand::Channel {
                    channel,
                    value: output.value.clone(),
                },
                output.value.clone(),
            )),
            DeviceType::Wled => {
                let number = output.value.as_f64().ok_or_else(|| {
                    DispatchError::Unsupported(format!("WLED needs a number, got '{}'", output.value))
                })?;
                let profile = self.wled_profile(&channel.as_profile())?;
                Ok(match select_effect(number, &profile.rules) {
                    Some(command) => Planned::Write(
                        SinkCommand::Wled {
                            ip: profile.device_ip.clone(),
                            command,
                        },
                        output.value.clone(),
                    ),
                    None => Planned::Nothing(output.value.clone()),
                })
            }
            DeviceType::None => Err(DispatchError::Unsupported("no device type".to_string())),
        }
    }

    fn write(&self, row: &OutputMapping, command: &SinkCommand) -> Result<(), DispatchError> {
        let device = row.target_device.as_deref().unwrap_or_default();
        let sink = self.registry.get(device, row.device_type)?;
        let mut sink = sink
            .lock()
            .map_err(|_| DispatchError::Io(format!("device '{}' lock poisoned", device)))?;
        sink.write(command)
    }

    fn wled_profile(&self, id: &str) -> Result<Arc<WledProfile>, DispatchError> {
        if let Some(profile) = self.wled_profiles.read().ok().and_then(|p| p.get(id).cloned()) {
            return Ok(profile);
        }
        let profile = Arc::new(
            self.profiles
                .load_wled_profile(id)
                .map_err(|e| DispatchError::ProfileNotFound(format!("{}: {}", id, e)))?,
        );
        if let Ok(mut cache) = self.wled_profiles.write() {
            cache.insert(id.to_string(), profile.clone());
        }
        Ok(profile)
    }
}

fn is_routed(row: &OutputMapping) -> bool {
    row.active && row.device_type != DeviceType::None
}

fn record(output: &NormalizedOutput, value: OutputValue, result: Result<(), DispatchError>) -> DispatchRecord {
    DispatchRecord {
        label: output.label.clone(),
        key: output.key.clone(),
        last_value: value,
        success: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
        timestamp_ms: monotonic_ms(),
    }
}

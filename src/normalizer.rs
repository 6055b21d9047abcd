//! Output normalization
//!
//! Both sources end up as [`NormalizedOutput`] events keyed by a stable
//! key: memory results by their address label, message packets by their
//! packet key. The normalizer remembers the human-readable label bound to
//! each key and the last value seen, so that a label packet arriving after
//! (or before) the first value still names the output correctly.

use crate::listener::Packet;
use crate::types::{NormalizedOutput, OutputSource, OutputValue, ReadResult};
use std::collections::{BTreeMap, HashMap};

/// What applying a packet changed
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizerUpdate {
    /// A key got a new display label; no value was emitted
    LabelChanged { key: String, label: String },
    /// A value to dispatch
    Output(NormalizedOutput),
}

/// Label and last-value state shared by both output sources
#[derive(Debug, Default)]
pub struct OutputNormalizer {
    labels: HashMap<String, String>,
    values: BTreeMap<String, (OutputValue, OutputSource)>,
}

impl OutputNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display label for `key`, falling back to the key itself
    pub fn label_for<'a>(&'a self, key: &'a str) -> &'a str {
        self.labels.get(key).map(String::as_str).unwrap_or(key)
    }

    /// Last value seen for `key`
    pub fn value(&self, key: &str) -> Option<&OutputValue> {
        self.values.get(key).map(|(value, _)| value)
    }

    pub fn apply_packet(&mut self, packet: Packet) -> NormalizerUpdate {
        match packet {
            Packet::Label { key, label } => {
                self.labels.insert(key.clone(), label.clone());
                NormalizerUpdate::LabelChanged { key, label }
            }
            Packet::Value { key, value } => {
                NormalizerUpdate::Output(self.record(key, value, OutputSource::Message))
            }
        }
    }

    /// Normalize one memory read; failed reads produce nothing
    pub fn from_read_result(&mut self, result: &ReadResult) -> Option<NormalizedOutput> {
        if !result.success {
            return None;
        }
        let value = result
            .final_value
            .clone()
            .or_else(|| result.raw_value.clone())?;
        let mut output = self.record(result.label.clone(), value, OutputSource::Memory);
        output.timestamp_ms = result.timestamp_ms;
        Some(output)
    }

    fn record(&mut self, key: String, value: OutputValue, source: OutputSource) -> NormalizedOutput {
        self.values.insert(key.clone(), (value.clone(), source));
        let label = self.label_for(&key).to_string();
        NormalizedOutput::new(key, label, value, source)
    }

    /// Current value of every known key, ordered by key
    pub fn snapshot(&self) -> Vec<NormalizedOutput> {
        self.values
            .iter()
            .map(|(key, (value, source))| {
                NormalizedOutput::new(key.clone(), self.label_for(key), value.clone(), *source)
            })
            .collect()
    }

    /// Forget all labels and values (new game session)
    pub fn clear(&mut self) {
        self.labels.clear();
        self.values.clear();
    }
}

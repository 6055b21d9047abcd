//! Core data types for plynk-rs
//!
//! This module contains the data model shared by the acquisition side
//! (memory addresses, read results) and the dispatch side (output mappings,
//! WLED rules).
//!
//! # Main Types
//!
//! - [`ValueType`] - Width/encoding tag for a memory read
//! - [`MemoryAddressSpec`] - One value to read from the target process
//! - [`ReadResult`] - Outcome of reading and transforming one address
//! - [`OutputValue`] - Tagged number/text value flowing through the pipeline
//! - [`NormalizedOutput`] - Unified output event from memory or messages
//! - [`OutputMapping`] - One row of a game profile's dispatch table
//! - [`WledRule`] - One lighting rule in a WLED profile
//!
//! # Integers
//!
//! Integer values are carried as `i128` end to end so that the full
//! `u64`/`i64` range survives reading, bit masking and dispatch without
//! passing through a float.

use crate::error::MemoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Default byte length for `String` reads when a spec does not set one
pub const DEFAULT_STRING_LENGTH: usize = 32;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic milliseconds since the first call in this process
pub fn monotonic_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

// ==================== Value Types ====================

/// Width and encoding of a value read from memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValueType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    #[default]
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Byte,
    /// Raw byte run of the given length
    CustomSize(usize),
}

impl ValueType {
    /// Number of bytes to read for this type
    pub fn size_bytes(&self, string_length: usize) -> usize {
        match self {
            ValueType::Int8 | ValueType::UInt8 | ValueType::Byte => 1,
            ValueType::Int16 | ValueType::UInt16 => 2,
            ValueType::Int32 | ValueType::UInt32 | ValueType::Float => 4,
            ValueType::Int64 | ValueType::UInt64 | ValueType::Double => 8,
            ValueType::String => string_length.max(1),
            ValueType::CustomSize(n) => (*n).max(1),
        }
    }

    /// Bit width of integer types, `None` for floats and strings
    pub fn integer_bits(&self) -> Option<u32> {
        match self {
            ValueType::Int8 | ValueType::UInt8 | ValueType::Byte => Some(8),
            ValueType::Int16 | ValueType::UInt16 => Some(16),
            ValueType::Int32 | ValueType::UInt32 => Some(32),
            ValueType::Int64 | ValueType::UInt64 => Some(64),
            ValueType::CustomSize(n) if (1..=8).contains(n) => Some((*n as u32) * 8),
            _ => None,
        }
    }

    /// Whether integers of this type are two's complement signed
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ValueType::Int8 | ValueType::Int16 | ValueType::Int32 | ValueType::Int64
        )
    }

    /// Whether this type decodes to a float
    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::Float | ValueType::Double)
    }

    /// Wrap an integer into this type's range (two's complement for signed types)
    ///
    /// Non-integer types return the value unchanged.
    pub fn wrap(&self, value: i128) -> i128 {
        let Some(bits) = self.integer_bits() else {
            return value;
        };
        let mask: u128 = if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 };
        let unsigned = (value as u128) & mask;
        if self.is_signed() && bits < 128 && unsigned & (1u128 << (bits - 1)) != 0 {
            (unsigned | !mask) as i128
        } else {
            unsigned as i128
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::CustomSize(n) => write!(f, "CustomSize({})", n),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Bitwise operation applied between a raw value and a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BitwiseOp {
    #[serde(alias = "and", alias = "And")]
    And,
    #[serde(alias = "or", alias = "Or")]
    Or,
    #[serde(alias = "xor", alias = "Xor")]
    Xor,
    #[serde(alias = "not", alias = "Not")]
    Not,
}

/// Read ordering hint; higher priorities are read first within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

// ==================== Address Specification ====================

/// The active addressing mode of a [`MemoryAddressSpec`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMode {
    /// A literal address in the target's address space
    Absolute(String),
    /// An offset from a loaded module's base address
    ModuleOffset { module: String, offset: String },
}

/// Identifies one value to read from the target process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAddressSpec {
    /// User-facing label, unique within a profile
    pub label: String,

    #[serde(default, rename = "type", alias = "valueType")]
    pub value_type: ValueType,

    /// Absolute address, or the `module+offset` shorthand
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub module_name: Option<String>,

    #[serde(default)]
    pub offset: Option<String>,

    /// Pointer chain offsets; the base is dereferenced once per entry
    #[serde(default)]
    pub pointer_offsets: Vec<String>,

    #[serde(default)]
    pub bitmask: Option<String>,

    #[serde(default)]
    pub bitwise_op: Option<BitwiseOp>,

    #[serde(default)]
    pub is_bitfield: bool,

    #[serde(default)]
    pub invert: bool,

    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub disable_caching: bool,

    #[serde(default, alias = "fastModeEnabled")]
    pub fast_mode: bool,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub batch_group: Option<String>,

    #[serde(default = "default_string_length")]
    pub string_length: usize,
}

fn default_string_length() -> usize {
    DEFAULT_STRING_LENGTH
}

impl MemoryAddressSpec {
    /// Create a spec reading `value_type` at an absolute address
    pub fn absolute(label: impl Into<String>, address: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::empty(label, value_type)
        }
    }

    /// Create a spec reading `value_type` at `module + offset`
    pub fn module_offset(
        label: impl Into<String>,
        module: impl Into<String>,
        offset: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            module_name: Some(module.into()),
            offset: Some(offset.into()),
            ..Self::empty(label, value_type)
        }
    }

    fn empty(label: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            label: label.into(),
            value_type,
            address: None,
            module_name: None,
            offset: None,
            pointer_offsets: Vec::new(),
            bitmask: None,
            bitwise_op: None,
            is_bitfield: false,
            invert: false,
            script: None,
            format: None,
            disable_caching: false,
            fast_mode: false,
            priority: Priority::Normal,
            batch_group: None,
            string_length: DEFAULT_STRING_LENGTH,
        }
    }

    /// Builder: set the pointer chain offsets
    pub fn with_pointer_offsets<I, S>(mut self, offsets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pointer_offsets = offsets.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set a bitmask and operation
    pub fn with_bitmask(mut self, mask: impl Into<String>, op: BitwiseOp) -> Self {
        self.bitmask = Some(mask.into());
        self.bitwise_op = Some(op);
        self
    }

    /// Builder: set a value script
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Builder: set a display format template
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Number of bytes a read of this spec covers
    pub fn size_bytes(&self) -> usize {
        self.value_type.size_bytes(self.string_length)
    }

    /// Determine the addressing mode, enforcing that exactly one is active
    ///
    /// `address = "game.exe+0x1000"` is accepted as shorthand for module+offset.
    pub fn addressing(&self) -> Result<AddressMode, MemoryError> {
        let address = self
            .address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let module = self
            .module_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match (address, module) {
            (Some(_), Some(_)) => Err(MemoryError::InvalidAddressFormat(format!(
                "'{}' sets both an absolute address and a module",
                self.label
            ))),
            (None, None) => Err(MemoryError::InvalidAddressFormat(format!(
                "'{}' has no address",
                self.label
            ))),
            (None, Some(module)) => Ok(AddressMode::ModuleOffset {
                module: module.to_string(),
                offset: self
                    .offset
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("0")
                    .to_string(),
            }),
            (Some(address), None) => match address.split_once('+') {
                Some((module, offset)) if !module.trim().is_empty() => {
                    Ok(AddressMode::ModuleOffset {
                        module: module.trim().to_string(),
                        offset: offset.trim().to_string(),
                    })
                }
                _ => Ok(AddressMode::Absolute(address.to_string())),
            },
        }
    }
}

/// The concrete address produced for one read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub address: u64,
    /// Number of pointer dereferences performed to reach `address`
    pub dereferences: usize,
}

// ==================== Values ====================

/// A value flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Integer(i128),
    Float(f64),
    Text(String),
}

impl OutputValue {
    /// Parse text, coercing numeric strings to numbers
    pub fn coerce_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return OutputValue::Text(text.to_string());
        }
        if let Ok(i) = trimmed.parse::<i128>() {
            return OutputValue::Integer(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => OutputValue::Float(f),
            _ => OutputValue::Text(text.to_string()),
        }
    }

    /// Convert a JSON value, coercing numeric strings
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(OutputValue::Integer(i as i128))
                } else if let Some(u) = n.as_u64() {
                    Some(OutputValue::Integer(u as i128))
                } else {
                    n.as_f64().map(OutputValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(OutputValue::coerce_text(s)),
            serde_json::Value::Bool(b) => Some(OutputValue::Integer(*b as i128)),
            _ => None,
        }
    }

    /// Numeric view of this value; numeric text is parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OutputValue::Integer(i) => Some(*i as f64),
            OutputValue::Float(f) => Some(*f),
            OutputValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Integer view of this value; floats are truncated toward zero
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            OutputValue::Integer(i) => Some(*i),
            OutputValue::Float(f) if f.is_finite() => Some(f.trunc() as i128),
            OutputValue::Float(_) => None,
            OutputValue::Text(s) => match OutputValue::coerce_text(s) {
                OutputValue::Text(_) => None,
                other => other.as_i128(),
            },
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputValue::Text(_))
    }

    /// Equality used by change detection: numbers compare numerically
    pub fn same_as(&self, other: &OutputValue) -> bool {
        match (self, other) {
            (OutputValue::Text(a), OutputValue::Text(b)) => a == b,
            (OutputValue::Integer(a), OutputValue::Integer(b)) => a == b,
            (OutputValue::Text(_), _) | (_, OutputValue::Text(_)) => false,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputValue::Integer(i) => write!(f, "{}", i),
            OutputValue::Float(v) => write!(f, "{}", v),
            OutputValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i128> for OutputValue {
    fn from(v: i128) -> Self {
        OutputValue::Integer(v)
    }
}

impl From<i64> for OutputValue {
    fn from(v: i64) -> Self {
        OutputValue::Integer(v as i128)
    }
}

impl From<f64> for OutputValue {
    fn from(v: f64) -> Self {
        OutputValue::Float(v)
    }
}

impl From<&str> for OutputValue {
    fn from(v: &str) -> Self {
        OutputValue::Text(v.to_string())
    }
}

/// Outcome of reading one address for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub label: String,
    pub raw_value: Option<OutputValue>,
    pub final_value: Option<OutputValue>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

impl ReadResult {
    pub fn ok(label: impl Into<String>, raw: OutputValue, final_value: OutputValue) -> Self {
        Self {
            label: label.into(),
            raw_value: Some(raw),
            final_value: Some(final_value),
            success: true,
            error: None,
            timestamp_ms: monotonic_ms(),
        }
    }

    pub fn failed(label: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            raw_value: None,
            final_value: None,
            success: false,
            error: Some(error.into()),
            timestamp_ms: monotonic_ms(),
        }
    }
}

/// Where a normalized output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSource {
    Memory,
    Message,
}

/// The unified output event consumed by dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedOutput {
    /// Stable identity of the signal across ticks and messages
    pub key: String,
    pub label: String,
    pub value: OutputValue,
    pub source: OutputSource,
    pub timestamp_ms: u64,
}

impl NormalizedOutput {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        value: OutputValue,
        source: OutputSource,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            value,
            source,
            timestamp_ms: monotonic_ms(),
        }
    }
}

// ==================== Dispatch Model ====================

/// Sink family a mapping row targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceType {
    #[default]
    None,
    PacDrive,
    Serial,
    #[serde(rename = "WLED", alias = "Wled")]
    Wled,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::None => write!(f, "None"),
            DeviceType::PacDrive => write!(f, "PacDrive"),
            DeviceType::Serial => write!(f, "Serial"),
            DeviceType::Wled => write!(f, "WLED"),
        }
    }
}

/// A channel index (PacDrive/Serial) or a WLED profile id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRef {
    Index(u32),
    Profile(String),
}

impl ChannelRef {
    /// Numeric channel, parsing string references when they are numeric
    pub fn as_index(&self) -> Option<u32> {
        match self {
            ChannelRef::Index(i) => Some(*i),
            ChannelRef::Profile(s) => s.trim().parse().ok(),
        }
    }

    /// Profile id view of the reference
    pub fn as_profile(&self) -> String {
        match self {
            ChannelRef::Index(i) => i.to_string(),
            ChannelRef::Profile(s) => s.clone(),
        }
    }
}

/// One row of a game profile's dispatch table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMapping {
    pub output_key: String,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default, alias = "targetDeviceId")]
    pub target_device: Option<String>,
    #[serde(default, alias = "channelOrProfileRef")]
    pub channel: Option<ChannelRef>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl OutputMapping {
    pub fn new(output_key: impl Into<String>) -> Self {
        Self {
            output_key: output_key.into(),
            device_type: DeviceType::None,
            target_device: None,
            channel: None,
            active: true,
        }
    }

    /// Builder: target a device and channel
    pub fn routed_to(
        mut self,
        device_type: DeviceType,
        device_id: impl Into<String>,
        channel: ChannelRef,
    ) -> Self {
        self.device_type = device_type;
        self.target_device = Some(device_id.into());
        self.channel = Some(channel);
        self
    }

    /// Change the device type, clearing target and channel when it differs
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        if self.device_type != device_type {
            self.target_device = None;
            self.channel = None;
        }
        self.device_type = device_type;
    }

    /// Whether an output with this key/label is routed by this row
    pub fn matches(&self, output: &NormalizedOutput) -> bool {
        self.output_key == output.key || self.output_key == output.label
    }
}

/// How a WLED rule is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    #[serde(alias = "Exact")]
    Exact,
    #[serde(alias = "Range")]
    Range,
    /// Driven by something other than the output value; never matches numerically
    #[serde(alias = "External")]
    External,
}

/// One lighting rule in a WLED profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WledRule {
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub exact_value: Option<f64>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub segments: Vec<u32>,
    #[serde(default)]
    pub effect: u32,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default)]
    pub flash: bool,
    #[serde(default)]
    pub turn_off_segment: bool,
}

fn default_color() -> [u8; 3] {
    [255, 255, 255]
}

fn default_brightness() -> u8 {
    128
}

impl WledRule {
    pub fn exact(value: f64, segments: Vec<u32>) -> Self {
        Self {
            trigger_type: TriggerType::Exact,
            exact_value: Some(value),
            ..Self::base(segments)
        }
    }

    pub fn range(min: f64, max: f64, segments: Vec<u32>) -> Self {
        Self {
            trigger_type: TriggerType::Range,
            min_value: Some(min),
            max_value: Some(max),
            ..Self::base(segments)
        }
    }

    fn base(segments: Vec<u32>) -> Self {
        Self {
            trigger_type: TriggerType::Exact,
            exact_value: None,
            min_value: None,
            max_value: None,
            segments,
            effect: 0,
            color: default_color(),
            brightness: default_brightness(),
            flash: false,
            turn_off_segment: false,
        }
    }
}

// ==================== Telemetry ====================

/// Rolling polling metrics published once per tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingStats {
    pub last_poll_duration_ms: f64,
    pub avg_poll_duration_ms: f64,
    pub polls_per_second: f64,
    pub skipped_polls: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub total_polls: u64,
}

/// Outcome of one dispatch attempt for one mapping row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub label: String,
    pub key: String,
    pub last_value: OutputValue,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

/// Uniform result of a public operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for OperationResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => OperationResult::ok(data),
            Err(e) => OperationResult::err(e.to_string()),
        }
    }
}

//! Value transformation pipeline
//!
//! Applies the per-address stages in a fixed order:
//!
//! 1. **Bitmask** - `AND`/`OR`/`XOR` against the mask, or unary `NOT`
//! 2. **Invert** - numeric negation
//! 3. **Script** - Rhai expression over `value`; a string result ends the pipeline
//! 4. **Format** - `{value}` template, decimal pattern, or literal
//!
//! A stage that fails is skipped and the previous value carries on, so a
//! transform always produces a value.
//!
//! The bitmask stage runs when `isBitfield` is set or a mask is present,
//! and its output is reported as the read's raw value.

pub mod bitwise;
pub mod format;

use crate::scripting::ScriptEngine;
use crate::types::{BitwiseOp, MemoryAddressSpec, OutputValue};

/// Options that change transform behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Return non-`{value}`, non-decimal templates as literal text
    pub literal_format_fallback: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            literal_format_fallback: true,
        }
    }
}

/// Result of transforming one raw read
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    /// Value after bit extraction
    pub raw: OutputValue,
    /// Value after every stage
    pub value: OutputValue,
}

/// Applies bitmask, invert, script and format stages
pub struct ValueTransformer {
    scripts: ScriptEngine,
    options: TransformOptions,
}

impl Default for ValueTransformer {
    fn default() -> Self {
        Self::new(TransformOptions::default())
    }
}

impl ValueTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self {
            scripts: ScriptEngine::new(),
            options,
        }
    }

    pub fn options(&self) -> TransformOptions {
        self.options
    }

    /// Bitmask stage only
    pub fn extract_bits(&self, raw: &OutputValue, spec: &MemoryAddressSpec) -> OutputValue {
        let mask = spec.bitmask.as_deref().map(str::trim).filter(|m| !m.is_empty());
        if !spec.is_bitfield && mask.is_none() {
            return raw.clone();
        }
        let op = spec.bitwise_op.unwrap_or(BitwiseOp::And);
        match bitwise::apply(raw, mask, op, spec.value_type) {
            Some(v) => v,
            None => {
                tracing::debug!("{}: bitmask stage skipped for {:?}", spec.label, raw);
                raw.clone()
            }
        }
    }

    /// Run every stage on a decoded value
    pub fn transform(&self, raw: &OutputValue, spec: &MemoryAddressSpec) -> Transformed {
        let masked = self.extract_bits(raw, spec);
        let mut value = masked.clone();

        if spec.invert {
            value = invert(&value).unwrap_or(value);
        }

        if let Some(source) = spec.script.as_deref().filter(|s| !s.trim().is_empty()) {
            match self
                .scripts
                .compile(source)
                .and_then(|script| self.scripts.execute(&script, &value, &masked))
            {
                Ok(OutputValue::Text(text)) => {
                    return Transformed {
                        raw: masked,
                        value: OutputValue::Text(text),
                    };
                }
                Ok(number) => value = number,
                Err(e) => tracing::debug!("{}: script stage skipped: {}", spec.label, e),
            }
        }

        if let Some(template) = spec.format.as_deref() {
            value = format::apply(&value, template, self.options.literal_format_fallback);
        }

        Transformed { raw: masked, value }
    }
}

fn invert(value: &OutputValue) -> Option<OutputValue> {
    match value {
        OutputValue::Integer(i) => Some(OutputValue::Integer(-i)),
        OutputValue::Float(f) => Some(OutputValue::Float(-f)),
        OutputValue::Text(s) => match OutputValue::coerce_text(s) {
            OutputValue::Text(_) => None,
            number => invert(&number),
        },
    }
}

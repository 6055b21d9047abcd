//! Bitmask stage

use crate::types::{BitwiseOp, OutputValue, ValueType};

/// Parse a mask literal: `0x` hex, `0b` binary, otherwise decimal
/// (or hex when it contains hex letters)
pub fn parse_mask(literal: &str) -> Option<i128> {
    let s = literal.trim().replace('_', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i128::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        return i128::from_str_radix(bin, 2).ok();
    }
    if s.chars().any(|c| c.is_ascii_hexdigit() && c.is_ascii_alphabetic()) {
        return i128::from_str_radix(&s, 16).ok();
    }
    s.parse::<i128>().ok()
}

/// Apply `op` between `raw` and `mask` at the width of `value_type`
///
/// `Not` is unary and ignores the mask. Returns `None` when the raw value
/// is not an integer or the mask does not parse.
pub fn apply(
    raw: &OutputValue,
    mask: Option<&str>,
    op: BitwiseOp,
    value_type: ValueType,
) -> Option<OutputValue> {
    let raw = match raw {
        OutputValue::Integer(i) => *i,
        _ => return None,
    };
    let wrap = |v: i128| match value_type.integer_bits() {
        Some(_) => value_type.wrap(v),
        None => v,
    };

    let mask = || mask.and_then(parse_mask).map(wrap);
    let result = match op {
        BitwiseOp::Not => !raw,
        BitwiseOp::And => raw & mask()?,
        BitwiseOp::Or => raw | mask()?,
        BitwiseOp::Xor => raw ^ mask()?,
    };

    Some(OutputValue::Integer(wrap(result)))
}

//! Display format stage
//!
//! Templates are interpreted in this order:
//!
//! 1. Containing `{value}`: every occurrence is replaced by the value as text.
//! 2. A decimal pattern (`0`, `0.0`, `0.000`, ...): the number is rounded to
//!    that many places. Zero places yields an integer, otherwise text with
//!    the trailing zeros kept.
//! 3. Anything else: returned as a literal constant when the compatibility
//!    flag is set, otherwise ignored.

use crate::types::OutputValue;

const VALUE_TOKEN: &str = "{value}";

/// Decimal places named by a decimal-pattern template, if it is one
pub fn decimal_places(template: &str) -> Option<usize> {
    let (int_part, frac) = match template.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (template, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match frac {
        None => Some(0),
        Some(f) if !f.is_empty() && f.bytes().all(|b| b == b'0') => Some(f.len()),
        Some(_) => None,
    }
}

/// Apply a format template to a value
pub fn apply(value: &OutputValue, template: &str, literal_fallback: bool) -> OutputValue {
    if template.is_empty() {
        return value.clone();
    }

    if template.contains(VALUE_TOKEN) {
        return OutputValue::Text(template.replace(VALUE_TOKEN, &value.to_string()));
    }

    if let Some(places) = decimal_places(template.trim()) {
        return match (value, value.as_f64()) {
            (OutputValue::Integer(i), _) if places == 0 => OutputValue::Integer(*i),
            (_, Some(f)) if places == 0 => OutputValue::Integer(f.round() as i128),
            (_, Some(f)) => OutputValue::Text(format!("{:.*}", places, f)),
            (_, None) => value.clone(),
        };
    }

    if literal_fallback {
        OutputValue::Text(template.to_string())
    } else {
        tracing::debug!("Ignoring format template {:?} without {{value}}", template);
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places("0"), Some(0));
        assert_eq!(decimal_places("0.00"), Some(2));
        assert_eq!(decimal_places("00.0"), Some(1));
        assert_eq!(decimal_places("0.05"), None);
        assert_eq!(decimal_places("0."), None);
        assert_eq!(decimal_places(".00"), None);
        assert_eq!(decimal_places("km/h"), None);
    }

    #[test]
    fn test_value_token_every_occurrence() {
        assert_eq!(
            apply(&OutputValue::Integer(88), "{value} km/h ({value})", true),
            OutputValue::Text("88 km/h (88)".into())
        );
    }

    #[test]
    fn test_decimal_rounding() {
        assert_eq!(
            apply(&OutputValue::Float(3.14159), "0.00", true),
            OutputValue::Text("3.14".into())
        );
        assert_eq!(
            apply(&OutputValue::Float(2.5), "0", true),
            OutputValue::Integer(3)
        );
        assert_eq!(
            apply(&OutputValue::Integer(7), "0.0", true),
            OutputValue::Text("7.0".into())
        );
    }

    #[test]
    fn test_decimal_pattern_leaves_text_alone() {
        assert_eq!(
            apply(&OutputValue::Text("N".into()), "0.00", true),
            OutputValue::Text("N".into())
        );
    }

    #[test]
    fn test_literal_fallback_flag() {
        let value = OutputValue::Integer(5);
        assert_eq!(
            apply(&value, "ON", true),
            OutputValue::Text("ON".into())
        );
        assert_eq!(apply(&value, "ON", false), value);
    }

    #[test]
    fn test_empty_template_is_noop() {
        let value = OutputValue::Float(1.25);
        assert_eq!(apply(&value, "", true), value);
    }
}

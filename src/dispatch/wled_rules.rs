//! WLED rule evaluation
//!
//! Rules are evaluated in list order and the first match wins. No match
//! means no command: the controller keeps whatever it was showing.

use crate::types::{TriggerType, WledRule};
use serde::Serialize;

/// Effect id WLED uses for "Blink"
pub const FLASH_EFFECT: u32 = 1;

/// What to send to a WLED controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EffectCommand {
    /// Brightness 0 and power off for these segments
    PowerOff { segments: Vec<u32> },
    Apply {
        segments: Vec<u32>,
        effect: u32,
        color: [u8; 3],
        brightness: u8,
        flash: bool,
    },
}

impl EffectCommand {
    pub fn segments(&self) -> &[u32] {
        match self {
            EffectCommand::PowerOff { segments } | EffectCommand::Apply { segments, .. } => segments,
        }
    }

    /// Effect id actually sent, with flash mapped to blink
    pub fn effect_id(&self) -> Option<u32> {
        match self {
            EffectCommand::PowerOff { .. } => None,
            EffectCommand::Apply { flash: true, .. } => Some(FLASH_EFFECT),
            EffectCommand::Apply { effect, .. } => Some(*effect),
        }
    }
}

/// Whether `rule` fires for `value`
pub fn rule_matches(rule: &WledRule, value: f64) -> bool {
    match rule.trigger_type {
        TriggerType::Exact => rule.exact_value.is_some_and(|exact| value == exact),
        TriggerType::Range => {
            if rule.min_value.is_none() && rule.max_value.is_none() {
                return false;
            }
            let min = rule.min_value.unwrap_or(f64::NEG_INFINITY);
            let max = rule.max_value.unwrap_or(f64::INFINITY);
            min <= value && value <= max
        }
        TriggerType::External => false,
    }
}

/// Pick the command for `value` from the first matching rule
pub fn select_effect(value: f64, rules: &[WledRule]) -> Option<EffectCommand> {
    if value.is_nan() {
        return None;
    }
    let rule = rules.iter().find(|rule| rule_matches(rule, value))?;

    if rule.turn_off_segment {
        return Some(EffectCommand::PowerOff {
            segments: rule.segments.clone(),
        });
    }
    Some(EffectCommand::Apply {
        segments: rule.segments.clone(),
        effect: rule.effect,
        color: rule.color,
        brightness: rule.brightness,
        flash: rule.flash,
    })
}

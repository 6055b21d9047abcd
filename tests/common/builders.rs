//! Test data builders for creating test objects

use plynk_rs::config::profiles::{GameProfile, MemoryProfile};
use plynk_rs::types::{
    BitwiseOp, ChannelRef, DeviceType, MemoryAddressSpec, OutputMapping, ValueType,
};

/// Builder for `module+offset` address specs
pub struct AddressBuilder {
    spec: MemoryAddressSpec,
}

impl AddressBuilder {
    pub fn new(label: &str) -> Self {
        Self {
            spec: MemoryAddressSpec::module_offset(label, "game.exe", "0x1000", ValueType::Int32),
        }
    }

    pub fn offset(mut self, offset: &str) -> Self {
        self.spec.offset = Some(offset.to_string());
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.spec.value_type = value_type;
        self
    }

    pub fn bitmask(mut self, mask: &str, op: BitwiseOp) -> Self {
        self.spec = self.spec.with_bitmask(mask, op);
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.spec = self.spec.with_script(script);
        self
    }

    pub fn format(mut self, template: &str) -> Self {
        self.spec = self.spec.with_format(template);
        self
    }

    pub fn uncached(mut self) -> Self {
        self.spec.disable_caching = true;
        self
    }

    pub fn build(self) -> MemoryAddressSpec {
        self.spec
    }
}

/// Memory profile polling `game.exe`
pub fn memory_profile(outputs: Vec<MemoryAddressSpec>) -> MemoryProfile {
    MemoryProfile {
        process: "game.exe".to_string(),
        poll_interval_ms: Some(5),
        outputs,
    }
}

/// Builder for game profiles
pub struct GameBuilder {
    profile: GameProfile,
}

impl GameBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            profile: GameProfile {
                name: name.to_string(),
                ..GameProfile::default()
            },
        }
    }

    pub fn memory(mut self, file: &str) -> Self {
        self.profile.memory_file = Some(file.to_string());
        self
    }

    pub fn messages(mut self, file: &str) -> Self {
        self.profile.message_file = Some(file.to_string());
        self
    }

    pub fn row(mut self, key: &str, device_type: DeviceType, device: &str, channel: ChannelRef) -> Self {
        self.profile
            .outputs
            .push(OutputMapping::new(key).routed_to(device_type, device, channel));
        self
    }

    pub fn build(self) -> GameProfile {
        self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_builder() {
        let spec = AddressBuilder::new("speed")
            .offset("0x2000")
            .value_type(ValueType::Float)
            .build();

        assert_eq!(spec.label, "speed");
        assert_eq!(spec.offset.as_deref(), Some("0x2000"));
        assert_eq!(spec.value_type, ValueType::Float);
    }
}

//! Address resolution
//!
//! Turns a [`MemoryAddressSpec`] into a concrete address in the target
//! process for one read cycle.
//!
//! # Literal syntax
//!
//! - `0x1A2B`, `0X1a2b`, `$1A2B` and bare `1A2B` are hexadecimal
//! - `#6699` is decimal
//! - offsets may carry a leading `-`
//!
//! Bare digits are hex, matching the convention of memory scanners that
//! users copy addresses from, so `1000` and `0x1000` are the same address.
//!
//! # Pointer chains
//!
//! With `pointer_offsets = [o1, .., oN]` the base address is dereferenced
//! N times: `addr = read_ptr(addr) + o_i` for each offset in order. A failed
//! or null dereference aborts with [`MemoryError::PointerChainBroken`]
//! without touching the remaining levels.

use super::process_trait::ProcessMemory;
use crate::error::MemoryError;
use crate::types::{AddressMode, MemoryAddressSpec, ResolvedAddress};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Parse an unsigned address literal
pub fn parse_address(literal: &str) -> Result<u64, MemoryError> {
    let s = literal.trim();
    let invalid = || MemoryError::InvalidAddressFormat(literal.to_string());

    let (digits, radix) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = s.strip_prefix('$') {
        (rest, 16)
    } else if let Some(rest) = s.strip_prefix('#') {
        (rest, 10)
    } else {
        (s, 16)
    };

    let digits = digits.replace('_', "");
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(invalid());
    }
    u64::from_str_radix(&digits, radix).map_err(|_| invalid())
}

/// Parse a signed offset literal (same syntax as addresses, optional `-`)
pub fn parse_offset(literal: &str) -> Result<i64, MemoryError> {
    let s = literal.trim();
    let (negative, magnitude) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let value = parse_address(magnitude)
        .map_err(|_| MemoryError::InvalidAddressFormat(literal.to_string()))?;
    let value = i64::try_from(value)
        .map_err(|_| MemoryError::InvalidAddressFormat(literal.to_string()))?;
    Ok(if negative { -value } else { value })
}

/// Check that an address fits the target's pointer width
fn fit_pointer(address: u64, pointer_width: usize, literal: &str) -> Result<u64, MemoryError> {
    if pointer_width == 4 && address > u32::MAX as u64 {
        return Err(MemoryError::InvalidAddressFormat(format!(
            "{} does not fit a 32-bit target",
            literal
        )));
    }
    Ok(address)
}

fn apply_offset(address: u64, offset: i64, pointer_width: usize) -> u64 {
    let sum = address.wrapping_add(offset as u64);
    if pointer_width == 4 {
        sum & 0xFFFF_FFFF
    } else {
        sum
    }
}

/// Module base cache scoped to one tick, optionally kept for a bounded time
#[derive(Debug)]
struct ModuleBaseCache {
    ttl: Duration,
    entries: HashMap<String, (u64, Instant)>,
}

impl ModuleBaseCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn begin_tick(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, stored)| !ttl.is_zero() && now.duration_since(*stored) < ttl);
    }

    fn get_or_lookup(
        &mut self,
        module: &str,
        process: &dyn ProcessMemory,
    ) -> Result<u64, MemoryError> {
        let key = module.to_ascii_lowercase();
        if let Some((base, _)) = self.entries.get(&key) {
            return Ok(*base);
        }
        let base = process.module_base(module)?;
        self.entries.insert(key, (base, Instant::now()));
        Ok(base)
    }
}

/// Resolves address specs against a live process
#[derive(Debug)]
pub struct AddressResolver {
    modules: ModuleBaseCache,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl AddressResolver {
    /// Create a resolver; `module_cache_ttl` of zero re-resolves module bases every tick
    pub fn new(module_cache_ttl: Duration) -> Self {
        Self {
            modules: ModuleBaseCache::new(module_cache_ttl),
        }
    }

    /// Start a new tick, expiring module bases older than the TTL
    pub fn begin_tick(&mut self) {
        self.modules.begin_tick(Instant::now());
    }

    /// Resolve the base address (absolute or module+offset) without following pointers
    pub fn resolve_base(
        &mut self,
        spec: &MemoryAddressSpec,
        process: &dyn ProcessMemory,
    ) -> Result<u64, MemoryError> {
        let width = process.pointer_width();
        match spec.addressing()? {
            AddressMode::Absolute(literal) => fit_pointer(parse_address(&literal)?, width, &literal),
            AddressMode::ModuleOffset { module, offset } => {
                let offset = parse_offset(&offset)?;
                let base = self.modules.get_or_lookup(&module, process)?;
                Ok(apply_offset(base, offset, width))
            }
        }
    }

    /// Resolve the final address, following the pointer chain
    pub fn resolve(
        &mut self,
        spec: &MemoryAddressSpec,
        process: &dyn ProcessMemory,
    ) -> Result<ResolvedAddress, MemoryError> {
        // Parse every offset up front so a bad literal fails before any read
        let offsets = spec
            .pointer_offsets
            .iter()
            .map(|o| parse_offset(o))
            .collect::<Result<Vec<_>, _>>()?;

        let width = process.pointer_width();
        let mut address = self.resolve_base(spec, process)?;

        for (level, offset) in offsets.iter().enumerate() {
            let pointer = match process.read_pointer(address) {
                Ok(p) => p,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    return Err(MemoryError::PointerChainBroken {
                        level,
                        address,
                        reason: e.to_string(),
                    })
                }
            };
            if pointer == 0 {
                return Err(MemoryError::PointerChainBroken {
                    level,
                    address,
                    reason: "null pointer".to_string(),
                });
            }
            address = apply_offset(pointer, *offset, width);
        }

        Ok(ResolvedAddress {
            address,
            dereferences: offsets.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_process::MockProcess;
    use crate::types::ValueType;
    use proptest::prelude::*;

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("0X1a2B").unwrap(), 0x1A2B);
        assert_eq!(parse_address("$FF").unwrap(), 0xFF);
        assert_eq!(parse_address("1000").unwrap(), 0x1000);
        assert_eq!(parse_address("#4096").unwrap(), 0x1000);
        assert_eq!(parse_address(" 0x7FF6_0000 ").unwrap(), 0x7FF6_0000);
    }

    #[test]
    fn test_unprefixed_digits_are_hex() {
        assert_eq!(parse_address("4198400").unwrap(), 0x419_8400);
        assert_eq!(parse_address("#4198400").unwrap(), 4_198_400);
        assert_eq!(parse_offset("-#16").unwrap(), -16);
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        for bad in ["", "0x", "xyz", "#12a", "0x-10", "12 34"] {
            assert!(
                matches!(parse_address(bad), Err(MemoryError::InvalidAddressFormat(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(parse_address("0x1_0000_0000_0000_0000").is_err());
    }

    #[test]
    fn test_parse_offset_sign() {
        assert_eq!(parse_offset("-0x10").unwrap(), -16);
        assert_eq!(parse_offset("+8").unwrap(), 8);
        assert_eq!(parse_offset("#12").unwrap(), 12);
    }

    #[test]
    fn test_absolute_out_of_range_for_32_bit() {
        let process = MockProcess::with_pointer_width("game.exe", 1, 4);
        let spec = MemoryAddressSpec::absolute("x", "0x1_0000_0000", ValueType::Int32);
        let err = AddressResolver::default().resolve(&spec, &process).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidAddressFormat(_)));
    }

    #[test]
    fn test_module_offset() {
        let process = MockProcess::new("game.exe", 1).with_module("game.exe", 0x1400_0000);
        let spec = MemoryAddressSpec::module_offset("x", "GAME.EXE", "0x1000", ValueType::Int32);
        let resolved = AddressResolver::default().resolve(&spec, &process).unwrap();
        assert_eq!(resolved.address, 0x1400_1000);
        assert_eq!(resolved.dereferences, 0);
    }

    #[test]
    fn test_missing_module_is_permanent() {
        let process = MockProcess::new("game.exe", 1);
        let spec = MemoryAddressSpec::module_offset("x", "engine.dll", "0x10", ValueType::Int32);
        let err = AddressResolver::default().resolve(&spec, &process).unwrap_err();
        assert_eq!(err, MemoryError::ModuleNotFound("engine.dll".into()));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_pointer_chain() {
        let process = MockProcess::new("game.exe", 1).with_module("game.exe", 0x40_0000);
        // [game.exe+0x100] -> 0x5000; [0x5000 + 0x10] -> 0x9000; final 0x9000 + 0x4
        process.write_pointer(0x40_0100, 0x5000);
        process.write_pointer(0x5010, 0x9000);

        let spec = MemoryAddressSpec::absolute("hp", "game.exe+0x100", ValueType::Int32)
            .with_pointer_offsets(["0x10", "0x4"]);
        process.reset_counters();
        let resolved = AddressResolver::default().resolve(&spec, &process).unwrap();
        assert_eq!(resolved.address, 0x9004);
        assert_eq!(resolved.dereferences, 2);
        assert_eq!(process.read_count(), 2);
    }

    #[test]
    fn test_pointer_chain_short_circuits() {
        let process = MockProcess::new("game.exe", 1);
        process.write_pointer(0x1000, 0x2000);
        // 0x2008 is unmapped so the second dereference fails

        let spec = MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)
            .with_pointer_offsets(["0x8", "0x10", "0x20"]);
        let err = AddressResolver::default().resolve(&spec, &process).unwrap_err();
        match err {
            MemoryError::PointerChainBroken { level, address, .. } => {
                assert_eq!(level, 1);
                assert_eq!(address, 0x2008);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(process.read_count(), 2);
    }

    #[test]
    fn test_null_pointer_breaks_chain() {
        let process = MockProcess::new("game.exe", 1);
        process.write_pointer(0x1000, 0);
        let spec = MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)
            .with_pointer_offsets(["0x8"]);
        assert!(matches!(
            AddressResolver::default().resolve(&spec, &process),
            Err(MemoryError::PointerChainBroken { level: 0, .. })
        ));
    }

    #[test]
    fn test_exited_process_is_fatal_not_broken_chain() {
        let process = MockProcess::new("game.exe", 1);
        process.write_pointer(0x1000, 0x2000);
        process.set_alive(false);
        let spec = MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)
            .with_pointer_offsets(["0x8"]);
        let err = AddressResolver::default().resolve(&spec, &process).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_module_cache_ttl() {
        let process = MockProcess::new("game.exe", 1).with_module("game.exe", 0x40_0000);
        let spec = MemoryAddressSpec::module_offset("x", "game.exe", "0x10", ValueType::Int32);

        let mut per_tick = AddressResolver::default();
        for _ in 0..3 {
            per_tick.begin_tick();
            per_tick.resolve(&spec, &process).unwrap();
            per_tick.resolve(&spec, &process).unwrap();
        }
        // one lookup per tick, shared inside the tick
        assert_eq!(process.module_lookup_count(), 3);

        process.reset_counters();
        let mut cached = AddressResolver::new(Duration::from_secs(60));
        for _ in 0..3 {
            cached.begin_tick();
            cached.resolve(&spec, &process).unwrap();
        }
        assert_eq!(process.module_lookup_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_hex_prefix_equivalence(value in any::<u64>()) {
            let bare = format!("{:X}", value);
            let prefixed = format!("0x{:x}", value);
            let decimal = format!("#{}", value);
            prop_assert_eq!(parse_address(&bare).unwrap(), value);
            prop_assert_eq!(parse_address(&prefixed).unwrap(), value);
            prop_assert_eq!(parse_address(&decimal).unwrap(), value);
        }

        #[test]
        fn prop_module_offset_is_exact(base in 0u64..0x7FFF_0000_0000, offset in 0u64..0x1000_0000) {
            let process = MockProcess::new("game.exe", 1).with_module("game.exe", base);
            let spec = MemoryAddressSpec::module_offset("x", "game.exe", format!("0x{:X}", offset), ValueType::Int32);
            let resolved = AddressResolver::default().resolve(&spec, &process).unwrap();
            prop_assert_eq!(resolved.address, base + offset);
        }

        #[test]
        fn prop_chain_dereferences_once_per_offset(depth in 0usize..6) {
            let process = MockProcess::new("game.exe", 1);
            let mut offsets = Vec::new();
            let mut address = 0x1000u64;
            for level in 0..depth {
                let next = 0x10_0000 * (level as u64 + 1);
                process.write_pointer(address, next);
                offsets.push("0x8".to_string());
                address = next + 8;
            }
            let spec = MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)
                .with_pointer_offsets(offsets);
            process.reset_counters();
            let resolved = AddressResolver::default().resolve(&spec, &process).unwrap();
            prop_assert_eq!(resolved.dereferences, depth);
            prop_assert_eq!(process.read_count(), depth as u64);
            prop_assert_eq!(resolved.address, address);
        }
    }
}

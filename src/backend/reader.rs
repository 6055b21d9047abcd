//! Typed memory reads
//!
//! Reads the byte width of a [`ValueType`] from the target and decodes it in
//! the host's native byte order. Integers decode to `i128` so `UInt64` and
//! `Int64` keep every bit.

use super::process_trait::ProcessMemory;
use crate::error::MemoryError;
use crate::types::{OutputValue, ValueType};

/// Decode bytes read for `value_type`
///
/// `bytes` must be at least `value_type.size_bytes(..)` long; shorter input
/// yields `None`.
pub fn decode(bytes: &[u8], value_type: ValueType) -> Option<OutputValue> {
    macro_rules! int {
        ($t:ty) => {{
            let raw: [u8; std::mem::size_of::<$t>()] =
                bytes.get(..std::mem::size_of::<$t>())?.try_into().ok()?;
            OutputValue::Integer(<$t>::from_ne_bytes(raw) as i128)
        }};
    }

    Some(match value_type {
        ValueType::Int8 => int!(i8),
        ValueType::UInt8 | ValueType::Byte => int!(u8),
        ValueType::Int16 => int!(i16),
        ValueType::UInt16 => int!(u16),
        ValueType::Int32 => int!(i32),
        ValueType::UInt32 => int!(u32),
        ValueType::Int64 => int!(i64),
        ValueType::UInt64 => int!(u64),
        ValueType::Float => {
            let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
            OutputValue::Float(f32::from_ne_bytes(raw) as f64)
        }
        ValueType::Double => {
            let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
            OutputValue::Float(f64::from_ne_bytes(raw))
        }
        ValueType::String => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            OutputValue::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
        ValueType::CustomSize(n) => {
            let data = bytes.get(..n.max(1))?;
            if data.len() <= 8 {
                let mut raw = [0u8; 8];
                if cfg!(target_endian = "little") {
                    raw[..data.len()].copy_from_slice(data);
                } else {
                    raw[8 - data.len()..].copy_from_slice(data);
                }
                OutputValue::Integer(u64::from_ne_bytes(raw) as i128)
            } else {
                let hex: Vec<String> = data.iter().map(|b| format!("{:02X}", b)).collect();
                OutputValue::Text(hex.join(" "))
            }
        }
    })
}

/// Reads typed values through a process handle
#[derive(Debug, Default, Clone, Copy)]
pub struct TypedMemoryReader;

impl TypedMemoryReader {
    /// Read `size` raw bytes at `address`
    pub fn read_bytes(
        &self,
        process: &dyn ProcessMemory,
        address: u64,
        size: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        if address == 0 {
            return Err(MemoryError::InvalidAddress("null address".to_string()));
        }
        let mut buf = vec![0u8; size];
        process.read_memory(address, &mut buf)?;
        Ok(buf)
    }

    /// Read and decode one value
    pub fn read(
        &self,
        process: &dyn ProcessMemory,
        address: u64,
        value_type: ValueType,
        string_length: usize,
    ) -> Result<OutputValue, MemoryError> {
        let size = value_type.size_bytes(string_length);
        let bytes = self.read_bytes(process, address, size)?;
        decode(&bytes, value_type)
            .ok_or(MemoryError::MemoryAccessViolation { address, size })
    }
}

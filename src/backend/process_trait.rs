//! ProcessMemory trait for unified foreign-process access
//!
//! This module provides a common trait for reading another process's address
//! space, enabling both the native implementation (process-memory/sysinfo)
//! and the in-memory mock used by tests.

use crate::error::MemoryError;

/// Read access to a target process
///
/// A handle is owned by exactly one polling session (or one single-shot
/// read) at a time; implementations only need to be safe for the
/// scheduler's reader thread and the thread that created them.
pub trait ProcessMemory: Send + Sync {
    /// Operating system process id
    fn pid(&self) -> u32;

    /// Executable name the handle was opened for
    fn name(&self) -> &str;

    /// Size of a pointer in the target (4 or 8)
    fn pointer_width(&self) -> usize;

    /// Whether the process is still running
    fn is_alive(&self) -> bool;

    /// Base address of a loaded module (case-insensitive name match)
    fn module_base(&self, module: &str) -> Result<u64, MemoryError>;

    /// Fill `buf` with bytes starting at `address`
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Read a pointer-sized value at `address` in native byte order
    fn read_pointer(&self, address: u64) -> Result<u64, MemoryError> {
        match self.pointer_width() {
            4 => {
                let mut buf = [0u8; 4];
                self.read_memory(address, &mut buf)?;
                Ok(u32::from_ne_bytes(buf) as u64)
            }
            _ => {
                let mut buf = [0u8; 8];
                self.read_memory(address, &mut buf)?;
                Ok(u64::from_ne_bytes(buf))
            }
        }
    }
}

/// Opens process handles by executable name
pub trait ProcessConnector: Send + Sync {
    fn open(&self, process_name: &str) -> Result<Box<dyn ProcessMemory>, MemoryError>;
}

/// Compare process or module names the way Windows does
///
/// Matching ignores ASCII case and tolerates a missing `.exe` suffix on
/// either side, so `Game` matches `game.exe`.
pub fn names_match(actual: &str, wanted: &str) -> bool {
    fn stem(s: &str) -> &str {
        let s = s.trim();
        let at = s.len().saturating_sub(4);
        match (s.get(..at), s.get(at..)) {
            (Some(stem), Some(ext)) if !stem.is_empty() && ext.eq_ignore_ascii_case(".exe") => stem,
            _ => s,
        }
    }
    actual.trim().eq_ignore_ascii_case(wanted.trim()) || stem(actual).eq_ignore_ascii_case(stem(wanted))
}

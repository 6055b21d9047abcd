//! Win32 module enumeration and bitness detection

use crate::error::MemoryError;
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows::Win32::System::Threading::{
    IsWow64Process, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
};

/// Closes the wrapped handle on drop
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn wide_to_string(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}

/// Base address of `module` in process `pid`
pub fn module_base(pid: u32, module: &str) -> Result<u64, MemoryError> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) }
        .map(OwnedHandle)
        .map_err(|e| MemoryError::AccessDenied {
            pid,
            reason: format!("module snapshot failed: {}", e),
        })?;

    let mut entry = MODULEENTRY32W {
        dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
        ..Default::default()
    };

    let mut more = unsafe { Module32FirstW(snapshot.0, &mut entry) }.is_ok();
    while more {
        let name = wide_to_string(&entry.szModule);
        if super::process_trait::names_match(&name, module) {
            return Ok(entry.modBaseAddr as u64);
        }
        more = unsafe { Module32NextW(snapshot.0, &mut entry) }.is_ok();
    }

    Err(MemoryError::ModuleNotFound(module.to_string()))
}

/// Pointer width of process `pid`: 4 under WOW64, otherwise the host width
pub fn pointer_width(pid: u32) -> usize {
    let host = std::mem::size_of::<usize>();
    if host == 4 {
        return 4;
    }
    let Ok(process) = (unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }) else {
        return host;
    };
    let process = OwnedHandle(process);
    let mut wow64 = BOOL(0);
    match unsafe { IsWow64Process(process.0, &mut wow64) } {
        Ok(()) if wow64.as_bool() => 4,
        _ => host,
    }
}

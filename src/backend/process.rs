//! Native process access
//!
//! Attaches to a running process by executable name (sysinfo), reads its
//! memory through `process-memory`, and looks up module bases from the
//! platform: `/proc/<pid>/maps` on Linux (including Wine-hosted games) and
//! a Toolhelp module snapshot on Windows.

use super::process_trait::{names_match, ProcessConnector, ProcessMemory};
use crate::error::MemoryError;
use process_memory::{CopyAddress, ProcessHandle, TryIntoProcessHandle};
use std::io;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// A memory region from `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsRegion {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub path: Option<String>,
}

/// Handle to a live process
pub struct NativeProcess {
    pid: u32,
    name: String,
    handle: ProcessHandle,
    pointer_width: usize,
}

// SAFETY: Windows process HANDLEs are process-wide and ReadProcessMemory may be
// called from any thread; on Linux the handle is a plain pid.
unsafe impl Send for NativeProcess {}
unsafe impl Sync for NativeProcess {}

impl std::fmt::Debug for NativeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProcess")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("pointer_width", &self.pointer_width)
            .finish()
    }
}

impl NativeProcess {
    /// Attach to the first running process whose name matches
    pub fn attach(process_name: &str) -> Result<Self, MemoryError> {
        let pid = find_process(process_name)?;
        Self::open(pid, process_name)
    }

    /// Open a handle to a known pid
    pub fn open(pid: u32, name: &str) -> Result<Self, MemoryError> {
        let handle = (pid as process_memory::Pid)
            .try_into_process_handle()
            .map_err(|e| classify_io_error(&e, pid, 0, 0))?;
        let pointer_width = platform::pointer_width(pid);

        tracing::info!(
            "Attached to {} (pid {}, {}-bit)",
            name,
            pid,
            pointer_width * 8
        );

        Ok(Self {
            pid,
            name: name.to_string(),
            handle,
            pointer_width,
        })
    }
}

impl ProcessMemory for NativeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    fn is_alive(&self) -> bool {
        let pid = Pid::from_u32(self.pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some()
    }

    fn module_base(&self, module: &str) -> Result<u64, MemoryError> {
        platform::module_base(self.pid, module)
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let target = usize::try_from(address).map_err(|_| {
            MemoryError::InvalidAddress(format!("0x{:X} exceeds host pointer width", address))
        })?;
        self.handle
            .copy_address(target, buf)
            .map_err(|e| classify_io_error(&e, self.pid, address, buf.len()))
    }
}

/// Opens [`NativeProcess`] handles
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl ProcessConnector for NativeConnector {
    fn open(&self, process_name: &str) -> Result<Box<dyn ProcessMemory>, MemoryError> {
        Ok(Box::new(NativeProcess::attach(process_name)?))
    }
}

/// Find a running process by executable name
///
/// On Linux the command line is also checked so Wine-hosted `*.exe`
/// processes are found by their Windows name.
pub fn find_process(process_name: &str) -> Result<u32, MemoryError> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut candidates: Vec<u32> = system
        .processes()
        .values()
        .filter(|process| {
            let name = process.name().to_string_lossy();
            names_match(&name, process_name) || platform::cmdline_matches(process.pid().as_u32(), process_name)
        })
        .map(|process| process.pid().as_u32())
        .collect();

    candidates.sort_unstable();
    candidates.dedup();

    candidates
        .first()
        .copied()
        .ok_or_else(|| MemoryError::ProcessNotFound(process_name.to_string()))
}

/// List running processes as `(name, pid)` pairs
pub fn list_processes() -> Vec<(String, u32)> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let mut processes: Vec<(String, u32)> = system
        .processes()
        .values()
        .map(|p| (p.name().to_string_lossy().to_string(), p.pid().as_u32()))
        .collect();
    processes.sort();
    processes
}

/// Parse the text of `/proc/<pid>/maps`
pub fn parse_maps(text: &str) -> Vec<MapsRegion> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (start, end) = parts.first()?.split_once('-')?;
            Some(MapsRegion {
                start: u64::from_str_radix(start, 16).ok()?,
                end: u64::from_str_radix(end, 16).ok()?,
                perms: parts.get(1).unwrap_or(&"").to_string(),
                // Paths may contain spaces
                path: (parts.len() > 5).then(|| parts[5..].join(" ")),
            })
        })
        .collect()
}

/// Lowest mapped address of the module whose file name matches
pub fn module_base_from_maps(regions: &[MapsRegion], module: &str) -> Option<u64> {
    regions
        .iter()
        .filter(|r| {
            r.path
                .as_deref()
                .and_then(|p| p.rsplit(['/', '\\']).next())
                .is_some_and(|file| names_match(file, module))
        })
        .map(|r| r.start)
        .min()
}

/// Map an OS read/open error onto the memory error taxonomy
fn classify_io_error(err: &io::Error, pid: u32, address: u64, size: usize) -> MemoryError {
    use platform::ReadErrorKind;
    match platform::read_error_kind(err) {
        ReadErrorKind::Gone => MemoryError::ProcessNotFound(format!("pid {}: {}", pid, err)),
        ReadErrorKind::Denied => MemoryError::AccessDenied {
            pid,
            reason: err.to_string(),
        },
        ReadErrorKind::Unmapped => MemoryError::MemoryAccessViolation { address, size },
        ReadErrorKind::Other => match err.kind() {
            io::ErrorKind::PermissionDenied => MemoryError::AccessDenied {
                pid,
                reason: err.to_string(),
            },
            io::ErrorKind::NotFound => MemoryError::ProcessNotFound(format!("pid {}", pid)),
            _ => MemoryError::MemoryAccessViolation { address, size },
        },
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{module_base_from_maps, parse_maps};
    use crate::error::MemoryError;
    use std::io;

    pub enum ReadErrorKind {
        Gone,
        Denied,
        Unmapped,
        Other,
    }

    const EPERM: i32 = 1;
    const ESRCH: i32 = 3;
    const EIO: i32 = 5;
    const EACCES: i32 = 13;
    const EFAULT: i32 = 14;

    pub fn read_error_kind(err: &io::Error) -> ReadErrorKind {
        match err.raw_os_error() {
            Some(ESRCH) => ReadErrorKind::Gone,
            Some(EPERM) | Some(EACCES) => ReadErrorKind::Denied,
            Some(EFAULT) | Some(EIO) => ReadErrorKind::Unmapped,
            _ => ReadErrorKind::Other,
        }
    }

    pub fn module_base(pid: u32, module: &str) -> Result<u64, MemoryError> {
        let text = std::fs::read_to_string(format!("/proc/{}/maps", pid)).map_err(|e| {
            match e.kind() {
                io::ErrorKind::NotFound => MemoryError::ProcessNotFound(format!("pid {}", pid)),
                _ => MemoryError::AccessDenied {
                    pid,
                    reason: e.to_string(),
                },
            }
        })?;
        module_base_from_maps(&parse_maps(&text), module)
            .ok_or_else(|| MemoryError::ModuleNotFound(module.to_string()))
    }

    /// ELF class byte of the executable: 1 = 32-bit, 2 = 64-bit
    pub fn pointer_width(pid: u32) -> usize {
        use std::io::Read;

        let fallback = std::mem::size_of::<usize>();
        let mut ident = [0u8; 5];
        let read = std::fs::File::open(format!("/proc/{}/exe", pid))
            .and_then(|mut exe| exe.read_exact(&mut ident));
        match read {
            Ok(()) if ident.starts_with(b"\x7fELF") => match ident[4] {
                1 => 4,
                2 => 8,
                _ => fallback,
            },
            _ => fallback,
        }
    }

    pub fn cmdline_matches(pid: u32, process_name: &str) -> bool {
        let Ok(cmdline) = std::fs::read(format!("/proc/{}/cmdline", pid)) else {
            return false;
        };
        cmdline
            .split(|&b| b == 0)
            .next()
            .map(String::from_utf8_lossy)
            .and_then(|arg0| {
                arg0.rsplit(['/', '\\'])
                    .next()
                    .map(|file| super::names_match(file, process_name))
            })
            .unwrap_or(false)
    }
}

#[cfg(windows)]
mod platform {
    use crate::error::MemoryError;
    use std::io;

    pub enum ReadErrorKind {
        Gone,
        Denied,
        Unmapped,
        Other,
    }

    const ERROR_ACCESS_DENIED: i32 = 5;
    const ERROR_INVALID_HANDLE: i32 = 6;
    const ERROR_INVALID_PARAMETER: i32 = 87;
    const ERROR_PARTIAL_COPY: i32 = 299;
    const ERROR_NOACCESS: i32 = 998;

    pub fn read_error_kind(err: &io::Error) -> ReadErrorKind {
        match err.raw_os_error() {
            Some(ERROR_INVALID_HANDLE) | Some(ERROR_INVALID_PARAMETER) => ReadErrorKind::Gone,
            Some(ERROR_ACCESS_DENIED) => ReadErrorKind::Denied,
            Some(ERROR_PARTIAL_COPY) | Some(ERROR_NOACCESS) => ReadErrorKind::Unmapped,
            _ => ReadErrorKind::Other,
        }
    }

    pub fn module_base(pid: u32, module: &str) -> Result<u64, MemoryError> {
        crate::backend::windows_modules::module_base(pid, module)
    }

    pub fn pointer_width(pid: u32) -> usize {
        crate::backend::windows_modules::pointer_width(pid)
    }

    pub fn cmdline_matches(_pid: u32, _process_name: &str) -> bool {
        false
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod platform {
    use crate::error::MemoryError;
    use std::io;

    #[allow(dead_code)]
    pub enum ReadErrorKind {
        Gone,
        Denied,
        Unmapped,
        Other,
    }

    pub fn read_error_kind(_err: &io::Error) -> ReadErrorKind {
        ReadErrorKind::Other
    }

    pub fn module_base(_pid: u32, module: &str) -> Result<u64, MemoryError> {
        Err(MemoryError::ModuleNotFound(module.to_string()))
    }

    pub fn pointer_width(_pid: u32) -> usize {
        std::mem::size_of::<usize>()
    }

    pub fn cmdline_matches(_pid: u32, _process_name: &str) -> bool {
        false
    }
}

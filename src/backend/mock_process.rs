//! Mock Process Implementation for Testing
//!
//! This module provides an in-memory stand-in for a target process so the
//! resolver, reader and scheduler can be exercised without attaching to a
//! real game.
//!
//! # Features
//!
//! - **Simulated address space**: byte regions keyed by base address
//! - **Modules**: named module bases for module+offset addressing
//! - **Lifecycle**: flip the process to "exited" mid-session
//! - **Instrumentation**: read counters and injectable read latency
//!
//! Clones share state, so a test can keep a handle to poke memory while the
//! scheduler owns another.
//!
//! # Example
//!
//! ```ignore
//! use plynk_rs::backend::MockProcess;
//!
//! let process = MockProcess::new("game.exe", 4242)
//!     .with_module("game.exe", 0x40_0000);
//! process.write_i32(0x40_1000, 42);
//! ```

use super::process_trait::{names_match, ProcessConnector, ProcessMemory};
use crate::error::MemoryError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug)]
struct MockState {
    pid: u32,
    name: String,
    pointer_width: usize,
    memory: RwLock<BTreeMap<u64, Vec<u8>>>,
    modules: RwLock<HashMap<String, u64>>,
    alive: AtomicBool,
    access_denied: AtomicBool,
    reads: AtomicU64,
    module_lookups: AtomicU64,
    read_latency: Mutex<Duration>,
}

/// In-memory process with shared, mutable state
#[derive(Debug, Clone)]
pub struct MockProcess {
    state: Arc<MockState>,
}

impl MockProcess {
    /// Create a 64-bit mock process with an empty address space
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self::with_pointer_width(name, pid, 8)
    }

    /// Create a mock process with the given pointer width (4 or 8)
    pub fn with_pointer_width(name: impl Into<String>, pid: u32, pointer_width: usize) -> Self {
        Self {
            state: Arc::new(MockState {
                pid,
                name: name.into(),
                pointer_width,
                memory: RwLock::new(BTreeMap::new()),
                modules: RwLock::new(HashMap::new()),
                alive: AtomicBool::new(true),
                access_denied: AtomicBool::new(false),
                reads: AtomicU64::new(0),
                module_lookups: AtomicU64::new(0),
                read_latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Builder: register a module base
    pub fn with_module(self, module: impl Into<String>, base: u64) -> Self {
        self.set_module(module, base);
        self
    }

    /// Register or move a module base
    pub fn set_module(&self, module: impl Into<String>, base: u64) {
        if let Ok(mut modules) = self.state.modules.write() {
            modules.insert(module.into(), base);
        }
    }

    /// Unload a module
    pub fn remove_module(&self, module: &str) {
        if let Ok(mut modules) = self.state.modules.write() {
            modules.retain(|name, _| !names_match(name, module));
        }
    }

    /// Write raw bytes at `address`, mapping a new region if needed
    pub fn write_bytes(&self, address: u64, bytes: &[u8]) {
        let Ok(mut memory) = self.state.memory.write() else {
            return;
        };
        // Overwrite inside an existing region when the write fits
        if let Some((&base, region)) = memory.range_mut(..=address).next_back() {
            let offset = (address - base) as usize;
            if offset + bytes.len() <= region.len() {
                region[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        memory.insert(address, bytes.to_vec());
    }

    pub fn write_u8(&self, address: u64, value: u8) {
        self.write_bytes(address, &[value]);
    }

    pub fn write_i32(&self, address: u64, value: i32) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    pub fn write_u32(&self, address: u64, value: u32) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    pub fn write_u64(&self, address: u64, value: u64) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    pub fn write_f32(&self, address: u64, value: f32) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    pub fn write_f64(&self, address: u64, value: f64) {
        self.write_bytes(address, &value.to_ne_bytes());
    }

    /// Write a pointer using this process's pointer width
    pub fn write_pointer(&self, address: u64, target: u64) {
        if self.state.pointer_width == 4 {
            self.write_u32(address, target as u32);
        } else {
            self.write_u64(address, target);
        }
    }

    /// Remove the region starting at `address`
    pub fn unmap(&self, address: u64) {
        if let Ok(mut memory) = self.state.memory.write() {
            memory.remove(&address);
        }
    }

    /// Simulate the process exiting (or coming back)
    pub fn set_alive(&self, alive: bool) {
        self.state.alive.store(alive, Ordering::SeqCst);
    }

    /// Make every read fail with `AccessDenied`
    pub fn set_access_denied(&self, denied: bool) {
        self.state.access_denied.store(denied, Ordering::SeqCst);
    }

    /// Delay every read by `latency`
    pub fn set_read_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.state.read_latency.lock() {
            *l = latency;
        }
    }

    /// Number of `read_memory` calls so far
    pub fn read_count(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Number of `module_base` calls so far
    pub fn module_lookup_count(&self) -> u64 {
        self.state.module_lookups.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.state.reads.store(0, Ordering::SeqCst);
        self.state.module_lookups.store(0, Ordering::SeqCst);
    }
}

impl ProcessMemory for MockProcess {
    fn pid(&self) -> u32 {
        self.state.pid
    }

    fn name(&self) -> &str {
        &self.state.name
    }

    fn pointer_width(&self) -> usize {
        self.state.pointer_width
    }

    fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    fn module_base(&self, module: &str) -> Result<u64, MemoryError> {
        self.state.module_lookups.fetch_add(1, Ordering::SeqCst);
        if !self.is_alive() {
            return Err(MemoryError::ProcessNotFound(self.state.name.clone()));
        }
        let modules = self
            .state
            .modules
            .read()
            .map_err(|_| MemoryError::ModuleNotFound(module.to_string()))?;
        modules
            .iter()
            .find(|(name, _)| names_match(name, module))
            .map(|(_, base)| *base)
            .ok_or_else(|| MemoryError::ModuleNotFound(module.to_string()))
    }

    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);

        let latency = self
            .state
            .read_latency
            .lock()
            .map(|l| *l)
            .unwrap_or(Duration::ZERO);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if !self.is_alive() {
            return Err(MemoryError::ProcessNotFound(self.state.name.clone()));
        }
        if self.state.access_denied.load(Ordering::SeqCst) {
            return Err(MemoryError::AccessDenied {
                pid: self.state.pid,
                reason: "mock access denied".to_string(),
            });
        }

        let violation = MemoryError::MemoryAccessViolation {
            address,
            size: buf.len(),
        };
        let memory = self.state.memory.read().map_err(|_| violation.clone())?;
        let (&base, region) = memory.range(..=address).next_back().ok_or(violation.clone())?;
        let offset = (address - base) as usize;
        if offset + buf.len() > region.len() {
            return Err(violation);
        }
        buf.copy_from_slice(&region[offset..offset + buf.len()]);
        Ok(())
    }
}

/// Connector that hands out registered mock processes by name
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    processes: Arc<RwLock<Vec<MockProcess>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a process
    pub fn with_process(self, process: MockProcess) -> Self {
        if let Ok(mut processes) = self.processes.write() {
            processes.push(process);
        }
        self
    }
}

impl ProcessConnector for MockConnector {
    fn open(&self, process_name: &str) -> Result<Box<dyn ProcessMemory>, MemoryError> {
        let processes = self
            .processes
            .read()
            .map_err(|_| MemoryError::ProcessNotFound(process_name.to_string()))?;
        processes
            .iter()
            .find(|p| names_match(p.name(), process_name) && p.is_alive())
            .map(|p| Box::new(p.clone()) as Box<dyn ProcessMemory>)
            .ok_or_else(|| MemoryError::ProcessNotFound(process_name.to_string()))
    }
}

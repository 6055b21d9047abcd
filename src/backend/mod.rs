//! Backend module for foreign-process acquisition
//!
//! This module resolves and reads typed values from another process's
//! address space and drives the polling session on background threads.
//! Results are published through crossbeam channels.
//!
//! # Architecture
//!
//! - [`ProcessMemory`] / [`ProcessConnector`] - Handle to a target process and the way to open one
//! - [`AddressResolver`] - Absolute, module+offset and pointer-chain addressing
//! - [`TypedMemoryReader`] - Sized reads decoded per [`ValueType`](crate::types::ValueType)
//! - [`ReadManager`] / [`ValueCache`] - Batched reads and unchanged-value reuse
//! - [`PollingScheduler`] - Timer/reader threads, skip accounting, adaptive throttle
//!
//! # Components
//!
//! - [`NativeProcess`] - `process-memory` handle with `sysinfo` discovery
//! - [`MockProcess`] - In-memory process for tests and benchmarks
//!
//! # Example
//!
//! ```ignore
//! use plynk_rs::backend::{NativeConnector, PollingScheduler, ProcessConnector};
//! use plynk_rs::config::AppConfig;
//!
//! let config = AppConfig::default();
//! let scheduler = PollingScheduler::new(config.polling.clone(), transformer);
//! let process = NativeConnector.open("game.exe")?;
//! scheduler.start(process, addresses, None)?;
//!
//! for event in scheduler.events().iter() {
//!     if let PollEvent::Tick { results, stats, .. } = event {
//!         // Forward results
//!     }
//! }
//! ```

pub mod address;
pub mod metrics;
pub mod mock_process;
pub mod process;
pub mod process_trait;
pub mod read_manager;
pub mod reader;
#[cfg(windows)]
pub mod windows_modules;
pub mod worker;

pub use address::{parse_address, parse_offset, AddressResolver};
pub use metrics::{AdaptiveThrottle, PollingMetrics, TickGate};
pub use mock_process::{MockConnector, MockProcess};
pub use process::{find_process, list_processes, NativeConnector, NativeProcess};
pub use process_trait::{names_match, ProcessConnector, ProcessMemory};
pub use read_manager::{PlannedRead, ReadManager, ReadRegion, ValueCache, DEFAULT_GAP_THRESHOLD};
pub use reader::{decode, TypedMemoryReader};
pub use worker::{read_once, PollEvent, PollSession, PollingScheduler, SessionEnd, TickOutcome};

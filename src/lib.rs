//! # plynk-rs: Output Acquisition and Routing Engine
//!
//! Reads live values from a running game (its process memory, or the
//! emulator's output messages), normalizes them into one output stream and
//! routes them to control-panel hardware: PacDrive LED boards, serial
//! microcontrollers and WLED lighting controllers.
//!
//! ## Architecture
//!
//! - **Backend**: Resolves addresses and polls process memory on background threads
//! - **Transform**: Bitmask, invert, Rhai script and display format stages
//! - **Listener**: Decodes packets from the native message pump
//! - **Normalizer**: Merges both sources into keyed outputs
//! - **Dispatch**: Routes outputs to device sinks with change detection
//! - **Communication**: Crossbeam channels between every thread
//!
//! ## Configuration
//!
//! Settings are stored as TOML in the platform-appropriate data directory
//! under `dev.plynk.plynk-rs`, next to the `profiles/` directory:
//!
//! - **Linux**: `~/.local/share/dev.plynk.plynk-rs/`
//! - **macOS**: `~/Library/Application Support/dev.plynk.plynk-rs/`
//! - **Windows**: `%APPDATA%\dev.plynk.plynk-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use plynk_rs::{AppConfig, Runtime};
//!
//! let runtime = Runtime::native(AppConfig::load_or_default(None))?;
//! let session = runtime.start_game("outrun", None);
//!
//! for event in runtime.telemetry().iter() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod normalizer;
pub mod runtime;
pub mod scripting;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use backend::{PollEvent, PollingScheduler, ProcessConnector, ProcessMemory};
pub use config::AppConfig;
pub use dispatch::{DeviceRegistry, DispatchEngine};
pub use error::{PlynkError, Result};
pub use listener::{ListenerStatus, MessageListener};
pub use normalizer::OutputNormalizer;
pub use runtime::{Runtime, TelemetryEvent};
pub use scripting::ScriptEngine;
pub use transform::ValueTransformer;
pub use types::{MemoryAddressSpec, NormalizedOutput, OutputMapping, OutputValue, ReadResult, ValueType};

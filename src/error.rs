//! Error handling for plynk-rs
//!
//! This module defines the error taxonomy shared by the acquisition and
//! dispatch halves of the engine, plus a Result alias for use throughout
//! the crate.
//!
//! Errors carry an [`ErrorClass`] so callers can decide whether to retry
//! on the next tick, mark an address/mapping failed, or tear down the
//! polling session.

use thiserror::Error;

/// How an error should be treated by the scheduler and dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not retried; the offending address or mapping stays failed until reconfigured
    Permanent,
    /// Retried on the next scheduled tick
    Transient,
    /// Ends the polling session
    Fatal,
}

/// Errors raised while resolving or reading foreign process memory
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Pointer chain broken at level {level} (0x{address:X}): {reason}")]
    PointerChainBroken {
        level: usize,
        address: u64,
        reason: String,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Access denied to process {pid}: {reason}")]
    AccessDenied { pid: u32, reason: String },

    #[error("Memory access violation reading {size} bytes at 0x{address:X}")]
    MemoryAccessViolation { address: u64, size: usize },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl MemoryError {
    /// Classify this error for retry/teardown decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            MemoryError::ProcessNotFound(_) => ErrorClass::Fatal,
            MemoryError::MemoryAccessViolation { .. } | MemoryError::PointerChainBroken { .. } => {
                ErrorClass::Transient
            }
            MemoryError::InvalidAddressFormat(_)
            | MemoryError::ModuleNotFound(_)
            | MemoryError::AccessDenied { .. }
            | MemoryError::InvalidAddress(_) => ErrorClass::Permanent,
        }
    }

    /// Whether this error should mark the address failed until reconfigured
    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }

    /// Whether this error means the process handle itself is gone
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

/// Errors raised while routing outputs to device sinks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("WLED profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Device I/O error: {0}")]
    Io(String),

    #[error("Device timeout: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl DispatchError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Timeout(_) | DispatchError::Http(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// The mapping names something that does not exist
    ///
    /// Only a configuration change can fix these, so the mapping is not
    /// retried until the dispatch table is replaced.
    pub fn is_missing_target(&self) -> bool {
        matches!(
            self,
            DispatchError::DeviceNotFound(_) | DispatchError::ProfileNotFound(_)
        )
    }
}

/// Main error type for plynk-rs operations
#[derive(Error, Debug)]
pub enum PlynkError {
    /// Address resolution or memory read errors
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Device dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Errors related to Rhai script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to profile loading
    #[error("Profile error: {0}")]
    Profile(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// A lifecycle operation was requested in the wrong state
    #[error("Invalid state: {0}")]
    State(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PlynkError>,
    },
}

impl PlynkError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PlynkError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        PlynkError::Script(err.to_string())
    }
}

impl From<serde_json::Error> for PlynkError {
    fn from(err: serde_json::Error) -> Self {
        PlynkError::Serialization(err.to_string())
    }
}

/// Result type alias for plynk-rs operations
pub type Result<T> = std::result::Result<T, PlynkError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, MemoryError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PlynkError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PlynkError::from(e).with_context(f()))
    }
}

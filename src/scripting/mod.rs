//! Rhai Scripting for Value Scripts
//!
//! A memory address may carry a one-parameter script that rewrites its
//! value after masking and inversion. Scripts run in a sandboxed Rhai
//! engine: `eval` is disabled and operation, depth and size limits stop
//! runaway scripts.
//!
//! ## Scope
//!
//! - `value` - The value after the bitmask and invert stages
//! - `raw` - The value as read from memory
//!
//! Integers are bound as Rhai `INT` when they fit, otherwise as `FLOAT`.
//!
//! ## Result
//!
//! - A number continues through the format stage
//! - A string short-circuits the pipeline and becomes the final value
//! - A bool becomes 1 or 0
//!
//! ## Helper Functions
//!
//! - `clamp(v, lo, hi)` - Clamp into a range
//! - `map_range(v, in_lo, in_hi, out_lo, out_hi)` - Linear rescale
//! - `deadband(v, center, width)` - Snap to `center` within `width`
//! - `bit(v, n)` - 1 if bit `n` of `v` is set
//!
//! ## Example Scripts
//!
//! Speed in km/h from m/s:
//! ```rhai
//! value * 3.6
//! ```
//!
//! Lamp state from a gear number:
//! ```rhai
//! if value == 0 { "N" } else { value }
//! ```

mod engine;

pub use engine::ScriptEngine;

use crate::error::{PlynkError, Result};
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A compiled value script
#[derive(Clone)]
pub struct CompiledScript {
    ast: AST,
    source: String,
}

impl CompiledScript {
    /// Get the source code of this script
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled scripts to avoid recompilation every tick
#[derive(Default)]
pub struct ScriptCache {
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(&mut self, engine: &Engine, source: &str) -> Result<CompiledScript> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| PlynkError::Script(format!("Compilation error: {}", e)))?;

        let script = CompiledScript {
            ast,
            source: source.to_string(),
        };

        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

/// Create a new shared script cache
pub fn create_shared_cache() -> SharedScriptCache {
    Arc::new(RwLock::new(ScriptCache::new()))
}

//! Rhai Script Engine Implementation
//!
//! Wraps a sandboxed [`rhai::Engine`] with the helper functions available to
//! value scripts and converts between [`OutputValue`] and Rhai's `Dynamic`.

use crate::error::{PlynkError, Result};
use crate::scripting::{create_shared_cache, CompiledScript, SharedScriptCache};
use crate::types::OutputValue;
use rhai::{Dynamic, Engine, EvalAltResult, Scope, FLOAT, INT};

type FnResult = std::result::Result<Dynamic, Box<EvalAltResult>>;

/// The script engine shared by every address's value script
pub struct ScriptEngine {
    engine: Engine,
    cache: SharedScriptCache,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    /// Create a new script engine with its own cache
    pub fn new() -> Self {
        Self::with_cache(create_shared_cache())
    }

    /// Create a new script engine with a shared cache
    pub fn with_cache(cache: SharedScriptCache) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine, cache }
    }

    /// Configure the Rhai engine with helper functions and safety limits
    fn configure_engine(engine: &mut Engine) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(16);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(1_024);
        engine.set_max_array_size(256);
        engine.set_max_map_size(256);
        engine.disable_symbol("eval");

        engine.register_fn("clamp", |v: Dynamic, lo: Dynamic, hi: Dynamic| -> FnResult {
            if let (Ok(v), Ok(lo), Ok(hi)) = (v.as_int(), lo.as_int(), hi.as_int()) {
                return Ok(Dynamic::from_int(v.clamp(lo.min(hi), hi.max(lo))));
            }
            let (v, lo, hi) = (number(&v)?, number(&lo)?, number(&hi)?);
            Ok(Dynamic::from_float(v.clamp(lo.min(hi), hi.max(lo))))
        });

        engine.register_fn(
            "map_range",
            |v: Dynamic, in_lo: Dynamic, in_hi: Dynamic, out_lo: Dynamic, out_hi: Dynamic| -> FnResult {
                let (v, in_lo, in_hi) = (number(&v)?, number(&in_lo)?, number(&in_hi)?);
                let (out_lo, out_hi) = (number(&out_lo)?, number(&out_hi)?);
                if in_hi == in_lo {
                    return Ok(Dynamic::from_float(out_lo));
                }
                Ok(Dynamic::from_float(
                    out_lo + (v - in_lo) * (out_hi - out_lo) / (in_hi - in_lo),
                ))
            },
        );

        engine.register_fn("deadband", |v: Dynamic, center: Dynamic, width: Dynamic| -> FnResult {
            let (fv, fc, fw) = (number(&v)?, number(&center)?, number(&width)?);
            if (fv - fc).abs() <= fw {
                Ok(center)
            } else {
                Ok(v)
            }
        });

        engine.register_fn("bit", |v: INT, n: INT| -> INT {
            if (0..64).contains(&n) {
                (v >> n) & 1
            } else {
                0
            }
        });
    }

    /// Compile a script, reusing the cached AST when the source was seen before
    pub fn compile(&self, source: &str) -> Result<CompiledScript> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| PlynkError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.get_or_compile(&self.engine, source)
    }

    /// Run a compiled script with `value` and `raw` bound in scope
    pub fn execute(
        &self,
        script: &CompiledScript,
        value: &OutputValue,
        raw: &OutputValue,
    ) -> Result<OutputValue> {
        let mut scope = Scope::new();
        scope.push_dynamic("value", to_dynamic(value));
        scope.push_dynamic("raw", to_dynamic(raw));

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &script.ast)
            .map_err(|e| PlynkError::Script(format!("Execution error: {}", e)))?;

        from_dynamic(result)
    }

    /// Compile and run a script in one step
    pub fn eval(&self, source: &str, value: &OutputValue) -> Result<OutputValue> {
        let script = self.compile(source)?;
        self.execute(&script, value, value)
    }

    /// Validate a script without executing it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| PlynkError::Script(format!("Validation error: {}", e)))
    }

    /// Clear the script cache
    pub fn clear_cache(&self) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| PlynkError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.clear();
        Ok(())
    }
}

fn number(d: &Dynamic) -> std::result::Result<FLOAT, Box<EvalAltResult>> {
    if let Ok(i) = d.as_int() {
        Ok(i as FLOAT)
    } else if let Ok(f) = d.as_float() {
        Ok(f)
    } else {
        Err(format!("expected a number, got {}", d.type_name()).into())
    }
}

fn to_dynamic(value: &OutputValue) -> Dynamic {
    match value {
        OutputValue::Integer(i) => match INT::try_from(*i) {
            Ok(i) => Dynamic::from_int(i),
            Err(_) => Dynamic::from_float(*i as FLOAT),
        },
        OutputValue::Float(f) => Dynamic::from_float(*f),
        OutputValue::Text(s) => Dynamic::from(s.clone()),
    }
}

fn from_dynamic(result: Dynamic) -> Result<OutputValue> {
    if let Ok(i) = result.as_int() {
        return Ok(OutputValue::Integer(i as i128));
    }
    if let Ok(f) = result.as_float() {
        return Ok(OutputValue::Float(f));
    }
    if let Ok(b) = result.as_bool() {
        return Ok(OutputValue::Integer(b as i128));
    }
    if result.is_string() {
        return result
            .into_immutable_string()
            .map(|s| OutputValue::Text(s.to_string()))
            .map_err(|t| PlynkError::Script(format!("Unexpected result type {}", t)));
    }
    Err(PlynkError::Script(format!(
        "Script must return a number or string, got {}",
        result.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, value: OutputValue) -> Result<OutputValue> {
        ScriptEngine::new().eval(source, &value)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            eval("value * 2", OutputValue::Integer(21)).unwrap(),
            OutputValue::Integer(42)
        );
        assert_eq!(
            eval("value * 2.5", OutputValue::Integer(10)).unwrap(),
            OutputValue::Float(25.0)
        );
    }

    #[test]
    fn test_string_result() {
        assert_eq!(
            eval(r#"if value > 100 { "HIGH" } else { "LOW" }"#, OutputValue::Integer(150)).unwrap(),
            OutputValue::Text("HIGH".into())
        );
    }

    #[test]
    fn test_bool_result() {
        assert_eq!(
            eval("value > 5.0", OutputValue::Float(6.5)).unwrap(),
            OutputValue::Integer(1)
        );
    }

    #[test]
    fn test_top_level_return() {
        assert_eq!(
            eval("return value + 1;", OutputValue::Integer(1)).unwrap(),
            OutputValue::Integer(2)
        );
    }

    #[test]
    fn test_raw_in_scope() {
        let engine = ScriptEngine::new();
        let script = engine.compile("raw - value").unwrap();
        let out = engine
            .execute(&script, &OutputValue::Integer(-5), &OutputValue::Integer(5))
            .unwrap();
        assert_eq!(out, OutputValue::Integer(10));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(
            eval("clamp(value, 0, 100)", OutputValue::Integer(150)).unwrap(),
            OutputValue::Integer(100)
        );
        assert_eq!(
            eval("map_range(value, 0, 255, 0, 100)", OutputValue::Integer(255)).unwrap(),
            OutputValue::Float(100.0)
        );
        assert_eq!(
            eval("deadband(value, 0, 2)", OutputValue::Integer(1)).unwrap(),
            OutputValue::Integer(0)
        );
        assert_eq!(
            eval("bit(value, 3)", OutputValue::Integer(0b1000)).unwrap(),
            OutputValue::Integer(1)
        );
    }

    #[test]
    fn test_eval_is_disabled() {
        assert!(eval(r#"eval("40 + 2")"#, OutputValue::Integer(0)).is_err());
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let err = eval("let x = 0; loop { x += 1; }", OutputValue::Integer(0)).unwrap_err();
        assert!(matches!(err, PlynkError::Script(_)));
    }

    #[test]
    fn test_unsupported_result() {
        assert!(eval("[1, 2]", OutputValue::Integer(0)).is_err());
    }
}

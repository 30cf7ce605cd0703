//! Compiler configuration for extensibility (§1 "Configuration").
//!
//! Instead of a symbol name an embedder links against, a [`NativeBinding`]
//! carries the actual [`matiria_runtime::NativeFn`] to run, since there is
//! no separate link step here.
//!
//! ```rust,ignore
//! let config = CompilerConfig::new()
//!     .with_binding(NativeBinding::new("clock_ms", clock_signature, native_clock_ms));
//! ```

use std::path::PathBuf;

use matiria_runtime::NativeFn;

use crate::types::Type;

/// One `NativeFnDecl` binding: the name it's declared under in source,
/// the function type the validator checks calls against, and the actual
/// entry point the runtime dispatches to.
#[derive(Clone)]
pub struct NativeBinding {
    pub name: String,
    pub signature: Type,
    pub entry: NativeFn,
}

impl NativeBinding {
    pub fn new(name: impl Into<String>, signature: Type, entry: NativeFn) -> Self {
        NativeBinding { name: name.into(), signature, entry }
    }
}

/// Configuration for the `matiriac` compiler/runtime pipeline.
///
/// Allows an embedder to extend the language with additional native
/// functions without modifying the compiler itself.
#[derive(Clone, Default)]
pub struct CompilerConfig {
    pub native_bindings: Vec<NativeBinding>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Add a native binding (builder pattern).
    pub fn with_binding(mut self, binding: NativeBinding) -> Self {
        self.native_bindings.push(binding);
        self
    }

    pub fn with_bindings(mut self, bindings: impl IntoIterator<Item = NativeBinding>) -> Self {
        self.native_bindings.extend(bindings);
        self
    }

    /// Names of every bound native, for the validator's global pass.
    pub fn binding_names(&self) -> Vec<&str> {
        self.native_bindings.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Run-time knobs read from CLI flags (`--stack-capacity`), separate from
/// [`CompilerConfig`] because they govern execution, not compilation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub stack_capacity: usize,
    pub source_path: PathBuf,
}

impl RunConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        RunConfig {
            stack_capacity: matiria_runtime::stack::DEFAULT_CAPACITY,
            source_path: source_path.into(),
        }
    }

    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;
    use matiria_runtime::{RuntimeError, Value};

    fn dummy(_args: &[Value]) -> Result<Value, RuntimeError> {
        Ok(Value::Nil)
    }

    #[test]
    fn config_builder_collects_bindings() {
        let types = TypeRegistry::new();
        let sig = types.function(vec![], types.void());
        let config = CompilerConfig::new()
            .with_binding(NativeBinding::new("a", sig.clone(), dummy))
            .with_binding(NativeBinding::new("b", sig, dummy));
        assert_eq!(config.binding_names(), vec!["a", "b"]);
    }

    #[test]
    fn run_config_defaults_to_the_runtime_stack_capacity() {
        let config = RunConfig::new("program.matiria");
        assert_eq!(config.stack_capacity, matiria_runtime::stack::DEFAULT_CAPACITY);
    }
}

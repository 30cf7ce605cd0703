//! Native-function binding interface (§4.6 "Native calls").
//!
//! A `NativeFnDecl` (a `fn` with a `...;` body instead of a block) has no
//! bytecode of its own; calling it dispatches by name into a
//! [`NativeRegistry`] supplied by the embedder. This trades "external
//! builtin satisfied by a linked symbol" for "external builtin satisfied
//! by a Rust closure the embedder registers up front".

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::Value;

pub type NativeFn = fn(&[Value]) -> Result<Value, RuntimeError>;

#[derive(Default)]
pub struct NativeRegistry {
    bindings: HashMap<Rc<str>, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<Rc<str>>, entry: NativeFn) {
        self.bindings.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.bindings.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(args: &[Value]) -> Result<Value, RuntimeError> {
        Ok(args[0].clone())
    }

    #[test]
    fn registered_native_is_retrievable_by_name() {
        let mut registry = NativeRegistry::new();
        registry.register("identity", identity);
        assert!(registry.get("identity").is_some());
        assert!(registry.get("missing").is_none());
    }
}

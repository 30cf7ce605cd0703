//! The executable unit the compiler hands the interpreter: one [`Function`]
//! per `fn`/struct-constructor/closure, collected into a flat [`Package`].
//!
//! This lives in `matiria-runtime` rather than `matiria-compiler` even
//! though `matiria-compiler::codegen` is what builds it, because the
//! dependency edge runs compiler -> runtime (§0): the runtime is the
//! consumer of a `Package` and owns the shape it expects to execute.

use std::rc::Rc;

use matiria_core::Chunk;

#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub arity: u16,
    pub upvalue_count: u16,
    /// `true` for a `NativeFnDecl`/native nested `fn`: `chunk` is empty and
    /// the interpreter dispatches the call through its
    /// [`crate::native::NativeRegistry`] by name instead.
    pub native: bool,
    pub chunk: Chunk,
}

#[derive(Debug)]
pub struct Package {
    pub functions: Vec<Function>,
    /// Function-table index of the global named `main`, if one exists.
    pub entry: Option<u32>,
}

//! Bytecode interpreter for Matiria programs compiled by
//! `matiria-compiler::codegen`.
//!
//! ```ignore
//! let package = matiria_compiler::codegen::Compiler::compile(&program);
//! let natives = matiria_runtime::NativeRegistry::new();
//! let mut vm = matiria_runtime::Vm::new(&package, &natives, matiria_runtime::stack::DEFAULT_CAPACITY);
//! let result = vm.run()?;
//! ```

pub mod error;
pub mod function;
pub mod native;
pub mod object;
pub mod stack;
pub mod value;
pub mod vm;

pub use error::RuntimeError;
pub use function::{Function, Package};
pub use native::{NativeFn, NativeRegistry};
pub use object::{MapKey, Object};
pub use stack::{CallFrame, ValueStack};
pub use value::Value;
pub use vm::Vm;

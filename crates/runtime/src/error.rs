//! Runtime error type (§4.6, §7 "Runtime errors are fatal").
//!
//! Unlike the compiler's [`matiria_core`]-carrying diagnostics, a
//! `RuntimeError` has no span to report: bytecode carries no source
//! location, so the interpreter can only say *what* went wrong, not
//! *where* in the original text. It unwinds straight to `main` as a
//! single value (§1) rather than accumulating like parse/semantic
//! diagnostics do.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    DivisionByZero,
    StackOverflow,
    IndexOutOfBounds { index: i64, len: usize },
    KeyNotFound,
    /// An operation attempted on a value that doesn't support it (e.g.
    /// indexing into a `String`, calling a non-callable).
    InvalidObjectOperation(String),
    /// A `NativeFnDecl` with no registered [`crate::native::NativeFn`]
    /// binding in the `CompilerConfig` it ran with.
    UnboundNative(String),
    ArityMismatch { expected: usize, got: usize },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero => write!(f, "division by zero"),
            RuntimeError::StackOverflow => write!(f, "stack overflow"),
            RuntimeError::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            RuntimeError::KeyNotFound => write!(f, "key not found in map"),
            RuntimeError::InvalidObjectOperation(msg) => write!(f, "{}", msg),
            RuntimeError::UnboundNative(name) => {
                write!(f, "no native binding registered for '{}'", name)
            }
            RuntimeError::ArityMismatch { expected, got } => {
                write!(f, "expected {} argument(s), got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

//! Primitives shared between the Matiria compiler and runtime.
//!
//! Keeping these in their own crate means the compiler and the runtime agree
//! on one definition of "what an opcode is" and "where a token came from"
//! without either crate depending on the other's internals.

pub mod numeric;
pub mod op;
pub mod span;

pub use numeric::NumericRank;
pub use op::{Chunk, Op};
pub use span::{SourceLocation, Span};

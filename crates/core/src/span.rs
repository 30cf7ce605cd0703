//! Source locations for diagnostics.
//!
//! Mirrors the shape of a typical compiler's source-location type: a
//! 0-indexed line/column pair plus a length, so a location can be printed
//! as `file:line:col` or underlined in a snippet.

use std::path::PathBuf;

/// A position-and-length span within a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Line number, 0-indexed.
    pub line: usize,
    /// Start column, 0-indexed.
    pub column: usize,
    /// Length of the span in bytes.
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Span {
            line,
            column,
            length,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// A [`Span`] together with the file it belongs to, for top-level diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: PathBuf, span: Span) -> Self {
        SourceLocation { file, span }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.span)
    }
}

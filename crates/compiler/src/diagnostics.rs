//! Shared diagnostic type for the parser and validator.
//!
//! Both phases accumulate a `Vec<Diagnostic>` behind a had-error flag
//! rather than failing on the first problem (§7): a phase keeps looking
//! for more errors, it just never hands its output to the next phase.

use std::fmt;

use matiria_core::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} (at {})", label, self.message, self.span)
    }
}

/// Accumulates diagnostics with "second error in the same panic window is
/// suppressed" semantics (§7).
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
    panicking: bool,
}

impl DiagnosticBag {
    pub fn push_error(&mut self, message: impl Into<String>, span: Span) {
        if self.panicking {
            return;
        }
        self.panicking = true;
        self.diagnostics.push(Diagnostic::error(message, span));
    }

    pub fn push_warning(&mut self, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::warning(message, span));
    }

    /// Called at a synchronisation point to allow the next error through.
    pub fn resynchronise(&mut self) {
        self.panicking = false;
    }

    pub fn is_panicking(&self) -> bool {
        self.panicking
    }

    pub fn had_error(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

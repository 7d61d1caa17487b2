//! Structured warnings raised while approximating.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// A complex step was requested under an enclosing complex step.
    NestedComplexStep,
    /// Complex step was requested on storage that cannot hold it.
    ComplexStepFallback,
    /// Computed entries fell outside a declared sparsity pattern.
    SparsityMismatch,
    /// A Newton solve stopped before reaching its tolerance.
    NonConvergence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Scope that raised it.
    pub name: String,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.detail)
    }
}

/// Collected diagnostics, in the order they were raised.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, kind: DiagnosticKind, detail: impl Into<String>) {
        self.entries.push(Diagnostic {
            name: name.to_string(),
            kind,
            detail: detail.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Formatted `name: detail` lines.
    pub fn messages(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

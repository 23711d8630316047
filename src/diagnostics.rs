//! Spanned, classified diagnostics shared by every pass.

use std::fmt::Display;

/// A line/column position in a source file. Both components are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{line}:{column}")]
pub struct Span {
    /// The 1-based line number.
    pub line: u32,
    /// The 1-based column number.
    pub column: u32,
}

impl Span {
    /// A span for diagnostics that are not anchored to a concrete token,
    /// such as whole-file checks.
    pub const FILE: Span = Span { line: 1, column: 1 };

    /// Creates a span at the given line and column.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// The pass (and therefore the classification) a diagnostic originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    /// Scanner-level invalidity.
    #[display("lexical")]
    Lexical,
    /// Grammar-level invalidity.
    #[display("syntactic")]
    Syntactic,
    /// A post-parse restriction the grammar cannot express.
    #[display("weeder")]
    Weeder,
    /// Name resolution or import conflicts.
    #[display("environment")]
    Environment,
    /// Class/interface graph violations.
    #[display("hierarchy")]
    Hierarchy,
    /// Expression typing, assignability, or overload resolution failures.
    #[display("type")]
    Type,
    /// Reachability analysis findings.
    #[display("reachability")]
    Reachability,
    /// A local read on some path before being assigned.
    #[display("definite-assignment")]
    DefiniteAssignment,
    /// An inconsistency that earlier passes should have ruled out.
    #[display("internal")]
    Internal,
}

/// Whether a diagnostic rejects the program or merely annotates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The program is rejected.
    Error,
    /// The program still compiles; the process exits with the warning code.
    Warning,
}

/// A single classified finding, anchored to a file and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The source file the finding is anchored to.
    pub file: String,
    /// The position within [`file`](Self::file).
    pub span: Span,
    /// The classification of the finding.
    pub kind: ErrorKind,
    /// Whether the finding rejects the program.
    pub severity: Severity,
    /// Human-readable description. Advisory only; the exit code is the contract.
    pub message: String,
}

impl Diagnostic {
    /// Creates an error diagnostic.
    pub fn error(file: impl Into<String>, span: Span, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            span,
            kind,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    /// Creates a warning diagnostic.
    pub fn warning(
        file: impl Into<String>,
        span: Span,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            span,
            kind,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    /// Whether this diagnostic rejects the program.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}:{}: {tag}[{}]: {}",
            self.file, self.span, self.kind, self.message
        )
    }
}

/// An accumulating list of diagnostics for one pass.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Whether any recorded diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    /// Whether nothing at all has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All recorded diagnostics, in report order.
    #[must_use]
    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Consumes the collection, yielding the recorded diagnostics.
    #[must_use]
    pub fn into_items(self) -> Vec<Diagnostic> {
        self.items
    }

    /// Moves all diagnostics of `other` into `self`.
    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }
}

/// A fatal inconsistency inside the compiler itself.
///
/// Raised when a later pass observes a state that the preceding passes
/// guarantee impossible. Mapped to the internal-error exit code by the driver.
#[derive(Debug, thiserror::Error)]
#[error("internal compiler error: {0}")]
pub struct InternalError(pub String);

/// Shorthand for raising an [`InternalError`] with a formatted message.
macro_rules! internal_error {
    ($($arg:tt)*) => {
        return Err($crate::diagnostics::InternalError(format!($($arg)*)))
    };
}
pub(crate) use internal_error;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_carries_file_span_and_kind() {
        let d = Diagnostic::error("A.java", Span::new(3, 14), ErrorKind::Type, "bad operand");
        assert_eq!(d.to_string(), "A.java:3:14: error[type]: bad operand");
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let mut ds = Diagnostics::new();
        ds.push(Diagnostic::warning(
            "A.java",
            Span::FILE,
            ErrorKind::Reachability,
            "unreachable statement",
        ));
        assert!(!ds.has_errors());
        ds.push(Diagnostic::error(
            "A.java",
            Span::FILE,
            ErrorKind::Weeder,
            "final method",
        ));
        assert!(ds.has_errors());
    }
}

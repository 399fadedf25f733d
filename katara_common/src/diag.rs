//! Diagnostics carried through the pipeline from source positions to printed
//! issue reports: a `Position`/`Location`/`Severity`/`Diagnostic` family with
//! no localization support, since every message here is plain English.

use std::fmt;
use std::path::PathBuf;

/// A 1-based line/column position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A location in a source file: the file path plus a single anchoring
/// position. IR instructions carry an optional `Location` inherited from
/// the AST node they were built from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub position: Position,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, position: Position) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.position)
    }
}

/// `Warning` lets compilation proceed, `Error` stops after the current
/// phase, `Fatal` stops immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// A single diagnostic: severity, a stable kind name, the location it
/// anchors to, and the offending source line so it can be rendered with a
/// caret under the column at fault.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: String,
    pub message: String,
    pub location: Option<Location>,
    pub source_line: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind: kind.into(),
            message: message.into(),
            location: None,
            source_line: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.source_line = Some(line.into());
        self
    }

    /// Renders `severity[kind]: message at file:line:column`, the source
    /// line, and a caret under the offending column.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.location {
            Some(loc) => {
                out.push_str(&format!(
                    "{}[{}]: {} at {}\n",
                    self.severity, self.kind, self.message, loc
                ));
                if let Some(line) = &self.source_line {
                    out.push_str(&format!("    {line}\n"));
                    let caret_padding = " ".repeat(loc.position.column.saturating_sub(1) + 4);
                    out.push_str(&format!("{caret_padding}^\n"));
                }
            }
            None => {
                out.push_str(&format!("{}[{}]: {}\n", self.severity, self.kind, self.message));
            }
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// An accumulating collection of diagnostics, populated by a pass that
/// continues best-effort after finding a problem (the IR checker never
/// mutates state or stops at the first issue).
#[derive(Debug, Default, Clone)]
pub struct IssueTracker {
    issues: Vec<Diagnostic>,
}

impl IssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.issues.push(diagnostic);
    }

    pub fn issues(&self) -> &[Diagnostic] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|d| d.severity >= Severity::Error)
    }

    pub fn has_fatal(&self) -> bool {
        self.issues.iter().any(|d| d.severity == Severity::Fatal)
    }

    pub fn render_all(&self) -> String {
        self.issues.iter().map(Diagnostic::render).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_caret() {
        let loc = Location::new("foo.k", Position::new(3, 5));
        let d = Diagnostic::new(Severity::Error, "ValueHasNullptrType", "bad value")
            .at(loc)
            .with_source_line("  x := nil");
        let rendered = d.render();
        assert!(rendered.contains("error[ValueHasNullptrType]"));
        assert!(rendered.contains("foo.k:3:5"));
        assert!(rendered.contains('^'));
    }

    #[test]
    fn tracker_severity_ordering() {
        let mut tracker = IssueTracker::new();
        assert!(!tracker.has_errors());
        tracker.add(Diagnostic::new(Severity::Warning, "W", "note"));
        assert!(!tracker.has_errors());
        tracker.add(Diagnostic::new(Severity::Error, "E", "bad"));
        assert!(tracker.has_errors());
        assert!(!tracker.has_fatal());
        tracker.add(Diagnostic::new(Severity::Fatal, "F", "stop"));
        assert!(tracker.has_fatal());
    }
}

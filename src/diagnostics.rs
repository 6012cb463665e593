//! Structured diagnostics and the sinks they are reported through.
//!
//! Task actions never print. Everything they want the user to see goes through
//! an [`OutputDelegate`], either as a [`Diagnostic`] or as raw transcript
//! bytes. The [`DiagnosticsCollector`] keeps the exact sequence so tests can
//! assert on it directly.

use std::fmt::Display;

use camino::Utf8PathBuf;
use console::style;
use serde::{Deserialize, Serialize};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Behavior {
    Error,
    Warning,
    Note,
}

impl Behavior {
    pub fn as_str(self) -> &'static str {
        match self {
            Behavior::Error => "error",
            Behavior::Warning => "warning",
            Behavior::Note => "note",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub path: Utf8PathBuf,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub behavior: Behavior,
    pub message: String,
    pub location: Option<Location>,
    pub children: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(behavior: Behavior, message: impl Into<String>) -> Self {
        Self {
            behavior,
            message: message.into(),
            location: None,
            children: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Behavior::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Behavior::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Behavior::Note, message)
    }

    pub fn at(mut self, path: impl Into<Utf8PathBuf>, line: Option<u32>) -> Self {
        self.location = Some(Location {
            path: path.into(),
            line,
        });
        self
    }

    pub fn with_children(mut self, children: Vec<Diagnostic>) -> Self {
        self.children = children;
        self
    }

    /// Renders the diagnostic with `console` colors for terminal output.
    pub fn styled(&self) -> String {
        let label = match self.behavior {
            Behavior::Error => style("error:").red().bold(),
            Behavior::Warning => style("warning:").yellow().bold(),
            Behavior::Note => style("note:").cyan(),
        };

        let mut out = match &self.location {
            Some(location) => format!("{} {label} {}", render_location(location), self.message),
            None => format!("{label} {}", self.message),
        };

        for child in &self.children {
            out.push_str("\n    ");
            out.push_str(&child.styled());
        }

        out
    }
}

fn render_location(location: &Location) -> String {
    match location.line {
        Some(line) => format!("{}:{line}:", location.path),
        None => format!("{}:", location.path),
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{} ", render_location(location))?;
        }

        write!(f, "{}: {}", self.behavior.as_str(), self.message)?;

        for child in &self.children {
            write!(f, "\n    {child}")?;
        }

        Ok(())
    }
}

/// A diagnostic attributed to a target, or to the workspace when `target` is
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedDiagnostic {
    pub target: Option<String>,
    pub diagnostic: Diagnostic,
}

impl ScopedDiagnostic {
    pub fn new(target: Option<&str>, diagnostic: Diagnostic) -> Self {
        Self {
            target: target.map(str::to_owned),
            diagnostic,
        }
    }
}

impl Display for ScopedDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[{target}] {}", self.diagnostic),
            None => write!(f, "{}", self.diagnostic),
        }
    }
}

/// Receives everything a running task wants to report.
pub trait OutputDelegate {
    fn emit(&mut self, diagnostic: Diagnostic);

    /// Raw bytes for the build transcript (command output, echoed contents).
    fn emit_output(&mut self, bytes: &[u8]);

    fn error(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(Diagnostic::error(message));
    }

    fn warning(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(Diagnostic::warning(message));
    }

    fn note(&mut self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(Diagnostic::note(message));
    }
}

/// Append-only sink that remembers the exact order of everything emitted.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticsCollector {
    pub diagnostics: Vec<Diagnostic>,
    pub transcript: Vec<u8>,
}

impl DiagnosticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, behavior: Behavior) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.behavior == behavior)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Behavior::Error) > 0
    }

    /// Messages of the given severity, in emission order.
    pub fn messages(&self, behavior: Behavior) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|d| d.behavior == behavior)
            .map(|d| d.message.as_str())
            .collect()
    }

    pub fn transcript_lossy(&self) -> String {
        String::from_utf8_lossy(&self.transcript).into_owned()
    }

    /// Replays the collected output into another delegate.
    pub fn forward(self, other: &mut dyn OutputDelegate) {
        if !self.transcript.is_empty() {
            other.emit_output(&self.transcript);
        }
        for diagnostic in self.diagnostics {
            other.emit(diagnostic);
        }
    }
}

impl OutputDelegate for DiagnosticsCollector {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn emit_output(&mut self, bytes: &[u8]) {
        self.transcript.extend_from_slice(bytes);
    }
}

/// Writes diagnostics to stderr and transcript output to stdout.
#[derive(Debug, Default)]
pub struct TerminalOutput;

impl OutputDelegate for TerminalOutput {
    fn emit(&mut self, diagnostic: Diagnostic) {
        eprintln!("{}", diagnostic.styled());
    }

    fn emit_output(&mut self, bytes: &[u8]) {
        use std::io::Write;
        let mut stdout = std::io::stdout().lock();
        // The transcript is best effort; a closed stdout must not fail a task.
        let _ = stdout.write_all(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let diagnostic = Diagnostic::warning("value coerced").at("Info.plist", Some(3));
        assert_eq!(diagnostic.to_string(), "Info.plist:3: warning: value coerced");
    }

    #[test]
    fn test_render_children() {
        let diagnostic = Diagnostic::error("Multiple commands produce '/tmp/a'")
            .with_children(vec![Diagnostic::note("Target 'A' has command"), Diagnostic::note("Target 'B' has command")]);

        assert_eq!(
            diagnostic.to_string(),
            "error: Multiple commands produce '/tmp/a'\n    note: Target 'A' has command\n    note: Target 'B' has command"
        );
    }

    #[test]
    fn test_collector_order_and_forward() {
        let mut first = DiagnosticsCollector::new();
        first.note("a");
        first.error("b");
        first.emit_output(b"out");

        assert!(first.has_errors());
        assert_eq!(first.messages(Behavior::Note), vec!["a"]);

        let mut second = DiagnosticsCollector::new();
        first.forward(&mut second);
        assert_eq!(second.diagnostics.len(), 2);
        assert_eq!(second.transcript_lossy(), "out");
    }
}

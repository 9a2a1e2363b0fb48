//! Compile-time diagnostic collection (spec §7).
//!
//! Diagnostics are tagged `Error`/`Warning`/`Info`, carry a source location,
//! and are de-duplicated by `(location, text)` pair exactly like the
//! original's `QMap<CodeLocation, QSet<QString>> _texts` (see SPEC_FULL §2).

use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CodeLocation {
    pub file: i32,
    pub line: i32,
    pub col: i32,
}

impl CodeLocation {
    pub fn new(line: i32, col: i32) -> Self {
        Self { file: 0, line, col }
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct CodeMessage {
    pub loc: CodeLocation,
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for CodeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{}: {}: {}", self.loc, tag, self.text)
    }
}

/// Ordered diagnostic collector. A compilation succeeds iff
/// `errors_count() == 0`; warnings never fail the build.
#[derive(Debug, Default)]
pub struct CodeMessages {
    messages: Vec<CodeMessage>,
    seen: HashSet<(CodeLocation, String)>,
    errors: usize,
    warnings: usize,
}

impl CodeMessages {
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.errors = 0;
        self.warnings = 0;
    }

    fn add(&mut self, severity: Severity, loc: CodeLocation, text: impl Into<String>) {
        let text = text.into();
        if !self.seen.insert((loc, text.clone())) {
            return;
        }
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => {}
        }
        self.messages.push(CodeMessage { loc, severity, text });
    }

    pub fn error(&mut self, loc: CodeLocation, text: impl Into<String>) {
        self.add(Severity::Error, loc, text);
    }

    pub fn warning(&mut self, loc: CodeLocation, text: impl Into<String>) {
        self.add(Severity::Warning, loc, text);
    }

    pub fn info(&mut self, loc: CodeLocation, text: impl Into<String>) {
        self.add(Severity::Info, loc, text);
    }

    pub fn errors_count(&self) -> usize {
        self.errors
    }

    pub fn warnings_count(&self) -> usize {
        self.warnings
    }

    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    pub fn messages(&self) -> &[CodeMessage] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_message_at_same_location_is_suppressed() {
        let mut m = CodeMessages::default();
        let loc = CodeLocation::new(1, 1);
        m.error(loc, "undeclared symbol");
        m.error(loc, "undeclared symbol");
        assert_eq!(m.errors_count(), 1);
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut m = CodeMessages::default();
        m.warning(CodeLocation::new(1, 1), "types are inconsistent");
        assert!(m.is_success());
    }
}

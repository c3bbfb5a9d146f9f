//! Violation collection.
//!
//! A validation pass reports findings through a [`ViolationSink`]; the
//! [`ViolationCollector`] implementation accumulates them in arrival order
//! and optionally surfaces each one the moment it is received. One collector
//! serves exactly one pass.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a reported violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
    FatalError,
}

impl Severity {
    /// Short lowercase label used in report lines
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::FatalError => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single rule violation observed while validating one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    /// The document under validation when this was reported
    pub document: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl Violation {
    pub fn new(
        severity: Severity,
        document: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Violation {
            severity,
            document: document.into(),
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn warning(document: impl Into<String>, message: impl Into<String>) -> Self {
        Violation::new(Severity::Warning, document, message)
    }

    pub fn error(document: impl Into<String>, message: impl Into<String>) -> Self {
        Violation::new(Severity::Error, document, message)
    }

    pub fn fatal(document: impl Into<String>, message: impl Into<String>) -> Self {
        Violation::new(Severity::FatalError, document, message)
    }

    /// Attach a source position
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(
                f,
                "{}: {}:{}:{}: {}",
                self.severity, self.document, line, column, self.message
            ),
            _ => write!(f, "{}: {}: {}", self.severity, self.document, self.message),
        }
    }
}

/// Where a validation pass reports its findings.
///
/// Implementations must not panic on receipt; the pass continues after
/// warnings and errors and halts only after a fatal error.
pub trait ViolationSink {
    fn warning(&mut self, violation: Violation);
    fn error(&mut self, violation: Violation);
    fn fatal_error(&mut self, violation: Violation);
}

/// The ordered violations of one completed pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationList(Vec<Violation>);

impl ViolationList {
    pub fn new() -> Self {
        ViolationList(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Violation> {
        self.0
    }

    pub fn count_of(&self, severity: Severity) -> usize {
        self.0.iter().filter(|v| v.severity == severity).count()
    }

    pub fn has_fatal(&self) -> bool {
        self.0.iter().any(|v| v.severity == Severity::FatalError)
    }

    /// Messages only, for embedding in per-file results
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|v| v.to_string()).collect()
    }
}

impl fmt::Display for ViolationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.0 {
            writeln!(f, "{}", violation)?;
        }
        Ok(())
    }
}

impl IntoIterator for ViolationList {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ViolationList {
    type Item = &'a Violation;
    type IntoIter = std::slice::Iter<'a, Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Lifecycle of a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Created, nothing received yet
    Idle,
    /// At least one violation received
    Collecting,
    /// Pass ended normally
    Finished,
    /// A fatal error ended the pass; the fatal itself is in the list
    Aborted,
}

/// Callback invoked for every violation as it arrives
pub type ReceiptReporter = Box<dyn FnMut(&Violation) + Send>;

/// Accumulates the violations of a single validation pass.
///
/// After `Finished` or `Aborted` the sink records nothing further.
pub struct ViolationCollector {
    state: CollectorState,
    violations: ViolationList,
    reporter: Option<ReceiptReporter>,
}

impl ViolationCollector {
    pub fn new() -> Self {
        ViolationCollector {
            state: CollectorState::Idle,
            violations: ViolationList::new(),
            reporter: None,
        }
    }

    /// A collector that invokes `reporter` for each violation at receipt
    pub fn with_reporter(reporter: ReceiptReporter) -> Self {
        ViolationCollector {
            state: CollectorState::Idle,
            violations: ViolationList::new(),
            reporter: Some(reporter),
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn is_aborted(&self) -> bool {
        self.state == CollectorState::Aborted
    }

    pub fn violations(&self) -> &ViolationList {
        &self.violations
    }

    /// End the pass. Idle and Collecting become Finished; Aborted stays
    /// Aborted.
    pub fn finish(&mut self) -> &ViolationList {
        match self.state {
            CollectorState::Idle | CollectorState::Collecting => {
                self.state = CollectorState::Finished;
            }
            CollectorState::Finished | CollectorState::Aborted => {}
        }
        &self.violations
    }

    pub fn into_list(self) -> ViolationList {
        self.violations
    }

    fn receive(&mut self, violation: Violation) {
        match self.state {
            CollectorState::Idle => self.state = CollectorState::Collecting,
            CollectorState::Collecting => {}
            CollectorState::Finished | CollectorState::Aborted => return,
        }
        if let Some(reporter) = self.reporter.as_mut() {
            reporter(&violation);
        }
        self.violations.push(violation);
    }
}

impl Default for ViolationCollector {
    fn default() -> Self {
        ViolationCollector::new()
    }
}

impl ViolationSink for ViolationCollector {
    fn warning(&mut self, violation: Violation) {
        self.receive(violation);
    }

    fn error(&mut self, violation: Violation) {
        self.receive(violation);
    }

    fn fatal_error(&mut self, violation: Violation) {
        // The fatal is recorded before the pass unwinds
        self.receive(violation);
        if self.state == CollectorState::Collecting {
            self.state = CollectorState::Aborted;
        }
    }
}

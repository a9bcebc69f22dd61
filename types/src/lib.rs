//! Core domain types for ember.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The engine (`ember-lsp`) and the launch configuration (`ember-config`) both build on it.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod settings;

pub use settings::{
    DEFAULT_BUILD_COMMAND, DEFAULT_MANIFEST, DEFAULT_WATCH_GLOBS, LockedSetting, SETTINGS_SECTION,
    Settings, SettingsConflict, SettingsError,
};

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

// ============================================================================
// Severity
// ============================================================================

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl Severity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    /// Parse the severity word printed by compilers (`error`, `warning`, ...).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "error" | "fatal" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" | "information" | "note" => Some(Self::Information),
            "hint" => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_lsp(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

// ============================================================================
// Diagnostic sources
// ============================================================================

/// Independent analysis sources whose diagnostics are tracked separately.
///
/// Each source fully replaces its own diagnostics on every new result;
/// the aggregator merges them only at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSource {
    Parser,
    Build,
    Analysis,
}

impl DiagnosticSource {
    pub const ALL: [Self; 3] = [Self::Parser, Self::Build, Self::Analysis];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Parser => "parser",
            Self::Build => "build",
            Self::Analysis => "analysis",
        }
    }
}

// ============================================================================
// Spans
// ============================================================================

/// A 1-based line/column pair, as compilers print them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
    pub line: u32,
    pub column: u32,
}

impl Point {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Where a diagnostic points, with whatever precision the producer had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Span {
    /// No position: the diagnostic concerns the file as a whole.
    File,
    /// A whole 1-based line.
    Line(u32),
    /// A single 1-based line/column position.
    Point(Point),
    /// A full range, both ends 1-based.
    Range { start: Point, end: Point },
}

impl Span {
    /// Start of the span, used for ordering. `File` sorts first.
    #[must_use]
    pub fn start(&self) -> Point {
        match *self {
            Self::File => Point::new(0, 0),
            Self::Line(line) => Point::new(line, 0),
            Self::Point(point) | Self::Range { start: point, .. } => point,
        }
    }
}

// ============================================================================
// Diagnostic
// ============================================================================

/// A structured problem report attributable to one source and one file.
///
/// Fields are private; construction goes through [`Diagnostic::new`] and
/// consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    file: PathBuf,
    severity: Severity,
    message: String,
    span: Span,
    source: DiagnosticSource,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        file: impl Into<PathBuf>,
        severity: Severity,
        message: impl Into<String>,
        span: Span,
        source: DiagnosticSource,
    ) -> Self {
        Self {
            file: file.into(),
            severity,
            message: message.into(),
            span,
            source,
        }
    }

    /// Absolute path of the file this diagnostic is attached to.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn span(&self) -> Span {
        self.span
    }

    #[must_use]
    pub fn source(&self) -> DiagnosticSource {
        self.source
    }

    /// Publish ordering: start position first, then severity, then message.
    #[must_use]
    pub fn publish_order(&self, other: &Self) -> Ordering {
        self.span
            .start()
            .cmp(&other.span.start())
            .then_with(|| self.severity.cmp(&other.severity))
            .then_with(|| self.message.cmp(&other.message))
    }

    /// Format as `path:line:col: severity: message` (1-indexed, as compilers print).
    #[must_use]
    pub fn display_with_path(&self) -> String {
        let start = self.span.start();
        format!(
            "{}:{}:{}: {}: [{}] {}",
            self.file.display(),
            start.line,
            start.column,
            self.severity.label(),
            self.source.label(),
            self.message,
        )
    }
}

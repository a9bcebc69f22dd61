//! Collaborator seams: the parser, builder, deep analyzer and providers the
//! engine drives but does not implement.
//!
//! All of them are trait objects so the session can be exercised with fakes.
//! Slow collaborators return boxed futures; the engine spawns them and only
//! ever sees their results as inbound events.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use ember_types::{Diagnostic, Settings};

use crate::command::{CommandAnalyzer, CommandBuilder};
use crate::providers::{Providers, TextProviders};
use crate::syntax::DelimiterChecker;

/// Build future type alias.
pub type BuildFut = Pin<Box<dyn Future<Output = BuildReport> + Send>>;

/// Analysis future type alias.
pub type AnalysisFut = Pin<Box<dyn Future<Output = Result<Vec<Diagnostic>, AnalysisError>> + Send>>;

/// Syntax-checks one document in isolation.
///
/// Must not fail past this boundary: internal problems are reported as
/// diagnostics.
pub trait SyntaxChecker: Send + Sync {
    fn check(&self, text: &str, path: &Path) -> Vec<Diagnostic>;
}

/// Compiles the project.
pub trait Builder: Send + Sync {
    fn build(&self, request: BuildRequest) -> BuildFut;
}

/// Deep static analysis over the output of a finished build.
pub trait Analyzer: Send + Sync {
    fn is_enabled(&self, settings: &Settings) -> bool;
    fn analyze(&self, request: AnalysisRequest) -> AnalysisFut;
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub generation: u64,
    pub project_root: PathBuf,
    pub settings: Arc<Settings>,
}

impl BuildRequest {
    /// Absolute path of the build manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.project_root.join(self.settings.manifest())
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Build generation whose output is analysed.
    pub generation: u64,
    pub project_root: PathBuf,
    pub settings: Arc<Settings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Ok,
    /// Nothing needed compiling.
    Noop,
    Error,
    NoManifest,
    /// The build ended for reasons outside the engine's control (e.g. the
    /// project directory disappeared). Not retried automatically.
    Skipped(String),
    /// The build process terminated abnormally.
    Crashed(String),
}

impl BuildStatus {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Noop => "noop",
            Self::Error => "error",
            Self::NoManifest => "no_manifest",
            Self::Skipped(_) => "skipped",
            Self::Crashed(_) => "crashed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub status: BuildStatus,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    #[must_use]
    pub fn new(status: BuildStatus, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            status,
            diagnostics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis tool could not run: {0}")]
    Unavailable(String),
    #[error("analysis crashed: {0}")]
    Crashed(String),
}

/// The full set of collaborators one session works with.
#[derive(Clone)]
pub struct Toolchain {
    pub syntax: Arc<dyn SyntaxChecker>,
    pub builder: Arc<dyn Builder>,
    pub analyzer: Arc<dyn Analyzer>,
    pub providers: Arc<dyn Providers>,
}

impl Toolchain {
    /// The default collaborators: delimiter checker, command-line builder and
    /// analyzer, text providers.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            syntax: Arc::new(DelimiterChecker),
            builder: Arc::new(CommandBuilder),
            analyzer: Arc::new(CommandAnalyzer),
            providers: Arc::new(TextProviders),
        }
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}

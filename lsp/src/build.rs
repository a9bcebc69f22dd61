//! Build coordinator: at most one build at a time, coalesced follow-ups, and
//! deep analysis chained behind a quiet build.
//!
//! The coordinator never awaits anything itself. Builds and analyses run on
//! spawned tasks and report back through the session's inbound queue as
//! [`BuildFinished`] and [`AnalysisFinished`] events, which the session feeds
//! into [`BuildCoordinator::complete`] and
//! [`BuildCoordinator::complete_analysis`].

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ember_types::{Diagnostic, DiagnosticSource, Settings, Severity, Span};

use crate::ledger::panic_payload_to_string;
use crate::toolchain::{
    AnalysisError, AnalysisRequest, Analyzer, BuildReport, BuildRequest, BuildStatus, Builder,
};

#[derive(Debug)]
pub(crate) struct BuildFinished {
    pub generation: u64,
    pub report: BuildReport,
}

#[derive(Debug)]
pub(crate) struct AnalysisFinished {
    pub generation: u64,
    pub result: Result<Vec<Diagnostic>, AnalysisError>,
}

/// What a build runs against.
#[derive(Debug, Clone)]
pub(crate) struct BuildJob {
    pub project_root: PathBuf,
    pub settings: Arc<Settings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Idle,
    Running { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Started(u64),
    /// A build is running; one follow-up will run after it.
    Coalesced,
}

pub(crate) struct BuildCoordinator<E> {
    state: BuildState,
    rebuild_requested: bool,
    /// Generation of the most recently started build.
    generation: u64,
    /// Latest job; a coalesced follow-up runs against it.
    job: Option<BuildJob>,
    build_task: Option<JoinHandle<()>>,
    analysis_task: Option<JoinHandle<()>>,
    builder: Arc<dyn Builder>,
    analyzer: Arc<dyn Analyzer>,
    events: mpsc::Sender<E>,
}

impl<E> BuildCoordinator<E>
where
    E: From<BuildFinished> + From<AnalysisFinished> + Send + 'static,
{
    pub fn new(builder: Arc<dyn Builder>, analyzer: Arc<dyn Analyzer>, events: mpsc::Sender<E>) -> Self {
        Self {
            state: BuildState::Idle,
            rebuild_requested: false,
            generation: 0,
            job: None,
            build_task: None,
            analysis_task: None,
            builder,
            analyzer,
            events,
        }
    }

    pub fn trigger(&mut self, job: BuildJob) -> Trigger {
        self.job = Some(job.clone());
        match self.state {
            BuildState::Idle => Trigger::Started(self.start(job)),
            BuildState::Running { generation } => {
                tracing::debug!(generation, "build running, rebuild requested");
                self.rebuild_requested = true;
                Trigger::Coalesced
            }
        }
    }

    fn start(&mut self, job: BuildJob) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        self.state = BuildState::Running { generation };
        self.rebuild_requested = false;
        // The build rewrites the artifacts an analysis reads.
        self.abort_analysis();

        let request = BuildRequest {
            generation,
            project_root: job.project_root,
            settings: job.settings,
        };
        tracing::info!(generation, root = %request.project_root.display(), "build started");

        let build = self.builder.build(request);
        let events = self.events.clone();
        self.build_task = Some(tokio::spawn(async move {
            let report = match AssertUnwindSafe(build).catch_unwind().await {
                Ok(report) => report,
                Err(payload) => BuildReport::new(
                    BuildStatus::Crashed(panic_payload_to_string(&payload)),
                    Vec::new(),
                ),
            };
            let _ = events.send(E::from(BuildFinished { generation, report })).await;
        }));
        generation
    }

    /// Apply a finished build. Returns the new build diagnostic set, or `None`
    /// when the current one should be kept.
    pub fn complete(&mut self, finished: BuildFinished) -> Option<Vec<Diagnostic>> {
        let BuildFinished { generation, report } = finished;
        if self.state != (BuildState::Running { generation }) {
            tracing::warn!(generation, "ignoring completion of a build that is not running");
            return None;
        }
        self.state = BuildState::Idle;
        let succeeded = matches!(report.status, BuildStatus::Ok | BuildStatus::Noop);
        let status = report.status.label();
        tracing::info!(generation, status, diagnostics = report.diagnostics.len(), "build finished");

        let job = self.job.clone();
        let diagnostics = match report.status {
            BuildStatus::Ok | BuildStatus::Noop | BuildStatus::Error => Some(report.diagnostics),
            BuildStatus::NoManifest => {
                tracing::warn!(generation, "no build manifest found, nothing to build");
                Some(Vec::new())
            }
            BuildStatus::Crashed(reason) => {
                tracing::error!(generation, "build crashed: {reason}");
                job.as_ref().map(|job| {
                    vec![Diagnostic::new(
                        job.project_root.join(job.settings.manifest()),
                        Severity::Error,
                        format!("build crashed: {reason}"),
                        Span::File,
                        DiagnosticSource::Build,
                    )]
                })
            }
            BuildStatus::Skipped(reason) => {
                tracing::warn!(generation, "build skipped: {reason}");
                return None;
            }
        };

        if self.rebuild_requested {
            if let Some(job) = job {
                self.start(job);
            }
        } else if succeeded
            && let Some(job) = job
            && self.analyzer.is_enabled(&job.settings)
        {
            self.start_analysis(generation, job);
        }
        diagnostics
    }

    fn start_analysis(&mut self, generation: u64, job: BuildJob) {
        self.abort_analysis();
        tracing::info!(generation, "analysis started");
        let analysis = self.analyzer.analyze(AnalysisRequest {
            generation,
            project_root: job.project_root,
            settings: job.settings,
        });
        let events = self.events.clone();
        self.analysis_task = Some(tokio::spawn(async move {
            let result = match AssertUnwindSafe(analysis).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(AnalysisError::Crashed(panic_payload_to_string(&payload))),
            };
            let _ = events.send(E::from(AnalysisFinished { generation, result })).await;
        }));
    }

    fn abort_analysis(&mut self) {
        if let Some(task) = self.analysis_task.take()
            && !task.is_finished()
        {
            tracing::debug!("aborting analysis of a superseded build");
            task.abort();
        }
    }

    /// Apply an analysis result. Returns the new analysis diagnostic set only
    /// when the result belongs to the current build and no build is running.
    pub fn complete_analysis(&mut self, finished: AnalysisFinished) -> Option<Vec<Diagnostic>> {
        let AnalysisFinished { generation, result } = finished;
        if generation != self.generation || self.state != BuildState::Idle {
            tracing::debug!(generation, current = self.generation, "discarding stale analysis");
            return None;
        }
        match result {
            Ok(diagnostics) => {
                tracing::info!(generation, diagnostics = diagnostics.len(), "analysis finished");
                Some(diagnostics)
            }
            Err(e) => {
                tracing::warn!(generation, "analysis failed: {e}");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, BuildState::Running { .. })
    }

    pub fn rebuild_requested(&self) -> bool {
        self.rebuild_requested
    }
}

/// Dropping the coordinator stops its build and analysis; child processes
/// are killed with their futures.
impl<E> Drop for BuildCoordinator<E> {
    fn drop(&mut self) {
        for task in [self.build_task.take(), self.analysis_task.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

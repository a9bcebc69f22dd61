//! Default builder and analyzer: run the configured command in the project
//! root and scrape `path:line[:column]: [severity:] message` lines from its
//! output.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tokio::process::Command;

use ember_types::{Diagnostic, DiagnosticSource, Point, Settings, Severity, Span};

use crate::toolchain::{
    AnalysisError, AnalysisFut, AnalysisRequest, Analyzer, BuildFut, BuildReport, BuildRequest,
    BuildStatus, Builder,
};

/// Builds with `settings.buildCommand`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder;

/// Analyses with `settings.analysisCommand`; disabled when it is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandAnalyzer;

impl Builder for CommandBuilder {
    fn build(&self, request: BuildRequest) -> BuildFut {
        Box::pin(run_build(request))
    }
}

impl Analyzer for CommandAnalyzer {
    fn is_enabled(&self, settings: &Settings) -> bool {
        settings.analysis_enabled() && !settings.analysis_command().is_empty()
    }

    fn analyze(&self, request: AnalysisRequest) -> AnalysisFut {
        Box::pin(run_analysis(request))
    }
}

async fn run_build(request: BuildRequest) -> BuildReport {
    let root = &request.project_root;
    if !root.is_dir() {
        return BuildReport::new(
            BuildStatus::Skipped(format!("project directory {} does not exist", root.display())),
            Vec::new(),
        );
    }
    let manifest = request.manifest_path();
    if !manifest.is_file() {
        return BuildReport::new(BuildStatus::NoManifest, Vec::new());
    }

    let run = match run_command(request.settings.build_command(), root, &request.settings).await {
        Ok(run) => run,
        Err(e) => return BuildReport::new(BuildStatus::Crashed(format!("{e:#}")), Vec::new()),
    };
    // The directory can vanish or be swapped while the build runs.
    if !root.is_dir() {
        return BuildReport::new(
            BuildStatus::Skipped("project directory changed during build".to_string()),
            Vec::new(),
        );
    }

    let mut diagnostics = parse_output(&run.output, root, DiagnosticSource::Build, Severity::Error);
    let status = match run.status.code() {
        None => BuildStatus::Crashed(format!("build terminated abnormally ({})", run.status)),
        Some(0) if run.output.trim().is_empty() => BuildStatus::Noop,
        Some(0) => BuildStatus::Ok,
        Some(code) => {
            if !diagnostics.iter().any(|d| d.severity().is_error()) {
                diagnostics.push(Diagnostic::new(
                    manifest,
                    Severity::Error,
                    format!("build failed with exit code {code}"),
                    Span::File,
                    DiagnosticSource::Build,
                ));
            }
            BuildStatus::Error
        }
    };
    BuildReport::new(status, diagnostics)
}

async fn run_analysis(request: AnalysisRequest) -> Result<Vec<Diagnostic>, AnalysisError> {
    let root = &request.project_root;
    let run = run_command(request.settings.analysis_command(), root, &request.settings)
        .await
        .map_err(|e| AnalysisError::Unavailable(format!("{e:#}")))?;
    if run.status.code().is_none() {
        return Err(AnalysisError::Crashed(format!(
            "analysis terminated abnormally ({})",
            run.status
        )));
    }
    // Analysis tools exit non-zero when they find problems; the output is
    // what counts.
    Ok(parse_output(
        &run.output,
        root,
        DiagnosticSource::Analysis,
        Severity::Warning,
    ))
}

struct CommandRun {
    status: ExitStatus,
    /// stdout followed by stderr.
    output: String,
}

async fn run_command(argv: &[String], root: &Path, settings: &Settings) -> Result<CommandRun> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };
    let resolved = which::which(program).with_context(|| format!("{program} not found in PATH"))?;

    let mut cmd = Command::new(&resolved);
    cmd.args(args)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in settings.env() {
        cmd.env(key, expand_env_vars(value));
    }
    if let Some(build_env) = settings.build_env() {
        cmd.env("MIX_ENV", build_env);
    }
    if let Some(target) = settings.build_target() {
        cmd.env("MIX_TARGET", target);
    }

    tracing::debug!(program = %resolved.display(), ?args, root = %root.display(), "running command");
    let output = cmd
        .output()
        .await
        .with_context(|| format!("running {program}"))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(CommandRun {
        status: output.status,
        output: text,
    })
}

/// Expand `${VAR}` references from the server environment. Unknown variables
/// expand to nothing; an unclosed `${` is kept verbatim.
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        if !name.is_empty()
            && let Some(replacement) = lookup(name)
        {
            out.push_str(&replacement);
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    out
}

fn diagnostic_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(?P<path>[^\s:][^:\n]*\.[A-Za-z0-9]+):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?:(?P<sev>error|warning|warn|info|information|note|hint):\s*)?(?P<msg>\S.*?)\s*$",
        )
        .expect("diagnostic line regex is valid")
    })
}

/// Scrape compiler-style diagnostic lines out of tool output.
pub(crate) fn parse_output(
    output: &str,
    root: &Path,
    source: DiagnosticSource,
    default_severity: Severity,
) -> Vec<Diagnostic> {
    diagnostic_line_regex()
        .captures_iter(output)
        .filter_map(|caps| {
            let path = PathBuf::from(caps.name("path")?.as_str());
            let file = if path.is_absolute() { path } else { root.join(path) };
            let line: u32 = caps.name("line")?.as_str().parse().ok()?;
            let span = match caps.name("col").and_then(|c| c.as_str().parse::<u32>().ok()) {
                Some(column) => Span::Point(Point::new(line, column)),
                None if line == 0 => Span::File,
                None => Span::Line(line),
            };
            let severity = caps
                .name("sev")
                .and_then(|s| Severity::from_label(s.as_str()))
                .unwrap_or(default_severity);
            Some(Diagnostic::new(
                file,
                severity,
                caps.name("msg")?.as_str(),
                span,
                source,
            ))
        })
        .collect()
}

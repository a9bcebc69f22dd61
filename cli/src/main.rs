//! ember - language server binary.
//!
//! Speaks LSP over stdin/stdout. stdout carries protocol frames only, so logs
//! go to `~/.ember/logs/ember.log` (or `./.ember/logs/ember.log`, or stderr
//! as a last resort).
//!
//! ```text
//! main() -> EmberConfig::load() -> init_tracing() -> ember_lsp::serve(stdin, stdout)
//!                                                        |
//!                                                        v
//!                                              process exit code (0 | 1)
//! ```

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::PathBuf,
    process,
    sync::Mutex,
};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ember_config::{ConfigError, EmberConfig};
use ember_lsp::{EngineOptions, Toolchain};

fn init_tracing(configured: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::try_new("info").expect("info filter is valid"));

    let (log_file, init_warnings) = open_ember_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Never stdout: it carries the protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_ember_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in ember_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn ember_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.ember/logs/ember.log
    if let Some(config_path) = EmberConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("ember.log"));
    }

    // Fallback: ./.ember/logs/ember.log
    candidates.push(PathBuf::from(".ember").join("logs").join("ember.log"));

    candidates
}

/// Read the launch configuration. A broken file must not keep the server
/// from starting, so its error is handed back for logging instead.
fn load_config() -> (Option<EmberConfig>, Option<ConfigError>) {
    match EmberConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (None, Some(e)),
    }
}

fn main() -> Result<()> {
    let (config, config_error) = load_config();
    init_tracing(config.as_ref().and_then(EmberConfig::log_filter));
    if let Some(e) = config_error {
        tracing::warn!(path = %e.path().display(), "{e}; using built-in defaults");
    }

    let options = config
        .as_ref()
        .map(EmberConfig::engine_options)
        .unwrap_or_else(EngineOptions::default);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), ?options, "ember starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let code = runtime.block_on(ember_lsp::serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Toolchain::standard(),
        options,
    ));
    tracing::info!(code, "ember exiting");

    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_background();
    process::exit(code);
}

//! Resolved client settings.
//!
//! The raw deserialization struct (`RawSettings`, all fields defaulted) stays
//! private. It is resolved into [`Settings`] at the parse boundary through
//! `#[serde(try_from)]`, so holding a `Settings` proves it was validated.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Configuration section the client stores our settings under.
pub const SETTINGS_SECTION: &str = "ember";

/// Build manifest looked up in the project root when none is configured.
pub const DEFAULT_MANIFEST: &str = "mix.exs";

pub const DEFAULT_BUILD_COMMAND: [&str; 2] = ["mix", "compile"];

pub const DEFAULT_WATCH_GLOBS: [&str; 2] = ["**/*.{ex,exs,erl,hrl}", "**/mix.lock"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("buildCommand must not be empty")]
    EmptyBuildCommand,
    #[error("manifest must not be empty")]
    EmptyManifest,
    #[error("projectDir must be relative to the workspace root: {0}")]
    AbsoluteProjectDir(String),
    #[error("env var name must not be empty")]
    EmptyEnvName,
}

const fn default_true() -> bool {
    true
}

fn default_manifest() -> String {
    DEFAULT_MANIFEST.to_string()
}

fn default_build_command() -> Vec<String> {
    DEFAULT_BUILD_COMMAND.iter().map(ToString::to_string).collect()
}

fn default_watch_globs() -> Vec<String> {
    DEFAULT_WATCH_GLOBS.iter().map(ToString::to_string).collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default, alias = "project_dir")]
    project_dir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default, alias = "build_env")]
    build_env: Option<String>,
    #[serde(default, alias = "build_target")]
    build_target: Option<String>,
    #[serde(default = "default_manifest")]
    manifest: String,
    #[serde(default = "default_build_command", alias = "build_command")]
    build_command: Vec<String>,
    #[serde(default = "default_true", alias = "auto_build")]
    auto_build: bool,
    #[serde(default = "default_true", alias = "analysis_enabled")]
    analysis_enabled: bool,
    #[serde(default, alias = "analysis_command")]
    analysis_command: Vec<String>,
    #[serde(default = "default_watch_globs", alias = "watch_globs")]
    watch_globs: Vec<String>,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            project_dir: None,
            env: BTreeMap::new(),
            build_env: None,
            build_target: None,
            manifest: default_manifest(),
            build_command: default_build_command(),
            auto_build: true,
            analysis_enabled: true,
            analysis_command: Vec::new(),
            watch_globs: default_watch_globs(),
        }
    }
}

/// Validated client settings.
///
/// Invariants: `build_command` and `manifest` are non-empty, `project_dir`
/// (when present) is relative, and no env var name is empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct Settings {
    project_dir: Option<String>,
    env: BTreeMap<String, String>,
    build_env: Option<String>,
    build_target: Option<String>,
    manifest: String,
    build_command: Vec<String>,
    auto_build: bool,
    analysis_enabled: bool,
    analysis_command: Vec<String>,
    watch_globs: Vec<String>,
}

impl TryFrom<RawSettings> for Settings {
    type Error = SettingsError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        if raw.build_command.first().is_none_or(|cmd| cmd.trim().is_empty()) {
            return Err(SettingsError::EmptyBuildCommand);
        }
        if raw.manifest.trim().is_empty() {
            return Err(SettingsError::EmptyManifest);
        }
        let project_dir = raw
            .project_dir
            .map(|dir| dir.trim().to_string())
            .filter(|dir| !dir.is_empty());
        if let Some(dir) = &project_dir
            && (dir.starts_with('/') || dir.starts_with('\\') || dir.contains(':'))
        {
            return Err(SettingsError::AbsoluteProjectDir(dir.clone()));
        }
        if raw.env.keys().any(|key| key.trim().is_empty()) {
            return Err(SettingsError::EmptyEnvName);
        }
        Ok(Self {
            project_dir,
            env: raw.env,
            build_env: raw.build_env.filter(|v| !v.trim().is_empty()),
            build_target: raw.build_target.filter(|v| !v.trim().is_empty()),
            manifest: raw.manifest,
            build_command: raw.build_command,
            auto_build: raw.auto_build,
            analysis_enabled: raw.analysis_enabled,
            analysis_command: raw
                .analysis_command
                .into_iter()
                .filter(|arg| !arg.is_empty())
                .collect(),
            watch_globs: raw.watch_globs,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::try_from(RawSettings::default()).expect("default settings are valid")
    }
}

/// Settings that are applied process-wide and cannot change mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedSetting {
    Env,
    BuildEnv,
    BuildTarget,
    ProjectDir,
}

impl LockedSetting {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::BuildEnv => "buildEnv",
            Self::BuildTarget => "buildTarget",
            Self::ProjectDir => "projectDir",
        }
    }
}

/// Proof that an incoming settings value differs from the applied one in a
/// locked field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsConflict {
    changed: Vec<LockedSetting>,
}

impl SettingsConflict {
    #[must_use]
    pub fn changed(&self) -> &[LockedSetting] {
        &self.changed
    }
}

impl fmt::Display for SettingsConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.changed.iter().map(|s| s.key()).collect();
        write!(f, "locked settings changed: {}", keys.join(", "))
    }
}

impl Settings {
    /// Parse the `ember` section of a configuration payload.
    ///
    /// Accepts either the section itself or an object wrapping it under
    /// [`SETTINGS_SECTION`]. `null` yields the defaults.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let section = payload.get(SETTINGS_SECTION).unwrap_or(payload);
        if section.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(section.clone())
    }

    /// Compare the locked fields against `incoming`.
    ///
    /// Returns `None` when `incoming` can be applied in place.
    #[must_use]
    pub fn conflicts_with(&self, incoming: &Self) -> Option<SettingsConflict> {
        let mut changed = Vec::new();
        if self.env != incoming.env {
            changed.push(LockedSetting::Env);
        }
        if self.build_env != incoming.build_env {
            changed.push(LockedSetting::BuildEnv);
        }
        if self.build_target != incoming.build_target {
            changed.push(LockedSetting::BuildTarget);
        }
        if self.project_dir != incoming.project_dir {
            changed.push(LockedSetting::ProjectDir);
        }
        if changed.is_empty() {
            None
        } else {
            Some(SettingsConflict { changed })
        }
    }

    #[must_use]
    pub fn project_dir(&self) -> Option<&str> {
        self.project_dir.as_deref()
    }

    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[must_use]
    pub fn build_env(&self) -> Option<&str> {
        self.build_env.as_deref()
    }

    #[must_use]
    pub fn build_target(&self) -> Option<&str> {
        self.build_target.as_deref()
    }

    #[must_use]
    pub fn manifest(&self) -> &str {
        &self.manifest
    }

    /// Build argv; the first element is the program.
    #[must_use]
    pub fn build_command(&self) -> &[String] {
        &self.build_command
    }

    #[must_use]
    pub fn auto_build(&self) -> bool {
        self.auto_build
    }

    #[must_use]
    pub fn analysis_enabled(&self) -> bool {
        self.analysis_enabled
    }

    /// Deep-analysis argv. Empty means no analyzer is configured.
    #[must_use]
    pub fn analysis_command(&self) -> &[String] {
        &self.analysis_command
    }

    #[must_use]
    pub fn watch_globs(&self) -> &[String] {
        &self.watch_globs
    }
}

//! Fully resolved configuration for one deployment unit.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cloud::{Auth, Identity};
use crate::error::{Result, RoverError};
use crate::{io, paths};

/// Whether a unit owns the remote state backend or consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Launchpad,
    LandingZone,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Launchpad => "launchpad",
            Mode::LandingZone => "landing_zone",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, user-supplied settings for a unit. Every field is optional here;
/// [`RunConfig::build`] applies defaults and validation.
#[derive(Debug, Clone, Default)]
pub struct RunConfigInput {
    pub launchpad: bool,
    pub source_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
    pub level: Option<String>,
    pub stack: Option<String>,
    pub environment: Option<String>,
    pub state_name: Option<String>,
    pub workspace: Option<String>,
    pub state_subscription: Option<String>,
    pub target_subscription: Option<String>,
    pub dry_run: bool,
    pub data_root: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub mode: Mode,
    pub source_path: PathBuf,
    pub config_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_path: Option<PathBuf>,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub environment_name: String,
    pub state_name: String,
    pub workspace_name: String,
    pub target_subscription: String,
    pub state_subscription: String,
    pub dry_run: bool,
    pub data_dir: PathBuf,
    pub report_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

impl RunConfig {
    /// Validate raw settings and resolve every default.
    ///
    /// The active subscription is only requested from `auth` when one of the
    /// two subscriptions is unset. The caller identity is looked up outside
    /// dry runs on a best-effort basis: a failure is logged, not returned.
    pub fn build(input: RunConfigInput, auth: &dyn Auth) -> Result<Self> {
        let test_path = input.test_path.as_deref().map(resolve_existing).transpose()?;
        let source_path = match (&input.source_path, &test_path) {
            (Some(p), _) => resolve_existing(p)?,
            (None, Some(t)) => t.clone(),
            (None, None) => return Err(RoverError::MissingField("source path")),
        };
        let level = non_empty(input.level).ok_or(RoverError::MissingField("level"))?;
        let config_path = input
            .config_path
            .as_deref()
            .ok_or(RoverError::MissingField("config path"))
            .and_then(resolve_existing)?;

        let state_name = match non_empty(input.state_name) {
            Some(name) => trim_state_suffix(&name),
            None => last_segment(&source_path)?,
        };
        let environment_name = non_empty(input.environment)
            .unwrap_or_else(|| paths::DEFAULT_ENVIRONMENT.to_string());
        let workspace_name =
            non_empty(input.workspace).unwrap_or_else(|| paths::DEFAULT_WORKSPACE.to_string());

        let state_sub = non_empty(input.state_subscription);
        let target_sub = non_empty(input.target_subscription);
        let subscription = if state_sub.is_none() || target_sub.is_none() {
            Some(auth.current_subscription_id()?)
        } else {
            None
        };
        let fallback = || subscription.clone().unwrap_or_default();
        let state_subscription = state_sub.unwrap_or_else(fallback);
        let target_subscription = target_sub.unwrap_or_else(fallback);

        let identity = if input.dry_run {
            None
        } else {
            match auth.current_identity() {
                Ok(identity) => Some(identity),
                Err(e) => {
                    tracing::warn!(error = %e, "could not resolve caller identity");
                    None
                }
            }
        };

        let data_root = match input.data_root {
            Some(root) => std::path::absolute(root)?,
            None => paths::default_data_root(&paths::home_dir()?),
        };
        let data_dir = paths::unit_data_dir(&data_root, &environment_name, &level, &state_name);
        let report_dir = match input.report_dir {
            Some(dir) => std::path::absolute(dir)?,
            None => std::env::current_dir()?,
        };

        Ok(Self {
            mode: if input.launchpad {
                Mode::Launchpad
            } else {
                Mode::LandingZone
            },
            source_path,
            config_path,
            test_path,
            level,
            stack: non_empty(input.stack),
            environment_name,
            state_name,
            workspace_name,
            target_subscription,
            state_subscription,
            dry_run: input.dry_run,
            data_dir,
            report_dir,
            identity,
            subscription,
        })
    }

    pub fn is_launchpad(&self) -> bool {
        self.mode == Mode::Launchpad
    }

    /// Name used in logs and error messages, e.g. `level1/management`.
    pub fn unit_name(&self) -> String {
        format!(
            "{}/{}",
            self.level,
            self.stack.as_deref().unwrap_or(&self.state_name)
        )
    }

    pub fn state_blob_name(&self) -> String {
        paths::state_blob_name(&self.state_name)
    }

    pub fn local_state_path(&self) -> PathBuf {
        paths::local_state_path(&self.data_dir, &self.state_name)
    }

    pub fn plan_path(&self) -> PathBuf {
        paths::plan_path(&self.data_dir, &self.state_name)
    }

    /// Directory the verification suite runs in.
    pub fn test_dir(&self) -> &Path {
        self.test_path.as_deref().unwrap_or(&self.source_path)
    }

    /// Variable files below the configuration directory, sorted.
    pub fn var_files(&self) -> Result<Vec<PathBuf>> {
        io::collect_files(&self.config_path, paths::VAR_FILE_SUFFIXES)
    }

    /// Create the scratch directory on first use.
    pub fn ensure_data_dir(&self) -> Result<&Path> {
        io::ensure_dir(&self.data_dir)?;
        Ok(&self.data_dir)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn trim_state_suffix(name: &str) -> String {
    name.strip_suffix(paths::STATE_SUFFIX)
        .unwrap_or(name)
        .to_string()
}

fn resolve_existing(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    if !absolute.exists() {
        return Err(RoverError::InvalidPath {
            path: absolute,
            reason: "does not exist".into(),
        });
    }
    Ok(absolute)
}

fn last_segment(path: &Path) -> Result<String> {
    match path.file_name().map(|n| n.to_string_lossy().into_owned()) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name),
        _ => Err(RoverError::InvalidPath {
            path: path.to_path_buf(),
            reason: "no final segment to derive a state name from".into(),
        }),
    }
}

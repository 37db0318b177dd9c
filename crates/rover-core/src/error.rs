use std::path::PathBuf;
use thiserror::Error;

use crate::engine::Diagnostic;

#[derive(Debug, Error)]
pub enum RoverError {
    #[error("missing required setting: {0}")]
    MissingField(&'static str),

    #[error("invalid path '{}': {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("malformed action definitions in {}", path.display())]
    Definitions {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("action name '{0}' is already registered")]
    NameCollision(String),

    #[error("group '{group}' references undefined command '{member}'")]
    UnknownGroupMember { group: String, member: String },

    #[error("unknown action '{0}': run 'rover actions' to list available actions")]
    ActionNotFound(String),

    #[error("invalid symphony configuration: {0}")]
    Symphony(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(
        "no remote state backend found for level '{level}' in environment '{environment}': \
         cannot proceed without a deployed launchpad, deploy the launchpad first"
    )]
    LaunchpadNotDeployed { level: String, environment: String },

    #[error(
        "{count} storage accounts are tagged level '{level}' and environment '{environment}': \
         the state backend is ambiguous"
    )]
    AmbiguousBackend {
        level: String,
        environment: String,
        count: usize,
    },

    #[error("backend discovery failed: {0}")]
    Discovery(String),

    #[error(
        "launchpad for level '{level}' in environment '{environment}' has no remote backend: \
         it is already destroyed"
    )]
    LaunchpadAlreadyDestroyed { level: String, environment: String },

    #[error("'{0}' not found on PATH")]
    ToolNotFound(String),

    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("'{program}' exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("terraform {step} failed: {message}")]
    Engine { step: &'static str, message: String },

    #[error("validation failed:{}", render_diagnostics(.0))]
    ValidationFailed(Vec<Diagnostic>),

    #[error("{} file(s) need formatting:{}", .0.len(), render_lines(.0))]
    FormatCheckFailed(Vec<String>),

    #[error("{failed} test(s) failed, report written to {}", report.display())]
    TestsFailed { failed: usize, report: PathBuf },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("blob transfer failed: {0}")]
    BlobTransfer(String),

    #[error("group '{group}' stopped at '{member}': {error}")]
    GroupMemberFailed {
        group: String,
        member: String,
        error: Box<RoverError>,
    },

    #[error("{action} failed for {unit}: {error}")]
    UnitFailed {
        unit: String,
        action: String,
        error: Box<RoverError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RoverError>;

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| {
            if d.detail.is_empty() {
                format!("\n  {}: {}", d.severity, d.summary)
            } else {
                format!("\n  {}: {}: {}", d.severity, d.summary, d.detail)
            }
        })
        .collect()
}

fn render_lines(lines: &[String]) -> String {
    lines.iter().map(|l| format!("\n  {l}")).collect()
}

use crate::error::{Result, RoverError};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const ROVER_DIR: &str = ".rover";
pub const DEFINITIONS_FILE: &str = "commands.yaml";
pub const DATA_DIR: &str = "data";

pub const DEFAULT_ENVIRONMENT: &str = "sandpit";
pub const DEFAULT_WORKSPACE: &str = "tfstate";

/// Backend declaration the engine reads from a unit's source tree.
pub const BACKEND_FILE: &str = "backend.azurerm.tf";
/// Optional template copied to [`BACKEND_FILE`] when a unit attaches.
pub const BACKEND_TEMPLATE: &str = "backend.azurerm";

pub const STATE_SUFFIX: &str = ".tfstate";
pub const PLAN_SUFFIX: &str = ".tfplan";
pub const VAR_FILE_SUFFIXES: &[&str] = &[".tfvars", ".tfvars.json"];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn home_dir() -> Result<PathBuf> {
    home::home_dir().ok_or(RoverError::HomeNotFound)
}

/// Candidate definitions files in precedence order: working directory first,
/// then the user's home.
pub fn definition_candidates(cwd: &Path, home: &Path) -> Vec<PathBuf> {
    vec![
        cwd.join(ROVER_DIR).join(DEFINITIONS_FILE),
        home.join(ROVER_DIR).join(DEFINITIONS_FILE),
    ]
}

pub fn default_data_root(home: &Path) -> PathBuf {
    home.join(ROVER_DIR).join(DATA_DIR)
}

/// Scratch directory for one unit: `<root>/<environment>/<level>/<state>`.
pub fn unit_data_dir(root: &Path, environment: &str, level: &str, state_name: &str) -> PathBuf {
    root.join(environment).join(level).join(state_name)
}

pub fn state_blob_name(state_name: &str) -> String {
    format!("{state_name}{STATE_SUFFIX}")
}

pub fn local_state_path(data_dir: &Path, state_name: &str) -> PathBuf {
    data_dir.join(state_blob_name(state_name))
}

pub fn plan_path(data_dir: &Path, state_name: &str) -> PathBuf {
    data_dir.join(format!("{state_name}{PLAN_SUFFIX}"))
}

/// Where a stripped backend declaration is parked. Lives beside, not inside,
/// the unit's data dir so clearing the data dir never loses it.
pub fn backend_stash_path(data_dir: &Path) -> PathBuf {
    let name = data_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    data_dir.with_file_name(format!("{name}.{BACKEND_FILE}.stash"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

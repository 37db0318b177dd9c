//! User-declared custom commands and groups.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RoverError};
use crate::io;

/// Packaged default, seeded to the home location on first run.
pub const DEFAULT_DEFINITIONS: &str = include_str!("../templates/commands.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDefinition {
    pub executable: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Definitions {
    #[serde(default)]
    pub commands: IndexMap<String, CommandDefinition>,
    #[serde(default)]
    pub groups: IndexMap<String, Vec<String>>,
}

impl Definitions {
    pub fn parse(path: &Path, data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data).map_err(|source| RoverError::Definitions {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(path, &data)
    }
}

/// Load the first candidate that exists. When none does, write the packaged
/// default to `seed` and load that. Returns the file actually read.
pub fn load_first(candidates: &[PathBuf], seed: &Path) -> Result<(Definitions, PathBuf)> {
    if let Some(path) = candidates.iter().find(|p| p.is_file()) {
        tracing::debug!(path = %path.display(), "loading action definitions");
        return Ok((Definitions::load(path)?, path.clone()));
    }
    if io::write_if_missing(seed, DEFAULT_DEFINITIONS.as_bytes())? {
        tracing::info!(path = %seed.display(), "seeded default action definitions");
    }
    Ok((Definitions::load(seed)?, seed.to_path_buf()))
}

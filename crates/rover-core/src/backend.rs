//! Remote state backend discovery and handoff.
//!
//! The launchpad unit creates the storage account that holds every level's
//! state. Until it exists the launchpad runs with local state; afterwards
//! every unit attaches to the account tagged with its level and environment.
//!
//! # States
//!
//! ```text
//! Unattached -> Discovering -> Attached     (backend found)
//! Unattached -> Discovering -> LocalOnly    (launchpad, no backend yet,
//!                                            or launchpad destroy)
//! ```
//!
//! A landing zone that finds no backend fails: the launchpad must be
//! deployed first.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::action::Services;
use crate::cloud::Inventory;
use crate::engine::{BackendConfig, DestroyRequest, EngineTarget};
use crate::error::{Result, RoverError};
use crate::run_config::RunConfig;
use crate::{io, paths};

// ---------------------------------------------------------------------------
// BackendRecord / Discovery
// ---------------------------------------------------------------------------

/// Where a level's state blobs live. Re-discovered on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRecord {
    pub storage_account_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub storage_account_name: String,
    pub container_name: String,
}

/// Result of a backend lookup. "Not deployed" is an expected answer, not an
/// error; transport failures surface as [`RoverError::Discovery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found(BackendRecord),
    NotDeployed,
}

impl Discovery {
    pub fn record(&self) -> Option<&BackendRecord> {
        match self {
            Discovery::Found(record) => Some(record),
            Discovery::NotDeployed => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackendQuery<'a> {
    pub level: &'a str,
    pub environment: &'a str,
    pub subscription: &'a str,
    pub workspace: &'a str,
}

impl<'a> BackendQuery<'a> {
    pub fn for_run(run: &'a RunConfig) -> Self {
        Self {
            level: &run.level,
            environment: &run.environment_name,
            subscription: &run.state_subscription,
            workspace: &run.workspace_name,
        }
    }
}

fn kql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Resource Graph filter selecting storage accounts tagged for a level.
pub fn discovery_filter(level: &str, environment: &str) -> String {
    format!(
        "Resources \
         | where type =~ 'microsoft.storage/storageaccounts' \
         | where tags.level == {} and tags.environment == {} \
         | project id, name, resourceGroup, subscriptionId, tags",
        kql_literal(level),
        kql_literal(environment)
    )
}

/// Find the storage account holding a level's state.
///
/// More than one tagged account is reported as ambiguous instead of picking
/// whichever the inventory happened to return first.
pub fn locate(inventory: &dyn Inventory, query: &BackendQuery) -> Result<Discovery> {
    let filter = discovery_filter(query.level, query.environment);
    let mut records = inventory.query(&filter, query.subscription)?;
    tracing::debug!(
        level = query.level,
        environment = query.environment,
        matches = records.len(),
        "backend discovery"
    );
    match records.len() {
        0 => Ok(Discovery::NotDeployed),
        1 => {
            let r = records.remove(0);
            Ok(Discovery::Found(BackendRecord {
                storage_account_id: r.id,
                subscription_id: r.subscription_id,
                resource_group: r.resource_group,
                storage_account_name: r.name,
                container_name: query.workspace.to_string(),
            }))
        }
        count => Err(RoverError::AmbiguousBackend {
            level: query.level.to_string(),
            environment: query.environment.to_string(),
            count,
        }),
    }
}

// ---------------------------------------------------------------------------
// Backend declaration file
// ---------------------------------------------------------------------------

const DEFAULT_BACKEND_DECLARATION: &str = "terraform {\n  backend \"azurerm\" {}\n}\n";

/// Make sure the source tree declares an azurerm backend. Returns true when
/// a declaration had to be written.
pub fn ensure_backend_declared(source: &Path) -> Result<bool> {
    let declaration = source.join(paths::BACKEND_FILE);
    if declaration.exists() {
        return Ok(false);
    }
    let template = source.join(paths::BACKEND_TEMPLATE);
    let content = if template.exists() {
        std::fs::read(&template)?
    } else {
        DEFAULT_BACKEND_DECLARATION.as_bytes().to_vec()
    };
    io::atomic_write(&declaration, &content)?;
    tracing::info!(path = %declaration.display(), "wrote backend declaration");
    Ok(true)
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        io::ensure_dir(parent)?;
    }
    if std::fs::rename(from, to).is_err() {
        // Source tree and data dir may sit on different filesystems.
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

/// Put back a declaration parked by an earlier, interrupted run. Returns
/// true if something was restored.
pub fn restore_stashed(source: &Path, stash: &Path) -> Result<bool> {
    if !stash.exists() {
        return Ok(false);
    }
    let declaration = source.join(paths::BACKEND_FILE);
    if declaration.exists() {
        io::remove_file_if_exists(stash)?;
        return Ok(false);
    }
    move_file(stash, &declaration)?;
    tracing::warn!(
        path = %declaration.display(),
        "restored backend declaration left stripped by an earlier run"
    );
    Ok(true)
}

/// Guard holding a backend declaration moved out of the source tree so the
/// engine falls back to local state. Dropping it moves the file back.
#[derive(Debug)]
pub struct StrippedBackend {
    declaration: PathBuf,
    stash: PathBuf,
}

impl StrippedBackend {
    /// Returns `None` when the tree has no declaration to strip.
    pub fn strip(source: &Path, stash: &Path) -> Result<Option<Self>> {
        restore_stashed(source, stash)?;
        let declaration = source.join(paths::BACKEND_FILE);
        if !declaration.exists() {
            return Ok(None);
        }
        move_file(&declaration, stash)?;
        tracing::debug!(path = %declaration.display(), "stripped backend declaration");
        Ok(Some(Self {
            declaration,
            stash: stash.to_path_buf(),
        }))
    }
}

impl Drop for StrippedBackend {
    fn drop(&mut self) {
        if let Err(e) = move_file(&self.stash, &self.declaration) {
            tracing::warn!(
                error = %e,
                stash = %self.stash.display(),
                "could not restore backend declaration; it will be restored on the next run"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Handoff state machine
// ---------------------------------------------------------------------------

/// What the post-apply lookup of a launchpad found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// Local state was uploaded to the new backend.
    Migrated(BackendRecord),
    /// The backend changed but there was no local state to carry over.
    BackendChanged(BackendRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Unattached,
    Discovering,
    Attached(BackendRecord),
    LocalOnly,
}

impl fmt::Display for HandoffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffState::Unattached => f.write_str("unattached"),
            HandoffState::Discovering => f.write_str("discovering"),
            HandoffState::Attached(r) => write!(f, "attached to {}", r.storage_account_name),
            HandoffState::LocalOnly => f.write_str("local only"),
        }
    }
}

/// Attaches one unit's engine run to its state backend, or detaches it.
pub struct Handoff<'a> {
    run: &'a RunConfig,
    services: &'a Services<'a>,
    state: HandoffState,
    discovery: Option<Discovery>,
    stripped: Option<StrippedBackend>,
}

impl<'a> Handoff<'a> {
    pub fn new(run: &'a RunConfig, services: &'a Services<'a>) -> Self {
        Self {
            run,
            services,
            state: HandoffState::Unattached,
            discovery: None,
            stripped: None,
        }
    }

    pub fn state(&self) -> &HandoffState {
        &self.state
    }

    /// The discovery this handoff acted on, once it has run.
    pub fn discovery(&self) -> Option<&Discovery> {
        self.discovery.as_ref()
    }

    /// Local state file the engine writes while in [`HandoffState::LocalOnly`].
    pub fn local_state(&self) -> Option<PathBuf> {
        match self.state {
            HandoffState::LocalOnly => Some(self.run.local_state_path()),
            _ => None,
        }
    }

    fn target(&self) -> EngineTarget<'a> {
        EngineTarget::for_run(self.run)
    }

    fn stash_path(&self) -> PathBuf {
        paths::backend_stash_path(&self.run.data_dir)
    }

    fn transition(&mut self, next: HandoffState) {
        tracing::debug!(unit = %self.run.unit_name(), from = %self.state, to = %next, "handoff");
        self.state = next;
    }

    /// Use `known` when an earlier action in this invocation already looked
    /// the backend up; otherwise query the inventory.
    fn discover(&mut self, known: Option<Discovery>) -> Result<Discovery> {
        self.transition(HandoffState::Discovering);
        let discovery = match known {
            Some(d) => d,
            None => locate(self.services.inventory, &BackendQuery::for_run(self.run))?,
        };
        self.discovery = Some(discovery.clone());
        Ok(discovery)
    }

    fn not_deployed(&self) -> RoverError {
        RoverError::LaunchpadNotDeployed {
            level: self.run.level.clone(),
            environment: self.run.environment_name.clone(),
        }
    }

    /// Discover the backend and run the engine's init against it.
    pub fn attach(&mut self, known: Option<Discovery>) -> Result<()> {
        restore_stashed(&self.run.source_path, &self.stash_path())?;
        let discovery = self.discover(known)?;
        self.run.ensure_data_dir()?;

        match discovery {
            Discovery::Found(record) => {
                ensure_backend_declared(&self.run.source_path)?;
                let config = BackendConfig::new(&record, self.run.state_blob_name());
                self.services.engine.init(&self.target(), Some(&config))?;
                tracing::info!(
                    unit = %self.run.unit_name(),
                    account = %record.storage_account_name,
                    "attached to remote backend"
                );
                self.transition(HandoffState::Attached(record));
                Ok(())
            }
            Discovery::NotDeployed if self.run.is_launchpad() => {
                self.stripped = StrippedBackend::strip(&self.run.source_path, &self.stash_path())?;
                self.services.engine.init(&self.target(), None)?;
                tracing::info!(
                    unit = %self.run.unit_name(),
                    "no backend yet, launchpad runs with local state"
                );
                self.transition(HandoffState::LocalOnly);
                Ok(())
            }
            Discovery::NotDeployed => Err(self.not_deployed()),
        }
    }

    /// After a successful launchpad apply: if the backend now differs from
    /// the one seen before apply, move the local state into it. The new
    /// backend becomes this handoff's discovery either way.
    pub fn complete_bootstrap(&mut self) -> Result<Option<Bootstrap>> {
        let before = self.discovery.as_ref().and_then(Discovery::record).cloned();
        let after = locate(self.services.inventory, &BackendQuery::for_run(self.run))?;
        let record = match after {
            Discovery::Found(record) if Some(&record) != before.as_ref() => record,
            _ => return Ok(None),
        };
        self.discovery = Some(Discovery::Found(record.clone()));

        let local = self.run.local_state_path();
        if !local.exists() {
            tracing::warn!(
                unit = %self.run.unit_name(),
                account = %record.storage_account_name,
                "backend changed but there is no local state to migrate"
            );
            return Ok(Some(Bootstrap::BackendChanged(record)));
        }
        self.services
            .blobs
            .upload(&record, &self.run.state_blob_name(), &local)?;
        io::remove_file_if_exists(&local)?;
        tracing::info!(
            unit = %self.run.unit_name(),
            account = %record.storage_account_name,
            "migrated launchpad state to remote backend"
        );
        Ok(Some(Bootstrap::Migrated(record)))
    }

    /// Destroy a launchpad: pull its state out of the backend it is about to
    /// delete, detach to local state, and destroy from the local copy.
    ///
    /// Re-running after a failure at any step starts over from a fresh
    /// download; the remote blob is never removed here.
    pub fn destroy_launchpad(&mut self, var_files: &[PathBuf]) -> Result<()> {
        restore_stashed(&self.run.source_path, &self.stash_path())?;
        let record = match self.discover(None)? {
            Discovery::Found(record) => record,
            Discovery::NotDeployed => {
                return Err(RoverError::LaunchpadAlreadyDestroyed {
                    level: self.run.level.clone(),
                    environment: self.run.environment_name.clone(),
                })
            }
        };

        io::remove_dir_if_exists(&self.run.data_dir)?;
        self.run.ensure_data_dir()?;

        let local = self.run.local_state_path();
        self.services
            .blobs
            .download(&record, &self.run.state_blob_name(), &local)?;

        self.stripped = StrippedBackend::strip(&self.run.source_path, &self.stash_path())?;
        self.services.engine.init(&self.target(), None)?;
        self.transition(HandoffState::LocalOnly);

        self.services.engine.destroy(
            &self.target(),
            &DestroyRequest {
                var_files,
                state: Some(&local),
            },
        )?;

        io::remove_dir_if_exists(&self.run.data_dir)?;
        tracing::info!(unit = %self.run.unit_name(), "launchpad destroyed");
        Ok(())
    }
}

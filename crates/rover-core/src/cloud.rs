//! Cloud collaborators: caller identity, resource inventory, blob transfer.
//!
//! The traits are what the handoff protocol consumes. [`AzCli`] implements
//! all three by shelling out to the `az` CLI; [`CachedAuth`] memoises the
//! auth lookups for the lifetime of one process.

use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::BackendRecord;
use crate::error::{Result, RoverError};
use crate::process::{CommandRunner, CommandSpec};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: String,
    pub object_id: String,
    pub object_type: String,
}

pub trait Auth {
    fn current_subscription_id(&self) -> Result<String>;
    fn current_identity(&self) -> Result<Identity>;
}

/// One row returned by an inventory query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

pub trait Inventory {
    /// Run a filter expression against one subscription. An empty result is
    /// `Ok(vec![])`; transport and auth problems are errors.
    fn query(&self, filter: &str, subscription_id: &str) -> Result<Vec<InventoryRecord>>;
}

pub trait BlobStore {
    fn upload(&self, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()>;
    fn download(&self, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CachedAuth
// ---------------------------------------------------------------------------

/// Wraps an [`Auth`] so each lookup reaches the collaborator at most once.
pub struct CachedAuth<'a> {
    inner: &'a dyn Auth,
    subscription: OnceCell<String>,
    identity: OnceCell<Identity>,
}

impl<'a> CachedAuth<'a> {
    pub fn new(inner: &'a dyn Auth) -> Self {
        Self {
            inner,
            subscription: OnceCell::new(),
            identity: OnceCell::new(),
        }
    }
}

impl Auth for CachedAuth<'_> {
    fn current_subscription_id(&self) -> Result<String> {
        if let Some(id) = self.subscription.get() {
            return Ok(id.clone());
        }
        let id = self.inner.current_subscription_id()?;
        Ok(self.subscription.get_or_init(|| id).clone())
    }

    fn current_identity(&self) -> Result<Identity> {
        if let Some(identity) = self.identity.get() {
            return Ok(identity.clone());
        }
        let identity = self.inner.current_identity()?;
        Ok(self.identity.get_or_init(|| identity).clone())
    }
}

// ---------------------------------------------------------------------------
// AzCli
// ---------------------------------------------------------------------------

const AZ: &str = "az";

/// Production collaborators backed by the `az` command-line tool.
pub struct AzCli<'a> {
    runner: &'a dyn CommandRunner,
}

#[derive(Deserialize)]
struct AccountShow {
    id: String,
    user: AccountUser,
}

#[derive(Deserialize)]
struct AccountUser {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryObject {
    display_name: String,
    id: String,
}

impl<'a> AzCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn az_json(&self, args: &[&str]) -> Result<serde_json::Value> {
        let spec = CommandSpec::new(AZ)
            .args(args.iter().copied())
            .args(["--output", "json", "--only-show-errors"]);
        let out = self.runner.run(&spec)?.check(AZ)?;
        Ok(serde_json::from_str(&out.stdout)?)
    }

    fn account(&self) -> Result<AccountShow> {
        let value = self
            .az_json(&["account", "show"])
            .map_err(|e| RoverError::Auth(format!("{e} (run 'az login')")))?;
        Ok(serde_json::from_value(value)?)
    }

    fn blob(&self, verb: &str, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()> {
        let spec = CommandSpec::new(AZ).args([
            "storage".to_string(),
            "blob".to_string(),
            verb.to_string(),
            "--subscription".to_string(),
            backend.subscription_id.clone(),
            "--account-name".to_string(),
            backend.storage_account_name.clone(),
            "--container-name".to_string(),
            backend.container_name.clone(),
            "--name".to_string(),
            blob.to_string(),
            "--file".to_string(),
            local.display().to_string(),
            "--auth-mode".to_string(),
            "login".to_string(),
            "--only-show-errors".to_string(),
        ]);
        let spec = if verb == "upload" {
            spec.args(["--overwrite", "true"])
        } else {
            spec
        };
        tracing::info!(
            account = %backend.storage_account_name,
            container = %backend.container_name,
            blob,
            "blob {verb}"
        );
        let out = self.runner.run(&spec)?;
        if !out.success() {
            return Err(RoverError::BlobTransfer(format!(
                "{verb} of '{blob}' to/from '{}' failed: {}",
                backend.storage_account_name,
                out.stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Auth for AzCli<'_> {
    fn current_subscription_id(&self) -> Result<String> {
        Ok(self.account()?.id)
    }

    fn current_identity(&self) -> Result<Identity> {
        let account = self.account()?;
        let object = match account.user.kind.as_str() {
            "user" => self.az_json(&["ad", "signed-in-user", "show"]),
            _ => self.az_json(&["ad", "sp", "show", "--id", account.user.name.as_str()]),
        }
        .map_err(|e| RoverError::Auth(e.to_string()))?;
        let object: DirectoryObject = serde_json::from_value(object)?;
        Ok(Identity {
            display_name: object.display_name,
            object_id: object.id,
            object_type: account.user.kind,
        })
    }
}

impl Inventory for AzCli<'_> {
    fn query(&self, filter: &str, subscription_id: &str) -> Result<Vec<InventoryRecord>> {
        let value = self
            .az_json(&["graph", "query", "-q", filter, "--subscriptions", subscription_id])
            .map_err(|e| RoverError::Discovery(e.to_string()))?;
        parse_graph_rows(value)
    }
}

impl BlobStore for AzCli<'_> {
    fn upload(&self, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()> {
        self.blob("upload", backend, blob, local)
    }

    fn download(&self, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.blob("download", backend, blob, local)
    }
}

/// Resource Graph answers `{"data": [...]}`; older CLI versions a bare array.
fn parse_graph_rows(value: serde_json::Value) -> Result<Vec<InventoryRecord>> {
    let rows = match value {
        serde_json::Value::Object(mut map) => map
            .remove("data")
            .ok_or_else(|| RoverError::Discovery("graph query returned no 'data' field".into()))?,
        other => other,
    };
    serde_json::from_value(rows).map_err(|e| RoverError::Discovery(e.to_string()))
}

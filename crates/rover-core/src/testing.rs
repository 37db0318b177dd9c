//! In-memory collaborators shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::action::Services;
use crate::backend::BackendRecord;
use crate::cloud::{Auth, BlobStore, Identity, Inventory, InventoryRecord};
use crate::engine::{
    ApplyRequest, BackendConfig, DestroyRequest, Engine, EngineTarget, FormatCheck, PlanRequest,
    Validation,
};
use crate::error::{Result, RoverError};
use crate::process::{CommandRunner, CommandSpec, ExecOutput};
use crate::run_config::{RunConfig, RunConfigInput};

// ---------------------------------------------------------------------------
// FakeAuth
// ---------------------------------------------------------------------------

pub struct FakeAuth {
    subscription: Option<String>,
    subscription_calls: Cell<usize>,
    identity_calls: Cell<usize>,
}

impl FakeAuth {
    pub fn new(subscription: &str) -> Self {
        Self {
            subscription: Some(subscription.to_string()),
            subscription_calls: Cell::new(0),
            identity_calls: Cell::new(0),
        }
    }

    /// Behaves like a machine with no `az login`.
    pub fn failing() -> Self {
        Self {
            subscription: None,
            subscription_calls: Cell::new(0),
            identity_calls: Cell::new(0),
        }
    }

    pub fn subscription_calls(&self) -> usize {
        self.subscription_calls.get()
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.get()
    }
}

impl Auth for FakeAuth {
    fn current_subscription_id(&self) -> Result<String> {
        self.subscription_calls.set(self.subscription_calls.get() + 1);
        self.subscription
            .clone()
            .ok_or_else(|| RoverError::Auth("not logged in".into()))
    }

    fn current_identity(&self) -> Result<Identity> {
        self.identity_calls.set(self.identity_calls.get() + 1);
        match self.subscription {
            Some(_) => Ok(Identity {
                display_name: "Test Operator".into(),
                object_id: "00000000-0000-0000-0000-000000000001".into(),
                object_type: "user".into(),
            }),
            None => Err(RoverError::Auth("not logged in".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Records every command and answers from a table keyed by command-line
/// prefix. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: RefCell<Vec<(String, ExecOutput)>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, output: ExecOutput) {
        let mut responses = self.responses.borrow_mut();
        responses.retain(|(p, _)| p != prefix);
        responses.push((prefix.to_string(), output));
    }

    pub fn respond_code(&self, prefix: &str, exit_code: i32) {
        self.respond(
            prefix,
            ExecOutput {
                exit_code,
                ..ExecOutput::default()
            },
        );
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let line = spec.display_line();
        Ok(self
            .responses
            .borrow()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// FakeInventory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeInventory {
    records: RefCell<Vec<InventoryRecord>>,
    failure: RefCell<Option<String>>,
    queries: Cell<usize>,
}

impl FakeInventory {
    pub fn set(&self, records: Vec<InventoryRecord>) {
        *self.records.borrow_mut() = records;
    }

    pub fn fail(&self, message: &str) {
        *self.failure.borrow_mut() = Some(message.to_string());
    }

    pub fn queries(&self) -> usize {
        self.queries.get()
    }
}

impl Inventory for FakeInventory {
    fn query(&self, _filter: &str, _subscription_id: &str) -> Result<Vec<InventoryRecord>> {
        self.queries.set(self.queries.get() + 1);
        if let Some(message) = self.failure.borrow().clone() {
            return Err(RoverError::Discovery(message));
        }
        Ok(self.records.borrow().clone())
    }
}

/// A storage account as the inventory would report it.
pub fn record(name: &str) -> InventoryRecord {
    InventoryRecord {
        id: format!(
            "/subscriptions/sub-state/resourceGroups/rg-launchpad/providers/Microsoft.Storage/storageAccounts/{name}"
        ),
        name: name.to_string(),
        resource_group: "rg-launchpad".into(),
        subscription_id: "sub-state".into(),
        tags: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// FakeBlobs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBlobs {
    blobs: RefCell<BTreeMap<(String, String), String>>,
    uploads: RefCell<Vec<(String, String)>>,
    downloads: Cell<usize>,
}

impl FakeBlobs {
    pub fn put(&self, account: &str, blob: &str, content: &str) {
        self.blobs
            .borrow_mut()
            .insert((account.to_string(), blob.to_string()), content.to_string());
    }

    pub fn get(&self, account: &str, blob: &str) -> Option<String> {
        self.blobs
            .borrow()
            .get(&(account.to_string(), blob.to_string()))
            .cloned()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.borrow().clone()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.get()
    }
}

impl BlobStore for FakeBlobs {
    fn upload(&self, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()> {
        let content = std::fs::read_to_string(local)?;
        let key = (backend.storage_account_name.clone(), blob.to_string());
        self.uploads.borrow_mut().push(key.clone());
        self.blobs.borrow_mut().insert(key, content);
        Ok(())
    }

    fn download(&self, backend: &BackendRecord, blob: &str, local: &Path) -> Result<()> {
        self.downloads.set(self.downloads.get() + 1);
        let content = self
            .get(&backend.storage_account_name, blob)
            .ok_or_else(|| RoverError::BlobTransfer(format!("blob '{blob}' not found")))?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

/// Records engine calls as short strings such as `init local` or
/// `destroy state=/path`.
pub struct FakeEngine {
    calls: RefCell<Vec<String>>,
    fail_next: RefCell<Option<&'static str>>,
    plan_changes: Cell<bool>,
    validation: RefCell<Validation>,
    unformatted: RefCell<Vec<String>>,
    destroyed_state: RefCell<Option<String>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            calls: RefCell::default(),
            fail_next: RefCell::default(),
            plan_changes: Cell::new(true),
            validation: RefCell::new(Validation {
                valid: true,
                diagnostics: Vec::new(),
            }),
            unformatted: RefCell::default(),
            destroyed_state: RefCell::default(),
        }
    }
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Make the next call to `step` fail.
    pub fn fail_next(&self, step: &'static str) {
        *self.fail_next.borrow_mut() = Some(step);
    }

    pub fn set_plan_changes(&self, changes: bool) {
        self.plan_changes.set(changes);
    }

    pub fn set_validation(&self, validation: Validation) {
        *self.validation.borrow_mut() = validation;
    }

    pub fn set_unformatted(&self, files: &[&str]) {
        *self.unformatted.borrow_mut() = files.iter().map(|f| f.to_string()).collect();
    }

    /// Content of the local state file at the moment destroy ran.
    pub fn destroyed_state(&self) -> Option<String> {
        self.destroyed_state.borrow().clone()
    }

    fn record(&self, step: &'static str, call: String) -> Result<()> {
        self.calls.borrow_mut().push(call);
        let mut fail = self.fail_next.borrow_mut();
        if *fail == Some(step) {
            *fail = None;
            return Err(RoverError::Engine {
                step,
                message: "exited with code 1".into(),
            });
        }
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn init(&self, _target: &EngineTarget, backend: Option<&BackendConfig>) -> Result<()> {
        let call = match backend {
            Some(cfg) => format!("init remote key={}", cfg.key),
            None => "init local".to_string(),
        };
        self.record("init", call)
    }

    fn plan(&self, _target: &EngineTarget, req: &PlanRequest) -> Result<bool> {
        let call = match req.state {
            Some(state) => format!("plan state={}", state.display()),
            None => "plan".to_string(),
        };
        self.record("plan", call)?;
        std::fs::write(req.out, "plan")?;
        Ok(self.plan_changes.get())
    }

    fn apply(&self, _target: &EngineTarget, req: &ApplyRequest) -> Result<()> {
        let call = match req.state_out {
            Some(state) => format!("apply state_out={}", state.display()),
            None => "apply".to_string(),
        };
        self.record("apply", call)?;
        if let Some(state) = req.state_out {
            std::fs::write(state, "{\"version\":4}")?;
        }
        Ok(())
    }

    fn destroy(&self, _target: &EngineTarget, req: &DestroyRequest) -> Result<()> {
        let call = match req.state {
            Some(state) => format!("destroy state={}", state.display()),
            None => "destroy".to_string(),
        };
        if let Some(state) = req.state {
            *self.destroyed_state.borrow_mut() = std::fs::read_to_string(state).ok();
        }
        self.record("destroy", call)
    }

    fn validate(&self, _target: &EngineTarget) -> Result<Validation> {
        self.record("validate", "validate".into())?;
        Ok(self.validation.borrow().clone())
    }

    fn format_check(&self, _target: &EngineTarget, recursive: bool) -> Result<FormatCheck> {
        let call = if recursive { "fmt -recursive" } else { "fmt" };
        self.record("fmt", call.into())?;
        Ok(FormatCheck {
            files: self.unformatted.borrow().clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A resolved unit in a temp directory plus fresh fakes for every
/// collaborator.
pub struct Harness {
    pub dir: TempDir,
    pub run: RunConfig,
    pub engine: FakeEngine,
    pub inventory: FakeInventory,
    pub blobs: FakeBlobs,
    pub runner: ScriptedRunner,
}

impl Harness {
    /// `level0/caf_launchpad`.
    pub fn launchpad() -> Self {
        Self::with(true, "caf_launchpad", "level0", |_, _| {})
    }

    /// `level1/management`.
    pub fn landing_zone() -> Self {
        Self::with(false, "landingzones/management", "level1", |_, _| {})
    }

    pub fn with(
        launchpad: bool,
        source: &str,
        level: &str,
        adjust: impl FnOnce(&mut RunConfigInput, &Path),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let source_path = dir.path().join(source);
        let config_path = dir.path().join("configuration").join(level);
        std::fs::create_dir_all(&source_path).unwrap();
        std::fs::create_dir_all(&config_path).unwrap();

        let mut input = RunConfigInput {
            launchpad,
            source_path: Some(source_path),
            config_path: Some(config_path),
            level: Some(level.to_string()),
            environment: Some("sandpit".into()),
            state_subscription: Some("sub-state".into()),
            target_subscription: Some("sub-target".into()),
            data_root: Some(dir.path().join("data")),
            report_dir: Some(dir.path().join("reports")),
            ..RunConfigInput::default()
        };
        adjust(&mut input, dir.path());
        let run = RunConfig::build(input, &FakeAuth::new("sub-current")).unwrap();

        Self {
            dir,
            run,
            engine: FakeEngine::default(),
            inventory: FakeInventory::default(),
            blobs: FakeBlobs::default(),
            runner: ScriptedRunner::new(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            engine: &self.engine,
            inventory: &self.inventory,
            blobs: &self.blobs,
            runner: &self.runner,
        }
    }

    /// Make the inventory report a deployed backend for this unit's level.
    pub fn deploy_backend(&self, account: &str) {
        self.inventory.set(vec![record(account)]);
    }
}

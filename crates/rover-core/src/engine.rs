//! Provisioning engine binding.
//!
//! [`Engine`] is the contract the handoff protocol and the Terraform actions
//! rely on. [`TerraformCli`] drives the `terraform` binary with `-chdir`, so
//! the unit's source tree is read in place while provider caches and plugin
//! state go to the unit's data dir via `TF_DATA_DIR`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::BackendRecord;
use crate::error::{Result, RoverError};
use crate::process::{CommandRunner, CommandSpec, ExecOutput};
use crate::run_config::RunConfig;

/// Where and as whom an engine call runs.
#[derive(Debug, Clone, Copy)]
pub struct EngineTarget<'a> {
    pub source: &'a Path,
    pub data_dir: &'a Path,
    pub subscription: &'a str,
}

impl<'a> EngineTarget<'a> {
    pub fn for_run(run: &'a RunConfig) -> Self {
        Self {
            source: &run.source_path,
            data_dir: &run.data_dir,
            subscription: &run.target_subscription,
        }
    }
}

/// Remote backend settings injected at init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub subscription_id: String,
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub container_name: String,
    pub key: String,
}

impl BackendConfig {
    pub fn new(record: &BackendRecord, key: impl Into<String>) -> Self {
        Self {
            subscription_id: record.subscription_id.clone(),
            resource_group_name: record.resource_group.clone(),
            storage_account_name: record.storage_account_name.clone(),
            container_name: record.container_name.clone(),
            key: key.into(),
        }
    }

    fn pairs(&self) -> [(&'static str, &str); 5] {
        [
            ("subscription_id", self.subscription_id.as_str()),
            ("resource_group_name", self.resource_group_name.as_str()),
            ("storage_account_name", self.storage_account_name.as_str()),
            ("container_name", self.container_name.as_str()),
            ("key", self.key.as_str()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub var_files: &'a [PathBuf],
    pub out: &'a Path,
    /// Local state file, only set while a launchpad runs without a backend.
    pub state: Option<&'a Path>,
}

#[derive(Debug, Clone)]
pub struct ApplyRequest<'a> {
    pub plan: &'a Path,
    pub state_out: Option<&'a Path>,
}

#[derive(Debug, Clone)]
pub struct DestroyRequest<'a> {
    pub var_files: &'a [PathBuf],
    pub state: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: String,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl Validation {
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == "error")
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormatCheck {
    pub files: Vec<String>,
}

impl FormatCheck {
    pub fn ok(&self) -> bool {
        self.files.is_empty()
    }
}

pub trait Engine {
    fn init(&self, target: &EngineTarget, backend: Option<&BackendConfig>) -> Result<()>;
    /// Returns whether the plan contains changes.
    fn plan(&self, target: &EngineTarget, req: &PlanRequest) -> Result<bool>;
    fn apply(&self, target: &EngineTarget, req: &ApplyRequest) -> Result<()>;
    fn destroy(&self, target: &EngineTarget, req: &DestroyRequest) -> Result<()>;
    fn validate(&self, target: &EngineTarget) -> Result<Validation>;
    fn format_check(&self, target: &EngineTarget, recursive: bool) -> Result<FormatCheck>;
}

// ---------------------------------------------------------------------------
// TerraformCli
// ---------------------------------------------------------------------------

pub const TERRAFORM: &str = "terraform";

pub struct TerraformCli<'a> {
    program: String,
    runner: &'a dyn CommandRunner,
}

impl<'a> TerraformCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self::with_program(TERRAFORM, runner)
    }

    pub fn with_program(program: impl Into<String>, runner: &'a dyn CommandRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn command(&self, target: &EngineTarget, subcommand: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg(format!("-chdir={}", target.source.display()))
            .arg(subcommand)
            .env(
                "TF_DATA_DIR",
                target.data_dir.join(".terraform").display().to_string(),
            )
            .env("TF_IN_AUTOMATION", "1")
            .env("ARM_SUBSCRIPTION_ID", target.subscription)
    }

    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        tracing::info!(command = %spec.display_line(), "terraform");
        self.runner.run(spec)
    }
}

fn var_file_args(files: &[PathBuf]) -> impl Iterator<Item = String> + '_ {
    files.iter().map(|f| format!("-var-file={}", f.display()))
}

fn exit_failure(step: &'static str, out: &ExecOutput) -> RoverError {
    let detail = out.stderr.trim();
    RoverError::Engine {
        step,
        message: if detail.is_empty() {
            format!("exited with code {}", out.exit_code)
        } else {
            format!("exited with code {}: {detail}", out.exit_code)
        },
    }
}

impl Engine for TerraformCli<'_> {
    fn init(&self, target: &EngineTarget, backend: Option<&BackendConfig>) -> Result<()> {
        let mut spec = self
            .command(target, "init")
            .args(["-input=false", "-upgrade", "-reconfigure"])
            .streamed();
        if let Some(cfg) = backend {
            spec = spec.args(
                cfg.pairs()
                    .iter()
                    .map(|(k, v)| format!("-backend-config={k}={v}")),
            );
        }
        let out = self.run(&spec)?;
        if !out.success() {
            return Err(exit_failure("init", &out));
        }
        Ok(())
    }

    fn plan(&self, target: &EngineTarget, req: &PlanRequest) -> Result<bool> {
        let mut spec = self
            .command(target, "plan")
            .args(["-input=false", "-detailed-exitcode"])
            .arg(format!("-out={}", req.out.display()));
        if let Some(state) = req.state {
            spec = spec.arg(format!("-state={}", state.display()));
        }
        let spec = spec.args(var_file_args(req.var_files)).streamed();
        let out = self.run(&spec)?;
        match out.exit_code {
            0 => Ok(false),
            2 => Ok(true),
            _ => Err(exit_failure("plan", &out)),
        }
    }

    fn apply(&self, target: &EngineTarget, req: &ApplyRequest) -> Result<()> {
        let mut spec = self.command(target, "apply").arg("-input=false");
        if let Some(state_out) = req.state_out {
            spec = spec.arg(format!("-state-out={}", state_out.display()));
        }
        let spec = spec.arg(req.plan.display().to_string()).streamed();
        let out = self.run(&spec)?;
        if !out.success() {
            return Err(exit_failure("apply", &out));
        }
        Ok(())
    }

    fn destroy(&self, target: &EngineTarget, req: &DestroyRequest) -> Result<()> {
        let mut spec = self
            .command(target, "destroy")
            .args(["-input=false", "-auto-approve"]);
        if let Some(state) = req.state {
            spec = spec.arg(format!("-state={}", state.display()));
        }
        let spec = spec.args(var_file_args(req.var_files)).streamed();
        let out = self.run(&spec)?;
        if !out.success() {
            return Err(exit_failure("destroy", &out));
        }
        Ok(())
    }

    fn validate(&self, target: &EngineTarget) -> Result<Validation> {
        let spec = self.command(target, "validate").arg("-json");
        let out = self.run(&spec)?;
        // An invalid configuration exits 1 but still prints the JSON report.
        match serde_json::from_str::<Validation>(&out.stdout) {
            Ok(validation) => Ok(validation),
            Err(_) if !out.success() => Err(exit_failure("validate", &out)),
            Err(e) => Err(e.into()),
        }
    }

    fn format_check(&self, target: &EngineTarget, recursive: bool) -> Result<FormatCheck> {
        let mut spec = self
            .command(target, "fmt")
            .args(["-check", "-list=true"]);
        if recursive {
            spec = spec.arg("-recursive");
        }
        let out = self.run(&spec)?;
        match out.exit_code {
            0 | 3 => Ok(FormatCheck {
                files: out
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect(),
            }),
            _ => Err(exit_failure("fmt", &out)),
        }
    }
}

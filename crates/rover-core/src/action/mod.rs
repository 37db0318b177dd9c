//! Executable actions.
//!
//! An [`Action`] runs against one [`RunConfig`]. Built-in actions drive the
//! provisioning engine, custom actions run a declared executable, groups run
//! other actions in order, and the test action verifies deployed state.
//!
//! Backend discovery results travel explicitly: each action receives the
//! [`Discovery`] observed by whatever ran before it (if anything) through
//! [`ActionInput`] and returns the one it used in [`ActionOutcome`].

pub mod custom;
pub mod group;
pub mod template;
pub mod terraform;
pub mod test;

pub use custom::CustomAction;
pub use group::GroupAction;
pub use terraform::{TerraformAction, TerraformOp};
pub use test::TestAction;

use serde::Serialize;
use std::fmt;

use crate::backend::Discovery;
use crate::cloud::{BlobStore, Inventory};
use crate::engine::Engine;
use crate::error::Result;
use crate::process::CommandRunner;
use crate::run_config::RunConfig;

/// External collaborators an action may call.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub engine: &'a dyn Engine,
    pub inventory: &'a dyn Inventory,
    pub blobs: &'a dyn BlobStore,
    pub runner: &'a dyn CommandRunner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Builtin,
    Custom,
    Group,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Builtin => "builtin",
            ActionKind::Custom => "custom",
            ActionKind::Group => "group",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionInput {
    /// Backend observed earlier in the same invocation. `None` means the
    /// action discovers it itself.
    pub discovery: Option<Discovery>,
}

impl ActionInput {
    pub fn with_discovery(discovery: Option<Discovery>) -> Self {
        Self { discovery }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Succeeded,
    NoChanges,
    DryRun,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Succeeded => "succeeded",
            Status::NoChanges => "no changes",
            Status::DryRun => "dry run",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub status: Status,
    pub discovery: Option<Discovery>,
    /// Human-readable lines for the caller to print.
    pub notes: Vec<String>,
}

impl ActionOutcome {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            discovery: None,
            notes: Vec::new(),
        }
    }

    pub fn succeeded() -> Self {
        Self::new(Status::Succeeded)
    }

    pub fn dry_run(note: impl Into<String>) -> Self {
        Self::new(Status::DryRun).note(note)
    }

    pub fn with_discovery(mut self, discovery: Option<Discovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn note(mut self, line: impl Into<String>) -> Self {
        self.notes.push(line.into());
        self
    }
}

pub trait Action {
    fn name(&self) -> &str;
    fn kind(&self) -> ActionKind;
    fn description(&self) -> &str;

    /// Whether running the action tears infrastructure down. Orchestrated
    /// runs visit levels in reverse for destructive actions.
    fn is_destructive(&self) -> bool {
        false
    }

    fn execute(
        &self,
        run: &RunConfig,
        services: &Services,
        input: ActionInput,
    ) -> Result<ActionOutcome>;
}

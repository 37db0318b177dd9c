//! Name-to-action mapping.
//!
//! A registry is an ordinary value: the CLI builds one at start-up and hands
//! it to whatever dispatches actions. Names are unique case-insensitively
//! across built-ins, custom commands and groups.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::action::{
    Action, CustomAction, GroupAction, TerraformAction, TerraformOp, TestAction,
};
use crate::definitions::{self, Definitions};
use crate::error::{Result, RoverError};

#[derive(Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, Rc<dyn Action>>,
    source: Option<PathBuf>,
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// init, plan, apply, destroy, validate, fmt and test.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for op in TerraformOp::ALL {
            registry.insert(Rc::new(TerraformAction::new(op)));
        }
        registry.insert(Rc::new(TestAction));
        registry
    }

    fn insert(&mut self, action: Rc<dyn Action>) {
        self.actions.insert(key(action.name()), action);
    }

    pub fn register(&mut self, action: Rc<dyn Action>) -> Result<()> {
        let name = action.name();
        if name.trim().is_empty() {
            return Err(RoverError::MissingField("action name"));
        }
        if self.actions.contains_key(&key(name)) {
            return Err(RoverError::NameCollision(name.to_string()));
        }
        tracing::debug!(name, kind = %action.kind(), "registered action");
        self.insert(action);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Rc<dyn Action>> {
        self.actions
            .get(&key(name))
            .cloned()
            .ok_or_else(|| RoverError::ActionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(&key(name))
    }

    /// Actions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn Action>> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Definitions file the custom actions came from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Register every command, then every group. A group's members must
    /// already be registered when the group is reached.
    pub fn add_definitions(&mut self, defs: &Definitions) -> Result<()> {
        for (name, def) in &defs.commands {
            self.register(Rc::new(CustomAction::new(
                name.as_str(),
                def.executable.as_str(),
                def.description.as_str(),
                &def.args,
            )))?;
        }
        for (name, members) in &defs.groups {
            if self.contains(name) {
                return Err(RoverError::NameCollision(name.clone()));
            }
            let resolved = members
                .iter()
                .map(|member| {
                    self.resolve(member).map_err(|_| RoverError::UnknownGroupMember {
                        group: name.clone(),
                        member: member.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.register(Rc::new(GroupAction::new(name.as_str(), resolved)))?;
        }
        Ok(())
    }

    /// Built-ins plus the first definitions file found among `candidates`.
    /// When none exists the packaged default is written to `seed` first.
    pub fn load(candidates: &[PathBuf], seed: &Path) -> Result<Self> {
        let mut registry = Self::with_builtins();
        let (defs, path) = definitions::load_first(candidates, seed)?;
        registry.add_definitions(&defs)?;
        registry.source = Some(path);
        Ok(registry)
    }
}

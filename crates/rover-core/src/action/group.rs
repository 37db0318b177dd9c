use std::rc::Rc;

use crate::action::{Action, ActionInput, ActionKind, ActionOutcome, Services, Status};
use crate::error::{Result, RoverError};
use crate::run_config::RunConfig;

/// Runs member actions in order against the same unit, stopping at the first
/// failure. Members that already ran are not rolled back.
pub struct GroupAction {
    name: String,
    description: String,
    members: Vec<Rc<dyn Action>>,
}

impl GroupAction {
    /// `members` are resolved by the registry before the group is built.
    pub fn new(name: impl Into<String>, members: Vec<Rc<dyn Action>>) -> Self {
        let name = name.into();
        let description = format!(
            "Run {}",
            members
                .iter()
                .map(|m| m.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            name,
            description,
            members,
        }
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name()).collect()
    }
}

impl Action for GroupAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Group
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_destructive(&self) -> bool {
        self.members.iter().any(|m| m.is_destructive())
    }

    fn execute(
        &self,
        run: &RunConfig,
        services: &Services,
        input: ActionInput,
    ) -> Result<ActionOutcome> {
        let mut discovery = input.discovery;
        let mut notes = Vec::new();
        let mut statuses = Vec::with_capacity(self.members.len());

        for member in &self.members {
            tracing::info!(
                group = %self.name,
                member = member.name(),
                unit = %run.unit_name(),
                "group step"
            );
            let outcome = member
                .execute(run, services, ActionInput::with_discovery(discovery.take()))
                .map_err(|e| RoverError::GroupMemberFailed {
                    group: self.name.clone(),
                    member: member.name().to_string(),
                    error: Box::new(e),
                })?;
            discovery = outcome.discovery;
            notes.extend(outcome.notes.into_iter().map(|n| format!("{}: {n}", member.name())));
            statuses.push(outcome.status);
        }

        let status = if statuses.iter().all(|s| *s == Status::DryRun) && !statuses.is_empty() {
            Status::DryRun
        } else {
            Status::Succeeded
        };
        Ok(ActionOutcome {
            status,
            discovery,
            notes,
        })
    }
}

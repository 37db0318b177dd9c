use crate::action::template::ArgTemplate;
use crate::action::{Action, ActionInput, ActionKind, ActionOutcome, Services};
use crate::error::Result;
use crate::process::CommandSpec;
use crate::run_config::RunConfig;

/// Runs a user-declared executable with templated arguments.
#[derive(Debug, Clone)]
pub struct CustomAction {
    name: String,
    description: String,
    executable: String,
    args: Vec<ArgTemplate>,
}

impl CustomAction {
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<String>,
        description: impl Into<String>,
        args: &[String],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            executable: executable.into(),
            args: args.iter().map(|a| ArgTemplate::parse(a)).collect(),
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn command(&self, run: &RunConfig) -> CommandSpec {
        CommandSpec::new(&self.executable)
            .args(self.args.iter().map(|a| a.render(run)))
            .cwd(&run.source_path)
    }
}

impl Action for CustomAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Custom
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn execute(
        &self,
        run: &RunConfig,
        services: &Services,
        input: ActionInput,
    ) -> Result<ActionOutcome> {
        let spec = self.command(run);
        if run.dry_run {
            return Ok(ActionOutcome::dry_run(format!("would run: {}", spec.display_line()))
                .with_discovery(input.discovery));
        }

        tracing::info!(
            action = %self.name,
            command = %spec.display_line(),
            "running custom action"
        );
        let out = services.runner.run(&spec)?.check(&self.executable)?;
        let outcome = out
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .fold(ActionOutcome::succeeded(), |o, l| o.note(l));
        Ok(outcome.with_discovery(input.discovery))
    }
}

use crate::cmd::{with_services, CommonArgs};
use crate::output::{print_json, print_yaml};
use anyhow::Context;
use clap::Args;
use rover_core::action::{ActionInput, ActionOutcome, Status};
use rover_core::registry::ActionRegistry;
use rover_core::run_config::{RunConfig, RunConfigInput};
use serde::Serialize;
use std::path::PathBuf;

/// Flags accepted by every action subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct UnitArgs {
    /// Landing zone source directory
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Directory holding the unit's variable files
    #[arg(long = "config-path", visible_alias = "config-dir")]
    pub config_path: Option<PathBuf>,

    /// Level tag, e.g. level0
    #[arg(long)]
    pub level: Option<String>,

    /// Stack name within the level
    #[arg(long)]
    pub stack: Option<String>,

    /// State file base name [default: last segment of --source]
    #[arg(long = "statename")]
    pub state_name: Option<String>,

    /// This unit creates the state backend
    #[arg(long)]
    pub launchpad: bool,

    /// Directory holding the verification suite [default: --source]
    #[arg(long = "test-source")]
    pub test_source: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl UnitArgs {
    pub fn into_input(self) -> RunConfigInput {
        RunConfigInput {
            launchpad: self.launchpad,
            source_path: self.source,
            config_path: self.config_path,
            test_path: self.test_source,
            level: self.level,
            stack: self.stack,
            environment: self.common.environment,
            state_name: self.state_name,
            workspace: self.common.workspace,
            state_subscription: self.common.state_subscription,
            target_subscription: self.common.target_subscription,
            dry_run: self.common.dry_run,
            data_root: self.common.data_root,
            report_dir: self.common.report_dir,
        }
    }
}

#[derive(Serialize)]
struct UnitReport<'a> {
    unit: String,
    action: &'a str,
    status: Status,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a RunConfig>,
}

pub fn run(
    registry: &ActionRegistry,
    name: &str,
    args: UnitArgs,
    json: bool,
) -> anyhow::Result<()> {
    let action = registry.resolve(name)?;

    with_services(|auth, services| {
        let run = RunConfig::build(args.into_input(), auth)
            .context("invalid unit configuration")?;
        tracing::debug!(
            unit = %run.unit_name(),
            action = action.name(),
            mode = %run.mode,
            "resolved unit"
        );

        if run.dry_run && !json {
            print_yaml(&run)?;
        }

        let outcome = action
            .execute(&run, services, ActionInput::default())
            .with_context(|| format!("{} failed for {}", action.name(), run.unit_name()))?;

        print_outcome(&run, action.name(), &outcome, json)
    })
}

fn print_outcome(
    run: &RunConfig,
    action: &str,
    outcome: &ActionOutcome,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        return print_json(&UnitReport {
            unit: run.unit_name(),
            action,
            status: outcome.status,
            notes: &outcome.notes,
            config: run.dry_run.then_some(run),
        });
    }
    println!("{action} {}: {}", run.unit_name(), outcome.status);
    for note in &outcome.notes {
        println!("  {note}");
    }
    Ok(())
}

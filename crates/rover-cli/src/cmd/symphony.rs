use crate::cmd::{with_services, CommonArgs};
use crate::output::{print_json, print_table, print_yaml};
use anyhow::Context;
use clap::Subcommand;
use rover_core::registry::ActionRegistry;
use rover_core::symphony::{self, SymphonyConfig};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum SymphonySubcommand {
    /// Run an action against every unit, level by level
    Run {
        /// Action to run (see `rover actions`)
        action: String,

        /// Symphony file describing levels and stacks
        #[arg(long, short = 'f')]
        file: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Show the units in the order an action would visit them
    List {
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Order for this action; destructive actions reverse the levels
        #[arg(long)]
        action: Option<String>,
    },

    /// Check every stack is complete and its directories exist
    Validate {
        #[arg(long, short = 'f')]
        file: PathBuf,
    },
}

pub fn run(
    registry: &ActionRegistry,
    subcmd: SymphonySubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        SymphonySubcommand::Run {
            action,
            file,
            common,
        } => run_action(registry, &action, &file, &common, json),
        SymphonySubcommand::List { file, action } => list(registry, &file, action.as_deref(), json),
        SymphonySubcommand::Validate { file } => validate(&file, json),
    }
}

fn load(file: &Path) -> anyhow::Result<SymphonyConfig> {
    SymphonyConfig::load(file).with_context(|| format!("failed to load {}", file.display()))
}

fn run_action(
    registry: &ActionRegistry,
    name: &str,
    file: &Path,
    common: &CommonArgs,
    json: bool,
) -> anyhow::Result<()> {
    let action = registry.resolve(name)?;
    let config = load(file)?;
    let overrides = common.overrides();

    with_services(|auth, services| {
        let planned = if overrides.dry_run {
            let runs = symphony::build_runs(&config, &overrides, action.is_destructive(), auth)?;
            if !json {
                print_yaml(&runs)?;
            }
            Some(runs)
        } else {
            None
        };

        let results = symphony::run(&config, &*action, &overrides, auth, services)?;

        if json {
            return match planned {
                Some(runs) => print_json(&serde_json::json!({
                    "units": runs,
                    "results": results,
                })),
                None => print_json(&results),
            };
        }
        print_table(
            &["UNIT", "STATUS"],
            results
                .iter()
                .map(|r| vec![r.unit.clone(), r.status.to_string()])
                .collect(),
        );
        for result in results.iter().filter(|r| !r.notes.is_empty()) {
            println!();
            println!("{}:", result.unit);
            for note in &result.notes {
                println!("  {note}");
            }
        }
        Ok(())
    })
}

fn list(
    registry: &ActionRegistry,
    file: &Path,
    action: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let destructive = match action {
        Some(name) => registry.resolve(name)?.is_destructive(),
        None => false,
    };
    let units = load(file)?.units(destructive)?;

    if json {
        return print_json(&units);
    }
    print_table(
        &["LEVEL", "STACK", "LAUNCHPAD", "STATE", "SOURCE", "CONFIG"],
        units
            .iter()
            .map(|u| {
                vec![
                    u.level.clone(),
                    u.stack.clone(),
                    if u.launchpad { "yes" } else { "" }.to_string(),
                    u.state_name.clone(),
                    u.source_path.display().to_string(),
                    u.config_path.display().to_string(),
                ]
            })
            .collect(),
    );
    Ok(())
}

fn validate(file: &Path, json: bool) -> anyhow::Result<()> {
    let config = load(file)?;
    let units = config.units(false)?;
    if json {
        return print_json(&serde_json::json!({
            "valid": true,
            "levels": config.levels.len(),
            "units": units.len(),
        }));
    }
    println!(
        "{}: {} unit(s) across {} level(s), ok",
        file.display(),
        units.len(),
        config.levels.len()
    );
    Ok(())
}

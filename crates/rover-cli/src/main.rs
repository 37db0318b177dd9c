mod cmd;
mod output;

use anyhow::Context;
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use cmd::symphony::SymphonySubcommand;
use cmd::unit::UnitArgs;
use rover_core::paths;
use rover_core::registry::ActionRegistry;

/// Subcommand names owned by the CLI itself; actions cannot take them.
const RESERVED: &[&str] = &["actions", "symphony", "help"];

#[derive(Parser)]
#[command(
    name = "rover",
    about = "Deploy Terraform landing zones level by level, from the state backend up",
    version,
    propagate_version = true
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in and custom actions
    Actions,

    /// Run an action across every level and stack of a symphony file
    Symphony {
        #[command(subcommand)]
        subcommand: SymphonySubcommand,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    // Logging starts before the registry loads so its events are kept.
    init_tracing(verbosity(std::env::args().skip(1)));

    // A broken definitions file must not take `--help` down with it: build
    // the CLI from the built-ins and report the error once parsing is done.
    let (registry, load_error) = match load_registry() {
        Ok(registry) => (registry, None),
        Err(e) => (ActionRegistry::with_builtins(), Some(e)),
    };
    let (command, skipped) = build_command(&registry);
    let matches = match command.try_get_matches() {
        Ok(matches) => matches,
        Err(e) if is_informational(&e) => e.exit(),
        Err(e) => match load_error {
            Some(load_error) => return Err(load_error),
            None => e.exit(),
        },
    };
    if let Some(e) = load_error {
        return Err(e);
    }

    for name in skipped {
        tracing::warn!(action = %name, "action name is reserved, skipping");
    }

    let json = matches.get_flag("json");

    if let Some((name, sub)) = matches.subcommand() {
        if is_action(&registry, name) {
            let args = match UnitArgs::from_arg_matches(sub) {
                Ok(args) => args,
                Err(e) => e.exit(),
            };
            return cmd::unit::run(&registry, name, args, json);
        }
    }

    let cli = parse_builtin(&matches);
    match cli.command {
        Commands::Actions => cmd::actions::run(&registry, json),
        Commands::Symphony { subcommand } => cmd::symphony::run(&registry, subcommand, json),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Count `-v`, `-vv` and `--verbose` ahead of parsing, which has to wait
/// for the registry.
fn verbosity(args: impl Iterator<Item = String>) -> u8 {
    let mut count = 0u8;
    for arg in args {
        if arg == "--" {
            break;
        }
        if arg == "--verbose" {
            count = count.saturating_add(1);
        } else if let Some(flags) = arg.strip_prefix('-') {
            if !flags.is_empty() && !flags.starts_with('-') && flags.chars().all(|c| c == 'v') {
                count = count.saturating_add(flags.len() as u8);
            }
        }
    }
    count
}

fn is_informational(e: &clap::Error) -> bool {
    matches!(
        e.kind(),
        clap::error::ErrorKind::DisplayHelp
            | clap::error::ErrorKind::DisplayVersion
            | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
    )
}

fn load_registry() -> anyhow::Result<ActionRegistry> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let home = paths::home_dir()?;
    let seed = home.join(paths::ROVER_DIR).join(paths::DEFINITIONS_FILE);
    ActionRegistry::load(&paths::definition_candidates(&cwd, &home), &seed)
        .context("failed to load action definitions")
}

fn is_action(registry: &ActionRegistry, name: &str) -> bool {
    !RESERVED.contains(&name) && registry.contains(name)
}

/// The static CLI plus one subcommand per registered action. Returns the
/// action names that were skipped for clashing with [`RESERVED`].
fn build_command(registry: &ActionRegistry) -> (clap::Command, Vec<String>) {
    let mut command = Cli::command();
    let mut skipped = Vec::new();
    for action in registry.iter() {
        let name = action.name().to_lowercase();
        if RESERVED.contains(&name.as_str()) {
            skipped.push(name);
            continue;
        }
        let sub = clap::Command::new(name).about(action.description().to_string());
        command = command.subcommand(UnitArgs::augment_args(sub));
    }
    (command, skipped)
}

fn parse_builtin(matches: &ArgMatches) -> Cli {
    match Cli::from_arg_matches(matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    }
}

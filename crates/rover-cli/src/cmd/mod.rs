pub mod actions;
pub mod symphony;
pub mod unit;

use clap::Args;
use rover_core::action::Services;
use rover_core::cloud::{Auth, AzCli, CachedAuth};
use rover_core::engine::TerraformCli;
use rover_core::process::SystemRunner;
use rover_core::symphony::Overrides;
use std::path::PathBuf;

/// Flags shared by single-unit actions and symphony runs.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Environment tag used for backend discovery [default: sandpit]
    #[arg(long)]
    pub environment: Option<String>,

    /// Blob container holding state files [default: tfstate]
    #[arg(long)]
    pub workspace: Option<String>,

    /// Subscription holding the state backend [default: current]
    #[arg(long = "state-sub")]
    pub state_subscription: Option<String>,

    /// Subscription resources are deployed to [default: current]
    #[arg(long = "target-sub")]
    pub target_subscription: Option<String>,

    /// Print the resolved configuration and make no changes
    #[arg(long)]
    pub dry_run: bool,

    /// Root for per-unit scratch directories [default: ~/.rover/data]
    #[arg(long = "data-dir", env = "ROVER_DATA_DIR")]
    pub data_root: Option<PathBuf>,

    /// Where test reports are written [default: current directory]
    #[arg(long = "report-dir")]
    pub report_dir: Option<PathBuf>,
}

impl CommonArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            environment: self.environment.clone(),
            workspace: self.workspace.clone(),
            state_subscription: self.state_subscription.clone(),
            target_subscription: self.target_subscription.clone(),
            dry_run: self.dry_run,
            data_root: self.data_root.clone(),
            report_dir: self.report_dir.clone(),
        }
    }
}

/// Wire the production collaborators and hand them to `f`. Auth lookups are
/// cached for the whole invocation.
pub fn with_services<T>(
    f: impl FnOnce(&dyn Auth, &Services) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let runner = SystemRunner;
    let az = AzCli::new(&runner);
    let auth = CachedAuth::new(&az);
    let engine = TerraformCli::new(&runner);
    let services = Services {
        engine: &engine,
        inventory: &az,
        blobs: &az,
        runner: &runner,
    };
    f(&auth, &services)
}

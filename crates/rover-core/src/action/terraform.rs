use crate::action::{Action, ActionInput, ActionKind, ActionOutcome, Services, Status};
use crate::backend::{Bootstrap, Handoff};
use crate::engine::{ApplyRequest, DestroyRequest, EngineTarget, PlanRequest};
use crate::error::{Result, RoverError};
use crate::io;
use crate::run_config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerraformOp {
    Init,
    Plan,
    Apply,
    Destroy,
    Validate,
    Format,
}

impl TerraformOp {
    pub const ALL: [TerraformOp; 6] = [
        TerraformOp::Init,
        TerraformOp::Plan,
        TerraformOp::Apply,
        TerraformOp::Destroy,
        TerraformOp::Validate,
        TerraformOp::Format,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TerraformOp::Init => "init",
            TerraformOp::Plan => "plan",
            TerraformOp::Apply => "apply",
            TerraformOp::Destroy => "destroy",
            TerraformOp::Validate => "validate",
            TerraformOp::Format => "fmt",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TerraformOp::Init => "Attach to the state backend and initialise providers",
            TerraformOp::Plan => "Show the changes an apply would make",
            TerraformOp::Apply => "Plan and apply changes",
            TerraformOp::Destroy => "Destroy everything the unit deployed",
            TerraformOp::Validate => "Check the configuration is valid",
            TerraformOp::Format => "Check the configuration is formatted",
        }
    }
}

/// A built-in action driving one engine operation behind the backend
/// handoff.
#[derive(Debug, Clone, Copy)]
pub struct TerraformAction {
    op: TerraformOp,
}

impl TerraformAction {
    pub fn new(op: TerraformOp) -> Self {
        Self { op }
    }

    pub fn op(&self) -> TerraformOp {
        self.op
    }
}

fn plan(
    run: &RunConfig,
    services: &Services,
    handoff: &Handoff,
    var_files: &[std::path::PathBuf],
) -> Result<bool> {
    let local = handoff.local_state();
    let out = run.plan_path();
    services.engine.plan(
        &EngineTarget::for_run(run),
        &PlanRequest {
            var_files,
            out: &out,
            state: local.as_deref(),
        },
    )
}

impl Action for TerraformAction {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Builtin
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn is_destructive(&self) -> bool {
        self.op == TerraformOp::Destroy
    }

    fn execute(
        &self,
        run: &RunConfig,
        services: &Services,
        input: ActionInput,
    ) -> Result<ActionOutcome> {
        if run.dry_run {
            return Ok(ActionOutcome::dry_run(format!(
                "would run terraform {} for {}",
                self.op.name(),
                run.unit_name()
            ))
            .with_discovery(input.discovery));
        }

        let target = EngineTarget::for_run(run);
        let mut handoff = Handoff::new(run, services);

        if self.op == TerraformOp::Destroy && run.is_launchpad() {
            handoff.destroy_launchpad(&run.var_files()?)?;
            return Ok(ActionOutcome::succeeded()
                .note(format!("destroyed {}", run.unit_name())));
        }

        handoff.attach(input.discovery)?;

        let outcome = match self.op {
            TerraformOp::Init => ActionOutcome::succeeded(),
            TerraformOp::Plan => {
                let var_files = run.var_files()?;
                if plan(run, services, &handoff, &var_files)? {
                    ActionOutcome::succeeded()
                        .note(format!("plan saved to {}", run.plan_path().display()))
                } else {
                    ActionOutcome::new(Status::NoChanges)
                }
            }
            TerraformOp::Apply => {
                let var_files = run.var_files()?;
                if !plan(run, services, &handoff, &var_files)? {
                    tracing::info!(unit = %run.unit_name(), "plan has no changes, skipping apply");
                    io::remove_file_if_exists(&run.plan_path())?;
                    return Ok(ActionOutcome::new(Status::NoChanges)
                        .with_discovery(handoff.discovery().cloned()));
                }
                let plan_file = run.plan_path();
                let local = handoff.local_state();
                services.engine.apply(
                    &target,
                    &ApplyRequest {
                        plan: &plan_file,
                        state_out: local.as_deref(),
                    },
                )?;
                io::remove_file_if_exists(&plan_file)?;
                let mut outcome = ActionOutcome::succeeded();
                if run.is_launchpad() {
                    match handoff.complete_bootstrap()? {
                        Some(Bootstrap::Migrated(record)) => {
                            outcome = outcome.note(format!(
                                "state moved to storage account {}",
                                record.storage_account_name
                            ));
                        }
                        Some(Bootstrap::BackendChanged(record)) => {
                            outcome = outcome.note(format!(
                                "backend is now storage account {}",
                                record.storage_account_name
                            ));
                        }
                        None => {}
                    }
                }
                outcome
            }
            TerraformOp::Destroy => {
                services.engine.destroy(
                    &target,
                    &DestroyRequest {
                        var_files: &run.var_files()?,
                        state: None,
                    },
                )?;
                io::remove_dir_if_exists(&run.data_dir)?;
                ActionOutcome::succeeded().note(format!("destroyed {}", run.unit_name()))
            }
            TerraformOp::Validate => {
                let validation = services.engine.validate(&target)?;
                if !validation.valid || validation.error_count() > 0 {
                    return Err(RoverError::ValidationFailed(validation.diagnostics));
                }
                validation
                    .diagnostics
                    .into_iter()
                    .fold(ActionOutcome::succeeded(), |outcome, d| {
                        outcome.note(format!("{}: {}", d.severity, d.summary))
                    })
            }
            TerraformOp::Format => {
                let check = services.engine.format_check(&target, true)?;
                if !check.ok() {
                    return Err(RoverError::FormatCheckFailed(check.files));
                }
                ActionOutcome::succeeded()
            }
        };
        Ok(outcome.with_discovery(handoff.discovery().cloned()))
    }
}

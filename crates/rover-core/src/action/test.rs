use crate::action::{Action, ActionInput, ActionKind, ActionOutcome, Services};
use crate::backend::{locate, BackendQuery, Discovery};
use crate::error::{Result, RoverError};
use crate::process::CommandSpec;
use crate::report::TestReport;
use crate::run_config::RunConfig;

pub const GO: &str = "go";

/// Verifies a deployed unit by running its Go test suite against the state
/// held in the remote backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestAction;

impl TestAction {
    /// Build tags select the suite for this level, and for the stack when set.
    fn tags(run: &RunConfig) -> String {
        match &run.stack {
            Some(stack) => format!("{},{stack}", run.level),
            None => run.level.clone(),
        }
    }

    pub fn command(run: &RunConfig, state_file: &std::path::Path) -> CommandSpec {
        CommandSpec::new(GO)
            .args(["test", "-v", "-count=1", "-tags"])
            .arg(Self::tags(run))
            .arg("./...")
            .cwd(run.test_dir())
            .env("STATE_FILE_PATH", state_file.display().to_string())
            .env("ENVIRONMENT", run.environment_name.as_str())
            .env("LEVEL", run.level.as_str())
            .env("ARM_SUBSCRIPTION_ID", run.target_subscription.as_str())
    }
}

impl Action for TestAction {
    fn name(&self) -> &str {
        "test"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Builtin
    }

    fn description(&self) -> &str {
        "Run the verification suite against deployed state"
    }

    fn execute(
        &self,
        run: &RunConfig,
        services: &Services,
        input: ActionInput,
    ) -> Result<ActionOutcome> {
        if run.dry_run {
            let preview = Self::command(run, &run.local_state_path());
            return Ok(ActionOutcome::dry_run(format!(
                "would run: {} (in {})",
                preview.display_line(),
                run.test_dir().display()
            ))
            .with_discovery(input.discovery));
        }

        let discovery = match input.discovery {
            Some(d) => d,
            None => locate(services.inventory, &BackendQuery::for_run(run))?,
        };
        let record = match &discovery {
            Discovery::Found(record) => record,
            Discovery::NotDeployed => {
                return Err(RoverError::LaunchpadNotDeployed {
                    level: run.level.clone(),
                    environment: run.environment_name.clone(),
                })
            }
        };

        // Removed on drop, whatever the suite's outcome.
        let scratch = tempfile::Builder::new().prefix("rover-test-").tempdir()?;
        let state_file = scratch.path().join(run.state_blob_name());
        services
            .blobs
            .download(record, &run.state_blob_name(), &state_file)?;

        let spec = Self::command(run, &state_file);
        tracing::info!(unit = %run.unit_name(), command = %spec.display_line(), "running tests");
        let out = services.runner.run(&spec)?;

        let report = TestReport::from_output(run, out.exit_code, &out.stdout);
        let report_path = TestReport::path_for(run);
        report.write(&report_path)?;

        let failed = report.failures();
        if failed > 0 {
            return Err(RoverError::TestsFailed {
                failed,
                report: report_path,
            });
        }
        Ok(ActionOutcome::succeeded()
            .note(format!(
                "{} passed, {} skipped, report written to {}",
                report.passed,
                report.skipped,
                report_path.display()
            ))
            .with_discovery(Some(discovery)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Status;
    use crate::process::ExecOutput;
    use crate::testing::Harness;

    fn harness() -> Harness {
        let h = Harness::with(false, "landingzones/management", "level1", |input, root| {
            let tests = root.join("tests/management");
            std::fs::create_dir_all(&tests).unwrap();
            input.test_path = Some(tests);
            input.stack = Some("management".into());
        });
        h.deploy_backend("stlevel1");
        h.blobs.put("stlevel1", "management.tfstate", "{\"serial\":3}");
        h
    }

    #[test]
    fn runs_suite_with_state_and_writes_report() {
        let h = harness();
        h.runner.respond(
            "go test",
            ExecOutput {
                stdout: "--- PASS: TestStorage (0.20s)\n--- SKIP: TestSlow (0.00s)\nok\n".into(),
                ..ExecOutput::default()
            },
        );

        let outcome = TestAction
            .execute(&h.run, &h.services(), ActionInput::default())
            .unwrap();
        assert_eq!(outcome.status, Status::Succeeded);
        assert!(outcome.notes[0].starts_with("1 passed, 1 skipped"));

        let call = &h.runner.calls()[0];
        assert_eq!(
            call.display_line(),
            "go test -v -count=1 -tags level1,management ./..."
        );
        assert_eq!(call.cwd.as_deref(), Some(h.path().join("tests/management").as_path()));
        let state = call
            .env
            .iter()
            .find(|(k, _)| k == "STATE_FILE_PATH")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(state.ends_with("management.tfstate"));
        assert!(!std::path::Path::new(&state).exists(), "downloaded state removed");
        assert!(!h.run.data_dir.exists(), "no scratch left in the unit's data dir");
        assert!(TestReport::path_for(&h.run).exists());
    }

    #[test]
    fn failures_are_reported_and_scratch_still_removed() {
        let h = harness();
        h.runner.respond(
            "go test",
            ExecOutput {
                exit_code: 1,
                stdout: "--- FAIL: TestStorage (0.20s)\nFAIL\n".into(),
                ..ExecOutput::default()
            },
        );
        let err = TestAction
            .execute(&h.run, &h.services(), ActionInput::default())
            .unwrap_err();
        match err {
            RoverError::TestsFailed { failed, report } => {
                assert_eq!(failed, 1);
                assert!(report.exists());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!h.run.data_dir.exists());
    }

    #[test]
    fn requires_a_deployed_backend() {
        let h = Harness::landing_zone();
        let err = TestAction
            .execute(&h.run, &h.services(), ActionInput::default())
            .unwrap_err();
        assert!(matches!(err, RoverError::LaunchpadNotDeployed { .. }));
        assert!(h.runner.calls().is_empty());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let h = Harness::with(false, "landingzones/management", "level1", |input, _| {
            input.dry_run = true;
        });
        let outcome = TestAction
            .execute(&h.run, &h.services(), ActionInput::default())
            .unwrap();
        assert_eq!(outcome.status, Status::DryRun);
        assert!(outcome.notes[0].contains("-tags level1 ./..."));
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.inventory.queries(), 0);
    }
}

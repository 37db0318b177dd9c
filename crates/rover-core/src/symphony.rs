//! Multi-level, multi-stack orchestration.
//!
//! A symphony file lists levels in deployment order, each with its stacks.
//! Every unit is resolved and checked before the first one runs; then the
//! chosen action runs unit by unit. Destructive actions walk the levels
//! backwards so the launchpad goes last. Stacks within a level always keep
//! their declared order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::action::{Action, ActionInput, Services, Status};
use crate::cloud::{Auth, CachedAuth};
use crate::error::{Result, RoverError};
use crate::paths;
use crate::run_config::{RunConfig, RunConfigInput};

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackConfig {
    pub stack: String,
    #[serde(default)]
    pub landing_zone_path: Option<PathBuf>,
    #[serde(default)]
    pub configuration_path: Option<PathBuf>,
    #[serde(default)]
    pub tf_state: Option<String>,
    #[serde(default)]
    pub state_subscription: Option<String>,
    #[serde(default)]
    pub target_subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LevelConfig {
    pub level: String,
    #[serde(default)]
    pub launchpad: bool,
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SymphonyConfig {
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    pub levels: Vec<LevelConfig>,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl SymphonyConfig {
    pub fn parse(data: &str, base_dir: &Path) -> Result<Self> {
        let mut config: SymphonyConfig = serde_yaml::from_str(data)?;
        config.base_dir = base_dir.to_path_buf();
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            RoverError::Symphony(format!("cannot read {}: {e}", path.display()))
        })?;
        let absolute = std::path::absolute(path)?;
        let base = absolute.parent().unwrap_or(Path::new("."));
        Self::parse(&data, base)
    }

    /// Levels in the order an action visits them.
    pub fn visit_order(&self, destructive: bool) -> Vec<&LevelConfig> {
        if destructive {
            self.levels.iter().rev().collect()
        } else {
            self.levels.iter().collect()
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Check every stack and produce its raw unit settings, in visit order.
    /// Nothing runs if any stack is incomplete.
    pub fn units(&self, destructive: bool) -> Result<Vec<PlannedUnit>> {
        if self.levels.is_empty() {
            return Err(RoverError::Symphony("no levels declared".into()));
        }
        let mut problems = Vec::new();
        let mut units = Vec::new();

        for level in self.visit_order(destructive) {
            if level.level.trim().is_empty() {
                problems.push("a level has an empty name".to_string());
                continue;
            }
            if level.stacks.is_empty() {
                problems.push(format!("{}: no stacks declared", level.level));
            }
            for stack in &level.stacks {
                let unit = format!("{}/{}", level.level, stack.stack);
                let source = stack.landing_zone_path.as_deref().map(|p| self.resolve(p));
                let config = stack.configuration_path.as_deref().map(|p| self.resolve(p));
                match (&source, &config) {
                    (None, _) => problems.push(format!("{unit}: landingZonePath is required")),
                    (_, None) => problems.push(format!("{unit}: configurationPath is required")),
                    (Some(s), Some(c)) => {
                        for p in [s, c] {
                            if !p.exists() {
                                problems.push(format!("{unit}: {} does not exist", p.display()));
                            }
                        }
                    }
                }
                let (Some(source), Some(config)) = (source, config) else {
                    continue;
                };
                units.push(PlannedUnit {
                    unit,
                    level: level.level.clone(),
                    stack: stack.stack.clone(),
                    launchpad: level.launchpad,
                    source_path: source,
                    config_path: config,
                    state_name: stack
                        .tf_state
                        .as_deref()
                        .map(|s| s.strip_suffix(paths::STATE_SUFFIX).unwrap_or(s))
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or(stack.stack.as_str())
                        .to_string(),
                    state_subscription: stack.state_subscription.clone(),
                    target_subscription: stack.target_subscription.clone(),
                });
            }
        }

        if !problems.is_empty() {
            return Err(RoverError::Symphony(problems.join("; ")));
        }
        Ok(units)
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Settings given on the command line that apply to every unit.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub environment: Option<String>,
    pub workspace: Option<String>,
    pub state_subscription: Option<String>,
    pub target_subscription: Option<String>,
    pub dry_run: bool,
    pub data_root: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedUnit {
    pub unit: String,
    pub level: String,
    pub stack: String,
    pub launchpad: bool,
    pub source_path: PathBuf,
    pub config_path: PathBuf,
    pub state_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_subscription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_subscription: Option<String>,
}

impl PlannedUnit {
    /// Command-line values win over the file; per-stack subscriptions win
    /// over both.
    pub fn input(&self, config: &SymphonyConfig, overrides: &Overrides) -> RunConfigInput {
        RunConfigInput {
            launchpad: self.launchpad,
            source_path: Some(self.source_path.clone()),
            config_path: Some(self.config_path.clone()),
            test_path: None,
            level: Some(self.level.clone()),
            stack: Some(self.stack.clone()),
            environment: overrides
                .environment
                .clone()
                .or_else(|| config.environment.clone()),
            state_name: Some(self.state_name.clone()),
            workspace: overrides
                .workspace
                .clone()
                .or_else(|| config.workspace.clone()),
            state_subscription: self
                .state_subscription
                .clone()
                .or_else(|| overrides.state_subscription.clone()),
            target_subscription: self
                .target_subscription
                .clone()
                .or_else(|| overrides.target_subscription.clone()),
            dry_run: overrides.dry_run,
            data_root: overrides.data_root.clone(),
            report_dir: overrides.report_dir.clone(),
        }
    }
}

/// Resolve every unit to a [`RunConfig`]. Auth lookups are shared, so the
/// current subscription is asked for once however many units need it.
pub fn build_runs(
    config: &SymphonyConfig,
    overrides: &Overrides,
    destructive: bool,
    auth: &dyn Auth,
) -> Result<Vec<RunConfig>> {
    let auth = CachedAuth::new(auth);
    config
        .units(destructive)?
        .iter()
        .map(|unit| {
            RunConfig::build(unit.input(config, overrides), &auth)
                .map_err(|e| RoverError::Symphony(format!("{}: {e}", unit.unit)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitResult {
    pub unit: String,
    pub status: Status,
    pub notes: Vec<String>,
}

/// Run `action` against every unit in order, stopping at the first failure.
pub fn run(
    config: &SymphonyConfig,
    action: &dyn Action,
    overrides: &Overrides,
    auth: &dyn Auth,
    services: &Services,
) -> Result<Vec<UnitResult>> {
    let destructive = action.is_destructive();
    let runs = build_runs(config, overrides, destructive, auth)?;
    tracing::info!(
        action = action.name(),
        units = runs.len(),
        reverse = destructive,
        "starting symphony"
    );

    let mut results = Vec::with_capacity(runs.len());
    for run in &runs {
        let unit = run.unit_name();
        tracing::info!(unit = %unit, action = action.name(), "running unit");
        let outcome = action
            .execute(run, services, ActionInput::default())
            .map_err(|e| RoverError::UnitFailed {
                unit: unit.clone(),
                action: action.name().to_string(),
                error: Box::new(e),
            })?;
        results.push(UnitResult {
            unit,
            status: outcome.status,
            notes: outcome.notes,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ActionOutcome};
    use crate::testing::{FakeAuth, FakeBlobs, FakeEngine, FakeInventory, ScriptedRunner};
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct Recorder {
        destructive: bool,
        fail_on: Option<&'static str>,
        seen: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn new(destructive: bool) -> Self {
            Self {
                destructive,
                fail_on: None,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Action for Recorder {
        fn name(&self) -> &str {
            if self.destructive {
                "destroy"
            } else {
                "apply"
            }
        }
        fn kind(&self) -> ActionKind {
            ActionKind::Builtin
        }
        fn description(&self) -> &str {
            ""
        }
        fn is_destructive(&self) -> bool {
            self.destructive
        }
        fn execute(
            &self,
            run: &RunConfig,
            _services: &Services,
            _input: ActionInput,
        ) -> Result<ActionOutcome> {
            self.seen.borrow_mut().push(run.unit_name());
            if Some(run.level.as_str()) == self.fail_on {
                return Err(RoverError::Engine {
                    step: "apply",
                    message: "exited with code 1".into(),
                });
            }
            Ok(ActionOutcome::succeeded())
        }
    }

    struct Fixture {
        dir: TempDir,
        engine: FakeEngine,
        inventory: FakeInventory,
        blobs: FakeBlobs,
        runner: ScriptedRunner,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            for p in [
                "landingzones/caf_launchpad",
                "landingzones/caf_foundations",
                "landingzones/caf_networking",
                "configuration/level0",
                "configuration/level1",
                "configuration/level2",
            ] {
                std::fs::create_dir_all(dir.path().join(p)).unwrap();
            }
            Self {
                dir,
                engine: FakeEngine::default(),
                inventory: FakeInventory::default(),
                blobs: FakeBlobs::default(),
                runner: ScriptedRunner::new(),
            }
        }

        fn services(&self) -> Services<'_> {
            Services {
                engine: &self.engine,
                inventory: &self.inventory,
                blobs: &self.blobs,
                runner: &self.runner,
            }
        }

        fn overrides(&self) -> Overrides {
            Overrides {
                data_root: Some(self.dir.path().join("data")),
                report_dir: Some(self.dir.path().to_path_buf()),
                ..Overrides::default()
            }
        }

        fn config(&self, yaml: &str) -> SymphonyConfig {
            SymphonyConfig::parse(yaml, self.dir.path()).unwrap()
        }
    }

    const THREE_LEVELS: &str = "\
environment: demo
levels:
  - level: level0
    launchpad: true
    stacks:
      - stack: launchpad
        landingZonePath: landingzones/caf_launchpad
        configurationPath: configuration/level0
        tfState: caf_launchpad.tfstate
  - level: level1
    stacks:
      - stack: foundations
        landingZonePath: landingzones/caf_foundations
        configurationPath: configuration/level1
  - level: level2
    stacks:
      - stack: networking_hub
        landingZonePath: landingzones/caf_networking
        configurationPath: configuration/level2
      - stack: networking_spoke
        landingZonePath: landingzones/caf_networking
        configurationPath: configuration/level2
        targetSubscription: sub-spoke
";

    #[test]
    fn destroy_visits_levels_in_reverse() {
        let fx = Fixture::new();
        let config = fx.config(THREE_LEVELS);
        let auth = FakeAuth::new("sub-current");
        let services = fx.services();

        let apply = Recorder::new(false);
        run(&config, &apply, &fx.overrides(), &auth, &services).unwrap();
        assert_eq!(
            apply.seen.borrow().clone(),
            vec![
                "level0/launchpad",
                "level1/foundations",
                "level2/networking_hub",
                "level2/networking_spoke"
            ]
        );

        let destroy = Recorder::new(true);
        run(&config, &destroy, &fx.overrides(), &auth, &services).unwrap();
        assert_eq!(
            destroy.seen.borrow().clone(),
            vec![
                "level2/networking_hub",
                "level2/networking_spoke",
                "level1/foundations",
                "level0/launchpad"
            ]
        );
    }

    #[test]
    fn abc_ordering() {
        let fx = Fixture::new();
        let stack = "    stacks:\n      - stack: s\n        \
                     landingZonePath: landingzones/caf_foundations\n        \
                     configurationPath: configuration/level1\n";
        let yaml = format!("levels:\n  - level: A\n{stack}  - level: B\n{stack}  - level: C\n{stack}");
        let config = fx.config(&yaml);
        let levels = |destructive| {
            config
                .visit_order(destructive)
                .iter()
                .map(|l| l.level.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(levels(true), vec!["C", "B", "A"]);
        assert_eq!(levels(false), vec!["A", "B", "C"]);
    }

    #[test]
    fn units_resolve_state_names_paths_and_overrides() {
        let fx = Fixture::new();
        let config = fx.config(THREE_LEVELS);
        let overrides = Overrides {
            target_subscription: Some("sub-cli".into()),
            state_subscription: Some("sub-state".into()),
            dry_run: true,
            ..fx.overrides()
        };
        let runs = build_runs(&config, &overrides, false, &FakeAuth::failing()).unwrap();

        assert_eq!(runs[0].state_name, "caf_launchpad");
        assert!(runs[0].is_launchpad());
        assert_eq!(
            runs[0].source_path,
            fx.dir.path().join("landingzones/caf_launchpad")
        );
        assert_eq!(runs[0].environment_name, "demo");
        assert_eq!(runs[1].state_name, "foundations");
        assert!(!runs[1].is_launchpad());
        assert_eq!(runs[2].target_subscription, "sub-cli");
        assert_eq!(runs[3].target_subscription, "sub-spoke");
        assert!(runs.iter().all(|r| r.dry_run));
    }

    #[test]
    fn current_subscription_is_queried_once() {
        let fx = Fixture::new();
        let config = fx.config(THREE_LEVELS);
        let auth = FakeAuth::new("sub-current");
        let runs = build_runs(&config, &fx.overrides(), false, &auth).unwrap();
        assert_eq!(runs.len(), 4);
        assert_eq!(auth.subscription_calls(), 1);
        assert_eq!(auth.identity_calls(), 1);
    }

    #[test]
    fn incomplete_stack_aborts_before_anything_runs() {
        let fx = Fixture::new();
        let config = fx.config(
            "levels:\n  - level: level0\n    stacks:\n      - stack: lp\n        \
             landingZonePath: landingzones/caf_launchpad\n        \
             configurationPath: configuration/level0\n  - level: level1\n    stacks:\n      \
             - stack: broken\n        landingZonePath: landingzones/caf_foundations\n",
        );
        let recorder = Recorder::new(false);
        let err = run(
            &config,
            &recorder,
            &fx.overrides(),
            &FakeAuth::new("s"),
            &fx.services(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("level1/broken: configurationPath is required"));
        assert!(recorder.seen.borrow().is_empty());
    }

    #[test]
    fn missing_directory_is_reported_per_unit() {
        let fx = Fixture::new();
        let config = fx.config(
            "levels:\n  - level: level3\n    stacks:\n      - stack: ghost\n        \
             landingZonePath: landingzones/ghost\n        configurationPath: configuration/level0\n",
        );
        let err = config.units(false).unwrap_err();
        assert!(err.to_string().contains("level3/ghost"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn failing_unit_stops_the_run_with_context() {
        let fx = Fixture::new();
        let config = fx.config(THREE_LEVELS);
        let mut recorder = Recorder::new(false);
        recorder.fail_on = Some("level1");
        let err = run(
            &config,
            &recorder,
            &fx.overrides(),
            &FakeAuth::new("s"),
            &fx.services(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "apply failed for level1/foundations: terraform apply failed: exited with code 1"
        );
        assert_eq!(recorder.seen.borrow().len(), 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SymphonyConfig::parse("levels: []\nenvironmnt: x\n", Path::new("/")).unwrap_err();
        assert!(matches!(err, RoverError::Yaml(_)));
    }

    #[test]
    fn empty_symphony_is_an_error() {
        let fx = Fixture::new();
        let config = fx.config("levels: []\n");
        assert!(matches!(
            config.units(false).unwrap_err(),
            RoverError::Symphony(_)
        ));
    }
}

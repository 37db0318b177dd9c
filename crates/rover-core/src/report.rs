//! Structured report for a verification-suite run.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::Result;
use crate::io;
use crate::run_config::RunConfig;

pub const REPORT_SUFFIX: &str = ".test-report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    pub outcome: TestOutcome,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub generated_at: DateTime<Utc>,
    pub unit: String,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub environment: String,
    pub exit_code: i32,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tests: Vec<TestCase>,
}

fn result_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*--- (PASS|FAIL|SKIP): (\S+) \(([0-9.]+)s\)").unwrap()
    })
}

/// Pull per-test results out of `go test -v` output. Subtests are kept as
/// their own entries (`TestParent/child`).
pub fn parse_test_output(output: &str) -> Vec<TestCase> {
    output
        .lines()
        .filter_map(|line| {
            let caps = result_line_re().captures(line)?;
            let outcome = match &caps[1] {
                "PASS" => TestOutcome::Pass,
                "FAIL" => TestOutcome::Fail,
                _ => TestOutcome::Skip,
            };
            Some(TestCase {
                name: caps[2].to_string(),
                outcome,
                duration_secs: caps[3].parse().unwrap_or(0.0),
            })
        })
        .collect()
}

impl TestReport {
    pub fn from_output(run: &RunConfig, exit_code: i32, output: &str) -> Self {
        let tests = parse_test_output(output);
        let count = |o: TestOutcome| tests.iter().filter(|t| t.outcome == o).count();
        Self {
            generated_at: Utc::now(),
            unit: run.unit_name(),
            level: run.level.clone(),
            stack: run.stack.clone(),
            environment: run.environment_name.clone(),
            exit_code,
            passed: count(TestOutcome::Pass),
            failed: count(TestOutcome::Fail),
            skipped: count(TestOutcome::Skip),
            tests,
        }
    }

    /// A non-zero exit with no parsed failures (build error, panic before
    /// any test ran) still counts as one failure.
    pub fn failures(&self) -> usize {
        if self.exit_code != 0 {
            self.failed.max(1)
        } else {
            self.failed
        }
    }

    pub fn path_for(run: &RunConfig) -> PathBuf {
        run.report_dir
            .join(format!("{}{REPORT_SUFFIX}", run.state_name))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            io::ensure_dir(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        io::atomic_write(path, json.as_bytes())
    }
}

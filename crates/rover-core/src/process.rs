//! External process invocation.
//!
//! Every collaborator that shells out (the provisioning engine, the cloud
//! CLI, custom actions, the test runner) goes through [`CommandRunner`], so
//! tests can substitute a scripted runner and production code uses
//! [`SystemRunner`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, RoverError};

/// How a child's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collect output into [`ExecOutput`].
    Capture,
    /// Pass output straight through to the terminal.
    Stream,
}

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub output: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            output: OutputMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn streamed(mut self) -> Self {
        self.output = OutputMode::Stream;
        self
    }

    /// Shell-like rendering for logs and dry-run output.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`RoverError::CommandFailed`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(RoverError::CommandFailed {
            program: program.to_string(),
            code: self.exit_code,
            stderr: self.stderr.trim().chars().take(2000).collect(),
        })
    }
}

pub trait CommandRunner {
    /// Run a command to completion. A non-zero exit is reported through
    /// [`ExecOutput::exit_code`], not as an error; only spawn failures are.
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput>;
}

/// Runs commands on the local machine, resolving programs on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        let program = resolve_program(&spec.program)?;
        tracing::debug!(command = %spec.display_line(), "spawning");

        let mut cmd = Command::new(&program);
        cmd.args(&spec.args);
        cmd.envs(spec.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());

        let spawn_err = |e: std::io::Error| RoverError::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        };

        match spec.output {
            OutputMode::Stream => {
                let status = cmd
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .map_err(spawn_err)?;
                Ok(ExecOutput {
                    exit_code: status.code().unwrap_or(-1),
                    ..ExecOutput::default()
                })
            }
            OutputMode::Capture => {
                let output = cmd.output().map_err(spawn_err)?;
                Ok(ExecOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}

fn resolve_program(program: &str) -> Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return Ok(candidate.to_path_buf());
    }
    which::which(program).map_err(|_| RoverError::ToolNotFound(program.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_arguments() {
        let spec = CommandSpec::new("terraform")
            .arg("-chdir=/src")
            .args(["plan", "-input=false"])
            .env("TF_IN_AUTOMATION", "1")
            .streamed();
        assert_eq!(spec.display_line(), "terraform -chdir=/src plan -input=false");
        assert_eq!(spec.output, OutputMode::Stream);
        assert_eq!(spec.env, vec![("TF_IN_AUTOMATION".into(), "1".into())]);
    }

    #[test]
    fn check_maps_non_zero_exit() {
        let ok = ExecOutput::default();
        assert!(ok.check("true").is_ok());

        let failed = ExecOutput {
            exit_code: 3,
            stdout: String::new(),
            stderr: "  boom \n".into(),
        };
        match failed.check("tflint") {
            Err(RoverError::CommandFailed { program, code, stderr }) => {
                assert_eq!(program, "tflint");
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_program_is_reported() {
        let err = SystemRunner
            .run(&CommandSpec::new("rover-definitely-missing-binary"))
            .unwrap_err();
        assert!(matches!(err, RoverError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output() {
        let out = SystemRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 4"]))
            .unwrap();
        assert_eq!(out.exit_code, 4);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }
}

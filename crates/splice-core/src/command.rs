//! Command execution capability.
//!
//! Splice never shells out directly: apply, test, and rollback commands all
//! go through the [`CommandRunner`] trait so the orchestrator can be driven
//! by a real process spawner in production and by scripted fakes in tests.
//!
//! Timeouts are enforced here, per command. Retry policy is deliberately
//! *not* enforced here: the caller owns the retry loop because retry
//! accounting belongs to the step that issued the command.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default per-command timeout (2 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Specification of one external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Program to execute.
    pub command: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory (inherits the process cwd when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Additional environment variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Per-invocation timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// How many times the issuing step may retry this command on failure.
    #[serde(default)]
    pub retries: u32,
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

impl CommandSpec {
    /// Creates a command spec with default timeout and no retries.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            timeout: default_timeout(),
            retries: 0,
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Returns a single-line rendering for logs.
    #[must_use]
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Captured output of a completed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    /// Process exit code (`-1` when terminated by signal).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// True when the process exited zero.
    pub success: bool,
}

impl CommandOutput {
    /// Creates a successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    /// Creates a failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

/// Trait for executing external commands.
///
/// Implementations must enforce `spec.timeout`; a timeout surfaces as
/// [`Error::CommandTimeout`] so the caller's retry loop can count it as a
/// failed attempt.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Executes a command to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned or exceeds its
    /// timeout. A non-zero exit is *not* an error at this layer; it is
    /// reported through [`CommandOutput::success`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a new process runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[tracing::instrument(skip(self, spec), fields(command = %spec.display_line()))]
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::CommandTimeout {
                command: spec.command.clone(),
                timeout_ms: u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|source| Error::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }
}

/// A runner that records invocations and always succeeds.
///
/// Useful for exercising orchestration paths without touching the system.
#[derive(Debug, Default)]
pub struct NoOpRunner {
    invocations: Mutex<Vec<CommandSpec>>,
}

impl NoOpRunner {
    /// Creates a new no-op runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all commands run so far, in invocation order.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for NoOpRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if let Ok(mut guard) = self.invocations.lock() {
            guard.push(spec.clone());
        }
        Ok(CommandOutput::ok(""))
    }
}

/// A runner that fails every command with a configurable exit code.
#[derive(Debug)]
pub struct FailingRunner {
    exit_code: i32,
    stderr: String,
}

impl FailingRunner {
    /// Creates a failing runner with the given exit code and stderr.
    #[must_use]
    pub fn new(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for FailingRunner {
    async fn run(&self, _spec: &CommandSpec) -> Result<CommandOutput> {
        Ok(CommandOutput::failed(self.exit_code, self.stderr.clone()))
    }
}

/// A runner driven by a script of per-command outcomes.
///
/// Commands not covered by the script succeed. Commands whose program name
/// appears in the script consume the scripted outcomes in order, then fall
/// back to success. Invocations are recorded for assertions.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<HashMap<String, Vec<CommandOutput>>>,
    invocations: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// Creates an empty scripted runner (everything succeeds).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for the next invocation of `command`.
    pub fn script(&self, command: impl Into<String>, output: CommandOutput) {
        if let Ok(mut guard) = self.script.lock() {
            guard.entry(command.into()).or_default().push(output);
        }
    }

    /// Returns all commands run so far, in invocation order.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if let Ok(mut guard) = self.invocations.lock() {
            guard.push(spec.clone());
        }
        let scripted = self.script.lock().ok().and_then(|mut guard| {
            guard.get_mut(&spec.command).and_then(|queue| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
        });
        Ok(scripted.unwrap_or_else(|| CommandOutput::ok("")))
    }
}

//! Centralized command execution with consistent error handling.
//!
//! Every external tool the customizer touches (qemu-img, fdisk, mount,
//! dpkg-query, the customization delegate) goes through a [`CommandRunner`].
//! The host implementation owns the two policies that must not leak into
//! callers: how privileged commands are escalated and how long any single
//! command may run.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::debug;

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout (empty when redirected to a file).
    pub stdout: String,
    /// Captured stderr (empty when redirected to a file).
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder describing one external command.
///
/// A `Cmd` is only a description; a [`CommandRunner`] decides how it is
/// actually executed.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
    /// Needs elevated privileges (mount, files owned by root in the image).
    privileged: bool,
    stdout_file: Option<PathBuf>,
    stderr_file: Option<PathBuf>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
            privileged: false,
            stdout_file: None,
            stderr_file: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Mark the command as requiring elevated privileges.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Write the command's stdout to `path` (truncating it) instead of capturing it.
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_file = Some(path.to_path_buf());
        self
    }

    /// Write the command's stderr to `path` (truncating it) instead of capturing it.
    pub fn stderr_to(mut self, path: &Path) -> Self {
        self.stderr_file = Some(path.to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn stdout_file(&self) -> Option<&Path> {
        self.stdout_file.as_deref()
    }

    pub fn stderr_file(&self) -> Option<&Path> {
        self.stderr_file.as_deref()
    }

    /// Human readable command line, used in logs and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Turn a non-zero exit into an error unless `allow_fail` was set.
    pub fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .clone()
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }
        Ok(result)
    }

    /// Run on the host without escalation or timeout.
    pub fn run(self) -> Result<CommandResult> {
        HostRunner::new(Escalation::None, None)?.run(self)
    }
}

/// Executes [`Cmd`] descriptions.
///
/// Implementors only perform the call; exit status policy lives in the
/// provided [`CommandRunner::run`].
pub trait CommandRunner {
    /// Execute the command and report its outcome, whatever the exit status.
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult>;

    /// Execute the command, failing on non-zero exit unless allowed.
    fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        let result = self.execute(&cmd)?;
        cmd.check(result)
    }
}

/// How privileged commands gain their privileges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Escalation {
    /// Run as-is (already root, or inside a privileged container).
    #[default]
    None,
    /// Prefix with `sudo`.
    Sudo,
    /// Prefix with another program, e.g. `doas`.
    Program(String),
}

impl Escalation {
    /// Parse the configuration value (`sudo`, `none`, or a program name).
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "none" => Escalation::None,
            "sudo" => Escalation::Sudo,
            other => Escalation::Program(other.to_string()),
        }
    }

    /// Resolve the program and arguments actually spawned for `cmd`.
    pub fn wrap(&self, cmd: &Cmd) -> (String, Vec<String>) {
        let prefix = match self {
            _ if !cmd.is_privileged() => None,
            Escalation::None => None,
            Escalation::Sudo => Some("sudo"),
            Escalation::Program(program) => Some(program.as_str()),
        };

        match prefix {
            Some(prefix) => {
                let mut args = Vec::with_capacity(cmd.get_args().len() + 1);
                args.push(cmd.program().to_string());
                args.extend(cmd.get_args().iter().cloned());
                (prefix.to_string(), args)
            }
            None => (cmd.program().to_string(), cmd.get_args().to_vec()),
        }
    }
}

/// Runs commands on the host.
///
/// Commands are spawned with tokio on a current-thread runtime owned by the
/// runner, so a timed-out command is killed when its future is dropped.
#[derive(Debug, Clone)]
pub struct HostRunner {
    escalation: Escalation,
    timeout: Option<Duration>,
    runtime: Arc<Runtime>,
}

impl HostRunner {
    pub fn new(escalation: Escalation, timeout: Option<Duration>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start command runtime")?;
        Ok(Self {
            escalation,
            timeout,
            runtime: Arc::new(runtime),
        })
    }
}

impl CommandRunner for HostRunner {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let (program, args) = self.escalation.wrap(cmd);
        let line = cmd.display();
        debug!(command = %line, privileged = cmd.is_privileged(), "running");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cmd.current_dir() {
            command.current_dir(dir);
        }
        if let Some(path) = cmd.stdout_file() {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            command.stdout(file);
        }
        if let Some(path) = cmd.stderr_file() {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            command.stderr(file);
        }

        let output = self.runtime.block_on(async {
            // spawn needs the runtime context
            let child = command
                .spawn()
                .with_context(|| format!("Failed to execute '{}'. Is it installed?", program))?;
            let output = match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                    .await
                    .with_context(|| {
                        format!("'{}' timed out after {}s", line, timeout.as_secs_f64())
                    })?,
                None => child.wait_with_output().await,
            };
            output.with_context(|| format!("Failed to wait for '{}'", line))
        })?;

        Ok(CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Check if a program exists in PATH.
pub fn exists(program: &str) -> bool {
    which::which(program).is_ok()
}

// =============================================================================
// Tests
// =============================================================================

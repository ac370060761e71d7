//! External tool execution.
//!
//! Every binary-format operation pkgseal performs (stripping, debug-link
//! attachment, ELF inspection, index building, signing) is delegated to an
//! external program. This module provides the [`ToolCommand`] description of
//! a single invocation and the [`CommandExecutor`] seam that runs it, so that
//! callers can be exercised against canned output in tests.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::io::{self, Write};
use std::process::{Command, Output, Stdio};
use thiserror::Error;

/// A single external program invocation.
///
/// The environment is inherited unless [`ToolCommand::clear_env`] is called,
/// after which only variables added through [`ToolCommand::env`] are visible
/// to the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    env_clear: bool,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
}

impl ToolCommand {
    /// Creates an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn arg_path(self, path: &Utf8Path) -> Self {
        self.arg(path.as_str())
    }

    /// Runs the program from `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: &Utf8Path) -> Self {
        self.cwd = Some(dir.to_owned());
        self
    }

    /// Starts the child from an empty environment.
    #[must_use]
    pub fn clear_env(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Sets an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feeds `input` to the child's standard input.
    #[must_use]
    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory, if one was set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    /// Returns `true` when the child starts from an empty environment.
    #[must_use]
    pub fn env_cleared(&self) -> bool {
        self.env_clear
    }

    /// Returns the explicitly set environment variables.
    #[must_use]
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    /// Returns the bytes fed to standard input, if any.
    #[must_use]
    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Abstraction for running external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Runs `command` to completion and returns its captured output.
    ///
    /// A nonzero exit status is not an error at this layer; see
    /// [`run_checked`] for that.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while spawning or waiting on the child.
    fn run(&self, command: &ToolCommand) -> io::Result<Output>;
}

/// Executes commands on the host system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, command: &ToolCommand) -> io::Result<Output> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.arguments());
        if let Some(dir) = command.working_dir() {
            cmd.current_dir(dir);
        }
        if command.env_cleared() {
            cmd.env_clear();
        }
        for (key, value) in command.env_vars() {
            cmd.env(key, value);
        }

        let Some(input) = command.stdin_bytes() else {
            return cmd.stdin(Stdio::null()).output();
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        let written = child
            .stdin
            .take()
            .map_or(Ok(()), |mut pipe| pipe.write_all(input));
        // The child is reaped even when it stopped reading early.
        let output = child.wait_with_output()?;
        written.map(|()| output)
    }
}

/// Failure of an external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started at all.
    #[error("failed to execute '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The program ran but exited unsuccessfully.
    #[error("'{program}' exited with code {code}{}", stderr_suffix(.stderr))]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit code, or -1 when terminated by a signal.
        code: i32,
        /// Trimmed standard error output.
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Runs `command` and treats a nonzero exit status as an error.
///
/// # Errors
///
/// Returns [`ToolError::Spawn`] when the program cannot be started and
/// [`ToolError::Failed`] when it exits unsuccessfully; the latter carries the
/// tool's diagnostic output.
pub fn run_checked(
    executor: &dyn CommandExecutor,
    command: &ToolCommand,
) -> Result<Output, ToolError> {
    log::debug!("running {command}");
    let output = executor.run(command).map_err(|source| ToolError::Spawn {
        program: command.program().to_owned(),
        source,
    })?;

    if output.status.success() {
        return Ok(output);
    }

    Err(ToolError::Failed {
        program: command.program().to_owned(),
        code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}

//! External command execution
//!
//! Every state-changing call wgnet makes against the host (interface
//! bring-up, packet-filter edits) is described as a [`CommandSpec`] and
//! handed to an [`Executor`]. The [`SystemExecutor`] is the only place that
//! actually spawns processes, so dry-run and verbose logging apply to all of
//! them the same way.
//!
//! Read-only host queries (see [`crate::device`]) do not go through here.

use std::fmt;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// A single external command: program plus argument vector
///
/// Arguments are passed to the program directly, no shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to run (looked up in `PATH`)
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What came back from running a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// A successful, silent run
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    /// A failed run with the given exit code and diagnostic
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status zero
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human readable exit status
    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "a signal".to_string(),
        }
    }

    /// Turn an unsuccessful run into [`Error::CommandFailed`]
    pub fn into_result(self, program: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            program: program.to_string(),
            status: self.status(),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Process-wide run options, fixed before any orchestration starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Never execute, only log what would be run
    pub dry_run: bool,
    /// Log every command that is issued
    pub verbose: bool,
}

/// The single chokepoint for state-changing host commands
pub trait Executor {
    /// Run a command and report its exit status.
    ///
    /// `Err` is reserved for commands that could not be started; a command
    /// that ran and failed is an `Ok` with a non-zero [`CommandOutput::code`].
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Run a command, treating a non-zero exit as an error
    fn run_checked(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.run(command)?.into_result(&command.program)
    }
}

/// Executor backed by real processes, or by nothing at all in dry-run mode
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    options: ExecOptions,
}

impl SystemExecutor {
    /// Create an executor; the options cannot change afterwards
    pub fn new(options: ExecOptions) -> Self {
        if options.dry_run {
            log::debug!("dry run mode enabled, no host commands will be executed");
        }
        Self { options }
    }

    /// The options this executor was built with
    pub fn options(&self) -> ExecOptions {
        self.options
    }
}

impl Executor for SystemExecutor {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        if self.options.dry_run {
            log::info!("dry-run: {}", command);
            return Ok(CommandOutput::success());
        }

        if self.options.verbose {
            log::info!("exec: {}", command);
        } else {
            log::debug!("exec: {}", command);
        }

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| Error::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.is_success() {
            log::debug!(
                "{} exited with {}: {}",
                command.program,
                result.status(),
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

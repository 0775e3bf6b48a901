//! External command execution.
//!
//! Every tool the build shells out to (`7z`, `bash`, `make`, the ISO packer)
//! is described as an [`Invocation`] and handed to a [`CommandRunner`].
//! Production code uses [`SystemRunner`]; tests swap in a fake that records
//! invocations instead of spawning processes.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ProvisionError;

/// A fully described command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            cwd: None,
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
        self.cwd = Some(dir.to_path_buf());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "termination by signal".to_string(),
        }
    }
}

/// Capability for running external commands.
///
/// Implementations block until the process exits. A non-zero exit is *not*
/// an error at this level; use [`run_checked`] to turn it into one.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs commands on the host with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(ref dir) = invocation.cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().with_context(|| {
            format!(
                "Failed to execute '{}'. Is it installed?",
                invocation.program
            )
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and fail with [`ProvisionError::CommandFailed`] on a
/// non-zero exit. The error carries stderr, or stdout when stderr is empty
/// (configure scripts and `make` report most failures on stdout).
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput> {
    let output = runner.run(invocation)?;
    if !output.success() {
        let status = output.status_text();
        let text = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        return Err(ProvisionError::CommandFailed {
            command: invocation.to_string(),
            status,
            output: text,
        }
        .into());
    }
    Ok(output)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;

    type Hook = Box<dyn Fn(&Invocation) -> Result<CommandOutput>>;

    /// Records every invocation; answers with the hook's output, or a
    /// successful empty output when no hook is set.
    pub(crate) struct RecordingRunner {
        pub(crate) calls: RefCell<Vec<Invocation>>,
        hook: Option<Hook>,
    }

    impl RecordingRunner {
        pub(crate) fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                hook: None,
            }
        }

        pub(crate) fn with_hook(
            hook: impl Fn(&Invocation) -> Result<CommandOutput> + 'static,
        ) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                hook: Some(Box::new(hook)),
            }
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            match &self.hook {
                Some(hook) => hook(invocation),
                None => Ok(CommandOutput {
                    code: Some(0),
                    ..Default::default()
                }),
            }
        }
    }
}

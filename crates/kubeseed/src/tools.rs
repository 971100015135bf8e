//! External tool invocation.
//!
//! `openssl`, `ssh-keygen`, `ssh` and `scp` are run as child processes. The
//! [`ToolRunner`] trait is the seam the rest of the crate goes through, so a
//! scripted runner can stand in for the real binaries.

use std::io;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::BootstrapError;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, when the process was not killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Successful output carrying `stdout`.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output carrying `stderr`.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout and stderr joined, trimmed.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

/// Runs external programs.
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, optionally inside `cwd`, and capture its output.
    ///
    /// # Errors
    /// Returns an error if the process could not be spawned.
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> io::Result<ToolOutput>;
}

/// Runs real processes from `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> io::Result<ToolOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(program, ?args, "Running tool");

        let output = cmd.output()?;
        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a tool and turn spawn failures and non-zero exits into
/// [`BootstrapError::ExternalTool`].
///
/// # Errors
/// Returns an error if the tool is missing or exits unsuccessfully.
pub fn run_checked(
    tools: &dyn ToolRunner,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    action: &str,
) -> Result<ToolOutput, BootstrapError> {
    let output = tools
        .run(program, args, cwd)
        .map_err(|e| BootstrapError::ExternalTool {
            tool: program.to_string(),
            action: action.to_string(),
            detail: if e.kind() == io::ErrorKind::NotFound {
                format!("{program} not found - is it installed?")
            } else {
                e.to_string()
            },
        })?;

    if !output.success {
        return Err(BootstrapError::ExternalTool {
            tool: program.to_string(),
            action: action.to_string(),
            detail: output.combined(),
        });
    }

    Ok(output)
}

/// Convert a string slice list into owned arguments.
pub(crate) fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

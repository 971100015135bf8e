//! Remote execution on a freshly created node.
//!
//! Commands run over `ssh` with a bounded, fixed-delay retry to ride out the
//! gap between the provider reporting the instance as running and `sshd`
//! accepting connections. `ssh` reports an unreachable host and a failing
//! remote command the same way, so every failed attempt is retried. File
//! copies go over `scp` without retry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BootstrapError;
use crate::tools::{args, ToolRunner};

/// Host-key verification level for SSH and SCP.
///
/// Freshly created instances have no known host key, so the default skips
/// verification entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyTrust {
    /// No verification; host keys are neither checked nor recorded.
    #[default]
    Disabled,
    /// Trust on first use: record unknown keys, reject changed ones.
    AcceptNew,
    /// Only connect to hosts already in `known_hosts`.
    Strict,
}

impl HostKeyTrust {
    /// OpenSSH `-o` options for this level.
    #[must_use]
    pub fn ssh_options(self) -> Vec<String> {
        match self {
            Self::Disabled => args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
            ]),
            Self::AcceptNew => args(["-o", "StrictHostKeyChecking=accept-new"]),
            Self::Strict => args(["-o", "StrictHostKeyChecking=yes"]),
        }
    }
}

impl std::str::FromStr for HostKeyTrust {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "disabled" => Ok(Self::Disabled),
            "accept_new" | "tofu" => Ok(Self::AcceptNew),
            "strict" => Ok(Self::Strict),
            _ => Err(BootstrapError::Config(format!(
                "unknown host key trust: {s}. Supported: disabled, accept-new, strict"
            ))),
        }
    }
}

/// Fixed-delay retry budget for remote commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Delay between attempts, in seconds.
    pub delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_secs: 15,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_secs: delay.as_secs(),
        }
    }

    /// Delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// A `user@address` login target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    /// Login user.
    pub user: String,
    /// Host address.
    pub address: String,
}

impl RemoteHost {
    /// Create a login target.
    #[must_use]
    pub fn new(user: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// Runs commands on, and copies files to, a remote node.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command on `host`, retrying any failed attempt: a non-zero
    /// exit, whether from `ssh` or the remote command, or a spawn error.
    ///
    /// # Errors
    /// Returns [`BootstrapError::RemoteCommand`] once the retry budget is spent.
    async fn run(&self, host: &RemoteHost, args: &[String]) -> Result<(), BootstrapError>;

    /// Copy `local_path` into `remote_dir` on `host`, keeping its file name.
    ///
    /// # Errors
    /// Returns [`BootstrapError::RemoteCopy`] if the transfer fails.
    async fn copy(
        &self,
        host: &RemoteHost,
        remote_dir: &str,
        local_path: &Path,
    ) -> Result<(), BootstrapError>;
}

/// [`RemoteExecutor`] over the OpenSSH client tools.
pub struct SshExecutor {
    tools: Arc<dyn ToolRunner>,
    identity_file: PathBuf,
    trust: HostKeyTrust,
    retry: RetryPolicy,
}

impl SshExecutor {
    /// Create an executor authenticating with `identity_file`.
    #[must_use]
    pub fn new(tools: Arc<dyn ToolRunner>, identity_file: impl Into<PathBuf>) -> Self {
        Self {
            tools,
            identity_file: identity_file.into(),
            trust: HostKeyTrust::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the host-key trust level.
    #[must_use]
    pub fn with_trust(mut self, trust: HostKeyTrust) -> Self {
        self.trust = trust;
        self
    }

    /// Set the retry policy for `run`.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn common_args(&self) -> Vec<String> {
        let mut out = self.trust.ssh_options();
        out.extend(args(["-o", "BatchMode=yes", "-i"]));
        out.push(self.identity_file.display().to_string());
        out
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &RemoteHost, command: &[String]) -> Result<(), BootstrapError> {
        let mut ssh_args = self.common_args();
        ssh_args.push(host.to_string());
        ssh_args.extend(command.iter().cloned());

        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            debug!(host = %host, attempt, "ssh {}", command.join(" "));

            match self.tools.run("ssh", &ssh_args, None) {
                Ok(output) if output.success => return Ok(()),
                Ok(output) => warn!(
                    host = %host,
                    "unable to run ssh command (attempt {attempt}/{max_attempts}): {}",
                    output.combined()
                ),
                Err(e) => warn!(
                    host = %host,
                    "unable to run ssh (attempt {attempt}/{max_attempts}): {e}"
                ),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.delay()).await;
            }
        }

        Err(BootstrapError::RemoteCommand {
            host: host.to_string(),
            command: command.join(" "),
            attempts: max_attempts,
        })
    }

    async fn copy(
        &self,
        host: &RemoteHost,
        remote_dir: &str,
        local_path: &Path,
    ) -> Result<(), BootstrapError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BootstrapError::RemoteCopy {
                host: host.to_string(),
                file: local_path.display().to_string(),
                output: "path has no file name".to_string(),
            })?;
        let target = format!("{host}:{}/{file_name}", remote_dir.trim_end_matches('/'));

        let mut scp_args = self.common_args();
        scp_args.push(local_path.display().to_string());
        scp_args.push(target.clone());

        info!("Copying {} to {target}", local_path.display());
        let copy_error = |output: String| BootstrapError::RemoteCopy {
            host: host.to_string(),
            file: file_name.clone(),
            output,
        };

        match self.tools.run("scp", &scp_args, None) {
            Ok(output) if output.success => Ok(()),
            Ok(output) => Err(copy_error(output.combined())),
            Err(e) => Err(copy_error(e.to_string())),
        }
    }
}

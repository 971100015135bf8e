//! Bootstrap state persistence.
//!
//! Records the last completed step of a bootstrap run in the working
//! directory so an interrupted or failed run can resume without repeating
//! steps that are not safe to repeat (root CA creation, instance creation).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BootstrapError;
use crate::providers::Instance;

/// State file name inside the working directory.
pub const STATE_FILE: &str = "bootstrap-state.json";

/// Bootstrap steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStep {
    /// Nothing has run yet.
    NotStarted,
    /// Local SSH key exists and is registered with the provider.
    EnsureIdentity,
    /// Root CA and leaf certificates issued.
    InitCa,
    /// Master instance created (cloud-init rendered and consumed).
    CreateInstance,
    /// Master address read from the instance record.
    ExtractAddress,
    /// API server certificate re-issued for the master address.
    BindApiServerAddress,
    /// Credentials copied onto the master.
    InstallCredentials,
}

impl BootstrapStep {
    /// The step that runs after this one, `None` after the last.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::EnsureIdentity),
            Self::EnsureIdentity => Some(Self::InitCa),
            Self::InitCa => Some(Self::CreateInstance),
            Self::CreateInstance => Some(Self::ExtractAddress),
            Self::ExtractAddress => Some(Self::BindApiServerAddress),
            Self::BindApiServerAddress => Some(Self::InstallCredentials),
            Self::InstallCredentials => None,
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::EnsureIdentity => "ensure identity",
            Self::InitCa => "init CA",
            Self::CreateInstance => "create instance",
            Self::ExtractAddress => "extract address",
            Self::BindApiServerAddress => "bind API server address",
            Self::InstallCredentials => "install credentials",
        };
        f.write_str(name)
    }
}

/// Persisted bootstrap progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapState {
    /// Cluster name.
    pub cluster_name: String,
    /// Last completed step.
    pub step: BootstrapStep,
    /// SSH key fingerprint from EnsureIdentity.
    pub fingerprint: Option<String>,
    /// Root CA generation the leaves were issued under.
    pub root_generation: Option<String>,
    /// Master instance record.
    pub instance: Option<Instance>,
    /// Master IPv4 address.
    pub master_address: Option<String>,
    /// Error from the most recent failed run.
    pub last_error: Option<String>,
    /// Timestamp of last update.
    pub updated_at: String,
    /// Directory the state file lives in.
    #[serde(skip)]
    working_dir: PathBuf,
}

impl BootstrapState {
    /// Create a new bootstrap state.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            step: BootstrapStep::NotStarted,
            fingerprint: None,
            root_generation: None,
            instance: None,
            master_address: None,
            last_error: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
            working_dir: working_dir.into(),
        }
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(working_dir: &Path) -> PathBuf {
        working_dir.join(STATE_FILE)
    }

    /// Load state from file.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(working_dir: &Path) -> Result<Option<Self>, BootstrapError> {
        let path = Self::state_file(working_dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let mut state: Self = serde_json::from_str(&content)
            .map_err(|e| BootstrapError::State(format!("failed to parse {}: {e}", path.display())))?;
        state.working_dir = working_dir.to_path_buf();

        info!("Loaded bootstrap state: step={:?}", state.step);
        Ok(Some(state))
    }

    /// Save state to file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<(), BootstrapError> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        std::fs::create_dir_all(&self.working_dir)?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BootstrapError::State(format!("failed to serialize state: {e}")))?;
        std::fs::write(Self::state_file(&self.working_dir), content)?;

        Ok(())
    }

    /// Whether `step` has already completed.
    #[must_use]
    pub fn is_done(&self, step: BootstrapStep) -> bool {
        self.step >= step
    }

    /// Whether a root CA or master has been recorded, which a fresh run
    /// must not discard.
    #[must_use]
    pub fn has_cluster_progress(&self) -> bool {
        self.root_generation.is_some()
            || self.instance.is_some()
            || self.is_done(BootstrapStep::InitCa)
    }

    /// Whether every step has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.step == BootstrapStep::InstallCredentials
    }

    /// Record `step` as completed and save.
    ///
    /// # Errors
    /// Returns an error if saving fails.
    pub fn complete(&mut self, step: BootstrapStep) -> Result<(), BootstrapError> {
        self.step = step;
        self.last_error = None;
        self.save()
    }

    /// Record a failed run and save.
    ///
    /// # Errors
    /// Returns an error if saving fails.
    pub fn record_failure(&mut self, error: &BootstrapError) -> Result<(), BootstrapError> {
        self.last_error = Some(error.to_string());
        self.save()
    }

    /// The step a resumed run starts with, `None` when complete.
    #[must_use]
    pub fn next_step(&self) -> Option<BootstrapStep> {
        self.step.next()
    }
}

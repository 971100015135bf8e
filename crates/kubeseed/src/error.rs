//! Error types for the bootstrap flow.

use std::path::PathBuf;

use thiserror::Error;

use crate::providers::ProviderError;
use crate::state::BootstrapStep;

/// Errors that can occur while bootstrapping a cluster.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// A signing or key-generation tool failed or is missing.
    #[error("{tool} failed to {action}: {detail}")]
    ExternalTool {
        tool: String,
        action: String,
        detail: String,
    },

    /// The provider key registry could not be queried or written.
    #[error("SSH key registration failed for {fingerprint}: {source}")]
    KeyRegistration {
        fingerprint: String,
        #[source]
        source: ProviderError,
    },

    /// A remote command kept failing until the retry budget ran out.
    #[error("command `{command}` on {host} failed {attempts} times")]
    RemoteCommand {
        host: String,
        command: String,
        attempts: u32,
    },

    /// A file transfer to the node failed.
    #[error("unable to copy {file} to {host}: {output}")]
    RemoteCopy {
        host: String,
        file: String,
        output: String,
    },

    /// A single create call must yield exactly one instance.
    #[error("received unexpected number of instances: {0}")]
    UnexpectedInstanceCount(usize),

    /// The created instance has no usable IPv4 address.
    #[error("instance {instance} has no IPv4 address")]
    MissingAddress { instance: String },

    /// Leaf issuance was attempted without a root CA on disk.
    #[error("no root CA in {}; create the root first", dir.display())]
    MissingRoot { dir: PathBuf },

    /// Root creation would overwrite an existing root.
    #[error("root CA already exists in {}; pass force to regenerate it", dir.display())]
    RootExists { dir: PathBuf },

    /// The root on disk is not the one earlier certificates were signed with.
    #[error("root CA generation changed from {expected} to {found}")]
    RootGenerationMismatch { expected: String, found: String },

    /// `ssh-keygen` produced a fingerprint we could not parse.
    #[error("invalid SSH key fingerprint: {0}")]
    InvalidFingerprint(String),

    /// A name used in file or resource names is not acceptable.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Template rendering failed.
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// Provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Bootstrap state could not be read or written.
    #[error("state file error: {0}")]
    State(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bootstrap step failed.
    #[error("{step}: {action}: {source}")]
    Step {
        step: BootstrapStep,
        action: String,
        #[source]
        source: Box<BootstrapError>,
    },
}

impl BootstrapError {
    /// Wrap an error with the step and action being attempted.
    #[must_use]
    pub fn in_step(self, step: BootstrapStep, action: impl Into<String>) -> Self {
        Self::Step {
            step,
            action: action.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, past any step annotations.
    #[must_use]
    pub fn root_cause(&self) -> &BootstrapError {
        match self {
            Self::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The step that failed, if the error carries one.
    #[must_use]
    pub fn failed_step(&self) -> Option<BootstrapStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Extension for annotating results with the failing step.
pub trait StepContext<T> {
    /// Annotate an error with the step and action being attempted.
    ///
    /// # Errors
    /// Returns the annotated error.
    fn step(self, step: BootstrapStep, action: &str) -> Result<T, BootstrapError>;
}

impl<T, E: Into<BootstrapError>> StepContext<T> for Result<T, E> {
    fn step(self, step: BootstrapStep, action: &str) -> Result<T, BootstrapError> {
        self.map_err(|e| e.into().in_step(step, action))
    }
}

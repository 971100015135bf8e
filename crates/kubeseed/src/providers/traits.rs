//! Provider trait and common types for the cloud provider boundary.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The user-data file could not be read.
    #[error("Failed to read user data {path}: {source}")]
    UserData {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Instance status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is being created.
    New,
    /// Instance is running.
    Active,
    /// Instance is powered off.
    Off,
    /// Instance is archived.
    Archive,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Active => write!(f, "active"),
            Self::Off => write!(f, "off"),
            Self::Archive => write!(f, "archive"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A compute instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Current status.
    pub status: InstanceStatus,
    /// IPv4 addresses in the order the provider lists them.
    pub ipv4: Vec<String>,
}

impl Instance {
    /// First IPv4 address, if the provider reported any.
    #[must_use]
    pub fn first_ipv4(&self) -> Option<&str> {
        self.ipv4.first().map(String::as_str)
    }
}

/// Request to create a new instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Instance name.
    pub name: String,
    /// Image slug (e.g., "coreos-alpha").
    pub image: String,
    /// Region slug (e.g., "nyc1").
    pub region: String,
    /// Size slug (e.g., "4gb").
    pub size: String,
    /// SSH key fingerprints authorized on the instance.
    pub ssh_keys: Vec<String>,
    /// Path to the cloud-init document passed as user data.
    pub user_data_file: PathBuf,
    /// Block until the instance reports running.
    pub wait: bool,
}

/// An SSH public key registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    /// Provider-assigned identifier.
    pub id: String,
    /// Key name.
    pub name: String,
    /// MD5 fingerprint.
    pub fingerprint: String,
}

/// Operations the bootstrap flow needs from a cloud provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create instances for a request.
    ///
    /// Returns every record the provider answered with; callers enforce how
    /// many they expect.
    async fn create_instance(
        &self,
        req: &CreateInstanceRequest,
    ) -> Result<Vec<Instance>, ProviderError>;

    /// Look up a registered SSH key by fingerprint. `Ok(None)` when absent.
    async fn find_ssh_key(&self, fingerprint: &str) -> Result<Option<RegisteredKey>, ProviderError>;

    /// Register a public key under a name.
    async fn import_ssh_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<RegisteredKey, ProviderError>;
}

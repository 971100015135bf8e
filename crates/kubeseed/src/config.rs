//! Bootstrap configuration.
//!
//! Every knob the bootstrap flow reads lives in [`BootstrapConfig`]. Values
//! come from defaults, then an optional TOML file, then CLI overrides.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BootstrapError;
use crate::remote::{HostKeyTrust, RetryPolicy};

/// Default droplet image.
pub const DEFAULT_IMAGE: &str = "coreos-alpha";

/// Default droplet size.
pub const DEFAULT_SIZE: &str = "4gb";

/// Default region.
pub const DEFAULT_REGION: &str = "nyc1";

/// Default overlay network CIDR written into cloud-init.
pub const DEFAULT_OVERLAY_CIDR: &str = "10.3.0.0/16";

/// Default Kubernetes service IP embedded in the API server certificate.
pub const DEFAULT_SERVICE_IP: Ipv4Addr = Ipv4Addr::new(10, 3, 0, 1);

/// Which address the API server certificate is finally issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiServerSan {
    /// Re-issue for the master's real address once it is known.
    #[default]
    MasterAddress,
    /// Keep the loopback placeholder used during CA init.
    Placeholder,
}

impl std::str::FromStr for ApiServerSan {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master_address" | "master-address" => Ok(Self::MasterAddress),
            "placeholder" => Ok(Self::Placeholder),
            _ => Err(BootstrapError::Config(format!(
                "unknown API server SAN mode: {s}. Supported: master-address, placeholder"
            ))),
        }
    }
}

/// Full bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Name of the cluster; prefixes the master instance name.
    pub cluster_name: String,
    /// Region slug.
    pub region: String,
    /// Directory holding keys, certificates and bootstrap state.
    pub working_dir: PathBuf,
    /// Image slug for the master.
    pub image: String,
    /// Size slug for the master.
    pub size: String,
    /// Overlay network CIDR.
    pub overlay_cidr: String,
    /// Kubernetes service IP.
    pub service_ip: IpAddr,
    /// Login user on the master.
    pub remote_user: String,
    /// Remote directory credentials are copied into.
    pub staging_dir: String,
    /// Host-key verification level for SSH and SCP.
    pub host_key_trust: HostKeyTrust,
    /// Final SAN mode for the API server certificate.
    pub api_server_san: ApiServerSan,
    /// Surface tool output at info level.
    pub verbose: bool,
    /// Regenerate an existing root CA.
    pub force_root: bool,
    /// Seconds to wait for the master to become active.
    pub wait_timeout_secs: u64,
    /// Retry budget for remote commands.
    pub retry: RetryPolicy,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            cluster_name: "kubeseed".to_string(),
            region: DEFAULT_REGION.to_string(),
            working_dir: PathBuf::from(".kubeseed"),
            image: DEFAULT_IMAGE.to_string(),
            size: DEFAULT_SIZE.to_string(),
            overlay_cidr: DEFAULT_OVERLAY_CIDR.to_string(),
            service_ip: IpAddr::V4(DEFAULT_SERVICE_IP),
            remote_user: "core".to_string(),
            staging_dir: "/home/core/ssl".to_string(),
            host_key_trust: HostKeyTrust::default(),
            api_server_san: ApiServerSan::default(),
            verbose: false,
            force_root: false,
            wait_timeout_secs: 600,
            retry: RetryPolicy::default(),
        }
    }
}

impl BootstrapConfig {
    /// Create a configuration for a cluster, with defaults for everything else.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self, BootstrapError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BootstrapError::Config(format!("{}: {e}", path.display())))
    }

    /// Set the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the image slug.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the size slug.
    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Set the overlay network CIDR.
    #[must_use]
    pub fn with_overlay_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.overlay_cidr = cidr.into();
        self
    }

    /// Set the host-key trust level.
    #[must_use]
    pub fn with_host_key_trust(mut self, trust: HostKeyTrust) -> Self {
        self.host_key_trust = trust;
        self
    }

    /// Set the API server SAN mode.
    #[must_use]
    pub fn with_api_server_san(mut self, san: ApiServerSan) -> Self {
        self.api_server_san = san;
        self
    }

    /// Set the remote retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Allow regenerating an existing root CA.
    #[must_use]
    pub fn with_force_root(mut self, force: bool) -> Self {
        self.force_root = force;
        self
    }

    /// Enable verbose tool output.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Name of the master instance: `<cluster>-master-<region>`.
    #[must_use]
    pub fn master_name(&self) -> String {
        format!("{}-master-{}", self.cluster_name, self.region)
    }

    /// Check the configuration for values that would fail later steps.
    ///
    /// # Errors
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        validate_name(&self.cluster_name)?;
        validate_name(&self.region)?;
        validate_cidr(&self.overlay_cidr)?;

        if self.image.trim().is_empty() || self.size.trim().is_empty() {
            return Err(BootstrapError::Config(
                "image and size must not be empty".to_string(),
            ));
        }
        if self.remote_user.trim().is_empty() {
            return Err(BootstrapError::Config("remote user must not be empty".to_string()));
        }
        if !self.staging_dir.starts_with('/') {
            return Err(BootstrapError::Config(format!(
                "staging directory must be absolute: {}",
                self.staging_dir
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(BootstrapError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Names end up in file names and API resource names.
pub(crate) fn validate_name(name: &str) -> Result<(), BootstrapError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(BootstrapError::InvalidName(name.to_string()))
    }
}

fn validate_cidr(cidr: &str) -> Result<(), BootstrapError> {
    let invalid = || BootstrapError::Config(format!("invalid overlay CIDR: {cidr}"));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        _ => Err(invalid()),
    }
}

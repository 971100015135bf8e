//! Single-master Kubernetes bootstrap on DigitalOcean.
//!
//! This crate provisions an SSH identity, builds a private certificate
//! authority with the certificates the control plane needs, launches a
//! master droplet with a cloud-init document, and installs the credentials
//! onto it over SSH. Progress is saved after every step so a failed run can
//! be resumed.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use kubeseed::providers::digitalocean::DigitalOcean;
//! use kubeseed::{BootstrapConfig, Bootstrapper, SshExecutor, SystemTools};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BootstrapConfig::new("tcluster", "/tmp/foobar");
//!     let tools = Arc::new(SystemTools);
//!     let provider = Arc::new(DigitalOcean::new("token")?);
//!     let remote = Arc::new(SshExecutor::new(tools.clone(), "/tmp/foobar/k8s.key"));
//!
//!     let state = Bootstrapper::new(config, provider, remote, tools)
//!         .run(false)
//!         .await?;
//!     println!("master at {:?}", state.master_address);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod certauth;
pub mod cloudinit;
pub mod config;
pub mod error;
pub mod identity;
pub mod providers;
pub mod remote;
pub mod state;
pub mod templates;
pub mod tools;

pub use bootstrap::Bootstrapper;
pub use certauth::{CertificateAuthority, CertificateRole, IssuedCertificate};
pub use config::{ApiServerSan, BootstrapConfig};
pub use error::BootstrapError;
pub use identity::SshIdentity;
pub use providers::{CloudProvider, CreateInstanceRequest, Instance, InstanceStatus};
pub use remote::{HostKeyTrust, RemoteExecutor, RemoteHost, RetryPolicy, SshExecutor};
pub use state::{BootstrapState, BootstrapStep};
pub use tools::{SystemTools, ToolOutput, ToolRunner};

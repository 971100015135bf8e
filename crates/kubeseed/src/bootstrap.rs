//! Cluster bootstrap flow.
//!
//! Steps run strictly in order and the first failure ends the run. After
//! every completed step the progress is saved to the working directory, so
//! a failed run can be resumed without creating a second root CA or a
//! second master.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tracing::{info, warn};

use crate::certauth::{CertificateAuthority, MASTER_CREDENTIALS};
use crate::cloudinit::CloudInitFile;
use crate::config::{ApiServerSan, BootstrapConfig};
use crate::error::{BootstrapError, StepContext};
use crate::identity::SshIdentity;
use crate::providers::{CloudProvider, CreateInstanceRequest, Instance};
use crate::remote::{RemoteExecutor, RemoteHost};
use crate::state::{BootstrapState, BootstrapStep};
use crate::tools::{args, ToolRunner};

/// Address the API server certificate is first issued for.
pub const API_SERVER_PLACEHOLDER: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Name of the template worker certificate issued during CA init.
pub const WORKER_TEMPLATE_NAME: &str = "worker.example.com";

/// Address of the template worker certificate.
pub const WORKER_TEMPLATE_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(172, 17, 0, 5));

/// Drives a cluster from an empty working directory to a master holding its
/// credentials.
pub struct Bootstrapper {
    config: BootstrapConfig,
    provider: Arc<dyn CloudProvider>,
    remote: Arc<dyn RemoteExecutor>,
    tools: Arc<dyn ToolRunner>,
}

impl Bootstrapper {
    /// Create a bootstrapper.
    #[must_use]
    pub fn new(
        config: BootstrapConfig,
        provider: Arc<dyn CloudProvider>,
        remote: Arc<dyn RemoteExecutor>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            config,
            provider,
            remote,
            tools,
        }
    }

    /// The configuration this bootstrapper runs with.
    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// SSH identity in the working directory, registered under the cluster name.
    #[must_use]
    pub fn identity(&self) -> SshIdentity {
        SshIdentity::new(
            &self.config.working_dir,
            &self.config.cluster_name,
            Arc::clone(&self.tools),
        )
    }

    /// Certificate authority over the working directory.
    #[must_use]
    pub fn certificate_authority(&self) -> CertificateAuthority {
        certificate_authority(&self.config, Arc::clone(&self.tools))
    }

    /// Run the bootstrap.
    ///
    /// With `resume`, progress saved by an earlier run is picked up and
    /// completed steps are skipped. Without it, a fresh run starts, unless
    /// the saved state already records a root CA or a master; that state is
    /// left untouched and the run fails. An existing root CA without a
    /// saved state needs `force_root` to be replaced.
    ///
    /// # Errors
    /// Returns the first failure, wrapped with the failing step. The failure
    /// is also recorded in the state file.
    pub async fn run(&self, resume: bool) -> Result<BootstrapState, BootstrapError> {
        self.config.validate()?;

        let mut state = self.initial_state(resume)?;
        if state.is_complete() {
            info!("Bootstrap of {} already complete", state.cluster_name);
            return Ok(state);
        }

        match self.advance(&mut state).await {
            Ok(()) => {
                info!(
                    "Cluster {} bootstrapped, master at {}",
                    state.cluster_name,
                    state.master_address.as_deref().unwrap_or("?")
                );
                Ok(state)
            }
            Err(e) => {
                if let Err(save_err) = state.record_failure(&e) {
                    warn!("could not record failure in state file: {save_err}");
                }
                Err(e)
            }
        }
    }

    /// Ensure the SSH identity exists and is registered; returns its fingerprint.
    ///
    /// # Errors
    /// Returns the failure wrapped with [`BootstrapStep::EnsureIdentity`].
    pub async fn ensure_identity(&self) -> Result<String, BootstrapError> {
        self.identity()
            .ensure_identity(self.provider.as_ref())
            .await
            .step(BootstrapStep::EnsureIdentity, "unable to ensure ssh key")
    }

    /// Create the root CA and the initial leaf set; returns the root generation.
    ///
    /// # Errors
    /// Returns the failure wrapped with [`BootstrapStep::InitCa`].
    pub fn init_ca(&self) -> Result<String, BootstrapError> {
        init_ca(&self.config, Arc::clone(&self.tools))
    }

    /// InitCa inside a run. The root generation is saved as soon as the
    /// root exists, so a failure while issuing leaves resumes against the
    /// same root instead of creating a new one.
    fn init_ca_resumable(&self, state: &mut BootstrapState) -> Result<(), BootstrapError> {
        let step = BootstrapStep::InitCa;
        let ca = self.certificate_authority();

        let on_disk = ca.root_generation().step(step, "could not read root")?;
        match state.root_generation.as_deref() {
            Some(recorded) if on_disk.as_deref() == Some(recorded) => {
                info!(generation = %recorded, "Reusing root CA from the interrupted run");
            }
            _ => {
                let generation = ca
                    .create_root(self.config.force_root)
                    .step(step, "could not create root")?;
                state.root_generation = Some(generation);
                state.save().step(step, "could not save bootstrap state")?;
            }
        }

        issue_initial_leaves(&ca)
    }

    fn initial_state(&self, resume: bool) -> Result<BootstrapState, BootstrapError> {
        let dir = &self.config.working_dir;

        match BootstrapState::load(dir)? {
            Some(state) if resume => {
                if state.cluster_name != self.config.cluster_name {
                    return Err(BootstrapError::Config(format!(
                        "state in {} belongs to cluster {}, not {}",
                        dir.display(),
                        state.cluster_name,
                        self.config.cluster_name
                    )));
                }
                info!("Resuming after step: {}", state.step);
                Ok(state)
            }
            // A fresh state would drop the recorded root and master.
            Some(state) if state.has_cluster_progress() => Err(BootstrapError::Config(format!(
                "{} records progress for cluster {} (last step: {}); rerun with --resume, \
                 or remove the file to discard it",
                BootstrapState::state_file(dir).display(),
                state.cluster_name,
                state.step
            ))),
            _ => {
                if resume {
                    info!("No saved state in {}, starting fresh", dir.display());
                }
                Ok(BootstrapState::new(&self.config.cluster_name, dir))
            }
        }
    }

    async fn advance(&self, state: &mut BootstrapState) -> Result<(), BootstrapError> {
        while let Some(step) = state.next_step() {
            info!("Step: {step}");
            self.execute(step, state).await?;
            state
                .complete(step)
                .step(step, "could not save bootstrap state")?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        step: BootstrapStep,
        state: &mut BootstrapState,
    ) -> Result<(), BootstrapError> {
        match step {
            BootstrapStep::NotStarted => {}
            BootstrapStep::EnsureIdentity => {
                state.fingerprint = Some(self.ensure_identity().await?);
            }
            BootstrapStep::InitCa => {
                self.init_ca_resumable(state)?;
            }
            BootstrapStep::CreateInstance => {
                let fingerprint = recorded(state.fingerprint.as_deref(), "fingerprint")
                    .step(step, "could not create master")?;
                let instance = self
                    .create_master(fingerprint)
                    .await
                    .step(step, "could not create master")?;
                state.instance = Some(instance);
            }
            BootstrapStep::ExtractAddress => {
                let address = recorded(state.instance.as_ref(), "instance")
                    .and_then(extract_address)
                    .step(step, "could not determine master address")?;
                info!("Master address: {address}");
                state.master_address = Some(address.to_string());
            }
            BootstrapStep::BindApiServerAddress => {
                self.bind_api_server_address(state)
                    .step(step, "could not create api server key pair")?;
            }
            BootstrapStep::InstallCredentials => {
                self.install_credentials(state)
                    .await
                    .step(step, "unable to configure credentials")?;
            }
        }
        Ok(())
    }

    async fn create_master(&self, fingerprint: &str) -> Result<Instance, BootstrapError> {
        // Removed on every exit path once this scope ends.
        let cloud_init = CloudInitFile::create(&self.config.overlay_cidr)?;

        let req = CreateInstanceRequest {
            name: self.config.master_name(),
            image: self.config.image.clone(),
            region: self.config.region.clone(),
            size: self.config.size.clone(),
            ssh_keys: vec![fingerprint.to_string()],
            user_data_file: cloud_init.path().to_path_buf(),
            wait: true,
        };

        info!("Creating master {} in {}", req.name, req.region);
        let instances = self.provider.create_instance(&req).await?;
        let instance = single_instance(instances)?;
        info!("Master {} is {}", instance.name, instance.status);

        Ok(instance)
    }

    fn bind_api_server_address(&self, state: &BootstrapState) -> Result<(), BootstrapError> {
        if self.config.api_server_san == ApiServerSan::Placeholder {
            info!("Keeping API server certificate for {API_SERVER_PLACEHOLDER}");
            return Ok(());
        }

        let address = master_address(state)?;
        let generation = recorded(state.root_generation.as_deref(), "root generation")?;

        let ca = self.certificate_authority();
        ca.verify_generation(generation)?;
        ca.issue_api_server_certificate(address)?;
        Ok(())
    }

    async fn install_credentials(&self, state: &BootstrapState) -> Result<(), BootstrapError> {
        let address = master_address(state)?;
        let host = RemoteHost::new(&self.config.remote_user, address.to_string());
        let staging_dir = self.config.staging_dir.as_str();

        self.remote
            .run(&host, &args(["mkdir", "-p", staging_dir]))
            .await?;

        for file in MASTER_CREDENTIALS {
            let local = self.config.working_dir.join(file);
            self.remote.copy(&host, staging_dir, &local).await?;
        }

        info!("Installed {} credentials on {host}", MASTER_CREDENTIALS.len());
        Ok(())
    }
}

/// Certificate authority for `config`'s working directory.
#[must_use]
pub fn certificate_authority(
    config: &BootstrapConfig,
    tools: Arc<dyn ToolRunner>,
) -> CertificateAuthority {
    CertificateAuthority::new(&config.working_dir, tools)
        .with_service_ip(config.service_ip)
        .with_verbose(config.verbose)
}

/// Create the root CA, then the API server (loopback placeholder), template
/// worker and admin certificates. Needs no cloud access.
///
/// # Errors
/// Returns the failure wrapped with [`BootstrapStep::InitCa`].
pub fn init_ca(config: &BootstrapConfig, tools: Arc<dyn ToolRunner>) -> Result<String, BootstrapError> {
    let step = BootstrapStep::InitCa;
    let ca = certificate_authority(config, tools);

    let generation = ca
        .create_root(config.force_root)
        .step(step, "could not create root")?;
    issue_initial_leaves(&ca)?;

    Ok(generation)
}

/// API server (loopback placeholder), template worker and admin certificates.
fn issue_initial_leaves(ca: &CertificateAuthority) -> Result<(), BootstrapError> {
    let step = BootstrapStep::InitCa;
    ca.issue_api_server_certificate(API_SERVER_PLACEHOLDER)
        .step(step, "could not create api server key pair")?;
    ca.issue_worker_certificate(WORKER_TEMPLATE_NAME, WORKER_TEMPLATE_ADDRESS)
        .step(step, "could not create worker key pair")?;
    ca.issue_admin_certificate()
        .step(step, "could not create admin key pair")?;
    Ok(())
}

/// The one instance a create call must return.
fn single_instance(mut instances: Vec<Instance>) -> Result<Instance, BootstrapError> {
    match instances.len() {
        1 => Ok(instances.remove(0)),
        n => Err(BootstrapError::UnexpectedInstanceCount(n)),
    }
}

/// First IPv4 address of `instance`.
fn extract_address(instance: &Instance) -> Result<IpAddr, BootstrapError> {
    instance
        .first_ipv4()
        .and_then(|a| a.parse::<Ipv4Addr>().ok())
        .map(IpAddr::V4)
        .ok_or_else(|| BootstrapError::MissingAddress {
            instance: instance.name.clone(),
        })
}

fn master_address(state: &BootstrapState) -> Result<IpAddr, BootstrapError> {
    let address = recorded(state.master_address.as_deref(), "master address")?;
    address
        .parse()
        .map_err(|_| BootstrapError::State(format!("invalid master address: {address}")))
}

/// A value an earlier step should have stored.
fn recorded<T>(value: Option<T>, what: &str) -> Result<T, BootstrapError> {
    value.ok_or_else(|| BootstrapError::State(format!("no {what} recorded by an earlier step")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InstanceStatus;

    fn instance(ipv4: &[&str]) -> Instance {
        Instance {
            id: "3164494".to_string(),
            name: "tcluster-master-nyc1".to_string(),
            status: InstanceStatus::Active,
            ipv4: ipv4.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_single_instance() {
        assert_eq!(
            single_instance(vec![instance(&["203.0.113.10"])]).unwrap().id,
            "3164494"
        );
        assert!(matches!(
            single_instance(Vec::new()),
            Err(BootstrapError::UnexpectedInstanceCount(0))
        ));
        assert!(matches!(
            single_instance(vec![instance(&[]), instance(&[])]),
            Err(BootstrapError::UnexpectedInstanceCount(2))
        ));
    }

    #[test]
    fn test_extract_first_address() {
        let addr = extract_address(&instance(&["203.0.113.10", "10.132.0.2"])).unwrap();
        assert_eq!(addr.to_string(), "203.0.113.10");
    }

    #[test]
    fn test_extract_address_fails_fast() {
        assert!(matches!(
            extract_address(&instance(&[])),
            Err(BootstrapError::MissingAddress { .. })
        ));
        assert!(matches!(
            extract_address(&instance(&["not-an-ip"])),
            Err(BootstrapError::MissingAddress { .. })
        ));
    }

    #[test]
    fn test_recorded_reports_missing_value() {
        let err = recorded::<&str>(None, "fingerprint").unwrap_err();
        assert!(err.to_string().contains("no fingerprint recorded"));
    }
}

//! Root CA creation and leaf certificate issuance.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::profile::{api_server_profile, worker_profile};
use crate::config::{validate_name, DEFAULT_SERVICE_IP};
use crate::error::BootstrapError;
use crate::tools::{args, run_checked, ToolRunner};

/// Root CA private key.
pub const CA_KEY: &str = "ca-key.pem";
/// Root CA certificate.
pub const CA_CERT: &str = "ca.pem";
/// Root CA generation identifier.
pub const CA_GENERATION: &str = "ca.generation";
/// API server certificate.
pub const API_SERVER_CERT: &str = "apiserver.pem";
/// API server private key.
pub const API_SERVER_KEY: &str = "apiserver-key.pem";
/// Admin client certificate.
pub const ADMIN_CERT: &str = "admin.pem";
/// Admin client private key.
pub const ADMIN_KEY: &str = "admin-key.pem";

/// Files installed on the master, in installation order.
pub const MASTER_CREDENTIALS: [&str; 5] = [
    CA_CERT,
    API_SERVER_CERT,
    API_SERVER_KEY,
    ADMIN_CERT,
    ADMIN_KEY,
];

const KEY_BITS: &str = "2048";
const ROOT_DAYS: &str = "10000";
const LEAF_DAYS: &str = "365";

/// Role a leaf certificate is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateRole {
    /// Kubernetes API server.
    ApiServer,
    /// A worker node, by name.
    Worker(String),
    /// Cluster admin client.
    Admin,
}

impl fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiServer => write!(f, "api server"),
            Self::Worker(name) => write!(f, "worker {name}"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// A (key, CSR, certificate) triple on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Role the certificate was issued for.
    pub role: CertificateRole,
    /// Private key path.
    pub key: PathBuf,
    /// Signing request path.
    pub csr: PathBuf,
    /// Signed certificate path.
    pub cert: PathBuf,
    /// Root generation the certificate was signed under.
    pub root_generation: String,
}

/// What one leaf issuance needs.
struct LeafRequest {
    role: CertificateRole,
    /// File stem: `<stem>-key.pem`, `<stem>.csr`, `<stem>.pem`.
    stem: String,
    subject: String,
    /// Profile file name and content, for leaves with extensions.
    profile: Option<(String, String)>,
}

/// A certificate authority rooted in a working directory.
pub struct CertificateAuthority {
    dir: PathBuf,
    service_ip: IpAddr,
    verbose: bool,
    tools: Arc<dyn ToolRunner>,
}

impl CertificateAuthority {
    /// Create a CA over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            dir: dir.into(),
            service_ip: IpAddr::V4(DEFAULT_SERVICE_IP),
            verbose: false,
            tools,
        }
    }

    /// Set the Kubernetes service IP embedded in the API server certificate.
    #[must_use]
    pub fn with_service_ip(mut self, service_ip: IpAddr) -> Self {
        self.service_ip = service_ip;
        self
    }

    /// Surface tool output at info level.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Working directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether any root material is present.
    #[must_use]
    pub fn root_exists(&self) -> bool {
        self.dir.join(CA_KEY).exists() || self.dir.join(CA_CERT).exists()
    }

    /// Current root generation, `None` when no complete root is on disk.
    ///
    /// # Errors
    /// Returns an error if the generation file cannot be read.
    pub fn root_generation(&self) -> Result<Option<String>, BootstrapError> {
        let complete = [CA_KEY, CA_CERT, CA_GENERATION]
            .iter()
            .all(|f| self.dir.join(f).exists());
        if !complete {
            return Ok(None);
        }
        let generation = fs::read_to_string(self.dir.join(CA_GENERATION))?;
        Ok(Some(generation.trim().to_string()))
    }

    /// Fail unless the root on disk is generation `expected`.
    ///
    /// # Errors
    /// Returns [`BootstrapError::MissingRoot`] or
    /// [`BootstrapError::RootGenerationMismatch`].
    pub fn verify_generation(&self, expected: &str) -> Result<(), BootstrapError> {
        let found = self.require_root()?;
        if found == expected {
            Ok(())
        } else {
            Err(BootstrapError::RootGenerationMismatch {
                expected: expected.to_string(),
                found,
            })
        }
    }

    /// Generate the root key and a self-signed `CN=kube-ca` certificate.
    ///
    /// An existing root is only replaced when `force` is set; replacing it
    /// orphans every leaf signed by the old one.
    ///
    /// # Errors
    /// Returns [`BootstrapError::RootExists`] or a tool error.
    pub fn create_root(&self, force: bool) -> Result<String, BootstrapError> {
        if self.root_exists() && !force {
            return Err(BootstrapError::RootExists {
                dir: self.dir.clone(),
            });
        }

        fs::create_dir_all(&self.dir)?;
        // A half-written root must read as missing.
        remove_if_exists(&self.dir.join(CA_GENERATION))?;

        info!("Creating root CA in {}", self.dir.display());
        self.openssl(
            args(["genrsa", "-out", CA_KEY, KEY_BITS]),
            "generate root key",
        )?;
        restrict_permissions(&self.dir.join(CA_KEY))?;

        self.openssl(
            args([
                "req", "-x509", "-new", "-nodes", "-key", CA_KEY, "-days", ROOT_DAYS, "-out",
                CA_CERT, "-subj", "/CN=kube-ca",
            ]),
            "self-sign root certificate",
        )?;

        let generation = Uuid::new_v4().to_string();
        fs::write(self.dir.join(CA_GENERATION), &generation)?;
        info!(generation = %generation, "Root CA created");

        Ok(generation)
    }

    /// Issue the API server certificate for `master_address`.
    ///
    /// # Errors
    /// Returns [`BootstrapError::MissingRoot`] or a tool error. A key
    /// generated before a failed signing is left on disk.
    pub fn issue_api_server_certificate(
        &self,
        master_address: IpAddr,
    ) -> Result<IssuedCertificate, BootstrapError> {
        let profile = api_server_profile(self.service_ip, master_address)?;
        self.issue(LeafRequest {
            role: CertificateRole::ApiServer,
            stem: "apiserver".to_string(),
            subject: "/CN=kube-apiserver".to_string(),
            profile: Some(("openssl.cnf".to_string(), profile)),
        })
    }

    /// Issue a worker certificate. Files are namespaced by `worker_name`.
    ///
    /// # Errors
    /// Returns [`BootstrapError::InvalidName`], [`BootstrapError::MissingRoot`]
    /// or a tool error.
    pub fn issue_worker_certificate(
        &self,
        worker_name: &str,
        worker_address: IpAddr,
    ) -> Result<IssuedCertificate, BootstrapError> {
        validate_name(worker_name)?;
        let profile = worker_profile(worker_address)?;
        self.issue(LeafRequest {
            role: CertificateRole::Worker(worker_name.to_string()),
            stem: format!("{worker_name}-worker"),
            subject: format!("/CN={worker_name}"),
            profile: Some((format!("{worker_name}-worker-openssl.cnf"), profile)),
        })
    }

    /// Issue the `CN=kube-admin` client certificate.
    ///
    /// # Errors
    /// Returns [`BootstrapError::MissingRoot`] or a tool error.
    pub fn issue_admin_certificate(&self) -> Result<IssuedCertificate, BootstrapError> {
        self.issue(LeafRequest {
            role: CertificateRole::Admin,
            stem: "admin".to_string(),
            subject: "/CN=kube-admin".to_string(),
            profile: None,
        })
    }

    fn issue(&self, req: LeafRequest) -> Result<IssuedCertificate, BootstrapError> {
        let root_generation = self.require_root()?;
        info!("Issuing {} certificate", req.role);

        let key = format!("{}-key.pem", req.stem);
        let csr = format!("{}.csr", req.stem);
        let cert = format!("{}.pem", req.stem);

        if let Some((name, content)) = &req.profile {
            fs::write(self.dir.join(name), content)?;
        }

        self.openssl(
            args(["genrsa", "-out", key.as_str(), KEY_BITS]),
            &format!("generate {} key", req.role),
        )?;
        restrict_permissions(&self.dir.join(&key))?;

        let mut req_args = args([
            "req",
            "-new",
            "-key",
            key.as_str(),
            "-out",
            csr.as_str(),
            "-subj",
            req.subject.as_str(),
        ]);
        if let Some((name, _)) = &req.profile {
            req_args.extend(args(["-config", name.as_str()]));
        }
        self.openssl(req_args, &format!("create {} signing request", req.role))?;

        let mut sign_args = args([
            "x509",
            "-req",
            "-in",
            csr.as_str(),
            "-CA",
            CA_CERT,
            "-CAkey",
            CA_KEY,
            "-CAcreateserial",
            "-out",
            cert.as_str(),
            "-days",
            LEAF_DAYS,
        ]);
        if let Some((name, _)) = &req.profile {
            sign_args.extend(args(["-extensions", "v3_req", "-extfile", name.as_str()]));
        }
        self.openssl(sign_args, &format!("sign {} certificate", req.role))?;

        Ok(IssuedCertificate {
            role: req.role,
            key: self.dir.join(key),
            csr: self.dir.join(csr),
            cert: self.dir.join(cert),
            root_generation,
        })
    }

    fn require_root(&self) -> Result<String, BootstrapError> {
        self.root_generation()?
            .ok_or_else(|| BootstrapError::MissingRoot {
                dir: self.dir.clone(),
            })
    }

    fn openssl(&self, args: Vec<String>, action: &str) -> Result<(), BootstrapError> {
        let output = run_checked(self.tools.as_ref(), "openssl", &args, Some(&self.dir), action)?;

        let text = output.combined();
        if !text.is_empty() {
            if self.verbose {
                info!("openssl: {text}");
            } else {
                debug!("openssl: {text}");
            }
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), BootstrapError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), BootstrapError> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), BootstrapError> {
    Ok(())
}

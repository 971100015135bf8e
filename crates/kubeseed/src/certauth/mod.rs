//! Private certificate authority for the cluster.
//!
//! Certificates are produced by the `openssl` CLI inside the working
//! directory, under fixed file names.

mod authority;
mod profile;

pub use authority::{
    CertificateAuthority, CertificateRole, IssuedCertificate, ADMIN_CERT, ADMIN_KEY,
    API_SERVER_CERT, API_SERVER_KEY, CA_CERT, CA_GENERATION, CA_KEY, MASTER_CREDENTIALS,
};
pub use profile::{api_server_profile, worker_profile};

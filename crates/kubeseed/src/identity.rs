//! SSH identity for reaching the master.
//!
//! One RSA keypair per working directory, generated on first use. Its MD5
//! fingerprint doubles as the provider's handle for the registered key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::BootstrapError;
use crate::providers::CloudProvider;
use crate::tools::{args, run_checked, ToolRunner};

/// Private key file name inside the working directory.
pub const SSH_PRIVATE_KEY: &str = "k8s.key";

/// Public key file name inside the working directory.
pub const SSH_PUBLIC_KEY: &str = "k8s.key.pub";

/// Local SSH keypair plus its provider registration.
pub struct SshIdentity {
    dir: PathBuf,
    key_name: String,
    tools: Arc<dyn ToolRunner>,
}

impl SshIdentity {
    /// Create an identity rooted in `dir`, registered as `key_name`.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        key_name: impl Into<String>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            dir: dir.into(),
            key_name: key_name.into(),
            tools,
        }
    }

    /// Path of the private key.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(SSH_PRIVATE_KEY)
    }

    /// Path of the public key.
    #[must_use]
    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(SSH_PUBLIC_KEY)
    }

    /// Generate the keypair unless the private key already exists.
    ///
    /// Returns whether a key was generated.
    ///
    /// # Errors
    /// Returns an error if `ssh-keygen` fails.
    pub fn ensure_keypair(&self) -> Result<bool, BootstrapError> {
        let private = self.private_key_path();
        if private.exists() {
            self.ensure_public_key()?;
            return Ok(false);
        }

        std::fs::create_dir_all(&self.dir)?;
        info!("Creating ssh key: {}", private.display());
        run_checked(
            self.tools.as_ref(),
            "ssh-keygen",
            &args(["-t", "rsa", "-q", "-N", "", "-f", path_arg(&private).as_str()]),
            None,
            "generate ssh key",
        )?;
        Ok(true)
    }

    /// MD5 fingerprint of the keypair, as colon-separated hex.
    ///
    /// # Errors
    /// Returns an error if `ssh-keygen` fails or prints something unexpected.
    pub fn fingerprint(&self) -> Result<String, BootstrapError> {
        let output = run_checked(
            self.tools.as_ref(),
            "ssh-keygen",
            &args(["-E", "md5", "-lf", path_arg(&self.private_key_path()).as_str()]),
            None,
            "fingerprint ssh key",
        )?;
        parse_fingerprint(&output.stdout)
    }

    /// Make sure a keypair exists and is registered with `provider`.
    ///
    /// # Errors
    /// Returns a tool error, or [`BootstrapError::KeyRegistration`] if the
    /// registry lookup or upload fails.
    pub async fn ensure_identity(
        &self,
        provider: &dyn CloudProvider,
    ) -> Result<String, BootstrapError> {
        self.ensure_keypair()?;

        let fingerprint = self.fingerprint()?;
        info!("fingerprint is {fingerprint}");

        let registration_error = |source| BootstrapError::KeyRegistration {
            fingerprint: fingerprint.clone(),
            source,
        };

        let existing = provider
            .find_ssh_key(&fingerprint)
            .await
            .map_err(registration_error)?;
        if existing.is_some() {
            info!("key existed in api");
            return Ok(fingerprint);
        }

        let public_key_path = self.public_key_path();
        info!("uploading key to api: {}", public_key_path.display());
        let public_key = std::fs::read_to_string(&public_key_path)?;
        provider
            .import_ssh_key(&self.key_name, &public_key)
            .await
            .map_err(registration_error)?;
        info!("key uploaded");

        Ok(fingerprint)
    }

    /// Recreate a lost public key from the private key.
    fn ensure_public_key(&self) -> Result<(), BootstrapError> {
        let public = self.public_key_path();
        if public.exists() {
            return Ok(());
        }
        let output = run_checked(
            self.tools.as_ref(),
            "ssh-keygen",
            &args(["-y", "-f", path_arg(&self.private_key_path()).as_str()]),
            None,
            "derive public key",
        )?;
        std::fs::write(public, output.stdout)?;
        Ok(())
    }
}

/// Extract the fingerprint from `ssh-keygen -E md5 -lf` output, e.g.
/// `2048 MD5:16:27:ac:... user@host (RSA)`.
///
/// # Errors
/// Returns [`BootstrapError::InvalidFingerprint`] on anything else.
pub fn parse_fingerprint(output: &str) -> Result<String, BootstrapError> {
    let invalid = || BootstrapError::InvalidFingerprint(output.trim().to_string());

    let field = output.split_whitespace().nth(1).ok_or_else(invalid)?;
    let hex = field
        .split_once(':')
        .map_or(field, |(prefix, rest)| {
            if prefix.eq_ignore_ascii_case("md5") {
                rest
            } else {
                field
            }
        });

    let octets: Vec<&str> = hex.split(':').collect();
    let well_formed = octets.len() == 16
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !well_formed {
        return Err(invalid());
    }

    Ok(hex.to_ascii_lowercase())
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fingerprint() {
        let out = "2048 MD5:16:27:ac:a5:76:28:2d:36:63:1b:56:4d:eb:df:a6:48 core@host (RSA)\n";
        assert_eq!(
            parse_fingerprint(out).unwrap(),
            "16:27:ac:a5:76:28:2d:36:63:1b:56:4d:eb:df:a6:48"
        );
    }

    #[test]
    fn test_parse_fingerprint_ignores_comment() {
        let a = "2048 MD5:16:27:ac:a5:76:28:2d:36:63:1b:56:4d:eb:df:a6:48 alice (RSA)";
        let b = "2048 MD5:16:27:AC:A5:76:28:2D:36:63:1B:56:4D:EB:DF:A6:48 no comment (RSA)";
        assert_eq!(parse_fingerprint(a).unwrap(), parse_fingerprint(b).unwrap());
    }

    #[test]
    fn test_parse_fingerprint_rejects_sha256() {
        let out = "2048 SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8 core@host (RSA)";
        assert!(matches!(
            parse_fingerprint(out),
            Err(BootstrapError::InvalidFingerprint(_))
        ));
        assert!(parse_fingerprint("").is_err());
    }
}

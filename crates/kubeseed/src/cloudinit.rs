//! Cloud-init document for the master node.

use std::io::Write;
use std::path::Path;

use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::BootstrapError;
use crate::templates;

/// Render the master cloud-init document for `overlay_cidr`.
///
/// # Errors
/// Returns an error if rendering fails.
pub fn render_cloud_init(overlay_cidr: &str) -> Result<String, BootstrapError> {
    Ok(templates::render(
        templates::CLOUD_CONFIG,
        &json!({ "overlay_cidr": overlay_cidr }),
    )?)
}

/// A rendered cloud-init document on disk.
///
/// The file is deleted when this value is dropped, including during
/// unwinding, so consumers only borrow [`CloudInitFile::path`] for the
/// duration of the call that needs it.
#[derive(Debug)]
pub struct CloudInitFile {
    file: NamedTempFile,
}

impl CloudInitFile {
    /// Render the document into a fresh temporary file.
    ///
    /// # Errors
    /// Returns an error if rendering or writing fails.
    pub fn create(overlay_cidr: &str) -> Result<Self, BootstrapError> {
        let content = render_cloud_init(overlay_cidr)?;

        let mut file = tempfile::Builder::new().prefix("mcc").tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        debug!(path = %file.path().display(), "Wrote cloud-init");

        Ok(Self { file })
    }

    /// Location of the temporary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

//! Embedded templates.

use handlebars::{Handlebars, RenderError};
use serde::Serialize;

/// Cloud-init document for the master.
pub const CLOUD_CONFIG: &str = include_str!("../templates/cloud-config.yaml");

/// OpenSSL request/extension profile for the API server certificate.
pub const APISERVER_OPENSSL_CNF: &str = include_str!("../templates/apiserver-openssl.cnf");

/// OpenSSL request/extension profile for worker certificates.
pub const WORKER_OPENSSL_CNF: &str = include_str!("../templates/worker-openssl.cnf");

/// Render `template` with `data`.
///
/// Strict: referencing a value `data` does not provide is an error. Output is
/// not HTML-escaped.
///
/// # Errors
/// Returns an error if the template is malformed or a value is missing.
pub fn render<T: Serialize>(template: &str, data: &T) -> Result<String, RenderError> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(true);
    hb.register_escape_fn(handlebars::no_escape);
    hb.render_template(template, data)
}

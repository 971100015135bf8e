//! Wire types for the droplet and account-key endpoints.
//!
//! Only the fields the bootstrap reads are modelled; serde ignores the rest.

use serde::{Deserialize, Serialize};

/// A droplet as returned by `POST /droplets` and `GET /droplets/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: i64,
    pub name: String,
    /// `new`, `active`, `off` or `archive`.
    pub status: String,
    /// Empty until the droplet has an address assigned.
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    /// IPv4 addresses in API order.
    #[must_use]
    pub fn ipv4_addresses(&self) -> Vec<String> {
        self.networks
            .v4
            .iter()
            .map(|n| n.ip_address.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct DropletResponse {
    pub droplet: Droplet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkAddress {
    pub ip_address: String,
    /// `public` or `private`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Body of `POST /droplets`.
#[derive(Debug, Serialize)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    /// Image slug.
    pub image: String,
    /// Key fingerprints authorized for root/core login.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
    /// Cloud-init document, inline.
    pub user_data: String,
}

/// An account SSH key.
#[derive(Debug, Clone, Deserialize)]
pub struct SshKey {
    pub id: i64,
    pub fingerprint: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SshKeyResponse {
    pub ssh_key: SshKey,
}

/// Body of `POST /account/keys`.
#[derive(Debug, Serialize)]
pub struct CreateSshKeyRequest {
    pub name: String,
    pub public_key: String,
}

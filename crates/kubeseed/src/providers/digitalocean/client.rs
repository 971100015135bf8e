//! `DigitalOcean` API client implementation.
//!
//! API Documentation: <https://docs.digitalocean.com/reference/api/>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::models::{
    CreateDropletRequest, CreateSshKeyRequest, Droplet, DropletResponse, SshKey, SshKeyResponse,
};
use crate::providers::traits::{
    CloudProvider, CreateInstanceRequest, Instance, InstanceStatus, ProviderError, RegisteredKey,
};

/// Base URL for `DigitalOcean` API.
const API_BASE_URL: &str = "https://api.digitalocean.com/v2";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval when waiting for droplet status.
const POLL_INTERVAL_SECS: u64 = 10;

/// Default time to wait for a droplet to become active.
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 600;

/// `DigitalOcean` provider.
#[derive(Clone)]
pub struct DigitalOcean {
    /// HTTP client.
    client: Client,
    /// API token for authentication.
    api_token: String,
    /// API root, overridable for tests.
    base_url: String,
    /// Delay between status polls.
    poll_interval: Duration,
    /// Upper bound on waiting for a droplet to become active.
    wait_timeout_secs: u64,
}

impl DigitalOcean {
    /// Create a new `DigitalOcean` provider.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(api_token: impl Into<String>) -> Result<Self, ProviderError> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(ProviderError::Config("API token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_token,
            base_url: API_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
        })
    }

    /// Point the client at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the delay between status polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how long `create_instance` waits for the droplet to become active.
    #[must_use]
    pub fn with_wait_timeout(mut self, secs: u64) -> Self {
        self.wait_timeout_secs = secs;
        self
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(text))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Poll a droplet until it reports `active`.
    async fn wait_active(&self, id: i64) -> Result<Droplet, ProviderError> {
        info!(droplet_id = id, timeout_secs = self.wait_timeout_secs, "Waiting for droplet to be active");

        let start = std::time::Instant::now();
        let timeout = Duration::from_secs(self.wait_timeout_secs);

        loop {
            let response: DropletResponse = self.get(&format!("/droplets/{id}")).await?;

            debug!(
                droplet_id = id,
                status = %response.droplet.status,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling droplet status"
            );

            if response.droplet.status == "active" {
                info!(droplet_id = id, "Droplet is active");
                return Ok(response.droplet);
            }

            if start.elapsed() > timeout {
                return Err(ProviderError::Timeout(self.wait_timeout_secs));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Convert a `DigitalOcean` droplet to our Instance type.
    fn to_instance(droplet: &Droplet) -> Instance {
        let status = match droplet.status.as_str() {
            "new" => InstanceStatus::New,
            "active" => InstanceStatus::Active,
            "off" => InstanceStatus::Off,
            "archive" => InstanceStatus::Archive,
            _ => InstanceStatus::Unknown,
        };

        Instance {
            id: droplet.id.to_string(),
            name: droplet.name.clone(),
            status,
            ipv4: droplet.ipv4_addresses(),
        }
    }

    fn to_registered_key(key: &SshKey) -> RegisteredKey {
        RegisteredKey {
            id: key.id.to_string(),
            name: key.name.clone(),
            fingerprint: key.fingerprint.clone(),
        }
    }
}

#[async_trait]
impl CloudProvider for DigitalOcean {
    async fn create_instance(
        &self,
        req: &CreateInstanceRequest,
    ) -> Result<Vec<Instance>, ProviderError> {
        info!(
            name = %req.name,
            size = %req.size,
            region = %req.region,
            image = %req.image,
            "Creating droplet"
        );

        let user_data = std::fs::read_to_string(&req.user_data_file).map_err(|source| {
            ProviderError::UserData {
                path: req.user_data_file.clone(),
                source,
            }
        })?;

        let body = CreateDropletRequest {
            name: req.name.clone(),
            region: req.region.clone(),
            size: req.size.clone(),
            image: req.image.clone(),
            ssh_keys: req.ssh_keys.clone(),
            user_data,
        };

        let response: DropletResponse = self.post("/droplets", &body).await?;

        info!(droplet_id = response.droplet.id, "Droplet created");

        let droplet = if req.wait {
            self.wait_active(response.droplet.id).await?
        } else {
            response.droplet
        };

        Ok(vec![Self::to_instance(&droplet)])
    }

    async fn find_ssh_key(&self, fingerprint: &str) -> Result<Option<RegisteredKey>, ProviderError> {
        match self
            .get::<SshKeyResponse>(&format!("/account/keys/{fingerprint}"))
            .await
        {
            Ok(response) => Ok(Some(Self::to_registered_key(&response.ssh_key))),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn import_ssh_key(
        &self,
        name: &str,
        public_key: &str,
    ) -> Result<RegisteredKey, ProviderError> {
        info!(name = %name, "Importing SSH key");

        let body = CreateSshKeyRequest {
            name: name.to_string(),
            public_key: public_key.trim().to_string(),
        };
        let response: SshKeyResponse = self.post("/account/keys", &body).await?;

        Ok(Self::to_registered_key(&response.ssh_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::digitalocean::models::{NetworkAddress, Networks};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn droplet_json(status: &str, v4: &[&str]) -> serde_json::Value {
        let networks: Vec<_> = v4
            .iter()
            .map(|ip| serde_json::json!({ "ip_address": ip, "type": "public" }))
            .collect();
        serde_json::json!({
            "droplet": {
                "id": 42,
                "name": "tcluster-master-nyc1",
                "status": status,
                "networks": { "v4": networks, "v6": [] }
            }
        })
    }

    fn client(server: &MockServer) -> DigitalOcean {
        DigitalOcean::new("test-token")
            .unwrap()
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(1))
            .with_wait_timeout(5)
    }

    #[test]
    fn test_instance_mapping() {
        let droplet = Droplet {
            id: 12345,
            name: "test-master".to_string(),
            status: "active".to_string(),
            networks: Networks {
                v4: vec![
                    NetworkAddress {
                        ip_address: "10.0.0.2".to_string(),
                        kind: "private".to_string(),
                    },
                    NetworkAddress {
                        ip_address: "1.2.3.4".to_string(),
                        kind: "public".to_string(),
                    },
                ],
            },
        };

        let converted = DigitalOcean::to_instance(&droplet);
        assert_eq!(converted.status, InstanceStatus::Active);
        assert_eq!(converted.id, "12345");
        assert_eq!(converted.first_ipv4(), Some("10.0.0.2"));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            DigitalOcean::new("  "),
            Err(ProviderError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_create_instance_waits_for_active() {
        let server = MockServer::start().await;
        let user_data = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(user_data.path(), "#cloud-config\n").unwrap();

        Mock::given(method("POST"))
            .and(path("/droplets"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_partial_json(serde_json::json!({
                "name": "tcluster-master-nyc1",
                "image": "coreos-alpha",
                "ssh_keys": ["aa:bb"],
                "user_data": "#cloud-config\n",
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(droplet_json("new", &[])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/droplets/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(droplet_json("active", &["203.0.113.10"])),
            )
            .mount(&server)
            .await;

        let req = CreateInstanceRequest {
            name: "tcluster-master-nyc1".to_string(),
            image: "coreos-alpha".to_string(),
            region: "nyc1".to_string(),
            size: "4gb".to_string(),
            ssh_keys: vec!["aa:bb".to_string()],
            user_data_file: user_data.path().to_path_buf(),
            wait: true,
        };

        let instances = client(&server).create_instance(&req).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].status, InstanceStatus::Active);
        assert_eq!(instances[0].first_ipv4(), Some("203.0.113.10"));
    }

    #[tokio::test]
    async fn test_missing_user_data_file() {
        let server = MockServer::start().await;
        let req = CreateInstanceRequest {
            name: "x".to_string(),
            image: "coreos-alpha".to_string(),
            region: "nyc1".to_string(),
            size: "4gb".to_string(),
            ssh_keys: vec![],
            user_data_file: "/nonexistent/cloud-config".into(),
            wait: false,
        };

        let err = client(&server).create_instance(&req).await.unwrap_err();
        assert!(matches!(err, ProviderError::UserData { .. }));
    }

    #[tokio::test]
    async fn test_find_ssh_key_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/keys/aa:bb"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not_found"))
            .mount(&server)
            .await;

        let key = client(&server).find_ssh_key("aa:bb").await.unwrap();
        assert!(key.is_none());
    }

    #[tokio::test]
    async fn test_find_ssh_key_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/keys/aa:bb"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server).find_ssh_key("aa:bb").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_import_ssh_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/account/keys"))
            .and(body_partial_json(serde_json::json!({
                "name": "tcluster",
                "public_key": "ssh-rsa AAAA test",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "ssh_key": {
                    "id": 7,
                    "fingerprint": "aa:bb",
                    "name": "tcluster",
                    "public_key": "ssh-rsa AAAA test"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = client(&server)
            .import_ssh_key("tcluster", "ssh-rsa AAAA test\n")
            .await
            .unwrap();
        assert_eq!(key.id, "7");
        assert_eq!(key.fingerprint, "aa:bb");
    }
}

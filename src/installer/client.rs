use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::InstallerError;

/// Hosted assisted-installer endpoint
pub const DEFAULT_INSTALLER_URL: &str = "https://api.openshift.com/api/assisted-install/v2/";

pub const STATUS_INSTALLED: &str = "installed";
pub const STATUS_INSTALLING: &str = "installing";
pub const STATUS_PREPARING: &str = "preparing-for-installation";
pub const STATUS_ERROR: &str = "error";
pub const HOST_PENDING_FOR_INPUT: &str = "pending-for-input";
pub const HOST_KNOWN: &str = "known";

/// Discovery image flavour requested for every infra env
pub const MINIMAL_ISO: &str = "minimal-iso";

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct NewCluster {
    pub name: String,
    pub openshift_version: String,
    pub high_availability_mode: String,
    pub base_dns_domain: String,
    pub ssh_public_key: String,
    pub pull_secret: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewInfraEnv {
    pub name: String,
    pub image_type: String,
    pub cluster_id: String,
    pub pull_secret: Value,
    pub openshift_version: String,
    pub ssh_authorized_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstallProgress {
    #[serde(default)]
    pub total_percentage: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallCluster {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub status_info: Option<String>,
    #[serde(default)]
    pub progress: Option<InstallProgress>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstallCluster {
    pub fn percentage(&self) -> Option<u32> {
        self.progress.as_ref().and_then(|p| p.total_percentage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfraEnv {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub requested_hostname: Option<String>,
    pub status: String,
    #[serde(default)]
    pub status_info: Option<String>,
}

impl Host {
    pub fn hostname(&self) -> &str {
        self.requested_hostname.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryImage {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vip {
    pub cluster_id: String,
    pub ip: String,
}

/// Network settings applied before the install starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterNetworkUpdate {
    pub machine_network_cidr: String,
    pub api_vips: Vec<Vip>,
    pub ingress_vips: Vec<Vip>,
}

impl ClusterNetworkUpdate {
    pub fn new(cluster_id: &str, cidr: &str, api_vip: &str, ingress_vip: &str) -> Self {
        let vip = |ip: &str| Vip {
            cluster_id: cluster_id.to_string(),
            ip: ip.to_string(),
        };
        Self {
            machine_network_cidr: cidr.to_string(),
            api_vips: vec![vip(api_vip)],
            ingress_vips: vec![vip(ingress_vip)],
        }
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait InstallerApi: Send + Sync {
    async fn create_cluster(&self, cluster: &NewCluster) -> Result<InstallCluster, InstallerError>;

    async fn get_cluster(&self, cluster_id: &str) -> Result<InstallCluster, InstallerError>;

    async fn update_cluster(
        &self,
        cluster_id: &str,
        update: &ClusterNetworkUpdate,
    ) -> Result<(), InstallerError>;

    async fn start_install(&self, cluster_id: &str) -> Result<(), InstallerError>;

    async fn create_infra_env(&self, infra_env: &NewInfraEnv) -> Result<InfraEnv, InstallerError>;

    async fn list_hosts(&self, infra_env_id: &str) -> Result<Vec<Host>, InstallerError>;

    async fn image_url(&self, infra_env_id: &str) -> Result<DiscoveryImage, InstallerError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct AssistedInstallerClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl AssistedInstallerClient {
    pub fn new(api_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_INSTALLER_URL.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        trace!("{} {}", method, url);
        let mut req = self.client.request(method, &url);
        if let Some(ref token) = self.api_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn send(req: RequestBuilder) -> Result<Response, InstallerError> {
        let response = req
            .send()
            .await
            .map_err(|e| InstallerError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if !matches!(status, 200 | 201 | 202 | 204) {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InstallerError::Api {
                status,
                message: text,
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, InstallerError> {
        Self::send(req)
            .await?
            .json()
            .await
            .map_err(|e| InstallerError::Parse(e.to_string()))
    }
}

#[async_trait]
impl InstallerApi for AssistedInstallerClient {
    async fn create_cluster(&self, cluster: &NewCluster) -> Result<InstallCluster, InstallerError> {
        Self::json(self.request(Method::POST, "clusters").json(cluster)).await
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<InstallCluster, InstallerError> {
        Self::json(self.request(Method::GET, &format!("clusters/{}", cluster_id))).await
    }

    async fn update_cluster(
        &self,
        cluster_id: &str,
        update: &ClusterNetworkUpdate,
    ) -> Result<(), InstallerError> {
        let req = self
            .request(Method::PATCH, &format!("clusters/{}", cluster_id))
            .json(update);
        Self::send(req).await.map(|_| ())
    }

    async fn start_install(&self, cluster_id: &str) -> Result<(), InstallerError> {
        let req = self.request(
            Method::POST,
            &format!("clusters/{}/actions/install", cluster_id),
        );
        Self::send(req).await.map(|_| ())
    }

    async fn create_infra_env(&self, infra_env: &NewInfraEnv) -> Result<InfraEnv, InstallerError> {
        Self::json(self.request(Method::POST, "infra-envs").json(infra_env)).await
    }

    async fn list_hosts(&self, infra_env_id: &str) -> Result<Vec<Host>, InstallerError> {
        Self::json(self.request(Method::GET, &format!("infra-envs/{}/hosts", infra_env_id))).await
    }

    async fn image_url(&self, infra_env_id: &str) -> Result<DiscoveryImage, InstallerError> {
        let path = format!("infra-envs/{}/downloads/image-url", infra_env_id);
        Self::json(self.request(Method::GET, &path)).await
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cluster_serialization() {
        let cluster = NewCluster {
            name: "ocp".to_string(),
            openshift_version: "4.14".to_string(),
            high_availability_mode: "Full".to_string(),
            base_dns_domain: "example.com".to_string(),
            ssh_public_key: "ssh-ed25519 AAAA".to_string(),
            pull_secret: serde_json::json!({"auths": {}}),
        };
        let json = serde_json::to_value(&cluster).unwrap();
        assert_eq!(json["high_availability_mode"], "Full");
        // pull secret travels as an object, not a string
        assert!(json["pull_secret"].is_object());
    }

    #[test]
    fn test_cluster_deserialization() {
        let json = r#"{
            "id": "c1",
            "name": "ocp",
            "status": "installing",
            "progress": {"total_percentage": 42},
            "created_at": "2024-03-01T10:00:00Z",
            "extra_field": true
        }"#;

        let cluster: InstallCluster = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.status, STATUS_INSTALLING);
        assert_eq!(cluster.percentage(), Some(42));
        assert!(cluster.created_at.is_some());
    }

    #[test]
    fn test_network_update_shape() {
        let update = ClusterNetworkUpdate::new("c1", "10.0.0.0/24", "10.0.0.5", "10.0.0.6");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["machine_network_cidr"], "10.0.0.0/24");
        assert_eq!(json["api_vips"][0]["ip"], "10.0.0.5");
        assert_eq!(json["ingress_vips"][0]["cluster_id"], "c1");
    }

    #[test]
    fn test_host_without_hostname() {
        let host: Host = serde_json::from_str(r#"{"id": "h1", "status": "known"}"#).unwrap();
        assert_eq!(host.hostname(), "h1");
    }

    #[test]
    fn test_default_base_url() {
        let client = AssistedInstallerClient::new(None);
        assert_eq!(
            client.base_url(),
            "https://api.openshift.com/api/assisted-install/v2"
        );
        let client = client.with_base_url("http://127.0.0.1:9000/");
        assert_eq!(client.base_url(), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_mock_walks_through_install() {
        let api = mock::MockInstaller::new(&["node1"]);
        assert!(api.list_hosts("i").await.unwrap().is_empty());
        api.image_url("i").await.unwrap();
        assert_eq!(
            api.list_hosts("i").await.unwrap()[0].status,
            HOST_PENDING_FOR_INPUT
        );

        api.start_install("c").await.unwrap();
        assert_eq!(api.get_cluster("c").await.unwrap().status, STATUS_INSTALLING);
        assert_eq!(api.get_cluster("c").await.unwrap().status, STATUS_INSTALLED);
    }
}

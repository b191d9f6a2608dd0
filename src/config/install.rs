//! Installer documents for the external cluster-install flow

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_value, ConfigError, DocumentFormat};

/// Environment variable holding the installer pull secret (JSON)
pub const PULL_SECRET_ENV: &str = "PULL_SECRET";

/// Environment variable holding the install API bearer token
pub const API_TOKEN_ENV: &str = "API_TOKEN";

const INSTALL_REQUIRED: &[&str] = &[
    "nodes",
    "cluster_name",
    "external_network_name",
    "private_network_name",
    "private_subnet_name",
    "api_vip",
    "ingress_vip",
    "openshift_version",
    "base_dns_domain",
    "ssh_public_key",
];

const TEARDOWN_REQUIRED: &[&str] = &["nodes", "private_network_name", "api_vip", "ingress_vip"];

fn default_provisioning_network() -> String {
    "provisioning".to_string()
}

fn default_ha_mode() -> String {
    "Full".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstallConfig {
    /// Node ids or names, in the order they are registered
    pub nodes: Vec<String>,
    pub cluster_name: String,
    #[serde(default = "default_provisioning_network")]
    pub provisioning_network_name: String,
    pub external_network_name: String,
    pub private_network_name: String,
    pub private_subnet_name: String,
    pub api_vip: String,
    pub ingress_vip: String,
    pub openshift_version: String,
    #[serde(default = "default_ha_mode")]
    pub high_availability_mode: String,
    pub base_dns_domain: String,
    /// Key contents, not a path
    pub ssh_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstallTeardownConfig {
    pub nodes: Vec<String>,
    #[serde(default = "default_provisioning_network")]
    pub provisioning_network_name: String,
    pub private_network_name: String,
    pub api_vip: String,
    pub ingress_vip: String,
}

// ============================================================================
// SBIO: Pure parsing (no I/O)
// ============================================================================

/// Names from `required` absent in the document, sorted
pub fn missing_fields(document: &Value, required: &[&str]) -> Vec<String> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|key| document.get(**key).map_or(true, Value::is_null))
        .map(|key| key.to_string())
        .collect();
    missing.sort();
    missing
}

fn parse_checked<T: serde::de::DeserializeOwned>(
    content: &str,
    format: DocumentFormat,
    required: &[&str],
) -> Result<T, ConfigError> {
    let document = parse_value(content, format)?;
    let missing = missing_fields(&document, required);
    if !missing.is_empty() {
        return Err(ConfigError::MissingFields(missing));
    }
    serde_json::from_value(document).map_err(|e| ConfigError::Parse(e.to_string()))
}

impl InstallConfig {
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        let config: InstallConfig = parse_checked(content, format, INSTALL_REQUIRED)?;
        if config.nodes.is_empty() {
            return Err(ConfigError::Invalid("nodes must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Name of the port carrying the API virtual IP
    pub fn api_port_name(&self) -> String {
        format!("{}-api", self.cluster_name)
    }

    /// Name of the port carrying the ingress virtual IP
    pub fn apps_port_name(&self) -> String {
        format!("{}-apps", self.cluster_name)
    }
}

impl InstallTeardownConfig {
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        parse_checked(content, format, TEARDOWN_REQUIRED)
    }
}

impl From<&InstallConfig> for InstallTeardownConfig {
    fn from(config: &InstallConfig) -> Self {
        Self {
            nodes: config.nodes.clone(),
            provisioning_network_name: config.provisioning_network_name.clone(),
            private_network_name: config.private_network_name.clone(),
            api_vip: config.api_vip.clone(),
            ingress_vip: config.ingress_vip.clone(),
        }
    }
}

/// Parse the pull secret, which the install API expects as a JSON object
pub fn parse_pull_secret(raw: Option<&str>) -> Result<Value, ConfigError> {
    let raw = raw.ok_or(ConfigError::MissingEnv(PULL_SECRET_ENV))?;
    serde_json::from_str(raw)
        .map_err(|e| ConfigError::Invalid(format!("{} is not valid JSON: {}", PULL_SECRET_ENV, e)))
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Read the pull secret from the environment
pub fn pull_secret_from_env() -> Result<Value, ConfigError> {
    parse_pull_secret(std::env::var(PULL_SECRET_ENV).ok().as_deref())
}

/// Read the install API token from the environment
pub fn api_token_from_env() -> Option<String> {
    std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty())
}

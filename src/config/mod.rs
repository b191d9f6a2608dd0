//! Declarative documents consumed by the orchestrator
//!
//! Cluster documents drive `orchestrate`; installer documents drive the
//! `openshift` subcommands. Both are JSON or YAML, picked by file extension.

pub mod cluster;
pub mod install;

pub use cluster::{ClusterConfig, ClusterNodeConfig, NetworkSpec, NodeSelector, ProvisioningSpec};
pub use install::{InstallConfig, InstallTeardownConfig, PULL_SECRET_ENV, API_TOKEN_ENV};

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors for loading and validating documents
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Please specify these missing values in your config file: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Please export {0} in your environment")]
    MissingEnv(&'static str),
}

/// Document encodings understood by the loaders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// YAML for `.yaml`/`.yml`, JSON otherwise
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

// ============================================================================
// SBIO: Pure parsing (no I/O)
// ============================================================================

/// Parse a document into a generic JSON value
pub fn parse_value(content: &str, format: DocumentFormat) -> Result<serde_json::Value, ConfigError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

/// Parse a document straight into a typed value
pub fn parse_document<T: DeserializeOwned>(
    content: &str,
    format: DocumentFormat,
) -> Result<T, ConfigError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

// ============================================================================
// SBIO: I/O wrappers - thin layer over pure functions
// ============================================================================

/// Load and validate a cluster document from disk
pub fn load_cluster_config(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    ClusterConfig::parse(&content, DocumentFormat::from_path(path))
}

/// Load an installer document from disk
pub fn load_install_config(path: &Path) -> Result<InstallConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    InstallConfig::parse(&content, DocumentFormat::from_path(path))
}

/// Load an installer teardown document from disk
pub fn load_install_teardown_config(path: &Path) -> Result<InstallTeardownConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    InstallTeardownConfig::parse(&content, DocumentFormat::from_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("c.yaml")),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("c.yml")),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("c.json")),
            DocumentFormat::Json
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("cluster")),
            DocumentFormat::Json
        );
    }

    #[test]
    fn test_load_cluster_config_yaml() {
        let content = r#"
node_configs:
  - nodes:
      num_nodes: 2
      resource_class: baremetal
    network:
      network_uuid: private
    provisioning:
      provisioning_type: image_url
      url: http://boot/boot.iso
"#;
        let file = create_temp_file(content, ".yaml");
        let config = load_cluster_config(file.path()).unwrap();
        assert_eq!(config.node_configs.len(), 1);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_cluster_config(Path::new("/nonexistent/cluster.json"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_missing_fields_message() {
        let err = ConfigError::MissingFields(vec!["api_vip".to_string(), "nodes".to_string()]);
        assert_eq!(
            err.to_string(),
            "Please specify these missing values in your config file: api_vip, nodes"
        );
    }
}

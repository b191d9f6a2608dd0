//! Cluster document: which nodes, on which networks, booted how

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{parse_document, ConfigError, DocumentFormat};

/// The whole cluster document, an ordered list of node configurations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub node_configs: Vec<ClusterNodeConfig>,
}

/// One group of nodes sharing network layout and provisioning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterNodeConfig {
    #[serde(rename = "nodes")]
    pub selector: NodeSelector,
    pub network: NetworkSpec,
    pub provisioning: ProvisioningSpec,
}

/// How the nodes of one configuration entry are chosen
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RawSelector", into = "RawSelector")]
pub enum NodeSelector {
    /// Specific nodes by id or name
    Explicit(Vec<String>),
    /// Any `count` available nodes of a resource class
    Pooled { count: usize, resource_class: String },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct RawSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_uuids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    num_nodes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_class: Option<String>,
}

impl TryFrom<RawSelector> for NodeSelector {
    type Error = String;

    fn try_from(raw: RawSelector) -> Result<Self, Self::Error> {
        match (raw.node_uuids, raw.num_nodes, raw.resource_class) {
            (Some(ids), None, None) => Ok(NodeSelector::Explicit(ids)),
            (None, Some(count), Some(resource_class)) => Ok(NodeSelector::Pooled {
                count,
                resource_class,
            }),
            (None, Some(_), None) => Err("num_nodes requires resource_class".to_string()),
            (None, None, Some(_)) => Err("resource_class requires num_nodes".to_string()),
            (None, None, None) => {
                Err("nodes must specify node_uuids or num_nodes and resource_class".to_string())
            }
            _ => Err("nodes must specify either node_uuids or num_nodes, not both".to_string()),
        }
    }
}

impl From<NodeSelector> for RawSelector {
    fn from(selector: NodeSelector) -> Self {
        match selector {
            NodeSelector::Explicit(ids) => RawSelector {
                node_uuids: Some(ids),
                ..Default::default()
            },
            NodeSelector::Pooled {
                count,
                resource_class,
            } => RawSelector {
                node_uuids: None,
                num_nodes: Some(count),
                resource_class: Some(resource_class),
            },
        }
    }
}

impl NodeSelector {
    pub fn is_explicit(&self) -> bool {
        matches!(self, NodeSelector::Explicit(_))
    }
}

/// Network layout for every node of an entry
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkSpec {
    /// Untagged network; the trunk's native network when tagged ones exist
    #[serde(rename = "network_uuid")]
    pub primary_network: String,

    #[serde(
        rename = "tagged_network_uuids",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tagged_networks: Vec<String>,

    /// External network to take a floating address from
    #[serde(
        rename = "fip_network_uuid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub floating_network: Option<String>,
}

impl NetworkSpec {
    pub fn new(primary_network: impl Into<String>) -> Self {
        Self {
            primary_network: primary_network.into(),
            tagged_networks: Vec::new(),
            floating_network: None,
        }
    }

    pub fn with_tagged(mut self, network: impl Into<String>) -> Self {
        self.tagged_networks.push(network.into());
        self
    }

    pub fn with_floating(mut self, network: impl Into<String>) -> Self {
        self.floating_network = Some(network.into());
        self
    }

    pub fn is_trunk(&self) -> bool {
        !self.tagged_networks.is_empty()
    }
}

/// How a node is booted once its network is in place
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "provisioning_type", rename_all = "snake_case")]
pub enum ProvisioningSpec {
    /// Write an image to disk with the deployment tool
    Image {
        #[serde(rename = "image_uuid")]
        image: String,
        ssh_key: String,
    },
    /// Boot a ramdisk ISO served from a URL
    ImageUrl { url: String },
}

impl ProvisioningSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            ProvisioningSpec::Image { .. } => "image",
            ProvisioningSpec::ImageUrl { .. } => "image_url",
        }
    }
}

// ============================================================================
// SBIO: Pure validation (no I/O)
// ============================================================================

impl ClusterConfig {
    /// Parse and validate a document
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        let config: ClusterConfig = parse_document(content, format)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject documents that can never be allocated
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_configs.is_empty() {
            return Err(ConfigError::Invalid(
                "node_configs must contain at least one entry".to_string(),
            ));
        }

        let mut pinned = HashSet::new();
        for (index, entry) in self.node_configs.iter().enumerate() {
            match &entry.selector {
                NodeSelector::Explicit(ids) if ids.is_empty() => {
                    return Err(ConfigError::Invalid(format!(
                        "node_configs[{}]: node_uuids is empty",
                        index
                    )));
                }
                NodeSelector::Explicit(ids) => {
                    for id in ids {
                        if !pinned.insert(id.as_str()) {
                            return Err(ConfigError::Invalid(format!(
                                "node {} is listed more than once",
                                id
                            )));
                        }
                    }
                }
                NodeSelector::Pooled { count: 0, .. } => {
                    return Err(ConfigError::Invalid(format!(
                        "node_configs[{}]: num_nodes must be at least 1",
                        index
                    )));
                }
                NodeSelector::Pooled { .. } => {}
            }

            if entry.network.primary_network.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "node_configs[{}]: Must specify a network",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Total nodes the document asks for
    pub fn node_count(&self) -> usize {
        self.node_configs
            .iter()
            .map(|entry| match &entry.selector {
                NodeSelector::Explicit(ids) => ids.len(),
                NodeSelector::Pooled { count, .. } => *count,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"{
        "node_configs": [
            {
                "nodes": {"node_uuids": ["nodeA"]},
                "network": {"network_uuid": "net1", "tagged_network_uuids": ["net2"]},
                "provisioning": {"provisioning_type": "image_url", "url": "http://x/boot.iso"}
            },
            {
                "nodes": {"num_nodes": 2, "resource_class": "fc430"},
                "network": {"network_uuid": "net1", "fip_network_uuid": "external"},
                "provisioning": {
                    "provisioning_type": "image",
                    "image_uuid": "centos-9",
                    "ssh_key": "~/.ssh/id_rsa.pub"
                }
            }
        ]
    }"#;

    #[test]
    fn test_parse_cluster_config() {
        let config = ClusterConfig::parse(EXAMPLE, DocumentFormat::Json).unwrap();
        assert_eq!(config.node_configs.len(), 2);
        assert_eq!(config.node_count(), 3);

        let first = &config.node_configs[0];
        assert_eq!(first.selector, NodeSelector::Explicit(vec!["nodeA".to_string()]));
        assert!(first.network.is_trunk());
        assert_eq!(
            first.provisioning,
            ProvisioningSpec::ImageUrl {
                url: "http://x/boot.iso".to_string()
            }
        );

        let second = &config.node_configs[1];
        assert_eq!(
            second.selector,
            NodeSelector::Pooled {
                count: 2,
                resource_class: "fc430".to_string()
            }
        );
        assert_eq!(second.network.floating_network.as_deref(), Some("external"));
        assert_eq!(second.provisioning.type_name(), "image");
    }

    #[test]
    fn test_unknown_provisioning_type_rejected() {
        let doc = r#"{"node_configs": [{
            "nodes": {"node_uuids": ["a"]},
            "network": {"network_uuid": "n"},
            "provisioning": {"provisioning_type": "pxe"}
        }]}"#;
        let err = ClusterConfig::parse(doc, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref m) if m.contains("pxe")));
    }

    #[test]
    fn test_missing_network_rejected() {
        let doc = r#"{"node_configs": [{
            "nodes": {"node_uuids": ["a"]},
            "network": {},
            "provisioning": {"provisioning_type": "image_url", "url": "u"}
        }]}"#;
        let err = ClusterConfig::parse(doc, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref m) if m.contains("network_uuid")));
    }

    #[test]
    fn test_image_requires_ssh_key() {
        let doc = r#"{"node_configs": [{
            "nodes": {"node_uuids": ["a"]},
            "network": {"network_uuid": "n"},
            "provisioning": {"provisioning_type": "image", "image_uuid": "i"}
        }]}"#;
        let err = ClusterConfig::parse(doc, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref m) if m.contains("ssh_key")));
    }

    #[test]
    fn test_selector_needs_exactly_one_form() {
        let both = r#"{"node_uuids": ["a"], "num_nodes": 1, "resource_class": "x"}"#;
        assert!(serde_json::from_str::<NodeSelector>(both).is_err());

        let count_only = r#"{"num_nodes": 1}"#;
        let err = serde_json::from_str::<NodeSelector>(count_only).unwrap_err();
        assert!(err.to_string().contains("resource_class"));

        let neither = r#"{}"#;
        assert!(serde_json::from_str::<NodeSelector>(neither).is_err());
    }

    #[test]
    fn test_duplicate_explicit_node_rejected() {
        let doc = r#"{"node_configs": [
            {"nodes": {"node_uuids": ["a"]}, "network": {"network_uuid": "n"},
             "provisioning": {"provisioning_type": "image_url", "url": "u"}},
            {"nodes": {"node_uuids": ["a"]}, "network": {"network_uuid": "n"},
             "provisioning": {"provisioning_type": "image_url", "url": "u"}}
        ]}"#;
        let err = ClusterConfig::parse(doc, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_count_rejected() {
        let doc = r#"{"node_configs": [
            {"nodes": {"num_nodes": 0, "resource_class": "x"}, "network": {"network_uuid": "n"},
             "provisioning": {"provisioning_type": "image_url", "url": "u"}}
        ]}"#;
        assert!(ClusterConfig::parse(doc, DocumentFormat::Json).is_err());
    }

    #[test]
    fn test_selector_serializes_to_wire_keys() {
        let selector = NodeSelector::Pooled {
            count: 3,
            resource_class: "gpu".to_string(),
        };
        let json = serde_json::to_value(&selector).unwrap();
        assert_eq!(json, serde_json::json!({"num_nodes": 3, "resource_class": "gpu"}));
    }
}

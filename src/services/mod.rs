//! Collaborator services consumed by the orchestrator
//!
//! The orchestrator never owns nodes, ports, trunks or floating addresses; it
//! only holds their identifiers and talks to the owning service through the
//! traits below. Each trait has a REST implementation and the in-memory
//! cloud implements all of them for tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod deploy;
pub mod glance;
pub mod ironic;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod neutron;
pub mod rest;

pub use deploy::{ImageDeployer, ImageDeployment, MetalsmithDeployer};
pub use glance::GlanceClient;
pub use ironic::IronicClient;
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryCloud;
pub use neutron::NeutronClient;

/// Provision state of a node that can be allocated to a cluster
pub const AVAILABLE_STATE: &str = "available";

/// Device owner stamped on ports created for bare-metal nodes
pub const BAREMETAL_DEVICE_OWNER: &str = "baremetal:none";

/// Status of a port that is not bound to anything yet
pub const PORT_STATUS_DOWN: &str = "DOWN";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("{kind} '{ident}' not found")]
    NotFound { kind: &'static str, ident: String },

    #[error("{count} {kind}s match '{ident}', expected one")]
    Ambiguous {
        kind: &'static str,
        ident: String,
        count: usize,
    },

    #[error("Deployment tool failed: {0}")]
    Process(String),
}

impl ServiceError {
    pub fn not_found(kind: &'static str, ident: impl Into<String>) -> Self {
        ServiceError::NotFound {
            kind,
            ident: ident.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound { .. } | ServiceError::Api { status: 404, .. }
        )
    }
}

// ============================================================================
// Bare-metal resources
// ============================================================================

/// A bare-metal machine as reported by the bare-metal service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(alias = "uuid")]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub resource_class: Option<String>,

    #[serde(default)]
    pub provision_state: String,

    /// Free-form key/value store; carries the cluster association keys
    #[serde(
        rename = "extra",
        default,
        deserialize_with = "deserialize_metadata"
    )]
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            resource_class: None,
            provision_state: AVAILABLE_STATE.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_resource_class(mut self, resource_class: impl Into<String>) -> Self {
        self.resource_class = Some(resource_class.into());
        self
    }

    pub fn with_provision_state(mut self, state: impl Into<String>) -> Self {
        self.provision_state = state.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Name if the node has one, otherwise its id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// True if `ident` is this node's id or name
    pub fn matches(&self, ident: &str) -> bool {
        self.id == ident || self.name.as_deref() == Some(ident)
    }
}

/// Non-string metadata values are kept in their JSON text form
fn deserialize_metadata<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

/// One JSON-patch operation against a node document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Remove,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchKind::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchKind::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Provision state transitions requested by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionTarget {
    Active,
    Deleted,
}

impl ProvisionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionTarget::Active => "active",
            ProvisionTarget::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ProvisionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    Disk,
    Pxe,
}

impl BootDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootDevice::Disk => "disk",
            BootDevice::Pxe => "pxe",
        }
    }
}

// ============================================================================
// Network resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// VLAN id; hidden from users without admin visibility
    #[serde(
        rename = "provider:segmentation_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_segmentation_id: Option<u32>,
}

impl Network {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider_segmentation_id: None,
        }
    }

    pub fn with_segmentation_id(mut self, vlan: u32) -> Self {
        self.provider_segmentation_id = Some(vlan);
        self
    }

    /// Name with the VLAN id when it is visible, e.g. `storage (201)`
    pub fn display_name(&self) -> String {
        match self.provider_segmentation_id {
            Some(vlan) => format!("{} ({})", self.name, vlan),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    #[serde(default = "default_ip_version")]
    pub ip_version: u8,
}

fn default_ip_version() -> u8 {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedIp {
    #[serde(default)]
    pub subnet_id: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPort {
    pub port_id: String,
    #[serde(default = "default_segmentation_type")]
    pub segmentation_type: String,
    pub segmentation_id: u32,
}

fn default_segmentation_type() -> String {
    "vlan".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrunkDetails {
    pub trunk_id: String,
    #[serde(default)]
    pub sub_ports: Vec<SubPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub device_owner: String,
    /// Present when this port is the parent of a trunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_details: Option<TrunkDetails>,
}

impl Port {
    pub fn first_fixed_ip(&self) -> Option<&str> {
        self.fixed_ips.first().map(|ip| ip.ip_address.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trunk {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub port_id: String,
    #[serde(default)]
    pub sub_ports: Vec<SubPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    pub floating_network_id: String,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub fixed_ip_address: Option<String>,
}

/// Filters for listing ports; unset fields do not filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortQuery {
    pub name: Option<String>,
    pub status: Option<String>,
    pub network_id: Option<String>,
    pub fixed_ip: Option<String>,
}

impl PortQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn by_fixed_ip(ip: impl Into<String>) -> Self {
        Self {
            fixed_ip: Some(ip.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn matches(&self, port: &Port) -> bool {
        self.name.as_ref().map_or(true, |n| &port.name == n)
            && self.status.as_ref().map_or(true, |s| &port.status == s)
            && self.network_id.as_ref().map_or(true, |n| &port.network_id == n)
            && self
                .fixed_ip
                .as_ref()
                .map_or(true, |ip| port.fixed_ips.iter().any(|f| &f.ip_address == ip))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatingIpQuery {
    pub fixed_ip_address: Option<String>,
    pub port_id: Option<String>,
    pub floating_network_id: Option<String>,
    /// Only addresses not bound to any port
    pub unbound: bool,
}

impl FloatingIpQuery {
    pub fn by_fixed_ip(ip: impl Into<String>) -> Self {
        Self {
            fixed_ip_address: Some(ip.into()),
            ..Default::default()
        }
    }

    pub fn unbound_on(network_id: impl Into<String>) -> Self {
        Self {
            floating_network_id: Some(network_id.into()),
            unbound: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, fip: &FloatingIp) -> bool {
        self.fixed_ip_address
            .as_ref()
            .map_or(true, |ip| fip.fixed_ip_address.as_ref() == Some(ip))
            && self
                .port_id
                .as_ref()
                .map_or(true, |p| fip.port_id.as_ref() == Some(p))
            && self
                .floating_network_id
                .as_ref()
                .map_or(true, |n| &fip.floating_network_id == n)
            && (!self.unbound || fip.port_id.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixedIpRequest {
    pub subnet_id: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPort {
    pub name: String,
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_owner: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<FixedIpRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTrunk {
    pub name: String,
    pub port_id: String,
    pub sub_ports: Vec<SubPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

// ============================================================================
// Service traits
// ============================================================================

#[async_trait]
pub trait BaremetalService: Send + Sync {
    /// List nodes, optionally only those in the given provision state
    async fn list_nodes(&self, provision_state: Option<&str>) -> Result<Vec<Node>, ServiceError>;

    async fn get_node(&self, ident: &str) -> Result<Node, ServiceError>;

    async fn update_node(&self, ident: &str, patch: &[PatchOp]) -> Result<(), ServiceError>;

    async fn attach_vif(&self, node: &str, port_id: &str) -> Result<(), ServiceError>;

    async fn detach_vif(&self, node: &str, port_id: &str) -> Result<(), ServiceError>;

    /// Port ids currently attached to the node as virtual interfaces
    async fn list_vifs(&self, node: &str) -> Result<Vec<String>, ServiceError>;

    async fn set_provision_state(
        &self,
        node: &str,
        target: ProvisionTarget,
    ) -> Result<(), ServiceError>;

    async fn set_boot_device(
        &self,
        node: &str,
        device: BootDevice,
        persistent: bool,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Look up a network by id or name
    async fn find_network(&self, ident: &str) -> Result<Network, ServiceError>;

    async fn list_networks(&self) -> Result<Vec<Network>, ServiceError>;

    /// Look up a subnet by id or name
    async fn find_subnet(&self, ident: &str) -> Result<Subnet, ServiceError>;

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>, ServiceError>;

    async fn list_ports(&self, query: &PortQuery) -> Result<Vec<Port>, ServiceError>;

    async fn get_port(&self, id: &str) -> Result<Port, ServiceError>;

    async fn create_port(&self, port: &NewPort) -> Result<Port, ServiceError>;

    async fn delete_port(&self, id: &str) -> Result<(), ServiceError>;

    /// Look up a trunk by id or name; `None` when it does not exist
    async fn find_trunk(&self, ident: &str) -> Result<Option<Trunk>, ServiceError>;

    async fn create_trunk(&self, trunk: &NewTrunk) -> Result<Trunk, ServiceError>;

    async fn delete_trunk(&self, id: &str) -> Result<(), ServiceError>;

    async fn list_floating_ips(
        &self,
        query: &FloatingIpQuery,
    ) -> Result<Vec<FloatingIp>, ServiceError>;

    async fn create_floating_ip(&self, network_id: &str) -> Result<FloatingIp, ServiceError>;

    async fn bind_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp, ServiceError>;

    async fn delete_floating_ip(&self, id: &str) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ImageService: Send + Sync {
    /// Look up an image by id or name
    async fn find_image(&self, ident: &str) -> Result<Image, ServiceError>;
}

/// Handles to every collaborator, shared by all concurrent tasks
#[derive(Clone)]
pub struct Services {
    pub baremetal: Arc<dyn BaremetalService>,
    pub network: Arc<dyn NetworkService>,
    pub image: Arc<dyn ImageService>,
    pub deployer: Arc<dyn ImageDeployer>,
}

impl Services {
    pub fn new(
        baremetal: Arc<dyn BaremetalService>,
        network: Arc<dyn NetworkService>,
        image: Arc<dyn ImageService>,
        deployer: Arc<dyn ImageDeployer>,
    ) -> Self {
        Self {
            baremetal,
            network,
            image,
            deployer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_deserialization_from_extra() {
        let json = r#"{
            "uuid": "1111",
            "name": "node1",
            "resource_class": "baremetal",
            "provision_state": "active",
            "extra": {"esi_cluster_uuid": "abc", "count": 3}
        }"#;

        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.id, "1111");
        assert_eq!(node.display_name(), "node1");
        assert_eq!(node.metadata.get("esi_cluster_uuid").unwrap(), "abc");
        assert_eq!(node.metadata.get("count").unwrap(), "3");
    }

    #[test]
    fn test_node_without_name_uses_id() {
        let node: Node = serde_json::from_str(r#"{"uuid": "1111", "name": null}"#).unwrap();
        assert_eq!(node.display_name(), "1111");
        assert!(node.metadata.is_empty());
        assert!(node.matches("1111"));
    }

    #[test]
    fn test_patch_serialization() {
        let ops = vec![
            PatchOp::add("/extra/key", "value"),
            PatchOp::remove("/extra/other"),
        ];
        let json = serde_json::to_value(&ops).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"op": "add", "path": "/extra/key", "value": "value"},
                {"op": "remove", "path": "/extra/other"}
            ])
        );
    }

    #[test]
    fn test_network_display_name() {
        let plain = Network::new("n1", "public");
        assert_eq!(plain.display_name(), "public");

        let tagged = Network::new("n2", "storage").with_segmentation_id(201);
        assert_eq!(tagged.display_name(), "storage (201)");
    }

    #[test]
    fn test_network_segmentation_id_wire_name() {
        let json = r#"{"id": "n1", "name": "net", "provider:segmentation_id": 42}"#;
        let network: Network = serde_json::from_str(json).unwrap();
        assert_eq!(network.provider_segmentation_id, Some(42));
    }

    #[test]
    fn test_port_query_matching() {
        let port = Port {
            id: "p1".to_string(),
            name: "esi-node1-net".to_string(),
            network_id: "net".to_string(),
            status: PORT_STATUS_DOWN.to_string(),
            fixed_ips: vec![FixedIp {
                subnet_id: "s1".to_string(),
                ip_address: "10.0.0.5".to_string(),
            }],
            device_owner: BAREMETAL_DEVICE_OWNER.to_string(),
            trunk_details: None,
        };

        assert!(PortQuery::by_name("esi-node1-net")
            .with_status(PORT_STATUS_DOWN)
            .matches(&port));
        assert!(!PortQuery::by_name("esi-node1-net")
            .with_status("ACTIVE")
            .matches(&port));
        assert!(PortQuery::by_fixed_ip("10.0.0.5").matches(&port));
        assert!(!PortQuery::by_fixed_ip("10.0.0.6").matches(&port));
    }

    #[test]
    fn test_floating_ip_query_unbound() {
        let mut fip = FloatingIp {
            id: "f1".to_string(),
            floating_ip_address: "192.0.2.10".to_string(),
            floating_network_id: "ext".to_string(),
            port_id: None,
            fixed_ip_address: None,
        };
        let query = FloatingIpQuery::unbound_on("ext");
        assert!(query.matches(&fip));

        fip.port_id = Some("p1".to_string());
        assert!(!query.matches(&fip));
    }

    #[test]
    fn test_service_error_not_found() {
        assert!(ServiceError::not_found("network", "missing").is_not_found());
        assert!(ServiceError::Api {
            status: 404,
            message: "gone".to_string()
        }
        .is_not_found());
        assert!(!ServiceError::Http("reset".to_string()).is_not_found());
    }
}

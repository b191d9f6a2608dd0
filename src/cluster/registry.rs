//! Cluster association keys kept in node metadata
//!
//! The only code that writes these keys. A node carries the cluster id plus
//! either a port id or a trunk id, and optionally a floating address id.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::services::{BaremetalService, Node, PatchOp, ServiceError};

pub const CLUSTER_KEY: &str = "esi_cluster_uuid";
pub const PORT_KEY: &str = "esi_port_uuid";
pub const TRUNK_KEY: &str = "esi_trunk_uuid";
pub const FLOATING_IP_KEY: &str = "esi_fip_uuid";

/// Every key this module owns, in the order they are cleared
pub const ASSOCIATION_KEYS: [&str; 4] = [CLUSTER_KEY, PORT_KEY, TRUNK_KEY, FLOATING_IP_KEY];

/// Prefix shared by the association keys, used when listing clusters
const KEY_PREFIX: &str = "esi";

fn metadata_path(key: &str) -> String {
    format!("/extra/{}", key)
}

/// Association of one node with a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterAssociation {
    pub cluster_id: String,
    pub port_id: Option<String>,
    pub trunk_id: Option<String>,
    pub floating_ip_id: Option<String>,
}

impl ClusterAssociation {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            ..Default::default()
        }
    }

    /// Read the association back from node metadata
    pub fn from_node(node: &Node) -> Option<Self> {
        let meta = &node.metadata;
        Some(Self {
            cluster_id: meta.get(CLUSTER_KEY)?.clone(),
            port_id: meta.get(PORT_KEY).cloned(),
            trunk_id: meta.get(TRUNK_KEY).cloned(),
            floating_ip_id: meta.get(FLOATING_IP_KEY).cloned(),
        })
    }

    /// Flat key/value form written to metadata
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(CLUSTER_KEY.to_string(), self.cluster_id.clone());
        for (key, value) in [
            (PORT_KEY, &self.port_id),
            (TRUNK_KEY, &self.trunk_id),
            (FLOATING_IP_KEY, &self.floating_ip_id),
        ] {
            if let Some(value) = value {
                map.insert(key.to_string(), value.clone());
            }
        }
        map
    }
}

/// Add patch for every entry of `values`
pub fn set_patch(values: &BTreeMap<String, String>) -> Vec<PatchOp> {
    values
        .iter()
        .map(|(key, value)| PatchOp::add(metadata_path(key), value.as_str()))
        .collect()
}

/// Remove patch for the association keys present on the node
pub fn clear_patch(node: &Node) -> Vec<PatchOp> {
    ASSOCIATION_KEYS
        .iter()
        .filter(|key| node.metadata.contains_key(**key))
        .map(|key| PatchOp::remove(metadata_path(key)))
        .collect()
}

/// One cluster found in node metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster_id: String,
    /// Node display name and its other `esi*` metadata entries
    pub nodes: Vec<(String, BTreeMap<String, String>)>,
}

/// Group nodes by cluster id, keeping first-seen cluster order
pub fn summarize_clusters(nodes: &[Node]) -> Vec<ClusterSummary> {
    let mut clusters: Vec<ClusterSummary> = Vec::new();
    for node in nodes {
        let Some(cluster_id) = node.metadata.get(CLUSTER_KEY) else {
            continue;
        };
        let associated: BTreeMap<String, String> = node
            .metadata
            .iter()
            .filter(|(key, _)| key.starts_with(KEY_PREFIX) && key.as_str() != CLUSTER_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let entry = (node.display_name().to_string(), associated);

        match clusters.iter_mut().find(|c| &c.cluster_id == cluster_id) {
            Some(cluster) => cluster.nodes.push(entry),
            None => clusters.push(ClusterSummary {
                cluster_id: cluster_id.clone(),
                nodes: vec![entry],
            }),
        }
    }
    clusters
}

#[derive(Clone)]
pub struct Registry {
    baremetal: Arc<dyn BaremetalService>,
}

impl Registry {
    pub fn new(baremetal: Arc<dyn BaremetalService>) -> Self {
        Self { baremetal }
    }

    /// Write `values` onto the node's metadata in a single update
    pub async fn set(
        &self,
        node_id: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<(), ServiceError> {
        if values.is_empty() {
            return Ok(());
        }
        debug!("Tagging node {} with {:?}", node_id, values);
        self.baremetal.update_node(node_id, &set_patch(values)).await
    }

    pub async fn associate(
        &self,
        node_id: &str,
        association: &ClusterAssociation,
    ) -> Result<(), ServiceError> {
        self.set(node_id, &association.to_metadata()).await
    }

    /// Remove whichever association keys the node currently carries
    pub async fn clear(&self, node: &Node) -> Result<(), ServiceError> {
        let patch = clear_patch(node);
        if patch.is_empty() {
            return Ok(());
        }
        debug!("Clearing cluster keys from node {}", node.display_name());
        self.baremetal.update_node(&node.id, &patch).await
    }

    /// Every cluster recorded on any node
    pub async fn list_clusters(&self) -> Result<Vec<ClusterSummary>, ServiceError> {
        let nodes = self.baremetal.list_nodes(None).await?;
        Ok(summarize_clusters(&nodes))
    }
}

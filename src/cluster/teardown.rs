//! Release everything a cluster id points at
//!
//! Node cleaning itself happens in the background on the bare-metal service;
//! undeploy only requests it.

use tracing::info;

use super::registry::{ClusterAssociation, Registry, CLUSTER_KEY};
use super::topology::Topology;
use super::OrchestrationError;
use crate::services::{Node, ProvisionTarget, Services};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndeployReport {
    pub cluster_id: String,
    /// Display names of the nodes released, in the order they were found
    pub nodes: Vec<String>,
}

impl UndeployReport {
    pub fn found(&self) -> bool {
        !self.nodes.is_empty()
    }
}

/// Delete a node's port or trunk and floating address, clear its cluster
/// keys and request that it be deleted
pub async fn clean_cluster_node(
    services: &Services,
    node: &Node,
) -> Result<(), OrchestrationError> {
    let topology = Topology::new(services.network.clone());
    let association = ClusterAssociation::from_node(node).unwrap_or_default();

    if let Some(ref port_id) = association.port_id {
        info!("Deleting port {}", port_id);
        services.network.delete_port(port_id).await?;
    }
    if let Some(ref trunk_id) = association.trunk_id {
        info!("Deleting trunk {}", trunk_id);
        if let Some(trunk) = services.network.find_trunk(trunk_id).await? {
            topology.delete_trunk(&trunk).await?;
        }
    }
    if let Some(ref fip_id) = association.floating_ip_id {
        info!("Deleting floating IP {}", fip_id);
        services.network.delete_floating_ip(fip_id).await?;
    }

    Registry::new(services.baremetal.clone()).clear(node).await?;
    services
        .baremetal
        .set_provision_state(&node.id, ProvisionTarget::Deleted)
        .await?;
    Ok(())
}

/// Clean every node tagged with `cluster_id`. An unknown id is not an error;
/// the report simply lists no nodes.
pub async fn undeploy(
    services: &Services,
    cluster_id: &str,
) -> Result<UndeployReport, OrchestrationError> {
    info!("Starting undeploy for cluster {}", cluster_id);
    let mut report = UndeployReport {
        cluster_id: cluster_id.to_string(),
        nodes: Vec::new(),
    };

    for node in services.baremetal.list_nodes(None).await? {
        if node.metadata.get(CLUSTER_KEY).map(String::as_str) != Some(cluster_id) {
            continue;
        }
        info!("Undeploying node {}", node.display_name());
        clean_cluster_node(services, &node).await?;
        report.nodes.push(node.display_name().to_string());
    }

    if report.found() {
        info!(
            "Undeploy of {} complete; node cleaning continues in the background",
            cluster_id
        );
    } else {
        info!("No cluster with id {} found", cluster_id);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cluster::registry::{FLOATING_IP_KEY, PORT_KEY, TRUNK_KEY};
    use crate::config::NetworkSpec;
    use crate::services::memory::CLEANING_STATE;
    use crate::services::{InMemoryCloud, Network};

    fn cloud() -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_network(Network::new("net-a", "net1"));
        cloud.add_network(Network::new("net-b", "net2").with_segmentation_id(100));
        cloud
    }

    #[tokio::test]
    async fn test_clean_node_with_port() {
        let cloud = cloud();
        let services = cloud.services();
        let topo = Topology::new(cloud.clone());
        let port = topo
            .get_or_create_port("esi-node1-net1", &Network::new("net-a", "net1"))
            .await
            .unwrap();
        let node = Node::new("n1", "node1")
            .with_provision_state("active")
            .with_metadata(CLUSTER_KEY, "c1")
            .with_metadata(PORT_KEY, port.id.clone());
        cloud.add_node(node.clone());

        clean_cluster_node(&services, &node).await.unwrap();

        assert!(cloud.all_ports().is_empty());
        let cleaned = cloud.node("n1").unwrap();
        assert!(cleaned.metadata.is_empty());
        assert_eq!(cleaned.provision_state, CLEANING_STATE);
    }

    #[tokio::test]
    async fn test_clean_node_with_trunk_and_floating_ip() {
        let cloud = cloud();
        let services = cloud.services();
        let topo = Topology::new(cloud.clone());
        let node = Node::new("n1", "node1");
        let attachment = topo
            .attach(&node, &NetworkSpec::new("net1").with_tagged("net2"))
            .await
            .unwrap();
        let trunk = attachment.trunk.unwrap();
        let fip = services.network.create_floating_ip("ext").await.unwrap();
        let node = node
            .with_metadata(CLUSTER_KEY, "c1")
            .with_metadata(TRUNK_KEY, trunk.id.clone())
            .with_metadata(FLOATING_IP_KEY, fip.id.clone());
        cloud.add_node(node.clone());

        clean_cluster_node(&services, &node).await.unwrap();

        assert!(cloud.all_ports().is_empty());
        assert!(cloud.all_trunks().is_empty());
        assert!(cloud.all_floating_ips().is_empty());
        assert!(cloud.node("n1").unwrap().metadata.is_empty());
    }

    #[tokio::test]
    async fn test_undeploy_unknown_cluster_is_noop() {
        let cloud = cloud();
        cloud.add_node(Node::new("n1", "node1").with_metadata(CLUSTER_KEY, "other"));
        let services = cloud.services();

        let report = undeploy(&services, "missing").await.unwrap();
        assert!(!report.found());
        assert!(cloud.operations().is_empty());
    }

    #[tokio::test]
    async fn test_undeploy_only_touches_matching_nodes() {
        let cloud = cloud();
        cloud.add_node(Node::new("n1", "node1").with_metadata(CLUSTER_KEY, "c1"));
        cloud.add_node(Node::new("n2", "node2").with_metadata(CLUSTER_KEY, "c2"));
        cloud.add_node(Node::new("n3", "node3").with_metadata(CLUSTER_KEY, "c1"));
        let services = cloud.services();

        let report = undeploy(&services, "c1").await.unwrap();
        assert_eq!(report.nodes, vec!["node1", "node3"]);
        assert_eq!(
            cloud.node("n2").unwrap().metadata.get(CLUSTER_KEY).unwrap(),
            "c2"
        );
    }

    #[tokio::test]
    async fn test_failed_delete_propagates() {
        let cloud = cloud();
        cloud.fail_on("delete_port");
        let node = Node::new("n1", "node1")
            .with_metadata(CLUSTER_KEY, "c1")
            .with_metadata(PORT_KEY, "p1");
        cloud.add_node(node.clone());
        let services = cloud.services();

        assert!(undeploy(&services, "c1").await.is_err());
        // keys stay so a later run can retry
        assert!(cloud.node("n1").unwrap().metadata.contains_key(CLUSTER_KEY));
    }
}

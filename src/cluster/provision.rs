//! Concurrent provisioning of every allocated node
//!
//! One task per allocated node: build its network topology, boot it, give it
//! a floating address if asked, then record its cluster association. Tasks
//! never cancel each other; every outcome is returned to the caller.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::allocator::allocate;
use super::registry::{ClusterAssociation, Registry};
use super::topology::{floating_info, Attachment, Topology};
use super::OrchestrationError;
use crate::config::{ClusterConfig, ClusterNodeConfig, ProvisioningSpec};
use crate::services::{
    BaremetalService, FloatingIp, FloatingIpQuery, ImageDeployment, Network, Node, PatchOp, Port,
    ProvisionTarget, Services, ServiceError, Trunk, AVAILABLE_STATE,
};

/// Deploy interface that boots a node straight from an ISO
pub const RAMDISK_DEPLOY_INTERFACE: &str = "ramdisk";

/// Default number of nodes provisioned at once
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// What one node ended up with
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedNode {
    pub node: Node,
    pub port: Port,
    pub trunk: Option<Trunk>,
    pub floating_ip: Option<FloatingIp>,
}

/// Result of one node's provisioning task
#[derive(Debug)]
pub struct NodeOutcome {
    pub node: Node,
    /// Index of the configuration entry the node was allocated to
    pub config_index: usize,
    pub result: Result<ProvisionedNode, OrchestrationError>,
}

#[derive(Debug)]
pub struct Orchestration {
    pub cluster_id: String,
    /// In allocation order, regardless of completion order
    pub outcomes: Vec<NodeOutcome>,
}

impl Orchestration {
    pub fn succeeded(&self) -> impl Iterator<Item = &ProvisionedNode> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Node, &OrchestrationError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.node, e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Boot `node_id` from an ISO at `url` through `port_id`.
///
/// Safe to repeat: the metadata patch is an upsert and an already attached
/// port is not attached again.
pub async fn boot_node_from_url(
    baremetal: &dyn BaremetalService,
    node_id: &str,
    url: &str,
    port_id: &str,
) -> Result<(), ServiceError> {
    baremetal
        .update_node(
            node_id,
            &[
                PatchOp::add("/deploy_interface", RAMDISK_DEPLOY_INTERFACE),
                PatchOp::add("/instance_info/boot_iso", url),
            ],
        )
        .await?;

    let vifs = baremetal.list_vifs(node_id).await?;
    if !vifs.iter().any(|vif| vif == port_id) {
        baremetal.attach_vif(node_id, port_id).await?;
    }

    baremetal
        .set_provision_state(node_id, ProvisionTarget::Active)
        .await
}

/// Wire, boot and tag one node
pub async fn provision_node(
    services: &Services,
    node: &Node,
    entry: &ClusterNodeConfig,
    cluster_id: &str,
) -> Result<ProvisionedNode, OrchestrationError> {
    let topology = Topology::new(services.network.clone());
    let Attachment { port, trunk } = topology.attach(node, &entry.network).await?;

    let mut association = ClusterAssociation::new(cluster_id);
    match trunk {
        Some(ref trunk) => association.trunk_id = Some(trunk.id.clone()),
        None => association.port_id = Some(port.id.clone()),
    }

    match &entry.provisioning {
        ProvisioningSpec::Image { image, ssh_key } => {
            let image = services.image.find_image(image).await?;
            let resource_class = node
                .resource_class
                .clone()
                .ok_or_else(|| OrchestrationError::MissingResourceClass(node.id.clone()))?;
            info!(
                "Provisioning node {} with image {}",
                node.display_name(),
                image.name
            );
            services
                .deployer
                .deploy(&ImageDeployment {
                    node_id: node.id.clone(),
                    resource_class,
                    port_id: port.id.clone(),
                    image_id: image.id,
                    ssh_key: ssh_key.clone(),
                })
                .await?;
        }
        ProvisioningSpec::ImageUrl { url } => {
            info!("Provisioning node {} from url {}", node.display_name(), url);
            boot_node_from_url(services.baremetal.as_ref(), &node.id, url, &port.id).await?;
        }
    }

    let floating_ip = match entry.network.floating_network {
        Some(ref ident) => {
            info!(
                "Assigning floating IP to node {} on port {}",
                node.display_name(),
                port.name
            );
            let external = services.network.find_network(ident).await?;
            let fip = topology.get_or_assign_floating_ip(&port, &external).await?;
            association.floating_ip_id = Some(fip.id.clone());
            Some(fip)
        }
        None => None,
    };

    Registry::new(services.baremetal.clone())
        .associate(&node.id, &association)
        .await?;

    Ok(ProvisionedNode {
        node: node.clone(),
        port,
        trunk,
        floating_ip,
    })
}

/// Allocate, then provision every allocated node under a fresh cluster id.
///
/// Allocation errors abort before any node is touched. Per-node failures are
/// reported in the returned outcomes and never stop sibling tasks.
pub async fn orchestrate(
    services: &Services,
    config: &ClusterConfig,
    concurrency: usize,
) -> Result<Orchestration, OrchestrationError> {
    config.validate()?;

    let mut pool = services.baremetal.list_nodes(Some(AVAILABLE_STATE)).await?;
    let allocation = allocate(config, &mut pool)?;

    let cluster_id = Uuid::new_v4().to_string();
    info!("Provisioning cluster {}", cluster_id);

    let tasks: Vec<(usize, Node)> = allocation
        .into_iter()
        .flat_map(|(index, nodes)| nodes.into_iter().map(move |node| (index, node)))
        .collect();

    let outcomes: Vec<NodeOutcome> = stream::iter(tasks)
        .map(|(index, node)| {
            let cluster_id = cluster_id.as_str();
            let entry = &config.node_configs[index];
            async move {
                let result = provision_node(services, &node, entry, cluster_id).await;
                if let Err(ref e) = result {
                    error!("Provisioning node {} failed: {}", node.display_name(), e);
                }
                NodeOutcome {
                    node,
                    config_index: index,
                    result,
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    info!(
        "Node provisioning complete: {} of {} succeeded",
        outcomes.iter().filter(|o| o.result.is_ok()).count(),
        outcomes.len()
    );

    Ok(Orchestration {
        cluster_id,
        outcomes,
    })
}

// ============================================================================
// Reporting
// ============================================================================

/// One line of the orchestration report; multi-valued cells are joined by
/// newlines, one entry per port of a trunk
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub node: String,
    pub port: String,
    pub networks: String,
    pub fixed_ips: String,
    pub floating_network: Option<String>,
    pub floating_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterReport {
    pub cluster_id: String,
    pub rows: Vec<ReportRow>,
    /// Node display name and error message
    pub failures: Vec<(String, String)>,
}

fn joined(values: Vec<String>) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join("\n"))
    }
}

impl ClusterReport {
    /// Resolve network names and addresses for every successful node
    pub async fn build(
        services: &Services,
        orchestration: &Orchestration,
    ) -> Result<Self, OrchestrationError> {
        let topology = Topology::new(services.network.clone());
        let networks: HashMap<String, Network> = services
            .network
            .list_networks()
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let floating_ips = services
            .network
            .list_floating_ips(&FloatingIpQuery::default())
            .await?;

        let mut rows = Vec::new();
        let mut failures: Vec<(String, String)> = orchestration
            .failed()
            .map(|(node, e)| (node.display_name().to_string(), e.to_string()))
            .collect();

        for provisioned in orchestration.succeeded() {
            let name = provisioned.node.display_name().to_string();
            let info = match topology.port_networks(&provisioned.port, &networks).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Cannot resolve ports of {} for the report: {}", name, e);
                    failures.push((
                        name,
                        format!("provisioned, but its ports are unreadable: {}", e),
                    ));
                    continue;
                }
            };
            let (addresses, floating_networks) =
                floating_info(&provisioned.port.id, &floating_ips, &networks);
            rows.push(ReportRow {
                node: name,
                port: provisioned.port.name.clone(),
                networks: info.network_names.join("\n"),
                fixed_ips: info.fixed_ips.join("\n"),
                floating_network: joined(floating_networks),
                floating_ip: joined(addresses),
            });
        }

        Ok(Self {
            cluster_id: orchestration.cluster_id.clone(),
            rows,
            failures,
        })
    }
}

impl ReportRow {
    pub fn cells(&self) -> Vec<String> {
        vec![
            self.node.clone(),
            self.port.clone(),
            self.networks.clone(),
            self.fixed_ips.clone(),
            self.floating_network.clone().unwrap_or_else(|| "None".to_string()),
            self.floating_ip.clone().unwrap_or_else(|| "None".to_string()),
        ]
    }
}

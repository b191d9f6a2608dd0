//! Ports, trunks and floating addresses for cluster nodes
//!
//! Ports are found again purely by their derived name, so every name is
//! built through [`port_name`] and the helpers next to it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info};

use super::OrchestrationError;
use crate::config::NetworkSpec;
use crate::services::{
    FixedIpRequest, FloatingIp, FloatingIpQuery, Network, NetworkService, NewPort, NewTrunk,
    Node, Port, PortQuery, SubPort, Subnet, Trunk, BAREMETAL_DEVICE_OWNER, PORT_STATUS_DOWN,
};

/// Prefix of every port and trunk name this tool creates
pub const NAME_PREFIX: &str = "esi";

const TRUNK_PORT_SUFFIX: &str = "trunk-port";
const SUB_PORT_SUFFIX: &str = "sub-port";

// ============================================================================
// SBIO: Pure naming and address logic (no I/O)
// ============================================================================

/// `esi-[<prefix>-]<network>[-<suffix>]`
pub fn port_name(network: &str, prefix: Option<&str>, suffix: Option<&str>) -> String {
    let mut name = NAME_PREFIX.to_string();
    if let Some(prefix) = prefix {
        name.push('-');
        name.push_str(prefix);
    }
    name.push('-');
    name.push_str(network);
    if let Some(suffix) = suffix {
        name.push('-');
        name.push_str(suffix);
    }
    name
}

/// Untagged port of a node on one network
pub fn node_port_name(node: &str, network: &str) -> String {
    port_name(network, Some(node), None)
}

pub fn trunk_name(node: &str) -> String {
    format!("{}-{}-trunk", NAME_PREFIX, node)
}

pub fn trunk_parent_port_name(trunk: &str, network: &str) -> String {
    port_name(network, Some(trunk), Some(TRUNK_PORT_SUFFIX))
}

pub fn sub_port_name(trunk: &str, network: &str) -> String {
    port_name(network, Some(trunk), Some(SUB_PORT_SUFFIX))
}

/// True if `cidr` (e.g. `10.0.0.0/24`) contains `ip`; families must match
pub fn cidr_contains(cidr: &str, ip: IpAddr) -> Result<bool, OrchestrationError> {
    let invalid = || OrchestrationError::InvalidAddress(cidr.to_string());
    let (base, len) = cidr.split_once('/').ok_or_else(invalid)?;
    let base: IpAddr = base.parse().map_err(|_| invalid())?;
    let len: u32 = len.parse().map_err(|_| invalid())?;

    match (base, ip) {
        (IpAddr::V4(base), IpAddr::V4(ip)) => {
            if len > 32 {
                return Err(invalid());
            }
            let mask = u32::MAX.checked_shl(32 - len).unwrap_or(0);
            Ok(u32::from(base) & mask == u32::from(ip) & mask)
        }
        (IpAddr::V6(base), IpAddr::V6(ip)) => {
            if len > 128 {
                return Err(invalid());
            }
            let mask = u128::MAX.checked_shl(128 - len).unwrap_or(0);
            Ok(u128::from(base) & mask == u128::from(ip) & mask)
        }
        _ => Ok(false),
    }
}

fn ip_version(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 6,
    }
}

/// Result of wiring one node onto its networks
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// The plain port, or the trunk's parent port
    pub port: Port,
    pub trunk: Option<Trunk>,
}

/// Network names, port names and addresses behind a port and its sub-ports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortNetworks {
    pub network_names: Vec<String>,
    pub port_names: Vec<String>,
    pub fixed_ips: Vec<String>,
}

// ============================================================================
// SBIO: I/O implementation (network service)
// ============================================================================

#[derive(Clone)]
pub struct Topology {
    network: Arc<dyn NetworkService>,
}

impl Topology {
    pub fn new(network: Arc<dyn NetworkService>) -> Self {
        Self { network }
    }

    /// Reuse the unbound port called `name` on `network`, or create it
    pub async fn get_or_create_port(
        &self,
        name: &str,
        network: &Network,
    ) -> Result<Port, OrchestrationError> {
        let query = PortQuery {
            network_id: Some(network.id.clone()),
            ..PortQuery::by_name(name).with_status(PORT_STATUS_DOWN)
        };
        let mut existing = self.network.list_ports(&query).await?;
        match existing.len() {
            0 => {
                let port = self
                    .network
                    .create_port(&NewPort {
                        name: name.to_string(),
                        network_id: network.id.clone(),
                        device_owner: Some(BAREMETAL_DEVICE_OWNER.to_string()),
                        fixed_ips: Vec::new(),
                    })
                    .await?;
                info!("Created port {} on {}", name, network.name);
                Ok(port)
            }
            1 => {
                debug!("Reusing port {}", name);
                Ok(existing.remove(0))
            }
            count => Err(OrchestrationError::DuplicatePorts {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Build the port or trunk a node needs for `spec`
    pub async fn attach(
        &self,
        node: &Node,
        spec: &NetworkSpec,
    ) -> Result<Attachment, OrchestrationError> {
        let primary = self.network.find_network(&spec.primary_network).await?;

        if !spec.is_trunk() {
            let name = node_port_name(node.display_name(), &primary.name);
            let port = self.get_or_create_port(&name, &primary).await?;
            info!("Using port {} for node {}", name, node.display_name());
            return Ok(Attachment { port, trunk: None });
        }

        let name = trunk_name(node.display_name());
        let (trunk, parent) = self
            .create_trunk(&name, &primary, &spec.tagged_networks)
            .await?;
        // Trunk creation changes the parent port behind our back
        let port = self.network.get_port(&parent.id).await?;
        info!("Using trunk port {} for node {}", port.name, node.display_name());
        Ok(Attachment {
            port,
            trunk: Some(trunk),
        })
    }

    /// Create a trunk with `native` untagged and every tagged network as a
    /// VLAN sub-port; an existing trunk of the same name is reused
    pub async fn create_trunk(
        &self,
        name: &str,
        native: &Network,
        tagged: &[String],
    ) -> Result<(Trunk, Port), OrchestrationError> {
        if let Some(trunk) = self.network.find_trunk(name).await? {
            debug!("Reusing trunk {}", name);
            let parent = self.network.get_port(&trunk.port_id).await?;
            return Ok((trunk, parent));
        }

        let parent = self
            .get_or_create_port(&trunk_parent_port_name(name, &native.name), native)
            .await?;

        let mut sub_ports = Vec::with_capacity(tagged.len());
        for ident in tagged {
            let network = self.network.find_network(ident).await?;
            let vlan = network
                .provider_segmentation_id
                .ok_or_else(|| OrchestrationError::MissingSegmentationId(network.name.clone()))?;
            let sub_port = self
                .get_or_create_port(&sub_port_name(name, &network.name), &network)
                .await?;
            sub_ports.push(SubPort {
                port_id: sub_port.id,
                segmentation_type: "vlan".to_string(),
                segmentation_id: vlan,
            });
        }

        let trunk = self
            .network
            .create_trunk(&NewTrunk {
                name: name.to_string(),
                port_id: parent.id.clone(),
                sub_ports,
            })
            .await?;
        info!(
            "Created trunk {} with {} tagged networks",
            name,
            trunk.sub_ports.len()
        );
        Ok((trunk, parent))
    }

    /// Delete the trunk record, then its sub-ports, then its parent port
    pub async fn delete_trunk(&self, trunk: &Trunk) -> Result<(), OrchestrationError> {
        self.network.delete_trunk(&trunk.id).await?;
        for sub_port in &trunk.sub_ports {
            self.network.delete_port(&sub_port.port_id).await?;
        }
        self.network.delete_port(&trunk.port_id).await?;
        info!("Deleted trunk {}", trunk.name);
        Ok(())
    }

    /// Floating address already tied to the port's fixed IP on `external`,
    /// otherwise a free (or new) one bound to the port
    pub async fn get_or_assign_floating_ip(
        &self,
        port: &Port,
        external: &Network,
    ) -> Result<FloatingIp, OrchestrationError> {
        let fixed_ip = port
            .first_fixed_ip()
            .ok_or_else(|| OrchestrationError::NoFixedIp(port.name.clone()))?;

        let query = FloatingIpQuery {
            floating_network_id: Some(external.id.clone()),
            ..FloatingIpQuery::by_fixed_ip(fixed_ip)
        };
        if let Some(existing) = self.network.list_floating_ips(&query).await?.into_iter().next() {
            debug!(
                "Port {} already has floating IP {}",
                port.name, existing.floating_ip_address
            );
            return Ok(existing);
        }

        let free = self
            .network
            .list_floating_ips(&FloatingIpQuery::unbound_on(&external.id))
            .await?
            .into_iter()
            .next();
        let fip = match free {
            Some(fip) => fip,
            None => self.network.create_floating_ip(&external.id).await?,
        };
        let bound = self.network.bind_floating_ip(&fip.id, &port.id).await?;
        info!(
            "Assigned floating IP {} to port {}",
            bound.floating_ip_address, port.name
        );
        Ok(bound)
    }

    /// Port holding `ip` as a fixed address, created on `network` if absent.
    ///
    /// Without an explicit `subnet`, the owning subnet is the first subnet of
    /// `network` of the same IP family whose CIDR contains `ip`.
    pub async fn get_or_create_port_by_ip(
        &self,
        ip: &str,
        name: &str,
        network: &Network,
        subnet: Option<&Subnet>,
    ) -> Result<Port, OrchestrationError> {
        let mut existing = self.network.list_ports(&PortQuery::by_fixed_ip(ip)).await?;
        match existing.len() {
            0 => {}
            1 => return Ok(existing.remove(0)),
            count => {
                return Err(OrchestrationError::DuplicatePorts {
                    name: ip.to_string(),
                    count,
                })
            }
        }

        let subnet_id = match subnet {
            Some(subnet) => subnet.id.clone(),
            None => self.subnet_for_ip(ip, network).await?.id,
        };

        let port = self
            .network
            .create_port(&NewPort {
                name: name.to_string(),
                network_id: network.id.clone(),
                device_owner: None,
                fixed_ips: vec![FixedIpRequest {
                    subnet_id,
                    ip_address: ip.to_string(),
                }],
            })
            .await?;
        info!("Created port {} for {}", name, ip);
        Ok(port)
    }

    async fn subnet_for_ip(&self, ip: &str, network: &Network) -> Result<Subnet, OrchestrationError> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| OrchestrationError::InvalidAddress(ip.to_string()))?;
        for subnet in self.network.list_subnets(&network.id).await? {
            if subnet.ip_version == ip_version(&addr) && cidr_contains(&subnet.cidr, addr)? {
                return Ok(subnet);
            }
        }
        Err(OrchestrationError::NoSubnetForIp {
            ip: ip.to_string(),
            network: network.name.clone(),
        })
    }

    /// Networks and addresses of a port, following trunk sub-ports
    pub async fn port_networks(
        &self,
        port: &Port,
        networks: &HashMap<String, Network>,
    ) -> Result<PortNetworks, OrchestrationError> {
        let mut info = PortNetworks::default();
        self.push_port(&mut info, port, networks).await?;

        if let Some(ref details) = port.trunk_details {
            for sub_port in &details.sub_ports {
                let sub = self.network.get_port(&sub_port.port_id).await?;
                self.push_port(&mut info, &sub, networks).await?;
            }
        }
        Ok(info)
    }

    async fn push_port(
        &self,
        info: &mut PortNetworks,
        port: &Port,
        networks: &HashMap<String, Network>,
    ) -> Result<(), OrchestrationError> {
        let name = match networks.get(&port.network_id) {
            Some(network) => network.display_name(),
            None => self.network.find_network(&port.network_id).await?.display_name(),
        };
        info.network_names.push(name);
        info.port_names.push(port.name.clone());
        info.fixed_ips
            .push(port.first_fixed_ip().unwrap_or_default().to_string());
        Ok(())
    }
}

/// Floating addresses bound to `port_id` and the names of their networks
pub fn floating_info(
    port_id: &str,
    floating_ips: &[FloatingIp],
    networks: &HashMap<String, Network>,
) -> (Vec<String>, Vec<String>) {
    floating_ips
        .iter()
        .filter(|fip| fip.port_id.as_deref() == Some(port_id))
        .map(|fip| {
            let network = networks
                .get(&fip.floating_network_id)
                .map(Network::display_name)
                .unwrap_or_else(|| fip.floating_network_id.clone());
            (fip.floating_ip_address.clone(), network)
        })
        .unzip()
}

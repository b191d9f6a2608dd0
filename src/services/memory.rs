//! In-memory cloud implementing every collaborator trait
//!
//! Used by unit and integration tests. Every mutating call is appended to an
//! operation log, and any call whose log entry starts with a registered
//! failure prefix returns an API error instead of acting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{
    BaremetalService, BootDevice, FixedIp, FloatingIp, FloatingIpQuery, Image, ImageDeployer,
    ImageDeployment, ImageService, Network, NetworkService, NewPort, NewTrunk, Node, PatchKind,
    PatchOp, Port, PortQuery, ProvisionTarget, ServiceError, Services, Subnet, Trunk,
    TrunkDetails, PORT_STATUS_DOWN,
};

/// Provision state a node enters after a delete request
pub const CLEANING_STATE: &str = "cleaning";

#[derive(Default)]
pub struct InMemoryCloud {
    nodes: Mutex<Vec<Node>>,
    /// Node document fields outside `extra`, keyed by node id then patch path
    node_fields: DashMap<String, BTreeMap<String, Value>>,
    vifs: DashMap<String, Vec<String>>,
    boot_devices: DashMap<String, (String, bool)>,
    networks: Mutex<Vec<Network>>,
    subnets: Mutex<Vec<Subnet>>,
    images: Mutex<Vec<Image>>,
    ports: DashMap<String, (u64, Port)>,
    trunks: DashMap<String, (u64, Trunk)>,
    floating_ips: DashMap<String, (u64, FloatingIp)>,
    deployments: Mutex<Vec<ImageDeployment>>,
    operations: Mutex<Vec<String>>,
    failures: Mutex<HashSet<String>>,
    sequence: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn conflict(message: impl Into<String>) -> ServiceError {
    ServiceError::Api {
        status: 409,
        message: message.into(),
    }
}

fn sorted<T: Clone>(map: &DashMap<String, (u64, T)>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    let mut items: Vec<(u64, T)> = map
        .iter()
        .filter(|entry| keep(&entry.value().1))
        .map(|entry| entry.value().clone())
        .collect();
    items.sort_by_key(|(seq, _)| *seq);
    items.into_iter().map(|(_, item)| item).collect()
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this cloud as every collaborator at once
    pub fn services(self: &Arc<Self>) -> Services {
        Services::new(self.clone(), self.clone(), self.clone(), self.clone())
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_node(&self, node: Node) {
        lock(&self.nodes).push(node);
    }

    pub fn add_network(&self, network: Network) {
        lock(&self.networks).push(network);
    }

    pub fn add_subnet(&self, subnet: Subnet) {
        lock(&self.subnets).push(subnet);
    }

    pub fn add_image(&self, image: Image) {
        lock(&self.images).push(image);
    }

    /// Insert a port directly, bypassing the operation log
    pub fn add_port(&self, port: Port) {
        let seq = self.next_seq();
        self.ports.insert(port.id.clone(), (seq, port));
    }

    /// Insert a floating address directly, bypassing the operation log
    pub fn add_floating_ip(&self, fip: FloatingIp) {
        let seq = self.next_seq();
        self.floating_ips.insert(fip.id.clone(), (seq, fip));
    }

    /// Make every operation whose log entry starts with `prefix` fail
    pub fn fail_on(&self, prefix: impl Into<String>) {
        lock(&self.failures).insert(prefix.into());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn operations(&self) -> Vec<String> {
        lock(&self.operations).clone()
    }

    pub fn node(&self, ident: &str) -> Option<Node> {
        lock(&self.nodes).iter().find(|n| n.matches(ident)).cloned()
    }

    pub fn node_field(&self, node_id: &str, path: &str) -> Option<Value> {
        self.node_fields
            .get(node_id)
            .and_then(|fields| fields.get(path).cloned())
    }

    pub fn vifs_of(&self, node_id: &str) -> Vec<String> {
        self.vifs
            .get(node_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn boot_device_of(&self, node_id: &str) -> Option<(String, bool)> {
        self.boot_devices.get(node_id).map(|d| d.clone())
    }

    pub fn all_ports(&self) -> Vec<Port> {
        sorted(&self.ports, |_| true)
    }

    pub fn all_trunks(&self) -> Vec<Trunk> {
        sorted(&self.trunks, |_| true)
    }

    pub fn all_floating_ips(&self) -> Vec<FloatingIp> {
        sorted(&self.floating_ips, |_| true)
    }

    pub fn deployments(&self) -> Vec<ImageDeployment> {
        lock(&self.deployments).clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Log an operation, failing it if a registered prefix matches
    fn record(&self, entry: String) -> Result<(), ServiceError> {
        let failing = lock(&self.failures)
            .iter()
            .any(|prefix| entry.starts_with(prefix.as_str()));
        lock(&self.operations).push(entry.clone());
        if failing {
            return Err(ServiceError::Api {
                status: 500,
                message: format!("injected failure: {}", entry),
            });
        }
        Ok(())
    }

    fn resolve_node_id(&self, ident: &str) -> Result<String, ServiceError> {
        lock(&self.nodes)
            .iter()
            .find(|n| n.matches(ident))
            .map(|n| n.id.clone())
            .ok_or_else(|| ServiceError::not_found("node", ident))
    }

    fn with_node<T>(
        &self,
        ident: &str,
        f: impl FnOnce(&mut Node) -> T,
    ) -> Result<T, ServiceError> {
        let mut nodes = lock(&self.nodes);
        let node = nodes
            .iter_mut()
            .find(|n| n.matches(ident))
            .ok_or_else(|| ServiceError::not_found("node", ident))?;
        Ok(f(node))
    }

    /// Next free address in the network's first subnet
    fn allocate_fixed_ip(&self, network_id: &str, seq: u64) -> Vec<FixedIp> {
        let subnets = lock(&self.subnets);
        let Some(subnet) = subnets.iter().find(|s| s.network_id == network_id) else {
            return Vec::new();
        };
        let base = subnet.cidr.split('/').next().unwrap_or_default();
        let prefix: Vec<&str> = base.split('.').take(3).collect();
        vec![FixedIp {
            subnet_id: subnet.id.clone(),
            ip_address: format!("{}.{}", prefix.join("."), 10 + seq % 240),
        }]
    }

    fn find_one<T: Clone>(
        items: &[T],
        ident: &str,
        kind: &'static str,
        key: impl Fn(&T) -> (&str, &str),
    ) -> Result<T, ServiceError> {
        if let Some(item) = items.iter().find(|i| key(i).0 == ident) {
            return Ok(item.clone());
        }
        let matches: Vec<&T> = items.iter().filter(|i| key(i).1 == ident).collect();
        match matches.len() {
            0 => Err(ServiceError::not_found(kind, ident)),
            1 => Ok(matches[0].clone()),
            count => Err(ServiceError::Ambiguous {
                kind,
                ident: ident.to_string(),
                count,
            }),
        }
    }
}

#[async_trait]
impl BaremetalService for InMemoryCloud {
    async fn list_nodes(&self, provision_state: Option<&str>) -> Result<Vec<Node>, ServiceError> {
        Ok(lock(&self.nodes)
            .iter()
            .filter(|n| provision_state.map_or(true, |s| n.provision_state == s))
            .cloned()
            .collect())
    }

    async fn get_node(&self, ident: &str) -> Result<Node, ServiceError> {
        self.node(ident)
            .ok_or_else(|| ServiceError::not_found("node", ident))
    }

    async fn update_node(&self, ident: &str, patch: &[PatchOp]) -> Result<(), ServiceError> {
        let id = self.resolve_node_id(ident)?;
        let paths: Vec<&str> = patch.iter().map(|op| op.path.as_str()).collect();
        self.record(format!("update_node {} {}", id, paths.join(",")))?;

        let mut fields = self.node_fields.entry(id.clone()).or_default();
        self.with_node(&id, |node| {
            for op in patch {
                match op.path.strip_prefix("/extra/") {
                    Some(key) => match op.op {
                        PatchKind::Add => {
                            let value = match &op.value {
                                Some(Value::String(s)) => s.clone(),
                                Some(other) => other.to_string(),
                                None => String::new(),
                            };
                            node.metadata.insert(key.to_string(), value);
                        }
                        PatchKind::Remove => {
                            node.metadata.remove(key);
                        }
                    },
                    None => match op.op {
                        PatchKind::Add => {
                            fields.insert(
                                op.path.clone(),
                                op.value.clone().unwrap_or(Value::Null),
                            );
                        }
                        PatchKind::Remove => {
                            fields.remove(&op.path);
                        }
                    },
                }
            }
        })
    }

    async fn attach_vif(&self, node: &str, port_id: &str) -> Result<(), ServiceError> {
        let id = self.resolve_node_id(node)?;
        self.record(format!("attach_vif {} {}", id, port_id))?;
        if !self.ports.contains_key(port_id) {
            return Err(ServiceError::not_found("port", port_id));
        }
        let mut vifs = self.vifs.entry(id).or_default();
        if vifs.iter().any(|p| p == port_id) {
            return Err(conflict(format!("port {} already attached", port_id)));
        }
        vifs.push(port_id.to_string());
        Ok(())
    }

    async fn detach_vif(&self, node: &str, port_id: &str) -> Result<(), ServiceError> {
        let id = self.resolve_node_id(node)?;
        self.record(format!("detach_vif {} {}", id, port_id))?;
        if let Some(mut vifs) = self.vifs.get_mut(&id) {
            vifs.retain(|p| p != port_id);
        }
        Ok(())
    }

    async fn list_vifs(&self, node: &str) -> Result<Vec<String>, ServiceError> {
        let id = self.resolve_node_id(node)?;
        Ok(self.vifs_of(&id))
    }

    async fn set_provision_state(
        &self,
        node: &str,
        target: ProvisionTarget,
    ) -> Result<(), ServiceError> {
        let id = self.resolve_node_id(node)?;
        self.record(format!("set_provision_state {} {}", id, target))?;
        self.with_node(&id, |n| {
            n.provision_state = match target {
                ProvisionTarget::Active => "active".to_string(),
                ProvisionTarget::Deleted => CLEANING_STATE.to_string(),
            };
        })
    }

    async fn set_boot_device(
        &self,
        node: &str,
        device: BootDevice,
        persistent: bool,
    ) -> Result<(), ServiceError> {
        let id = self.resolve_node_id(node)?;
        self.record(format!("set_boot_device {} {}", id, device.as_str()))?;
        self.boot_devices
            .insert(id, (device.as_str().to_string(), persistent));
        Ok(())
    }
}

#[async_trait]
impl NetworkService for InMemoryCloud {
    async fn find_network(&self, ident: &str) -> Result<Network, ServiceError> {
        let networks = lock(&self.networks);
        Self::find_one(&networks, ident, "network", |n| (n.id.as_str(), n.name.as_str()))
    }

    async fn list_networks(&self) -> Result<Vec<Network>, ServiceError> {
        Ok(lock(&self.networks).clone())
    }

    async fn find_subnet(&self, ident: &str) -> Result<Subnet, ServiceError> {
        let subnets = lock(&self.subnets);
        Self::find_one(&subnets, ident, "subnet", |s| (s.id.as_str(), s.name.as_str()))
    }

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>, ServiceError> {
        Ok(lock(&self.subnets)
            .iter()
            .filter(|s| s.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn list_ports(&self, query: &PortQuery) -> Result<Vec<Port>, ServiceError> {
        Ok(sorted(&self.ports, |p| query.matches(p)))
    }

    async fn get_port(&self, id: &str) -> Result<Port, ServiceError> {
        self.ports
            .get(id)
            .map(|entry| entry.1.clone())
            .ok_or_else(|| ServiceError::not_found("port", id))
    }

    async fn create_port(&self, port: &NewPort) -> Result<Port, ServiceError> {
        self.record(format!("create_port {}", port.name))?;
        let seq = self.next_seq();
        let fixed_ips = if port.fixed_ips.is_empty() {
            self.allocate_fixed_ip(&port.network_id, seq)
        } else {
            port.fixed_ips
                .iter()
                .map(|f| FixedIp {
                    subnet_id: f.subnet_id.clone(),
                    ip_address: f.ip_address.clone(),
                })
                .collect()
        };
        let created = Port {
            id: format!("port-{}", seq),
            name: port.name.clone(),
            network_id: port.network_id.clone(),
            status: PORT_STATUS_DOWN.to_string(),
            fixed_ips,
            device_owner: port.device_owner.clone().unwrap_or_default(),
            trunk_details: None,
        };
        self.ports.insert(created.id.clone(), (seq, created.clone()));
        Ok(created)
    }

    async fn delete_port(&self, id: &str) -> Result<(), ServiceError> {
        self.record(format!("delete_port {}", id))?;
        let in_trunk = self.trunks.iter().any(|entry| {
            let trunk = &entry.value().1;
            trunk.port_id == id || trunk.sub_ports.iter().any(|s| s.port_id == id)
        });
        if in_trunk {
            return Err(conflict(format!("port {} is in use by a trunk", id)));
        }
        self.ports
            .remove(id)
            .ok_or_else(|| ServiceError::not_found("port", id))?;
        for mut entry in self.floating_ips.iter_mut() {
            let fip = &mut entry.value_mut().1;
            if fip.port_id.as_deref() == Some(id) {
                fip.port_id = None;
                fip.fixed_ip_address = None;
            }
        }
        Ok(())
    }

    async fn find_trunk(&self, ident: &str) -> Result<Option<Trunk>, ServiceError> {
        let trunks = sorted(&self.trunks, |_| true);
        match Self::find_one(&trunks, ident, "trunk", |t| (t.id.as_str(), t.name.as_str())) {
            Ok(trunk) => Ok(Some(trunk)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_trunk(&self, trunk: &NewTrunk) -> Result<Trunk, ServiceError> {
        self.record(format!("create_trunk {}", trunk.name))?;
        let seq = self.next_seq();
        let created = Trunk {
            id: format!("trunk-{}", seq),
            name: trunk.name.clone(),
            port_id: trunk.port_id.clone(),
            sub_ports: trunk.sub_ports.clone(),
        };
        {
            let mut parent = self
                .ports
                .get_mut(&trunk.port_id)
                .ok_or_else(|| ServiceError::not_found("port", &trunk.port_id))?;
            if parent.1.trunk_details.is_some() {
                return Err(conflict(format!(
                    "port {} is already a trunk parent",
                    trunk.port_id
                )));
            }
            parent.1.trunk_details = Some(TrunkDetails {
                trunk_id: created.id.clone(),
                sub_ports: trunk.sub_ports.clone(),
            });
        }
        self.trunks.insert(created.id.clone(), (seq, created.clone()));
        Ok(created)
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), ServiceError> {
        self.record(format!("delete_trunk {}", id))?;
        let (_, (_, trunk)) = self
            .trunks
            .remove(id)
            .ok_or_else(|| ServiceError::not_found("trunk", id))?;
        if let Some(mut parent) = self.ports.get_mut(&trunk.port_id) {
            parent.1.trunk_details = None;
        }
        Ok(())
    }

    async fn list_floating_ips(
        &self,
        query: &FloatingIpQuery,
    ) -> Result<Vec<FloatingIp>, ServiceError> {
        Ok(sorted(&self.floating_ips, |f| query.matches(f)))
    }

    async fn create_floating_ip(&self, network_id: &str) -> Result<FloatingIp, ServiceError> {
        self.record(format!("create_floating_ip {}", network_id))?;
        let seq = self.next_seq();
        let fip = FloatingIp {
            id: format!("fip-{}", seq),
            floating_ip_address: format!("192.0.2.{}", seq % 250 + 1),
            floating_network_id: network_id.to_string(),
            port_id: None,
            fixed_ip_address: None,
        };
        self.floating_ips.insert(fip.id.clone(), (seq, fip.clone()));
        Ok(fip)
    }

    async fn bind_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp, ServiceError> {
        self.record(format!("bind_floating_ip {} {}", id, port_id))?;
        let fixed_ip = self
            .ports
            .get(port_id)
            .ok_or_else(|| ServiceError::not_found("port", port_id))?
            .1
            .first_fixed_ip()
            .map(str::to_string);
        let mut entry = self
            .floating_ips
            .get_mut(id)
            .ok_or_else(|| ServiceError::not_found("floating ip", id))?;
        entry.1.port_id = Some(port_id.to_string());
        entry.1.fixed_ip_address = fixed_ip;
        Ok(entry.1.clone())
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<(), ServiceError> {
        self.record(format!("delete_floating_ip {}", id))?;
        self.floating_ips
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("floating ip", id))
    }
}

#[async_trait]
impl ImageService for InMemoryCloud {
    async fn find_image(&self, ident: &str) -> Result<Image, ServiceError> {
        let images = lock(&self.images);
        Self::find_one(&images, ident, "image", |i| (i.id.as_str(), i.name.as_str()))
    }
}

#[async_trait]
impl ImageDeployer for InMemoryCloud {
    async fn deploy(&self, deployment: &ImageDeployment) -> Result<(), ServiceError> {
        self.record(format!("deploy {}", deployment.node_id))?;
        lock(&self.deployments).push(deployment.clone());
        Ok(())
    }
}

/// Count log entries by their operation name
pub fn count_operations(operations: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for entry in operations {
        let name = entry.split_whitespace().next().unwrap_or_default();
        *counts.entry(name.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud() -> InMemoryCloud {
        let cloud = InMemoryCloud::new();
        cloud.add_network(Network::new("net-1", "private"));
        cloud.add_subnet(Subnet {
            id: "subnet-1".to_string(),
            name: "private-subnet".to_string(),
            network_id: "net-1".to_string(),
            cidr: "10.1.0.0/24".to_string(),
            ip_version: 4,
        });
        cloud
    }

    fn new_port(name: &str) -> NewPort {
        NewPort {
            name: name.to_string(),
            network_id: "net-1".to_string(),
            device_owner: None,
            fixed_ips: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_created_port_gets_subnet_address() {
        let cloud = cloud();
        let port = cloud.create_port(&new_port("p")).await.unwrap();
        assert_eq!(port.status, PORT_STATUS_DOWN);
        assert!(port.first_fixed_ip().unwrap().starts_with("10.1.0."));
    }

    #[tokio::test]
    async fn test_trunk_parent_cannot_be_deleted_first() {
        let cloud = cloud();
        let parent = cloud.create_port(&new_port("parent")).await.unwrap();
        let trunk = cloud
            .create_trunk(&NewTrunk {
                name: "t".to_string(),
                port_id: parent.id.clone(),
                sub_ports: Vec::new(),
            })
            .await
            .unwrap();

        assert!(cloud.delete_port(&parent.id).await.is_err());
        cloud.delete_trunk(&trunk.id).await.unwrap();
        cloud.delete_port(&parent.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cloud = cloud();
        cloud.fail_on("create_port bad");
        assert!(cloud.create_port(&new_port("bad-port")).await.is_err());
        assert!(cloud.create_port(&new_port("good-port")).await.is_ok());
        assert_eq!(
            count_operations(&cloud.operations()).get("create_port"),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn test_find_network_by_id_or_name() {
        let cloud = cloud();
        assert_eq!(cloud.find_network("net-1").await.unwrap().name, "private");
        assert_eq!(cloud.find_network("private").await.unwrap().id, "net-1");
        assert!(cloud.find_network("missing").await.unwrap_err().is_not_found());
    }
}

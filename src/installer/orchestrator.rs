use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::client::{
    ClusterNetworkUpdate, Host, InstallerApi, NewCluster, NewInfraEnv, HOST_KNOWN,
    HOST_PENDING_FOR_INPUT, MINIMAL_ISO, STATUS_ERROR, STATUS_INSTALLED, STATUS_INSTALLING,
    STATUS_PREPARING,
};
use super::poll::{PollSettings, Poller, DEFAULT_POLL_INTERVAL};
use super::{resume_command, InstallerError, Stage};
use crate::cluster::provision::boot_node_from_url;
use crate::cluster::topology::node_port_name;
use crate::cluster::{clean_cluster_node, ClusterAssociation, OrchestrationError, Registry, Topology};
use crate::config::{InstallConfig, InstallTeardownConfig};
use crate::services::{
    BootDevice, FloatingIpQuery, PortQuery, Services, AVAILABLE_STATE,
};

pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstallSettings {
    pub poll_interval: Duration,
    /// Limit on each wait for hosts to change status
    pub host_timeout: Option<Duration>,
    pub install_timeout: Option<Duration>,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            host_timeout: Some(DEFAULT_HOST_TIMEOUT),
            install_timeout: Some(DEFAULT_INSTALL_TIMEOUT),
        }
    }
}

/// Install API ids known so far; either may come from an earlier run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallSession {
    pub cluster_id: Option<String>,
    pub infra_env_id: Option<String>,
}

impl InstallSession {
    pub fn resume(cluster_id: Option<String>, infra_env_id: Option<String>) -> Self {
        Self {
            cluster_id,
            infra_env_id,
        }
    }
}

/// Progress worth showing to whoever is watching the install
#[derive(Debug, Clone, PartialEq)]
pub enum InstallEvent {
    StageStarted(Stage),
    ClusterCreated(String),
    InfraEnvCreated(String),
    HostsAlreadyRegistered,
    NodeBooting(String),
    NodeSkipped { node: String, state: String },
    WaitingForHosts(String),
    HostStatus { hostname: String, status: String },
    NodeMoved { node: String, port: String },
    NodeAlreadyMoved(String),
    InstallStatus { status: String, percentage: Option<u32> },
    InstallAlreadyComplete,
}

impl fmt::Display for InstallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallEvent::StageStarted(stage) => write!(f, "STAGE: {}", stage),
            InstallEvent::ClusterCreated(id) => write!(f, "cluster created: {}", id),
            InstallEvent::InfraEnvCreated(id) => write!(f, "infra env created: {}", id),
            InstallEvent::HostsAlreadyRegistered => write!(f, "nodes already registered"),
            InstallEvent::NodeBooting(node) => write!(f, "* booting {} from discovery ISO", node),
            InstallEvent::NodeSkipped { node, state } => {
                write!(f, "* {} is {}, not booting it", node, state)
            }
            InstallEvent::WaitingForHosts(status) => {
                write!(f, "waiting for hosts to reach {}...", status)
            }
            InstallEvent::HostStatus { hostname, status } => write!(f, "  * {}: {}", hostname, status),
            InstallEvent::NodeMoved { node, port } => {
                write!(f, "* {} moved to private port {}", node, port)
            }
            InstallEvent::NodeAlreadyMoved(node) => {
                write!(f, "* {} already on private network", node)
            }
            InstallEvent::InstallStatus { status, percentage } => match percentage {
                Some(pct) if status == STATUS_INSTALLING => {
                    write!(f, "* installation status: {} {}%", status, pct)
                }
                _ => write!(f, "* installation status: {}", status),
            },
            InstallEvent::InstallAlreadyComplete => write!(f, "install already completed"),
        }
    }
}

/// Public addresses of an installed cluster
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub cluster_id: String,
    pub infra_env_id: String,
    pub api_ip: String,
    pub apps_ip: String,
}

impl InstallOutcome {
    pub fn rows(&self) -> Vec<Vec<String>> {
        vec![
            vec!["API".to_string(), self.api_ip.clone()],
            vec!["apps".to_string(), self.apps_ip.clone()],
        ]
    }
}

pub struct Installer {
    api: Arc<dyn InstallerApi>,
    services: Services,
    config: InstallConfig,
    pull_secret: Value,
    config_file: String,
    settings: InstallSettings,
    shutdown: Option<watch::Receiver<bool>>,
    events: Option<mpsc::UnboundedSender<InstallEvent>>,
}

impl Installer {
    pub fn new(
        api: Arc<dyn InstallerApi>,
        services: Services,
        config: InstallConfig,
        pull_secret: Value,
        config_file: impl Into<String>,
    ) -> Self {
        Self {
            api,
            services,
            config,
            pull_secret,
            config_file: config_file.into(),
            settings: InstallSettings::default(),
            shutdown: None,
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: InstallSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<InstallEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: InstallEvent) {
        if let Some(ref events) = self.events {
            // a closed receiver just means nobody is watching
            let _ = events.send(event);
        }
    }

    fn poller(&self, timeout: Option<Duration>) -> Poller {
        let poller = Poller::new(PollSettings::new(self.settings.poll_interval, timeout));
        match self.shutdown {
            Some(ref rx) => poller.with_shutdown(rx.clone()),
            None => poller,
        }
    }

    /// Run every stage not already done, resuming from `session`
    pub async fn run(&self, mut session: InstallSession) -> Result<InstallOutcome, InstallerError> {
        let cluster_id = match session.cluster_id.clone() {
            Some(id) => {
                info!("Resuming with cluster {}", id);
                id
            }
            None => {
                let id = self
                    .staged(Stage::CreateCluster, &session, self.create_cluster())
                    .await?;
                session.cluster_id = Some(id.clone());
                id
            }
        };

        let infra_env_id = match session.infra_env_id.clone() {
            Some(id) => {
                info!("Resuming with infra env {}", id);
                id
            }
            None => {
                let id = self
                    .staged(
                        Stage::CreateInfraEnv,
                        &session,
                        self.create_infra_env(&cluster_id),
                    )
                    .await?;
                session.infra_env_id = Some(id.clone());
                id
            }
        };

        self.staged(
            Stage::RegisterHosts,
            &session,
            self.register_hosts(&infra_env_id),
        )
        .await?;

        self.staged(
            Stage::MoveToPrivateNetwork,
            &session,
            self.move_to_private_network(&cluster_id),
        )
        .await?;

        let needs_wait = self
            .staged(
                Stage::ConfigureInstall,
                &session,
                self.configure_install(&cluster_id, &infra_env_id),
            )
            .await?;

        if needs_wait {
            self.staged(
                Stage::WaitForInstall,
                &session,
                self.wait_for_install(&cluster_id),
            )
            .await?;
        }

        let (api_ip, apps_ip) = self
            .staged(Stage::PublishEndpoints, &session, self.publish_endpoints())
            .await?;

        info!("OpenShift cluster {} installed", cluster_id);
        Ok(InstallOutcome {
            cluster_id,
            infra_env_id,
            api_ip,
            apps_ip,
        })
    }

    /// Wrap a stage's failure with the ids needed to resume
    async fn staged<T>(
        &self,
        stage: Stage,
        session: &InstallSession,
        work: impl Future<Output = Result<T, InstallerError>>,
    ) -> Result<T, InstallerError> {
        info!("Starting stage: {}", stage);
        self.emit(InstallEvent::StageStarted(stage));
        work.await.map_err(|source| {
            let err = InstallerError::Stage {
                stage,
                cluster_id: session.cluster_id.clone(),
                infra_env_id: session.infra_env_id.clone(),
                resume_command: resume_command(
                    &self.config_file,
                    session.cluster_id.as_deref(),
                    session.infra_env_id.as_deref(),
                ),
                source: Box::new(source),
            };
            error!("{}", err);
            err
        })
    }

    async fn create_cluster(&self) -> Result<String, InstallerError> {
        let cluster = self
            .api
            .create_cluster(&NewCluster {
                name: self.config.cluster_name.clone(),
                openshift_version: self.config.openshift_version.clone(),
                high_availability_mode: self.config.high_availability_mode.clone(),
                base_dns_domain: self.config.base_dns_domain.clone(),
                ssh_public_key: self.config.ssh_public_key.clone(),
                pull_secret: self.pull_secret.clone(),
            })
            .await?;
        info!("Created cluster {}", cluster.id);
        self.emit(InstallEvent::ClusterCreated(cluster.id.clone()));
        Ok(cluster.id)
    }

    async fn create_infra_env(&self, cluster_id: &str) -> Result<String, InstallerError> {
        let infra_env = self
            .api
            .create_infra_env(&NewInfraEnv {
                name: format!("{}-infra-env", self.config.cluster_name),
                image_type: MINIMAL_ISO.to_string(),
                cluster_id: cluster_id.to_string(),
                pull_secret: self.pull_secret.clone(),
                openshift_version: self.config.openshift_version.clone(),
                ssh_authorized_key: self.config.ssh_public_key.clone(),
            })
            .await?;
        info!("Created infra env {}", infra_env.id);
        self.emit(InstallEvent::InfraEnvCreated(infra_env.id.clone()));
        Ok(infra_env.id)
    }

    async fn register_hosts(&self, infra_env_id: &str) -> Result<(), InstallerError> {
        let hosts = self.api.list_hosts(infra_env_id).await?;
        if hosts.len() >= self.config.nodes.len() {
            self.emit(InstallEvent::HostsAlreadyRegistered);
        } else {
            let image = self.api.image_url(infra_env_id).await?;
            let topology = Topology::new(self.services.network.clone());
            let provisioning = self
                .services
                .network
                .find_network(&self.config.provisioning_network_name)
                .await?;

            for ident in &self.config.nodes {
                let node = self.services.baremetal.get_node(ident).await?;
                if hosts.iter().any(|host| node.matches(host.hostname())) {
                    info!("{} is already registered", node.display_name());
                    continue;
                }
                if node.provision_state != AVAILABLE_STATE {
                    warn!(
                        "{} is in state {}, not booting it",
                        node.display_name(),
                        node.provision_state
                    );
                    self.emit(InstallEvent::NodeSkipped {
                        node: node.display_name().to_string(),
                        state: node.provision_state.clone(),
                    });
                    continue;
                }

                let port = topology
                    .get_or_create_port(
                        &node_port_name(node.display_name(), &provisioning.name),
                        &provisioning,
                    )
                    .await?;
                self.emit(InstallEvent::NodeBooting(node.display_name().to_string()));
                boot_node_from_url(
                    self.services.baremetal.as_ref(),
                    &node.id,
                    &image.url,
                    &port.id,
                )
                .await?;
            }

            self.wait_for_hosts(infra_env_id, HOST_PENDING_FOR_INPUT)
                .await?;
        }
        Ok(())
    }

    async fn wait_for_hosts(&self, infra_env_id: &str, target: &str) -> Result<(), InstallerError> {
        self.emit(InstallEvent::WaitingForHosts(target.to_string()));
        let expected = self.config.nodes.len();
        let what = format!("{} hosts to reach {}", expected, target);

        self.poller(self.settings.host_timeout)
            .until(&what, || async move {
                let hosts: Vec<Host> = self.api.list_hosts(infra_env_id).await?;
                for host in &hosts {
                    self.emit(InstallEvent::HostStatus {
                        hostname: host.hostname().to_string(),
                        status: host.status.clone(),
                    });
                }
                let ready = hosts.iter().filter(|h| h.status == target).count();
                Ok::<_, InstallerError>((ready >= expected).then_some(()))
            })
            .await
    }

    async fn move_to_private_network(&self, cluster_id: &str) -> Result<(), InstallerError> {
        let baremetal = &self.services.baremetal;
        let network = &self.services.network;
        let topology = Topology::new(network.clone());
        let registry = Registry::new(baremetal.clone());
        let private = network
            .find_network(&self.config.private_network_name)
            .await?;

        for ident in &self.config.nodes {
            let node = baremetal.get_node(ident).await?;
            let mut private_port = None;

            for vif in baremetal.list_vifs(&node.id).await? {
                let port = network.get_port(&vif).await?;
                if port.network_id == private.id {
                    private_port = Some(port);
                    continue;
                }
                info!("Detaching port {} from {}", port.name, node.display_name());
                baremetal.detach_vif(&node.id, &port.id).await?;
                network.delete_port(&port.id).await?;
            }

            let port = match private_port {
                Some(port) => {
                    self.emit(InstallEvent::NodeAlreadyMoved(node.display_name().to_string()));
                    port
                }
                None => {
                    let port = topology
                        .get_or_create_port(
                            &node_port_name(node.display_name(), &private.name),
                            &private,
                        )
                        .await?;
                    baremetal.attach_vif(&node.id, &port.id).await?;
                    self.emit(InstallEvent::NodeMoved {
                        node: node.display_name().to_string(),
                        port: port.name.clone(),
                    });
                    port
                }
            };

            // every node ends on disk boot, whether or not its port was already attached
            baremetal
                .set_boot_device(&node.id, BootDevice::Disk, true)
                .await?;

            let mut association = ClusterAssociation::new(cluster_id);
            association.port_id = Some(port.id);
            registry.associate(&node.id, &association).await?;
        }
        Ok(())
    }

    /// Returns false when the cluster is already installed
    async fn configure_install(
        &self,
        cluster_id: &str,
        infra_env_id: &str,
    ) -> Result<bool, InstallerError> {
        let cluster = self.api.get_cluster(cluster_id).await?;
        if cluster.status == STATUS_INSTALLED {
            self.emit(InstallEvent::InstallAlreadyComplete);
            return Ok(false);
        }
        if cluster.status == STATUS_INSTALLING || cluster.status == STATUS_PREPARING {
            info!("Cluster {} is already {}", cluster_id, cluster.status);
            return Ok(true);
        }

        let subnet = self
            .services
            .network
            .find_subnet(&self.config.private_subnet_name)
            .await?;
        self.api
            .update_cluster(
                cluster_id,
                &ClusterNetworkUpdate::new(
                    cluster_id,
                    &subnet.cidr,
                    &self.config.api_vip,
                    &self.config.ingress_vip,
                ),
            )
            .await?;

        self.wait_for_hosts(infra_env_id, HOST_KNOWN).await?;
        self.api.start_install(cluster_id).await?;
        info!("Install of cluster {} started", cluster_id);
        Ok(true)
    }

    async fn wait_for_install(&self, cluster_id: &str) -> Result<(), InstallerError> {
        let what = format!("cluster {} to install", cluster_id);
        self.poller(self.settings.install_timeout)
            .until(&what, || async move {
                let cluster = self.api.get_cluster(cluster_id).await?;
                self.emit(InstallEvent::InstallStatus {
                    status: cluster.status.clone(),
                    percentage: cluster.percentage(),
                });
                if cluster.status == STATUS_ERROR {
                    return Err(InstallerError::InstallFailed {
                        status: cluster.status,
                        info: cluster.status_info.unwrap_or_default(),
                    });
                }
                Ok((cluster.status == STATUS_INSTALLED).then_some(()))
            })
            .await
    }

    async fn publish_endpoints(&self) -> Result<(String, String), InstallerError> {
        let network = &self.services.network;
        let topology = Topology::new(network.clone());
        let external = network
            .find_network(&self.config.external_network_name)
            .await?;
        let private = network
            .find_network(&self.config.private_network_name)
            .await?;
        let subnet = network
            .find_subnet(&self.config.private_subnet_name)
            .await?;

        let mut addresses = Vec::with_capacity(2);
        for (vip, name) in [
            (&self.config.api_vip, self.config.api_port_name()),
            (&self.config.ingress_vip, self.config.apps_port_name()),
        ] {
            let port = topology
                .get_or_create_port_by_ip(vip, &name, &private, Some(&subnet))
                .await?;
            let fip = topology.get_or_assign_floating_ip(&port, &external).await?;
            info!("{} is reachable at {}", vip, fip.floating_ip_address);
            addresses.push(fip.floating_ip_address);
        }

        let apps = addresses.pop().unwrap_or_default();
        let api = addresses.pop().unwrap_or_default();
        Ok((api, apps))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallUndeployReport {
    /// Floating addresses released from the virtual IPs
    pub released_ips: Vec<String>,
    pub nodes: Vec<String>,
}

/// Release the virtual IP endpoints, then clean every configured node
pub async fn undeploy_install(
    services: &Services,
    config: &InstallTeardownConfig,
) -> Result<InstallUndeployReport, OrchestrationError> {
    let network = &services.network;
    let mut report = InstallUndeployReport::default();

    for vip in [&config.api_vip, &config.ingress_vip] {
        for fip in network
            .list_floating_ips(&FloatingIpQuery::by_fixed_ip(vip.as_str()))
            .await?
        {
            info!("Deleting floating IP {}", fip.floating_ip_address);
            network.delete_floating_ip(&fip.id).await?;
            report.released_ips.push(fip.floating_ip_address);
        }
        for port in network.list_ports(&PortQuery::by_fixed_ip(vip.as_str())).await? {
            info!("Deleting port {}", port.name);
            network.delete_port(&port.id).await?;
        }
    }

    for ident in &config.nodes {
        let node = services.baremetal.get_node(ident).await?;
        clean_cluster_node(services, &node).await?;

        // ports left over from a run that stopped before its cluster keys were written
        for network_name in [
            &config.provisioning_network_name,
            &config.private_network_name,
        ] {
            let name = node_port_name(node.display_name(), network_name);
            for port in network.list_ports(&PortQuery::by_name(&name)).await? {
                info!("Deleting port {}", port.name);
                network.delete_port(&port.id).await?;
            }
        }
        report.nodes.push(node.display_name().to_string());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::registry::{CLUSTER_KEY, PORT_KEY};
    use crate::installer::client::mock::MockInstaller;
    use crate::services::memory::CLEANING_STATE;
    use crate::services::{InMemoryCloud, Network, NewPort, Node, Subnet};

    fn install_config() -> InstallConfig {
        InstallConfig {
            nodes: vec!["node1".to_string(), "node2".to_string()],
            cluster_name: "ocp".to_string(),
            provisioning_network_name: "provisioning".to_string(),
            external_network_name: "external".to_string(),
            private_network_name: "private".to_string(),
            private_subnet_name: "private-subnet".to_string(),
            api_vip: "10.0.0.5".to_string(),
            ingress_vip: "10.0.0.6".to_string(),
            openshift_version: "4.14".to_string(),
            high_availability_mode: "Full".to_string(),
            base_dns_domain: "example.com".to_string(),
            ssh_public_key: "ssh-ed25519 AAAA".to_string(),
        }
    }

    fn cloud() -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_network(Network::new("net-prov", "provisioning"));
        cloud.add_network(Network::new("net-priv", "private"));
        cloud.add_network(Network::new("net-ext", "external"));
        cloud.add_subnet(Subnet {
            id: "sub-priv".to_string(),
            name: "private-subnet".to_string(),
            network_id: "net-priv".to_string(),
            cidr: "10.0.0.0/24".to_string(),
            ip_version: 4,
        });
        cloud.add_node(Node::new("n1", "node1").with_provision_state(AVAILABLE_STATE));
        cloud.add_node(Node::new("n2", "node2").with_provision_state(AVAILABLE_STATE));
        cloud
    }

    fn fast() -> InstallSettings {
        InstallSettings {
            poll_interval: Duration::from_millis(1),
            host_timeout: Some(Duration::from_secs(5)),
            install_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn installer(api: Arc<MockInstaller>, cloud: &Arc<InMemoryCloud>) -> Installer {
        Installer::new(
            api,
            cloud.services(),
            install_config(),
            serde_json::json!({"auths": {}}),
            "ocp.json",
        )
        .with_settings(fast())
    }

    #[tokio::test]
    async fn test_full_install() {
        let cloud = cloud();
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));

        let outcome = installer(api.clone(), &cloud)
            .run(InstallSession::default())
            .await
            .unwrap();

        assert_eq!(outcome.cluster_id, "cluster-1");
        assert_eq!(outcome.infra_env_id, "infra-1");
        assert_ne!(outcome.api_ip, outcome.apps_ip);
        assert_eq!(outcome.rows()[0][0], "API");

        // both nodes end on their private port, booting from disk
        for (id, name) in [("n1", "node1"), ("n2", "node2")] {
            let node = cloud.node(id).unwrap();
            assert_eq!(node.metadata.get(CLUSTER_KEY).unwrap(), "cluster-1");
            let port_id = node.metadata.get(PORT_KEY).unwrap();
            assert_eq!(cloud.vifs_of(id), vec![port_id.clone()]);
            let port = cloud
                .all_ports()
                .into_iter()
                .find(|p| &p.id == port_id)
                .unwrap();
            assert_eq!(port.name, format!("esi-{}-private", name));
            assert_eq!(cloud.boot_device_of(id), Some(("disk".to_string(), true)));
        }
        // provisioning ports are gone
        assert!(!cloud
            .all_ports()
            .iter()
            .any(|p| p.name.ends_with("-provisioning")));
        assert_eq!(api.call_count("start_install"), 1);
        assert_eq!(cloud.all_floating_ips().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_skips_creation_stages() {
        let cloud = cloud();
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));

        installer(api.clone(), &cloud)
            .run(InstallSession::resume(
                Some("cluster-9".to_string()),
                Some("infra-9".to_string()),
            ))
            .await
            .unwrap();

        let calls = api.calls();
        assert_eq!(api.call_count("create_cluster"), 0);
        assert_eq!(api.call_count("create_infra_env"), 0);
        assert_eq!(calls[0], "list_hosts");
    }

    #[tokio::test]
    async fn test_already_registered_hosts_are_not_rebooted() {
        let cloud = cloud();
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]).with_hosts_registered());
        let (tx, mut rx) = mpsc::unbounded_channel();

        installer(api.clone(), &cloud)
            .with_events(tx)
            .run(InstallSession::default())
            .await
            .unwrap();

        assert_eq!(api.call_count("image_url"), 0);
        assert!(!cloud
            .operations()
            .iter()
            .any(|op| op.starts_with("set_provision_state")));
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&InstallEvent::HostsAlreadyRegistered));
    }

    #[tokio::test]
    async fn test_installed_cluster_skips_install() {
        let cloud = cloud();
        let api = Arc::new(
            MockInstaller::new(&["node1", "node2"])
                .with_hosts_registered()
                .with_cluster_status(STATUS_INSTALLED),
        );

        installer(api.clone(), &cloud)
            .run(InstallSession::resume(
                Some("cluster-1".to_string()),
                Some("infra-1".to_string()),
            ))
            .await
            .unwrap();

        assert_eq!(api.call_count("update_cluster"), 0);
        assert_eq!(api.call_count("start_install"), 0);
    }

    #[tokio::test]
    async fn test_resume_while_installing_does_not_wait_for_discovery() {
        let cloud = cloud();
        let api = Arc::new(
            MockInstaller::new(&["node1", "node2"])
                .with_host_status(HOST_KNOWN)
                .with_cluster_status(STATUS_INSTALLING),
        );

        let outcome = installer(api.clone(), &cloud)
            .with_settings(InstallSettings {
                host_timeout: Some(Duration::from_millis(200)),
                ..fast()
            })
            .run(InstallSession::resume(
                Some("cluster-1".to_string()),
                Some("infra-1".to_string()),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.cluster_id, "cluster-1");
        assert_eq!(api.call_count("list_hosts"), 1);
        assert_eq!(api.call_count("image_url"), 0);
        assert_eq!(api.call_count("update_cluster"), 0);
        assert_eq!(api.call_count("start_install"), 0);
    }

    #[tokio::test]
    async fn test_attached_private_port_still_boots_from_disk() {
        let cloud = cloud();
        let services = cloud.services();
        let port = services
            .network
            .create_port(&NewPort {
                name: "esi-node1-private".to_string(),
                network_id: "net-priv".to_string(),
                device_owner: None,
                fixed_ips: Vec::new(),
            })
            .await
            .unwrap();
        services.baremetal.attach_vif("n1", &port.id).await.unwrap();
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));

        installer(api, &cloud)
            .move_to_private_network("cluster-1")
            .await
            .unwrap();

        assert_eq!(cloud.vifs_of("n1"), vec![port.id.clone()]);
        assert_eq!(cloud.boot_device_of("n1"), Some(("disk".to_string(), true)));
        assert_eq!(cloud.boot_device_of("n2"), Some(("disk".to_string(), true)));
        assert_eq!(
            cloud.node("n1").unwrap().metadata.get(PORT_KEY),
            Some(&port.id)
        );
    }

    #[tokio::test]
    async fn test_unavailable_node_is_skipped() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_network(Network::new("net-prov", "provisioning"));
        cloud.add_node(Node::new("n1", "node1").with_provision_state(AVAILABLE_STATE));
        cloud.add_node(Node::new("n2", "node2").with_provision_state("active"));
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));

        installer(api, &cloud)
            .register_hosts("infra-1")
            .await
            .unwrap();

        assert_eq!(cloud.vifs_of("n1").len(), 1);
        assert!(cloud.vifs_of("n2").is_empty());
    }

    #[tokio::test]
    async fn test_failed_stage_carries_resume_ids() {
        let cloud = cloud();
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));
        api.fail_on("image_url");

        let err = installer(api.clone(), &cloud)
            .run(InstallSession::default())
            .await
            .unwrap_err();

        match err {
            InstallerError::Stage {
                stage,
                ref cluster_id,
                ref infra_env_id,
                ref resume_command,
                ..
            } => {
                assert_eq!(stage, Stage::RegisterHosts);
                assert_eq!(cluster_id.as_deref(), Some("cluster-1"));
                assert_eq!(infra_env_id.as_deref(), Some("infra-1"));
                assert_eq!(
                    resume_command,
                    "esi-cluster openshift orchestrate --cluster-id cluster-1 \
                     --infra-env-id infra-1 ocp.json"
                );
            }
            ref other => panic!("Expected a stage error, got {:?}", other),
        }
        assert!(err.is_api_error());

        // picking the run back up finishes it without creating anything new
        api.clear_failure();
        installer(api.clone(), &cloud)
            .run(InstallSession::resume(
                Some("cluster-1".to_string()),
                Some("infra-1".to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(api.call_count("create_cluster"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_host_wait() {
        let cloud = cloud();
        // no hosts ever show up because the image is never requested
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));
        let (tx, rx) = watch::channel(true);

        let err = installer(api, &cloud)
            .with_settings(InstallSettings {
                host_timeout: None,
                ..fast()
            })
            .with_shutdown(rx)
            .wait_for_hosts("infra-1", HOST_KNOWN)
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(err, InstallerError::Poll(super::super::PollError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_undeploy_install() {
        let cloud = cloud();
        let api = Arc::new(MockInstaller::new(&["node1", "node2"]));
        let config = install_config();
        installer(api, &cloud)
            .run(InstallSession::default())
            .await
            .unwrap();
        assert!(!cloud.all_ports().is_empty());

        let report = undeploy_install(&cloud.services(), &InstallTeardownConfig::from(&config))
            .await
            .unwrap();

        assert_eq!(report.released_ips.len(), 2);
        assert_eq!(report.nodes, vec!["node1", "node2"]);
        assert!(cloud.all_ports().is_empty());
        assert!(cloud.all_floating_ips().is_empty());
        for id in ["n1", "n2"] {
            let node = cloud.node(id).unwrap();
            assert!(node.metadata.is_empty());
            assert_eq!(node.provision_state, CLEANING_STATE);
        }
    }
}

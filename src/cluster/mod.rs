//! # Cluster lifecycle
//!
//! A cluster is a set of bare-metal nodes sharing a correlation id stored in
//! each node's metadata. Nothing else records it: the bare-metal and network
//! services only ever see ports, trunks, floating addresses and metadata keys.
//!
//! ```text
//!   ClusterConfig ──► allocator ──► provision ──► report rows
//!                                    │    │
//!                              topology  registry
//!                                    │    │
//!   cluster id ─────────────────► teardown
//! ```
//!
//! - [`allocator`] splits the pool of available nodes across config entries
//! - [`topology`] builds ports and trunks and binds floating addresses
//! - [`provision`] boots every allocated node concurrently
//! - [`registry`] is the only writer of the cluster metadata keys
//! - [`teardown`] releases everything a cluster id points at

pub mod allocator;
pub mod provision;
pub mod registry;
pub mod teardown;
pub mod topology;

pub use allocator::{allocate, Allocation};
pub use provision::{
    orchestrate, provision_node, ClusterReport, NodeOutcome, Orchestration, ReportRow,
};
pub use registry::{ClusterAssociation, ClusterSummary, Registry};
pub use teardown::{clean_cluster_node, undeploy, UndeployReport};
pub use topology::{port_name, Attachment, Topology};

use thiserror::Error;

use crate::config::ConfigError;
use crate::services::ServiceError;

/// Errors raised while allocating, wiring, provisioning or tearing down
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0} is not an available node")]
    UnavailableNode(String),

    #[error("Cannot find {count} free {resource_class} nodes")]
    InsufficientNodes { count: usize, resource_class: String },

    #[error("Found {count} ports named {name}, expected at most one")]
    DuplicatePorts { name: String, count: usize },

    #[error("Network {0} has no VLAN segmentation id and cannot be tagged on a trunk")]
    MissingSegmentationId(String),

    #[error("Port {0} has no fixed IP to bind a floating address to")]
    NoFixedIp(String),

    #[error("No subnet of network {network} contains {ip}")]
    NoSubnetForIp { ip: String, network: String },

    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Node {0} has no resource class")]
    MissingResourceClass(String),
}

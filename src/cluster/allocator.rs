//! Split the pool of available nodes across configuration entries
//!
//! Entries naming explicit nodes are served first, in document order, so a
//! pooled request can never take a node somebody pinned. Pooled entries then
//! take matching nodes greedily. Nothing is returned unless every entry is
//! satisfied.

use std::collections::BTreeMap;

use tracing::info;

use super::OrchestrationError;
use crate::config::{ClusterConfig, NodeSelector};
use crate::services::Node;

/// Nodes chosen for each configuration entry, keyed by entry index
pub type Allocation = BTreeMap<usize, Vec<Node>>;

fn take_where(pool: &mut Vec<Node>, pred: impl Fn(&Node) -> bool) -> Option<Node> {
    let index = pool.iter().position(pred)?;
    Some(pool.remove(index))
}

/// Allocate nodes from `pool` for every entry of `config`.
///
/// On success the allocated nodes have been removed from `pool`; on failure
/// `pool` is left exactly as it was.
pub fn allocate(
    config: &ClusterConfig,
    pool: &mut Vec<Node>,
) -> Result<Allocation, OrchestrationError> {
    let mut remaining = pool.clone();
    let mut allocation = Allocation::new();
    let total = config.node_configs.len();

    let (explicit, pooled): (Vec<_>, Vec<_>) = config
        .node_configs
        .iter()
        .enumerate()
        .partition(|(_, entry)| entry.selector.is_explicit());

    for (position, (index, entry)) in explicit.into_iter().chain(pooled).enumerate() {
        info!(
            "Assigning nodes for {} out of {} configurations",
            position + 1,
            total
        );
        let nodes = match &entry.selector {
            NodeSelector::Explicit(idents) => {
                let mut nodes = Vec::with_capacity(idents.len());
                for ident in idents {
                    let node = take_where(&mut remaining, |n| n.matches(ident))
                        .ok_or_else(|| OrchestrationError::UnavailableNode(ident.clone()))?;
                    nodes.push(node);
                }
                nodes
            }
            NodeSelector::Pooled {
                count,
                resource_class,
            } => {
                let matching = remaining
                    .iter()
                    .filter(|n| n.resource_class.as_deref() == Some(resource_class.as_str()))
                    .count();
                if matching < *count {
                    return Err(OrchestrationError::InsufficientNodes {
                        count: *count,
                        resource_class: resource_class.clone(),
                    });
                }
                (0..*count)
                    .filter_map(|_| {
                        take_where(&mut remaining, |n| {
                            n.resource_class.as_deref() == Some(resource_class.as_str())
                        })
                    })
                    .collect()
            }
        };
        for node in &nodes {
            info!("  * {}", node.display_name());
        }
        allocation.insert(index, nodes);
    }

    *pool = remaining;
    Ok(allocation)
}

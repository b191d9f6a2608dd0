//! REST client for the bare-metal node service

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::rest::RestClient;
use super::{BaremetalService, BootDevice, Node, PatchOp, ProvisionTarget, ServiceError};

/// Microversion that exposes node VIF management and `extra` in listings
pub const IRONIC_API_VERSION: &str = "1.69";

const NODE_FIELDS: &str = "uuid,name,resource_class,provision_state,extra";

#[derive(Deserialize)]
struct NodeList {
    nodes: Vec<Node>,
}

#[derive(Deserialize)]
struct Vif {
    id: String,
}

#[derive(Deserialize)]
struct VifList {
    vifs: Vec<Vif>,
}

#[derive(Clone)]
pub struct IronicClient {
    rest: RestClient,
}

impl IronicClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            rest: RestClient::new(base_url)
                .with_token(token)
                .with_header("X-OpenStack-Ironic-API-Version", IRONIC_API_VERSION),
        }
    }
}

#[async_trait]
impl BaremetalService for IronicClient {
    async fn list_nodes(&self, provision_state: Option<&str>) -> Result<Vec<Node>, ServiceError> {
        let mut query = vec![("fields", NODE_FIELDS.to_string())];
        if let Some(state) = provision_state {
            query.push(("provision_state", state.to_string()));
        }
        let list: NodeList = self.rest.get("v1/nodes", &query).await?;
        Ok(list.nodes)
    }

    async fn get_node(&self, ident: &str) -> Result<Node, ServiceError> {
        self.rest
            .get(&format!("v1/nodes/{}", ident), &[])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ServiceError::not_found("node", ident)
                } else {
                    e
                }
            })
    }

    async fn update_node(&self, ident: &str, patch: &[PatchOp]) -> Result<(), ServiceError> {
        self.rest
            .patch_no_content(&format!("v1/nodes/{}", ident), patch)
            .await
    }

    async fn attach_vif(&self, node: &str, port_id: &str) -> Result<(), ServiceError> {
        self.rest
            .post_no_content(&format!("v1/nodes/{}/vifs", node), &json!({ "id": port_id }))
            .await
    }

    async fn detach_vif(&self, node: &str, port_id: &str) -> Result<(), ServiceError> {
        self.rest
            .delete(&format!("v1/nodes/{}/vifs/{}", node, port_id))
            .await
    }

    async fn list_vifs(&self, node: &str) -> Result<Vec<String>, ServiceError> {
        let list: VifList = self.rest.get(&format!("v1/nodes/{}/vifs", node), &[]).await?;
        Ok(list.vifs.into_iter().map(|v| v.id).collect())
    }

    async fn set_provision_state(
        &self,
        node: &str,
        target: ProvisionTarget,
    ) -> Result<(), ServiceError> {
        self.rest
            .put_no_content(
                &format!("v1/nodes/{}/states/provision", node),
                &json!({ "target": target.as_str() }),
            )
            .await
    }

    async fn set_boot_device(
        &self,
        node: &str,
        device: BootDevice,
        persistent: bool,
    ) -> Result<(), ServiceError> {
        self.rest
            .put_no_content(
                &format!("v1/nodes/{}/management/boot_device", node),
                &json!({ "boot_device": device.as_str(), "persistent": persistent }),
            )
            .await
    }
}

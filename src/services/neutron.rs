//! REST client for the network service

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::rest::RestClient;
use super::{
    FloatingIp, FloatingIpQuery, Network, NetworkService, NewPort, NewTrunk, Port, PortQuery,
    ServiceError, Subnet, Trunk,
};

#[derive(Deserialize)]
struct NetworkOne {
    network: Network,
}

#[derive(Deserialize)]
struct NetworkList {
    networks: Vec<Network>,
}

#[derive(Deserialize)]
struct SubnetOne {
    subnet: Subnet,
}

#[derive(Deserialize)]
struct SubnetList {
    subnets: Vec<Subnet>,
}

#[derive(Deserialize)]
struct PortOne {
    port: Port,
}

#[derive(Deserialize)]
struct PortList {
    ports: Vec<Port>,
}

#[derive(Deserialize)]
struct TrunkOne {
    trunk: Trunk,
}

#[derive(Deserialize)]
struct TrunkList {
    trunks: Vec<Trunk>,
}

#[derive(Deserialize)]
struct FloatingIpOne {
    floatingip: FloatingIp,
}

#[derive(Deserialize)]
struct FloatingIpList {
    floatingips: Vec<FloatingIp>,
}

/// Exactly one match by name, otherwise not-found or ambiguous
fn single<T>(mut items: Vec<T>, kind: &'static str, ident: &str) -> Result<T, ServiceError> {
    match items.len() {
        0 => Err(ServiceError::not_found(kind, ident)),
        1 => Ok(items.remove(0)),
        count => Err(ServiceError::Ambiguous {
            kind,
            ident: ident.to_string(),
            count,
        }),
    }
}

#[derive(Clone)]
pub struct NeutronClient {
    rest: RestClient,
}

impl NeutronClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            rest: RestClient::new(base_url).with_token(token),
        }
    }

    /// GET `<collection>/<ident>`, falling back to a name search on 404
    async fn find<One, Many, T>(
        &self,
        collection: &str,
        ident: &str,
        kind: &'static str,
        one: fn(One) -> T,
        many: fn(Many) -> Vec<T>,
    ) -> Result<T, ServiceError>
    where
        One: DeserializeOwned,
        Many: DeserializeOwned,
    {
        match self
            .rest
            .get::<One>(&format!("v2.0/{}/{}", collection, ident), &[])
            .await
        {
            Ok(found) => Ok(one(found)),
            Err(e) if e.is_not_found() => {
                let list: Many = self
                    .rest
                    .get(
                        &format!("v2.0/{}", collection),
                        &[("name", ident.to_string())],
                    )
                    .await?;
                single(many(list), kind, ident)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl NetworkService for NeutronClient {
    async fn find_network(&self, ident: &str) -> Result<Network, ServiceError> {
        self.find(
            "networks",
            ident,
            "network",
            |o: NetworkOne| o.network,
            |m: NetworkList| m.networks,
        )
        .await
    }

    async fn list_networks(&self) -> Result<Vec<Network>, ServiceError> {
        let list: NetworkList = self.rest.get("v2.0/networks", &[]).await?;
        Ok(list.networks)
    }

    async fn find_subnet(&self, ident: &str) -> Result<Subnet, ServiceError> {
        self.find(
            "subnets",
            ident,
            "subnet",
            |o: SubnetOne| o.subnet,
            |m: SubnetList| m.subnets,
        )
        .await
    }

    async fn list_subnets(&self, network_id: &str) -> Result<Vec<Subnet>, ServiceError> {
        let list: SubnetList = self
            .rest
            .get("v2.0/subnets", &[("network_id", network_id.to_string())])
            .await?;
        Ok(list.subnets)
    }

    async fn list_ports(&self, query: &PortQuery) -> Result<Vec<Port>, ServiceError> {
        let mut params = Vec::new();
        if let Some(ref name) = query.name {
            params.push(("name", name.clone()));
        }
        if let Some(ref status) = query.status {
            params.push(("status", status.clone()));
        }
        if let Some(ref network_id) = query.network_id {
            params.push(("network_id", network_id.clone()));
        }
        if let Some(ref ip) = query.fixed_ip {
            params.push(("fixed_ips", format!("ip_address={}", ip)));
        }
        let list: PortList = self.rest.get("v2.0/ports", &params).await?;
        Ok(list.ports)
    }

    async fn get_port(&self, id: &str) -> Result<Port, ServiceError> {
        let one: PortOne = self.rest.get(&format!("v2.0/ports/{}", id), &[]).await?;
        Ok(one.port)
    }

    async fn create_port(&self, port: &NewPort) -> Result<Port, ServiceError> {
        let one: PortOne = self.rest.post("v2.0/ports", &json!({ "port": port })).await?;
        Ok(one.port)
    }

    async fn delete_port(&self, id: &str) -> Result<(), ServiceError> {
        self.rest.delete(&format!("v2.0/ports/{}", id)).await
    }

    async fn find_trunk(&self, ident: &str) -> Result<Option<Trunk>, ServiceError> {
        match self
            .find(
                "trunks",
                ident,
                "trunk",
                |o: TrunkOne| o.trunk,
                |m: TrunkList| m.trunks,
            )
            .await
        {
            Ok(trunk) => Ok(Some(trunk)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_trunk(&self, trunk: &NewTrunk) -> Result<Trunk, ServiceError> {
        let one: TrunkOne = self
            .rest
            .post("v2.0/trunks", &json!({ "trunk": trunk }))
            .await?;
        Ok(one.trunk)
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), ServiceError> {
        self.rest.delete(&format!("v2.0/trunks/{}", id)).await
    }

    async fn list_floating_ips(
        &self,
        query: &FloatingIpQuery,
    ) -> Result<Vec<FloatingIp>, ServiceError> {
        let mut params = Vec::new();
        if let Some(ref ip) = query.fixed_ip_address {
            params.push(("fixed_ip_address", ip.clone()));
        }
        if let Some(ref port_id) = query.port_id {
            params.push(("port_id", port_id.clone()));
        }
        if let Some(ref network_id) = query.floating_network_id {
            params.push(("floating_network_id", network_id.clone()));
        }
        let list: FloatingIpList = self.rest.get("v2.0/floatingips", &params).await?;
        // The API cannot filter on a null port, so unbound is applied here
        Ok(list
            .floatingips
            .into_iter()
            .filter(|fip| query.matches(fip))
            .collect())
    }

    async fn create_floating_ip(&self, network_id: &str) -> Result<FloatingIp, ServiceError> {
        let one: FloatingIpOne = self
            .rest
            .post(
                "v2.0/floatingips",
                &json!({ "floatingip": { "floating_network_id": network_id } }),
            )
            .await?;
        Ok(one.floatingip)
    }

    async fn bind_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp, ServiceError> {
        let one: FloatingIpOne = self
            .rest
            .put(
                &format!("v2.0/floatingips/{}", id),
                &json!({ "floatingip": { "port_id": port_id } }),
            )
            .await?;
        Ok(one.floatingip)
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<(), ServiceError> {
        self.rest.delete(&format!("v2.0/floatingips/{}", id)).await
    }
}

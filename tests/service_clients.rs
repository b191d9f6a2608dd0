//! Integration tests for the bare-metal and network REST clients
//!
//! Each test starts a small axum server answering the handful of routes the
//! client touches and records what it was sent.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use esi_cluster::cluster::registry::{CLUSTER_KEY, PORT_KEY};
use esi_cluster::cluster::{ClusterAssociation, Registry, Topology};
use esi_cluster::services::{
    BaremetalService, IronicClient, Network, NetworkService, NeutronClient, PortQuery,
    ServiceError,
};

#[derive(Default)]
struct Recorded {
    queries: Vec<HashMap<String, String>>,
    bodies: Vec<Value>,
    headers: Vec<(String, String)>,
}

type Shared = Arc<Mutex<Recorded>>;

/// Find an available port for testing
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to address")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

async fn serve(app: Router) -> String {
    let port = find_available_port();
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind fake service");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://127.0.0.1:{}", port)
}

fn networks() -> Vec<Value> {
    vec![
        json!({"id": "net1-id", "name": "net1"}),
        json!({"id": "net2-id", "name": "net2", "provider:segmentation_id": 100}),
        json!({"id": "dup-a", "name": "dup"}),
        json!({"id": "dup-b", "name": "dup"}),
    ]
}

async fn network_by_id(Path(id): Path<String>) -> Response {
    match networks().into_iter().find(|n| n["id"] == id.as_str()) {
        Some(network) => Json(json!({ "network": network })).into_response(),
        None => (StatusCode::NOT_FOUND, "Network not found").into_response(),
    }
}

async fn network_list(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let found: Vec<Value> = networks()
        .into_iter()
        .filter(|n| query.get("name").map_or(true, |name| n["name"] == name.as_str()))
        .collect();
    Json(json!({ "networks": found }))
}

async fn port_list(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.lock().unwrap().queries.push(query);
    Json(json!({ "ports": [] }))
}

async fn port_create(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let port = json!({
        "id": "port-1",
        "name": body["port"]["name"],
        "network_id": body["port"]["network_id"],
        "status": "DOWN",
        "fixed_ips": [{"subnet_id": "s1", "ip_address": "10.0.0.7"}]
    });
    state.lock().unwrap().bodies.push(body);
    (StatusCode::CREATED, Json(json!({ "port": port }))).into_response()
}

fn network_app(state: Shared) -> Router {
    Router::new()
        .route("/v2.0/networks", get(network_list))
        .route("/v2.0/networks/{id}", get(network_by_id))
        .route("/v2.0/ports", get(port_list).post(port_create))
        .with_state(state)
}

fn nodes() -> Vec<Value> {
    vec![
        json!({
            "uuid": "n1",
            "name": "node1",
            "provision_state": "active",
            "extra": {"esi_cluster_uuid": "c1", "esi_port_uuid": "p1", "rack": 4}
        }),
        json!({"uuid": "n2", "name": "node2", "provision_state": "available", "extra": {}}),
    ]
}

async fn node_list(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let found: Vec<Value> = nodes()
        .into_iter()
        .filter(|n| {
            query
                .get("provision_state")
                .map_or(true, |state| n["provision_state"] == state.as_str())
        })
        .collect();
    Json(json!({ "nodes": found }))
}

async fn node_get(Path(id): Path<String>) -> Response {
    match nodes()
        .into_iter()
        .find(|n| n["uuid"] == id.as_str() || n["name"] == id.as_str())
    {
        Some(node) => Json(node).into_response(),
        None => (StatusCode::NOT_FOUND, "Node not found").into_response(),
    }
}

async fn node_patch(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut recorded = state.lock().unwrap();
    for name in ["x-auth-token", "x-openstack-ironic-api-version"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            recorded.headers.push((name.to_string(), value.to_string()));
        }
    }
    recorded.bodies.push(body);
    Json(json!({}))
}

fn baremetal_app(state: Shared) -> Router {
    Router::new()
        .route("/v1/nodes", get(node_list))
        .route("/v1/nodes/{id}", get(node_get).patch(node_patch))
        .with_state(state)
}

#[tokio::test]
async fn test_network_lookup_falls_back_to_name() {
    let url = serve(network_app(Shared::default())).await;
    let client = NeutronClient::new(url, None);

    let by_id = client.find_network("net2-id").await.unwrap();
    assert_eq!(by_id.display_name(), "net2 (100)");

    let by_name = client.find_network("net1").await.unwrap();
    assert_eq!(by_name.id, "net1-id");

    let err = client.find_network("dup").await.unwrap_err();
    assert!(matches!(err, ServiceError::Ambiguous { count: 2, .. }));

    let err = client.find_network("nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_port_creation_queries_unbound_ports_first() {
    let state = Shared::default();
    let url = serve(network_app(state.clone())).await;
    let topology = Topology::new(Arc::new(NeutronClient::new(url, Some("tok".to_string()))));

    let port = topology
        .get_or_create_port("esi-node1-net1", &Network::new("net1-id", "net1"))
        .await
        .unwrap();
    assert_eq!(port.id, "port-1");
    assert_eq!(port.first_fixed_ip(), Some("10.0.0.7"));

    let recorded = state.lock().unwrap();
    let query = &recorded.queries[0];
    assert_eq!(query.get("name").map(String::as_str), Some("esi-node1-net1"));
    assert_eq!(query.get("status").map(String::as_str), Some("DOWN"));
    assert_eq!(query.get("network_id").map(String::as_str), Some("net1-id"));
    assert_eq!(recorded.bodies[0]["port"]["device_owner"], "baremetal:none");
    assert!(recorded.bodies[0]["port"].get("fixed_ips").is_none());
}

#[tokio::test]
async fn test_fixed_ip_filter_encoding() {
    let state = Shared::default();
    let url = serve(network_app(state.clone())).await;
    let client = NeutronClient::new(url, None);

    let ports = client
        .list_ports(&PortQuery::by_fixed_ip("10.0.0.5"))
        .await
        .unwrap();
    assert!(ports.is_empty());

    let recorded = state.lock().unwrap();
    assert_eq!(
        recorded.queries[0].get("fixed_ips").map(String::as_str),
        Some("ip_address=10.0.0.5")
    );
}

#[tokio::test]
async fn test_registry_writes_metadata_patch() {
    let state = Shared::default();
    let url = serve(baremetal_app(state.clone())).await;
    let registry = Registry::new(Arc::new(IronicClient::new(url, Some("tok".to_string()))));

    let mut association = ClusterAssociation::new("c9");
    association.port_id = Some("p9".to_string());
    registry.associate("n2", &association).await.unwrap();

    let recorded = state.lock().unwrap();
    let ops = recorded.bodies[0].as_array().unwrap();
    assert_eq!(ops.len(), 2);
    assert!(ops.contains(&json!({"op": "add", "path": format!("/extra/{}", CLUSTER_KEY), "value": "c9"})));
    assert!(ops.contains(&json!({"op": "add", "path": format!("/extra/{}", PORT_KEY), "value": "p9"})));
    assert!(recorded
        .headers
        .contains(&("x-auth-token".to_string(), "tok".to_string())));
    assert!(recorded
        .headers
        .iter()
        .any(|(name, _)| name == "x-openstack-ironic-api-version"));
}

#[tokio::test]
async fn test_clusters_listed_from_node_metadata() {
    let url = serve(baremetal_app(Shared::default())).await;
    let client = Arc::new(IronicClient::new(url, None));

    let available = client.list_nodes(Some("available")).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].display_name(), "node2");

    let clusters = Registry::new(client.clone()).list_clusters().await.unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].cluster_id, "c1");
    assert_eq!(clusters[0].nodes[0].0, "node1");

    let node = client.get_node("node1").await.unwrap();
    // non-string metadata values are kept as their JSON text
    assert_eq!(node.metadata.get("rack").map(String::as_str), Some("4"));

    let err = client.get_node("ghost").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { kind: "node", .. }));
}

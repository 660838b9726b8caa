//! Desired documents for the egress gateway and its multi-mesh companion.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::Serialize;
use serde_json::json;

use meshgate_core::{DesiredState, ObjectKind, ResourceDocument};
use meshgate_objectmatch::DefaultsTable;
use meshgate_reconcile::SpecBuilder;

use crate::config::MeshConfig;

pub const RESOURCE_NAME: &str = "istio-egressgateway";
pub const MULTIMESH_RESOURCE_NAME: &str = "istio-multicluster-egressgateway";

const MESH_API_VERSION: &str = "istio.banzaicloud.io/v1beta1";
const MESH_KIND: &str = "Istio";
const MESH_GATEWAY_KIND: &str = "MeshGateway";
const NETWORKING_API_VERSION: &str = "networking.istio.io/v1alpha3";
const GATEWAY_KIND: &str = "Gateway";

pub fn mesh_gateway_kind() -> ObjectKind {
    ObjectKind::from_api_version(MESH_API_VERSION, MESH_GATEWAY_KIND)
}

pub fn gateway_kind() -> ObjectKind {
    ObjectKind::from_api_version(NETWORKING_API_VERSION, GATEWAY_KIND)
}

/// Labels every egress gateway object carries; also the pod selector.
pub fn resource_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "istio-egressgateway".to_string()),
        ("istio".to_string(), "egressgateway".to_string()),
    ])
}

/// Component labels merged with the user's; the user's win on conflict.
pub fn labels(config: &MeshConfig) -> BTreeMap<String, String> {
    let mut out = resource_labels();
    out.extend(config.gateways.egress.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// Values the API server fills in for omitted fields of our kinds.
pub fn default_rules() -> DefaultsTable {
    let mut table = DefaultsTable::new();
    if let Ok(path) = "spec.ports[*].protocol".parse() {
        table.register(&mesh_gateway_kind(), path, "TCP");
    }
    table
}

fn object_meta(name: &str, labels: BTreeMap<String, String>, config: &MeshConfig) -> ObjectMeta {
    let owner_references = config.uid.as_ref().map(|uid| {
        vec![OwnerReference {
            api_version: MESH_API_VERSION.to_string(),
            kind: MESH_KIND.to_string(),
            name: config.name.clone(),
            uid: uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]
    });
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(config.namespace.clone()),
        labels: Some(labels),
        owner_references,
        ..Default::default()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeshGateway {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
    spec: MeshGatewaySpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeshGatewaySpec {
    labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_type: Option<String>,
    ports: Vec<ServicePort>,
    #[serde(rename = "type")]
    gateway_type: &'static str,
}

/// The `MeshGateway` resource of type `egress`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EgressGatewayBuilder;

impl SpecBuilder for EgressGatewayBuilder {
    type Config = MeshConfig;

    fn name(&self) -> &str {
        RESOURCE_NAME
    }

    fn kind(&self) -> ObjectKind {
        mesh_gateway_kind()
    }

    fn desired_state(&self, config: &MeshConfig) -> DesiredState {
        config.policy().desired_state()
    }

    fn build_desired(&self, config: &MeshConfig) -> Result<ResourceDocument> {
        let egress = &config.gateways.egress;
        let labels = labels(config);
        let object = MeshGateway {
            api_version: MESH_API_VERSION,
            kind: MESH_GATEWAY_KIND,
            metadata: object_meta(RESOURCE_NAME, labels.clone(), config),
            spec: MeshGatewaySpec {
                labels,
                annotations: egress.annotations.clone(),
                min_replicas: egress.min_replicas,
                max_replicas: egress.max_replicas,
                service_type: egress.service_type.clone(),
                ports: egress.ports.clone(),
                gateway_type: "egress",
            },
        };
        ResourceDocument::from_object(&object).context("building MeshGateway document")
    }
}

/// The networking `Gateway` that lets other meshes reach `*.global` hosts
/// through this egress gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiMeshGatewayBuilder;

impl SpecBuilder for MultiMeshGatewayBuilder {
    type Config = MeshConfig;

    fn name(&self) -> &str {
        MULTIMESH_RESOURCE_NAME
    }

    fn kind(&self) -> ObjectKind {
        gateway_kind()
    }

    fn desired_state(&self, config: &MeshConfig) -> DesiredState {
        config.policy().multi_mesh_desired_state()
    }

    fn build_desired(&self, config: &MeshConfig) -> Result<ResourceDocument> {
        let metadata = object_meta(MULTIMESH_RESOURCE_NAME, resource_labels(), config);
        let object = json!({
            "apiVersion": NETWORKING_API_VERSION,
            "kind": GATEWAY_KIND,
            "metadata": metadata,
            "spec": {
                "servers": [{
                    "hosts": ["*.global"],
                    "port": { "name": "tls", "protocol": "TLS", "number": 15443 },
                    "tls": { "mode": "AUTO_PASSTHROUGH" }
                }],
                "selector": resource_labels(),
            }
        });
        ResourceDocument::from_json(object).context("building multi-mesh Gateway document")
    }
}

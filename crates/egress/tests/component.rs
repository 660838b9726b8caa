#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use meshgate_core::{Action, ObjectKey, ObjectKind, ResourceDocument};
use meshgate_egress::{EgressGateway, MeshConfig, MULTIMESH_RESOURCE_NAME, RESOURCE_NAME};
use meshgate_reconcile::{ClusterClient, Operation};
use serde_json::{json, Value as Json};

/// API server stand-in. Drops port protocols equal to the CRD default on
/// create, as servers that normalize defaulted fields do.
#[derive(Default)]
struct FakeCluster {
    objects: Mutex<BTreeMap<(ObjectKind, ObjectKey), Json>>,
    writes: Mutex<Vec<(Operation, String)>>,
    fail_create: bool,
}

impl FakeCluster {
    fn writes(&self) -> Vec<(Operation, String)> {
        self.writes.lock().unwrap().clone()
    }

    fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().map(|(_, k)| k.name.clone()).collect()
    }

    fn stored(&self, name: &str) -> Option<Json> {
        self.objects.lock().unwrap().iter().find(|((_, k), _)| k.name == name).map(|(_, v)| v.clone())
    }
}

#[async_trait::async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<Option<ResourceDocument>> {
        let stored = self.objects.lock().unwrap().get(&(kind.clone(), key.clone())).cloned();
        Ok(stored.map(ResourceDocument::from_json).transpose()?)
    }

    async fn create(&self, desired: &ResourceDocument) -> Result<()> {
        if self.fail_create {
            return Err(anyhow!("admission webhook denied the request"));
        }
        self.writes.lock().unwrap().push((Operation::Create, desired.key().name.clone()));
        let mut obj = desired.to_json();
        obj["metadata"]["uid"] = json!("9d1e2f3a-0000-0000-0000-000000000007");
        obj["metadata"]["resourceVersion"] = json!("1");
        if let Some(ports) = obj["spec"]["ports"].as_array_mut() {
            for port in ports.iter_mut().filter_map(Json::as_object_mut) {
                if port.get("protocol") == Some(&json!("TCP")) {
                    port.remove("protocol");
                }
            }
        }
        self.objects.lock().unwrap().insert((desired.kind().clone(), desired.key().clone()), obj);
        Ok(())
    }

    async fn update(&self, desired: &ResourceDocument, patch: &Json) -> Result<()> {
        self.writes.lock().unwrap().push((Operation::Update, desired.key().name.clone()));
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(desired.kind().clone(), desired.key().clone()))
            .ok_or_else(|| anyhow!("not found"))?;
        json_patch::merge(obj, patch);
        Ok(())
    }

    async fn delete(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<()> {
        self.writes.lock().unwrap().push((Operation::Delete, key.name.clone()));
        self.objects.lock().unwrap().remove(&(kind.clone(), key.clone()));
        Ok(())
    }
}

fn config(name: &str, enabled: bool, multi_mesh: bool) -> MeshConfig {
    config_with_gateways(name, true, enabled, multi_mesh)
}

fn config_with_gateways(name: &str, gateways: bool, enabled: bool, multi_mesh: bool) -> MeshConfig {
    MeshConfig::from_yaml(&format!(
        r#"
name: {name}
namespace: istio-system
multiMesh: {multi_mesh}
gateways:
  enabled: {gateways}
  egress:
    enabled: {enabled}
    maxReplicas: 5
    ports:
      - name: http2
        port: 80
        targetPort: 8080
        protocol: TCP
"#
    ))
    .unwrap()
}

fn actions(outcomes: &[meshgate_reconcile::Outcome]) -> Vec<Action> {
    outcomes.iter().map(|o| o.action).collect()
}

#[tokio::test]
async fn creates_both_gateways_then_settles() {
    let gw = EgressGateway::new(FakeCluster::default());
    let cfg = config("mesh", true, true);

    let first = gw.reconcile(&cfg).await.unwrap();
    assert_eq!(actions(&first), vec![Action::Create, Action::Create]);
    assert_eq!(first[0].key.name, RESOURCE_NAME);
    assert_eq!(first[1].key.name, MULTIMESH_RESOURCE_NAME);

    // protocol was pruned server-side; the registered default covers it
    let stored = gw.reconciler().client().stored(RESOURCE_NAME).unwrap();
    assert!(stored["spec"]["ports"][0].get("protocol").is_none());

    let second = gw.reconcile(&cfg).await.unwrap();
    assert_eq!(actions(&second), vec![Action::NoOp, Action::NoOp]);
    assert_eq!(gw.reconciler().client().writes().len(), 2);
}

#[tokio::test]
async fn config_change_patches_only_the_gateway() {
    let gw = EgressGateway::new(FakeCluster::default());
    gw.reconcile(&config("mesh", true, true)).await.unwrap();

    let mut cfg = config("mesh", true, true);
    cfg.gateways.egress.max_replicas = Some(8);
    let out = gw.reconcile(&cfg).await.unwrap();
    assert_eq!(actions(&out), vec![Action::Update, Action::NoOp]);
    assert_eq!(out[0].diff_paths.iter().map(|p| p.to_string()).collect::<Vec<_>>(), vec!["spec.maxReplicas"]);
    let stored = gw.reconciler().client().stored(RESOURCE_NAME).unwrap();
    assert_eq!(stored["spec"]["maxReplicas"], json!(8));
}

#[tokio::test]
async fn multimesh_off_removes_companion_gateway() {
    let gw = EgressGateway::new(FakeCluster::default());
    gw.reconcile(&config("mesh", true, true)).await.unwrap();

    let out = gw.reconcile(&config("mesh", true, false)).await.unwrap();
    assert_eq!(actions(&out), vec![Action::NoOp, Action::Delete]);
    assert_eq!(gw.reconciler().client().names(), vec![RESOURCE_NAME.to_string()]);
}

#[tokio::test]
async fn disabled_egress_deletes_everything() {
    let gw = EgressGateway::new(FakeCluster::default());
    gw.reconcile(&config("mesh", true, true)).await.unwrap();

    let out = gw.reconcile(&config("mesh", false, true)).await.unwrap();
    assert_eq!(actions(&out), vec![Action::Delete, Action::Delete]);
    assert!(gw.reconciler().client().names().is_empty());
}

#[tokio::test]
async fn config_only_mesh_skips_multimesh_gateway() {
    let gw = EgressGateway::new(FakeCluster::default());
    let out = gw.reconcile(&config("istio-config", true, true)).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].action, Action::Create);
    assert!(gw.reconciler().client().stored(MULTIMESH_RESOURCE_NAME).is_none());
}

#[tokio::test]
async fn plan_reports_without_writing() {
    let gw = EgressGateway::new(FakeCluster::default());
    let out = gw.plan(&config("mesh", true, true)).await.unwrap();
    assert_eq!(actions(&out), vec![Action::Create, Action::Create]);
    assert!(out.iter().all(|o| o.dry_run));
    assert!(gw.reconciler().client().writes().is_empty());
}

#[tokio::test]
async fn failure_names_resource_and_stops() {
    let gw = EgressGateway::new(FakeCluster { fail_create: true, ..Default::default() });
    let err = gw.reconcile(&config("mesh", true, true)).await.unwrap_err();
    let chain = format!("{:#}", err);
    assert!(
        chain.contains("failed to reconcile resource istio.banzaicloud.io/v1beta1/MeshGateway istio-egressgateway"),
        "chain={}",
        chain
    );
    assert!(chain.contains("failed to create"), "chain={}", chain);
    assert!(chain.contains("admission webhook denied"), "chain={}", chain);
    assert!(gw.reconciler().client().names().is_empty());
}

#[tokio::test]
async fn multimesh_gateway_ignores_global_gateway_switch() {
    let gw = EgressGateway::new(FakeCluster::default());
    gw.reconcile(&config("mesh", true, true)).await.unwrap();

    let out = gw.reconcile(&config_with_gateways("mesh", false, true, true)).await.unwrap();
    assert_eq!(actions(&out), vec![Action::Delete, Action::NoOp]);
    assert_eq!(gw.reconciler().client().names(), vec![MULTIMESH_RESOURCE_NAME.to_string()]);
}

#[tokio::test]
async fn multimesh_failure_is_reported_as_dynamic_resource() {
    let gw = EgressGateway::new(FakeCluster { fail_create: true, ..Default::default() });
    let err = gw.reconcile(&config_with_gateways("mesh", false, true, true)).await.unwrap_err();
    let chain = format!("{:#}", err);
    assert!(
        chain.contains(
            "failed to reconcile dynamic resource networking.istio.io/v1alpha3/Gateway istio-multicluster-egressgateway"
        ),
        "chain={}",
        chain
    );
}

//! meshgate kubehub – kube-rs backed cluster client over `DynamicObject`

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
    Client,
};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use meshgate_core::{ObjectKey, ObjectKind, ResourceDocument};
use meshgate_reconcile::ClusterClient;

const DEFAULT_FIELD_MANAGER: &str = "meshgate";

fn field_manager_from_env() -> String {
    std::env::var("MESHGATE_FIELD_MANAGER")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FIELD_MANAGER.to_string())
}

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig/in-cluster env")
}

/// Dynamic cluster client. Kinds are resolved through discovery once and
/// cached for the life of the client.
pub struct KubeClient {
    client: Client,
    field_manager: String,
    resources: Mutex<FxHashMap<ObjectKind, (ApiResource, bool)>>,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client, field_manager: field_manager_from_env(), resources: Mutex::new(FxHashMap::default()) }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(get_kube_client().await?))
    }

    pub fn with_field_manager(mut self, name: impl Into<String>) -> Self {
        self.field_manager = name.into();
        self
    }

    pub fn field_manager(&self) -> &str {
        &self.field_manager
    }

    async fn resolve(&self, kind: &ObjectKind) -> Result<(ApiResource, bool)> {
        let mut cache = self.resources.lock().await;
        if let Some(hit) = cache.get(kind) {
            return Ok(hit.clone());
        }
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .with_context(|| format!("GVK not found: {}", kind))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        debug!(gvk = %kind, plural = %ar.plural, namespaced, "resolved api resource");
        cache.insert(kind.clone(), (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn api_for(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = self.resolve(kind).await?;
        if namespaced {
            match key.namespace.as_deref() {
                Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
                None => Err(anyhow!("namespace required for namespaced kind {}", kind)),
            }
        } else {
            Ok(Api::all_with(self.client.clone(), &ar))
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams { field_manager: Some(self.field_manager.clone()), ..Default::default() }
    }
}

fn record(op: &'static str, t0: Instant, ok: bool) {
    counter!("client_ops_total", 1u64, "op" => op);
    if !ok {
        counter!("client_errors_total", 1u64, "op" => op);
    }
    histogram!("client_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// Convert a fetched object into a document. List/get responses do not always
/// carry type meta, so the requested kind fills the gap.
fn document_from(obj: &DynamicObject, kind: &ObjectKind) -> Result<ResourceDocument> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    if let Some(map) = raw.as_object_mut() {
        map.entry("apiVersion").or_insert_with(|| Json::String(kind.api_version()));
        map.entry("kind").or_insert_with(|| Json::String(kind.kind.clone()));
    }
    ResourceDocument::from_json(raw).with_context(|| format!("canonicalizing live {}", kind))
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait::async_trait]
impl ClusterClient for KubeClient {
    async fn get(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<Option<ResourceDocument>> {
        let api = self.api_for(kind, key).await?;
        let t0 = Instant::now();
        let res = api.get_opt(&key.name).await;
        record("get", t0, res.is_ok());
        match res? {
            Some(obj) => Ok(Some(document_from(&obj, kind)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, desired: &ResourceDocument) -> Result<()> {
        let api = self.api_for(desired.kind(), desired.key()).await?;
        let obj: DynamicObject = serde_json::from_value(desired.to_json()).context("desired document is not a valid object")?;
        let t0 = Instant::now();
        let res = api.create(&self.post_params(), &obj).await;
        record("create", t0, res.is_ok());
        let created = res?;
        info!(gvk = %desired.kind(), key = %desired.key(), rv = ?created.metadata.resource_version, "created");
        Ok(())
    }

    async fn update(&self, desired: &ResourceDocument, patch: &Json) -> Result<()> {
        let api = self.api_for(desired.kind(), desired.key()).await?;
        let t0 = Instant::now();
        let res = api.patch(&desired.key().name, &self.patch_params(), &Patch::Merge(patch)).await;
        record("update", t0, res.is_ok());
        let patched = res?;
        info!(gvk = %desired.kind(), key = %desired.key(), rv = ?patched.metadata.resource_version, "patched");
        Ok(())
    }

    async fn delete(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<()> {
        let api = self.api_for(kind, key).await?;
        let t0 = Instant::now();
        let res = api.delete(&key.name, &DeleteParams::default()).await;
        // already gone counts as deleted
        let res = match res {
            Err(e) if is_not_found(&e) => {
                debug!(gvk = %kind, key = %key, "delete: object already gone");
                record("delete", t0, true);
                return Ok(());
            }
            other => other,
        };
        record("delete", t0, res.is_ok());
        res?;
        info!(gvk = %kind, key = %key, "deleted");
        Ok(())
    }
}

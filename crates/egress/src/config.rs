//! Mesh configuration as read from a YAML file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::ServicePort;
use serde::{Deserialize, Serialize};

use meshgate_reconcile::PolicyConfig;

/// The slice of the mesh custom resource the egress component reads.
///
/// ```yaml
/// name: mesh
/// namespace: istio-system
/// multiMesh: true
/// gateways:
///   enabled: true
///   egress:
///     enabled: true
///     createOnly: false
///     maxReplicas: 5
///     ports:
///       - name: http2
///         port: 80
///         targetPort: 8080
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    pub name: String,
    pub namespace: String,
    /// UID of the owning mesh object; owner references are only set when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub multi_mesh: Option<bool>,
    #[serde(default)]
    pub gateways: GatewaysConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaysConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub egress: EgressConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub create_only: Option<bool>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub min_replicas: Option<i32>,
    #[serde(default)]
    pub max_replicas: Option<i32>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

impl MeshConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let cfg: MeshConfig = serde_yaml::from_str(yaml).context("parsing mesh config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("loading mesh config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("mesh config missing name"));
        }
        if self.namespace.is_empty() {
            return Err(anyhow!("mesh config missing namespace"));
        }
        Ok(())
    }

    /// Unset switches read as `false`. The gateway needs both the global and
    /// the egress switch; the multi-mesh gateway only the egress one.
    pub fn policy(&self) -> PolicyConfig {
        let egress = &self.gateways.egress;
        PolicyConfig {
            enabled: self.gateways.enabled.unwrap_or(false) && egress.enabled.unwrap_or(false),
            component_enabled: egress.enabled.unwrap_or(false),
            create_only: egress.create_only.unwrap_or(false),
            multi_mesh_enabled: self.multi_mesh.unwrap_or(false),
        }
    }
}

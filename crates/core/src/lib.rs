//! meshgate core types: resource documents, field paths and the lifecycle
//! enums shared by the matcher and the reconciler.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod document;
pub mod path;

pub use document::{DocumentError, Node, ResourceDocument, YamlBudget};
pub use path::{FieldPath, PathParseError, PathPattern, PatternSegment, Segment};

pub mod prelude {
    pub use super::{Action, DesiredState, FieldPath, Node, ObjectKey, ObjectKind, PathPattern, ResourceDocument};
}

/// Group/version/kind of a cluster object. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct InvalidGvkKey(pub String);

impl ObjectKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Split `apiVersion` (`v1` or `group/v1`) into group and version.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self { group, version, kind: kind.to_string() }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

impl FromStr for ObjectKind {
    type Err = InvalidGvkKey;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(ObjectKind::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(ObjectKind::new(*group, *version, *kind)),
            _ => Err(InvalidGvkKey(key.to_string())),
        }
    }
}

/// Name plus optional namespace (cluster-scoped objects have none).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Lifecycle intent for one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// Create if missing, update if different.
    Present,
    /// Create if missing, never update.
    Exists,
    /// Delete if present.
    Absent,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            DesiredState::Present => "present",
            DesiredState::Exists => "exists",
            DesiredState::Absent => "absent",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Action {
    pub fn is_write(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::NoOp => "noop",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_key_parses_core_and_group() {
        let core: ObjectKind = "v1/ConfigMap".parse().expect("ok");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
        let apps: ObjectKind = "apps/v1/Deployment".parse().expect("ok");
        assert_eq!(apps.api_version(), "apps/v1");
        assert_eq!(apps.to_string(), "apps/v1/Deployment");
    }

    #[test]
    fn gvk_key_invalid_returns_err() {
        assert!("invalid".parse::<ObjectKind>().is_err());
        assert!("".parse::<ObjectKind>().is_err());
        assert!("a/b/c/d".parse::<ObjectKind>().is_err());
        assert!("v1/".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn from_api_version_splits_group() {
        let k = ObjectKind::from_api_version("istio.banzaicloud.io/v1beta1", "MeshGateway");
        assert_eq!(k.group, "istio.banzaicloud.io");
        assert_eq!(k.version, "v1beta1");
        assert_eq!(ObjectKind::from_api_version("v1", "Service").group, "");
    }

    #[test]
    fn object_key_renders_namespace_when_present() {
        assert_eq!(ObjectKey::namespaced("istio-system", "gw").to_string(), "istio-system/gw");
        assert_eq!(ObjectKey::cluster("node-1").to_string(), "node-1");
    }

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Action::NoOp).unwrap(), serde_json::json!("noop"));
        assert_eq!(serde_json::to_value(DesiredState::Exists).unwrap(), serde_json::json!("exists"));
        assert!(!Action::NoOp.is_write());
        assert!(Action::Delete.is_write());
    }
}

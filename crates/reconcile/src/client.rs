//! Seams to the outside world: the cluster client and the spec builder.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value as Json;

use meshgate_core::{DesiredState, ObjectKey, ObjectKind, ResourceDocument};

/// Source and sink of resource documents. Typed and dynamic clients both fit.
///
/// Implementations own transport concerns (timeouts, retries, back-off); the
/// reconciler calls each method at most once per pass.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<Option<ResourceDocument>>;

    async fn create(&self, desired: &ResourceDocument) -> Result<()>;

    /// Apply `patch`, a JSON merge patch built from the desired document.
    async fn update(&self, desired: &ResourceDocument, patch: &Json) -> Result<()>;

    async fn delete(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: ClusterClient + ?Sized> ClusterClient for Arc<T> {
    async fn get(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<Option<ResourceDocument>> {
        (**self).get(kind, key).await
    }

    async fn create(&self, desired: &ResourceDocument) -> Result<()> {
        (**self).create(desired).await
    }

    async fn update(&self, desired: &ResourceDocument, patch: &Json) -> Result<()> {
        (**self).update(desired, patch).await
    }

    async fn delete(&self, kind: &ObjectKind, key: &ObjectKey) -> Result<()> {
        (**self).delete(kind, key).await
    }
}

/// Client call being attempted, carried in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Turns configuration into one desired document plus its lifecycle state.
pub trait SpecBuilder: Send + Sync {
    type Config: ?Sized;

    /// Short name used in error context.
    fn name(&self) -> &str;

    /// Kind of the document `build_desired` produces.
    fn kind(&self) -> ObjectKind;

    fn desired_state(&self, config: &Self::Config) -> DesiredState;

    fn build_desired(&self, config: &Self::Config) -> Result<ResourceDocument>;
}

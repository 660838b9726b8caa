//! Ignore rules (paths never compared) and the per-kind table of values the
//! control plane is known to default when a field is omitted.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use meshgate_core::{FieldPath, InvalidGvkKey, Node, ObjectKind, PathPattern};

/// Fields the API server owns. Typed builders tend to emit some of them
/// (`creationTimestamp: null`, an empty `status`), so they are skipped even
/// when the desired document carries them.
pub const SERVER_MANAGED_FIELDS: &[&str] = &[
    "metadata.uid",
    "metadata.resourceVersion",
    "metadata.generation",
    "metadata.creationTimestamp",
    "metadata.managedFields",
    "metadata.selfLink",
    "metadata.deletionTimestamp",
    "metadata.deletionGracePeriodSeconds",
    "status",
];

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("could not parse defaults file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Kind(#[from] InvalidGvkKey),
}

/// Path prefixes excluded from comparison.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<PathPattern>,
}

impl IgnoreRules {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn server_managed() -> Self {
        Self { patterns: SERVER_MANAGED_FIELDS.iter().filter_map(|s| s.parse().ok()).collect() }
    }

    pub fn with(mut self, pattern: PathPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    /// A path is ignored when any rule matches it or one of its ancestors.
    pub fn is_ignored(&self, path: &FieldPath) -> bool {
        self.patterns.iter().any(|p| p.is_prefix_of(path))
    }
}

/// One entry of a defaults file.
///
/// ```yaml
/// - kind: istio.banzaicloud.io/v1beta1/MeshGateway
///   path: spec.ports[*].protocol
///   value: TCP
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultEntry {
    pub kind: String,
    pub path: PathPattern,
    pub value: Node,
}

/// Known server-side defaults keyed by kind and path pattern.
///
/// A desired field that is absent from the live object still matches when
/// the table holds an identical default for it. Nothing is guessed: kinds
/// without entries get strict comparison.
#[derive(Debug, Clone, Default)]
pub struct DefaultsTable {
    by_kind: FxHashMap<ObjectKind, Vec<(PathPattern, Node)>>,
}

impl DefaultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &ObjectKind, path: PathPattern, value: impl Into<Node>) -> &mut Self {
        self.by_kind.entry(kind.clone()).or_default().push((path, value.into()));
        self
    }

    pub fn from_entries(entries: Vec<DefaultEntry>) -> Result<Self, RulesError> {
        let mut table = Self::new();
        for e in entries {
            let kind: ObjectKind = e.kind.parse()?;
            table.register(&kind, e.path, e.value);
        }
        Ok(table)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, RulesError> {
        let entries: Vec<DefaultEntry> = serde_yaml::from_str(yaml)?;
        Self::from_entries(entries)
    }

    /// Add every entry of `other`; existing entries are kept.
    pub fn extend(&mut self, other: DefaultsTable) {
        for (kind, rules) in other.by_kind {
            self.by_kind.entry(kind).or_default().extend(rules);
        }
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allows(&self, kind: &ObjectKind, path: &FieldPath, desired: &Node) -> bool {
        self.by_kind
            .get(kind)
            .map(|rules| rules.iter().any(|(p, v)| p.matches(path) && v.semantic_eq(desired)))
            .unwrap_or(false)
    }
}

//! Resource documents: a schema-less, canonical tree form of one cluster object.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value as Json};

use crate::path::{FieldPath, Segment};
use crate::{ObjectKey, ObjectKind};

/// Limits applied to YAML input before it becomes a document.
///
/// `MESHGATE_MAX_YAML_BYTES` and `MESHGATE_MAX_YAML_NODES` override the
/// defaults; unparsable values are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YamlBudget {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for YamlBudget {
    fn default() -> Self {
        Self { max_bytes: 1 << 20, max_nodes: 100_000 }
    }
}

impl YamlBudget {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok()?.trim().parse::<usize>().ok();
        let base = Self::default();
        Self {
            max_bytes: read("MESHGATE_MAX_YAML_BYTES").unwrap_or(base.max_bytes),
            max_nodes: read("MESHGATE_MAX_YAML_NODES").unwrap_or(base.max_nodes),
        }
    }

    /// True once the tree holds more than `max_nodes` values. Stops
    /// counting at the limit and never recurses.
    fn too_many_nodes(&self, root: &Json) -> bool {
        let mut pending = vec![root];
        let mut seen = 0usize;
        while let Some(v) = pending.pop() {
            seen += 1;
            if seen > self.max_nodes {
                return true;
            }
            match v {
                Json::Object(map) => pending.extend(map.values()),
                Json::Array(items) => pending.extend(items),
                _ => {}
            }
        }
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("could not serialize object: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("document root must be a mapping, found {0}")]
    NotAMapping(&'static str),
    #[error("document missing {0}")]
    MissingField(&'static str),
    #[error("YAML payload too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("YAML document too complex (>{0} nodes)")]
    TooComplex(usize),
}

/// One node of a document tree. Mapping keys are kept sorted, sequence order
/// is significant.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<Node>),
    Mapping(BTreeMap<String, Node>),
}

impl Node {
    /// Canonicalize any serializable value.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Node, DocumentError> {
        Ok(Node::from(serde_json::to_value(value)?))
    }

    pub fn to_json(&self) -> Json {
        match self {
            Node::Null => Json::Null,
            Node::Bool(b) => Json::Bool(*b),
            Node::Number(n) => Json::Number(n.clone()),
            Node::String(s) => Json::String(s.clone()),
            Node::Sequence(items) => Json::Array(items.iter().map(Node::to_json).collect()),
            Node::Mapping(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Empty mapping or empty sequence.
    pub fn is_empty_composite(&self) -> bool {
        match self {
            Node::Mapping(m) => m.is_empty(),
            Node::Sequence(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    pub fn lookup(&self, path: &FieldPath) -> Option<&Node> {
        path.segments().iter().try_fold(self, |node, seg| match (node, seg) {
            (Node::Mapping(m), Segment::Key(k)) => m.get(k),
            (Node::Sequence(s), Segment::Index(i)) => s.get(*i),
            _ => None,
        })
    }

    pub fn node_count(&self) -> usize {
        1 + match self {
            Node::Sequence(items) => items.iter().map(Node::node_count).sum(),
            Node::Mapping(map) => map.values().map(Node::node_count).sum(),
            _ => 0,
        }
    }

    /// Value equality with numeric normalization (`1 == 1.0`).
    pub fn semantic_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Number(a), Node::Number(b)) => numbers_equal(a, b),
            (Node::Sequence(a), Node::Sequence(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantic_eq(y))
            }
            (Node::Mapping(a), Node::Mapping(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map(|w| v.semantic_eq(w)).unwrap_or(false))
            }
            (a, b) => a == b,
        }
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl From<Json> for Node {
    fn from(v: Json) -> Self {
        match v {
            Json::Null => Node::Null,
            Json::Bool(b) => Node::Bool(b),
            Json::Number(n) => Node::Number(n),
            Json::String(s) => Node::String(s),
            Json::Array(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Json::Object(map) => Node::Mapping(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect()),
        }
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n.into())
    }
}

impl From<u64> for Node {
    fn from(n: u64) -> Self {
        Node::Number(n.into())
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Node::from)
    }
}

/// A cluster object: kind + identity + canonical body.
///
/// Identity is read from `apiVersion`, `kind`, `metadata.name` and
/// `metadata.namespace` once at construction and kept next to the body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    kind: ObjectKind,
    key: ObjectKey,
    body: Node,
}

impl ResourceDocument {
    pub fn from_node(body: Node) -> Result<Self, DocumentError> {
        if !matches!(body, Node::Mapping(_)) {
            return Err(DocumentError::NotAMapping(body.type_name()));
        }
        let api_version = body.get("apiVersion").and_then(Node::as_str).ok_or(DocumentError::MissingField("apiVersion"))?;
        let kind = body.get("kind").and_then(Node::as_str).ok_or(DocumentError::MissingField("kind"))?;
        let meta = body.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(Node::as_str)
            .ok_or(DocumentError::MissingField("metadata.name"))?;
        let namespace = meta.and_then(|m| m.get("namespace")).and_then(Node::as_str).map(str::to_string);
        Ok(Self {
            kind: ObjectKind::from_api_version(api_version, kind),
            key: ObjectKey { namespace, name: name.to_string() },
            body,
        })
    }

    pub fn from_json(v: Json) -> Result<Self, DocumentError> {
        Self::from_node(Node::from(v))
    }

    /// Canonicalize a typed object (e.g. a k8s-openapi struct).
    pub fn from_object<T: Serialize + ?Sized>(obj: &T) -> Result<Self, DocumentError> {
        Self::from_node(Node::from_serializable(obj)?)
    }

    /// Parse YAML (or JSON) within [`YamlBudget::from_env`].
    pub fn from_yaml(yaml: &str) -> Result<Self, DocumentError> {
        Self::from_yaml_within(yaml, YamlBudget::from_env())
    }

    pub fn from_yaml_within(yaml: &str, budget: YamlBudget) -> Result<Self, DocumentError> {
        if yaml.len() > budget.max_bytes {
            return Err(DocumentError::TooLarge(budget.max_bytes));
        }
        let json = serde_json::to_value(serde_yaml::from_str::<serde_yaml::Value>(yaml)?)?;
        if budget.too_many_nodes(&json) {
            return Err(DocumentError::TooComplex(budget.max_nodes));
        }
        Self::from_json(json)
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn body(&self) -> &Node {
        &self.body
    }

    pub fn into_body(self) -> Node {
        self.body
    }

    pub fn to_json(&self) -> Json {
        self.body.to_json()
    }

    pub fn same_identity(&self, other: &ResourceDocument) -> bool {
        self.kind == other.kind && self.key == other.key
    }

    /// Set `metadata.namespace`, keeping identity and body in step.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        if let Node::Mapping(root) = &mut self.body {
            let meta = root.entry("metadata".to_string()).or_insert_with(|| Node::Mapping(BTreeMap::new()));
            if let Node::Mapping(m) = meta {
                m.insert("namespace".to_string(), Node::from(namespace));
            }
        }
        self.key.namespace = Some(namespace.to_string());
        self
    }
}

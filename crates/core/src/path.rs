//! Field paths (concrete addresses inside a document) and path patterns
//! (the same syntax plus `*` / `[*]` wildcards).
//!
//! Syntax: `spec.ports[0].name`. Keys containing `.`, `[`, `]` or `"` are
//! written bracket-quoted: `metadata.annotations["sidecar.istio.io/inject"]`.
//! The root path renders as `.`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Structural address of a node inside a resource document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(SmallVec<[Segment; 8]>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),
    #[error("unterminated bracket in path {0:?}")]
    Unterminated(String),
    #[error("invalid index {index:?} in path {path:?}")]
    InvalidIndex { path: String, index: String },
    #[error("wildcards are not allowed in a concrete path: {0:?}")]
    Wildcard(String),
}

impl FieldPath {
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn push_key(&mut self, key: impl Into<String>) {
        self.0.push(Segment::Key(key.into()));
    }

    pub fn push_index(&mut self, index: usize) {
        self.0.push(Segment::Index(index));
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.0.pop()
    }

    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut p = self.clone();
        p.push_key(key);
        p
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut p = self.clone();
        p.push_index(index);
        p
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Cut the path before its first sequence index. Merge patches replace
    /// sequences whole, so a change at `spec.ports[1].name` has to be written
    /// as `spec.ports`.
    pub fn truncate_at_first_index(&self) -> FieldPath {
        let end = self
            .0
            .iter()
            .position(|s| matches!(s, Segment::Index(_)))
            .unwrap_or(self.0.len());
        FieldPath(self.0[..end].iter().cloned().collect())
    }
}

impl FromIterator<Segment> for FieldPath {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        FieldPath(iter.into_iter().collect())
    }
}

fn needs_quoting(key: &str) -> bool {
    key.is_empty() || key == "*" || key.contains(['.', '[', ']', '"'])
}

// Inside quotes, `"` and `\` are backslash-escaped.
fn write_key(f: &mut fmt::Formatter<'_>, key: &str, first: bool) -> fmt::Result {
    if needs_quoting(key) {
        f.write_str("[\"")?;
        for c in key.chars() {
            if matches!(c, '"' | '\\') {
                f.write_str("\\")?;
            }
            write!(f, "{}", c)?;
        }
        f.write_str("\"]")
    } else {
        if !first {
            f.write_str(".")?;
        }
        f.write_str(key)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                Segment::Key(k) => write_key(f, k, i == 0)?,
                Segment::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        tokenize(s)?
            .into_iter()
            .map(|t| match t {
                PatternSegment::Key(k) => Ok(Segment::Key(k)),
                PatternSegment::Index(n) => Ok(Segment::Index(n)),
                PatternSegment::AnyKey | PatternSegment::AnyIndex => Err(PathParseError::Wildcard(s.to_string())),
            })
            .collect()
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternSegment {
    Key(String),
    Index(usize),
    /// `*`: any mapping key
    AnyKey,
    /// `[*]`: any sequence index
    AnyIndex,
}

impl PatternSegment {
    fn matches(&self, seg: &Segment) -> bool {
        match (self, seg) {
            (PatternSegment::Key(a), Segment::Key(b)) => a == b,
            (PatternSegment::Index(a), Segment::Index(b)) => a == b,
            (PatternSegment::AnyKey, Segment::Key(_)) => true,
            (PatternSegment::AnyIndex, Segment::Index(_)) => true,
            _ => false,
        }
    }
}

/// Field path with optional wildcards, used to scope ignore and default rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PathPattern(Vec<PatternSegment>);

impl PathPattern {
    pub fn segments(&self) -> &[PatternSegment] {
        &self.0
    }

    /// Exact match: same length, every segment matches.
    pub fn matches(&self, path: &FieldPath) -> bool {
        self.0.len() == path.len() && self.is_prefix_of(path)
    }

    /// The pattern matches `path` or one of its ancestors.
    pub fn is_prefix_of(&self, path: &FieldPath) -> bool {
        self.0.len() <= path.len() && self.0.iter().zip(path.segments()).all(|(p, s)| p.matches(s))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PatternSegment::Key(k) => write_key(f, k, i == 0)?,
                PatternSegment::Index(n) => write!(f, "[{}]", n)?,
                PatternSegment::AnyKey => f.write_str(if i == 0 { "*" } else { ".*" })?,
                PatternSegment::AnyIndex => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PathPattern {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        tokenize(s).map(PathPattern)
    }
}

impl From<&FieldPath> for PathPattern {
    fn from(p: &FieldPath) -> Self {
        PathPattern(
            p.segments()
                .iter()
                .map(|s| match s {
                    Segment::Key(k) => PatternSegment::Key(k.clone()),
                    Segment::Index(n) => PatternSegment::Index(*n),
                })
                .collect(),
        )
    }
}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn tokenize(input: &str) -> Result<Vec<PatternSegment>, PathParseError> {
    let mut rest = input.strip_prefix('.').unwrap_or(input);
    let mut out = Vec::new();
    let mut first = true;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let (seg, remaining) = parse_bracket(after, input)?;
            out.push(seg);
            rest = remaining;
        } else {
            let body = if first {
                rest
            } else {
                rest.strip_prefix('.').ok_or_else(|| PathParseError::EmptySegment(input.to_string()))?
            };
            let end = body.find(['.', '[']).unwrap_or(body.len());
            let key = &body[..end];
            if key.is_empty() {
                return Err(PathParseError::EmptySegment(input.to_string()));
            }
            out.push(if key == "*" { PatternSegment::AnyKey } else { PatternSegment::Key(key.to_string()) });
            rest = &body[end..];
        }
        first = false;
    }
    Ok(out)
}

fn parse_bracket<'a>(after: &'a str, input: &str) -> Result<(PatternSegment, &'a str), PathParseError> {
    if let Some(quoted) = after.strip_prefix('"') {
        let (key, rest) = unquote(quoted).ok_or_else(|| PathParseError::Unterminated(input.to_string()))?;
        let remaining = rest.strip_prefix(']').ok_or_else(|| PathParseError::Unterminated(input.to_string()))?;
        return Ok((PatternSegment::Key(key), remaining));
    }
    let close = after.find(']').ok_or_else(|| PathParseError::Unterminated(input.to_string()))?;
    let inner = &after[..close];
    let seg = if inner == "*" {
        PatternSegment::AnyIndex
    } else {
        let n = inner.parse::<usize>().map_err(|_| PathParseError::InvalidIndex {
            path: input.to_string(),
            index: inner.to_string(),
        })?;
        PatternSegment::Index(n)
    };
    Ok((seg, &after[close + 1..]))
}

/// Key up to the closing quote, with escapes resolved, and the text after it.
fn unquote(quoted: &str) -> Option<(String, &str)> {
    let mut key = String::new();
    let mut chars = quoted.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((key, &quoted[i + 1..])),
            '\\' => key.push(chars.next()?.1),
            _ => key.push(c),
        }
    }
    None
}

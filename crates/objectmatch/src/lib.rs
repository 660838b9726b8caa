//! meshgate objectmatch: decides whether a live object already satisfies a
//! desired one.
//!
//! The comparison is desired-relative. Every field the desired document
//! declares must be present in the live object with an equal value; fields
//! only the live object carries (server defaults, generated ids, status,
//! fields other controllers own) never count as a difference. Sequences are
//! compared by position up to the desired length.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use meshgate_core::{DocumentError, FieldPath, Node, ObjectKind, ResourceDocument};

pub mod patch;
pub mod rules;

pub use patch::build_merge_patch;
pub use rules::{DefaultEntry, DefaultsTable, IgnoreRules, RulesError, SERVER_MANAGED_FIELDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Live,
    Desired,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Live => "live",
            Side::Desired => "desired",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("could not canonicalize {side} object")]
    Serialize {
        side: Side,
        #[source]
        source: DocumentError,
    },
    #[error("cannot match live {live} against desired {desired}: identities differ")]
    IdentityMismatch { live: String, desired: String },
}

/// Result of one comparison. `is_equal()` is derived from the diff set, so
/// the two can never disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchVerdict {
    diff_paths: BTreeSet<FieldPath>,
}

impl MatchVerdict {
    pub fn from_paths(paths: impl IntoIterator<Item = FieldPath>) -> Self {
        Self { diff_paths: paths.into_iter().collect() }
    }

    pub fn is_equal(&self) -> bool {
        self.diff_paths.is_empty()
    }

    pub fn diff_paths(&self) -> &BTreeSet<FieldPath> {
        &self.diff_paths
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.diff_paths.contains(path)
    }

    pub fn into_diff_paths(self) -> BTreeSet<FieldPath> {
        self.diff_paths
    }
}

impl Serialize for MatchVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("MatchVerdict", 2)?;
        s.serialize_field("equal", &self.is_equal())?;
        s.serialize_field("diffPaths", &self.diff_paths)?;
        s.end()
    }
}

/// Semantic matcher. Cheap to clone; holds only configuration.
#[derive(Debug, Clone)]
pub struct Matcher {
    ignore: IgnoreRules,
    defaults: DefaultsTable,
}

impl Default for Matcher {
    fn default() -> Self {
        Self { ignore: IgnoreRules::server_managed(), defaults: DefaultsTable::new() }
    }
}

impl Matcher {
    pub fn new(ignore: IgnoreRules, defaults: DefaultsTable) -> Self {
        Self { ignore, defaults }
    }

    pub fn with_defaults(mut self, defaults: DefaultsTable) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn defaults(&self) -> &DefaultsTable {
        &self.defaults
    }

    pub fn ignore(&self) -> &IgnoreRules {
        &self.ignore
    }

    /// Compare two documents of the same kind and identity.
    pub fn match_documents(&self, live: &ResourceDocument, desired: &ResourceDocument) -> Result<MatchVerdict, MatchError> {
        if !live.same_identity(desired) {
            return Err(MatchError::IdentityMismatch {
                live: format!("{} {}", live.kind(), live.key()),
                desired: format!("{} {}", desired.kind(), desired.key()),
            });
        }
        let mut diff_paths = BTreeSet::new();
        let mut path = FieldPath::root();
        self.walk(desired.kind(), &mut path, Some(live.body()), desired.body(), &mut diff_paths);
        Ok(MatchVerdict { diff_paths })
    }

    /// Canonicalize two typed objects through serde, then compare them.
    pub fn match_objects<L, D>(&self, live: &L, desired: &D) -> Result<MatchVerdict, MatchError>
    where
        L: Serialize + ?Sized,
        D: Serialize + ?Sized,
    {
        let live = ResourceDocument::from_object(live).map_err(|source| MatchError::Serialize { side: Side::Live, source })?;
        let desired =
            ResourceDocument::from_object(desired).map_err(|source| MatchError::Serialize { side: Side::Desired, source })?;
        self.match_documents(&live, &desired)
    }

    fn walk(&self, kind: &ObjectKind, path: &mut FieldPath, live: Option<&Node>, desired: &Node, out: &mut BTreeSet<FieldPath>) {
        if self.ignore.is_ignored(path) {
            return;
        }
        // A desired null declares nothing.
        if desired.is_null() {
            return;
        }
        let Some(live) = live.filter(|n| !n.is_null()) else {
            if desired.is_empty_composite() || self.defaults.allows(kind, path, desired) {
                return;
            }
            out.insert(path.clone());
            return;
        };
        match (live, desired) {
            (Node::Mapping(lm), Node::Mapping(dm)) => {
                for (k, dv) in dm {
                    path.push_key(k.clone());
                    self.walk(kind, path, lm.get(k), dv, out);
                    path.pop();
                }
            }
            (Node::Sequence(ls), Node::Sequence(ds)) => {
                for (i, dv) in ds.iter().enumerate() {
                    path.push_index(i);
                    self.walk(kind, path, ls.get(i), dv, out);
                    path.pop();
                }
            }
            (l, d) => {
                if !l.semantic_eq(d) {
                    out.insert(path.clone());
                }
            }
        }
    }
}

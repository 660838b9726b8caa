//! JSON merge patch (RFC 7386) carrying only the desired-owned fields that
//! differ.

use serde_json::{Map, Value as Json};

use meshgate_core::{FieldPath, Node, ResourceDocument, Segment};

use crate::MatchVerdict;

/// Build a merge patch from the diff paths of `verdict`.
///
/// Merge patches cannot address single sequence elements, so each path is cut
/// before its first index and the whole sequence is written. That sequence is
/// the live one with the desired elements laid over it position by position:
/// live-only fields inside elements and live elements past the desired length
/// survive the write. Live-only mapping fields are never mentioned and so are
/// left alone by the server.
pub fn build_merge_patch(live: &ResourceDocument, desired: &ResourceDocument, verdict: &MatchVerdict) -> Json {
    let mut patch = Json::Object(Map::new());
    for path in verdict.diff_paths() {
        let target = path.truncate_at_first_index();
        if target.is_root() {
            return overlay(live.body(), desired.body());
        }
        let Some(want) = desired.body().lookup(&target) else { continue };
        let value = match live.body().lookup(&target) {
            Some(have @ Node::Sequence(_)) if target.len() < path.len() => overlay(have, want),
            _ => want.to_json(),
        };
        insert_at(&mut patch, &target, value);
    }
    patch
}

/// `desired` written over `live`. Desired nulls declare nothing.
fn overlay(live: &Node, desired: &Node) -> Json {
    match (live, desired) {
        (_, Node::Null) => live.to_json(),
        (Node::Mapping(lm), Node::Mapping(dm)) => {
            let mut out: Map<String, Json> = lm.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
            for (k, dv) in dm.iter().filter(|(_, v)| !v.is_null()) {
                let merged = match lm.get(k) {
                    Some(lv) if !lv.is_null() => overlay(lv, dv),
                    _ => dv.to_json(),
                };
                out.insert(k.clone(), merged);
            }
            Json::Object(out)
        }
        (Node::Sequence(ls), Node::Sequence(ds)) => {
            let mut out: Vec<Json> = ds
                .iter()
                .enumerate()
                .map(|(i, dv)| match ls.get(i) {
                    Some(lv) if !lv.is_null() => overlay(lv, dv),
                    _ => dv.to_json(),
                })
                .collect();
            out.extend(ls.iter().skip(ds.len()).map(Node::to_json));
            Json::Array(out)
        }
        (_, d) => d.to_json(),
    }
}

fn insert_at(patch: &mut Json, path: &FieldPath, value: Json) {
    let segs = path.segments();
    let mut cur = patch;
    for (i, seg) in segs.iter().enumerate() {
        let Segment::Key(key) = seg else { return };
        // an ancestor was already written as a whole value
        let Json::Object(obj) = cur else { return };
        if i + 1 == segs.len() {
            obj.insert(key.clone(), value);
            return;
        }
        cur = obj.entry(key.clone()).or_insert_with(|| Json::Object(Map::new()));
    }
}

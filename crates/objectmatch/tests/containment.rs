#![forbid(unsafe_code)]

use meshgate_core::{FieldPath, Node, ResourceDocument};
use meshgate_objectmatch::{build_merge_patch, DefaultsTable, Matcher};
use serde_json::json;

fn desired() -> serde_json::Value {
    json!({
        "apiVersion": "istio.banzaicloud.io/v1beta1",
        "kind": "MeshGateway",
        "metadata": {
            "name": "istio-egressgateway",
            "namespace": "istio-system",
            "labels": { "app": "istio-egressgateway", "istio": "egressgateway" }
        },
        "spec": {
            "type": "egress",
            "minReplicas": 1,
            "maxReplicas": 5,
            "ports": [
                { "name": "http2", "port": 80, "targetPort": 8080 },
                { "name": "https", "port": 443, "targetPort": 8443 }
            ],
            "labels": { "app": "istio-egressgateway" }
        }
    })
}

fn doc(v: serde_json::Value) -> ResourceDocument {
    ResourceDocument::from_json(v).expect("valid document")
}

/// Every leaf path of a node, in walk order.
fn leaves(node: &Node, path: &mut FieldPath, out: &mut Vec<FieldPath>) {
    match node {
        Node::Mapping(m) if !m.is_empty() => {
            for (k, v) in m {
                path.push_key(k.clone());
                leaves(v, path, out);
                path.pop();
            }
        }
        Node::Sequence(s) if !s.is_empty() => {
            for (i, v) in s.iter().enumerate() {
                path.push_index(i);
                leaves(v, path, out);
                path.pop();
            }
        }
        _ => out.push(path.clone()),
    }
}

fn pointer(path: &FieldPath) -> String {
    path.segments()
        .iter()
        .map(|s| match s {
            meshgate_core::Segment::Key(k) => format!("/{}", k),
            meshgate_core::Segment::Index(i) => format!("/{}", i),
        })
        .collect()
}

#[test]
fn extra_live_fields_never_break_equality() {
    let mut live = desired();
    live["metadata"]["uid"] = json!("2b7c8f0e-0000-0000-0000-000000000001");
    live["metadata"]["resourceVersion"] = json!("48213");
    live["metadata"]["annotations"] = json!({ "kubectl.kubernetes.io/last-applied-configuration": "{}" });
    live["metadata"]["labels"]["pod-template-hash"] = json!("abc");
    live["spec"]["ports"][0]["protocol"] = json!("TCP");
    live["spec"]["ports"].as_array_mut().unwrap().push(json!({ "name": "status-port", "port": 15021 }));
    live["spec"]["serviceType"] = json!("ClusterIP");
    live["status"] = json!({ "Status": "Available", "GatewayAddress": ["10.0.0.1"] });

    let v = Matcher::default().match_documents(&doc(live), &doc(desired())).unwrap();
    assert!(v.is_equal(), "unexpected diffs: {:?}", v.diff_paths());
}

#[test]
fn every_changed_leaf_is_reported_exactly() {
    let base = doc(desired());
    let mut paths = Vec::new();
    leaves(base.body(), &mut FieldPath::root(), &mut paths);
    assert!(paths.len() > 10);

    for path in paths {
        // identity fields cannot change without changing identity
        let s = path.to_string();
        if s == "apiVersion" || s == "kind" || s == "metadata.name" || s == "metadata.namespace" {
            continue;
        }
        let mut live = desired();
        *live.pointer_mut(&pointer(&path)).expect("leaf exists") = json!("changed-value");
        let v = Matcher::default().match_documents(&doc(live), &base).unwrap();
        assert!(!v.is_equal(), "change at {} went unnoticed", s);
        assert_eq!(v.diff_paths().len(), 1, "diffs for {}: {:?}", s, v.diff_paths());
        assert!(v.contains(&path), "diffs for {}: {:?}", s, v.diff_paths());
    }
}

#[test]
fn removed_live_leaf_is_reported() {
    let mut live = desired();
    live["spec"].as_object_mut().unwrap().remove("maxReplicas");
    let v = Matcher::default().match_documents(&doc(live), &doc(desired())).unwrap();
    assert_eq!(v.diff_paths().iter().map(|p| p.to_string()).collect::<Vec<_>>(), vec!["spec.maxReplicas"]);
}

#[test]
fn numeric_representation_does_not_matter() {
    let mut live = desired();
    live["spec"]["minReplicas"] = json!(1.0);
    let v = Matcher::default().match_documents(&doc(live), &doc(desired())).unwrap();
    assert!(v.is_equal());
}

#[test]
fn registered_default_absorbs_omitted_protocol() {
    let mut want = desired();
    want["spec"]["ports"][0]["protocol"] = json!("TCP");
    let d = doc(want);

    let strict = Matcher::default();
    assert!(!strict.match_documents(&doc(desired()), &d).unwrap().is_equal());

    let mut defaults = DefaultsTable::new();
    defaults.register(d.kind(), "spec.ports[*].protocol".parse().unwrap(), "TCP");
    let lenient = Matcher::default().with_defaults(defaults);
    assert!(lenient.match_documents(&doc(desired()), &d).unwrap().is_equal());
}

#[test]
fn patch_from_verdict_converges() {
    let mut live = desired();
    live["spec"]["maxReplicas"] = json!(2);
    live["spec"]["labels"]["app"] = json!("other");
    live["spec"]["serviceType"] = json!("ClusterIP");
    let d = doc(desired());
    let m = Matcher::default();
    let v = m.match_documents(&doc(live.clone()), &d).unwrap();
    assert_eq!(v.diff_paths().len(), 2);

    let patch = build_merge_patch(&doc(live.clone()), &d, &v);
    json_patch::merge(&mut live, &patch);
    assert_eq!(live["spec"]["serviceType"], json!("ClusterIP"));
    assert!(m.match_documents(&doc(live), &d).unwrap().is_equal());
}

#[test]
fn sequence_patch_preserves_live_only_elements_and_fields() {
    let mut live = desired();
    live["spec"]["ports"][0]["nodePort"] = json!(30080);
    live["spec"]["ports"][1]["protocol"] = json!("TCP");
    live["spec"]["ports"].as_array_mut().unwrap().push(json!({ "name": "status-port", "port": 15021 }));
    live["spec"]["ports"][0]["targetPort"] = json!(9090);
    let d = doc(desired());
    let m = Matcher::default();
    let v = m.match_documents(&doc(live.clone()), &d).unwrap();
    assert_eq!(v.diff_paths().iter().map(|p| p.to_string()).collect::<Vec<_>>(), vec!["spec.ports[0].targetPort"]);

    let patch = build_merge_patch(&doc(live.clone()), &d, &v);
    json_patch::merge(&mut live, &patch);
    let ports = live["spec"]["ports"].as_array().unwrap();
    assert_eq!(ports.len(), 3);
    assert_eq!(ports[0]["targetPort"], json!(8080));
    assert_eq!(ports[0]["nodePort"], json!(30080));
    assert_eq!(ports[1]["protocol"], json!("TCP"));
    assert_eq!(ports[2]["name"], json!("status-port"));
    assert!(m.match_documents(&doc(live), &d).unwrap().is_equal());
}

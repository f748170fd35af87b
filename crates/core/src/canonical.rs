//! Canonical text form of an object, used as diff input.
//!
//! Mappings are written with keys sorted at every depth so that two
//! structurally equal objects always produce byte-identical YAML, whatever
//! order their fields arrived in.

use serde_json::Value as Json;
use serde_yaml::{Mapping, Value as Yaml};

use crate::WatchError;

pub fn to_canonical_yaml(v: &Json) -> Result<String, WatchError> {
    serde_yaml::to_string(&canonicalize(v)).map_err(|e| WatchError::Serialization(e.to_string()))
}

fn canonicalize(v: &Json) -> Yaml {
    match v {
        Json::Null => Yaml::Null,
        Json::Bool(b) => Yaml::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Yaml::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Yaml::Number(u.into())
            } else {
                Yaml::Number(n.as_f64().unwrap_or_default().into())
            }
        }
        Json::String(s) => Yaml::String(s.clone()),
        Json::Array(items) => Yaml::Sequence(items.iter().map(canonicalize).collect()),
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Mapping::with_capacity(keys.len());
            for k in keys {
                out.insert(Yaml::String(k.clone()), canonicalize(&map[k]));
            }
            Yaml::Mapping(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_text() {
        let a: Json = serde_json::from_str(r#"{"b":{"y":2,"x":1},"a":[{"q":1,"p":2}],"c":null}"#).unwrap();
        let b: Json = serde_json::from_str(r#"{"c":null,"a":[{"p":2,"q":1}],"b":{"x":1,"y":2}}"#).unwrap();
        assert_eq!(to_canonical_yaml(&a).unwrap(), to_canonical_yaml(&b).unwrap());
    }

    #[test]
    fn keys_are_sorted_and_nothing_is_dropped() {
        let v = json!({
            "spec": { "replicas": 3 },
            "metadata": { "name": "web", "managedFields": [ { "manager": "kubectl" } ], "resourceVersion": "7" },
            "status": { "ready": true },
            "apiVersion": "apps/v1"
        });
        let text = to_canonical_yaml(&v).unwrap();
        let top: Vec<&str> = text.lines().filter(|l| !l.starts_with(' ') && !l.starts_with('-')).collect();
        assert_eq!(top, vec!["apiVersion: apps/v1", "metadata:", "spec:", "status:"]);
        assert!(text.contains("managedFields"));
        assert!(text.contains("manager: kubectl"));
        assert!(text.contains("replicas: 3"));
    }

    #[test]
    fn sequences_keep_their_order() {
        let text = to_canonical_yaml(&json!({ "args": ["z", "a", "m"] })).unwrap();
        assert_eq!(text, "args:\n- z\n- a\n- m\n");
    }
}

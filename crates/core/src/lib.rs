//! kwatch core types: watch targets, events, snapshots and the collaborator
//! traits the watch engine is driven through.

#![forbid(unsafe_code)]

pub mod canonical;

use std::fmt;

use chrono::{DateTime, Local};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use canonical::to_canonical_yaml;

/// Identifies one watched object. An empty namespace means cluster-scoped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceTarget {
    /// Plural resource name, e.g. `pods` or `deployments`.
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceTarget {
    pub fn new(resource: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { resource: resource.into(), namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// `resource<sep>name` or `resource<sep>namespace<sep>name`.
    pub fn qualified_name(&self, sep: &str) -> String {
        if self.cluster_scoped() {
            format!("{}{}{}", self.resource, sep, self.name)
        } else {
            format!("{}{}{}{}{}", self.resource, sep, self.namespace, sep, self.name)
        }
    }

    /// Label used for the old/new sides of a rendered diff.
    pub fn label(&self) -> String {
        format!("{}.yaml", self.qualified_name("/"))
    }

    /// Filesystem-safe stem for scratch files.
    pub fn file_stem(&self) -> String {
        self.qualified_name("_")
    }
}

impl fmt::Display for ResourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cluster_scoped() {
            write!(f, "{} {}", self.resource, self.name)
        } else {
            write!(f, "{} {}/{}", self.resource, self.namespace, self.name)
        }
    }
}

/// A single change notification. The kind carries no meaning for diffing;
/// only the payload's resourceVersion does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WatchEvent {
    Added(serde_json::Value),
    Modified(serde_json::Value),
    Deleted(serde_json::Value),
}

impl WatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }

    pub fn into_object(self) -> serde_json::Value {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Object state captured at one resourceVersion.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    pub object: serde_json::Value,
    pub resource_version: String,
    pub canonical_text: String,
}

impl ObjectSnapshot {
    /// Validate the payload shape, extract `metadata.resourceVersion` and
    /// serialize the object canonically.
    pub fn capture(object: serde_json::Value) -> Result<Self, WatchError> {
        if !object.is_object() {
            return Err(WatchError::MalformedPayload(format!("expected an object, got {}", json_type(&object))));
        }
        let resource_version = object
            .get("metadata")
            .and_then(|m| m.get("resourceVersion"))
            .and_then(|v| v.as_str())
            .filter(|rv| !rv.is_empty())
            .ok_or_else(|| WatchError::MalformedPayload("object missing metadata.resourceVersion".into()))?
            .to_string();
        let canonical_text = to_canonical_yaml(&object)?;
        Ok(Self { object, resource_version, canonical_text })
    }
}

fn json_type(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// One genuine state transition of a target. Rendered, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRecord {
    pub target: ResourceTarget,
    pub previous_text: String,
    pub current_text: String,
    pub timestamp: DateTime<Local>,
}

/// Error taxonomy shared by every stage of the watch engine.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("setup: {0}")]
    Setup(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("render: {0}")]
    Render(String),
    #[error("stream: {0}")]
    Stream(String),
}

pub type WatchResult<T> = Result<T, WatchError>;

/// Live, ordered sequence of events for one target.
pub type EventStream = BoxStream<'static, WatchResult<WatchEvent>>;

/// Opens a change-notification stream for one resolved target.
///
/// The stream is lazy: nothing is requested until it is first polled, and
/// dropping it releases the subscription.
pub trait EventSource: Send + Sync {
    fn watch(&self) -> EventStream;
}

/// A target together with the binding used to watch it.
pub struct ResolvedTarget {
    pub target: ResourceTarget,
    pub source: Box<dyn EventSource>,
}

impl fmt::Debug for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTarget").field("target", &self.target).finish_non_exhaustive()
    }
}

/// A resource expression that could not be turned into targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub expression: String,
    pub error: WatchError,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub targets: Vec<ResolvedTarget>,
    pub failures: Vec<TargetFailure>,
}

/// Turns user-supplied resource expressions into concrete targets.
///
/// An `Err` means nothing could be resolved at all (no client, no discovery);
/// per-expression problems are reported through `Resolution::failures`.
#[async_trait::async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self) -> WatchResult<Resolution>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn qualified_names_follow_scope() {
        let ns = ResourceTarget::new("pods", "default", "web-0");
        assert_eq!(ns.label(), "pods/default/web-0.yaml");
        assert_eq!(ns.file_stem(), "pods_default_web-0");
        assert_eq!(ns.to_string(), "pods default/web-0");

        let cluster = ResourceTarget::new("nodes", "", "node1");
        assert!(cluster.cluster_scoped());
        assert_eq!(cluster.label(), "nodes/node1.yaml");
        assert_eq!(cluster.file_stem(), "nodes_node1");
        assert_eq!(cluster.to_string(), "nodes node1");
    }

    #[test]
    fn capture_extracts_resource_version() {
        let snap = ObjectSnapshot::capture(json!({
            "kind": "ConfigMap",
            "metadata": { "name": "cm", "resourceVersion": "42" },
            "data": { "k": "v" }
        }))
        .unwrap();
        assert_eq!(snap.resource_version, "42");
        assert!(snap.canonical_text.contains("resourceVersion:"), "text={}", snap.canonical_text);
        assert!(snap.canonical_text.contains("42"));
    }

    #[test]
    fn capture_rejects_malformed_payloads() {
        let e1 = ObjectSnapshot::capture(json!("not an object")).unwrap_err();
        assert!(matches!(e1, WatchError::MalformedPayload(_)), "e1={e1}");

        let e2 = ObjectSnapshot::capture(json!({ "metadata": { "name": "x" } })).unwrap_err();
        assert!(e2.to_string().contains("missing metadata.resourceVersion"), "e2={e2}");

        let e3 = ObjectSnapshot::capture(json!({ "metadata": { "resourceVersion": "" } })).unwrap_err();
        assert!(matches!(e3, WatchError::MalformedPayload(_)));
    }

    #[test]
    fn event_kind_does_not_change_payload() {
        let o = json!({ "a": 1 });
        for ev in [WatchEvent::Added(o.clone()), WatchEvent::Modified(o.clone()), WatchEvent::Deleted(o.clone())] {
            assert_eq!(ev.into_object(), o);
        }
    }
}

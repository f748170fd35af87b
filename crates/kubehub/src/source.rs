//! Per-object change stream backed by `kube::runtime::watcher`.

use futures::StreamExt;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, TypeMeta},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
};
use kwatch_core::{EventSource, EventStream, ResourceTarget, WatchError, WatchEvent, WatchResult};
use metrics::counter;
use tracing::{debug, warn};

/// Consecutive watcher errors tolerated before the stream gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Watches exactly one object, filtered server-side by `metadata.name`.
pub struct KubeEventSource {
    api: Api<DynamicObject>,
    resource: ApiResource,
    target: ResourceTarget,
    max_retries: u32,
}

impl KubeEventSource {
    pub fn new(api: Api<DynamicObject>, resource: ApiResource, target: ResourceTarget, max_retries: u32) -> Self {
        Self { api, resource, target, max_retries }
    }
}

impl EventSource for KubeEventSource {
    fn watch(&self) -> EventStream {
        let cfg = watcher::Config::default().fields(&name_selector(&self.target.name));
        let target = self.target.clone();
        let resource = self.resource.clone();
        let max_retries = self.max_retries;
        let mut failures = 0u32;
        watcher::watcher(self.api.clone(), cfg)
            .default_backoff()
            .flat_map(move |res| {
                let items = match res {
                    Ok(ev) => {
                        failures = 0;
                        translate(&target, &resource, ev)
                    }
                    Err(e) => {
                        failures += 1;
                        counter!("kwatch_watch_errors_total", 1u64);
                        if failures > max_retries {
                            vec![Err(WatchError::Stream(format!("{e} (after {failures} consecutive failures)")))]
                        } else {
                            warn!(object = %target, error = %e, attempt = failures, "watch error; retrying with backoff");
                            Vec::new()
                        }
                    }
                };
                futures::stream::iter(items)
            })
            .boxed()
    }
}

pub(crate) fn name_selector(name: &str) -> String {
    format!("metadata.name={name}")
}

fn translate(target: &ResourceTarget, ar: &ApiResource, ev: Event<DynamicObject>) -> Vec<WatchResult<WatchEvent>> {
    match ev {
        Event::Applied(o) => payload(target, ar, o).map(WatchEvent::Modified).into_iter().map(Ok).collect(),
        Event::Deleted(o) => payload(target, ar, o).map(WatchEvent::Deleted).into_iter().map(Ok).collect(),
        Event::Restarted(list) => {
            debug!(object = %target, count = list.len(), "watch restart");
            list.into_iter().filter_map(|o| payload(target, ar, o)).map(|v| Ok(WatchEvent::Added(v))).collect()
        }
    }
}

/// List items usually arrive without apiVersion/kind while watch events carry
/// them; fill them in so both serialize the same.
fn payload(target: &ResourceTarget, ar: &ApiResource, mut obj: DynamicObject) -> Option<serde_json::Value> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
    }
    match serde_json::to_value(&obj) {
        Ok(v) => Some(v),
        Err(e) => {
            counter!("kwatch_events_dropped_total", 1u64);
            warn!(object = %target, error = %e, "dropping event: object could not be serialized");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configmaps() -> ApiResource {
        ApiResource {
            group: String::new(),
            version: "v1".into(),
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            plural: "configmaps".into(),
        }
    }

    fn obj(rv: &str) -> DynamicObject {
        let mut o = DynamicObject::new("cm", &configmaps()).within("default");
        o.metadata.resource_version = Some(rv.into());
        o.data = serde_json::json!({ "data": { "k": "v" } });
        o
    }

    #[test]
    fn restarted_list_becomes_added_events() {
        let t = ResourceTarget::new("configmaps", "default", "cm");
        let out = translate(&t, &configmaps(), Event::Restarted(vec![obj("1"), obj("2")]));
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], Ok(WatchEvent::Added(v)) if v["metadata"]["resourceVersion"] == "1"));
        assert!(matches!(&out[1], Ok(WatchEvent::Added(v)) if v["data"]["k"] == "v"));
    }

    #[test]
    fn listed_object_without_type_meta_matches_watch_payload() {
        let t = ResourceTarget::new("configmaps", "default", "cm");
        let mut listed = obj("5");
        listed.types = None;
        let added = translate(&t, &configmaps(), Event::Restarted(vec![listed]));
        let applied = translate(&t, &configmaps(), Event::Applied(obj("5")));
        let (Ok(WatchEvent::Added(a)), Ok(WatchEvent::Modified(b))) = (&added[0], &applied[0]) else {
            panic!("unexpected events: {added:?} {applied:?}");
        };
        assert_eq!(a["apiVersion"], "v1");
        assert_eq!(a["kind"], "ConfigMap");
        assert_eq!(a, b);
    }

    #[test]
    fn applied_and_deleted_keep_payload() {
        let t = ResourceTarget::new("configmaps", "default", "cm");
        let applied = translate(&t, &configmaps(), Event::Applied(obj("3")));
        assert!(matches!(&applied[..], [Ok(WatchEvent::Modified(v))] if v["kind"] == "ConfigMap"));
        let deleted = translate(&t, &configmaps(), Event::Deleted(obj("4")));
        assert!(matches!(&deleted[..], [Ok(WatchEvent::Deleted(v))] if v["metadata"]["namespace"] == "default"));
    }

    #[test]
    fn selector_is_exact_name() {
        assert_eq!(name_selector("web-0"), "metadata.name=web-0");
    }
}

//! Resource expressions as typed on the command line, and matching resource
//! type names against the discovery catalog.

use kube::core::ApiResource;

/// Resources covered by the `all` category.
pub const ALL_CATEGORY: &[&str] = &[
    "pods",
    "services",
    "replicationcontrollers",
    "daemonsets.apps",
    "deployments.apps",
    "replicasets.apps",
    "statefulsets.apps",
    "horizontalpodautoscalers.autoscaling",
    "cronjobs.batch",
    "jobs.batch",
];

/// Well-known short names (subset of what kubectl knows).
const SHORT_NAMES: &[(&str, &str)] = &[
    ("cm", "configmaps"),
    ("cj", "cronjobs"),
    ("crd", "customresourcedefinitions"),
    ("crds", "customresourcedefinitions"),
    ("deploy", "deployments"),
    ("ds", "daemonsets"),
    ("ep", "endpoints"),
    ("ev", "events"),
    ("hpa", "horizontalpodautoscalers"),
    ("ing", "ingresses"),
    ("limits", "limitranges"),
    ("netpol", "networkpolicies"),
    ("no", "nodes"),
    ("ns", "namespaces"),
    ("pdb", "poddisruptionbudgets"),
    ("po", "pods"),
    ("pv", "persistentvolumes"),
    ("pvc", "persistentvolumeclaims"),
    ("quota", "resourcequotas"),
    ("rc", "replicationcontrollers"),
    ("rs", "replicasets"),
    ("sa", "serviceaccounts"),
    ("sc", "storageclasses"),
    ("sts", "statefulsets"),
    ("svc", "services"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceExpr {
    /// One object by type and name.
    Named { resource: String, name: String },
    /// Every object of a type matching the selectors (or all of them with `--all`).
    Selected { resource: String },
}

impl ResourceExpr {
    pub fn resource(&self) -> &str {
        match self {
            ResourceExpr::Named { resource, .. } | ResourceExpr::Selected { resource } => resource,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("you must specify the type of resource to watch")]
    Empty,
    #[error("there is no need to specify a resource type as a separate argument when passing arguments in resource/name form (e.g. 'kubectl-watch pods/web' instead of 'kubectl-watch pods pods/web')")]
    MixedForms,
    #[error("arguments in resource/name form must have a single resource and name: {0}")]
    BadPair(String),
    #[error("name cannot be provided when a selector is specified")]
    NameWithSelector,
    #[error("resource(s) were provided, but no name was specified (use a name, -l/--selector, --field-selector or --all)")]
    NoName,
}

/// Parse positional arguments the way kubectl does:
/// `TYPE NAME...`, `TYPE/NAME...` or `TYPE[,TYPE...]` plus a selector.
pub fn parse_expressions(args: &[String], has_selector: bool, select_all: bool) -> Result<Vec<ResourceExpr>, ExprError> {
    let Some(first) = args.first() else { return Err(ExprError::Empty) };

    if first.contains('/') {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            let Some((ty, name)) = arg.split_once('/') else { return Err(ExprError::MixedForms) };
            if ty.is_empty() || name.is_empty() || name.contains('/') {
                return Err(ExprError::BadPair(arg.clone()));
            }
            if has_selector {
                return Err(ExprError::NameWithSelector);
            }
            for resource in expand_types(ty) {
                out.push(ResourceExpr::Named { resource, name: name.to_string() });
            }
        }
        return Ok(out);
    }

    let types = expand_types(first);
    let names = &args[1..];
    if names.iter().any(|n| n.contains('/')) {
        return Err(ExprError::MixedForms);
    }
    if !names.is_empty() && has_selector {
        return Err(ExprError::NameWithSelector);
    }
    if names.is_empty() {
        if !has_selector && !select_all {
            return Err(ExprError::NoName);
        }
        return Ok(types.into_iter().map(|resource| ResourceExpr::Selected { resource }).collect());
    }
    let mut out = Vec::with_capacity(types.len() * names.len());
    for resource in &types {
        for name in names {
            out.push(ResourceExpr::Named { resource: resource.clone(), name: name.clone() });
        }
    }
    Ok(out)
}

/// Split `a,b` lists and expand the `all` category.
fn expand_types(spec: &str) -> Vec<String> {
    let mut out = Vec::new();
    for ty in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if ty.eq_ignore_ascii_case("all") {
            out.extend(ALL_CATEGORY.iter().map(|s| s.to_string()));
        } else {
            out.push(ty.to_string());
        }
    }
    out
}

/// Find the served resource a user-typed type name refers to.
///
/// Accepts plural, singular (lowercase kind), kind, well-known short names and
/// an optional `.group` or `.version.group` suffix. Core group resources win
/// over same-named resources in other groups.
pub fn match_resource<'a>(query: &str, catalog: &'a [(ApiResource, bool)]) -> Option<&'a (ApiResource, bool)> {
    let query = query.to_ascii_lowercase();
    let (base, qualifier) = match query.split_once('.') {
        Some((b, q)) => (b.to_string(), Some(q.to_string())),
        None => (query.clone(), None),
    };
    let base = SHORT_NAMES
        .iter()
        .find(|(short, _)| *short == base)
        .map(|(_, plural)| plural.to_string())
        .unwrap_or(base);

    let mut hits: Vec<&(ApiResource, bool)> = catalog
        .iter()
        .filter(|(ar, _)| ar.plural == base || ar.kind.to_ascii_lowercase() == base)
        .filter(|(ar, _)| match qualifier.as_deref() {
            None => true,
            Some(q) => ar.group == q || format!("{}.{}", ar.version, ar.group) == q,
        })
        .collect();
    hits.sort_by(|(a, _), (b, _)| (!a.group.is_empty()).cmp(&!b.group.is_empty()).then(a.group.cmp(&b.group)));
    hits.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn ar(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
        let api_version = if group.is_empty() { version.to_string() } else { format!("{group}/{version}") };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    fn catalog() -> Vec<(ApiResource, bool)> {
        vec![
            (ar("", "v1", "Pod", "pods"), true),
            (ar("", "v1", "Node", "nodes"), false),
            (ar("", "v1", "Event", "events"), true),
            (ar("events.k8s.io", "v1", "Event", "events"), true),
            (ar("apps", "v1", "Deployment", "deployments"), true),
            (ar("example.com", "v1", "Deployment", "deployments"), true),
        ]
    }

    #[test]
    fn type_then_names() {
        let got = parse_expressions(&args(&["pod", "a", "b"]), false, false).unwrap();
        assert_eq!(
            got,
            vec![
                ResourceExpr::Named { resource: "pod".into(), name: "a".into() },
                ResourceExpr::Named { resource: "pod".into(), name: "b".into() },
            ]
        );
    }

    #[test]
    fn slash_pairs() {
        let got = parse_expressions(&args(&["nodes/node1", "pods/pod1"]), false, false).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], ResourceExpr::Named { resource: "nodes".into(), name: "node1".into() });
        assert_eq!(got[1].resource(), "pods");
    }

    #[test]
    fn selector_forms() {
        let got = parse_expressions(&args(&["pods,svc"]), true, false).unwrap();
        assert_eq!(
            got,
            vec![ResourceExpr::Selected { resource: "pods".into() }, ResourceExpr::Selected { resource: "svc".into() }]
        );
        let all = parse_expressions(&args(&["all"]), true, false).unwrap();
        assert_eq!(all.len(), ALL_CATEGORY.len());
        assert!(all.iter().all(|e| matches!(e, ResourceExpr::Selected { .. })));
        assert!(parse_expressions(&args(&["nodes"]), false, true).is_ok());
    }

    #[test]
    fn invalid_combinations() {
        assert_eq!(parse_expressions(&[], false, false), Err(ExprError::Empty));
        assert_eq!(parse_expressions(&args(&["pods"]), false, false), Err(ExprError::NoName));
        assert_eq!(parse_expressions(&args(&["pods", "a"]), true, false), Err(ExprError::NameWithSelector));
        assert_eq!(parse_expressions(&args(&["pods/a", "b"]), false, false), Err(ExprError::MixedForms));
        assert_eq!(parse_expressions(&args(&["pods", "pods/a"]), false, false), Err(ExprError::MixedForms));
        assert!(matches!(parse_expressions(&args(&["pods/"]), false, false), Err(ExprError::BadPair(_))));
        assert!(matches!(parse_expressions(&args(&["a/b/c"]), false, false), Err(ExprError::BadPair(_))));
    }

    #[test]
    fn matches_plural_singular_kind_and_short_names() {
        let cat = catalog();
        for q in ["pods", "pod", "Pod", "po"] {
            assert_eq!(match_resource(q, &cat).map(|(ar, _)| ar.plural.as_str()), Some("pods"), "q={q}");
        }
        let (node, namespaced) = match_resource("no", &cat).unwrap();
        assert_eq!(node.kind, "Node");
        assert!(!namespaced);
        assert!(match_resource("widgets", &cat).is_none());
    }

    #[test]
    fn core_group_wins_unless_qualified() {
        let cat = catalog();
        assert_eq!(match_resource("events", &cat).unwrap().0.group, "");
        assert_eq!(match_resource("events.events.k8s.io", &cat).unwrap().0.group, "events.k8s.io");
        assert_eq!(match_resource("deploy", &cat).unwrap().0.group, "apps");
        assert_eq!(match_resource("deployments.example.com", &cat).unwrap().0.group, "example.com");
        assert_eq!(match_resource("deployments.v1.apps", &cat).unwrap().0.group, "apps");
    }
}

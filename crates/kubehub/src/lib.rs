//! kwatch kubehub: kube client setup, discovery, resolving command-line
//! resource expressions into watch targets, and per-object watch streams.

#![forbid(unsafe_code)]

pub mod expr;
mod source;

use anyhow::{Context, Result};
use kube::{
    api::{Api, ListParams},
    config::KubeConfigOptions,
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client, Config,
};
use kwatch_core::{
    Resolution, ResolvedTarget, ResourceTarget, TargetFailure, TargetResolver, WatchError, WatchResult,
};
use tracing::{debug, info, warn};

pub use expr::{match_resource, parse_expressions, ExprError, ResourceExpr, ALL_CATEGORY};
pub use source::{KubeEventSource, DEFAULT_MAX_RETRIES};

/// Scope and selector flags that apply to every expression.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Explicit namespace; falls back to the kubeconfig context's namespace.
    pub namespace: Option<String>,
    pub all_namespaces: bool,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Watch every object of the given types (`--all`).
    pub select_all: bool,
    /// kubeconfig context to use instead of the current one.
    pub context: Option<String>,
    /// Consecutive watch failures tolerated per target.
    pub max_retries: u32,
}

impl ResolveOptions {
    pub fn has_selector(&self) -> bool {
        non_empty(&self.label_selector).is_some() || non_empty(&self.field_selector).is_some()
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Build a client for the selected (or current) kubeconfig context and report
/// the namespace that context defaults to.
pub async fn connect(context: Option<&str>) -> Result<(Client, String)> {
    let config = match context {
        Some(ctx) => {
            let opts = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            Config::from_kubeconfig(&opts).await.with_context(|| format!("loading kubeconfig context {ctx}"))?
        }
        None => Config::infer().await.context("inferring kube config")?,
    };
    let default_ns = config.default_namespace.clone();
    let client = Client::try_from(config).context("building kube client")?;
    Ok((client, default_ns))
}

/// Served resources (incl. CRDs) at their preferred version, with scope.
pub async fn discover_catalog(client: Client) -> Result<Vec<(ApiResource, bool)>> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            out.push((ar, matches!(caps.scope, Scope::Namespaced)));
        }
    }
    // Stable-ish order
    out.sort_by(|(a, _), (b, _)| a.group.cmp(&b.group).then(a.plural.cmp(&b.plural)));
    debug!(resources = out.len(), "discovery finished");
    Ok(out)
}

/// Resolves expressions against a live cluster.
pub struct KubeResolver {
    client: Client,
    namespace: String,
    catalog: Vec<(ApiResource, bool)>,
    exprs: Vec<ResourceExpr>,
    opts: ResolveOptions,
}

impl KubeResolver {
    /// Parse the arguments, connect and run discovery. Any failure here is a
    /// setup error for the whole invocation.
    pub async fn connect(args: &[String], opts: ResolveOptions) -> Result<Self> {
        let exprs = parse_expressions(args, opts.has_selector(), opts.select_all)?;
        let (client, default_ns) = connect(opts.context.as_deref()).await?;
        let catalog = discover_catalog(client.clone()).await?;
        let namespace = opts.namespace.clone().filter(|n| !n.is_empty()).unwrap_or(default_ns);
        Ok(Self { client, namespace, catalog, exprs, opts })
    }

    fn list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(l) = non_empty(&self.opts.label_selector) {
            lp = lp.labels(l);
        }
        if let Some(f) = non_empty(&self.opts.field_selector) {
            lp = lp.fields(f);
        }
        lp
    }

    fn binding(&self, ar: &ApiResource, target: ResourceTarget) -> ResolvedTarget {
        let api: Api<DynamicObject> = if target.cluster_scoped() {
            Api::all_with(self.client.clone(), ar)
        } else {
            Api::namespaced_with(self.client.clone(), &target.namespace, ar)
        };
        let source = KubeEventSource::new(api, ar.clone(), target.clone(), self.opts.max_retries);
        ResolvedTarget { target, source: Box::new(source) }
    }

    async fn resolve_one(&self, expr: &ResourceExpr) -> WatchResult<Vec<ResolvedTarget>> {
        let (ar, namespaced) = match_resource(expr.resource(), &self.catalog)
            .ok_or_else(|| WatchError::Setup(format!("the server doesn't have a resource type \"{}\"", expr.resource())))?;
        let scope_ns = if *namespaced { self.namespace.as_str() } else { "" };

        match expr {
            ResourceExpr::Named { name, .. } => {
                let api: Api<DynamicObject> = if *namespaced {
                    Api::namespaced_with(self.client.clone(), scope_ns, ar)
                } else {
                    Api::all_with(self.client.clone(), ar)
                };
                match api.get_opt(name).await {
                    Ok(Some(_)) => Ok(vec![self.binding(ar, ResourceTarget::new(&ar.plural, scope_ns, name))]),
                    Ok(None) => Err(WatchError::Setup(format!("{} \"{}\" not found", ar.plural, name))),
                    Err(e) => Err(WatchError::Setup(format!("getting {} \"{}\": {}", ar.plural, name, e))),
                }
            }
            ResourceExpr::Selected { .. } => {
                let api: Api<DynamicObject> = if *namespaced && !self.opts.all_namespaces {
                    Api::namespaced_with(self.client.clone(), scope_ns, ar)
                } else {
                    Api::all_with(self.client.clone(), ar)
                };
                let list = api
                    .list(&self.list_params())
                    .await
                    .map_err(|e| WatchError::Setup(format!("listing {}: {}", ar.plural, e)))?;
                let mut out = Vec::with_capacity(list.items.len());
                for obj in list.items {
                    let Some(name) = obj.metadata.name.clone() else { continue };
                    let ns = if *namespaced { obj.metadata.namespace.clone().unwrap_or_default() } else { String::new() };
                    out.push(self.binding(ar, ResourceTarget::new(&ar.plural, ns, name)));
                }
                if out.is_empty() {
                    info!(resource = %ar.plural, "no objects matched");
                }
                Ok(out)
            }
        }
    }
}

#[async_trait::async_trait]
impl TargetResolver for KubeResolver {
    async fn resolve(&self) -> WatchResult<Resolution> {
        let mut resolution = Resolution::default();
        for expr in &self.exprs {
            match self.resolve_one(expr).await {
                Ok(targets) => resolution.targets.extend(targets),
                Err(error) => {
                    warn!(expression = %describe(expr), error = %error, "could not resolve");
                    resolution.failures.push(TargetFailure { expression: describe(expr), error });
                }
            }
        }
        Ok(resolution)
    }
}

fn describe(expr: &ResourceExpr) -> String {
    match expr {
        ResourceExpr::Named { resource, name } => format!("{resource}/{name}"),
        ResourceExpr::Selected { resource } => resource.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_selectors_do_not_count() {
        let mut o = ResolveOptions::default();
        assert!(!o.has_selector());
        o.label_selector = Some("  ".into());
        assert!(!o.has_selector());
        o.field_selector = Some("status.phase=Running".into());
        assert!(o.has_selector());
    }

    #[test]
    fn expressions_are_described_for_logs() {
        assert_eq!(describe(&ResourceExpr::Named { resource: "pods".into(), name: "a".into() }), "pods/a");
        assert_eq!(describe(&ResourceExpr::Selected { resource: "svc".into() }), "svc");
    }
}

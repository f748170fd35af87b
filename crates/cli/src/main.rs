use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use kwatch_core::WatchError;
use kwatch_kubehub::{KubeResolver, ResolveOptions, DEFAULT_MAX_RETRIES};
use kwatch_render::{ColorMode, DiffRenderer, DiffSink, DiffTool};
use kwatch_session::{effective_timeout, Coordinator};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod duration;

use duration::parse_duration;

#[derive(Parser, Debug)]
#[command(
    name = "kubectl-watch",
    version,
    about = "Watch Kubernetes objects and print a YAML diff every time one changes",
    after_help = "Examples:\n  kubectl watch deploy web\n  kubectl watch nodes/node1 pods/pod1\n  kubectl watch pods -l app=web -t 1h\n  kubectl watch all --all -n prod"
)]
struct Cli {
    /// Resource expressions: TYPE NAME..., TYPE/NAME..., or TYPE[,TYPE...] with -l, --field-selector or --all
    #[arg(required = true, value_name = "RESOURCE")]
    resources: Vec<String>,

    /// Label selector, e.g. `app=web,tier!=db`
    #[arg(short = 'l', long = "selector", env = "KWATCH_SELECTOR")]
    selector: Option<String>,

    /// Field selector, e.g. `status.phase=Running`
    #[arg(long = "field-selector", env = "KWATCH_FIELD_SELECTOR")]
    field_selector: Option<String>,

    /// Watch matching objects in every namespace
    #[arg(short = 'A', long = "all-namespaces", action = ArgAction::SetTrue, env = "KWATCH_ALL_NAMESPACES")]
    all_namespaces: bool,

    /// Watch every object of the given types
    #[arg(long = "all", action = ArgAction::SetTrue)]
    all: bool,

    /// Namespace (default: the kubeconfig context's namespace)
    #[arg(short = 'n', long = "namespace", env = "KWATCH_NAMESPACE")]
    namespace: Option<String>,

    /// kubeconfig context to use
    #[arg(long = "context", env = "KWATCH_CONTEXT")]
    context: Option<String>,

    /// How long to watch each object (Go duration, e.g. 90s, 10m, 1h30m; 0 means 1h)
    #[arg(short = 't', long = "timeout", env = "KWATCH_TIMEOUT", default_value = "10m", value_parser = parse_duration)]
    timeout: Duration,

    /// Colour the diff output: auto, always or never
    #[arg(long = "color", env = "KWATCH_COLOR", default_value = "auto")]
    color: ColorMode,

    /// `system` (colordiff/diff), `builtin`, or a program invoked as `<program> <old> <new>`
    #[arg(long = "diff-tool", env = "KWATCH_EXTERNAL_DIFF", default_value = "system")]
    diff_tool: DiffTool,

    /// Consecutive watch failures tolerated per object before giving up on it
    #[arg(long = "watch-retries", env = "KWATCH_WATCH_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    watch_retries: u32,
}

impl Cli {
    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            namespace: self.namespace.clone(),
            all_namespaces: self.all_namespaces,
            label_selector: self.selector.clone(),
            field_selector: self.field_selector.clone(),
            select_all: self.all,
            context: self.context.clone(),
            max_retries: self.watch_retries,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("KWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the diffs
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

/// First interrupt cancels every session; a second one exits at once.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signals(shutdown).await {
            warn!(error = %e, "signal handling unavailable; Ctrl-C will terminate immediately");
        }
    });
}

fn on_signal(seen: u32, shutdown: &CancellationToken) {
    if seen == 1 {
        info!("interrupt received; stopping watches (interrupt again to exit immediately)");
        shutdown.cancel();
    } else {
        warn!("second interrupt; exiting");
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn wait_for_signals(shutdown: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut seen = 0u32;
    loop {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        seen += 1;
        on_signal(seen, &shutdown);
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(shutdown: CancellationToken) -> std::io::Result<()> {
    let mut seen = 0u32;
    loop {
        tokio::signal::ctrl_c().await?;
        seen += 1;
        on_signal(seen, &shutdown);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let color = cli.color.enabled(std::io::stdout().is_terminal());
    let renderer = Arc::new(DiffRenderer::new(cli.diff_tool.clone(), color, DiffSink::stdout()));
    let timeout = effective_timeout(Some(cli.timeout));
    info!(diff_tool = ?renderer.tool(), color = renderer.color(), timeout = ?timeout, "kubectl-watch starting");

    let resolver = tokio::select! {
        r = KubeResolver::connect(&cli.resources, cli.resolve_options()) => r.context("preparing watch targets")?,
        _ = shutdown.cancelled() => {
            info!("interrupted before any watch started");
            return Ok(());
        }
    };

    let coordinator = Coordinator::new(renderer, timeout, shutdown.clone());
    let report = match coordinator.run(&resolver).await {
        Ok(r) => r,
        Err(e @ WatchError::Setup(_)) => {
            error!(error = %e, "nothing to watch");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let diffs: u64 = report.sessions.iter().map(|s| s.diffs).sum();
    let dropped: u64 = report.sessions.iter().map(|s| s.dropped + s.render_failures).sum();
    info!(
        sessions = report.sessions.len(),
        failed_targets = report.failures.len(),
        diffs,
        dropped,
        "all watches stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["kubectl-watch", "deploy", "web"]).unwrap();
        assert_eq!(cli.resources, vec!["deploy", "web"]);
        assert_eq!(cli.timeout, Duration::from_secs(600));
        assert_eq!(cli.diff_tool, DiffTool::System);
        assert_eq!(cli.watch_retries, DEFAULT_MAX_RETRIES);
        assert!(!cli.all_namespaces);
    }

    #[test]
    fn flags_map_onto_resolve_options() {
        let cli = Cli::try_parse_from([
            "kubectl-watch", "pods", "-l", "app=web", "-A", "-t", "1h30m", "--color", "never", "--diff-tool", "builtin",
            "--context", "staging",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Duration::from_secs(5400));
        assert_eq!(cli.color, ColorMode::Never);
        assert_eq!(cli.diff_tool, DiffTool::Builtin);
        let o = cli.resolve_options();
        assert!(o.all_namespaces && o.has_selector());
        assert_eq!(o.context.as_deref(), Some("staging"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Cli::try_parse_from(["kubectl-watch"]).is_err());
        assert!(Cli::try_parse_from(["kubectl-watch", "pods", "--all", "-t", "soon"]).is_err());
        assert!(Cli::try_parse_from(["kubectl-watch", "pods", "--all", "--color", "sometimes"]).is_err());
    }
}

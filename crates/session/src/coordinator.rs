use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kwatch_core::{TargetFailure, TargetResolver, WatchError, WatchResult};
use kwatch_render::DiffRenderer;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::session::{SessionReport, WatchSession};

#[derive(Debug, Default)]
pub struct CoordinatorReport {
    pub sessions: Vec<SessionReport>,
    pub failures: Vec<TargetFailure>,
    /// Targets resolved more than once and launched only once.
    pub duplicates: usize,
}

/// Resolves targets and runs one session per target until the shared token
/// is cancelled or every session has stopped.
pub struct Coordinator {
    renderer: Arc<DiffRenderer>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(renderer: Arc<DiffRenderer>, timeout: Duration, shutdown: CancellationToken) -> Self {
        Self { renderer, timeout, shutdown }
    }

    pub async fn run(&self, resolver: &dyn TargetResolver) -> WatchResult<CoordinatorReport> {
        let resolution = resolver.resolve().await?;
        let mut report = CoordinatorReport { failures: resolution.failures, ..Default::default() };
        for f in &report.failures {
            warn!(expression = %f.expression, error = %f.error, "skipping target");
        }
        if resolution.targets.is_empty() && !report.failures.is_empty() {
            let detail: Vec<String> = report.failures.iter().map(|f| format!("{}: {}", f.expression, f.error)).collect();
            return Err(WatchError::Setup(format!("no resources could be watched ({})", detail.join("; "))));
        }

        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();
        for resolved in resolution.targets {
            if !seen.insert(resolved.target.clone()) {
                report.duplicates += 1;
                warn!(object = %resolved.target, "target listed more than once; watching it once");
                continue;
            }
            let session = WatchSession::new(resolved, Arc::clone(&self.renderer), self.timeout);
            tasks.spawn(session.run(self.shutdown.clone()));
        }

        if tasks.is_empty() {
            info!("nothing to watch; waiting for interrupt");
            self.shutdown.cancelled().await;
            return Ok(report);
        }
        info!(sessions = tasks.len(), timeout = ?self.timeout, "watch sessions launched");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested; stopping sessions");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(res) => collect(&mut report, res),
                    None => {
                        info!("all sessions stopped");
                        break;
                    }
                },
            }
        }
        // sessions observe the same token, so this drains promptly
        while let Some(res) = tasks.join_next().await {
            collect(&mut report, res);
        }
        Ok(report)
    }
}

fn collect(report: &mut CoordinatorReport, res: Result<SessionReport, tokio::task::JoinError>) {
    match res {
        Ok(r) => report.sessions.push(r),
        Err(e) => error!(error = %e, "watch session task failed"),
    }
}
